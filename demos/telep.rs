//! One-shot teleportation of √(5/7)|0⟩ + √(2/7)|1⟩ from Alice to Bob over
//! a channel depolarizing to fidelity 0.93.
//!
//! Run with: `cargo run --example telep`

use num_complex::Complex64;

use quantum_netsim::apps::Qubit;
use quantum_netsim::channel::QuantumChannel;
use quantum_netsim::kernel::{Simulation, SimulationConfig};
use quantum_netsim::phy_entity::{Actor, QuantumPhyEntity};
use quantum_netsim::stack::{assign_addresses, install_telep_pair, QuantumNetStackHelper};

fn main() -> anyhow::Result<()> {
    quantum_netsim::logging::init();

    let mut entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
    entity.set_time_model("Alice", 0.13);
    entity.set_dephase_model("Bob", &quantum_netsim::basis::gate_name("PX"), 0.23);
    assign_addresses(&mut entity);

    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim)?;

    let conn = QuantumChannel::new("Alice", "Bob");
    conn.set_depolar_model(0.93, &mut sim.entity);

    let input = Qubit::new(
        vec![
            Complex64::new((5.0f64 / 7.0).sqrt(), 0.0),
            Complex64::new(0.0, (2.0f64 / 7.0).sqrt()),
        ],
        "A0",
    );
    install_telep_pair(
        &mut sim,
        &conn,
        ("A0".to_string(), "A1".to_string()),
        "B0".to_string(),
        Some(input),
        2.0,
        10.0,
    )?;

    sim.stop_at(10.0);
    sim.run()?;

    let dm = sim.entity.peek_dm(&Actor::System, &["B0".to_string()])?;
    println!("Bob's state diagonal: [{:.4}, {:.4}]", dm[0].re, dm[3].re);
    Ok(())
}
