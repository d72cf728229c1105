//! One-shot distillation of two EPR pairs distributed at fidelity 0.93.
//!
//! Run with: `cargo run --example distill`

use quantum_netsim::apps::DistillApp;
use quantum_netsim::channel::QuantumChannel;
use quantum_netsim::kernel::{Simulation, SimulationConfig};
use quantum_netsim::phy_entity::QuantumPhyEntity;
use quantum_netsim::stack::{assign_addresses, install_distill_pair, QuantumNetStackHelper};

fn main() -> anyhow::Result<()> {
    quantum_netsim::logging::init();

    let mut entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
    entity.set_time_model("Alice", 0.13);
    entity.set_dephase_model("Bob", &quantum_netsim::basis::gate_name("CNOT"), 0.23);
    assign_addresses(&mut entity);

    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim)?;

    let conn = QuantumChannel::new("Alice", "Bob");
    conn.set_depolar_model(0.93, &mut sim.entity);

    let (alice, bob) = install_distill_pair(
        &mut sim,
        &conn,
        ("Alice0".to_string(), "Bob0".to_string()),
        ("Alice1".to_string(), "Bob1".to_string()),
        2.0,
        20.0,
    )?;

    sim.stop_at(20.0);
    sim.run()?;

    let alice_win = sim
        .app_as::<DistillApp>(alice)
        .expect("installed app")
        .win();
    let bob_win = sim.app_as::<DistillApp>(bob).expect("installed app").win();
    println!("verdicts: Alice {alice_win}, Bob {bob_win}");

    if alice_win {
        let fidelity = sim.entity.calculate_fidelity(("Alice0", "Bob0"))?;
        println!("kept pair fidelity: {fidelity:.4} (input was 0.93)");
    } else {
        println!("round lost; the goal pair is discarded");
    }
    Ok(())
}
