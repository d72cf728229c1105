//! Two-owner EPR distribution.
//!
//! Alice generates a Bell pair and distributes the second qubit to Bob over
//! the classical link; the driver reports the pair's density matrix and its
//! fidelity against |Φ⁺⟩.
//!
//! Run with: `cargo run --example epr_dist`

use anyhow::Context;

use quantum_netsim::apps::AppSignal;
use quantum_netsim::basis::{APP_DIST_EPR, SETUP_DELAY};
use quantum_netsim::channel::QuantumChannel;
use quantum_netsim::kernel::{SimEvent, Simulation, SimulationConfig};
use quantum_netsim::phy_entity::{Actor, QuantumPhyEntity};
use quantum_netsim::stack::{assign_addresses, QuantumNetStackHelper};

fn main() -> anyhow::Result<()> {
    quantum_netsim::logging::init();

    let mut entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
    assign_addresses(&mut entity);

    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim)?;

    let conn = QuantumChannel::new("Alice", "Bob");
    conn.set_depolar_model(0.95, &mut sim.entity);

    let (epr_src, _) = sim
        .entity
        .conn_apps(&conn, APP_DIST_EPR)
        .context("stack installed the EPR apps")?;
    sim.schedule_at(
        SETUP_DELAY,
        SimEvent::AppSignal(
            epr_src,
            AppSignal::DistributeEpr {
                epr: ("A0".to_string(), "B0".to_string()),
            },
        ),
    );

    sim.stop_at(1.0);
    sim.run()?;

    let dm = sim
        .entity
        .peek_dm(&Actor::System, &["A0".to_string(), "B0".to_string()])?;
    println!("diagonal: {:.4} {:.4} {:.4} {:.4}", dm[0].re, dm[5].re, dm[10].re, dm[15].re);
    let fidelity = sim.entity.calculate_fidelity(("A0", "B0"))?;
    println!("fidelity against the Bell state: {fidelity:.4}");
    Ok(())
}
