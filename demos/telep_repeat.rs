//! Two teleportations back to back over the same channel.
//!
//! After the first run completes, the source app is re-armed with fresh
//! qubit names and a second input state, and the simulation resumes. This
//! exercises the engine's dynamically growing qubit set: the first
//! experiment's qubits stay in the ledger while the second one runs.
//!
//! Run with: `cargo run --example telep_repeat`

use num_complex::Complex64;

use quantum_netsim::apps::{AppSignal, Qubit, TelepDstApp, TelepSrcApp};
use quantum_netsim::channel::QuantumChannel;
use quantum_netsim::kernel::{SimEvent, Simulation, SimulationConfig};
use quantum_netsim::phy_entity::{Actor, QuantumPhyEntity};
use quantum_netsim::stack::{assign_addresses, install_telep_pair, QuantumNetStackHelper};

fn main() -> anyhow::Result<()> {
    quantum_netsim::logging::init();

    let mut entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
    entity.set_time_model("Alice", 2e1);
    entity.set_time_model("Bob", 2e1);
    assign_addresses(&mut entity);

    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim)?;

    let conn = QuantumChannel::new("Alice", "Bob");
    conn.set_depolar_model(0.93, &mut sim.entity);

    let first_input = Qubit::new(
        vec![
            Complex64::new((5.0f64 / 7.0).sqrt(), 0.0),
            Complex64::new(0.0, (2.0f64 / 7.0).sqrt()),
        ],
        "Alice0",
    );
    let (src, dst) = install_telep_pair(
        &mut sim,
        &conn,
        ("Alice0".to_string(), "Alice1".to_string()),
        "Bob0".to_string(),
        Some(first_input),
        2.0,
        10.0,
    )?;

    sim.stop_at(10.0);
    sim.run()?;

    let dm = sim.entity.peek_dm(&Actor::System, &["Bob0".to_string()])?;
    println!("first state diagonal: [{:.4}, {:.4}]", dm[0].re, dm[3].re);

    // Re-arm the pair with fresh names and a second state, then resume.
    let second_input = Qubit::new(
        vec![
            Complex64::new((5.0f64 / 9.0).sqrt(), 0.0),
            Complex64::new(0.0, (4.0f64 / 9.0).sqrt()),
        ],
        "Alice2",
    );
    let src_app = sim
        .app_as_mut::<TelepSrcApp>(src)
        .expect("installed source app");
    src_app.set_qubits(("Alice2".to_string(), "Alice3".to_string()));
    src_app.set_qubit("Bob1");
    src_app.set_input(Some(second_input));
    sim.app_as_mut::<TelepDstApp>(dst)
        .expect("installed destination app")
        .set_qubit("Bob1");
    sim.extend_app_window(src, 20.0);
    sim.extend_app_window(dst, 20.0);

    sim.schedule(2.0, SimEvent::AppSignal(src, AppSignal::Teleport));
    sim.stop_at(20.0);
    sim.run()?;

    let dm = sim.entity.peek_dm(&Actor::System, &["Bob1".to_string()])?;
    println!("second state diagonal: [{:.4}, {:.4}]", dm[0].re, dm[3].re);
    Ok(())
}
