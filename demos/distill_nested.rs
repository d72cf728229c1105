//! Nested distillation of N = 4 EPR pairs with classical verdicts.
//!
//! The recursion distills pairs (0,1) and (2,3) into survivors 0 and 2,
//! then distills those against each other; each round reports its outcome
//! digit and gets a "win"/"lose" back.
//!
//! Run with: `cargo run --example distill_nested`

use quantum_netsim::apps::DistillNestedApp;
use quantum_netsim::basis::ETERNITY;
use quantum_netsim::channel::QuantumChannel;
use quantum_netsim::kernel::{Simulation, SimulationConfig};
use quantum_netsim::phy_entity::QuantumPhyEntity;
use quantum_netsim::stack::{
    assign_addresses, install_distill_nested_pair, QuantumNetStackHelper,
};

const N: usize = 4;

fn main() -> anyhow::Result<()> {
    quantum_netsim::logging::init();

    let mut entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
    entity.set_time_model("Alice", 2e1);
    entity.set_time_model("Bob", 2e1);
    assign_addresses(&mut entity);

    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim)?;

    let conn = QuantumChannel::new("Alice", "Bob");
    conn.set_depolar_model(0.95, &mut sim.entity);

    let qubits_alice: Vec<String> = (0..N).map(|i| format!("A{i}")).collect();
    let qubits_bob: Vec<String> = (0..N).map(|i| format!("B{i}")).collect();
    let (alice, bob) = install_distill_nested_pair(
        &mut sim,
        &conn,
        qubits_alice,
        qubits_bob,
        0.0,
        ETERNITY,
    )?;

    sim.stop_at(ETERNITY);
    sim.run()?;

    let alice_win = sim.app_as::<DistillNestedApp>(alice).expect("installed").win();
    let bob_win = sim.app_as::<DistillNestedApp>(bob).expect("installed").win();
    println!("final round verdicts: Alice {alice_win}, Bob {bob_win}");
    if alice_win {
        let fidelity = sim.entity.calculate_fidelity(("A0", "B0"))?;
        println!("surviving pair fidelity: {fidelity:.4}");
    }
    Ok(())
}
