//! Chained teleportation with coherent adaptation over four owners.
//!
//! The input state hops down the pipeline; each hop folds its
//! predecessor's qubits in coherently instead of waiting for measurement
//! outcomes, and the last owner reports the received state.
//!
//! Run with: `cargo run --example telep_lin_adapt`

use num_complex::Complex64;

use quantum_netsim::apps::{Qubit, TelepLinAdaptApp};
use quantum_netsim::basis::{ETERNITY, SETUP_DELAY};
use quantum_netsim::kernel::{Simulation, SimulationConfig};
use quantum_netsim::phy_entity::QuantumPhyEntity;
use quantum_netsim::stack::{
    assign_addresses, install_telep_lin_adapt_chain, QuantumNetStackHelper,
};

const N: usize = 4;

fn main() -> anyhow::Result<()> {
    quantum_netsim::logging::init();

    let owners: Vec<String> = (0..N).map(|i| format!("Owner{i}")).collect();
    let owner_refs: Vec<&str> = owners.iter().map(String::as_str).collect();
    let mut entity = QuantumPhyEntity::new(&owner_refs);
    assign_addresses(&mut entity);

    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim)?;

    let eprs: Vec<(String, String)> = (0..N - 1)
        .map(|rank| {
            (
                format!("Owner{rank}_Qubit1"),
                format!("Owner{}_Qubit0", rank + 1),
            )
        })
        .collect();
    let input = Qubit::new(
        vec![
            Complex64::new((5.0f64 / 7.0).sqrt(), 0.0),
            Complex64::new(0.0, (2.0f64 / 7.0).sqrt()),
        ],
        "PSI",
    );
    let ids = install_telep_lin_adapt_chain(
        &mut sim,
        &owners,
        &eprs,
        input,
        SETUP_DELAY,
        ETERNITY,
    )?;

    sim.stop_at(ETERNITY);
    sim.run()?;

    let last_app = sim
        .app_as::<TelepLinAdaptApp>(*ids.last().expect("chain has owners"))
        .expect("installed app");
    let output = last_app.output();
    println!(
        "received state diagonal: [{:.4}, {:.4}]",
        output[0].re, output[3].re
    );
    Ok(())
}
