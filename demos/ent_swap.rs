//! Entanglement swapping over a chain of N = 8 owners with classical
//! outcome reports.
//!
//! Every owner shares an EPR pair with its successor; the intermediates
//! Bell-measure and report to the last owner, which applies the
//! accumulated corrections. The driver reports the end-to-end fidelity.
//!
//! Run with: `cargo run --example ent_swap`

use anyhow::Context;

use quantum_netsim::apps::AppSignal;
use quantum_netsim::basis::{APP_DIST_EPR, SETUP_DELAY, TELEP_DELAY};
use quantum_netsim::channel::QuantumChannel;
use quantum_netsim::kernel::{SimEvent, Simulation, SimulationConfig};
use quantum_netsim::phy_entity::QuantumPhyEntity;
use quantum_netsim::stack::{
    assign_addresses, install_ent_swap_dst, install_ent_swap_src, QuantumNetStackHelper,
};

const N: usize = 8;

fn main() -> anyhow::Result<()> {
    quantum_netsim::logging::init();

    let owners: Vec<String> = (0..N).map(|i| format!("Owner{i}")).collect();
    let owner_refs: Vec<&str> = owners.iter().map(String::as_str).collect();
    let mut entity = QuantumPhyEntity::new(&owner_refs);
    assign_addresses(&mut entity);

    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim)?;

    // Every owner but the last shares an EPR pair with its successor.
    for rank in 0..N - 1 {
        let conn = QuantumChannel::new(owners[rank].clone(), owners[rank + 1].clone());
        let (epr_src, _) = sim
            .entity
            .conn_apps(&conn, APP_DIST_EPR)
            .context("stack installed the EPR apps")?;
        sim.schedule_at(
            SETUP_DELAY,
            SimEvent::AppSignal(
                epr_src,
                AppSignal::DistributeEpr {
                    epr: (
                        format!("Owner{rank}_QubitEntToOwner{}", rank + 1),
                        format!("Owner{}_QubitEntFromOwner{rank}", rank + 1),
                    ),
                },
            ),
        );
    }

    // The N - 2 swap measurements, staggered down the chain.
    let last = owners[N - 1].clone();
    for rank in 1..N - 1 {
        let conn = QuantumChannel::new(owners[rank].clone(), last.clone());
        install_ent_swap_src(
            &mut sim,
            &conn,
            (
                format!("Owner{rank}_QubitEntFromOwner{}", rank - 1),
                format!("Owner{rank}_QubitEntToOwner{}", rank + 1),
            ),
            TELEP_DELAY * rank as f64,
            TELEP_DELAY * (rank + 1) as f64,
        )?;
    }
    install_ent_swap_dst(
        &mut sim,
        &last,
        format!("Owner{}_QubitEntFromOwner{}", N - 1, N - 2),
        N - 2,
        SETUP_DELAY,
        TELEP_DELAY * (N - 1) as f64,
    );

    sim.stop_at(TELEP_DELAY * (N - 1) as f64);
    sim.run()?;

    let fidelity = sim.entity.calculate_fidelity((
        "Owner0_QubitEntToOwner1",
        &format!("Owner{}_QubitEntFromOwner{}", N - 1, N - 2),
    ))?;
    println!("end-to-end fidelity over {N} owners: {fidelity:.4}");
    Ok(())
}
