//! Entanglement swapping over N = 8 owners with two coherent flag qubits.
//!
//! Intermediate outcomes fold into an X flag and a Z flag; one controlled-X
//! and one controlled-Z at the last owner replace all classical reports.
//! The contraction stays a single closed circuit growing linearly in N.
//!
//! Run with: `cargo run --example ent_swap_adapt`

use anyhow::Context;

use quantum_netsim::apps::AppSignal;
use quantum_netsim::basis::{gate_name, APP_DIST_EPR, DIST_EPR_DELAY, SETUP_DELAY};
use quantum_netsim::channel::QuantumChannel;
use quantum_netsim::kernel::{SimEvent, Simulation, SimulationConfig};
use quantum_netsim::node::QuantumMemory;
use quantum_netsim::phy_entity::QuantumPhyEntity;
use quantum_netsim::stack::{assign_addresses, install_ent_swap_adapt, QuantumNetStackHelper};

const N: usize = 8;

fn main() -> anyhow::Result<()> {
    quantum_netsim::logging::init();

    let owners: Vec<String> = (0..N).map(|i| format!("Owner{i}")).collect();
    let owner_refs: Vec<&str> = owners.iter().map(String::as_str).collect();
    let mut entity = QuantumPhyEntity::new(&owner_refs);

    let last = format!("Owner{}", N - 1);
    entity.set_dephase_model(&last, &gate_name("PX"), 1.2);
    entity.set_dephase_model(&last, &gate_name("PZ"), 1.2);
    assign_addresses(&mut entity);

    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim)?;

    for rank in 0..N - 1 {
        let conn = QuantumChannel::new(owners[rank].clone(), owners[rank + 1].clone());
        let (epr_src, _) = sim
            .entity
            .conn_apps(&conn, APP_DIST_EPR)
            .context("stack installed the EPR apps")?;
        sim.schedule_at(
            SETUP_DELAY + rank as f64 * DIST_EPR_DELAY,
            SimEvent::AppSignal(
                epr_src,
                AppSignal::DistributeEpr {
                    epr: (
                        format!("Owner{rank}_Qubit1"),
                        format!("Owner{}_Qubit0", rank + 1),
                    ),
                },
            ),
        );
    }

    let mut former = vec![String::new()];
    let mut latter = vec!["Owner0_Qubit1".to_string()];
    for rank in 1..N - 1 {
        former.push(format!("Owner{rank}_Qubit0"));
        latter.push(format!("Owner{rank}_Qubit1"));
    }
    former.push(format!("Owner{}_Qubit0", N - 1));
    latter.push(String::new());

    install_ent_swap_adapt(
        &mut sim,
        &last,
        QuantumMemory::new(former),
        QuantumMemory::new(latter),
        SETUP_DELAY + N as f64 * DIST_EPR_DELAY,
        SETUP_DELAY + (N + 1) as f64 * DIST_EPR_DELAY,
    );

    sim.stop_at(SETUP_DELAY + (N + 2) as f64 * DIST_EPR_DELAY);
    sim.run()?;

    let end_pair = ("Owner0_Qubit1".to_string(), format!("Owner{}_Qubit0", N - 1));
    let fidelity = sim.entity.calculate_fidelity((&end_pair.0, &end_pair.1))?;
    println!("end-to-end fidelity over {N} owners: {fidelity:.4}");
    Ok(())
}
