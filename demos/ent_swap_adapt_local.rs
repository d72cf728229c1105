//! Entanglement swapping over N = 8 owners with nearest-neighbor coherent
//! adaptation: no classical reports, the smallest network footprint of the
//! swap family, contraction cost linear in the chain length.
//!
//! Run with: `cargo run --example ent_swap_adapt_local`

use anyhow::Context;

use quantum_netsim::apps::AppSignal;
use quantum_netsim::basis::{gate_name, APP_DIST_EPR, DIST_EPR_DELAY, SETUP_DELAY};
use quantum_netsim::channel::QuantumChannel;
use quantum_netsim::kernel::{SimEvent, Simulation, SimulationConfig};
use quantum_netsim::node::QuantumMemory;
use quantum_netsim::phy_entity::{Actor, QuantumPhyEntity};
use quantum_netsim::stack::{
    assign_addresses, install_ent_swap_adapt_local, QuantumNetStackHelper,
};

const N: usize = 8;

fn main() -> anyhow::Result<()> {
    quantum_netsim::logging::init();

    let owners: Vec<String> = (0..N).map(|i| format!("Owner{i}")).collect();
    let owner_refs: Vec<&str> = owners.iter().map(String::as_str).collect();
    let mut entity = QuantumPhyEntity::new(&owner_refs);

    // The last owner's corrections carry the noise of its PX / PZ gates.
    let last = format!("Owner{}", N - 1);
    entity.set_dephase_model(&last, &gate_name("PX"), 1.2);
    entity.set_dephase_model(&last, &gate_name("PZ"), 1.2);
    assign_addresses(&mut entity);

    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim)?;

    // Distribute the chain's EPR pairs, one link per slot.
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

    // Per-rank (former, latter) qubits; empty names at the chain ends.
    let mut former = vec![String::new()];
    let mut latter = vec!["Owner0_Qubit1".to_string()];
    for rank in 1..N - 1 {
        former.push(format!("Owner{rank}_Qubit0"));
        latter.push(format!("Owner{rank}_Qubit1"));
    }
    former.push(format!("Owner{}_Qubit0", N - 1));
    latter.push(String::new());

    install_ent_swap_adapt_local(
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
    let dm = sim
        .entity
        .peek_dm(&Actor::System, &[end_pair.0.clone(), end_pair.1.clone()])?;
    println!(
        "end-to-end diagonal: {:.4} {:.4} {:.4} {:.4}",
        dm[0].re, dm[5].re, dm[10].re, dm[15].re
    );
    let fidelity = sim.entity.calculate_fidelity((&end_pair.0, &end_pair.1))?;
    println!("end-to-end fidelity over {N} owners: {fidelity:.4}");
    Ok(())
}
