//! Entanglement swapping scenarios: the classical chain and both coherent
//! adaptive variants.

use num_complex::Complex64;

use quantum_netsim::apps::AppSignal;
use quantum_netsim::basis::{APP_DIST_EPR, DIST_EPR_DELAY, SETUP_DELAY, TELEP_DELAY};
use quantum_netsim::channel::QuantumChannel;
use quantum_netsim::kernel::{SimEvent, Simulation, SimulationConfig};
use quantum_netsim::node::QuantumMemory;
use quantum_netsim::phy_entity::{Actor, QuantumPhyEntity};
use quantum_netsim::stack::{
    assign_addresses, install_ent_swap_adapt, install_ent_swap_adapt_local,
    install_ent_swap_dst, install_ent_swap_src, QuantumNetStackHelper,
};

const LINK_FIDELITY: f64 = 0.95;

fn owner_names(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("Owner{i}")).collect()
}

fn setup_chain(n: usize, seed: u64) -> Simulation {
    let owners = owner_names(n);
    let refs: Vec<&str> = owners.iter().map(String::as_str).collect();
    let mut entity = QuantumPhyEntity::with_seed(&refs, seed);
    for owner in &owners {
        entity.set_time_model(owner, 1e9);
    }
    assign_addresses(&mut entity);
    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim).unwrap();

    for rank in 0..n - 1 {
        let conn = QuantumChannel::new(owners[rank].clone(), owners[rank + 1].clone());
        conn.set_depolar_model(LINK_FIDELITY, &mut sim.entity);
        let (epr_src, _) = sim.entity.conn_apps(&conn, APP_DIST_EPR).unwrap();
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
    sim
}

fn end_pair(n: usize) -> (String, String) {
    ("Owner0_Qubit1".to_string(), format!("Owner{}_Qubit0", n - 1))
}

/// Per-rank (former, latter) qubit memories with empty names at the ends.
fn chain_memories(n: usize) -> (QuantumMemory, QuantumMemory) {
    let mut former = vec![String::new()];
    let mut latter = vec!["Owner0_Qubit1".to_string()];
    for rank in 1..n - 1 {
        former.push(format!("Owner{rank}_Qubit0"));
        latter.push(format!("Owner{rank}_Qubit1"));
    }
    former.push(format!("Owner{}_Qubit0", n - 1));
    latter.push(String::new());
    (QuantumMemory::new(former), QuantumMemory::new(latter))
}

#[test_log::test]
fn classic_chain_swap_entangles_the_end_qubits() {
    let n = 4;
    let mut sim = setup_chain(n, 3);
    let owners = owner_names(n);
    let last = owners[n - 1].clone();

    for rank in 1..n - 1 {
        let conn = QuantumChannel::new(owners[rank].clone(), last.clone());
        install_ent_swap_src(
            &mut sim,
            &conn,
            (
                format!("Owner{rank}_Qubit0"),
                format!("Owner{rank}_Qubit1"),
            ),
            TELEP_DELAY * rank as f64,
            TELEP_DELAY * (rank + 1) as f64,
        )
        .unwrap();
    }
    install_ent_swap_dst(
        &mut sim,
        &last,
        format!("Owner{}_Qubit0", n - 1),
        n - 2,
        SETUP_DELAY,
        TELEP_DELAY * (n - 1) as f64,
    );

    sim.stop_at(TELEP_DELAY * (n - 1) as f64);
    sim.run().unwrap();

    let (a, b) = end_pair(n);
    let fidelity = sim.entity.calculate_fidelity((&a, &b)).unwrap();
    // Three 0.95 links compose to roughly 0.87; anything clearly above the
    // separable bound of 0.5 demonstrates end-to-end entanglement.
    assert!(fidelity > 0.8, "fidelity = {fidelity}");
    assert!(fidelity < 1.0);
}

#[test_log::test]
fn adaptive_swap_beats_the_squared_single_hop_fidelity() {
    // One swap (three owners): F' = F² + (1−F)²/3·… is strictly above F².
    let n = 3;
    let mut sim = setup_chain(n, 7);
    let (former, latter) = chain_memories(n);
    let last = format!("Owner{}", n - 1);
    install_ent_swap_adapt(
        &mut sim,
        &last,
        former,
        latter,
        SETUP_DELAY + n as f64 * DIST_EPR_DELAY,
        SETUP_DELAY + (n + 1) as f64 * DIST_EPR_DELAY,
    );

    sim.stop_at(1.0);
    sim.run().unwrap();

    let (a, b) = end_pair(n);
    let fidelity = sim.entity.calculate_fidelity((&a, &b)).unwrap();
    assert!(
        fidelity > LINK_FIDELITY * LINK_FIDELITY,
        "fidelity {fidelity} must beat {}",
        LINK_FIDELITY * LINK_FIDELITY
    );
}

#[test_log::test]
fn adaptive_local_swap_over_eight_owners() {
    let n = 8;
    let mut sim = setup_chain(n, 11);
    let (former, latter) = chain_memories(n);
    let last = format!("Owner{}", n - 1);
    install_ent_swap_adapt_local(
        &mut sim,
        &last,
        former,
        latter,
        SETUP_DELAY + n as f64 * DIST_EPR_DELAY,
        SETUP_DELAY + (n + 1) as f64 * DIST_EPR_DELAY,
    );

    sim.stop_at(1.0);
    sim.run().unwrap();

    let (a, b) = end_pair(n);
    let dm = sim
        .entity
        .peek_dm(&Actor::System, &[a.clone(), b.clone()])
        .unwrap();

    // Trace one, diagonal-dominant, coherences below the ideal 0.5.
    let trace = dm[0] + dm[5] + dm[10] + dm[15];
    assert!((trace.re - 1.0).abs() < 5e-3);
    assert!(trace.im.abs() < 5e-3);
    let diagonal_mass = dm[0].re + dm[15].re;
    assert!(diagonal_mass > 0.5, "entangled mass = {diagonal_mass}");
    for (idx, value) in dm.iter().enumerate() {
        let dim = 4;
        if idx % dim != idx / dim {
            assert!(value.norm() < 0.5, "coherence {idx} = {value}");
        }
    }

    // Seven noisy links still beat the separable bound.
    let fidelity = sim.entity.calculate_fidelity((&a, &b)).unwrap();
    assert!(fidelity > 0.5, "fidelity = {fidelity}");
    assert!(fidelity < LINK_FIDELITY, "fidelity = {fidelity}");

    // The intermediates are all traced out; only the end pair lives.
    let live = sim.entity.engine().valid_qubits();
    assert_eq!(live.len(), 2);
    assert!(live.contains(&a));
    assert!(live.contains(&b));
}

#[test_log::test]
fn adaptive_variants_agree_with_each_other() {
    let n = 4;
    let run_flagged = {
        let mut sim = setup_chain(n, 19);
        let (former, latter) = chain_memories(n);
        let last = format!("Owner{}", n - 1);
        install_ent_swap_adapt(
            &mut sim,
            &last,
            former,
            latter,
            SETUP_DELAY + n as f64 * DIST_EPR_DELAY,
            1.0,
        );
        sim.stop_at(1.0);
        sim.run().unwrap();
        let (a, b) = end_pair(n);
        sim.entity.calculate_fidelity((&a, &b)).unwrap()
    };
    let run_local = {
        let mut sim = setup_chain(n, 19);
        let (former, latter) = chain_memories(n);
        let last = format!("Owner{}", n - 1);
        install_ent_swap_adapt_local(
            &mut sim,
            &last,
            former,
            latter,
            SETUP_DELAY + n as f64 * DIST_EPR_DELAY,
            1.0,
        );
        sim.stop_at(1.0);
        sim.run().unwrap();
        let (a, b) = end_pair(n);
        sim.entity.calculate_fidelity((&a, &b)).unwrap()
    };
    // Both coherent schedules realize the same channel composition.
    assert!(
        (run_flagged - run_local).abs() < 5e-3,
        "flagged {run_flagged} vs local {run_local}"
    );
}

#[test_log::test]
fn classic_chain_trace_stays_one() {
    let n = 4;
    let mut sim = setup_chain(n, 23);
    let owners = owner_names(n);
    let last = owners[n - 1].clone();
    for rank in 1..n - 1 {
        let conn = QuantumChannel::new(owners[rank].clone(), last.clone());
        install_ent_swap_src(
            &mut sim,
            &conn,
            (
                format!("Owner{rank}_Qubit0"),
                format!("Owner{rank}_Qubit1"),
            ),
            TELEP_DELAY * rank as f64,
            TELEP_DELAY * (rank + 1) as f64,
        )
        .unwrap();
    }
    install_ent_swap_dst(
        &mut sim,
        &last,
        format!("Owner{}_Qubit0", n - 1),
        n - 2,
        SETUP_DELAY,
        TELEP_DELAY * (n - 1) as f64,
    );
    sim.stop_at(TELEP_DELAY * (n - 1) as f64);
    sim.run().unwrap();

    let (a, b) = end_pair(n);
    let dm = sim.entity.peek_dm(&Actor::System, &[a, b]).unwrap();
    let trace: Complex64 = dm[0] + dm[5] + dm[10] + dm[15];
    assert!((trace.re - 1.0).abs() < 5e-3);
}
