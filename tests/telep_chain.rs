//! Chained adaptive teleportation: the input state survives the pipeline.

use num_complex::Complex64;

use quantum_netsim::apps::{Qubit, TelepLinAdaptApp};
use quantum_netsim::basis::{ETERNITY, SETUP_DELAY};
use quantum_netsim::channel::QuantumChannel;
use quantum_netsim::kernel::{Simulation, SimulationConfig};
use quantum_netsim::phy_entity::QuantumPhyEntity;
use quantum_netsim::stack::{
    assign_addresses, install_telep_lin_adapt_chain, QuantumNetStackHelper,
};

fn input_state() -> Vec<Complex64> {
    vec![
        Complex64::new((5.0f64 / 7.0).sqrt(), 0.0),
        Complex64::new(0.0, (2.0f64 / 7.0).sqrt()),
    ]
}

fn run_chain(n: usize, link_fidelity: f64) -> Vec<Complex64> {
    let owners: Vec<String> = (0..n).map(|i| format!("Owner{i}")).collect();
    let refs: Vec<&str> = owners.iter().map(String::as_str).collect();
    let mut entity = QuantumPhyEntity::with_seed(&refs, 31);
    for owner in &owners {
        entity.set_time_model(owner, 1e9);
    }
    assign_addresses(&mut entity);
    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim).unwrap();

    let eprs: Vec<(String, String)> = (0..n - 1)
        .map(|rank| {
            let conn = QuantumChannel::new(owners[rank].clone(), owners[rank + 1].clone());
            conn.set_depolar_model(link_fidelity, &mut sim.entity);
            (
                format!("Owner{rank}_Qubit1"),
                format!("Owner{}_Qubit0", rank + 1),
            )
        })
        .collect();

    let ids = install_telep_lin_adapt_chain(
        &mut sim,
        &owners,
        &eprs,
        Qubit::new(input_state(), "PSI"),
        SETUP_DELAY,
        ETERNITY,
    )
    .unwrap();

    sim.stop_at(ETERNITY);
    sim.run().unwrap();

    sim.app_as::<TelepLinAdaptApp>(*ids.last().unwrap())
        .unwrap()
        .output()
        .to_vec()
}

#[test_log::test]
fn noiseless_chain_delivers_the_input_state() {
    let output = run_chain(3, 1.0);
    assert_eq!(output.len(), 4);
    let input = input_state();
    assert!((output[0].re - input[0].norm_sqr()).abs() < 5e-3);
    assert!((output[3].re - input[1].norm_sqr()).abs() < 5e-3);
    let trace = output[0] + output[3];
    assert!((trace.re - 1.0).abs() < 5e-3);
    assert!(trace.im.abs() < 5e-3);
}

#[test_log::test]
fn longer_chains_still_deliver_the_populations() {
    let output = run_chain(4, 1.0);
    let input = input_state();
    assert!((output[0].re - input[0].norm_sqr()).abs() < 5e-3);
    assert!((output[3].re - input[1].norm_sqr()).abs() < 5e-3);
}

#[test_log::test]
fn noisy_links_mix_the_delivered_state() {
    let clean = run_chain(3, 1.0);
    let noisy = run_chain(3, 0.9);
    // Depolarized links push the populations toward the maximally mixed
    // state; the ground population shrinks, the trace stays one.
    assert!(noisy[0].re < clean[0].re);
    let trace = noisy[0] + noisy[3];
    assert!((trace.re - 1.0).abs() < 5e-3);
}

#[test_log::test]
fn only_the_final_carrier_survives_the_chain() {
    let owners: Vec<String> = (0..3).map(|i| format!("Owner{i}")).collect();
    let refs: Vec<&str> = owners.iter().map(String::as_str).collect();
    let mut entity = QuantumPhyEntity::new(&refs);
    for owner in &owners {
        entity.set_time_model(owner, 1e9);
    }
    assign_addresses(&mut entity);
    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim).unwrap();

    let eprs: Vec<(String, String)> = (0..2)
        .map(|rank| {
            (
                format!("Owner{rank}_Qubit1"),
                format!("Owner{}_Qubit0", rank + 1),
            )
        })
        .collect();
    install_telep_lin_adapt_chain(
        &mut sim,
        &owners,
        &eprs,
        Qubit::new(input_state(), "PSI"),
        SETUP_DELAY,
        ETERNITY,
    )
    .unwrap();
    sim.stop_at(ETERNITY);
    sim.run().unwrap();

    // Every predecessor qubit was traced out along the way.
    let live = sim.entity.engine().valid_qubits().to_vec();
    assert_eq!(live, vec!["Owner2_Qubit0".to_string()]);
}
