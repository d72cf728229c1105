//! Two-owner EPR distribution, end to end through the kernel.

use num_complex::Complex64;

use quantum_netsim::apps::AppSignal;
use quantum_netsim::basis::{approx_eq, APP_DIST_EPR, SETUP_DELAY};
use quantum_netsim::channel::QuantumChannel;
use quantum_netsim::kernel::{SimEvent, Simulation, SimulationConfig};
use quantum_netsim::phy_entity::{Actor, QuantumPhyEntity};
use quantum_netsim::stack::{assign_addresses, QuantumNetStackHelper};

fn setup() -> Simulation {
    let mut entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
    assign_addresses(&mut entity);
    let mut sim = Simulation::new(entity, &SimulationConfig::default());
    QuantumNetStackHelper::new().install(&mut sim).unwrap();
    sim
}

fn distribute(sim: &mut Simulation, conn: &QuantumChannel, epr: (&str, &str)) {
    let (epr_src, _) = sim.entity.conn_apps(conn, APP_DIST_EPR).unwrap();
    sim.schedule_at(
        SETUP_DELAY,
        SimEvent::AppSignal(
            epr_src,
            AppSignal::DistributeEpr {
                epr: (epr.0.to_string(), epr.1.to_string()),
            },
        ),
    );
}

#[test_log::test]
fn noiseless_distribution_yields_the_bell_matrix() {
    let mut sim = setup();
    let conn = QuantumChannel::new("Alice", "Bob");
    conn.set_depolar_model(1.0, &mut sim.entity);
    distribute(&mut sim, &conn, ("A0", "B0"));

    sim.stop_at(1.0);
    sim.run().unwrap();

    let dm = sim
        .entity
        .peek_dm(&Actor::System, &["A0".to_string(), "B0".to_string()])
        .unwrap();
    // 0.5 on the (00,00) and (11,11) diagonal and the (00,11)/(11,00)
    // coherences, zero elsewhere.
    let half = Complex64::new(0.5, 0.0);
    let zero = Complex64::new(0.0, 0.0);
    for (idx, value) in dm.iter().enumerate() {
        let expected = match idx {
            0 | 3 | 12 | 15 => half,
            _ => zero,
        };
        assert!(
            (value - expected).norm() < 5e-3,
            "entry {idx}: {value} vs {expected}"
        );
    }

    let fidelity = sim.entity.calculate_fidelity(("A0", "B0")).unwrap();
    assert!((fidelity - 1.0).abs() < 5e-3);
}

#[test_log::test]
fn distribution_moves_the_qubit_between_memories() {
    let mut sim = setup();
    let conn = QuantumChannel::new("Alice", "Bob");
    conn.set_depolar_model(1.0, &mut sim.entity);
    distribute(&mut sim, &conn, ("A0", "B0"));

    sim.stop_at(1.0);
    sim.run().unwrap();

    assert!(sim.entity.node("Alice").own_qubit("A0"));
    assert!(!sim.entity.node("Alice").own_qubit("B0"));
    assert!(sim.entity.node("Bob").own_qubit("B0"));
}

#[test_log::test]
fn depolarization_degrades_the_coherences() {
    let mut sim = setup();
    let conn = QuantumChannel::new("Alice", "Bob");
    conn.set_depolar_model(0.9, &mut sim.entity);
    distribute(&mut sim, &conn, ("A0", "B0"));

    sim.stop_at(1.0);
    sim.run().unwrap();

    let fidelity = sim.entity.calculate_fidelity(("A0", "B0")).unwrap();
    // {I: F, X/Y/Z: (1-F)/3} leaves the Bell overlap at F + small leakage.
    assert!(fidelity < 1.0 - 5e-3);
    assert!(fidelity > 0.85);

    let dm = sim
        .entity
        .peek_dm(&Actor::System, &["A0".to_string(), "B0".to_string()])
        .unwrap();
    let trace = dm[0] + dm[5] + dm[10] + dm[15];
    assert!(approx_eq(trace, Complex64::new(1.0, 0.0)));
}

#[test_log::test]
fn unbound_channels_fall_back_to_the_default_fidelity() {
    let mut sim = setup();
    let conn = QuantumChannel::new("Alice", "Bob");
    // No binding: the 0.95 default applies.
    distribute(&mut sim, &conn, ("A0", "B0"));

    sim.stop_at(1.0);
    sim.run().unwrap();

    let fidelity = sim.entity.calculate_fidelity(("A0", "B0")).unwrap();
    assert!(fidelity < 1.0 - 5e-3);
    assert!((fidelity - 0.95).abs() < 0.02);
}
