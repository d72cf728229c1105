//! # Quantum Basis - Reserved Names, Constants and Canonical Gate Data
//!
//! Shared vocabulary of the simulator: the reserved `QNS_` name space handed
//! to the tensor layer, the timing constants that pace protocol schedules,
//! the numerical epsilon, and the frozen matrix data of the canonical gates.
//!
//! All matrix constants are written row-major with the basis index
//! little-endian in the qubit argument list (the first qubit of a gate call
//! is the least significant bit). The tensor layer stores data column-major,
//! which is what makes "the i-th qubit binds to input leg i" hold; see
//! [`crate::tensor`] for the layout contract.

use num_complex::Complex64;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Threshold under which a float is treated as zero.
pub const EPS: f64 = 1e-6;

/// A virtual-time horizon longer than any experiment (seconds).
pub const ETERNITY: f64 = 1024.0;

/// Field delimiter of every classical payload.
pub const DELIM: char = '.';

/// Duration over which a default gate error is modeled as dephasing (seconds).
pub const GATE_DURATION: f64 = 2e-4;

/// Default one-way delay of the classical link (seconds; 0.1 ms).
pub const CLASSICAL_DELAY: f64 = 0.1e-3;

/// Pacing delay between a protocol's local operation rounds (seconds).
pub const LOCAL_OP_DELAY: f64 = 0.1;

/// Delay budgeted for one teleportation hop (seconds).
pub const TELEP_DELAY: f64 = 0.5;

/// Delay budgeted for one EPR distribution (seconds).
pub const DIST_EPR_DELAY: f64 = 0.005;

/// Delay budgeted for topology setup before protocols start (seconds).
pub const SETUP_DELAY: f64 = 0.1;

/// Prefix of every name the simulator passes to the tensor layer.
///
/// User qubit names must not start with this prefix, so that internally
/// generated tensors, gates and ancillas can never collide with them.
pub const QNS_PREFIX: &str = "QNS_";

/// Prefix of canonical and user gate tensors.
pub const QNS_GATE_PREFIX: &str = "QNS_GATE_";

/// Prefix of EPR pair bookkeeping names.
pub const QNS_EPR_PREFIX: &str = "QNS_EPR";

/// Prefix of protocol-allocated ancilla qubits.
pub const QNS_ANCILLA_PREFIX: &str = "QNS_ANCILLA";

/// Prefix of internally allocated tensor names.
pub const QNS_EXATN_PREFIX: &str = "QNS_EXATN";

/// Registry key of the EPR distribution protocol on a channel.
pub const APP_DIST_EPR: &str = "QNS_dist_epr";

/// Registry key of the teleportation protocol on a channel.
pub const APP_TELEP: &str = "QNS_telep";

/// Registry key of the one-shot distillation protocol on a channel.
pub const APP_DISTILL: &str = "QNS_distill";

/// Registry key of the nested distillation protocol on a channel.
pub const APP_DISTILL_NESTED: &str = "QNS_distill_nested";

/// Full canonical name of a gate, e.g. `gate_name("CNOT")` = `QNS_GATE_CNOT`.
#[must_use]
pub fn gate_name(short: &str) -> String {
    format!("{QNS_GATE_PREFIX}{short}")
}

#[inline]
const fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

const FRAC_1_SQRT_2: f64 = std::f64::consts::FRAC_1_SQRT_2;

/// State vector of |0⟩.
pub static KET_0: Lazy<Vec<Complex64>> = Lazy::new(|| vec![c(1.0, 0.0), c(0.0, 0.0)]);

/// State vector of |1⟩.
pub static KET_1: Lazy<Vec<Complex64>> = Lazy::new(|| vec![c(0.0, 0.0), c(1.0, 0.0)]);

/// State vector of the Bell state |Φ⁺⟩ = (|00⟩ + |11⟩)/√2.
pub static BELL: Lazy<Vec<Complex64>> = Lazy::new(|| {
    vec![
        c(FRAC_1_SQRT_2, 0.0),
        c(0.0, 0.0),
        c(0.0, 0.0),
        c(FRAC_1_SQRT_2, 0.0),
    ]
});

/// Pauli I.
pub static PAULI_I: Lazy<Vec<Complex64>> =
    Lazy::new(|| vec![c(1.0, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(1.0, 0.0)]);

/// Pauli X.
pub static PAULI_X: Lazy<Vec<Complex64>> =
    Lazy::new(|| vec![c(0.0, 0.0), c(1.0, 0.0), c(1.0, 0.0), c(0.0, 0.0)]);

/// Pauli Y.
pub static PAULI_Y: Lazy<Vec<Complex64>> =
    Lazy::new(|| vec![c(0.0, 0.0), c(0.0, -1.0), c(0.0, 1.0), c(0.0, 0.0)]);

/// Pauli Z.
pub static PAULI_Z: Lazy<Vec<Complex64>> =
    Lazy::new(|| vec![c(1.0, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(-1.0, 0.0)]);

/// Projector |0⟩⟨0|.
pub static MEAS_0: Lazy<Vec<Complex64>> =
    Lazy::new(|| vec![c(1.0, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(0.0, 0.0)]);

/// Projector |1⟩⟨1|.
pub static MEAS_1: Lazy<Vec<Complex64>> =
    Lazy::new(|| vec![c(0.0, 0.0), c(0.0, 0.0), c(0.0, 0.0), c(1.0, 0.0)]);

/// Hadamard.
pub static HADAMARD: Lazy<Vec<Complex64>> = Lazy::new(|| {
    vec![
        c(FRAC_1_SQRT_2, 0.0),
        c(FRAC_1_SQRT_2, 0.0),
        c(FRAC_1_SQRT_2, 0.0),
        c(-FRAC_1_SQRT_2, 0.0),
    ]
});

/// Controlled-NOT. The control is the *second* qubit of the gate call under
/// the little-endian basis convention; protocol code relies on this.
pub static CNOT: Lazy<Vec<Complex64>> = Lazy::new(|| {
    let mut m = vec![c(0.0, 0.0); 16];
    m[0] = c(1.0, 0.0); // |00⟩ → |00⟩
    m[4 + 1] = c(1.0, 0.0); // |01⟩ → |01⟩
    m[2 * 4 + 3] = c(1.0, 0.0); // |10⟩ → |11⟩
    m[3 * 4 + 2] = c(1.0, 0.0); // |11⟩ → |10⟩
    m
});

/// Toffoli: flips the first qubit when both control qubits are 1.
pub static TOFFOLI: Lazy<Vec<Complex64>> = Lazy::new(|| {
    let mut m = vec![c(0.0, 0.0); 64];
    for row in 0..8usize {
        let col = if row & 0b110 == 0b110 { row ^ 1 } else { row };
        m[row * 8 + col] = c(1.0, 0.0);
    }
    m
});

/// Quantum OR: XORs the disjunction of the two latter qubits into the first.
pub static QOR: Lazy<Vec<Complex64>> = Lazy::new(|| {
    let mut m = vec![c(0.0, 0.0); 64];
    for row in 0..8usize {
        let col = if row & 0b110 != 0 { row ^ 1 } else { row };
        m[row * 8 + col] = c(1.0, 0.0);
    }
    m
});

/// SWAP.
pub static SWAP: Lazy<Vec<Complex64>> = Lazy::new(|| {
    let mut m = vec![c(0.0, 0.0); 16];
    m[0] = c(1.0, 0.0);
    m[4 + 2] = c(1.0, 0.0);
    m[2 * 4 + 1] = c(1.0, 0.0);
    m[3 * 4 + 3] = c(1.0, 0.0);
    m
});

/// Controlled-Z.
pub static CZ: Lazy<Vec<Complex64>> = Lazy::new(|| {
    let mut m = vec![c(0.0, 0.0); 16];
    m[0] = c(1.0, 0.0);
    m[4 + 1] = c(1.0, 0.0);
    m[2 * 4 + 2] = c(1.0, 0.0);
    m[3 * 4 + 3] = c(-1.0, 0.0);
    m
});

/// Map from a canonical gate name to its frozen data.
///
/// If a gate name is in this map, any data the user supplies for it is
/// ignored.
pub static GATE_DATA: Lazy<HashMap<String, &'static Lazy<Vec<Complex64>>>> = Lazy::new(|| {
    let mut m: HashMap<String, &'static Lazy<Vec<Complex64>>> = HashMap::new();
    m.insert(gate_name("I"), &PAULI_I);
    m.insert(gate_name("PX"), &PAULI_X);
    m.insert(gate_name("PY"), &PAULI_Y);
    m.insert(gate_name("PZ"), &PAULI_Z);
    m.insert(gate_name("H"), &HADAMARD);
    m.insert(gate_name("CNOT"), &CNOT);
    m.insert(gate_name("TOFF"), &TOFFOLI);
    m.insert(gate_name("QOR"), &QOR);
    m.insert(gate_name("SWAP"), &SWAP);
    m.insert(gate_name("CZ"), &CZ);
    m
});

/// Data of a canonical gate, or `None` for user-defined names.
#[must_use]
pub fn canonical_gate_data(name: &str) -> Option<&'static [Complex64]> {
    GATE_DATA.get(name).map(|data| data.as_slice())
}

/// log₂ of a power-of-two size.
#[must_use]
pub fn log2(size: usize) -> usize {
    debug_assert!(size.is_power_of_two(), "size {size} is not a power of two");
    size.trailing_zeros() as usize
}

/// First half of a qubit name list.
#[must_use]
pub fn pre_half(qubits: &[String]) -> Vec<String> {
    qubits[..qubits.len() / 2].to_vec()
}

/// Second half of a qubit name list.
#[must_use]
pub fn suf_half(qubits: &[String]) -> Vec<String> {
    qubits[qubits.len() / 2..].to_vec()
}

/// Scale a complex vector by a real factor.
#[must_use]
pub fn scale(factor: f64, data: &[Complex64]) -> Vec<Complex64> {
    data.iter().map(|v| v * factor).collect()
}

/// Approximate complex equality within [`EPS`].
#[must_use]
pub fn approx_eq(a: Complex64, b: Complex64) -> bool {
    (a - b).norm() < EPS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_resolve() {
        for short in ["I", "PX", "PY", "PZ", "H", "CNOT", "TOFF", "QOR", "SWAP", "CZ"] {
            assert!(canonical_gate_data(&gate_name(short)).is_some());
        }
        assert!(canonical_gate_data("QNS_GATE_NOPE").is_none());
    }

    #[test]
    fn gates_are_permutation_matrices_where_expected() {
        for data in [&CNOT, &TOFFOLI, &QOR, &SWAP] {
            let dim = (data.len() as f64).sqrt() as usize;
            for row in 0..dim {
                let ones = (0..dim)
                    .filter(|&col| approx_eq(data[row * dim + col], Complex64::new(1.0, 0.0)))
                    .count();
                assert_eq!(ones, 1, "row {row} must have exactly one unit entry");
            }
        }
    }

    #[test]
    fn cnot_controls_on_second_qubit() {
        // Basis index 2 = (q0=0, q1=1): control set, so q0 flips to index 3.
        assert!(approx_eq(CNOT[2 * 4 + 3], Complex64::new(1.0, 0.0)));
        // Basis index 1 = (q0=1, q1=0): control clear, identity action.
        assert!(approx_eq(CNOT[4 + 1], Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn toffoli_flips_target_on_double_control() {
        assert!(approx_eq(TOFFOLI[6 * 8 + 7], Complex64::new(1.0, 0.0)));
        assert!(approx_eq(TOFFOLI[7 * 8 + 6], Complex64::new(1.0, 0.0)));
        assert!(approx_eq(TOFFOLI[5 * 8 + 5], Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn bell_state_is_normalized() {
        let norm: f64 = BELL.iter().map(|a| a.norm_sqr()).sum();
        assert!((norm - 1.0).abs() < EPS);
    }

    #[test]
    fn half_splits() {
        let qs: Vec<String> = (0..4).map(|i| format!("q{i}")).collect();
        assert_eq!(pre_half(&qs), vec!["q0".to_string(), "q1".to_string()]);
        assert_eq!(suf_half(&qs), vec!["q2".to_string(), "q3".to_string()]);
    }
}
