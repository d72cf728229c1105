//! # Error Models - Mixed-Unitary Noise Channels
//!
//! Noise is modeled exclusively as mixed-unitary operations, which keeps the
//! density-matrix representation closed and avoids branching the simulation
//! tree. Three model kinds exist, dispatched through one tagged enum:
//!
//! - **Time dephasing** `TimeDephase(T)`: on touch, a qubit idle for Δ
//!   receives {I: 1−p, Z: p} with p = (1 − exp(−Δ/T))/2.
//! - **Per-gate dephasing** `GateDephase(r)`: every noisy gate costs a
//!   fixed duration D of dephasing at rate r, p = (1 − exp(−D/r))/2.
//! - **Per-channel depolarization** `ChannelDepolar(F)`: EPR distribution
//!   applies {I: F, X: (1−F)/3, Y: (1−F)/3, Z: (1−F)/3} to the destination
//!   qubit.
//!
//! Models are installed into the physical entity and applied from its
//! mutation methods, never directly by protocols.

use std::fmt;
use tracing::{debug, warn};

use crate::basis::{gate_name, EPS, GATE_DURATION, PAULI_I, PAULI_X, PAULI_Y, PAULI_Z};
use crate::operation::QuantumOperation;
use crate::phy_entity::QuantumPhyEntity;
use crate::Result;

/// Default time-dephasing constant for qubits without an explicit binding.
pub const DEFAULT_TIME_RATE: f64 = 1.0;

/// Default per-gate dephasing rate.
pub const DEFAULT_GATE_RATE: f64 = 1.0;

/// Default channel fidelity when no depolarization binding exists.
pub const DEFAULT_DEPOLAR_FIDELITY: f64 = 0.95;

/// A noise channel, tagged by kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorModel {
    /// Dephasing accumulated over idle time, with time constant `T`.
    TimeDephase { rate: f64 },
    /// Fixed-duration dephasing charged per gate, with rate `r`.
    GateDephase { rate: f64 },
    /// Depolarization toward target fidelity `F` on a distributed qubit.
    ChannelDepolar { fidelity: f64 },
}

impl fmt::Display for ErrorModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimeDephase { rate } => write!(f, "TimeDephase(T={rate})"),
            Self::GateDephase { rate } => write!(f, "GateDephase(r={rate})"),
            Self::ChannelDepolar { fidelity } => write!(f, "ChannelDepolar(F={fidelity})"),
        }
    }
}

impl ErrorModel {
    /// Whether the model depends on elapsed virtual time.
    #[must_use]
    pub fn time_dependent(&self) -> bool {
        matches!(self, Self::TimeDephase { .. })
    }

    /// The channel fidelity of a depolarization model.
    #[must_use]
    pub fn fidelity(&self) -> Option<f64> {
        match self {
            Self::ChannelDepolar { fidelity } => Some(*fidelity),
            _ => None,
        }
    }

    /// Apply the model to the given qubits at the given moment.
    ///
    /// For `TimeDephase` the moment is compared against each qubit's
    /// last-touched time: negative elapses warn and skip, near-zero elapses
    /// skip silently. `GateDephase` and `ChannelDepolar` are
    /// time-independent in strength but still stamp the operand clocks.
    ///
    /// # Errors
    ///
    /// Propagates fatal engine errors from the underlying operation.
    pub fn apply(
        &self,
        entity: &mut QuantumPhyEntity,
        qubits: &[String],
        moment: f64,
    ) -> Result<()> {
        match self {
            Self::TimeDephase { rate } => {
                for qubit in qubits {
                    let Some(touched) = entity.last_touched(qubit) else {
                        continue;
                    };
                    let duration = moment - touched;
                    if duration < 0.0 {
                        warn!("negative idle time {duration} on {qubit}, skip");
                        continue;
                    }
                    if duration.abs() < EPS {
                        continue;
                    }
                    let prob = (1.0 - (-duration / rate).exp()) / 2.0;
                    let dephase = QuantumOperation::new(
                        vec![gate_name("I"), gate_name("PZ")],
                        vec![PAULI_I.clone(), PAULI_Z.clone()],
                        vec![1.0 - prob, prob],
                    )?;
                    debug!(
                        "at {moment:.6}s qubit {qubit} dephases with prob {prob:.6} \
                         (idle {duration:.6}s, T = {rate})"
                    );
                    entity.apply_operation(&dephase, std::slice::from_ref(qubit), Some(moment))?;
                }
                Ok(())
            }
            Self::GateDephase { rate } => {
                for qubit in qubits {
                    let prob = (1.0 - (-GATE_DURATION / rate).exp()) / 2.0;
                    let dephase = QuantumOperation::new(
                        vec![gate_name("I"), gate_name("PZ")],
                        vec![PAULI_I.clone(), PAULI_Z.clone()],
                        vec![1.0 - prob, prob],
                    )?;
                    debug!(
                        "at {moment:.6}s qubit {qubit} takes gate dephasing with prob {prob:.6} \
                         (r = {rate})"
                    );
                    entity.apply_operation(&dephase, std::slice::from_ref(qubit), Some(moment))?;
                }
                Ok(())
            }
            Self::ChannelDepolar { fidelity } => {
                // Applied to the destination half of a freshly distributed pair.
                let leak = (1.0 - fidelity) / 3.0;
                let depolar = QuantumOperation::new(
                    vec![
                        gate_name("I"),
                        gate_name("PX"),
                        gate_name("PY"),
                        gate_name("PZ"),
                    ],
                    vec![
                        PAULI_I.clone(),
                        PAULI_X.clone(),
                        PAULI_Y.clone(),
                        PAULI_Z.clone(),
                    ],
                    vec![*fidelity, leak, leak, leak],
                )?;
                for qubit in qubits {
                    debug!("qubit {qubit} depolarizes toward fidelity {fidelity}");
                    entity.apply_operation(&depolar, std::slice::from_ref(qubit), Some(moment))?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_kind() {
        assert_eq!(
            ErrorModel::TimeDephase { rate: 2.0 }.to_string(),
            "TimeDephase(T=2)"
        );
        assert_eq!(
            ErrorModel::ChannelDepolar { fidelity: 0.95 }.to_string(),
            "ChannelDepolar(F=0.95)"
        );
    }

    #[test]
    fn only_time_models_are_time_dependent() {
        assert!(ErrorModel::TimeDephase { rate: 1.0 }.time_dependent());
        assert!(!ErrorModel::GateDephase { rate: 1.0 }.time_dependent());
        assert!(!ErrorModel::ChannelDepolar { fidelity: 0.9 }.time_dependent());
    }
}
