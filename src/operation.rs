//! Mixed-unitary quantum operations (channels).
//!
//! An operation is an ordered list of named unitary factors `Uᵢ` with
//! probabilities `pᵢ` summing to one. The factors are stored pre-scaled by
//! √pᵢ, so that contracting the operation tensor on both halves of the
//! density-matrix circuit through a shared selector leg realizes
//! ρ ↦ Σᵢ pᵢ Uᵢ ρ Uᵢ†.

use num_complex::Complex64;

use crate::basis::{scale, EPS};
use crate::{NetSimError, Result};

/// A probabilistic mixture of unitaries, applied as a single channel.
#[derive(Debug, Clone)]
pub struct QuantumOperation {
    names: Vec<String>,
    factors: Vec<Vec<Complex64>>,
    probs: Vec<f64>,
}

impl QuantumOperation {
    /// Build an operation from factor names, unitary data and probabilities.
    ///
    /// # Errors
    ///
    /// Fatal when the three lists disagree in length or the probabilities do
    /// not sum to one within epsilon.
    pub fn new(
        names: Vec<String>,
        unitaries: Vec<Vec<Complex64>>,
        probs: Vec<f64>,
    ) -> Result<Self> {
        if names.len() != unitaries.len() || unitaries.len() != probs.len() {
            return Err(NetSimError::InvariantViolation(format!(
                "operation with {} names, {} unitaries, {} probabilities",
                names.len(),
                unitaries.len(),
                probs.len()
            )));
        }
        let total: f64 = probs.iter().sum();
        if (total - 1.0).abs() > EPS {
            return Err(NetSimError::InvariantViolation(format!(
                "operation probabilities sum to {total}"
            )));
        }
        let factors = unitaries
            .iter()
            .zip(&probs)
            .map(|(u, &p)| scale(p.sqrt(), u))
            .collect();
        Ok(Self {
            names,
            factors,
            probs,
        })
    }

    /// Name of the i-th factor.
    #[must_use]
    pub fn name(&self, idx: usize) -> &str {
        &self.names[idx]
    }

    /// The √pᵢ-scaled factor data, in order.
    #[must_use]
    pub fn factors(&self) -> &[Vec<Complex64>] {
        &self.factors
    }

    /// Probability of the i-th factor.
    #[must_use]
    pub fn prob(&self, idx: usize) -> f64 {
        self.probs[idx]
    }

    /// Number of factors (the selector-leg extent).
    #[must_use]
    pub fn len(&self) -> usize {
        self.factors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{approx_eq, PAULI_I, PAULI_Z};

    #[test]
    fn factors_are_sqrt_prob_scaled() {
        let op = QuantumOperation::new(
            vec!["I".into(), "PZ".into()],
            vec![PAULI_I.clone(), PAULI_Z.clone()],
            vec![0.75, 0.25],
        )
        .unwrap();
        assert_eq!(op.len(), 2);
        assert!(approx_eq(
            op.factors()[0][0],
            Complex64::new(0.75f64.sqrt(), 0.0)
        ));
        assert!(approx_eq(op.factors()[1][0], Complex64::new(0.5, 0.0)));
        assert!(approx_eq(op.factors()[1][3], Complex64::new(-0.5, 0.0)));
    }

    #[test]
    fn probabilities_must_sum_to_one() {
        let err = QuantumOperation::new(
            vec!["I".into()],
            vec![PAULI_I.clone()],
            vec![0.9],
        )
        .unwrap_err();
        assert!(matches!(err, NetSimError::InvariantViolation(_)));
    }
}
