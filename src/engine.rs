//! # Quantum State Engine - Density-Matrix Circuit
//!
//! The engine wraps a [`TensorNetwork`] as an incrementally built
//! density-matrix circuit over a dynamically growing set of named qubits.
//!
//! ## 🔬 Ket half / bra half
//!
//! Every operation appends tensors to two structural sides: the ket side
//! (placements appended as-is) and the bra side (placements appended with
//! the conjugated flag, so Hermiticity of ρ is structural rather than
//! numerical). For every live qubit the engine tracks exactly two open legs:
//!
//! - `qubit → (ket tensor id, leg index)`: the ket map,
//! - `qubit → (bra tensor id, leg index)`: the bra map.
//!
//! These maps are the hot path: every gate, operation, measurement, trace
//! and peek resolves its wires through them, and every mutation rewrites
//! them to the freshly appended output legs.
//!
//! ## Command surface
//!
//! Generate pure/mixed qubits, apply gate, apply operation (mixed-unitary
//! channel with a selector leg spanning both halves), apply controlled
//! operation (the deferred-measurement reduction used by the adaptive
//! protocols), measure (probability from a throwaway projector network,
//! outcome sampled from the seeded RNG, state updated by a scaled projector),
//! peek density matrix, partial trace, contract, and Bell-state fidelity.
//!
//! Recoverable refusals (stale qubits) return `Ok(false)` and log at the
//! logic level; structural violations are fatal.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use quantum_netsim::basis::BELL;
//! use quantum_netsim::engine::QuantumNetworkSimulator;
//!
//! fn main() -> quantum_netsim::Result<()> {
//!     let mut engine = QuantumNetworkSimulator::new(7);
//!     let qubits = vec!["a".to_string(), "b".to_string()];
//!     engine.generate_qubits_pure("Alice", &BELL, &qubits)?;
//!
//!     let (outcome, dist) = engine.measure("Alice", "a")?;
//!     println!("measured {outcome} with distribution {dist:?}");
//!
//!     let fidelity = engine.calculate_fidelity(("a", "b"))?;
//!     println!("Bell fidelity after collapse: {fidelity}");
//!     Ok(())
//! }
//! ```

use num_complex::Complex64;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::basis::{
    gate_name, log2, scale, BELL, EPS, MEAS_0, MEAS_1, QNS_EXATN_PREFIX, QNS_PREFIX,
};
use crate::operation::QuantumOperation;
use crate::tensor::{ContractionOrder, LegDirection, LegRef, TensorNetwork, TensorStore};
use crate::{NetSimError, Result};
use std::collections::HashMap;

const OUT: LegDirection = LegDirection::Outward;
const IN: LegDirection = LegDirection::Inward;

/// Tensor-network simulator of one shared quantum state.
#[derive(Debug)]
pub struct QuantumNetworkSimulator {
    dm: TensorNetwork,
    dm_id: usize,
    qubits_all: Vec<String>,
    qubits_vld: Vec<String>,
    qubit2leg: HashMap<String, LegRef>,
    qubit2leg_dag: HashMap<String, LegRef>,
    store: TensorStore,
    name_count: u64,
    optimizer: ContractionOrder,
    rng: ChaCha8Rng,
}

impl QuantumNetworkSimulator {
    /// Create an engine with a fixed RNG seed for measurement sampling.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        let mut engine = Self {
            dm: TensorNetwork::default(),
            dm_id: 1,
            qubits_all: Vec::new(),
            qubits_vld: Vec::new(),
            qubit2leg: HashMap::new(),
            qubit2leg_dag: HashMap::new(),
            store: TensorStore::new(),
            name_count: 0,
            optimizer: ContractionOrder::Greed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        let name = engine.alloc_name();
        engine.dm.rename(name);
        engine
    }

    fn alloc_name(&mut self) -> String {
        let name = format!("{QNS_EXATN_PREFIX}{}", self.name_count);
        self.name_count += 1;
        name
    }

    /// The live density-matrix network (diagnostics and invariant tests).
    #[must_use]
    pub fn network(&self) -> &TensorNetwork {
        &self.dm
    }

    /// The tensor store backing this engine.
    #[must_use]
    pub fn store(&self) -> &TensorStore {
        &self.store
    }

    /// Every qubit ever generated, in generation order.
    #[must_use]
    pub fn all_qubits(&self) -> &[String] {
        &self.qubits_all
    }

    /// Qubits that are live (generated and not traced out).
    #[must_use]
    pub fn valid_qubits(&self) -> &[String] {
        &self.qubits_vld
    }

    /// Current ket-side open leg of a qubit.
    #[must_use]
    pub fn ket_leg(&self, qubit: &str) -> Option<LegRef> {
        self.qubit2leg.get(qubit).copied()
    }

    /// Current bra-side open leg of a qubit.
    #[must_use]
    pub fn bra_leg(&self, qubit: &str) -> Option<LegRef> {
        self.qubit2leg_dag.get(qubit).copied()
    }

    /// Extent of a network leg (invariant checks).
    #[must_use]
    pub fn leg_extent(&self, leg: LegRef) -> Option<usize> {
        self.dm
            .placement(leg.0)
            .and_then(|p| p.tensor().extents().get(leg.1).copied())
    }

    /// Whether every named qubit is live. Logs the first stale name at the
    /// logic level.
    #[must_use]
    pub fn check_valid(&self, qubits: &[String]) -> bool {
        for qubit in qubits {
            if !self.qubits_vld.iter().any(|q| q == qubit) {
                debug!("skipping invalid qubit named {qubit}");
                return false;
            }
        }
        true
    }

    /// Generate named qubits in a pure state.
    ///
    /// The state tensor is appended twice: once on the ket side with all
    /// legs outward, once conjugated on the bra side with all legs inward.
    ///
    /// # Errors
    ///
    /// Fatal when a name was already generated (double generation) or the
    /// state length does not match the qubit count.
    pub fn generate_qubits_pure(
        &mut self,
        owner: &str,
        data: &[Complex64],
        qubits: &[String],
    ) -> Result<bool> {
        let name = self.alloc_name();
        let tensor = self.store.prepare_pure(&name, data)?;
        info!("{owner} generates qubit(s) named {qubits:?}");

        let height = log2(data.len());
        if height != qubits.len() {
            return Err(NetSimError::InvariantViolation(format!(
                "state vector of {height} qubit(s) generated for {} name(s)",
                qubits.len()
            )));
        }
        for qubit in qubits {
            if self.qubits_all.iter().any(|q| q == qubit) {
                return Err(NetSimError::DuplicateQubit(qubit.clone()));
            }
        }

        // Onto the ket half.
        let ket_id = self.dm_id;
        self.dm_id += 1;
        self.dm
            .append_tensor(ket_id, tensor.clone(), &[], &vec![OUT; height], false)?;

        // Onto the bra half.
        let bra_id = self.dm_id;
        self.dm_id += 1;
        self.dm
            .append_tensor(bra_id, tensor, &[], &vec![IN; height], true)?;

        for (i, qubit) in qubits.iter().enumerate() {
            self.qubits_all.push(qubit.clone());
            self.qubits_vld.push(qubit.clone());
            self.qubit2leg.insert(qubit.clone(), (ket_id, i));
            self.qubit2leg_dag.insert(qubit.clone(), (bra_id, i));
        }
        Ok(true)
    }

    /// Generate named qubits in a mixed state from a flat density matrix.
    ///
    /// A single 2n-leg tensor is appended; its first n legs are the bra side
    /// (inward), the last n the ket side (outward).
    ///
    /// # Errors
    ///
    /// Fatal on double generation or a data/qubit-count mismatch.
    pub fn generate_qubits_mixed(
        &mut self,
        owner: &str,
        data: &[Complex64],
        qubits: &[String],
    ) -> Result<bool> {
        let name = self.alloc_name();
        let tensor = self.store.prepare_mixed(&name, data)?;
        info!("{owner} generates mixed qubit(s) named {qubits:?}");

        let height = log2((data.len() as f64).sqrt() as usize);
        if height != qubits.len() {
            return Err(NetSimError::InvariantViolation(format!(
                "density matrix of {height} qubit(s) generated for {} name(s)",
                qubits.len()
            )));
        }
        for qubit in qubits {
            if self.qubits_all.iter().any(|q| q == qubit) {
                return Err(NetSimError::DuplicateQubit(qubit.clone()));
            }
        }

        let mut directions = vec![IN; height];
        directions.extend(std::iter::repeat(OUT).take(height));
        let id = self.dm_id;
        self.dm_id += 1;
        self.dm.append_tensor(id, tensor, &[], &directions, false)?;

        for (i, qubit) in qubits.iter().enumerate() {
            self.qubits_all.push(qubit.clone());
            self.qubits_vld.push(qubit.clone());
            self.qubit2leg.insert(qubit.clone(), (id, height + i));
            self.qubit2leg_dag.insert(qubit.clone(), (id, i));
        }
        Ok(true)
    }

    /// Apply a named gate to the given qubits, in order: the i-th qubit
    /// binds to input leg i (this ordering is observable).
    ///
    /// Canonical gate names use their frozen data; user gates require data.
    /// Stale qubits cause a logic-logged skip returning `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Fatal when a user gate has no data or the network rejects the append.
    pub fn apply_gate(
        &mut self,
        owner: &str,
        gate: &str,
        data: Option<&[Complex64]>,
        qubits: &[String],
    ) -> Result<bool> {
        if !self.check_valid(qubits) {
            return Ok(false);
        }

        let tensor = if crate::basis::canonical_gate_data(gate).is_some() {
            self.store.prepare_gate(gate, &[])?
        } else {
            let data = data.filter(|d| !d.is_empty()).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("gate {gate} has no data"))
            })?;
            self.store.prepare_gate(gate, data)?
        };
        info!("{owner} applies gate {gate} to qubit(s) {qubits:?}");

        let n = qubits.len();

        // Onto the ket half.
        let mut pairing = Vec::with_capacity(n);
        for (i, qubit) in qubits.iter().enumerate() {
            let leg = self.qubit2leg[qubit];
            let mode = self.dm.mode_of(leg).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("ket leg of {qubit} is not open"))
            })?;
            pairing.push((mode, i));
        }
        let mut directions = vec![IN; n];
        directions.extend(std::iter::repeat(OUT).take(n));
        let ket_id = self.dm_id;
        self.dm_id += 1;
        self.dm
            .append_tensor(ket_id, tensor.clone(), &pairing, &directions, false)?;
        for (i, qubit) in qubits.iter().enumerate() {
            self.qubit2leg.insert(qubit.clone(), (ket_id, n + i));
        }

        // Onto the bra half, conjugated.
        let mut pairing_dag = Vec::with_capacity(n);
        for (i, qubit) in qubits.iter().enumerate() {
            let leg = self.qubit2leg_dag[qubit];
            let mode = self.dm.mode_of(leg).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("bra leg of {qubit} is not open"))
            })?;
            pairing_dag.push((mode, i));
        }
        let mut directions_dag = vec![OUT; n];
        directions_dag.extend(std::iter::repeat(IN).take(n));
        let bra_id = self.dm_id;
        self.dm_id += 1;
        self.dm
            .append_tensor(bra_id, tensor, &pairing_dag, &directions_dag, true)?;
        for (i, qubit) in qubits.iter().enumerate() {
            self.qubit2leg_dag.insert(qubit.clone(), (bra_id, n + i));
        }

        Ok(true)
    }

    /// Apply a mixed-unitary operation as a single tensor spanning both
    /// halves through a shared selector leg.
    ///
    /// # Errors
    ///
    /// Fatal when the network rejects the append.
    pub fn apply_operation(
        &mut self,
        operation: &QuantumOperation,
        qubits: &[String],
    ) -> Result<bool> {
        if qubits.len() != 1 {
            info!("applying a multi-qubit quantum operation");
        }
        if !self.check_valid(qubits) {
            return Ok(false);
        }

        let name = self.alloc_name();
        let tensor = self.store.prepare_operation(&name, operation.factors())?;
        debug!("applying operation to qubit(s) {qubits:?}");

        let n = qubits.len();

        // Ket half: qubit wires into the even legs, outputs on the odd legs,
        // selector leg (2n) left open for the bra half.
        let mut pairing = Vec::with_capacity(n);
        let mut directions = Vec::with_capacity(2 * n + 1);
        for (i, qubit) in qubits.iter().enumerate() {
            let leg = self.qubit2leg[qubit];
            let mode = self.dm.mode_of(leg).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("ket leg of {qubit} is not open"))
            })?;
            pairing.push((mode, 2 * i));
            directions.push(IN);
            directions.push(OUT);
        }
        directions.push(OUT);
        let ket_id = self.dm_id;
        self.dm_id += 1;
        self.dm
            .append_tensor(ket_id, tensor.clone(), &pairing, &directions, false)?;
        for (i, qubit) in qubits.iter().enumerate() {
            self.qubit2leg.insert(qubit.clone(), (ket_id, 2 * i + 1));
        }

        // Bra half: the selector legs of both copies bond, implementing the
        // implicit sum over factors.
        let selector_mode = self.dm.mode_of((ket_id, 2 * n)).ok_or_else(|| {
            NetSimError::InvariantViolation("selector leg is not open".to_string())
        })?;
        let mut pairing_dag = vec![(selector_mode, 2 * n)];
        let mut directions_dag = Vec::with_capacity(2 * n + 1);
        for (i, qubit) in qubits.iter().enumerate() {
            let leg = self.qubit2leg_dag[qubit];
            let mode = self.dm.mode_of(leg).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("bra leg of {qubit} is not open"))
            })?;
            pairing_dag.push((mode, 2 * i));
            directions_dag.push(OUT);
            directions_dag.push(IN);
        }
        directions_dag.push(IN);
        let bra_id = self.dm_id;
        self.dm_id += 1;
        self.dm
            .append_tensor(bra_id, tensor, &pairing_dag, &directions_dag, true)?;
        for (i, qubit) in qubits.iter().enumerate() {
            self.qubit2leg_dag.insert(qubit.clone(), (bra_id, 2 * i + 1));
        }

        Ok(true)
    }

    /// Reduce a classically controlled correction to a coherent controlled
    /// gate on [targets ++ controls].
    ///
    /// Valid under the deferred-measurement principle only while the control
    /// qubits remain unobserved; the adaptive protocols preserve that
    /// precondition by tracing the controls out instead of measuring them.
    ///
    /// # Errors
    ///
    /// Fatal when the implementing gate data is missing for a user gate.
    pub fn apply_controlled_operation(
        &mut self,
        _orig_owner: &str,
        _orig_gate: &str,
        gate: &str,
        data: Option<&[Complex64]>,
        control_qubits: &[String],
        target_qubits: &[String],
    ) -> Result<bool> {
        let mut operated = target_qubits.to_vec();
        operated.extend_from_slice(control_qubits);
        self.apply_gate("System", gate, data, &operated)
    }

    /// Measure a single qubit in the computational basis.
    ///
    /// Builds a throwaway copy of the network closing the qubit through the
    /// |0⟩⟨0| projector and every other live qubit through an identity trace
    /// loop; its scalar value is p₀. The outcome is sampled from (p₀, 1−p₀)
    /// and the chosen projector, scaled by 1/√p, is post-multiplied onto the
    /// live network.
    ///
    /// # Errors
    ///
    /// Fatal when the qubit is stale, the scalar has an imaginary part above
    /// epsilon (a network-construction bug), or the evaluation fails.
    pub fn measure(&mut self, owner: &str, qubit: &str) -> Result<(u8, [f64; 2])> {
        if !self.qubits_vld.iter().any(|q| q == qubit) {
            debug!("skipping invalid qubit named {qubit}");
            return Err(NetSimError::StaleQubit(qubit.to_string()));
        }
        info!("{owner} measures the qubit named {qubit}");

        let projector_name = format!("{}M0", crate::basis::QNS_GATE_PREFIX);
        let projector = self.store.prepare_gate(&projector_name, &MEAS_0)?;
        let identity = self.store.prepare_gate(&gate_name("I"), &[])?;

        let mut circuit = self.dm.clone();
        let copy_name = self.alloc_name();
        circuit.rename(copy_name);
        let mut id = self.dm_id;

        // Close the measured qubit through |0⟩⟨0| on both halves.
        let ket_mode = circuit.mode_of(self.qubit2leg[qubit]).ok_or_else(|| {
            NetSimError::InvariantViolation(format!("ket leg of {qubit} is not open"))
        })?;
        circuit.append_tensor(id, projector.clone(), &[(ket_mode, 0)], &[IN, OUT], false)?;
        let ket_projector = id;
        id += 1;
        let bra_mode = circuit.mode_of(self.qubit2leg_dag[qubit]).ok_or_else(|| {
            NetSimError::InvariantViolation(format!("bra leg of {qubit} is not open"))
        })?;
        let loop_mode = circuit.mode_of((ket_projector, 1)).ok_or_else(|| {
            NetSimError::InvariantViolation("projector output leg is not open".to_string())
        })?;
        circuit.append_tensor(
            id,
            projector,
            &[(bra_mode, 0), (loop_mode, 1)],
            &[OUT, IN],
            true,
        )?;
        id += 1;

        // Identity trace loops on every other live qubit.
        for other in &self.qubits_vld {
            if other == qubit {
                continue;
            }
            let ket = circuit.mode_of(self.qubit2leg[other]).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("ket leg of {other} is not open"))
            })?;
            let bra = circuit.mode_of(self.qubit2leg_dag[other]).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("bra leg of {other} is not open"))
            })?;
            circuit.append_tensor(id, identity.clone(), &[(ket, 0), (bra, 1)], &[IN, OUT], false)?;
            id += 1;
        }

        let result = circuit.evaluate(self.optimizer)?;
        if result.volume() != 1 {
            return Err(NetSimError::InvariantViolation(format!(
                "measurement network evaluated to volume {}",
                result.volume()
            )));
        }
        let value = result.data()[0];
        if value.im.abs() >= EPS {
            return Err(NetSimError::Measurement(format!(
                "probability of {qubit} has imaginary part {}",
                value.im
            )));
        }
        let prob_zero = value.re;

        let outcome = u8::from(self.rng.gen::<f64>() >= prob_zero);
        let chosen = if outcome == 1 {
            scale(1.0 / (1.0 - prob_zero).sqrt(), &MEAS_1)
        } else {
            scale(1.0 / prob_zero.sqrt(), &MEAS_0)
        };
        let update_name = self.alloc_name();
        self.apply_gate(owner, &update_name, Some(&chosen), &[qubit.to_string()])?;

        debug!("{qubit} measured to {outcome} with distribution ({prob_zero}, {})", 1.0 - prob_zero);
        Ok((outcome, [prob_zero, 1.0 - prob_zero]))
    }

    /// Reduced density matrix of the selected qubits.
    ///
    /// All other live qubits are traced out on a throwaway copy; output
    /// modes are reordered to (ket q₀.. ket qₙ₋₁, bra q₀.. bra qₙ₋₁) and the
    /// flat column-major data is returned. Diagonal entries are printed with
    /// bracket markers for small systems.
    ///
    /// # Errors
    ///
    /// Fatal when a selected qubit is stale or evaluation fails.
    pub fn peek_dm(&mut self, owner: &str, qubits: &[String]) -> Result<Vec<Complex64>> {
        if !self.check_valid(qubits) {
            return Err(NetSimError::StaleQubit(format!("{qubits:?}")));
        }
        debug!("density network has {} tensors", self.dm.num_tensors());
        info!("{owner} peeks density matrix on qubit(s) {qubits:?}");

        let identity = self.store.prepare_gate(&gate_name("I"), &[])?;
        let mut circuit = self.dm.clone();
        let copy_name = self.alloc_name();
        circuit.rename(copy_name);
        let mut id = self.dm_id;

        for other in &self.qubits_vld {
            if qubits.iter().any(|q| q == other) {
                continue;
            }
            let ket = circuit.mode_of(self.qubit2leg[other]).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("ket leg of {other} is not open"))
            })?;
            let bra = circuit.mode_of(self.qubit2leg_dag[other]).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("bra leg of {other} is not open"))
            })?;
            circuit.append_tensor(id, identity.clone(), &[(ket, 0), (bra, 1)], &[IN, OUT], false)?;
            id += 1;
        }

        let mut order = Vec::with_capacity(2 * qubits.len());
        for qubit in qubits {
            order.push(circuit.mode_of(self.qubit2leg[qubit]).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("ket leg of {qubit} is not open"))
            })?);
        }
        for qubit in qubits {
            order.push(circuit.mode_of(self.qubit2leg_dag[qubit]).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("bra leg of {qubit} is not open"))
            })?);
        }
        circuit.reorder_output_modes(&order)?;

        let result = circuit.evaluate(self.optimizer)?;
        let dm = result.data().to_vec();
        log_density_matrix(&dm, qubits.len());
        Ok(dm)
    }

    /// Trace out the named qubits on the live network.
    ///
    /// Stale names cause a logic-logged skip returning `Ok(false)`.
    /// Subsequent references to the traced qubits fail the live check.
    ///
    /// # Errors
    ///
    /// Fatal when the network rejects the appends.
    pub fn partial_trace(&mut self, qubits: &[String]) -> Result<bool> {
        if !self.check_valid(qubits) {
            return Ok(false);
        }
        info!("tracing out qubit(s) {qubits:?}");

        let identity = self.store.prepare_gate(&gate_name("I"), &[])?;
        for qubit in qubits {
            let ket = self.dm.mode_of(self.qubit2leg[qubit]).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("ket leg of {qubit} is not open"))
            })?;
            let bra = self.dm.mode_of(self.qubit2leg_dag[qubit]).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("bra leg of {qubit} is not open"))
            })?;
            let id = self.dm_id;
            self.dm_id += 1;
            self.dm
                .append_tensor(id, identity.clone(), &[(ket, 0), (bra, 1)], &[IN, OUT], false)?;
        }
        self.qubits_vld.retain(|q| !qubits.contains(q));
        Ok(true)
    }

    /// Evaluate the whole live network into a single tensor and replace the
    /// network with it, rewriting both qubit maps. This bounds memory growth
    /// in long experiments.
    ///
    /// # Errors
    ///
    /// Fatal when the open-leg count disagrees with the live-qubit count.
    pub fn contract(&mut self, optimizer: Option<&str>) -> Result<Vec<Complex64>> {
        if let Some(name) = optimizer {
            self.optimizer = ContractionOrder::from_name(name);
        }
        info!("contracting the tensor network ({} tensors)", self.dm.num_tensors());

        self.dm.collapse_isometries();
        let result = self.dm.evaluate(self.optimizer)?;
        let dm = result.data().to_vec();

        if self.dm.rank() != 2 * self.qubits_vld.len() {
            return Err(NetSimError::InvariantViolation(format!(
                "contracted rank {} for {} live qubit(s)",
                self.dm.rank(),
                self.qubits_vld.len()
            )));
        }

        // Remember where each live qubit's legs land in the result.
        let mut ket_modes = HashMap::new();
        let mut bra_modes = HashMap::new();
        for qubit in &self.qubits_vld {
            let ket = self.dm.mode_of(self.qubit2leg[qubit]).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("ket leg of {qubit} is not open"))
            })?;
            let bra = self.dm.mode_of(self.qubit2leg_dag[qubit]).ok_or_else(|| {
                NetSimError::InvariantViolation(format!("bra leg of {qubit} is not open"))
            })?;
            ket_modes.insert(qubit.clone(), ket);
            bra_modes.insert(qubit.clone(), bra);
        }

        let contracted_name = self.alloc_name();
        let tensor = self
            .store
            .prepare_tensor(&contracted_name, result.extents(), &dm)?;

        let mut directions = vec![LegDirection::Undirected; self.dm.rank()];
        for qubit in &self.qubits_vld {
            directions[ket_modes[qubit]] = OUT;
            directions[bra_modes[qubit]] = IN;
        }
        if directions.contains(&LegDirection::Undirected) {
            return Err(NetSimError::InvariantViolation(
                "contracted network has an unclaimed leg".to_string(),
            ));
        }

        let network_name = self.alloc_name();
        self.dm = TensorNetwork::new(network_name);
        self.dm_id = 1;
        let id = self.dm_id;
        self.dm_id += 1;
        self.dm.append_tensor(id, tensor, &[], &directions, false)?;

        for qubit in &self.qubits_vld {
            self.qubit2leg.insert(qubit.clone(), (id, ket_modes[qubit]));
            self.qubit2leg_dag
                .insert(qubit.clone(), (id, bra_modes[qubit]));
        }
        Ok(dm)
    }

    /// Fidelity ⟨Φ⁺| ρ_AB |Φ⁺⟩ of an entangled pair against the ideal Bell
    /// state, tracing out every other live qubit.
    ///
    /// # Errors
    ///
    /// Fatal when the scalar has an imaginary part above epsilon.
    pub fn calculate_fidelity(&mut self, pair: (&str, &str)) -> Result<f64> {
        use crate::logging::color::{CYAN, END};
        info!("{CYAN}calculating fidelity for EPR pair ({}, {}){END}", pair.0, pair.1);
        let bell_name = format!("{QNS_PREFIX}BellSV");
        let bell = self.store.prepare_tensor(&bell_name, &[2, 2], &BELL)?;

        let qubits = [pair.0.to_string(), pair.1.to_string()];
        let rho_flat = self.peek_dm("System", &qubits)?;
        let rho_name = self.alloc_name();
        let rho = self.store.prepare_tensor(&rho_name, &[2, 2, 2, 2], &rho_flat)?;

        let fid_name = self.alloc_name();
        let mut circuit = TensorNetwork::new(fid_name);
        circuit.append_tensor(1, bell.clone(), &[], &[OUT, OUT], false)?;
        circuit.append_tensor(2, bell, &[], &[IN, IN], true)?;
        circuit.append_tensor(
            3,
            rho,
            &[(0, 0), (1, 1), (2, 2), (3, 3)],
            &[IN, IN, OUT, OUT],
            false,
        )?;

        let result = circuit.evaluate(self.optimizer)?;
        if result.volume() != 1 {
            return Err(NetSimError::InvariantViolation(format!(
                "fidelity network evaluated to volume {}",
                result.volume()
            )));
        }
        let value = result.data()[0];
        if value.im.abs() >= EPS {
            return Err(NetSimError::Measurement(format!(
                "fidelity has imaginary part {}",
                value.im
            )));
        }
        info!("{CYAN}=> the fidelity is {}{END}", value.re);
        Ok(value.re)
    }
}

/// Print a reduced density matrix with bracketed diagonal entries, the way
/// experiment logs are read.
fn log_density_matrix(dm: &[Complex64], qubit_count: usize) {
    use crate::logging::color::{END, LIGHT_YELLOW};
    if qubit_count >= 5 {
        info!("{LIGHT_YELLOW}density matrix: [{} entries]{END}", dm.len());
        return;
    }
    let dim = 1usize << qubit_count;
    let mut rendered = format!("{LIGHT_YELLOW}density matrix:{END}\n[\n");
    for i in 0..dm.len() {
        if i % dim == i / dim {
            rendered.push_str(&format!("<{:.4}{:+.4}i>", dm[i].re, dm[i].im));
        } else {
            rendered.push_str(&format!(" {:.4}{:+.4}i ", dm[i].re, dm[i].im));
        }
        if (i + 1) % dim == 0 {
            rendered.push('\n');
        }
    }
    rendered.push(']');
    info!("{rendered}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{approx_eq, KET_0, KET_1};

    fn engine() -> QuantumNetworkSimulator {
        QuantumNetworkSimulator::new(7)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn generation_registers_both_maps_with_extent_two() {
        let mut e = engine();
        e.generate_qubits_pure("Alice", &BELL, &names(&["a", "b"])).unwrap();
        for q in ["a", "b"] {
            let ket = e.ket_leg(q).unwrap();
            let bra = e.bra_leg(q).unwrap();
            assert_eq!(e.leg_extent(ket), Some(2));
            assert_eq!(e.leg_extent(bra), Some(2));
        }
        assert_eq!(e.valid_qubits().len(), 2);
    }

    #[test]
    fn double_generation_is_fatal() {
        let mut e = engine();
        e.generate_qubits_pure("Alice", &KET_0, &names(&["a"])).unwrap();
        let err = e
            .generate_qubits_pure("Alice", &KET_0, &names(&["a"]))
            .unwrap_err();
        assert!(matches!(err, NetSimError::DuplicateQubit(_)));
    }

    #[test]
    fn stale_qubit_gate_skips_with_false() {
        let mut e = engine();
        e.generate_qubits_pure("Alice", &KET_0, &names(&["a"])).unwrap();
        e.partial_trace(&names(&["a"])).unwrap();
        let applied = e
            .apply_gate("Alice", &gate_name("PX"), None, &names(&["a"]))
            .unwrap();
        assert!(!applied);
    }

    #[test]
    fn measure_definite_states() {
        let mut e = engine();
        e.generate_qubits_pure("Alice", &KET_0, &names(&["z"])).unwrap();
        let (outcome, dist) = e.measure("Alice", "z").unwrap();
        assert_eq!(outcome, 0);
        assert!((dist[0] - 1.0).abs() < EPS);
        assert!((dist[0] + dist[1] - 1.0).abs() < EPS);

        e.generate_qubits_pure("Alice", &KET_1, &names(&["o"])).unwrap();
        let (outcome, dist) = e.measure("Alice", "o").unwrap();
        assert_eq!(outcome, 1);
        assert!(dist[0].abs() < EPS);
    }

    #[test]
    fn measurement_distribution_sums_to_one() {
        let mut e = engine();
        e.generate_qubits_pure("Alice", &BELL, &names(&["a", "b"])).unwrap();
        let (_, dist) = e.measure("Alice", "a").unwrap();
        assert!((dist[0] + dist[1] - 1.0).abs() < EPS);
        assert!((dist[0] - 0.5).abs() < EPS);
    }

    #[test]
    fn bell_measurements_are_correlated() {
        let mut e = engine();
        e.generate_qubits_pure("Alice", &BELL, &names(&["a", "b"])).unwrap();
        let (first, _) = e.measure("Alice", "a").unwrap();
        let (second, dist) = e.measure("Alice", "b").unwrap();
        assert_eq!(first, second);
        assert!((dist[usize::from(first)] - 1.0).abs() < EPS);
    }

    #[test]
    fn peek_bell_density_matrix() {
        let mut e = engine();
        e.generate_qubits_pure("Alice", &BELL, &names(&["a", "b"])).unwrap();
        let dm = e.peek_dm("Alice", &names(&["a", "b"])).unwrap();
        assert_eq!(dm.len(), 16);
        // Diagonal 0.5 at |00⟩ and |11⟩, 0.5 coherences between them.
        assert!(approx_eq(dm[0], Complex64::new(0.5, 0.0)));
        assert!(approx_eq(dm[15], Complex64::new(0.5, 0.0)));
        assert!(approx_eq(dm[3], Complex64::new(0.5, 0.0)));
        assert!(approx_eq(dm[12], Complex64::new(0.5, 0.0)));
        let trace = dm[0] + dm[5] + dm[10] + dm[15];
        assert!(approx_eq(trace, Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn apply_identity_leaves_state_unchanged() {
        let mut e = engine();
        e.generate_qubits_pure("Alice", &BELL, &names(&["a", "b"])).unwrap();
        let before = e.peek_dm("Alice", &names(&["a", "b"])).unwrap();
        e.apply_gate("Alice", &gate_name("I"), None, &names(&["a"])).unwrap();
        let after = e.peek_dm("Alice", &names(&["a", "b"])).unwrap();
        for (x, y) in before.iter().zip(&after) {
            assert!(approx_eq(*x, *y));
        }
    }

    #[test]
    fn trace_over_everything_is_one() {
        let mut e = engine();
        e.generate_qubits_pure("Alice", &BELL, &names(&["a", "b"])).unwrap();
        e.generate_qubits_pure("Alice", &KET_1, &names(&["c"])).unwrap();
        e.partial_trace(&names(&["a", "b", "c"])).unwrap();
        assert!(e.valid_qubits().is_empty());
        let scalar = e.network().evaluate(ContractionOrder::Greed).unwrap();
        assert_eq!(scalar.volume(), 1);
        assert!(approx_eq(scalar.data()[0], Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn contract_preserves_peeked_state() {
        let mut e = engine();
        e.generate_qubits_pure("Alice", &BELL, &names(&["a", "b"])).unwrap();
        e.apply_gate("Alice", &gate_name("H"), None, &names(&["a"])).unwrap();
        let before = e.peek_dm("Alice", &names(&["a", "b"])).unwrap();
        e.contract(Some("greed")).unwrap();
        assert_eq!(e.network().num_tensors(), 1);
        let after = e.peek_dm("Alice", &names(&["a", "b"])).unwrap();
        for (x, y) in before.iter().zip(&after) {
            assert!(approx_eq(*x, *y));
        }
    }

    #[test]
    fn fidelity_of_fresh_bell_pair_is_one() {
        let mut e = engine();
        e.generate_qubits_pure("Alice", &BELL, &names(&["a", "b"])).unwrap();
        let fidelity = e.calculate_fidelity(("a", "b")).unwrap();
        assert!((fidelity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn controlled_operation_orders_targets_before_controls() {
        let mut e = engine();
        // control |1⟩, target |0⟩: CX flips the target.
        e.generate_qubits_pure("Alice", &KET_1, &names(&["ctl"])).unwrap();
        e.generate_qubits_pure("Alice", &KET_0, &names(&["tgt"])).unwrap();
        e.apply_controlled_operation(
            "Alice",
            &gate_name("PX"),
            &gate_name("CX"),
            Some(&crate::basis::CNOT),
            &names(&["ctl"]),
            &names(&["tgt"]),
        )
        .unwrap();
        let (outcome, _) = e.measure("Alice", "tgt").unwrap();
        assert_eq!(outcome, 1);
    }

    #[test]
    fn operation_dephasing_damps_coherences() {
        let mut e = engine();
        // |+⟩ has full coherence; a 50/50 I-Z mix removes it entirely.
        let amp = std::f64::consts::FRAC_1_SQRT_2;
        let plus = vec![Complex64::new(amp, 0.0); 2];
        e.generate_qubits_pure("Alice", &plus, &names(&["p"])).unwrap();
        let dephase = QuantumOperation::new(
            vec![gate_name("I"), gate_name("PZ")],
            vec![
                crate::basis::PAULI_I.clone(),
                crate::basis::PAULI_Z.clone(),
            ],
            vec![0.5, 0.5],
        )
        .unwrap();
        e.apply_operation(&dephase, &names(&["p"])).unwrap();
        let dm = e.peek_dm("Alice", &names(&["p"])).unwrap();
        assert!(approx_eq(dm[0], Complex64::new(0.5, 0.0)));
        assert!(dm[1].norm() < EPS);
        assert!(dm[2].norm() < EPS);
        assert!(approx_eq(dm[3], Complex64::new(0.5, 0.0)));
    }

    #[test]
    fn operation_depolarization_sets_the_bell_fidelity() {
        let mut e = engine();
        e.generate_qubits_pure("Alice", &BELL, &names(&["a", "b"])).unwrap();
        let fidelity = 0.9;
        let leak = (1.0 - fidelity) / 3.0;
        let depolar = QuantumOperation::new(
            vec![
                gate_name("I"),
                gate_name("PX"),
                gate_name("PY"),
                gate_name("PZ"),
            ],
            vec![
                crate::basis::PAULI_I.clone(),
                crate::basis::PAULI_X.clone(),
                crate::basis::PAULI_Y.clone(),
                crate::basis::PAULI_Z.clone(),
            ],
            vec![fidelity, leak, leak, leak],
        )
        .unwrap();
        e.apply_operation(&depolar, &names(&["b"])).unwrap();
        // Each Pauli leak maps |Φ⁺⟩ onto an orthogonal Bell state, so the
        // overlap is exactly the identity weight.
        let measured = e.calculate_fidelity(("a", "b")).unwrap();
        assert!((measured - fidelity).abs() < EPS);
    }

    #[test]
    fn measure_sequence_is_deterministic_per_seed() {
        let run = |seed| {
            let mut e = QuantumNetworkSimulator::new(seed);
            e.generate_qubits_pure("Alice", &BELL, &names(&["a", "b"])).unwrap();
            e.generate_qubits_pure("Alice", &BELL, &names(&["c", "d"])).unwrap();
            let mut outcomes = Vec::new();
            for q in ["a", "b", "c", "d"] {
                outcomes.push(e.measure("Alice", q).unwrap().0);
            }
            outcomes
        };
        assert_eq!(run(42), run(42));
    }
}
