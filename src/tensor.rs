//! # Tensor Layer - Store, Network Builder and Contraction Engine
//!
//! The quantum state engine represents the density operator as a growing
//! tensor network. This module provides the three pieces it consumes:
//!
//! - [`TensorStore`]: named immutable tensors with complex data, idempotent
//!   on name (a second prepare of the same name is a no-op with a
//!   diagnostic; a data/extent mismatch is fatal).
//! - [`TensorNetwork`]: a DAG of tensor placements and leg pairings. A
//!   placement may be *conjugated*, which conjugates its data structurally
//!   without duplicating it in memory; this is what keeps the bra half of a
//!   density-matrix circuit Hermitian by construction.
//! - The synchronous evaluator with pluggable contraction orders
//!   ("dummy", "heuro", "greed", "metis", "cutnn").
//!
//! ## Data layout
//!
//! Tensor data is stored **column-major**: the first leg varies fastest.
//! Gate matrices enter as row-major unitaries whose basis index is
//! little-endian in the qubit argument list, so reinterpreted column-major a
//! gate of n qubits has legs `(in₀..in₍ₙ₋₁₎, out₀..out₍ₙ₋₁₎)`. The engine's
//! pairing logic ("qubit i binds to input leg i") depends on this contract.
//!
//! ## Output modes
//!
//! The network keeps an ordered list of *output modes*, its open legs.
//! Pairing a new tensor consumes modes; the new tensor's unpaired legs are
//! appended at the end. Mode ids therefore shift as the network grows, which
//! is why callers re-query [`TensorNetwork::mode_of`] before every append.
//!
//! ## Usage
//!
//! Preparing |0⟩, wiring it through a Hadamard and evaluating yields |+⟩:
//!
//! ```rust,no_run
//! use quantum_netsim::basis::{gate_name, KET_0};
//! use quantum_netsim::tensor::{ContractionOrder, LegDirection, TensorNetwork, TensorStore};
//!
//! fn main() -> quantum_netsim::Result<()> {
//!     let mut store = TensorStore::new();
//!     let ket = store.prepare_pure("psi", &KET_0)?;
//!     let hadamard = store.prepare_gate(&gate_name("H"), &[])?;
//!
//!     let mut network = TensorNetwork::new("plus");
//!     network.append_tensor(1, ket, &[], &[LegDirection::Outward], false)?;
//!     network.append_tensor(
//!         2,
//!         hadamard,
//!         &[(0, 0)],
//!         &[LegDirection::Inward, LegDirection::Outward],
//!         false,
//!     )?;
//!     let plus = network.evaluate(ContractionOrder::Greed)?;
//!     println!("amplitudes: {:?}", plus.data());
//!     Ok(())
//! }
//! ```

use num_complex::Complex64;
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::basis::{approx_eq, log2};
use crate::{NetSimError, Result};

/// Extent list of a tensor; stays inline for anything qubit-sized.
pub type Extents = SmallVec<[usize; 8]>;

/// A (tensor id, leg index) pair identifying one leg inside a network.
pub type LegRef = (usize, usize);

/// Direction of a placed leg.
///
/// Directions record the ket/bra structure of the density-matrix circuit:
/// ket-side wires point outward, bra-side wires inward. They are a structural
/// annotation; contraction itself is direction-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LegDirection {
    /// Leg producing a ket index.
    Outward,
    /// Leg consuming a bra index.
    Inward,
    /// Direction not tracked (contracted results).
    Undirected,
}

/// Named immutable tensor: extents plus flat column-major complex data.
#[derive(Debug, Clone)]
pub struct Tensor {
    name: String,
    extents: Extents,
    data: Vec<Complex64>,
}

impl Tensor {
    /// Create a tensor, checking that the data length matches the extents.
    ///
    /// # Errors
    ///
    /// Returns [`NetSimError::InvariantViolation`] when the flat data length
    /// differs from the product of the extents.
    pub fn new(name: impl Into<String>, extents: Extents, data: Vec<Complex64>) -> Result<Self> {
        let name = name.into();
        let volume: usize = extents.iter().product();
        if volume != data.len() {
            return Err(NetSimError::InvariantViolation(format!(
                "tensor {name}: data length {} does not match extents volume {volume}",
                data.len()
            )));
        }
        Ok(Self {
            name,
            extents,
            data,
        })
    }

    /// Unique name of the tensor.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of legs.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    /// Leg extents.
    #[must_use]
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Total number of elements.
    #[must_use]
    pub fn volume(&self) -> usize {
        self.data.len()
    }

    /// Flat column-major data.
    #[must_use]
    pub fn data(&self) -> &[Complex64] {
        &self.data
    }

    /// Whether this is the 2x2 identity (used by isometry collapsing).
    #[must_use]
    pub fn is_identity2(&self) -> bool {
        self.extents.as_slice() == [2, 2]
            && approx_eq(self.data[0], Complex64::new(1.0, 0.0))
            && approx_eq(self.data[1], Complex64::new(0.0, 0.0))
            && approx_eq(self.data[2], Complex64::new(0.0, 0.0))
            && approx_eq(self.data[3], Complex64::new(1.0, 0.0))
    }
}

/// Value-equal by name, like the store that owns them.
impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Registry of named tensors created over the lifetime of a run.
///
/// All `prepare_*` operations are idempotent on name: preparing an existing
/// name logs a diagnostic and keeps the stored data.
#[derive(Debug, Default)]
pub struct TensorStore {
    tensors: HashMap<String, Arc<Tensor>>,
}

impl TensorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a tensor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Tensor>> {
        self.tensors.get(name).cloned()
    }

    /// Whether a name is already taken.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    fn insert(&mut self, tensor: Tensor) -> Arc<Tensor> {
        let arc = Arc::new(tensor);
        self.tensors.insert(arc.name().to_string(), Arc::clone(&arc));
        arc
    }

    /// Prepare a pure state tensor from a length-2ⁿ state vector; n legs of
    /// extent 2.
    ///
    /// # Errors
    ///
    /// Fatal when the data length is not a power of two.
    pub fn prepare_pure(&mut self, name: &str, data: &[Complex64]) -> Result<Arc<Tensor>> {
        if let Some(existing) = self.get(name) {
            debug!("preparing a tensor named \"{name}\" twice; data ignored");
            return Ok(existing);
        }
        if !data.len().is_power_of_two() {
            return Err(NetSimError::InvariantViolation(format!(
                "state vector for {name} has non-power-of-two length {}",
                data.len()
            )));
        }
        let extents: Extents = (0..log2(data.len())).map(|_| 2).collect();
        Ok(self.insert(Tensor::new(name, extents, data.to_vec())?))
    }

    /// Prepare a mixed state tensor from a length-4ⁿ flat density matrix;
    /// 2n legs of extent 2.
    ///
    /// # Errors
    ///
    /// Fatal when the data length is not a square power of two.
    pub fn prepare_mixed(&mut self, name: &str, data: &[Complex64]) -> Result<Arc<Tensor>> {
        if let Some(existing) = self.get(name) {
            debug!("preparing a tensor named \"{name}\" twice; data ignored");
            return Ok(existing);
        }
        let dim = (data.len() as f64).sqrt() as usize;
        if dim * dim != data.len() || !dim.is_power_of_two() {
            return Err(NetSimError::InvariantViolation(format!(
                "density matrix for {name} has invalid length {}",
                data.len()
            )));
        }
        let extents: Extents = (0..2 * log2(dim)).map(|_| 2).collect();
        Ok(self.insert(Tensor::new(name, extents, data.to_vec())?))
    }

    /// Prepare a gate tensor: 2n legs of extent 2. Reserved gate names
    /// short-circuit to the canonical data regardless of `data`.
    ///
    /// # Errors
    ///
    /// Fatal when a non-canonical gate has no or non-square data.
    pub fn prepare_gate(&mut self, name: &str, data: &[Complex64]) -> Result<Arc<Tensor>> {
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }
        let frozen = crate::basis::canonical_gate_data(name);
        let data = match frozen {
            Some(canonical) => canonical,
            None => data,
        };
        debug!("preparing a gate named \"{name}\"");
        let dim = (data.len() as f64).sqrt() as usize;
        if dim * dim != data.len() || !dim.is_power_of_two() || data.is_empty() {
            return Err(NetSimError::InvariantViolation(format!(
                "gate {name} has invalid data length {}",
                data.len()
            )));
        }
        let extents: Extents = (0..2 * log2(dim)).map(|_| 2).collect();
        Ok(self.insert(Tensor::new(name, extents, data.to_vec())?))
    }

    /// Prepare a mixed-unitary operation tensor. The factors are already
    /// √pᵢ-scaled; data is their concatenation and the trailing leg is the
    /// selector axis of extent k = number of factors.
    ///
    /// # Errors
    ///
    /// Fatal when the factors are empty or unevenly sized.
    pub fn prepare_operation(
        &mut self,
        name: &str,
        factors: &[Vec<Complex64>],
    ) -> Result<Arc<Tensor>> {
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }
        if factors.is_empty() {
            return Err(NetSimError::InvariantViolation(format!(
                "operation {name} has no factors"
            )));
        }
        let dim = (factors[0].len() as f64).sqrt() as usize;
        if dim * dim != factors[0].len() || !dim.is_power_of_two() {
            return Err(NetSimError::InvariantViolation(format!(
                "operation {name} factor length {} is not a square",
                factors[0].len()
            )));
        }
        let mut extents: Extents = (0..2 * log2(dim)).map(|_| 2).collect();
        extents.push(factors.len());
        let mut flat = Vec::with_capacity(factors[0].len() * factors.len());
        for factor in factors {
            if factor.len() != factors[0].len() {
                return Err(NetSimError::InvariantViolation(format!(
                    "operation {name} has unevenly sized factors"
                )));
            }
            flat.extend_from_slice(factor);
        }
        Ok(self.insert(Tensor::new(name, extents, flat)?))
    }

    /// Prepare a tensor of arbitrary extents.
    ///
    /// # Errors
    ///
    /// Fatal when the data length mismatches the extents.
    pub fn prepare_tensor(
        &mut self,
        name: &str,
        extents: &[usize],
        data: &[Complex64],
    ) -> Result<Arc<Tensor>> {
        if let Some(existing) = self.get(name) {
            debug!("preparing a tensor named \"{name}\" twice; data ignored");
            return Ok(existing);
        }
        Ok(self.insert(Tensor::new(
            name,
            extents.iter().copied().collect(),
            data.to_vec(),
        )?))
    }
}

/// Contraction-order heuristic, selected by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContractionOrder {
    /// Contract bonds in placement order.
    Dummy,
    /// Contract the pair sharing the most bonds first.
    Heuro,
    /// Contract the pair yielding the smallest intermediate.
    #[default]
    Greed,
}

impl ContractionOrder {
    /// Resolve an optimizer name. Unknown names and the external
    /// graph-partitioner backends ("metis", "cutnn") fall back to the greedy
    /// order with a diagnostic.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "dummy" => Self::Dummy,
            "heuro" => Self::Heuro,
            "greed" => Self::Greed,
            other => {
                debug!("contraction optimizer \"{other}\" not carried; using \"greed\"");
                Self::Greed
            }
        }
    }
}

/// One tensor placed into a network.
#[derive(Debug, Clone)]
pub struct Placement {
    tensor: Arc<Tensor>,
    conjugated: bool,
    directions: SmallVec<[LegDirection; 8]>,
}

impl Placement {
    /// The placed tensor.
    #[must_use]
    pub fn tensor(&self) -> &Arc<Tensor> {
        &self.tensor
    }

    /// Whether the placement is complex-conjugated.
    #[must_use]
    pub fn conjugated(&self) -> bool {
        self.conjugated
    }

    /// Directions of the placed legs.
    #[must_use]
    pub fn directions(&self) -> &[LegDirection] {
        &self.directions
    }
}

/// Growing DAG of tensor placements and leg pairings.
#[derive(Debug, Clone, Default)]
pub struct TensorNetwork {
    name: String,
    placements: BTreeMap<usize, Placement>,
    /// Symmetric bond map: every bonded leg points at its partner.
    bonds: HashMap<LegRef, LegRef>,
    /// Ordered open legs; a leg's position here is its mode id.
    output_modes: Vec<LegRef>,
}

impl TensorNetwork {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Rename the network (copies keep their own identity).
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of placed tensors.
    #[must_use]
    pub fn num_tensors(&self) -> usize {
        self.placements.len()
    }

    /// Largest placement id, or 0 for an empty network.
    #[must_use]
    pub fn max_tensor_id(&self) -> usize {
        self.placements.keys().next_back().copied().unwrap_or(0)
    }

    /// Number of open legs.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.output_modes.len()
    }

    /// Placement by id.
    #[must_use]
    pub fn placement(&self, id: usize) -> Option<&Placement> {
        self.placements.get(&id)
    }

    /// Current mode id of an open leg. Mode ids shift as the network grows;
    /// always re-query before pairing.
    #[must_use]
    pub fn mode_of(&self, leg: LegRef) -> Option<usize> {
        self.output_modes.iter().position(|&m| m == leg)
    }

    /// Append a tensor.
    ///
    /// `pairing` entries are `(mode id, new leg index)`: the open leg at the
    /// given mode is bonded to the given leg of the new tensor. Remaining
    /// legs of the new tensor become new output modes, appended in leg
    /// order. A conjugated placement contributes `conj(data)` at evaluation
    /// without duplicating the stored tensor.
    ///
    /// # Errors
    ///
    /// Fatal on duplicate placement ids, direction/rank mismatch, repeated
    /// or out-of-range pairing entries, or extent mismatch across a bond.
    pub fn append_tensor(
        &mut self,
        id: usize,
        tensor: Arc<Tensor>,
        pairing: &[(usize, usize)],
        directions: &[LegDirection],
        conjugated: bool,
    ) -> Result<()> {
        if self.placements.contains_key(&id) {
            return Err(NetSimError::InvariantViolation(format!(
                "network {}: placement id {id} already used",
                self.name
            )));
        }
        if directions.len() != tensor.rank() {
            return Err(NetSimError::InvariantViolation(format!(
                "network {}: {} directions for rank-{} tensor {}",
                self.name,
                directions.len(),
                tensor.rank(),
                tensor.name()
            )));
        }
        let mut seen_modes: SmallVec<[usize; 8]> = SmallVec::new();
        let mut seen_legs: SmallVec<[usize; 8]> = SmallVec::new();
        for &(mode, leg) in pairing {
            if mode >= self.output_modes.len() || leg >= tensor.rank() {
                return Err(NetSimError::InvariantViolation(format!(
                    "network {}: pairing ({mode}, {leg}) out of range",
                    self.name
                )));
            }
            if seen_modes.contains(&mode) || seen_legs.contains(&leg) {
                return Err(NetSimError::InvariantViolation(format!(
                    "network {}: repeated pairing entry ({mode}, {leg})",
                    self.name
                )));
            }
            let partner = self.output_modes[mode];
            let partner_extent = self.placements[&partner.0].tensor.extents()[partner.1];
            if partner_extent != tensor.extents()[leg] {
                return Err(NetSimError::InvariantViolation(format!(
                    "network {}: extent mismatch {partner_extent} vs {} across bond",
                    self.name,
                    tensor.extents()[leg]
                )));
            }
            seen_modes.push(mode);
            seen_legs.push(leg);
        }

        // Wire the bonds, then drop the consumed modes (descending so the
        // earlier removals do not shift the later ones).
        for &(mode, leg) in pairing {
            let partner = self.output_modes[mode];
            self.bonds.insert(partner, (id, leg));
            self.bonds.insert((id, leg), partner);
        }
        let mut consumed: SmallVec<[usize; 8]> = seen_modes.clone();
        consumed.sort_unstable();
        for &mode in consumed.iter().rev() {
            self.output_modes.remove(mode);
        }
        for leg in 0..tensor.rank() {
            if !seen_legs.contains(&leg) {
                self.output_modes.push((id, leg));
            }
        }
        self.placements.insert(
            id,
            Placement {
                tensor,
                conjugated,
                directions: directions.iter().copied().collect(),
            },
        );
        Ok(())
    }

    /// Permute the output modes: after the call, mode `i` is the leg that
    /// previously had mode id `order[i]`.
    ///
    /// # Errors
    ///
    /// Fatal when `order` is not a permutation of the current mode ids.
    pub fn reorder_output_modes(&mut self, order: &[usize]) -> Result<()> {
        if order.len() != self.output_modes.len() {
            return Err(NetSimError::InvariantViolation(format!(
                "network {}: reorder of {} modes got {} entries",
                self.name,
                self.output_modes.len(),
                order.len()
            )));
        }
        let mut seen = vec![false; order.len()];
        for &m in order {
            if m >= order.len() || seen[m] {
                return Err(NetSimError::InvariantViolation(format!(
                    "network {}: reorder order is not a permutation",
                    self.name
                )));
            }
            seen[m] = true;
        }
        self.output_modes = order.iter().map(|&m| self.output_modes[m]).collect();
        Ok(())
    }

    /// Remove fully bonded 2x2 identity placements by rewiring their
    /// partners directly (a Kronecker-delta contraction). The output-mode
    /// signature is preserved: placements with open legs are never touched.
    ///
    /// Returns the number of placements removed.
    pub fn collapse_isometries(&mut self) -> usize {
        let candidates: Vec<usize> = self
            .placements
            .iter()
            .filter(|(id, p)| {
                !p.conjugated
                    && p.tensor.is_identity2()
                    && self.bonds.contains_key(&(**id, 0))
                    && self.bonds.contains_key(&(**id, 1))
            })
            .map(|(id, _)| *id)
            .collect();
        let mut removed = 0;
        for id in candidates {
            let p0 = self.bonds[&(id, 0)];
            let p1 = self.bonds[&(id, 1)];
            if p0.0 == id || p1.0 == id {
                // Identity closed onto itself contributes a scalar factor;
                // leave it for the evaluator.
                continue;
            }
            self.bonds.remove(&(id, 0));
            self.bonds.remove(&(id, 1));
            self.bonds.insert(p0, p1);
            self.bonds.insert(p1, p0);
            self.placements.remove(&id);
            removed += 1;
        }
        if removed > 0 {
            debug!(
                "network {}: collapsed {removed} identity placement(s)",
                self.name
            );
        }
        removed
    }

    /// Synchronously evaluate the network into a single tensor whose legs
    /// follow the output-mode order. Evaluation is pure: calling it twice on
    /// the same network yields the same result, and an already-scalar
    /// network evaluates to itself.
    ///
    /// # Errors
    ///
    /// Propagates invariant violations from malformed networks.
    pub fn evaluate(&self, order: ContractionOrder) -> Result<Tensor> {
        let started = std::time::Instant::now();
        let result = self.evaluate_inner(order);
        debug!(
            "evaluating tensor network {} of size {} took {:?}",
            self.name,
            self.num_tensors(),
            started.elapsed()
        );
        result
    }

    fn evaluate_inner(&self, order: ContractionOrder) -> Result<Tensor> {
        // Assign dense bond ids.
        let mut bond_ids: HashMap<LegRef, usize> = HashMap::new();
        let mut next_bond = 0usize;
        for (&a, &b) in &self.bonds {
            if a <= b {
                bond_ids.insert(a, next_bond);
                bond_ids.insert(b, next_bond);
                next_bond += 1;
            }
        }

        let mut work: Vec<WorkTensor> = Vec::with_capacity(self.placements.len());
        for (&id, placement) in &self.placements {
            let data = if placement.conjugated {
                placement.tensor.data().iter().map(Complex64::conj).collect()
            } else {
                placement.tensor.data().to_vec()
            };
            let legs = (0..placement.tensor.rank())
                .map(|leg| match bond_ids.get(&(id, leg)) {
                    Some(&bond) => LegTag::Bond(bond),
                    None => LegTag::Open((id, leg)),
                })
                .collect();
            work.push(WorkTensor {
                extents: placement.tensor.extents().iter().copied().collect(),
                data,
                legs,
                origin: id,
            });
        }

        let mut scalar = Complex64::new(1.0, 0.0);

        // Identity deltas: merge the two bonds into one and drop the tensor.
        let mut i = 0;
        while i < work.len() {
            let is_delta = work[i].extents.as_slice() == [2, 2]
                && approx_eq(work[i].data[0], Complex64::new(1.0, 0.0))
                && approx_eq(work[i].data[1], Complex64::new(0.0, 0.0))
                && approx_eq(work[i].data[2], Complex64::new(0.0, 0.0))
                && approx_eq(work[i].data[3], Complex64::new(1.0, 0.0));
            let delta_bonds = match (is_delta, work[i].legs.as_slice()) {
                (true, &[LegTag::Bond(a), LegTag::Bond(b)]) => Some((a, b)),
                _ => None,
            };
            match delta_bonds {
                Some((a, b)) if a != b => {
                    work.swap_remove(i);
                    for tensor in &mut work {
                        for leg in &mut tensor.legs {
                            if *leg == LegTag::Bond(b) {
                                *leg = LegTag::Bond(a);
                            }
                        }
                    }
                }
                Some(_) => {
                    // tr(I) over a closed loop.
                    scalar *= Complex64::new(2.0, 0.0);
                    work.swap_remove(i);
                }
                None => i += 1,
            }
        }

        // Internal traces (a bond appearing twice on one tensor).
        for tensor in &mut work {
            tensor.trace_internal();
        }
        for tensor in &work {
            if tensor.legs.is_empty() {
                scalar *= tensor.data[0];
            }
        }
        work.retain(|t| !t.legs.is_empty());

        // Pairwise contraction until no bonds remain.
        loop {
            let Some((i, j)) = pick_pair(&work, order) else {
                break;
            };
            let (first, second) = if i < j { (i, j) } else { (j, i) };
            let b = work.swap_remove(second);
            let a = work.swap_remove(first);
            let mut merged = contract_pair(&a, &b);
            merged.trace_internal();
            if merged.legs.is_empty() {
                scalar *= merged.data[0];
            } else {
                work.push(merged);
            }
        }

        // Disconnected components combine by outer product, deterministically
        // by original placement id.
        work.sort_by_key(|t| t.origin);
        let mut result = match work.split_first() {
            None => WorkTensor::scalar(scalar),
            Some((first, rest)) => {
                let mut acc = first.clone();
                for tensor in rest {
                    acc = contract_pair(&acc, tensor);
                }
                acc.scale(scalar);
                acc
            }
        };

        // Permute to the output-mode order.
        if !self.output_modes.is_empty() {
            let perm: Vec<usize> = self
                .output_modes
                .iter()
                .map(|mode| {
                    result
                        .legs
                        .iter()
                        .position(|leg| *leg == LegTag::Open(*mode))
                        .ok_or_else(|| {
                            NetSimError::InvariantViolation(format!(
                                "network {}: open leg {mode:?} lost during evaluation",
                                self.name
                            ))
                        })
                })
                .collect::<Result<_>>()?;
            result = result.permute(&perm);
        }

        Tensor::new(format!("{}_result", self.name), result.extents, result.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegTag {
    Open(LegRef),
    Bond(usize),
}

#[derive(Debug, Clone)]
struct WorkTensor {
    extents: Extents,
    data: Vec<Complex64>,
    legs: Vec<LegTag>,
    origin: usize,
}

fn strides(extents: &[usize]) -> SmallVec<[usize; 8]> {
    let mut out: SmallVec<[usize; 8]> = SmallVec::with_capacity(extents.len());
    let mut acc = 1;
    for &e in extents {
        out.push(acc);
        acc *= e;
    }
    out
}

impl WorkTensor {
    fn scalar(value: Complex64) -> Self {
        Self {
            extents: Extents::new(),
            data: vec![value],
            legs: Vec::new(),
            origin: 0,
        }
    }

    fn scale(&mut self, factor: Complex64) {
        for v in &mut self.data {
            *v *= factor;
        }
    }

    /// Contract every bond that appears twice on this tensor.
    fn trace_internal(&mut self) {
        loop {
            let mut dup: Option<(usize, usize)> = None;
            'outer: for (i, leg) in self.legs.iter().enumerate() {
                if let LegTag::Bond(b) = leg {
                    for (j, other) in self.legs.iter().enumerate().skip(i + 1) {
                        if *other == LegTag::Bond(*b) {
                            dup = Some((i, j));
                            break 'outer;
                        }
                    }
                }
            }
            let Some((i, j)) = dup else { return };
            let old_strides = strides(&self.extents);
            let kept: Vec<usize> = (0..self.legs.len()).filter(|&l| l != i && l != j).collect();
            let new_extents: Extents = kept.iter().map(|&l| self.extents[l]).collect();
            let new_volume: usize = new_extents.iter().product::<usize>().max(1);
            let mut new_data = vec![Complex64::new(0.0, 0.0); new_volume];
            let new_strides = strides(&new_extents);
            for (flat, value) in new_data.iter_mut().enumerate() {
                let mut base = 0usize;
                for (pos, &leg) in kept.iter().enumerate() {
                    let digit = (flat / new_strides[pos]) % new_extents[pos];
                    base += digit * old_strides[leg];
                }
                let mut acc = Complex64::new(0.0, 0.0);
                for k in 0..self.extents[i] {
                    acc += self.data[base + k * old_strides[i] + k * old_strides[j]];
                }
                *value = acc;
            }
            self.legs = kept.iter().map(|&l| self.legs[l]).collect();
            self.extents = new_extents;
            self.data = new_data;
        }
    }

    fn permute(&self, perm: &[usize]) -> Self {
        let old_strides = strides(&self.extents);
        let new_extents: Extents = perm.iter().map(|&l| self.extents[l]).collect();
        let new_strides = strides(&new_extents);
        let mut new_data = vec![Complex64::new(0.0, 0.0); self.data.len()];
        for (flat, value) in new_data.iter_mut().enumerate() {
            let mut old_flat = 0usize;
            for (pos, &leg) in perm.iter().enumerate() {
                let digit = (flat / new_strides[pos]) % new_extents[pos];
                old_flat += digit * old_strides[leg];
            }
            *value = self.data[old_flat];
        }
        Self {
            extents: new_extents,
            data: new_data,
            legs: perm.iter().map(|&l| self.legs[l]).collect(),
            origin: self.origin,
        }
    }
}

fn shared_bonds(a: &WorkTensor, b: &WorkTensor) -> Vec<(usize, usize)> {
    let mut shared = Vec::new();
    for (i, leg) in a.legs.iter().enumerate() {
        if let LegTag::Bond(bond) = leg {
            if let Some(j) = b.legs.iter().position(|l| *l == LegTag::Bond(*bond)) {
                shared.push((i, j));
            }
        }
    }
    shared
}

/// Contract two tensors over all their shared bonds (outer product when
/// disjoint). Free legs of `a` precede free legs of `b` in the result.
fn contract_pair(a: &WorkTensor, b: &WorkTensor) -> WorkTensor {
    let shared = shared_bonds(a, b);
    let a_strides = strides(&a.extents);
    let b_strides = strides(&b.extents);
    let a_free: Vec<usize> = (0..a.legs.len())
        .filter(|l| !shared.iter().any(|&(i, _)| i == *l))
        .collect();
    let b_free: Vec<usize> = (0..b.legs.len())
        .filter(|l| !shared.iter().any(|&(_, j)| j == *l))
        .collect();

    let mut extents: Extents = a_free.iter().map(|&l| a.extents[l]).collect();
    extents.extend(b_free.iter().map(|&l| b.extents[l]));
    let legs: Vec<LegTag> = a_free
        .iter()
        .map(|&l| a.legs[l])
        .chain(b_free.iter().map(|&l| b.legs[l]))
        .collect();

    // Flat offsets of every summed multi-index, precomputed once.
    let shared_extents: SmallVec<[usize; 8]> = shared.iter().map(|&(i, _)| a.extents[i]).collect();
    let shared_volume: usize = shared_extents.iter().product::<usize>().max(1);
    let mut offsets = Vec::with_capacity(shared_volume);
    for s in 0..shared_volume {
        let mut off_a = 0usize;
        let mut off_b = 0usize;
        let mut rest = s;
        for (k, &(i, j)) in shared.iter().enumerate() {
            let digit = rest % shared_extents[k];
            rest /= shared_extents[k];
            off_a += digit * a_strides[i];
            off_b += digit * b_strides[j];
        }
        offsets.push((off_a, off_b));
    }

    let volume: usize = extents.iter().product::<usize>().max(1);
    let result_strides = strides(&extents);
    let mut data = vec![Complex64::new(0.0, 0.0); volume];
    for (flat, value) in data.iter_mut().enumerate() {
        let mut base_a = 0usize;
        let mut base_b = 0usize;
        for (pos, &leg) in a_free.iter().enumerate() {
            let digit = (flat / result_strides[pos]) % extents[pos];
            base_a += digit * a_strides[leg];
        }
        for (pos, &leg) in b_free.iter().enumerate() {
            let slot = a_free.len() + pos;
            let digit = (flat / result_strides[slot]) % extents[slot];
            base_b += digit * b_strides[leg];
        }
        let mut acc = Complex64::new(0.0, 0.0);
        for &(off_a, off_b) in &offsets {
            acc += a.data[base_a + off_a] * b.data[base_b + off_b];
        }
        *value = acc;
    }

    WorkTensor {
        extents,
        data,
        legs,
        origin: a.origin.min(b.origin),
    }
}

/// Choose the next pair to contract, or `None` when no bonds remain.
fn pick_pair(work: &[WorkTensor], order: ContractionOrder) -> Option<(usize, usize)> {
    let mut best: Option<((usize, usize), (usize, usize, usize))> = None;
    for i in 0..work.len() {
        for j in (i + 1)..work.len() {
            let shared = shared_bonds(&work[i], &work[j]);
            if shared.is_empty() {
                continue;
            }
            let cut: usize = shared.iter().map(|&(l, _)| work[i].extents[l]).product();
            let volume = work[i].data.len() / cut * (work[j].data.len() / cut);
            let key = match order {
                ContractionOrder::Dummy => (work[i].origin.min(work[j].origin), 0, 0),
                ContractionOrder::Heuro => (usize::MAX - shared.len(), volume, work[i].origin),
                ContractionOrder::Greed => (volume, work[i].origin, work[j].origin),
            };
            if best.is_none() || key < best.as_ref().unwrap().1 {
                best = Some(((i, j), key));
            }
        }
    }
    best.map(|(pair, _)| pair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{gate_name, BELL, CNOT, KET_0, PAULI_I, PAULI_X};

    const OUT: LegDirection = LegDirection::Outward;
    const IN: LegDirection = LegDirection::Inward;

    fn store() -> TensorStore {
        TensorStore::new()
    }

    #[test]
    fn prepare_is_idempotent_on_name() {
        let mut s = store();
        let first = s.prepare_pure("psi", &KET_0).unwrap();
        let second = s
            .prepare_pure("psi", &[Complex64::new(0.5, 0.0), Complex64::new(0.5, 0.0)])
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(approx_eq(second.data()[0], Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn canonical_gate_ignores_user_data() {
        let mut s = store();
        let garbage = vec![Complex64::new(9.0, 9.0); 16];
        let gate = s.prepare_gate(&gate_name("CNOT"), &garbage).unwrap();
        assert_eq!(gate.data(), CNOT.as_slice());
    }

    #[test]
    fn data_length_mismatch_is_fatal() {
        let mut s = store();
        let err = s.prepare_tensor("bad", &[2, 2], &KET_0).unwrap_err();
        assert!(matches!(err, NetSimError::InvariantViolation(_)));
    }

    #[test]
    fn operation_tensor_gets_selector_leg() {
        let mut s = store();
        let op = s
            .prepare_operation("op", &[PAULI_I.clone(), PAULI_X.clone()])
            .unwrap();
        assert_eq!(op.extents(), &[2, 2, 2]);
        assert_eq!(op.volume(), 8);
    }

    /// A single |0⟩ contracted against itself through nothing is just |0⟩.
    #[test]
    fn evaluate_single_placement() {
        let mut s = store();
        let ket = s.prepare_pure("k0", &KET_0).unwrap();
        let mut net = TensorNetwork::new("n");
        net.append_tensor(1, ket, &[], &[OUT], false).unwrap();
        let result = net.evaluate(ContractionOrder::Greed).unwrap();
        assert_eq!(result.extents(), &[2]);
        assert!(approx_eq(result.data()[0], Complex64::new(1.0, 0.0)));
    }

    /// ⟨ψ|ψ⟩ of the Bell state via a ket placement bonded to its conjugate.
    #[test]
    fn evaluate_inner_product_is_scalar_one() {
        let mut s = store();
        let bell = s.prepare_pure("bell", &BELL).unwrap();
        let mut net = TensorNetwork::new("n");
        net.append_tensor(1, Arc::clone(&bell), &[], &[OUT, OUT], false)
            .unwrap();
        net.append_tensor(2, bell, &[(0, 0), (1, 1)], &[IN, IN], true)
            .unwrap();
        assert_eq!(net.rank(), 0);
        let result = net.evaluate(ContractionOrder::Greed).unwrap();
        assert_eq!(result.volume(), 1);
        assert!(approx_eq(result.data()[0], Complex64::new(1.0, 0.0)));
    }

    /// H|0⟩ = |+⟩ exercises gate pairing: state leg into input leg 0.
    #[test]
    fn evaluate_applies_gate_through_pairing() {
        let mut s = store();
        let ket = s.prepare_pure("k0", &KET_0).unwrap();
        let h = s.prepare_gate(&gate_name("H"), &[]).unwrap();
        let mut net = TensorNetwork::new("n");
        net.append_tensor(1, ket, &[], &[OUT], false).unwrap();
        net.append_tensor(2, h, &[(0, 0)], &[IN, OUT], false).unwrap();
        let result = net.evaluate(ContractionOrder::Greed).unwrap();
        let amp = std::f64::consts::FRAC_1_SQRT_2;
        assert!(approx_eq(result.data()[0], Complex64::new(amp, 0.0)));
        assert!(approx_eq(result.data()[1], Complex64::new(amp, 0.0)));
    }

    /// CNOT(q0, q1) with control q1: H on q1 then CNOT builds a Bell state.
    #[test]
    fn evaluate_builds_bell_state() {
        let mut s = store();
        let mut zeros = vec![Complex64::new(0.0, 0.0); 4];
        zeros[0] = Complex64::new(1.0, 0.0);
        let k00 = s.prepare_pure("k00", &zeros).unwrap();
        let h = s.prepare_gate(&gate_name("H"), &[]).unwrap();
        let cnot = s.prepare_gate(&gate_name("CNOT"), &[]).unwrap();
        let mut net = TensorNetwork::new("n");
        net.append_tensor(1, k00, &[], &[OUT, OUT], false).unwrap();
        // H on qubit 1 (mode 1).
        net.append_tensor(2, h, &[(1, 0)], &[IN, OUT], false).unwrap();
        // CNOT on (q0, q1): q0 into input leg 0, q1 into input leg 1.
        let m0 = net.mode_of((1, 0)).unwrap();
        let m1 = net.mode_of((2, 1)).unwrap();
        net.append_tensor(3, cnot, &[(m0, 0), (m1, 1)], &[IN, IN, OUT, OUT], false)
            .unwrap();
        let order = [net.mode_of((3, 2)).unwrap(), net.mode_of((3, 3)).unwrap()];
        net.reorder_output_modes(&order).unwrap();
        let result = net.evaluate(ContractionOrder::Greed).unwrap();
        for (i, expected) in BELL.iter().enumerate() {
            assert!(
                approx_eq(result.data()[i], *expected),
                "amplitude {i}: {} vs {expected}",
                result.data()[i]
            );
        }
    }

    #[test]
    fn reorder_swaps_result_legs() {
        let mut s = store();
        let psi = s
            .prepare_pure(
                "psi",
                &[
                    Complex64::new(0.0, 0.0),
                    Complex64::new(1.0, 0.0),
                    Complex64::new(0.0, 0.0),
                    Complex64::new(0.0, 0.0),
                ],
            )
            .unwrap();
        let mut net = TensorNetwork::new("n");
        net.append_tensor(1, psi, &[], &[OUT, OUT], false).unwrap();
        net.reorder_output_modes(&[1, 0]).unwrap();
        let result = net.evaluate(ContractionOrder::Greed).unwrap();
        // |q0=1, q1=0⟩ becomes flat index 2 after the swap.
        assert!(approx_eq(result.data()[2], Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn collapse_removes_fully_bonded_identity() {
        let mut s = store();
        let bell = s.prepare_pure("bell", &BELL).unwrap();
        let ident = s.prepare_gate(&gate_name("I"), &[]).unwrap();
        let mut net = TensorNetwork::new("n");
        net.append_tensor(1, Arc::clone(&bell), &[], &[OUT, OUT], false)
            .unwrap();
        net.append_tensor(2, bell, &[], &[IN, IN], true).unwrap();
        // Trace loops over both qubits, each through an identity.
        net.append_tensor(3, Arc::clone(&ident), &[(0, 0), (2, 1)], &[IN, OUT], false)
            .unwrap();
        net.append_tensor(4, ident, &[(0, 0), (1, 1)], &[IN, OUT], false)
            .unwrap();
        let before = net.num_tensors();
        let removed = net.collapse_isometries();
        assert_eq!(removed, 2);
        assert_eq!(net.num_tensors(), before - 2);
        // tr(ρ) survives the rewiring.
        let result = net.evaluate(ContractionOrder::Greed).unwrap();
        assert!(approx_eq(result.data()[0], Complex64::new(1.0, 0.0)));
    }

    #[test]
    fn evaluate_is_idempotent_on_scalar_networks() {
        let mut s = store();
        let bell = s.prepare_pure("bell", &BELL).unwrap();
        let mut net = TensorNetwork::new("n");
        net.append_tensor(1, Arc::clone(&bell), &[], &[OUT, OUT], false)
            .unwrap();
        net.append_tensor(2, bell, &[(0, 0), (1, 1)], &[IN, IN], true)
            .unwrap();
        let first = net.evaluate(ContractionOrder::Greed).unwrap();
        let second = net.evaluate(ContractionOrder::Greed).unwrap();
        assert_eq!(first.data(), second.data());
    }

    #[test]
    fn optimizers_agree_on_the_result() {
        let mut s = store();
        let bell = s.prepare_pure("bell", &BELL).unwrap();
        let h = s.prepare_gate(&gate_name("H"), &[]).unwrap();
        let mut net = TensorNetwork::new("n");
        net.append_tensor(1, bell, &[], &[OUT, OUT], false).unwrap();
        net.append_tensor(2, h, &[(0, 0)], &[IN, OUT], false).unwrap();
        let greed = net.evaluate(ContractionOrder::Greed).unwrap();
        let dummy = net.evaluate(ContractionOrder::Dummy).unwrap();
        let heuro = net.evaluate(ContractionOrder::Heuro).unwrap();
        for i in 0..greed.volume() {
            assert!(approx_eq(greed.data()[i], dummy.data()[i]));
            assert!(approx_eq(greed.data()[i], heuro.data()[i]));
        }
    }

    #[test]
    fn unknown_optimizer_falls_back_to_greed() {
        assert_eq!(ContractionOrder::from_name("metis"), ContractionOrder::Greed);
        assert_eq!(ContractionOrder::from_name("cutnn"), ContractionOrder::Greed);
        assert_eq!(ContractionOrder::from_name("dummy"), ContractionOrder::Dummy);
    }
}
