//! # Physical Entity - Access Control and Error-Model Wiring
//!
//! The entity owns the quantum engine, every node, and all error-model
//! tables. Protocols never talk to the engine directly: each entity method
//! first enforces ownership, then applies the error models the operation
//! incurs, then forwards to the engine.
//!
//! Access control is actor-based: [`Actor::Owner`] must own every qubit it
//! names (violations return `false` with a logic log), while
//! [`Actor::System`] bypasses the check entirely. System is how
//! simulator-level reductions (the coherent controlled corrections of the
//! adaptive protocols) mutate qubits spread across several owners.

use num_complex::Complex64;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use crate::basis::{BELL, QNS_ANCILLA_PREFIX};
use crate::channel::QuantumChannel;
use crate::engine::QuantumNetworkSimulator;
use crate::error_model::{
    ErrorModel, DEFAULT_DEPOLAR_FIDELITY, DEFAULT_GATE_RATE, DEFAULT_TIME_RATE,
};
use crate::kernel::AppId;
use crate::node::QuantumNode;
use crate::operation::QuantumOperation;
use crate::{NetSimError, Result};

/// Reserved owner name that maps to [`Actor::System`].
pub const GOD: &str = "God";

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(0);

/// Who is asking for a quantum operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// The simulator itself; bypasses ownership checks and gate noise.
    System,
    /// A named party; must own every qubit it operates on.
    Owner(String),
}

impl Actor {
    /// Actor for an owner name, honoring the reserved name.
    #[must_use]
    pub fn named(owner: &str) -> Self {
        if owner == GOD {
            Self::System
        } else {
            Self::Owner(owner.to_string())
        }
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        matches!(self, Self::System)
    }

    /// The owner name, when there is one.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::System => None,
            Self::Owner(name) => Some(name),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "{GOD}"),
            Self::Owner(name) => write!(f, "{name}"),
        }
    }
}

/// Owner of the engine, the nodes and the error-model bindings of one
/// experiment.
#[derive(Debug)]
pub struct QuantumPhyEntity {
    qnetsim: QuantumNetworkSimulator,
    nodes: BTreeMap<String, QuantumNode>,
    conn2apps: BTreeMap<QuantumChannel, BTreeMap<String, (AppId, AppId)>>,
    qubit2time: HashMap<String, f64>,
    qubit2model: HashMap<String, ErrorModel>,
    node2model: HashMap<String, ErrorModel>,
    gate2model: HashMap<(String, String), ErrorModel>,
    conn2model: HashMap<(String, String), ErrorModel>,
    entity_id: u64,
    ancilla_count: u64,
}

impl QuantumPhyEntity {
    /// Create an entity with nodes for the given owners and a default seed.
    #[must_use]
    pub fn new(owners: &[&str]) -> Self {
        Self::with_seed(owners, 0)
    }

    /// Create an entity with an explicit RNG seed for outcome sampling.
    #[must_use]
    pub fn with_seed(owners: &[&str], seed: u64) -> Self {
        let mut nodes = BTreeMap::new();
        for owner in owners {
            if *owner != GOD {
                nodes.insert((*owner).to_string(), QuantumNode::new(*owner));
            }
        }
        Self {
            qnetsim: QuantumNetworkSimulator::new(seed),
            nodes,
            conn2apps: BTreeMap::new(),
            qubit2time: HashMap::new(),
            qubit2model: HashMap::new(),
            node2model: HashMap::new(),
            gate2model: HashMap::new(),
            conn2model: HashMap::new(),
            entity_id: NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed),
            ancilla_count: 0,
        }
    }

    /// The underlying engine (read access for diagnostics and tests).
    #[must_use]
    pub fn engine(&self) -> &QuantumNetworkSimulator {
        &self.qnetsim
    }

    /// Node of an owner.
    ///
    /// # Panics
    ///
    /// Panics for unregistered owners; topology wiring registers every node
    /// before any protocol touches it.
    #[must_use]
    pub fn node(&self, owner: &str) -> &QuantumNode {
        &self.nodes[owner]
    }

    /// Mutable node of an owner.
    pub fn node_mut(&mut self, owner: &str) -> &mut QuantumNode {
        self.nodes.get_mut(owner).expect("owner is registered")
    }

    /// Registered owner names, in order.
    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Allocate a fresh ancilla qubit name, collision-free across entities.
    pub fn alloc_ancilla(&mut self) -> String {
        let name = format!("{QNS_ANCILLA_PREFIX}{}_{}", self.entity_id, self.ancilla_count);
        self.ancilla_count += 1;
        name
    }

    /// Last virtual time a qubit was touched, if it was ever stamped.
    #[must_use]
    pub fn last_touched(&self, qubit: &str) -> Option<f64> {
        self.qubit2time.get(qubit).copied()
    }

    /// Whether the actor may operate on every named qubit.
    #[must_use]
    pub fn check_owned(&self, actor: &Actor, qubits: &[String]) -> bool {
        let Actor::Owner(owner) = actor else {
            return true;
        };
        let Some(node) = self.nodes.get(owner) else {
            debug!("unknown owner {owner}");
            return false;
        };
        for qubit in qubits {
            if !node.own_qubit(qubit) {
                debug!("{owner} skips on qubit named {qubit} owned by others");
                return false;
            }
        }
        true
    }

    /// Whether every named qubit is live in the engine.
    #[must_use]
    pub fn check_valid(&self, qubits: &[String]) -> bool {
        self.qnetsim.check_valid(qubits)
    }

    fn register_generated(&mut self, actor: &Actor, qubits: &[String], moment: f64) {
        for qubit in qubits {
            if let Actor::Owner(owner) = actor {
                self.nodes
                    .get_mut(owner)
                    .expect("owner is registered")
                    .add_qubit(qubit.clone());
            }
            let model = actor
                .owner()
                .and_then(|owner| self.node2model.get(owner).copied())
                .unwrap_or(ErrorModel::TimeDephase {
                    rate: DEFAULT_TIME_RATE,
                });
            self.set_error_model(model, qubit);
            self.qubit2time.insert(qubit.clone(), moment);
        }
    }

    /// Generate qubits in a pure state under an actor.
    ///
    /// Owners that already hold all the named qubits are refused with
    /// `Ok(false)` (the names are not fresh); an engine-level name collision
    /// is fatal.
    ///
    /// # Errors
    ///
    /// Propagates fatal engine errors (double generation, bad data length).
    pub fn generate_qubits_pure(
        &mut self,
        actor: &Actor,
        data: &[Complex64],
        qubits: &[String],
        moment: f64,
    ) -> Result<bool> {
        if !actor.is_system() && self.check_owned(actor, qubits) {
            debug!("{actor} already holds {qubits:?}; generation skipped");
            return Ok(false);
        }
        let succeeded = self
            .qnetsim
            .generate_qubits_pure(&actor.to_string(), data, qubits)?;
        self.register_generated(actor, qubits, moment);
        Ok(succeeded)
    }

    /// Generate qubits in a mixed state under an actor.
    ///
    /// # Errors
    ///
    /// Propagates fatal engine errors.
    pub fn generate_qubits_mixed(
        &mut self,
        actor: &Actor,
        data: &[Complex64],
        qubits: &[String],
        moment: f64,
    ) -> Result<bool> {
        if !actor.is_system() && self.check_owned(actor, qubits) {
            debug!("{actor} already holds {qubits:?}; generation skipped");
            return Ok(false);
        }
        let succeeded = self
            .qnetsim
            .generate_qubits_mixed(&actor.to_string(), data, qubits)?;
        self.register_generated(actor, qubits, moment);
        Ok(succeeded)
    }

    /// Apply a gate: time-dephase the operands, forward to the engine, then
    /// charge the per-gate dephasing (skipped for System).
    ///
    /// # Errors
    ///
    /// Propagates fatal engine errors; ownership and staleness refusals
    /// surface as `Ok(false)`.
    pub fn apply_gate(
        &mut self,
        actor: &Actor,
        gate: &str,
        data: Option<&[Complex64]>,
        qubits: &[String],
        moment: f64,
    ) -> Result<bool> {
        if !self.check_owned(actor, qubits) {
            return Ok(false);
        }
        for qubit in qubits {
            self.apply_time_error(qubit, moment)?;
        }
        let succeeded = self
            .qnetsim
            .apply_gate(&actor.to_string(), gate, data, qubits)?;
        if succeeded {
            if let Actor::Owner(owner) = actor {
                let owner = owner.clone();
                self.apply_gate_error(&owner, gate, qubits, moment)?;
            }
        }
        Ok(succeeded)
    }

    /// Apply a mixed-unitary operation, stamping the operands' clocks when a
    /// moment is given.
    ///
    /// # Errors
    ///
    /// Propagates fatal engine errors.
    pub fn apply_operation(
        &mut self,
        operation: &QuantumOperation,
        qubits: &[String],
        moment: Option<f64>,
    ) -> Result<bool> {
        let succeeded = self.qnetsim.apply_operation(operation, qubits)?;
        if let Some(moment) = moment {
            for qubit in qubits {
                self.qubit2time.insert(qubit.clone(), moment);
            }
        }
        Ok(succeeded)
    }

    /// Reduce a classically controlled correction to a coherent controlled
    /// gate, then charge the *original* gate's dephasing against the acting
    /// owner's targets.
    ///
    /// # Errors
    ///
    /// Propagates fatal engine errors.
    pub fn apply_controlled_operation(
        &mut self,
        orig_owner: &str,
        orig_gate: &str,
        gate: &str,
        data: Option<&[Complex64]>,
        control_qubits: &[String],
        target_qubits: &[String],
        moment: f64,
    ) -> Result<bool> {
        let succeeded = self.qnetsim.apply_controlled_operation(
            orig_owner,
            orig_gate,
            gate,
            data,
            control_qubits,
            target_qubits,
        )?;
        self.apply_gate_error(orig_owner, orig_gate, target_qubits, moment)?;
        Ok(succeeded)
    }

    /// Measure one qubit, applying pending time-dephasing to every live
    /// qubit first.
    ///
    /// # Errors
    ///
    /// [`NetSimError::AccessRefused`] when the actor does not own the qubit;
    /// fatal engine errors otherwise.
    pub fn measure(&mut self, actor: &Actor, qubit: &str, moment: f64) -> Result<(u8, [f64; 2])> {
        let named = [qubit.to_string()];
        if !self.check_owned(actor, &named) {
            return Err(NetSimError::AccessRefused(format!(
                "{actor} does not own {qubit}"
            )));
        }
        let live: Vec<String> = self.qnetsim.valid_qubits().to_vec();
        for q in &live {
            self.apply_time_error(q, moment)?;
        }
        self.qnetsim.measure(&actor.to_string(), qubit)
    }

    /// Reduced density matrix of the selected qubits.
    ///
    /// # Errors
    ///
    /// [`NetSimError::AccessRefused`] for non-owners; fatal engine errors.
    pub fn peek_dm(&mut self, actor: &Actor, qubits: &[String]) -> Result<Vec<Complex64>> {
        if !actor.is_system() && !self.check_owned(actor, qubits) {
            return Err(NetSimError::AccessRefused(format!(
                "{actor} does not own all of {qubits:?}"
            )));
        }
        self.qnetsim.peek_dm(&actor.to_string(), qubits)
    }

    /// Trace out qubits, time-dephasing them up to the moment first.
    ///
    /// # Errors
    ///
    /// Propagates fatal engine errors; staleness surfaces as `Ok(false)`.
    pub fn partial_trace(&mut self, qubits: &[String], moment: f64) -> Result<bool> {
        for qubit in qubits {
            self.apply_time_error(qubit, moment)?;
        }
        self.qnetsim.partial_trace(qubits)
    }

    /// Contract the live network into a single tensor.
    ///
    /// # Errors
    ///
    /// Propagates fatal engine errors.
    pub fn contract(&mut self, optimizer: Option<&str>) -> Result<Vec<Complex64>> {
        self.qnetsim.contract(optimizer)
    }

    /// Bound network growth between protocol rounds.
    ///
    /// # Errors
    ///
    /// Propagates fatal engine errors.
    pub fn checkpoint(&mut self) -> Result<()> {
        self.qnetsim.contract(None).map(|_| ())
    }

    /// Fidelity of an entangled pair against |Φ⁺⟩.
    ///
    /// # Errors
    ///
    /// Propagates fatal engine errors.
    pub fn calculate_fidelity(&mut self, pair: (&str, &str)) -> Result<f64> {
        self.qnetsim.calculate_fidelity(pair)
    }

    /// Generate the Bell pair of an EPR distribution under the channel's
    /// source owner.
    ///
    /// # Errors
    ///
    /// Propagates fatal engine errors.
    pub fn generate_epr(
        &mut self,
        conn: &QuantumChannel,
        epr: &(String, String),
        moment: f64,
    ) -> Result<bool> {
        debug!("generating EPR pair consisting of {} and {}", epr.0, epr.1);
        self.generate_qubits_pure(
            &Actor::Owner(conn.src_owner().to_string()),
            &BELL,
            &[epr.0.clone(), epr.1.clone()],
            moment,
        )
    }

    /* error-model wiring */

    /// Bind an error model to one qubit.
    pub fn set_error_model(&mut self, model: ErrorModel, qubit: &str) {
        debug!("setting error model {model} to qubit {qubit}");
        self.qubit2model.insert(qubit.to_string(), model);
    }

    /// Bind a time-dephasing model to every qubit an owner generates.
    pub fn set_time_model(&mut self, owner: &str, rate: f64) {
        let model = ErrorModel::TimeDephase { rate };
        debug!("setting {model} to node {owner}");
        self.node2model.insert(owner.to_string(), model);
    }

    /// Bind a per-gate dephasing model to (owner, gate).
    pub fn set_dephase_model(&mut self, owner: &str, gate: &str, rate: f64) {
        let model = ErrorModel::GateDephase { rate };
        debug!("setting {model} to gate {gate} of node {owner}");
        self.gate2model
            .insert((owner.to_string(), gate.to_string()), model);
    }

    /// Bind a depolarization model to a directed owner pair.
    pub fn set_depolar_model(&mut self, src: String, dst: String, fidelity: f64) {
        let model = ErrorModel::ChannelDepolar { fidelity };
        debug!("setting {model} to connection {src} <--> {dst}");
        self.conn2model.insert((src, dst), model);
    }

    /// The fidelity bound to a channel, or the default.
    #[must_use]
    pub fn depolar_fidelity(&self, conn: &QuantumChannel) -> f64 {
        self.conn2model
            .get(&(conn.src_owner().to_string(), conn.dst_owner().to_string()))
            .and_then(ErrorModel::fidelity)
            .unwrap_or(DEFAULT_DEPOLAR_FIDELITY)
    }

    /// Apply the pending time-dephasing of one qubit up to `moment`.
    fn apply_time_error(&mut self, qubit: &str, moment: f64) -> Result<()> {
        let Some(model) = self.qubit2model.get(qubit).copied() else {
            return Ok(());
        };
        model.apply(self, std::slice::from_ref(&qubit.to_string()), moment)
    }

    /// Charge a gate's dephasing cost against its operands.
    fn apply_gate_error(
        &mut self,
        owner: &str,
        gate: &str,
        qubits: &[String],
        moment: f64,
    ) -> Result<()> {
        let model = self
            .gate2model
            .get(&(owner.to_string(), gate.to_string()))
            .copied()
            .unwrap_or(ErrorModel::GateDephase {
                rate: DEFAULT_GATE_RATE,
            });
        for qubit in qubits {
            model.apply(self, std::slice::from_ref(qubit), moment)?;
        }
        Ok(())
    }

    /// Route the channel depolarization of a freshly distributed pair to its
    /// destination qubit.
    ///
    /// # Errors
    ///
    /// Propagates fatal engine errors.
    pub fn apply_depolar(
        &mut self,
        conn: &QuantumChannel,
        epr: &(String, String),
        moment: f64,
    ) -> Result<()> {
        debug!(
            "applying depolar error to EPR pair ({}, {}) over {conn}",
            epr.0, epr.1
        );
        let model = self
            .conn2model
            .get(&(conn.src_owner().to_string(), conn.dst_owner().to_string()))
            .copied()
            .unwrap_or(ErrorModel::ChannelDepolar {
                fidelity: DEFAULT_DEPOLAR_FIDELITY,
            });
        model.apply(self, std::slice::from_ref(&epr.1), moment)
    }

    /* topology wiring */

    /// Set an owner's classical address (once, during wiring).
    pub fn set_owner_address(&mut self, owner: &str, address: std::net::Ipv6Addr) {
        self.node_mut(owner).set_address(address);
    }

    /// Set an owner's topology rank (once, during wiring).
    pub fn set_owner_rank(&mut self, owner: &str, rank: u32) {
        self.node_mut(owner).set_rank(rank);
    }

    /// Register the app pair realizing a protocol over a channel.
    pub fn add_conn_apps(&mut self, conn: QuantumChannel, protocol: &str, apps: (AppId, AppId)) {
        info!("registering {protocol} apps for {conn}");
        self.conn2apps
            .entry(conn)
            .or_default()
            .insert(protocol.to_string(), apps);
    }

    /// Look up the app pair of a protocol over a channel.
    #[must_use]
    pub fn conn_apps(&self, conn: &QuantumChannel, protocol: &str) -> Option<(AppId, AppId)> {
        self.conn2apps
            .get(conn)
            .and_then(|per_protocol| per_protocol.get(protocol))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{gate_name, KET_0};

    fn q(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn named_actor_maps_reserved_name_to_system() {
        assert!(Actor::named("God").is_system());
        assert_eq!(
            Actor::named("Alice"),
            Actor::Owner("Alice".to_string())
        );
    }

    #[test]
    fn non_owner_gate_is_refused_with_false() {
        let mut entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
        entity
            .generate_qubits_pure(&Actor::named("Alice"), &KET_0, &q(&["A0"]), 0.0)
            .unwrap();
        let applied = entity
            .apply_gate(&Actor::named("Bob"), &gate_name("PX"), None, &q(&["A0"]), 0.0)
            .unwrap();
        assert!(!applied);
        // System bypasses the check.
        let applied = entity
            .apply_gate(&Actor::System, &gate_name("PX"), None, &q(&["A0"]), 0.0)
            .unwrap();
        assert!(applied);
    }

    #[test]
    fn regeneration_of_held_qubits_is_refused() {
        let mut entity = QuantumPhyEntity::new(&["Alice"]);
        let actor = Actor::named("Alice");
        assert!(entity
            .generate_qubits_pure(&actor, &KET_0, &q(&["A0"]), 0.0)
            .unwrap());
        assert!(!entity
            .generate_qubits_pure(&actor, &KET_0, &q(&["A0"]), 1.0)
            .unwrap());
    }

    #[test]
    fn ancilla_names_carry_the_entity_id() {
        let mut first = QuantumPhyEntity::new(&["Alice"]);
        let mut second = QuantumPhyEntity::new(&["Alice"]);
        let a = first.alloc_ancilla();
        let b = second.alloc_ancilla();
        assert!(a.starts_with(QNS_ANCILLA_PREFIX));
        assert_ne!(a, b);
        assert_ne!(first.alloc_ancilla(), a);
    }

    #[test]
    fn depolar_fidelity_defaults_and_binds() {
        let mut entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
        let conn = QuantumChannel::new("Alice", "Bob");
        assert!((entity.depolar_fidelity(&conn) - DEFAULT_DEPOLAR_FIDELITY).abs() < 1e-12);
        conn.set_depolar_model(0.93, &mut entity);
        assert!((entity.depolar_fidelity(&conn) - 0.93).abs() < 1e-12);
    }

    #[test]
    fn measure_by_non_owner_is_an_access_error() {
        let mut entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
        entity
            .generate_qubits_pure(&Actor::named("Alice"), &KET_0, &q(&["A0"]), 0.0)
            .unwrap();
        let err = entity.measure(&Actor::named("Bob"), "A0", 0.0).unwrap_err();
        assert!(matches!(err, NetSimError::AccessRefused(_)));
    }
}
