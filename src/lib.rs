//! # Quantum Netsim - Discrete-Event Simulation of Quantum Networks
//!
//! A discrete-event simulator for quantum communication networks. A driver
//! builds a multi-node topology, installs quantum applications
//! (entanglement distribution, teleportation, entanglement swapping,
//! distillation and their adaptive variants) on the nodes, and runs a
//! virtual-clock simulation that interleaves classical packet exchange with
//! the evolution of a shared quantum state. Each experiment reports the
//! final reduced density matrix of selected qubits and the fidelity of
//! entangled pairs against the ideal Bell state.
//!
//! ## 🔬 Core Subsystems
//!
//! - **Quantum state engine** ([`engine`]): an incrementally built tensor
//!   network representing a density operator ρ over a dynamically growing
//!   set of named qubits. Qubit allocation, unitary gates, mixed-unitary
//!   channels, projective measurement with outcome sampling, partial trace,
//!   and eager or deferred contraction, all under a strict ket-half /
//!   bra-half structural invariant, so ρ's Hermiticity is structural rather
//!   than numerical.
//! - **Protocol scheduler** ([`kernel`], [`apps`]): a single-threaded
//!   discrete-event loop driving application state machines that exchange
//!   classical packets over a simulated IPv6 link while mutating the shared
//!   quantum state.
//!
//! ## 🏗️ Layering
//!
//! [`basis`] (constants and canonical gate data) → [`tensor`] (store,
//! network builder and contraction engine) → [`engine`] (density-matrix
//! circuit) → [`phy_entity`] (access control and error-model wiring, with
//! [`error_model`], [`node`] and [`channel`]) → [`kernel`] (virtual clock,
//! sockets and link) → [`apps`] (protocols) → [`stack`] (topology wiring).
//!
//! ## ⚡ Determinism
//!
//! Given a fixed seed for measurement sampling, a fixed scheduling order
//! and a fixed contraction order, a run is bit-exact reproducible. The
//! kernel owns every piece of state by value on one thread; there are no
//! locks and nothing is shared across OS threads.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quantum_netsim::kernel::{Simulation, SimulationConfig};
//! use quantum_netsim::phy_entity::{Actor, QuantumPhyEntity};
//! use quantum_netsim::stack::{assign_addresses, QuantumNetStackHelper};
//!
//! fn main() -> quantum_netsim::Result<()> {
//!     quantum_netsim::logging::init();
//!
//!     let mut entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
//!     assign_addresses(&mut entity);
//!     let mut sim = Simulation::new(entity, &SimulationConfig::default());
//!     QuantumNetStackHelper::new().install(&mut sim)?;
//!
//!     // ... install protocol apps, then:
//!     sim.run()?;
//!     let dm = sim.entity.peek_dm(&Actor::System, &["A0".into(), "B0".into()])?;
//!     println!("{} entries", dm.len());
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod apps;
pub mod basis;
pub mod channel;
pub mod engine;
pub mod error_model;
pub mod kernel;
pub mod logging;
pub mod node;
pub mod operation;
pub mod phy_entity;
pub mod stack;
pub mod tensor;

pub use channel::QuantumChannel;
pub use engine::QuantumNetworkSimulator;
pub use kernel::{AppId, LinkConfig, SimCommand, SimEvent, Simulation, SimulationConfig};
pub use node::{QuantumMemory, QuantumNode};
pub use operation::QuantumOperation;
pub use phy_entity::{Actor, QuantumPhyEntity};

/// Error taxonomy of the simulator.
///
/// Two families exist. *Fatal* conditions (structural invariant violations,
/// malformed classical payloads, imaginary probabilities, double
/// generation) abort the run as `Err`. *Recoverable* refusals (an actor
/// referencing a qubit it does not own, an operation on an already-traced
/// qubit) never reach this type: the offending method logs at the logic
/// level and returns `Ok(false)`, and protocols treat the refused sub-event
/// as a no-op.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum NetSimError {
    /// Structural invariant broken (extent/data mismatch, lost legs).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A qubit name was generated twice.
    #[error("qubit {0} generated twice")]
    DuplicateQubit(String),

    /// A scalar that must be a probability or fidelity is not one.
    #[error("measurement error: {0}")]
    Measurement(String),

    /// A classical payload failed to parse. No retries, no timeouts.
    #[error("malformed classical message: {0}")]
    MalformedMessage(String),

    /// A value-returning operation referenced a traced-out qubit.
    #[error("stale qubit: {0}")]
    StaleQubit(String),

    /// A value-returning operation was refused by access control.
    #[error("access refused: {0}")]
    AccessRefused(String),

    /// Simulated network misconfiguration (unbound endpoint, no address).
    #[error("network error: {0}")]
    Network(String),

    /// Topology or protocol wiring error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, NetSimError>;
