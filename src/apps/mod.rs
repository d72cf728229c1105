//! # Protocol Applications
//!
//! Each protocol is a state machine realized as an [`Application`] installed
//! on an owner's node. Applications are driven by three kinds of events:
//!
//! - their start event (arming sockets and, for source roles, dispatching
//!   the initial schedule),
//! - typed [`AppSignal`]s they schedule onto themselves or onto peer apps,
//! - classical packet deliveries routed through their bound socket.
//!
//! All payloads are ASCII with '.'-delimited fields; malformed payloads are
//! fatal. Protocols never block: waiting is always a scheduled callback.

use num_complex::Complex64;
use std::any::Any;
use std::net::Ipv6Addr;
use tracing::debug;

use crate::basis::DELIM;
use crate::kernel::{AppId, Simulation};
use crate::{NetSimError, Result};

pub mod distill;
pub mod distill_nested;
pub mod distill_nested_adapt;
pub mod distribute_epr;
pub mod ent_swap;
pub mod ent_swap_adapt;
pub mod ent_swap_adapt_local;
pub mod telep;
pub mod telep_adapt;
pub mod telep_lin_adapt;

pub use distill::DistillApp;
pub use distill_nested::DistillNestedApp;
pub use distill_nested_adapt::DistillNestedAdaptApp;
pub use distribute_epr::{DistributeEprDstApp, DistributeEprSrcApp};
pub use ent_swap::{EntSwapDstApp, EntSwapSrcApp};
pub use ent_swap_adapt::EntSwapAdaptApp;
pub use ent_swap_adapt_local::EntSwapAdaptLocalApp;
pub use telep::{TelepDstApp, TelepSrcApp};
pub use telep_adapt::TelepAdaptApp;
pub use telep_lin_adapt::TelepLinAdaptApp;

/// Typed events applications schedule onto themselves and their peers.
#[derive(Debug, Clone)]
pub enum AppSignal {
    /// Ask an EPR source app to generate and distribute a pair.
    DistributeEpr { epr: (String, String) },
    /// Begin a teleportation round.
    Teleport,
    /// Bell-measure the local qubits and report the outcome bits.
    MeasureAndSend,
    /// Recursively schedule the distillation of a pair list.
    Distillate {
        src: Vec<String>,
        dst: Vec<String>,
    },
    /// Distill the two halves of a pair list into its first pair.
    DistillateOnce {
        src: Vec<String>,
        dst: Vec<String>,
    },
    /// Measure the local parity and send the outcome digit.
    SendParity,
    /// Run the coherent entanglement-swapping schedule.
    EntanglementSwapping,
    /// Measure the accumulated success flag.
    MeasureFlag,
    /// Trigger the successor hop of a teleportation chain.
    SendTrigger,
    /// Collect final results into the application.
    Finish,
}

/// Kernel-facing interface of a protocol application.
pub trait Application {
    /// Arm sockets and dispatch the initial schedule.
    ///
    /// # Errors
    ///
    /// Fatal errors abort the run.
    fn on_start(&mut self, id: AppId, sim: &mut Simulation) -> Result<()>;

    /// Handle a typed signal.
    ///
    /// # Errors
    ///
    /// Fatal errors abort the run.
    fn on_signal(&mut self, _id: AppId, signal: AppSignal, _sim: &mut Simulation) -> Result<()> {
        debug!("unhandled signal {signal:?}");
        Ok(())
    }

    /// Handle a delivered classical payload.
    ///
    /// # Errors
    ///
    /// Malformed payloads are fatal.
    fn on_packet(
        &mut self,
        _id: AppId,
        _payload: &[u8],
        _from: (Ipv6Addr, u16),
        _sim: &mut Simulation,
    ) -> Result<()> {
        Ok(())
    }

    /// Downcast support for result inspection after a run.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support for reconfiguration between runs.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// An input qubit handed to a teleportation source: a state vector and the
/// name it is generated under.
#[derive(Debug, Clone)]
pub struct Qubit {
    state_vector: Vec<Complex64>,
    name: String,
}

impl Qubit {
    #[must_use]
    pub fn new(state_vector: Vec<Complex64>, name: impl Into<String>) -> Self {
        Self {
            state_vector,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn state_vector(&self) -> &[Complex64] {
        &self.state_vector
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Split a '.'-delimited ASCII payload into exactly `expected` fields.
///
/// # Errors
///
/// [`NetSimError::MalformedMessage`] on non-UTF-8 payloads or a wrong field
/// count; classical transport is assumed perfect, so there are no retries.
pub fn split_fields(payload: &[u8], expected: usize) -> Result<Vec<String>> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| NetSimError::MalformedMessage("payload is not ASCII".to_string()))?;
    let fields: Vec<String> = text
        .trim_end_matches('\0')
        .split(DELIM)
        .map(str::to_string)
        .collect();
    if fields.len() != expected {
        return Err(NetSimError::MalformedMessage(format!(
            "expected {expected} field(s), got {} in \"{text}\"",
            fields.len()
        )));
    }
    Ok(fields)
}

/// Parse a single ASCII outcome digit.
///
/// # Errors
///
/// [`NetSimError::MalformedMessage`] unless the byte is '0' or '1'.
pub fn parse_bit(byte: u8) -> Result<u8> {
    match byte {
        b'0' => Ok(0),
        b'1' => Ok(1),
        other => Err(NetSimError::MalformedMessage(format!(
            "expected an outcome digit, got byte {other:#x}"
        ))),
    }
}

/// The classical endpoint of an owner's node, used as a packet source.
///
/// # Errors
///
/// [`NetSimError::Network`] when the owner has no address yet.
pub fn node_endpoint(sim: &Simulation, owner: &str, port: u16) -> Result<(Ipv6Addr, u16)> {
    let address = sim.entity.node(owner).address().ok_or_else(|| {
        NetSimError::Network(format!("owner {owner} has no address assigned"))
    })?;
    Ok((address, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_fields_validates_the_count() {
        let fields = split_fields(b"A0.B0", 2).unwrap();
        assert_eq!(fields, vec!["A0".to_string(), "B0".to_string()]);
        assert!(split_fields(b"A0.B0", 3).is_err());
        assert!(split_fields(b"A0", 2).is_err());
    }

    #[test]
    fn split_fields_tolerates_trailing_nul() {
        let fields = split_fields(b"1.Bg.Bm\0", 3).unwrap();
        assert_eq!(fields[0], "1");
        assert_eq!(fields[2], "Bm");
    }

    #[test]
    fn parse_bit_rejects_non_digits() {
        assert_eq!(parse_bit(b'0').unwrap(), 0);
        assert_eq!(parse_bit(b'1').unwrap(), 1);
        assert!(parse_bit(b'w').is_err());
    }
}
