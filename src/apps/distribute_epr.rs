//! EPR distribution protocol.
//!
//! The source generates the Bell pair locally under its own name space,
//! resigns the destination qubit from its memory, and announces the pair
//! over the classical link as `<qsrc>.<qdst>`. The destination adopts the
//! qubit into its memory and charges the channel's depolarization against
//! it. Every other protocol builds on this one; the stack helper installs a
//! source/destination pair per directed edge.

use std::any::Any;
use std::net::Ipv6Addr;
use tracing::info;

use crate::apps::{node_endpoint, split_fields, AppSignal, Application};
use crate::basis::DELIM;
use crate::channel::QuantumChannel;
use crate::kernel::{AppId, Simulation};
use crate::Result;

/// Source role: generates and distributes pairs on request.
#[derive(Debug)]
pub struct DistributeEprSrcApp {
    conn: QuantumChannel,
    epr: (String, String),
    peer: (Ipv6Addr, u16),
}

impl DistributeEprSrcApp {
    /// `peer` is the destination app's endpoint.
    #[must_use]
    pub fn new(conn: QuantumChannel, peer: (Ipv6Addr, u16)) -> Self {
        Self {
            conn,
            epr: (String::new(), String::new()),
            peer,
        }
    }

    /// Generate the pair and announce it to the destination.
    fn generate_and_distribute(&mut self, sim: &mut Simulation) -> Result<()> {
        let moment = sim.now();
        sim.entity.generate_epr(&self.conn, &self.epr, moment)?;

        let qubit = self.epr.1.clone();
        info!(
            "distributing qubit named {qubit} of {} to {}",
            self.conn.src_owner(),
            self.conn.dst_owner()
        );
        // Resign the distributed qubit from the source.
        sim.entity.node_mut(self.conn.src_owner()).remove_qubit(&qubit);

        let payload = format!("{}{DELIM}{}", self.epr.0, qubit).into_bytes();
        let from = node_endpoint(sim, self.conn.src_owner(), 0)?;
        sim.send_packet(self.peer, from, payload);
        Ok(())
    }
}

impl Application for DistributeEprSrcApp {
    fn on_start(&mut self, _id: AppId, _sim: &mut Simulation) -> Result<()> {
        // Nothing to arm; the source only sends.
        Ok(())
    }

    fn on_signal(&mut self, _id: AppId, signal: AppSignal, sim: &mut Simulation) -> Result<()> {
        match signal {
            AppSignal::DistributeEpr { epr } => {
                if !epr.0.is_empty() || !epr.1.is_empty() {
                    self.epr = epr;
                }
                self.generate_and_distribute(sim)
            }
            other => {
                tracing::debug!("unhandled signal {other:?}");
                Ok(())
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Destination role: adopts announced qubits and applies channel noise.
#[derive(Debug)]
pub struct DistributeEprDstApp {
    conn: QuantumChannel,
    port: u16,
}

impl DistributeEprDstApp {
    /// `port` is this app's receive port, allocated from the destination
    /// node before construction.
    #[must_use]
    pub fn new(conn: QuantumChannel, port: u16) -> Self {
        Self { conn, port }
    }
}

impl Application for DistributeEprDstApp {
    fn on_start(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        let local = node_endpoint(sim, self.conn.dst_owner(), self.port)?;
        sim.bind(local.0, local.1, id)
    }

    fn on_packet(
        &mut self,
        _id: AppId,
        payload: &[u8],
        _from: (Ipv6Addr, u16),
        sim: &mut Simulation,
    ) -> Result<()> {
        let fields = split_fields(payload, 2)?;
        let epr = (fields[0].clone(), fields[1].clone());

        // Assign to the destination, then degrade over the channel.
        sim.entity
            .node_mut(self.conn.dst_owner())
            .add_qubit(epr.1.clone());
        let moment = sim.now();
        sim.entity.apply_depolar(&self.conn, &epr, moment)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
