//! Entanglement swapping over a chain of owners.
//!
//! Owner i shares an EPR pair with owner i+1. Every intermediate owner
//! performs a Bell-basis measurement on its two qubits (CNOT, H, measure
//! both), traces them out and reports the (z, x) digits to the last owner,
//! which XORs them into its correction flags. Once all N−2 reports arrived
//! it applies the X and Z corrections (or the identity) to its qubit.

use std::any::Any;
use std::net::Ipv6Addr;
use tracing::debug;

use crate::apps::{node_endpoint, parse_bit, AppSignal, Application};
use crate::basis::gate_name;
use crate::channel::QuantumChannel;
use crate::kernel::{AppId, SimCommand, SimEvent, Simulation};
use crate::phy_entity::Actor;
use crate::{NetSimError, Result};

/// Intermediate owner's Bell-measurement role.
#[derive(Debug)]
pub struct EntSwapSrcApp {
    conn: QuantumChannel,
    /// (qubit entangled toward the predecessor, toward the successor).
    qubits: (String, String),
    peer: (Ipv6Addr, u16),
}

impl EntSwapSrcApp {
    #[must_use]
    pub fn new(conn: QuantumChannel, qubits: (String, String), peer: (Ipv6Addr, u16)) -> Self {
        Self { conn, qubits, peer }
    }

    fn measure_and_send(&mut self, sim: &mut Simulation) -> Result<()> {
        let moment = sim.now();
        // The Bell-basis rotation itself is noiseless at the simulator level.
        sim.entity.apply_gate(
            &Actor::System,
            &gate_name("CNOT"),
            None,
            &[self.qubits.1.clone(), self.qubits.0.clone()],
            moment,
        )?;
        sim.entity.apply_gate(
            &Actor::System,
            &gate_name("H"),
            None,
            &[self.qubits.0.clone()],
            moment,
        )?;

        let actor = Actor::Owner(self.conn.src_owner().to_string());
        let (z, _) = sim.entity.measure(&actor, &self.qubits.0, moment)?;
        debug!("former qubit measured to z = {z}");
        let (x, _) = sim.entity.measure(&actor, &self.qubits.1, moment)?;
        debug!("latter qubit measured to x = {x}");

        sim.schedule_now(SimEvent::Command(SimCommand::PartialTrace {
            qubits: vec![self.qubits.0.clone(), self.qubits.1.clone()],
        }));

        let payload = format!("{z}{x}").into_bytes();
        let from = node_endpoint(sim, self.conn.src_owner(), 0)?;
        sim.send_packet(self.peer, from, payload);
        Ok(())
    }
}

impl Application for EntSwapSrcApp {
    fn on_start(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        sim.schedule_now(SimEvent::AppSignal(id, AppSignal::MeasureAndSend));
        Ok(())
    }

    fn on_signal(&mut self, _id: AppId, signal: AppSignal, sim: &mut Simulation) -> Result<()> {
        match signal {
            AppSignal::MeasureAndSend => self.measure_and_send(sim),
            other => {
                debug!("unhandled signal {other:?}");
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

/// Last owner's correction role.
#[derive(Debug)]
pub struct EntSwapDstApp {
    owner: String,
    qubit: String,
    /// Reports still outstanding.
    count: usize,
    flag_x: bool,
    flag_z: bool,
    port: u16,
}

impl EntSwapDstApp {
    #[must_use]
    pub fn new(owner: impl Into<String>, qubit: impl Into<String>, count: usize, port: u16) -> Self {
        Self {
            owner: owner.into(),
            qubit: qubit.into(),
            count,
            flag_x: false,
            flag_z: false,
            port,
        }
    }
}

impl Application for EntSwapDstApp {
    fn on_start(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        let local = node_endpoint(sim, &self.owner, self.port)?;
        sim.bind(local.0, local.1, id)
    }

    fn on_packet(
        &mut self,
        _id: AppId,
        payload: &[u8],
        _from: (Ipv6Addr, u16),
        sim: &mut Simulation,
    ) -> Result<()> {
        if payload.len() < 2 {
            return Err(NetSimError::MalformedMessage(
                "swap report payload needs two digits".to_string(),
            ));
        }
        self.flag_z ^= parse_bit(payload[0])? == 1;
        self.flag_x ^= parse_bit(payload[1])? == 1;
        self.count -= 1;
        if self.count > 0 {
            return Ok(());
        }

        let actor = Actor::Owner(self.owner.clone());
        let moment = sim.now();
        let x_correction = if self.flag_x { gate_name("PX") } else { gate_name("I") };
        sim.entity
            .apply_gate(&actor, &x_correction, None, &[self.qubit.clone()], moment)?;
        let z_correction = if self.flag_z { gate_name("PZ") } else { gate_name("I") };
        sim.entity
            .apply_gate(&actor, &z_correction, None, &[self.qubit.clone()], moment)?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
