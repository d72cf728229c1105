//! One-shot teleportation.
//!
//! The source optionally generates the input state, requests an EPR
//! distribution, and after one pacing round applies CNOT and H locally,
//! measures both of its qubits and sends the two outcome digits (z first,
//! then x). The destination applies the X and Z corrections, substituting
//! the identity when a correction is not needed so that gate-noise
//! accounting still runs for both slots.

use std::any::Any;
use std::net::Ipv6Addr;
use tracing::debug;

use crate::apps::{node_endpoint, parse_bit, AppSignal, Application, Qubit};
use crate::basis::{gate_name, APP_DIST_EPR, LOCAL_OP_DELAY};
use crate::channel::QuantumChannel;
use crate::kernel::{AppId, SimCommand, SimEvent, Simulation};
use crate::phy_entity::Actor;
use crate::{NetSimError, Result};

/// Source role of the teleportation.
#[derive(Debug)]
pub struct TelepSrcApp {
    conn: QuantumChannel,
    /// Alice's qubits: (the state to teleport, her EPR half).
    qubits: (String, String),
    /// Bob's qubit receiving the state.
    qubit: String,
    input: Option<Qubit>,
    peer: (Ipv6Addr, u16),
}

impl TelepSrcApp {
    #[must_use]
    pub fn new(
        conn: QuantumChannel,
        qubits: (String, String),
        qubit: String,
        input: Option<Qubit>,
        peer: (Ipv6Addr, u16),
    ) -> Self {
        Self {
            conn,
            qubits,
            qubit,
            input,
            peer,
        }
    }

    fn teleport(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        debug!("teleport at time {:.6}s", sim.now());
        let src = Actor::Owner(self.conn.src_owner().to_string());

        if let Some(input) = &self.input {
            sim.schedule_now(SimEvent::Command(SimCommand::GeneratePure {
                actor: src.clone(),
                state: input.state_vector().to_vec(),
                qubits: vec![self.qubits.0.clone()],
            }));
        }

        let (epr_src, _) = sim
            .entity
            .conn_apps(&self.conn, APP_DIST_EPR)
            .ok_or_else(|| {
                NetSimError::Configuration(format!(
                    "no EPR distribution apps installed over {}",
                    self.conn
                ))
            })?;
        sim.schedule_now(SimEvent::AppSignal(
            epr_src,
            AppSignal::DistributeEpr {
                epr: (self.qubits.1.clone(), self.qubit.clone()),
            },
        ));

        // Local operations, one pacing round later.
        sim.schedule(
            LOCAL_OP_DELAY,
            SimEvent::Command(SimCommand::ApplyGate {
                actor: src.clone(),
                gate: gate_name("CNOT"),
                data: None,
                qubits: vec![self.qubits.1.clone(), self.qubits.0.clone()],
            }),
        );
        sim.schedule(
            LOCAL_OP_DELAY,
            SimEvent::Command(SimCommand::ApplyGate {
                actor: src,
                gate: gate_name("H"),
                data: None,
                qubits: vec![self.qubits.0.clone()],
            }),
        );
        sim.schedule(LOCAL_OP_DELAY, SimEvent::AppSignal(id, AppSignal::MeasureAndSend));
        Ok(())
    }

    /// Re-arm the source with fresh qubit names (repeat experiments).
    pub fn set_qubits(&mut self, qubits: (String, String)) {
        debug!("setting qubits {} {}", qubits.0, qubits.1);
        self.qubits = qubits;
    }

    /// Re-target the destination qubit (repeat experiments).
    pub fn set_qubit(&mut self, qubit: impl Into<String>) {
        self.qubit = qubit.into();
    }

    /// Replace the input state (repeat experiments).
    pub fn set_input(&mut self, input: Option<Qubit>) {
        self.input = input;
    }

    fn measure_and_send(&mut self, sim: &mut Simulation) -> Result<()> {
        let src = Actor::Owner(self.conn.src_owner().to_string());
        let moment = sim.now();
        let (z, _) = sim.entity.measure(&src, &self.qubits.0, moment)?;
        debug!("former qubit measured to z = {z}");
        let (x, _) = sim.entity.measure(&src, &self.qubits.1, moment)?;
        debug!("latter qubit measured to x = {x}");

        let payload = format!("{z}{x}").into_bytes();
        let from = node_endpoint(sim, self.conn.src_owner(), 0)?;
        sim.send_packet(self.peer, from, payload);
        Ok(())
    }
}

impl Application for TelepSrcApp {
    fn on_start(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        self.teleport(id, sim)
    }

    fn on_signal(&mut self, id: AppId, signal: AppSignal, sim: &mut Simulation) -> Result<()> {
        match signal {
            AppSignal::Teleport => self.teleport(id, sim),
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

/// Destination role of the teleportation.
#[derive(Debug)]
pub struct TelepDstApp {
    owner: String,
    qubit: String,
    port: u16,
}

impl TelepDstApp {
    #[must_use]
    pub fn new(owner: impl Into<String>, qubit: impl Into<String>, port: u16) -> Self {
        Self {
            owner: owner.into(),
            qubit: qubit.into(),
            port,
        }
    }

    /// Re-target the receiving qubit (repeat experiments).
    pub fn set_qubit(&mut self, qubit: impl Into<String>) {
        self.qubit = qubit.into();
    }
}

impl Application for TelepDstApp {
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
                "teleport outcome payload needs two digits".to_string(),
            ));
        }
        let z = parse_bit(payload[0])?;
        let x = parse_bit(payload[1])?;

        let actor = Actor::Owner(self.owner.clone());
        let moment = sim.now();
        let x_correction = if x == 1 { gate_name("PX") } else { gate_name("I") };
        sim.entity
            .apply_gate(&actor, &x_correction, None, &[self.qubit.clone()], moment)?;
        let z_correction = if z == 1 { gate_name("PZ") } else { gate_name("I") };
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
