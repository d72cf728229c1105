//! Chained teleportation with coherent adaptation.
//!
//! A pipeline of owners. Each hop receives a classical trigger
//! `<q_a>.<q_b>.<q_c>` naming its predecessor's two qubits and the qubit
//! the state now lives on, distributes its outbound EPR pair, applies the
//! local CNOT and H, XORs the predecessor's pair in through coherent CNOTs,
//! traces the predecessor's qubits and triggers its successor. The final
//! owner applies the coherent controlled-X/controlled-Z corrections,
//! contracts the network and records its qubit's density matrix.

use num_complex::Complex64;
use std::any::Any;
use std::net::Ipv6Addr;
use tracing::debug;

use crate::apps::{node_endpoint, split_fields, AppSignal, Application, Qubit};
use crate::basis::{gate_name, APP_DIST_EPR, CNOT, CZ, DELIM, LOCAL_OP_DELAY};
use crate::channel::QuantumChannel;
use crate::kernel::{AppId, SimCommand, SimEvent, Simulation};
use crate::phy_entity::Actor;
use crate::{NetSimError, Result};

/// One owner's hop of the adaptive teleportation chain.
#[derive(Debug)]
pub struct TelepLinAdaptApp {
    owner: String,
    /// Channel toward the successor; `None` on the last owner.
    conn: Option<QuantumChannel>,
    /// EPR pair this hop distributes; empty names on the last owner.
    epr: (String, String),
    /// Predecessor's (former, latter) qubits, learned from the trigger.
    qubits_pred: (String, String),
    /// This owner's (state-carrier, EPR half) qubits.
    qubits: (String, String),
    /// Successor's receiving qubit.
    qubit: String,
    input: Option<Qubit>,
    output: Vec<Complex64>,
    port: u16,
    peer: Option<(Ipv6Addr, u16)>,
}

impl TelepLinAdaptApp {
    /// `peer` is the successor's app endpoint; the last owner passes `None`.
    #[must_use]
    pub fn new(
        owner: impl Into<String>,
        conn: Option<QuantumChannel>,
        epr: (String, String),
        input: Option<Qubit>,
        port: u16,
        peer: Option<(Ipv6Addr, u16)>,
    ) -> Self {
        let qubit = epr.1.clone();
        Self {
            owner: owner.into(),
            conn,
            qubits: (String::new(), epr.0.clone()),
            epr,
            qubits_pred: (String::new(), String::new()),
            qubit,
            input,
            output: Vec::new(),
            port,
            peer,
        }
    }

    /// The density matrix recorded by the last owner, flat column-major.
    #[must_use]
    pub fn output(&self) -> &[Complex64] {
        &self.output
    }

    fn teleport(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        let conn = self.conn.clone().ok_or_else(|| {
            NetSimError::Configuration(format!(
                "{} is the last owner and cannot teleport onward",
                self.owner
            ))
        })?;
        debug!(
            "teleport from {} to {} using EPR ({}, {})",
            conn.src_owner(),
            conn.dst_owner(),
            self.epr.0,
            self.epr.1
        );
        self.qubits.1 = self.epr.0.clone();
        self.qubit = self.epr.1.clone();

        let (epr_src, _) = sim.entity.conn_apps(&conn, APP_DIST_EPR).ok_or_else(|| {
            NetSimError::Configuration(format!(
                "no EPR distribution apps installed over {conn}"
            ))
        })?;
        sim.schedule_now(SimEvent::AppSignal(
            epr_src,
            AppSignal::DistributeEpr {
                epr: self.epr.clone(),
            },
        ));

        let src = Actor::Owner(conn.src_owner().to_string());
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

        if self.input.is_none() {
            // Fold the predecessor's pair into this hop, then drop it.
            sim.schedule(
                LOCAL_OP_DELAY,
                SimEvent::Command(SimCommand::ApplyGate {
                    actor: Actor::System,
                    gate: gate_name("CNOT"),
                    data: None,
                    qubits: vec![self.qubits.1.clone(), self.qubits_pred.1.clone()],
                }),
            );
            sim.schedule(
                LOCAL_OP_DELAY,
                SimEvent::Command(SimCommand::PartialTrace {
                    qubits: vec![self.qubits_pred.1.clone()],
                }),
            );
            sim.schedule(
                LOCAL_OP_DELAY,
                SimEvent::Command(SimCommand::ApplyGate {
                    actor: Actor::System,
                    gate: gate_name("CNOT"),
                    data: None,
                    qubits: vec![self.qubits.0.clone(), self.qubits_pred.0.clone()],
                }),
            );
            sim.schedule(
                LOCAL_OP_DELAY,
                SimEvent::Command(SimCommand::PartialTrace {
                    qubits: vec![self.qubits_pred.0.clone()],
                }),
            );
        }

        sim.schedule(LOCAL_OP_DELAY, SimEvent::AppSignal(id, AppSignal::SendTrigger));
        Ok(())
    }

    fn send_trigger(&mut self, sim: &mut Simulation) -> Result<()> {
        let peer = self.peer.ok_or_else(|| {
            NetSimError::Configuration(format!("{} has no successor endpoint", self.owner))
        })?;
        let payload = format!(
            "{}{DELIM}{}{DELIM}{}",
            self.qubits.0, self.qubits.1, self.qubit
        )
        .into_bytes();
        let from = node_endpoint(sim, &self.owner, self.port)?;
        sim.send_packet(peer, from, payload);
        Ok(())
    }

    fn correct_and_finish(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        sim.schedule_now(SimEvent::Command(SimCommand::ApplyControlled {
            owner: self.owner.clone(),
            orig_gate: gate_name("PX"),
            gate: gate_name("CX"),
            data: Some(CNOT.clone()),
            controls: vec![self.qubits_pred.1.clone()],
            targets: vec![self.qubits.0.clone()],
        }));
        sim.schedule_now(SimEvent::Command(SimCommand::PartialTrace {
            qubits: vec![self.qubits_pred.1.clone()],
        }));
        sim.schedule_now(SimEvent::Command(SimCommand::ApplyControlled {
            owner: self.owner.clone(),
            orig_gate: gate_name("PZ"),
            gate: gate_name("CZ"),
            data: Some(CZ.clone()),
            controls: vec![self.qubits_pred.0.clone()],
            targets: vec![self.qubits.0.clone()],
        }));
        sim.schedule_now(SimEvent::Command(SimCommand::PartialTrace {
            qubits: vec![self.qubits_pred.0.clone()],
        }));
        sim.schedule_now(SimEvent::Command(SimCommand::Contract { optimizer: None }));
        sim.schedule_now(SimEvent::AppSignal(id, AppSignal::Finish));
        Ok(())
    }
}

impl Application for TelepLinAdaptApp {
    fn on_start(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        debug!("starting chain hop of {} at {:.6}s", self.owner, sim.now());
        let local = node_endpoint(sim, &self.owner, self.port)?;
        sim.bind(local.0, local.1, id)?;

        if let Some(input) = self.input.clone() {
            // First owner in the chain.
            self.qubits.0 = input.name().to_string();
            if !input.state_vector().is_empty() {
                sim.schedule_now(SimEvent::Command(SimCommand::GeneratePure {
                    actor: Actor::Owner(self.owner.clone()),
                    state: input.state_vector().to_vec(),
                    qubits: vec![self.qubits.0.clone()],
                }));
            }
            self.teleport(id, sim)?;
        }
        Ok(())
    }

    fn on_signal(&mut self, _id: AppId, signal: AppSignal, sim: &mut Simulation) -> Result<()> {
        match signal {
            AppSignal::SendTrigger => self.send_trigger(sim),
            AppSignal::Finish => {
                self.output = sim
                    .entity
                    .peek_dm(&Actor::Owner(self.owner.clone()), &[self.qubits.0.clone()])?;
                Ok(())
            }
            other => {
                debug!("unhandled signal {other:?}");
                Ok(())
            }
        }
    }

    fn on_packet(
        &mut self,
        id: AppId,
        payload: &[u8],
        _from: (Ipv6Addr, u16),
        sim: &mut Simulation,
    ) -> Result<()> {
        let fields = split_fields(payload, 3)?;
        self.qubits_pred = (fields[0].clone(), fields[1].clone());
        self.qubits.0 = fields[2].clone();
        debug!(
            "{} sees predecessor pair ({}, {}) carrying {}",
            self.owner, self.qubits_pred.0, self.qubits_pred.1, self.qubits.0
        );

        if self.epr.0.is_empty() && self.epr.1.is_empty() {
            // Last owner in the chain.
            self.correct_and_finish(id, sim)
        } else {
            self.teleport(id, sim)
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
