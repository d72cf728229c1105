//! Single-hop teleportation with coherent adaptation.
//!
//! The degenerate two-owner case of the adaptive chain: instead of
//! measuring and sending correction bits, the source's qubits directly
//! drive a controlled-X and controlled-Z on the destination qubit, valid
//! under the deferred-measurement principle as long as they stay
//! unobserved. When the destination is the end of the line, its state is
//! peeked right after the corrections.

use std::any::Any;
use tracing::debug;

use crate::apps::{AppSignal, Application, Qubit};
use crate::basis::{gate_name, APP_DIST_EPR, CNOT, LOCAL_OP_DELAY};
use crate::channel::QuantumChannel;
use crate::kernel::{AppId, SimCommand, SimEvent, Simulation};
use crate::phy_entity::Actor;
use crate::{NetSimError, Result};

/// Source-driven adaptive teleportation over one channel.
#[derive(Debug)]
pub struct TelepAdaptApp {
    conn: QuantumChannel,
    last_owner: String,
    /// Alice's qubits: (the state to teleport, her EPR half).
    qubits: (String, String),
    /// Bob's qubit receiving the state.
    qubit: String,
    input: Option<Qubit>,
}

impl TelepAdaptApp {
    #[must_use]
    pub fn new(
        conn: QuantumChannel,
        last_owner: impl Into<String>,
        qubits: (String, String),
        qubit: impl Into<String>,
        input: Option<Qubit>,
    ) -> Self {
        Self {
            conn,
            last_owner: last_owner.into(),
            qubits,
            qubit: qubit.into(),
            input,
        }
    }

    fn teleport(&mut self, sim: &mut Simulation) -> Result<()> {
        debug!("adaptive teleport at time {:.6}s", sim.now());
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

        // Alice's local operations.
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

        // Coherent corrections in place of classical feedback.
        sim.schedule(
            LOCAL_OP_DELAY,
            SimEvent::Command(SimCommand::ApplyControlled {
                owner: self.conn.dst_owner().to_string(),
                orig_gate: gate_name("PX"),
                gate: gate_name("CX"),
                data: Some(CNOT.clone()),
                controls: vec![self.qubits.1.clone()],
                targets: vec![self.qubit.clone()],
            }),
        );
        sim.schedule(
            LOCAL_OP_DELAY,
            SimEvent::Command(SimCommand::ApplyControlled {
                owner: self.conn.dst_owner().to_string(),
                orig_gate: gate_name("PZ"),
                gate: gate_name("CZ"),
                data: None,
                controls: vec![self.qubits.0.clone()],
                targets: vec![self.qubit.clone()],
            }),
        );

        if self.last_owner == self.conn.dst_owner() {
            sim.schedule(
                LOCAL_OP_DELAY,
                SimEvent::Command(SimCommand::PeekDm {
                    actor: Actor::Owner(self.last_owner.clone()),
                    qubits: vec![self.qubit.clone()],
                }),
            );
        }
        Ok(())
    }
}

impl Application for TelepAdaptApp {
    fn on_start(&mut self, _id: AppId, sim: &mut Simulation) -> Result<()> {
        self.teleport(sim)
    }

    fn on_signal(&mut self, _id: AppId, signal: AppSignal, sim: &mut Simulation) -> Result<()> {
        match signal {
            AppSignal::Teleport => self.teleport(sim),
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
