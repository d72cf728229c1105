//! One-shot entanglement distillation.
//!
//! Two EPR pairs are pre-established on the source role's schedule: the
//! *goal* pair to be kept and the *measurement* pair to be consumed. The
//! source applies CNOT(meas, goal), measures its measurement qubit and
//! sends the outcome digit. The checker mirrors the CNOT and measurement on
//! its halves, compares outcomes, and replies "win" or "lose". Equal
//! outcomes keep the goal pair; both sides record the verdict.

use std::any::Any;
use std::net::Ipv6Addr;
use tracing::{debug, info};

use crate::apps::{node_endpoint, parse_bit, AppSignal, Application};
use crate::basis::{gate_name, APP_DIST_EPR};
use crate::channel::QuantumChannel;
use crate::kernel::{AppId, SimEvent, Simulation};
use crate::phy_entity::Actor;
use crate::{NetSimError, Result};

/// Delays of the source schedule: goal pair, measurement pair, parity round.
const GOAL_DELAY: f64 = 2.1;
const MEAS_DELAY: f64 = 2.2;
const PARITY_DELAY: f64 = 2.3;

/// One side of the distillation; `checker` selects the role.
#[derive(Debug)]
pub struct DistillApp {
    checker: bool,
    conn: QuantumChannel,
    /// The checker's local halves of (goal, measurement).
    qubits: (String, String),
    epr_goal: (String, String),
    epr_meas: (String, String),
    win: bool,
    port: u16,
    peer: (Ipv6Addr, u16),
}

impl DistillApp {
    /// Build one role. The source passes the full pair names; the checker
    /// passes its local halves in `qubits`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        checker: bool,
        conn: QuantumChannel,
        qubits: (String, String),
        epr_goal: (String, String),
        epr_meas: (String, String),
        port: u16,
        peer: (Ipv6Addr, u16),
    ) -> Self {
        Self {
            checker,
            conn,
            qubits,
            epr_goal,
            epr_meas,
            win: false,
            port,
            peer,
        }
    }

    /// Whether the last round was kept.
    #[must_use]
    pub fn win(&self) -> bool {
        self.win
    }

    fn owner(&self) -> &str {
        if self.checker {
            self.conn.dst_owner()
        } else {
            self.conn.src_owner()
        }
    }

    fn distillate(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        let (epr_src, _) = sim
            .entity
            .conn_apps(&self.conn, APP_DIST_EPR)
            .ok_or_else(|| {
                NetSimError::Configuration(format!(
                    "no EPR distribution apps installed over {}",
                    self.conn
                ))
            })?;
        sim.schedule(
            GOAL_DELAY,
            SimEvent::AppSignal(
                epr_src,
                AppSignal::DistributeEpr {
                    epr: self.epr_goal.clone(),
                },
            ),
        );
        sim.schedule(
            MEAS_DELAY,
            SimEvent::AppSignal(
                epr_src,
                AppSignal::DistributeEpr {
                    epr: self.epr_meas.clone(),
                },
            ),
        );
        sim.schedule(PARITY_DELAY, SimEvent::AppSignal(id, AppSignal::SendParity));
        Ok(())
    }

    fn send_parity(&mut self, sim: &mut Simulation) -> Result<()> {
        let actor = Actor::Owner(self.owner().to_string());
        let moment = sim.now();
        sim.entity.apply_gate(
            &actor,
            &gate_name("CNOT"),
            None,
            &[self.epr_meas.0.clone(), self.epr_goal.0.clone()],
            moment,
        )?;
        let (outcome, _) = sim.entity.measure(&actor, &self.epr_meas.0, moment)?;
        debug!("{}'s qubit is measured to {outcome}", self.owner());

        let payload = outcome.to_string().into_bytes();
        let from = node_endpoint(sim, self.owner(), self.port)?;
        sim.send_packet(self.peer, from, payload);
        Ok(())
    }

    fn check_parity(&mut self, outcome_src: u8, sim: &mut Simulation) -> Result<()> {
        let actor = Actor::Owner(self.owner().to_string());
        let moment = sim.now();
        sim.entity.apply_gate(
            &actor,
            &gate_name("CNOT"),
            None,
            &[self.qubits.1.clone(), self.qubits.0.clone()],
            moment,
        )?;
        let (outcome, _) = sim.entity.measure(&actor, &self.qubits.1, moment)?;
        debug!("{}'s qubit is measured to {outcome}", self.owner());

        self.win = outcome == outcome_src;
        let verdict = if self.win { "win" } else { "lose" };
        info!("{} finds out that the distillation {verdict}s", self.owner());

        let from = node_endpoint(sim, self.owner(), self.port)?;
        sim.send_packet(self.peer, from, verdict.as_bytes().to_vec());
        Ok(())
    }
}

impl Application for DistillApp {
    fn on_start(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        let local = node_endpoint(sim, self.owner(), self.port)?;
        sim.bind(local.0, local.1, id)?;
        if !self.checker {
            self.distillate(id, sim)?;
        }
        Ok(())
    }

    fn on_signal(&mut self, _id: AppId, signal: AppSignal, sim: &mut Simulation) -> Result<()> {
        match signal {
            AppSignal::SendParity => self.send_parity(sim),
            other => {
                debug!("unhandled signal {other:?}");
                Ok(())
            }
        }
    }

    fn on_packet(
        &mut self,
        _id: AppId,
        payload: &[u8],
        _from: (Ipv6Addr, u16),
        sim: &mut Simulation,
    ) -> Result<()> {
        if self.checker {
            let outcome_src = parse_bit(
                *payload
                    .first()
                    .ok_or_else(|| NetSimError::MalformedMessage("empty payload".to_string()))?,
            )?;
            return self.check_parity(outcome_src, sim);
        }
        if payload == b"win" {
            info!("{} finds out that the distillation wins", self.owner());
            self.win = true;
        } else if payload == b"lose" {
            info!("{} finds out that the distillation loses", self.owner());
            self.win = false;
        } else {
            return Err(NetSimError::MalformedMessage(format!(
                "expected a verdict, got \"{}\"",
                String::from_utf8_lossy(payload)
            )));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
