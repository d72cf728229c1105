//! Nested (recursive) entanglement distillation.
//!
//! Given 2^m source/destination qubit names, the source distills the first
//! half to obtain its first pair, the second half likewise, then distills
//! those two survivors against each other. Each round consumes a
//! measurement pair and reports `<digit>.<qdst_goal>.<qdst_meas>` to the
//! checker, which mirrors the parity check and answers "win"/"lose".
//!
//! A running *occupied time* counter paces the schedule: every EPR
//! distribution and every round advances it by a fixed delay, so the two
//! recursion halves interleave in virtual time except where the single
//! shared EPR channel forces serialization.

use std::any::Any;
use std::net::Ipv6Addr;
use tracing::{debug, info};

use crate::apps::{node_endpoint, parse_bit, split_fields, AppSignal, Application};
use crate::basis::{gate_name, pre_half, suf_half, APP_DIST_EPR, DELIM, LOCAL_OP_DELAY};
use crate::channel::QuantumChannel;
use crate::kernel::{AppId, SimEvent, Simulation};
use crate::phy_entity::Actor;
use crate::{NetSimError, Result};

/// One side of the nested distillation; `checker` selects the role.
#[derive(Debug)]
pub struct DistillNestedApp {
    checker: bool,
    conn: QuantumChannel,
    src_qubits: Vec<String>,
    dst_qubits: Vec<String>,
    win: bool,
    occupied: f64,
    port: u16,
    peer: (Ipv6Addr, u16),
}

impl DistillNestedApp {
    #[must_use]
    pub fn new(
        checker: bool,
        conn: QuantumChannel,
        src_qubits: Vec<String>,
        dst_qubits: Vec<String>,
        port: u16,
        peer: (Ipv6Addr, u16),
    ) -> Self {
        Self {
            checker,
            conn,
            src_qubits,
            dst_qubits,
            win: false,
            occupied: 0.0,
            port,
            peer,
        }
    }

    /// Whether the final round was kept.
    #[must_use]
    pub fn win(&self) -> bool {
        self.win
    }

    /// The pacing counter, for inspection.
    #[must_use]
    pub fn occupied(&self) -> f64 {
        self.occupied
    }

    fn occupy(&mut self, time: f64) {
        self.occupied += time;
    }

    fn owner(&self) -> &str {
        if self.checker {
            self.conn.dst_owner()
        } else {
            self.conn.src_owner()
        }
    }

    fn distillate(
        &mut self,
        id: AppId,
        src_qubits: Vec<String>,
        dst_qubits: Vec<String>,
        sim: &mut Simulation,
    ) -> Result<()> {
        debug!("distillating {} pair(s)", src_qubits.len());
        if src_qubits.len() != dst_qubits.len() {
            return Err(NetSimError::Configuration(
                "source and destination qubit lists differ in length".to_string(),
            ));
        }
        let pairs = src_qubits.len();

        if pairs > 2 {
            // Recursively schedule the prefix half, then the suffix half.
            self.distillate(id, pre_half(&src_qubits), pre_half(&dst_qubits), sim)?;
            self.distillate(id, suf_half(&src_qubits), suf_half(&dst_qubits), sim)?;
        } else {
            if pairs != 2 {
                return Err(NetSimError::Configuration(format!(
                    "nested distillation needs a power-of-two pair count, got {pairs}"
                )));
            }
            let epr_goal = (src_qubits[0].clone(), dst_qubits[0].clone());
            let epr_meas = (src_qubits[1].clone(), dst_qubits[1].clone());
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
                self.occupied,
                SimEvent::AppSignal(epr_src, AppSignal::DistributeEpr { epr: epr_goal }),
            );
            self.occupy(LOCAL_OP_DELAY);
            sim.schedule(
                self.occupied,
                SimEvent::AppSignal(epr_src, AppSignal::DistributeEpr { epr: epr_meas }),
            );
            self.occupy(LOCAL_OP_DELAY);
        }

        debug!(
            "scheduling a distillation round at occupied time {:.3}s",
            self.occupied
        );
        sim.schedule(
            self.occupied,
            SimEvent::AppSignal(
                id,
                AppSignal::DistillateOnce {
                    src: src_qubits,
                    dst: dst_qubits,
                },
            ),
        );
        self.occupy(LOCAL_OP_DELAY);
        Ok(())
    }

    fn distillate_once(
        &mut self,
        src_qubits: &[String],
        dst_qubits: &[String],
        sim: &mut Simulation,
    ) -> Result<()> {
        let epr_goal = (src_qubits[0].clone(), dst_qubits[0].clone());
        let epr_meas = (
            src_qubits[src_qubits.len() / 2].clone(),
            dst_qubits[dst_qubits.len() / 2].clone(),
        );
        debug!(
            "round keeps ({}, {}) at the cost of ({}, {})",
            epr_goal.0, epr_goal.1, epr_meas.0, epr_meas.1
        );

        let actor = Actor::Owner(self.owner().to_string());
        let moment = sim.now();
        sim.entity.apply_gate(
            &actor,
            &gate_name("CNOT"),
            None,
            &[epr_meas.0.clone(), epr_goal.0.clone()],
            moment,
        )?;
        let (outcome, _) = sim.entity.measure(&actor, &epr_meas.0, moment)?;
        debug!("{}'s qubit is measured to {outcome}", self.owner());

        let payload = format!("{outcome}{DELIM}{}{DELIM}{}", epr_goal.1, epr_meas.1).into_bytes();
        let from = node_endpoint(sim, self.owner(), self.port)?;
        sim.send_packet(self.peer, from, payload);
        Ok(())
    }

    fn check_round(&mut self, payload: &[u8], sim: &mut Simulation) -> Result<()> {
        let fields = split_fields(payload, 3)?;
        let outcome_src = parse_bit(fields[0].as_bytes()[0])?;
        let dst_goal = fields[1].clone();
        let dst_meas = fields[2].clone();
        debug!("checker's goal qubit is {dst_goal}, meas qubit is {dst_meas}");

        let actor = Actor::Owner(self.owner().to_string());
        let moment = sim.now();
        sim.entity.apply_gate(
            &actor,
            &gate_name("CNOT"),
            None,
            &[dst_meas.clone(), dst_goal],
            moment,
        )?;
        let (outcome, _) = sim.entity.measure(&actor, &dst_meas, moment)?;
        debug!("{}'s qubit is measured to {outcome}", self.owner());

        self.win = outcome == outcome_src;
        let verdict = if self.win { "win" } else { "lose" };
        info!("{} finds out that the distillation {verdict}s", self.owner());

        let from = node_endpoint(sim, self.owner(), self.port)?;
        sim.send_packet(self.peer, from, verdict.as_bytes().to_vec());
        Ok(())
    }
}

impl Application for DistillNestedApp {
    fn on_start(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        let local = node_endpoint(sim, self.owner(), self.port)?;
        sim.bind(local.0, local.1, id)?;
        if !self.checker {
            let src = self.src_qubits.clone();
            let dst = self.dst_qubits.clone();
            self.distillate(id, src, dst, sim)?;
        }
        Ok(())
    }

    fn on_signal(&mut self, _id: AppId, signal: AppSignal, sim: &mut Simulation) -> Result<()> {
        match signal {
            AppSignal::DistillateOnce { src, dst } => self.distillate_once(&src, &dst, sim),
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
            return self.check_round(payload, sim);
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
