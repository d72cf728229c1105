//! Nested distillation with measurement-outcome adaptation.
//!
//! Same recursive structure as the plain nested protocol, but no classical
//! verdicts travel: a dedicated *flag qubit* at the source accumulates the
//! running success coherently. Each round replaces measure-and-branch with
//! a parity check into the checker's measurement qubit, a Toffoli of
//! (parity ∧ flag) into a fresh ancilla, a SWAP back onto the flag, and
//! partial traces of everything consumed. Only at the very end is the flag
//! measured; its outcome is a single win/lose over the accumulated success
//! and the reported p₁ is the success probability.
//!
//! The rewrite is valid under the deferred-measurement principle because
//! the coherent controls are never observed: they are traced out. It keeps
//! the whole experiment one closed circuit whose size scales with the
//! recursion depth instead of with 2^depth branches.

use std::any::Any;
use tracing::{debug, info};

use crate::apps::{node_endpoint, AppSignal, Application};
use crate::basis::{
    gate_name, pre_half, suf_half, APP_DIST_EPR, DIST_EPR_DELAY, KET_0, KET_1,
};
use crate::channel::QuantumChannel;
use crate::kernel::{AppId, SimCommand, SimEvent, Simulation};
use crate::phy_entity::Actor;
use crate::{NetSimError, Result};

/// Source side of the adaptive nested distillation. The checker side is
/// passive: every operation on its qubits is scheduled coherently.
#[derive(Debug)]
pub struct DistillNestedAdaptApp {
    checker: bool,
    conn: QuantumChannel,
    src_qubits: Vec<String>,
    dst_qubits: Vec<String>,
    flag_qubit: String,
    occupied: f64,
    goal: Option<(String, String)>,
    win: Option<bool>,
    success_prob: Option<f64>,
    fidelity: Option<f64>,
    port: u16,
}

impl DistillNestedAdaptApp {
    #[must_use]
    pub fn new(
        checker: bool,
        conn: QuantumChannel,
        src_qubits: Vec<String>,
        dst_qubits: Vec<String>,
        flag_qubit: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            checker,
            conn,
            src_qubits,
            dst_qubits,
            flag_qubit: flag_qubit.into(),
            occupied: 0.0,
            goal: None,
            win: None,
            success_prob: None,
            fidelity: None,
            port,
        }
    }

    /// Final verdict: `Some(true)` after a winning flag measurement.
    #[must_use]
    pub fn win(&self) -> Option<bool> {
        self.win
    }

    /// Probability of the accumulated success, reported with the verdict.
    #[must_use]
    pub fn success_prob(&self) -> Option<f64> {
        self.success_prob
    }

    /// Fidelity of the surviving goal pair, reported at the end.
    #[must_use]
    pub fn fidelity(&self) -> Option<f64> {
        self.fidelity
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
        debug!(
            "scheduling a distillation to get EPR pair {} {}",
            src_qubits[0], dst_qubits[0]
        );
        if src_qubits.len() != dst_qubits.len() {
            return Err(NetSimError::Configuration(
                "source and destination qubit lists differ in length".to_string(),
            ));
        }
        if src_qubits.len() > 2 {
            self.distillate(id, pre_half(&src_qubits), pre_half(&dst_qubits), sim)?;
            self.distillate(id, suf_half(&src_qubits), suf_half(&dst_qubits), sim)?;
        } else if src_qubits.len() != 2 {
            return Err(NetSimError::Configuration(format!(
                "nested distillation needs a power-of-two pair count, got {}",
                src_qubits.len()
            )));
        }

        debug!(
            "scheduling a round at occupied time {:.3}s for pair {} {}",
            self.occupied, src_qubits[0], dst_qubits[0]
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
        Ok(())
    }

    fn distillate_once(
        &mut self,
        id: AppId,
        src_qubits: &[String],
        dst_qubits: &[String],
        sim: &mut Simulation,
    ) -> Result<()> {
        let epr_goal = (src_qubits[0].clone(), dst_qubits[0].clone());
        let epr_meas = (
            src_qubits[src_qubits.len() / 2].clone(),
            dst_qubits[dst_qubits.len() / 2].clone(),
        );
        info!(
            "distillating once to keep ({}, {}) at the cost of ({}, {})",
            epr_goal.0, epr_goal.1, epr_meas.0, epr_meas.1
        );

        sim.schedule(self.occupied, SimEvent::Command(SimCommand::Checkpoint));

        // Leaf rounds first distribute their two pairs over the shared
        // channel, serialized by the occupied counter.
        if src_qubits.len() == 2 {
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
                SimEvent::AppSignal(
                    epr_src,
                    AppSignal::DistributeEpr {
                        epr: epr_goal.clone(),
                    },
                ),
            );
            self.occupy(DIST_EPR_DELAY);
            sim.schedule(
                self.occupied,
                SimEvent::AppSignal(
                    epr_src,
                    AppSignal::DistributeEpr {
                        epr: epr_meas.clone(),
                    },
                ),
            );
            self.occupy(DIST_EPR_DELAY);
        }

        let alice = Actor::Owner(self.conn.src_owner().to_string());
        let bob = Actor::Owner(self.conn.dst_owner().to_string());

        // Both sides fold their measurement half onto their goal half.
        sim.schedule(
            self.occupied,
            SimEvent::Command(SimCommand::ApplyGate {
                actor: alice,
                gate: gate_name("CNOT"),
                data: None,
                qubits: vec![epr_meas.0.clone(), epr_goal.0.clone()],
            }),
        );
        sim.schedule(
            self.occupied,
            SimEvent::Command(SimCommand::ApplyGate {
                actor: bob,
                gate: gate_name("CNOT"),
                data: None,
                qubits: vec![epr_meas.1.clone(), epr_goal.1.clone()],
            }),
        );

        // Parity check into the checker's measurement qubit (0 wanted).
        sim.schedule(
            self.occupied,
            SimEvent::Command(SimCommand::ApplyGate {
                actor: Actor::System,
                gate: gate_name("CNOT"),
                data: None,
                qubits: vec![epr_meas.1.clone(), epr_meas.0.clone()],
            }),
        );
        sim.schedule(
            self.occupied,
            SimEvent::Command(SimCommand::PartialTrace {
                qubits: vec![epr_meas.0.clone()],
            }),
        );

        // Negate the parity (1 wanted).
        sim.schedule(
            self.occupied,
            SimEvent::Command(SimCommand::ApplyGate {
                actor: Actor::System,
                gate: gate_name("PX"),
                data: None,
                qubits: vec![epr_meas.1.clone()],
            }),
        );

        // Fresh ancilla takes parity ∧ flag, then swaps onto the flag.
        let ancilla = sim.entity.alloc_ancilla();
        sim.schedule(
            self.occupied,
            SimEvent::Command(SimCommand::GeneratePure {
                actor: Actor::Owner(self.owner().to_string()),
                state: KET_0.clone(),
                qubits: vec![ancilla.clone()],
            }),
        );
        sim.schedule(
            self.occupied,
            SimEvent::Command(SimCommand::ApplyGate {
                actor: Actor::System,
                gate: gate_name("TOFF"),
                data: None,
                qubits: vec![
                    ancilla.clone(),
                    epr_meas.1.clone(),
                    self.flag_qubit.clone(),
                ],
            }),
        );
        sim.schedule(
            self.occupied,
            SimEvent::Command(SimCommand::PartialTrace {
                qubits: vec![epr_meas.1.clone()],
            }),
        );
        sim.schedule(
            self.occupied,
            SimEvent::Command(SimCommand::ApplyGate {
                actor: Actor::System,
                gate: gate_name("SWAP"),
                data: None,
                qubits: vec![ancilla.clone(), self.flag_qubit.clone()],
            }),
        );
        sim.schedule(
            self.occupied,
            SimEvent::Command(SimCommand::PartialTrace {
                qubits: vec![ancilla],
            }),
        );

        if src_qubits.len() == self.src_qubits.len() {
            // The last round: contract, inspect the goal pair, measure the
            // flag, inspect again and report fidelity.
            self.goal = Some(epr_goal.clone());
            sim.schedule(
                self.occupied,
                SimEvent::Command(SimCommand::Contract { optimizer: None }),
            );
            sim.schedule(
                self.occupied,
                SimEvent::Command(SimCommand::PeekDm {
                    actor: Actor::System,
                    qubits: vec![epr_goal.0.clone(), epr_goal.1.clone()],
                }),
            );
            sim.schedule(self.occupied, SimEvent::AppSignal(id, AppSignal::MeasureFlag));
            sim.schedule(
                self.occupied,
                SimEvent::Command(SimCommand::PeekDm {
                    actor: Actor::System,
                    qubits: vec![epr_goal.0.clone(), epr_goal.1.clone()],
                }),
            );
            sim.schedule(self.occupied, SimEvent::AppSignal(id, AppSignal::Finish));
        }
        Ok(())
    }

    fn measure_flag(&mut self, sim: &mut Simulation) -> Result<()> {
        let actor = Actor::Owner(self.owner().to_string());
        let moment = sim.now();
        let (outcome, dist) = sim.entity.measure(&actor, &self.flag_qubit, moment)?;
        let wins = outcome == 1;
        self.win = Some(wins);
        self.success_prob = Some(dist[1]);
        info!(
            "at {moment:.3}s {} finds out it {}",
            self.owner(),
            if wins { "wins" } else { "loses" }
        );
        info!("probability of succeeding is {}", dist[1]);
        Ok(())
    }

    fn finish(&mut self, sim: &mut Simulation) -> Result<()> {
        if let Some(goal) = &self.goal {
            self.fidelity = Some(sim.entity.calculate_fidelity((&goal.0, &goal.1))?);
        }
        Ok(())
    }
}

impl Application for DistillNestedAdaptApp {
    fn on_start(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        let local = node_endpoint(sim, self.owner(), self.port)?;
        sim.bind(local.0, local.1, id)?;
        if self.checker {
            return Ok(());
        }

        // The flag starts in |1⟩: success until a round fails.
        sim.schedule(
            self.occupied,
            SimEvent::Command(SimCommand::GeneratePure {
                actor: Actor::Owner(self.owner().to_string()),
                state: KET_1.clone(),
                qubits: vec![self.flag_qubit.clone()],
            }),
        );
        let src = self.src_qubits.clone();
        let dst = self.dst_qubits.clone();
        let delay = self.occupied;
        sim.schedule(
            delay,
            SimEvent::AppSignal(id, AppSignal::Distillate { src, dst }),
        );
        Ok(())
    }

    fn on_signal(&mut self, id: AppId, signal: AppSignal, sim: &mut Simulation) -> Result<()> {
        match signal {
            AppSignal::Distillate { src, dst } => self.distillate(id, src, dst, sim),
            AppSignal::DistillateOnce { src, dst } => self.distillate_once(id, &src, &dst, sim),
            AppSignal::MeasureFlag => self.measure_flag(sim),
            AppSignal::Finish => self.finish(sim),
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
