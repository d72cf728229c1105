//! Entanglement swapping with nearest-neighbor adaptation.
//!
//! Flag-free variant of the coherent swap: every intermediate owner XORs
//! its Bell-measurement outcome into the *next* owner's qubits, so all
//! control operations stay between nearest neighbors of the linear
//! topology. The last two owners drive the final corrections directly from
//! the penultimate owner's qubits. This yields the smallest tensor-network
//! footprint of the swap family.

use std::any::Any;
use tracing::debug;

use crate::apps::{AppSignal, Application};
use crate::basis::{gate_name, CNOT};
use crate::kernel::{AppId, SimCommand, SimEvent, Simulation};
use crate::node::QuantumMemory;
use crate::phy_entity::Actor;
use crate::{NetSimError, Result};

/// Single app on the last owner driving the nearest-neighbor schedule.
#[derive(Debug)]
pub struct EntSwapAdaptLocalApp {
    owner: String,
    qubits_former: QuantumMemory,
    qubits_latter: QuantumMemory,
}

impl EntSwapAdaptLocalApp {
    /// Same memory layout as the flagged variant: per-rank (former, latter)
    /// qubits with empty strings at the chain ends.
    #[must_use]
    pub fn new(
        owner: impl Into<String>,
        qubits_former: QuantumMemory,
        qubits_latter: QuantumMemory,
    ) -> Self {
        Self {
            owner: owner.into(),
            qubits_former,
            qubits_latter,
        }
    }

    fn entanglement_swapping(&mut self, sim: &mut Simulation) -> Result<()> {
        let owners = self.qubits_former.size();
        if owners < 3 {
            return Err(NetSimError::Configuration(
                "adaptive swapping needs at least three owners".to_string(),
            ));
        }

        // Local Bell-basis rotations everywhere first.
        for rank in 1..owners - 1 {
            let former = self.qubits_former.get(rank).to_string();
            let latter = self.qubits_latter.get(rank).to_string();
            debug!("owner {rank} has qubits {former} and {latter}");
            sim.schedule_now(SimEvent::Command(SimCommand::ApplyGate {
                actor: Actor::System,
                gate: gate_name("CNOT"),
                data: None,
                qubits: vec![latter, former.clone()],
            }));
            sim.schedule_now(SimEvent::Command(SimCommand::ApplyGate {
                actor: Actor::System,
                gate: gate_name("H"),
                data: None,
                qubits: vec![former],
            }));
        }

        // Pass each XOR accumulation to the next owner's qubits.
        for rank in 1..owners.saturating_sub(2) {
            let former = self.qubits_former.get(rank).to_string();
            let latter = self.qubits_latter.get(rank).to_string();
            let next_former = self.qubits_former.get(rank + 1).to_string();
            let next_latter = self.qubits_latter.get(rank + 1).to_string();

            sim.schedule_now(SimEvent::Command(SimCommand::ApplyGate {
                actor: Actor::System,
                gate: gate_name("CNOT"),
                data: None,
                qubits: vec![next_latter, latter.clone()],
            }));
            sim.schedule_now(SimEvent::Command(SimCommand::PartialTrace {
                qubits: vec![latter],
            }));
            sim.schedule_now(SimEvent::Command(SimCommand::ApplyGate {
                actor: Actor::System,
                gate: gate_name("CNOT"),
                data: None,
                qubits: vec![next_former, former.clone()],
            }));
            sim.schedule_now(SimEvent::Command(SimCommand::PartialTrace {
                qubits: vec![former],
            }));
        }

        // Corrections between the last two owners, charged as the last
        // owner's plain PX / PZ gates.
        let former = self.qubits_former.get(owners - 2).to_string();
        let latter = self.qubits_latter.get(owners - 2).to_string();
        let last_qubit = self.qubits_former.get(owners - 1).to_string();

        sim.schedule_now(SimEvent::Command(SimCommand::ApplyControlled {
            owner: self.owner.clone(),
            orig_gate: gate_name("PX"),
            gate: gate_name("CX"),
            data: Some(CNOT.clone()),
            controls: vec![latter.clone()],
            targets: vec![last_qubit.clone()],
        }));
        sim.schedule_now(SimEvent::Command(SimCommand::PartialTrace {
            qubits: vec![latter],
        }));
        sim.schedule_now(SimEvent::Command(SimCommand::ApplyControlled {
            owner: self.owner.clone(),
            orig_gate: gate_name("PZ"),
            gate: gate_name("CZ"),
            data: None,
            controls: vec![former.clone()],
            targets: vec![last_qubit],
        }));
        sim.schedule_now(SimEvent::Command(SimCommand::PartialTrace {
            qubits: vec![former],
        }));
        sim.schedule_now(SimEvent::Command(SimCommand::Contract { optimizer: None }));
        Ok(())
    }
}

impl Application for EntSwapAdaptLocalApp {
    fn on_start(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        sim.schedule_now(SimEvent::AppSignal(id, AppSignal::EntanglementSwapping));
        Ok(())
    }

    fn on_signal(&mut self, _id: AppId, signal: AppSignal, sim: &mut Simulation) -> Result<()> {
        match signal {
            AppSignal::EntanglementSwapping => self.entanglement_swapping(sim),
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
