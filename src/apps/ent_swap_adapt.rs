//! Entanglement swapping with coherent adaptation.
//!
//! No classical bits travel. Two flag qubits (one per correction axis)
//! accumulate every intermediate owner's Bell-measurement outcome through
//! coherent CNOTs; the intermediate qubits are traced out as soon as they
//! are folded in. At the end a single controlled-X and controlled-Z, driven
//! by the flags, correct the last owner's qubit, the flags are traced, and
//! the network contracts as one closed circuit whose size grows linearly in
//! the chain length.

use std::any::Any;
use tracing::debug;

use crate::apps::{AppSignal, Application};
use crate::basis::{gate_name, CNOT, KET_0};
use crate::kernel::{AppId, SimCommand, SimEvent, Simulation};
use crate::node::QuantumMemory;
use crate::phy_entity::Actor;
use crate::{NetSimError, Result};

/// Single app on the last owner driving the whole coherent schedule.
#[derive(Debug)]
pub struct EntSwapAdaptApp {
    owner: String,
    qubits_former: QuantumMemory,
    qubits_latter: QuantumMemory,
}

impl EntSwapAdaptApp {
    /// `qubits_former[rank]` / `qubits_latter[rank]` are the rank-th owner's
    /// qubits entangled toward its predecessor / successor (empty strings at
    /// the chain ends).
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

        let flag_x = sim.entity.alloc_ancilla();
        let flag_z = sim.entity.alloc_ancilla();
        for flag in [&flag_x, &flag_z] {
            sim.schedule_now(SimEvent::Command(SimCommand::GeneratePure {
                actor: Actor::System,
                state: KET_0.clone(),
                qubits: vec![flag.clone()],
            }));
        }

        let last_qubit = self.qubits_former.get(owners - 1).to_string();
        for rank in 1..owners - 1 {
            let former = self.qubits_former.get(rank).to_string();
            let latter = self.qubits_latter.get(rank).to_string();
            debug!("owner {rank} has qubits {former} and {latter}");

            // Local Bell-basis rotation.
            sim.schedule_now(SimEvent::Command(SimCommand::ApplyGate {
                actor: Actor::System,
                gate: gate_name("CNOT"),
                data: None,
                qubits: vec![latter.clone(), former.clone()],
            }));
            sim.schedule_now(SimEvent::Command(SimCommand::ApplyGate {
                actor: Actor::System,
                gate: gate_name("H"),
                data: None,
                qubits: vec![former.clone()],
            }));

            // Fold both outcomes into the flags, then drop the qubits.
            sim.schedule_now(SimEvent::Command(SimCommand::ApplyGate {
                actor: Actor::System,
                gate: gate_name("CNOT"),
                data: None,
                qubits: vec![flag_x.clone(), latter.clone()],
            }));
            sim.schedule_now(SimEvent::Command(SimCommand::PartialTrace {
                qubits: vec![latter],
            }));
            sim.schedule_now(SimEvent::Command(SimCommand::ApplyGate {
                actor: Actor::System,
                gate: gate_name("CNOT"),
                data: None,
                qubits: vec![flag_z.clone(), former.clone()],
            }));
            sim.schedule_now(SimEvent::Command(SimCommand::PartialTrace {
                qubits: vec![former],
            }));
        }

        // Flag-driven corrections, with the noise budget of the last
        // owner's plain PX / PZ gates.
        sim.schedule_now(SimEvent::Command(SimCommand::ApplyControlled {
            owner: self.owner.clone(),
            orig_gate: gate_name("PX"),
            gate: gate_name("CX"),
            data: Some(CNOT.clone()),
            controls: vec![flag_x.clone()],
            targets: vec![last_qubit.clone()],
        }));
        sim.schedule_now(SimEvent::Command(SimCommand::PartialTrace {
            qubits: vec![flag_x],
        }));
        sim.schedule_now(SimEvent::Command(SimCommand::ApplyControlled {
            owner: self.owner.clone(),
            orig_gate: gate_name("PZ"),
            gate: gate_name("CZ"),
            data: None,
            controls: vec![flag_z.clone()],
            targets: vec![last_qubit],
        }));
        sim.schedule_now(SimEvent::Command(SimCommand::PartialTrace {
            qubits: vec![flag_z],
        }));
        sim.schedule_now(SimEvent::Command(SimCommand::Contract { optimizer: None }));
        Ok(())
    }
}

impl Application for EntSwapAdaptApp {
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
