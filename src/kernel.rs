//! # Simulation Kernel - Virtual Clock, Event Heap and Simulated Sockets
//!
//! A single-threaded cooperative scheduler over a virtual clock. All
//! protocol actions, engine mutations and packet deliveries run to
//! completion on one thread; the kernel owns the physical entity and every
//! application by value, so nothing is ever shared across OS threads.
//!
//! ## Ordering guarantees
//!
//! - Events at the same virtual time fire in FIFO order of scheduling,
//!   enforced by a monotone sequence number.
//! - Packet delivery is strictly later than its send by the configured link
//!   delay.
//! - Events addressed to an application outside its start/stop window are
//!   silently dropped.
//!
//! The only way to wait is to schedule a callback at a future virtual time
//! or to receive a packet; every kernel entry point is synchronous.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::net::Ipv6Addr;
use tracing::{debug, info, trace};

use num_complex::Complex64;

use crate::apps::{Application, AppSignal};
use crate::basis::{CLASSICAL_DELAY, ETERNITY};
use crate::phy_entity::{Actor, QuantumPhyEntity};
use crate::{NetSimError, Result};

/// Handle of an installed application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId(pub usize);

/// Classical link parameters shared by every node pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Data rate in bits per second (informational; payloads are tiny).
    pub data_rate_bps: u64,
    /// One-way delivery delay in virtual seconds.
    pub delay: f64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            data_rate_bps: 1_000_000,
            delay: CLASSICAL_DELAY,
        }
    }
}

/// Per-experiment kernel parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Seed of the measurement-outcome sampler.
    pub seed: u64,
    /// Virtual time after which no event fires.
    pub stop_time: f64,
    /// Classical link parameters.
    pub link: LinkConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            stop_time: ETERNITY,
            link: LinkConfig::default(),
        }
    }
}

/// A scheduled engine mutation.
///
/// Protocols schedule these instead of calling the entity at a future time;
/// the kernel executes them against the entity when they fire, passing its
/// clock as the moment.
#[derive(Debug, Clone)]
pub enum SimCommand {
    GeneratePure {
        actor: Actor,
        state: Vec<Complex64>,
        qubits: Vec<String>,
    },
    ApplyGate {
        actor: Actor,
        gate: String,
        data: Option<Vec<Complex64>>,
        qubits: Vec<String>,
    },
    ApplyControlled {
        owner: String,
        orig_gate: String,
        gate: String,
        data: Option<Vec<Complex64>>,
        controls: Vec<String>,
        targets: Vec<String>,
    },
    PartialTrace {
        qubits: Vec<String>,
    },
    Contract {
        optimizer: Option<String>,
    },
    Checkpoint,
    PeekDm {
        actor: Actor,
        qubits: Vec<String>,
    },
    CalculateFidelity {
        pair: (String, String),
    },
}

/// Anything the kernel can fire.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// Arm an application's sockets and initial schedule.
    AppStart(AppId),
    /// Deliver a typed signal to an application.
    AppSignal(AppId, AppSignal),
    /// Deliver a classical payload to a bound socket.
    Deliver {
        to: (Ipv6Addr, u16),
        from: (Ipv6Addr, u16),
        payload: Vec<u8>,
    },
    /// Execute an engine mutation.
    Command(SimCommand),
}

#[derive(Debug)]
struct Scheduled {
    time: f64,
    seq: u64,
    event: SimEvent,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: the binary heap is a max-heap and we pop earliest-first,
        // breaking ties by scheduling order.
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct AppSlot {
    app: Option<Box<dyn Application>>,
    owner: String,
    start: f64,
    stop: f64,
}

/// The experiment world: entity, applications, sockets and the event heap.
pub struct Simulation {
    clock: f64,
    seq: u64,
    queue: BinaryHeap<Scheduled>,
    stop_time: f64,
    /// Shared classical link parameters.
    pub link: LinkConfig,
    /// The physical entity all protocols mutate in turn.
    pub entity: QuantumPhyEntity,
    apps: Vec<AppSlot>,
    sockets: HashMap<(Ipv6Addr, u16), AppId>,
}

impl Simulation {
    /// Build a kernel around an entity.
    #[must_use]
    pub fn new(entity: QuantumPhyEntity, config: &SimulationConfig) -> Self {
        Self {
            clock: 0.0,
            seq: 0,
            queue: BinaryHeap::new(),
            stop_time: config.stop_time,
            link: config.link.clone(),
            entity,
            apps: Vec::new(),
            sockets: HashMap::new(),
        }
    }

    /// Current virtual time in seconds.
    #[must_use]
    pub fn now(&self) -> f64 {
        self.clock
    }

    /// Raise or lower the horizon past which events are dropped.
    pub fn stop_at(&mut self, time: f64) {
        self.stop_time = time;
    }

    /// Enqueue an event after a relative delay.
    pub fn schedule(&mut self, delay: f64, event: SimEvent) {
        self.schedule_at(self.clock + delay, event);
    }

    /// Enqueue an event for the current virtual time (fires after the
    /// events already queued for this time).
    pub fn schedule_now(&mut self, event: SimEvent) {
        self.schedule_at(self.clock, event);
    }

    /// Enqueue an event at an absolute virtual time.
    pub fn schedule_at(&mut self, time: f64, event: SimEvent) {
        let seq = self.seq;
        self.seq += 1;
        trace!("scheduling {event:?} at {time:.6}s (seq {seq})");
        self.queue.push(Scheduled { time, seq, event });
    }

    /// Install an application on an owner's node, active from `start` to
    /// `stop` inclusive. Its `on_start` fires at `start`.
    pub fn install_app(
        &mut self,
        owner: &str,
        app: Box<dyn Application>,
        start: f64,
        stop: f64,
    ) -> AppId {
        let id = AppId(self.apps.len());
        self.apps.push(AppSlot {
            app: Some(app),
            owner: owner.to_string(),
            start,
            stop,
        });
        self.schedule_at(start, SimEvent::AppStart(id));
        id
    }

    /// Owner of an installed application.
    #[must_use]
    pub fn app_owner(&self, id: AppId) -> &str {
        &self.apps[id.0].owner
    }

    /// Downcast an installed application for result inspection.
    #[must_use]
    pub fn app_as<T: 'static>(&self, id: AppId) -> Option<&T> {
        self.apps
            .get(id.0)
            .and_then(|slot| slot.app.as_deref())
            .and_then(|app| app.as_any().downcast_ref::<T>())
    }

    /// Downcast an installed application for reconfiguration between runs
    /// (repeat experiments re-arm a source app with fresh qubit names).
    pub fn app_as_mut<T: 'static>(&mut self, id: AppId) -> Option<&mut T> {
        self.apps
            .get_mut(id.0)
            .and_then(|slot| slot.app.as_deref_mut())
            .and_then(|app| app.as_any_mut().downcast_mut::<T>())
    }

    /// Extend an application's active window (repeat experiments).
    pub fn extend_app_window(&mut self, id: AppId, stop: f64) {
        self.apps[id.0].stop = stop;
    }

    /// Bind a receive socket; delivery routes on (address, port).
    ///
    /// # Errors
    ///
    /// [`NetSimError::Network`] when the endpoint is taken.
    pub fn bind(&mut self, address: Ipv6Addr, port: u16, app: AppId) -> Result<()> {
        if self.sockets.contains_key(&(address, port)) {
            return Err(NetSimError::Network(format!(
                "endpoint [{address}]:{port} already bound"
            )));
        }
        debug!("binding [{address}]:{port} for app {app:?}");
        self.sockets.insert((address, port), app);
        Ok(())
    }

    /// Send an opaque payload; it is delivered one link delay later.
    pub fn send_packet(
        &mut self,
        to: (Ipv6Addr, u16),
        from: (Ipv6Addr, u16),
        payload: Vec<u8>,
    ) {
        info!(
            "at {:.6}s [{}]:{} sent \"{}\" to [{}]:{}",
            self.clock,
            from.0,
            from.1,
            String::from_utf8_lossy(&payload),
            to.0,
            to.1
        );
        let delay = self.link.delay;
        self.schedule(delay, SimEvent::Deliver { to, from, payload });
    }

    fn app_active(&self, id: AppId) -> bool {
        let slot = &self.apps[id.0];
        self.clock >= slot.start && self.clock <= slot.stop
    }

    fn with_app<F>(&mut self, id: AppId, f: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Application, AppId, &mut Simulation) -> Result<()>,
    {
        let mut app = self.apps[id.0].app.take().ok_or_else(|| {
            NetSimError::Network(format!("app {id:?} is already executing"))
        })?;
        let result = f(app.as_mut(), id, self);
        self.apps[id.0].app = Some(app);
        result
    }

    /// Run until the queue drains or the stop horizon is reached.
    ///
    /// # Errors
    ///
    /// The first fatal error aborts the run; recoverable refusals inside
    /// protocols have already been downgraded to no-ops by then.
    pub fn run(&mut self) -> Result<()> {
        while let Some(next) = self.queue.pop() {
            if next.time > self.stop_time {
                // Keep it: a later stop_at may re-admit the horizon.
                self.queue.push(next);
                break;
            }
            self.clock = next.time;
            self.dispatch(next.event)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, event: SimEvent) -> Result<()> {
        match event {
            SimEvent::AppStart(id) => {
                if !self.app_active(id) {
                    trace!("dropping start of {id:?} outside its window");
                    return Ok(());
                }
                self.with_app(id, |app, id, sim| app.on_start(id, sim))
            }
            SimEvent::AppSignal(id, signal) => {
                if !self.app_active(id) {
                    trace!("dropping signal {signal:?} for {id:?} outside its window");
                    return Ok(());
                }
                self.with_app(id, |app, id, sim| app.on_signal(id, signal, sim))
            }
            SimEvent::Deliver { to, from, payload } => {
                let Some(&id) = self.sockets.get(&to) else {
                    debug!("no socket bound at [{}]:{}; packet dropped", to.0, to.1);
                    return Ok(());
                };
                if !self.app_active(id) {
                    trace!("dropping packet for {id:?} outside its window");
                    return Ok(());
                }
                info!(
                    "at {:.6}s [{}]:{} received \"{}\" from [{}]:{}",
                    self.clock,
                    to.0,
                    to.1,
                    String::from_utf8_lossy(&payload),
                    from.0,
                    from.1
                );
                self.with_app(id, |app, id, sim| app.on_packet(id, &payload, from, sim))
            }
            SimEvent::Command(command) => self.execute(command),
        }
    }

    fn execute(&mut self, command: SimCommand) -> Result<()> {
        let moment = self.clock;
        match command {
            SimCommand::GeneratePure {
                actor,
                state,
                qubits,
            } => {
                self.entity
                    .generate_qubits_pure(&actor, &state, &qubits, moment)?;
            }
            SimCommand::ApplyGate {
                actor,
                gate,
                data,
                qubits,
            } => {
                self.entity
                    .apply_gate(&actor, &gate, data.as_deref(), &qubits, moment)?;
            }
            SimCommand::ApplyControlled {
                owner,
                orig_gate,
                gate,
                data,
                controls,
                targets,
            } => {
                self.entity.apply_controlled_operation(
                    &owner,
                    &orig_gate,
                    &gate,
                    data.as_deref(),
                    &controls,
                    &targets,
                    moment,
                )?;
            }
            SimCommand::PartialTrace { qubits } => {
                self.entity.partial_trace(&qubits, moment)?;
            }
            SimCommand::Contract { optimizer } => {
                self.entity.contract(optimizer.as_deref())?;
            }
            SimCommand::Checkpoint => {
                self.entity.checkpoint()?;
            }
            SimCommand::PeekDm { actor, qubits } => {
                self.entity.peek_dm(&actor, &qubits)?;
            }
            SimCommand::CalculateFidelity { pair } => {
                self.entity.calculate_fidelity((&pair.0, &pair.1))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    /// Records the virtual times and payload order it observes.
    #[derive(Default)]
    struct Probe {
        starts: Vec<f64>,
        signals: Vec<(f64, String)>,
        packets: Vec<(f64, String)>,
    }

    impl Application for Probe {
        fn on_start(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
            self.starts.push(sim.now());
            let addr = Ipv6Addr::LOCALHOST;
            sim.bind(addr, 9, id)?;
            Ok(())
        }

        fn on_signal(&mut self, _id: AppId, signal: AppSignal, sim: &mut Simulation) -> Result<()> {
            self.signals.push((sim.now(), format!("{signal:?}")));
            Ok(())
        }

        fn on_packet(
            &mut self,
            _id: AppId,
            payload: &[u8],
            _from: (Ipv6Addr, u16),
            sim: &mut Simulation,
        ) -> Result<()> {
            self.packets
                .push((sim.now(), String::from_utf8_lossy(payload).into_owned()));
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    fn sim() -> Simulation {
        let entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
        Simulation::new(entity, &SimulationConfig::default())
    }

    #[test]
    fn same_time_events_fire_in_scheduling_order() {
        let mut sim = sim();
        let id = sim.install_app("Alice", Box::<Probe>::default(), 0.0, 10.0);
        sim.schedule_at(1.0, SimEvent::AppSignal(id, AppSignal::Teleport));
        sim.schedule_at(1.0, SimEvent::AppSignal(id, AppSignal::MeasureAndSend));
        sim.run().unwrap();
        let probe = sim.app_as::<Probe>(id).unwrap();
        assert_eq!(probe.signals.len(), 2);
        assert!(probe.signals[0].1.contains("Teleport"));
        assert!(probe.signals[1].1.contains("MeasureAndSend"));
    }

    #[test]
    fn delivery_is_later_than_send_by_the_link_delay() {
        let mut sim = sim();
        let id = sim.install_app("Alice", Box::<Probe>::default(), 0.0, 10.0);
        sim.run().unwrap();
        let addr = Ipv6Addr::LOCALHOST;
        sim.send_packet((addr, 9), (addr, 10), b"ping".to_vec());
        sim.run().unwrap();
        let probe = sim.app_as::<Probe>(id).unwrap();
        assert_eq!(probe.packets.len(), 1);
        assert!((probe.packets[0].0 - CLASSICAL_DELAY).abs() < 1e-12);
        assert_eq!(probe.packets[0].1, "ping");
    }

    #[test]
    fn events_outside_the_app_window_are_dropped() {
        let mut sim = sim();
        let id = sim.install_app("Alice", Box::<Probe>::default(), 0.0, 1.0);
        sim.schedule_at(2.0, SimEvent::AppSignal(id, AppSignal::Teleport));
        sim.run().unwrap();
        let probe = sim.app_as::<Probe>(id).unwrap();
        assert_eq!(probe.starts.len(), 1);
        assert!(probe.signals.is_empty());
    }

    #[test]
    fn scheduled_commands_mutate_the_entity() {
        let mut sim = sim();
        let alice = Actor::Owner("Alice".to_string());
        sim.schedule_at(
            0.5,
            SimEvent::Command(SimCommand::GeneratePure {
                actor: alice.clone(),
                state: vec![Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0)],
                qubits: vec!["q".to_string()],
            }),
        );
        sim.schedule_at(
            1.0,
            SimEvent::Command(SimCommand::ApplyGate {
                actor: alice.clone(),
                gate: crate::basis::gate_name("PX"),
                data: None,
                qubits: vec!["q".to_string()],
            }),
        );
        sim.run().unwrap();
        assert!(sim.entity.node("Alice").own_qubit("q"));
        let now = sim.now();
        let (outcome, _) = sim.entity.measure(&alice, "q", now).unwrap();
        assert_eq!(outcome, 1);
    }

    #[test]
    fn stop_horizon_freezes_the_queue() {
        let mut sim = sim();
        let id = sim.install_app("Alice", Box::<Probe>::default(), 0.0, 100.0);
        sim.schedule_at(50.0, SimEvent::AppSignal(id, AppSignal::Teleport));
        sim.stop_at(10.0);
        sim.run().unwrap();
        assert!(sim.app_as::<Probe>(id).unwrap().signals.is_empty());
        // Raising the horizon re-admits the event.
        sim.stop_at(60.0);
        sim.run().unwrap();
        assert_eq!(sim.app_as::<Probe>(id).unwrap().signals.len(), 1);
    }
}
