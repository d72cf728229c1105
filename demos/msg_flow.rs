//! Classical message flow between two owners, without any quantum state.
//!
//! A minimal ping/pong over the simulated link, useful to watch the socket
//! plumbing and the delivery delays in isolation.
//!
//! Run with: `cargo run --example msg_flow`

use std::any::Any;
use std::net::Ipv6Addr;

use quantum_netsim::apps::{node_endpoint, Application};
use quantum_netsim::basis::{ETERNITY, SETUP_DELAY};
use quantum_netsim::kernel::{AppId, Simulation, SimulationConfig};
use quantum_netsim::phy_entity::QuantumPhyEntity;
use quantum_netsim::stack::assign_addresses;
use quantum_netsim::Result;

/// Sends a greeting on start and echoes whatever arrives, a few times.
struct PingPongApp {
    owner: String,
    peer_owner: String,
    port: u16,
    initiator: bool,
    remaining: usize,
}

impl Application for PingPongApp {
    fn on_start(&mut self, id: AppId, sim: &mut Simulation) -> Result<()> {
        let local = node_endpoint(sim, &self.owner, self.port)?;
        sim.bind(local.0, local.1, id)?;
        if self.initiator {
            let to = node_endpoint(sim, &self.peer_owner, self.port)?;
            sim.send_packet(to, local, format!("ping from {}", self.owner).into_bytes());
        }
        Ok(())
    }

    fn on_packet(
        &mut self,
        _id: AppId,
        payload: &[u8],
        from: (Ipv6Addr, u16),
        sim: &mut Simulation,
    ) -> Result<()> {
        println!(
            "{} got \"{}\" at {:.4}s",
            self.owner,
            String::from_utf8_lossy(payload),
            sim.now()
        );
        if self.remaining == 0 {
            return Ok(());
        }
        self.remaining -= 1;
        let local = node_endpoint(sim, &self.owner, self.port)?;
        sim.send_packet(from, local, format!("pong from {}", self.owner).into_bytes());
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn main() -> anyhow::Result<()> {
    quantum_netsim::logging::init();

    let mut entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
    assign_addresses(&mut entity);
    let mut sim = Simulation::new(entity, &SimulationConfig::default());

    let alice_port = sim.entity.node_mut("Alice").alloc_port();
    sim.install_app(
        "Alice",
        Box::new(PingPongApp {
            owner: "Alice".to_string(),
            peer_owner: "Bob".to_string(),
            port: alice_port,
            initiator: true,
            remaining: 3,
        }),
        SETUP_DELAY,
        ETERNITY,
    );
    let bob_port = sim.entity.node_mut("Bob").alloc_port();
    sim.install_app(
        "Bob",
        Box::new(PingPongApp {
            owner: "Bob".to_string(),
            peer_owner: "Alice".to_string(),
            port: bob_port,
            initiator: false,
            remaining: 3,
        }),
        SETUP_DELAY,
        ETERNITY,
    );

    sim.stop_at(1.0);
    sim.run()?;
    Ok(())
}
