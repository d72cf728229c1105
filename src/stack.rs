//! # Topology Wiring and Protocol Installation
//!
//! Experiment drivers build owners, assign addresses and ranks, install the
//! quantum network stack (one EPR-distribution app pair per directed edge of
//! the full mesh) and then install the protocol under test. The helpers
//! here encapsulate the construction-order contract: a destination app
//! allocates its receive port from its node, and its source peer targets
//! the port the destination is about to allocate, so sources are always
//! built first.

use std::net::Ipv6Addr;

use crate::apps::{
    DistillApp, DistillNestedAdaptApp, DistillNestedApp, DistributeEprDstApp,
    DistributeEprSrcApp, EntSwapAdaptApp, EntSwapAdaptLocalApp, EntSwapDstApp, EntSwapSrcApp,
    Qubit, TelepAdaptApp, TelepDstApp, TelepLinAdaptApp, TelepSrcApp,
};
use crate::basis::{APP_DISTILL, APP_DISTILL_NESTED, APP_DIST_EPR, APP_TELEP, ETERNITY};
use crate::channel::QuantumChannel;
use crate::kernel::{AppId, Simulation};
use crate::node::QuantumMemory;
use crate::phy_entity::QuantumPhyEntity;
use crate::{NetSimError, Result};

/// Assign sequential addresses under `2001:1::/64` and ranks to every owner.
pub fn assign_addresses(entity: &mut QuantumPhyEntity) {
    let owners: Vec<String> = entity.owners().map(str::to_string).collect();
    for (rank, owner) in owners.iter().enumerate() {
        let address = Ipv6Addr::new(0x2001, 0x1, 0, 0, 0, 0, 0, (rank + 1) as u16);
        entity.set_owner_address(owner, address);
        entity.set_owner_rank(owner, rank as u32);
    }
}

fn dst_endpoint(sim: &Simulation, conn: &QuantumChannel) -> Result<(Ipv6Addr, u16)> {
    let node = conn.dst(&sim.entity);
    let address = node.address().ok_or_else(|| {
        NetSimError::Network(format!(
            "owner {} has no address; assign addresses before installing apps",
            conn.dst_owner()
        ))
    })?;
    Ok((address, node.next_port()))
}

fn src_endpoint(sim: &Simulation, conn: &QuantumChannel) -> Result<(Ipv6Addr, u16)> {
    let node = conn.src(&sim.entity);
    let address = node.address().ok_or_else(|| {
        NetSimError::Network(format!(
            "owner {} has no address; assign addresses before installing apps",
            conn.src_owner()
        ))
    })?;
    Ok((address, node.next_port()))
}

/// Installs the EPR-distribution service over the full mesh.
#[derive(Debug, Default)]
pub struct QuantumNetStackHelper;

impl QuantumNetStackHelper {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Install one source/destination pair per directed owner pair.
    ///
    /// # Errors
    ///
    /// Fails when addresses are not assigned yet.
    pub fn install(&self, sim: &mut Simulation) -> Result<()> {
        let owners: Vec<String> = sim.entity.owners().map(str::to_string).collect();
        for src in &owners {
            for dst in &owners {
                if src != dst {
                    let conn = QuantumChannel::new(src.clone(), dst.clone());
                    install_distribute_epr_pair(sim, &conn, 0.0, ETERNITY)?;
                }
            }
        }
        Ok(())
    }
}

/// Install an EPR distribution pair over one channel and register it.
///
/// # Errors
///
/// Fails when the destination has no address.
pub fn install_distribute_epr_pair(
    sim: &mut Simulation,
    conn: &QuantumChannel,
    start: f64,
    stop: f64,
) -> Result<(AppId, AppId)> {
    let peer = dst_endpoint(sim, conn)?;
    let src_id = sim.install_app(
        conn.src_owner(),
        Box::new(DistributeEprSrcApp::new(conn.clone(), peer)),
        start,
        stop,
    );
    let dst_port = sim.entity.node_mut(conn.dst_owner()).alloc_port();
    let dst_id = sim.install_app(
        conn.dst_owner(),
        Box::new(DistributeEprDstApp::new(conn.clone(), dst_port)),
        start,
        stop,
    );
    sim.entity
        .add_conn_apps(conn.clone(), APP_DIST_EPR, (src_id, dst_id));
    Ok((src_id, dst_id))
}

/// Install a teleportation pair: Alice's `qubits`, Bob's `qubit`, and the
/// optional input state.
///
/// # Errors
///
/// Fails when the destination has no address.
pub fn install_telep_pair(
    sim: &mut Simulation,
    conn: &QuantumChannel,
    qubits: (String, String),
    qubit: String,
    input: Option<Qubit>,
    start: f64,
    stop: f64,
) -> Result<(AppId, AppId)> {
    let peer = dst_endpoint(sim, conn)?;
    let src_id = sim.install_app(
        conn.src_owner(),
        Box::new(TelepSrcApp::new(
            conn.clone(),
            qubits,
            qubit.clone(),
            input,
            peer,
        )),
        start,
        stop,
    );
    let dst_port = sim.entity.node_mut(conn.dst_owner()).alloc_port();
    let dst_id = sim.install_app(
        conn.dst_owner(),
        Box::new(TelepDstApp::new(conn.dst_owner(), qubit, dst_port)),
        start,
        stop,
    );
    sim.entity
        .add_conn_apps(conn.clone(), APP_TELEP, (src_id, dst_id));
    Ok((src_id, dst_id))
}

/// Install a one-shot distillation pair over the channel.
///
/// # Errors
///
/// Fails when either endpoint has no address.
pub fn install_distill_pair(
    sim: &mut Simulation,
    conn: &QuantumChannel,
    epr_goal: (String, String),
    epr_meas: (String, String),
    start: f64,
    stop: f64,
) -> Result<(AppId, AppId)> {
    // Alice targets the port Bob is about to allocate; Bob targets the port
    // Alice just allocated.
    let alice_peer = dst_endpoint(sim, conn)?;
    let alice_port = sim.entity.node_mut(conn.src_owner()).alloc_port();
    let alice = DistillApp::new(
        false,
        conn.clone(),
        (epr_goal.1.clone(), epr_meas.1.clone()),
        epr_goal.clone(),
        epr_meas.clone(),
        alice_port,
        alice_peer,
    );
    let src_id = sim.install_app(conn.src_owner(), Box::new(alice), start, stop);

    let (src_addr, src_next) = src_endpoint(sim, conn)?;
    let bob_peer = (src_addr, src_next - 1);
    let bob_port = sim.entity.node_mut(conn.dst_owner()).alloc_port();
    let bob = DistillApp::new(
        true,
        conn.clone(),
        (epr_goal.1.clone(), epr_meas.1.clone()),
        epr_goal,
        epr_meas,
        bob_port,
        bob_peer,
    );
    let dst_id = sim.install_app(conn.dst_owner(), Box::new(bob), start, stop);

    sim.entity
        .add_conn_apps(conn.clone(), APP_DISTILL, (src_id, dst_id));
    Ok((src_id, dst_id))
}

/// Install a nested distillation pair over the channel.
///
/// # Errors
///
/// Fails when either endpoint has no address.
pub fn install_distill_nested_pair(
    sim: &mut Simulation,
    conn: &QuantumChannel,
    src_qubits: Vec<String>,
    dst_qubits: Vec<String>,
    start: f64,
    stop: f64,
) -> Result<(AppId, AppId)> {
    let alice_peer = dst_endpoint(sim, conn)?;
    let alice_port = sim.entity.node_mut(conn.src_owner()).alloc_port();
    let alice = DistillNestedApp::new(
        false,
        conn.clone(),
        src_qubits.clone(),
        dst_qubits.clone(),
        alice_port,
        alice_peer,
    );
    let src_id = sim.install_app(conn.src_owner(), Box::new(alice), start, stop);

    let (src_addr, src_next) = src_endpoint(sim, conn)?;
    let bob_peer = (src_addr, src_next - 1);
    let bob_port = sim.entity.node_mut(conn.dst_owner()).alloc_port();
    let bob = DistillNestedApp::new(
        true,
        conn.clone(),
        src_qubits,
        dst_qubits,
        bob_port,
        bob_peer,
    );
    let dst_id = sim.install_app(conn.dst_owner(), Box::new(bob), start, stop);

    sim.entity
        .add_conn_apps(conn.clone(), APP_DISTILL_NESTED, (src_id, dst_id));
    Ok((src_id, dst_id))
}

/// Install an adaptive nested distillation pair over the channel.
///
/// # Errors
///
/// Fails when either endpoint has no address.
pub fn install_distill_nested_adapt_pair(
    sim: &mut Simulation,
    conn: &QuantumChannel,
    src_qubits: Vec<String>,
    dst_qubits: Vec<String>,
    flag_qubit: String,
    start: f64,
    stop: f64,
) -> Result<(AppId, AppId)> {
    let alice_port = sim.entity.node_mut(conn.src_owner()).alloc_port();
    let alice = DistillNestedAdaptApp::new(
        false,
        conn.clone(),
        src_qubits.clone(),
        dst_qubits.clone(),
        flag_qubit.clone(),
        alice_port,
    );
    let src_id = sim.install_app(conn.src_owner(), Box::new(alice), start, stop);

    let bob_port = sim.entity.node_mut(conn.dst_owner()).alloc_port();
    let bob = DistillNestedAdaptApp::new(
        true,
        conn.clone(),
        src_qubits,
        dst_qubits,
        flag_qubit,
        bob_port,
    );
    let dst_id = sim.install_app(conn.dst_owner(), Box::new(bob), start, stop);

    sim.entity
        .add_conn_apps(conn.clone(), APP_DISTILL_NESTED, (src_id, dst_id));
    Ok((src_id, dst_id))
}

/// Install one intermediate owner's swap role targeting the last owner.
///
/// # Errors
///
/// Fails when the destination has no address.
pub fn install_ent_swap_src(
    sim: &mut Simulation,
    conn: &QuantumChannel,
    qubits: (String, String),
    start: f64,
    stop: f64,
) -> Result<AppId> {
    let peer = dst_endpoint(sim, conn)?;
    Ok(sim.install_app(
        conn.src_owner(),
        Box::new(EntSwapSrcApp::new(conn.clone(), qubits, peer)),
        start,
        stop,
    ))
}

/// Install the last owner's correction role of the swap chain.
pub fn install_ent_swap_dst(
    sim: &mut Simulation,
    owner: &str,
    qubit: String,
    count: usize,
    start: f64,
    stop: f64,
) -> AppId {
    let port = sim.entity.node_mut(owner).alloc_port();
    sim.install_app(
        owner,
        Box::new(EntSwapDstApp::new(owner, qubit, count, port)),
        start,
        stop,
    )
}

/// Install the coherent adaptive swap app on the last owner.
pub fn install_ent_swap_adapt(
    sim: &mut Simulation,
    owner: &str,
    qubits_former: QuantumMemory,
    qubits_latter: QuantumMemory,
    start: f64,
    stop: f64,
) -> AppId {
    sim.install_app(
        owner,
        Box::new(EntSwapAdaptApp::new(owner, qubits_former, qubits_latter)),
        start,
        stop,
    )
}

/// Install the nearest-neighbor adaptive swap app on the last owner.
pub fn install_ent_swap_adapt_local(
    sim: &mut Simulation,
    owner: &str,
    qubits_former: QuantumMemory,
    qubits_latter: QuantumMemory,
    start: f64,
    stop: f64,
) -> AppId {
    sim.install_app(
        owner,
        Box::new(EntSwapAdaptLocalApp::new(
            owner,
            qubits_former,
            qubits_latter,
        )),
        start,
        stop,
    )
}

/// Install a single-hop adaptive teleportation app on the channel's source.
///
/// # Errors
///
/// Fails when the channel is not wired for EPR distribution at run time.
pub fn install_telep_adapt(
    sim: &mut Simulation,
    conn: &QuantumChannel,
    last_owner: &str,
    qubits: (String, String),
    qubit: String,
    input: Option<Qubit>,
    start: f64,
    stop: f64,
) -> AppId {
    sim.install_app(
        conn.src_owner(),
        Box::new(TelepAdaptApp::new(
            conn.clone(),
            last_owner,
            qubits,
            qubit,
            input,
        )),
        start,
        stop,
    )
}

/// Install the whole adaptive teleportation chain.
///
/// `eprs[i]` is the pair owner i distributes toward owner i+1; `input` is
/// generated on the first owner and carried down the chain.
///
/// # Errors
///
/// Fails when fewer than two owners are given or addresses are missing.
pub fn install_telep_lin_adapt_chain(
    sim: &mut Simulation,
    owners: &[String],
    eprs: &[(String, String)],
    input: Qubit,
    start: f64,
    stop: f64,
) -> Result<Vec<AppId>> {
    if owners.len() < 2 || eprs.len() != owners.len() - 1 {
        return Err(NetSimError::Configuration(format!(
            "chain of {} owner(s) needs {} EPR pair(s)",
            owners.len(),
            owners.len().saturating_sub(1)
        )));
    }
    let mut ids = Vec::with_capacity(owners.len());
    for (rank, owner) in owners.iter().enumerate() {
        let conn = if rank + 1 < owners.len() {
            Some(QuantumChannel::new(
                owner.clone(),
                owners[rank + 1].clone(),
            ))
        } else {
            None
        };
        let peer = match &conn {
            Some(conn) => Some(dst_endpoint(sim, conn)?),
            None => None,
        };
        let port = sim.entity.node_mut(owner).alloc_port();
        let epr = if rank + 1 < owners.len() {
            eprs[rank].clone()
        } else {
            (String::new(), String::new())
        };
        let app = TelepLinAdaptApp::new(
            owner.clone(),
            conn,
            epr,
            (rank == 0).then(|| input.clone()),
            port,
            peer,
        );
        ids.push(sim.install_app(owner, Box::new(app), start, stop));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::SimulationConfig;

    #[test]
    fn full_mesh_registers_every_directed_edge() {
        let mut entity = QuantumPhyEntity::new(&["Alice", "Bob", "Carol"]);
        assign_addresses(&mut entity);
        let mut sim = Simulation::new(entity, &SimulationConfig::default());
        QuantumNetStackHelper::new().install(&mut sim).unwrap();
        for src in ["Alice", "Bob", "Carol"] {
            for dst in ["Alice", "Bob", "Carol"] {
                if src != dst {
                    let conn = QuantumChannel::new(src, dst);
                    assert!(sim.entity.conn_apps(&conn, APP_DIST_EPR).is_some());
                }
            }
        }
    }

    #[test]
    fn addresses_and_ranks_are_sequential() {
        let mut entity = QuantumPhyEntity::new(&["Alice", "Bob"]);
        assign_addresses(&mut entity);
        assert!(entity.node("Alice").address().is_some());
        assert_ne!(
            entity.node("Alice").address(),
            entity.node("Bob").address()
        );
        assert_eq!(entity.node("Alice").rank(), Some(0));
        assert_eq!(entity.node("Bob").rank(), Some(1));
    }
}
