//! Overlay node registry and storage-node selection
//!
//! Tracks per-node dossiers (address, capacity, audit and uptime counters)
//! and answers the two questions the satellite services ask: which nodes
//! should receive new pieces, and which pieces of a pointer have lost their
//! holder.

mod selection;

pub use selection::{FindStorageNodesRequest, NodeSelectionConfig};

use orbit_types::{NodeId, RemotePiece};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("not enough nodes: requested {requested}, found {found}")]
    NotEnoughNodes { requested: usize, found: usize },

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("node is offline: {0}")]
    NodeOffline(NodeId),
}

pub type Result<T> = std::result::Result<T, OverlayError>;

/// Per-node overlay record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDossier {
    pub node_id: NodeId,
    pub address: String,
    pub last_seen_ip: String,
    pub free_disk: u64,
    pub free_bandwidth: u64,
    pub audit_count: u64,
    pub audit_success_count: u64,
    pub uptime_count: u64,
    pub uptime_success_count: u64,
    pub disqualified_at: Option<SystemTime>,
    pub last_contacted: Option<SystemTime>,
}

impl NodeDossier {
    pub fn new(node_id: NodeId, address: String) -> Self {
        Self {
            node_id,
            address,
            last_seen_ip: String::new(),
            free_disk: u64::MAX,
            free_bandwidth: u64::MAX,
            audit_count: 0,
            audit_success_count: 0,
            uptime_count: 0,
            uptime_success_count: 0,
            disqualified_at: None,
            last_contacted: Some(SystemTime::now()),
        }
    }
}

/// In-memory overlay service.
pub struct Overlay {
    nodes: RwLock<HashMap<NodeId, NodeDossier>>,
    config: NodeSelectionConfig,
}

impl Overlay {
    pub fn new(config: NodeSelectionConfig) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &NodeSelectionConfig {
        &self.config
    }

    pub fn put(&self, dossier: NodeDossier) {
        self.nodes
            .write()
            .expect("overlay lock poisoned")
            .insert(dossier.node_id, dossier);
    }

    pub fn get(&self, node_id: &NodeId) -> Result<NodeDossier> {
        self.nodes
            .read()
            .expect("overlay lock poisoned")
            .get(node_id)
            .cloned()
            .ok_or(OverlayError::NodeNotFound(*node_id))
    }

    /// Record an audit outcome against a node's counters.
    pub fn update_stats(&self, node_id: &NodeId, is_up: bool, audit_success: bool) -> Result<()> {
        let mut nodes = self.nodes.write().expect("overlay lock poisoned");
        let dossier = nodes
            .get_mut(node_id)
            .ok_or(OverlayError::NodeNotFound(*node_id))?;
        dossier.uptime_count += 1;
        if is_up {
            dossier.uptime_success_count += 1;
            dossier.last_contacted = Some(SystemTime::now());
            dossier.audit_count += 1;
            if audit_success {
                dossier.audit_success_count += 1;
            }
        }
        Ok(())
    }

    pub fn disqualify(&self, node_id: &NodeId) -> Result<()> {
        let mut nodes = self.nodes.write().expect("overlay lock poisoned");
        let dossier = nodes
            .get_mut(node_id)
            .ok_or(OverlayError::NodeNotFound(*node_id))?;
        dossier.disqualified_at = Some(SystemTime::now());
        Ok(())
    }

    pub fn mark_contacted(&self, node_id: &NodeId) -> Result<()> {
        let mut nodes = self.nodes.write().expect("overlay lock poisoned");
        let dossier = nodes
            .get_mut(node_id)
            .ok_or(OverlayError::NodeNotFound(*node_id))?;
        dossier.last_contacted = Some(SystemTime::now());
        Ok(())
    }

    fn is_online_at(&self, dossier: &NodeDossier, now: SystemTime) -> bool {
        selection::node_is_online(dossier, self.config.online_window, now)
    }

    /// Whether the overlay currently considers the node reachable.
    pub fn is_online(&self, node_id: &NodeId) -> bool {
        let nodes = self.nodes.read().expect("overlay lock poisoned");
        nodes
            .get(node_id)
            .map(|dossier| self.is_online_at(dossier, SystemTime::now()))
            .unwrap_or(false)
    }

    /// Subset of `node_ids` that are unknown, disqualified, or offline.
    pub fn known_offline(&self, node_ids: &[NodeId]) -> Vec<NodeId> {
        let now = SystemTime::now();
        let nodes = self.nodes.read().expect("overlay lock poisoned");
        node_ids
            .iter()
            .filter(|node_id| {
                nodes
                    .get(node_id)
                    .map(|dossier| !self.is_online_at(dossier, now))
                    .unwrap_or(true)
            })
            .copied()
            .collect()
    }

    /// Piece numbers of `pieces` whose holder has been lost.
    pub fn get_missing_pieces(&self, pieces: &[RemotePiece]) -> Vec<u16> {
        let now = SystemTime::now();
        let nodes = self.nodes.read().expect("overlay lock poisoned");
        let missing: Vec<u16> = pieces
            .iter()
            .filter(|piece| {
                nodes
                    .get(&piece.node_id)
                    .map(|dossier| !self.is_online_at(dossier, now))
                    .unwrap_or(true)
            })
            .map(|piece| piece.piece_num)
            .collect();
        if !missing.is_empty() {
            debug!(missing = missing.len(), total = pieces.len(), "pieces without live holders");
        }
        missing
    }

    /// Select storage nodes for new piece placements.
    pub fn find_storage_nodes(&self, request: &FindStorageNodesRequest) -> Result<Vec<NodeDossier>> {
        let nodes = self.nodes.read().expect("overlay lock poisoned");
        selection::select(&nodes, &self.config, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn online_node(audits: u64) -> NodeDossier {
        let mut dossier = NodeDossier::new(NodeId::random(), "mem:test".to_string());
        dossier.audit_count = audits;
        dossier
    }

    fn overlay() -> Overlay {
        Overlay::new(NodeSelectionConfig {
            audit_count: 5,
            new_node_percentage: 0.0,
            online_window: Duration::from_secs(3600),
            distinct_ip: false,
        })
    }

    #[test]
    fn unknown_nodes_are_offline() {
        let overlay = overlay();
        let ghost = NodeId::random();
        assert!(!overlay.is_online(&ghost));
        assert_eq!(overlay.known_offline(&[ghost]), vec![ghost]);
    }

    #[test]
    fn disqualified_nodes_are_offline() {
        let overlay = overlay();
        let dossier = online_node(10);
        let node_id = dossier.node_id;
        overlay.put(dossier);
        assert!(overlay.is_online(&node_id));

        overlay.disqualify(&node_id).expect("disqualify");
        assert!(!overlay.is_online(&node_id));
    }

    #[test]
    fn stale_contact_is_offline() {
        let overlay = overlay();
        let mut dossier = online_node(10);
        dossier.last_contacted = Some(SystemTime::now() - Duration::from_secs(7200));
        let node_id = dossier.node_id;
        overlay.put(dossier);

        assert!(!overlay.is_online(&node_id));
    }

    #[test]
    fn missing_pieces_follow_holder_state() {
        let overlay = overlay();
        let live = online_node(10);
        let live_id = live.node_id;
        overlay.put(live);

        let pieces = vec![
            RemotePiece {
                piece_num: 0,
                node_id: live_id,
                hash: vec![],
            },
            RemotePiece {
                piece_num: 3,
                node_id: NodeId::random(),
                hash: vec![],
            },
        ];
        assert_eq!(overlay.get_missing_pieces(&pieces), vec![3]);
    }

    #[test]
    fn update_stats_bumps_counters() {
        let overlay = overlay();
        let dossier = online_node(0);
        let node_id = dossier.node_id;
        overlay.put(dossier);

        overlay.update_stats(&node_id, true, true).expect("stats");
        overlay.update_stats(&node_id, true, false).expect("stats");
        overlay.update_stats(&node_id, false, false).expect("stats");

        let dossier = overlay.get(&node_id).expect("dossier");
        assert_eq!(dossier.audit_count, 2);
        assert_eq!(dossier.audit_success_count, 1);
        assert_eq!(dossier.uptime_count, 3);
        assert_eq!(dossier.uptime_success_count, 2);
    }
}
