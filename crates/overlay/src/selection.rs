//! Storage-node selection policy.

use crate::{NodeDossier, OverlayError, Result};
use orbit_types::NodeId;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, SystemTime};

/// Selection preferences.
#[derive(Debug, Clone)]
pub struct NodeSelectionConfig {
    /// Minimum audits before a node counts as reputable.
    pub audit_count: u64,
    /// Fraction of each selection that must come from new nodes.
    pub new_node_percentage: f64,
    /// How recently a node must have been contacted to count as online.
    pub online_window: Duration,
    /// Require distinct last-seen IPs across the selection.
    pub distinct_ip: bool,
}

impl Default for NodeSelectionConfig {
    fn default() -> Self {
        Self {
            audit_count: 100,
            new_node_percentage: 0.05,
            online_window: Duration::from_secs(3600),
            distinct_ip: false,
        }
    }
}

/// A request for storage-node candidates.
#[derive(Debug, Clone, Default)]
pub struct FindStorageNodesRequest {
    pub requested_count: usize,
    pub free_bandwidth: u64,
    pub free_disk: u64,
    pub excluded_nodes: Vec<NodeId>,
}

pub(crate) fn node_is_online(
    dossier: &NodeDossier,
    online_window: Duration,
    now: SystemTime,
) -> bool {
    if dossier.disqualified_at.is_some() {
        return false;
    }
    match dossier.last_contacted {
        Some(contacted) => now
            .duration_since(contacted)
            .map(|elapsed| elapsed <= online_window)
            .unwrap_or(true),
        None => false,
    }
}

pub(crate) fn select(
    nodes: &HashMap<NodeId, NodeDossier>,
    config: &NodeSelectionConfig,
    request: &FindStorageNodesRequest,
) -> Result<Vec<NodeDossier>> {
    if request.requested_count == 0 {
        return Ok(Vec::new());
    }

    let now = SystemTime::now();
    let excluded: HashSet<NodeId> = request.excluded_nodes.iter().copied().collect();

    let mut reputable: Vec<&NodeDossier> = Vec::new();
    let mut fresh: Vec<&NodeDossier> = Vec::new();
    for dossier in nodes.values() {
        if excluded.contains(&dossier.node_id)
            || !node_is_online(dossier, config.online_window, now)
            || dossier.free_disk < request.free_disk
            || dossier.free_bandwidth < request.free_bandwidth
        {
            continue;
        }
        if dossier.audit_count >= config.audit_count {
            reputable.push(dossier);
        } else {
            fresh.push(dossier);
        }
    }

    let mut rng = rand::thread_rng();
    reputable.shuffle(&mut rng);
    fresh.shuffle(&mut rng);

    let new_needed =
        (request.requested_count as f64 * config.new_node_percentage).ceil() as usize;
    let new_needed = new_needed.min(request.requested_count);
    let reputable_needed = request.requested_count - new_needed;

    let mut selected: Vec<NodeDossier> = Vec::with_capacity(request.requested_count);
    let mut seen_ips: HashSet<String> = HashSet::new();
    let mut admit = |dossier: &NodeDossier,
                     selected: &mut Vec<NodeDossier>,
                     seen_ips: &mut HashSet<String>| {
        if config.distinct_ip && !seen_ips.insert(dossier.last_seen_ip.clone()) {
            return false;
        }
        selected.push(dossier.clone());
        true
    };

    let mut fresh_iter = fresh.into_iter();
    let mut new_selected = 0;
    for dossier in fresh_iter.by_ref() {
        if new_selected == new_needed {
            break;
        }
        if admit(dossier, &mut selected, &mut seen_ips) {
            new_selected += 1;
        }
    }
    if new_selected < new_needed {
        // padding with reputable nodes would drop the new fraction below the floor
        return Err(OverlayError::NotEnoughNodes {
            requested: request.requested_count,
            found: selected.len(),
        });
    }

    let mut reputable_selected = 0;
    for dossier in reputable {
        if reputable_selected == reputable_needed {
            break;
        }
        if admit(dossier, &mut selected, &mut seen_ips) {
            reputable_selected += 1;
        }
    }
    // a reputable shortfall may be topped up with surplus new nodes; the
    // percentage is a floor, not a ceiling
    for dossier in fresh_iter {
        if selected.len() == request.requested_count {
            break;
        }
        admit(dossier, &mut selected, &mut seen_ips);
    }

    if selected.len() < request.requested_count {
        return Err(OverlayError::NotEnoughNodes {
            requested: request.requested_count,
            found: selected.len(),
        });
    }

    Ok(selected)
}
