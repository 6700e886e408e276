//! The repair pipeline.

use crate::metrics::RepairMetrics;
use crate::{RepairError, Result};
use orbit_erasure::encode_segment;
use orbit_metainfo::Service;
use orbit_orders::OrdersService;
use orbit_overlay::{FindStorageNodesRequest, Overlay};
use orbit_piecestore::{EcClient, Ranger};
use orbit_types::{NodeId, RemotePiece};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RepairerConfig {
    /// Bound on one whole repair operation.
    pub timeout: Duration,
}

impl Default for RepairerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
        }
    }
}

/// Reconstructs under-replicated segments and rewrites their pointers.
pub struct Repairer {
    metainfo: Arc<Service>,
    orders: Arc<OrdersService>,
    overlay: Arc<Overlay>,
    ec: EcClient,
    config: RepairerConfig,
    metrics: Option<Arc<RepairMetrics>>,
}

impl Repairer {
    pub fn new(
        metainfo: Arc<Service>,
        orders: Arc<OrdersService>,
        overlay: Arc<Overlay>,
        ec: EcClient,
        config: RepairerConfig,
    ) -> Self {
        Self {
            metainfo,
            orders,
            overlay,
            ec,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RepairMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Repair the segment at `path`.
    ///
    /// On timeout every outstanding piece transfer is cancelled and the
    /// pointer is left untouched.
    pub async fn repair(&self, path: &str, cancel: &CancellationToken) -> Result<()> {
        let op_cancel = cancel.child_token();
        match tokio::time::timeout(self.config.timeout, self.repair_inner(path, &op_cancel)).await
        {
            Ok(result) => result,
            Err(_) => {
                op_cancel.cancel();
                warn!(path, "repair timed out");
                Err(RepairError::Timeout)
            }
        }
    }

    async fn repair_inner(&self, path: &str, cancel: &CancellationToken) -> Result<()> {
        let mut pointer = self.metainfo.get(path).await?;
        let remote = match pointer.remote() {
            Some(remote) => remote.clone(),
            None => return Err(RepairError::InlineSegment(path.to_string())),
        };
        if let Some(metrics) = &self.metrics {
            metrics.repair_attempts.inc();
        }

        let scheme = remote.redundancy;
        let missing: HashSet<u16> = self
            .overlay
            .get_missing_pieces(&remote.pieces)
            .into_iter()
            .collect();

        let exclude_node_ids: Vec<NodeId> =
            remote.pieces.iter().map(|piece| piece.node_id).collect();
        let healthy_pieces: Vec<RemotePiece> = remote
            .pieces
            .iter()
            .filter(|piece| !missing.contains(&piece.piece_num))
            .cloned()
            .collect();
        let healthy = healthy_pieces.len();

        if healthy < scheme.min_req as usize {
            if let Some(metrics) = &self.metrics {
                metrics.repair_nodes_unavailable.inc();
            }
            return Err(RepairError::Irreparable {
                path: path.to_string(),
                healthy,
                required: scheme.min_req as usize,
            });
        }
        // equal to the repair threshold still repairs; strictly above does not
        if healthy > scheme.repair_threshold as usize {
            if let Some(metrics) = &self.metrics {
                metrics.repair_unnecessary.inc();
            }
            return Err(RepairError::Unnecessary {
                path: path.to_string(),
                healthy,
                repair_threshold: scheme.repair_threshold as usize,
            });
        }

        if let Some(metrics) = &self.metrics {
            metrics
                .healthy_ratio_before_repair
                .observe(healthy as f64 / scheme.total as f64);
        }

        let get_limits = self
            .orders
            .create_get_repair_order_limits(&pointer, &healthy_pieces)?;

        let piece_size = scheme.piece_size(pointer.size);
        let new_nodes = self.overlay.find_storage_nodes(&FindStorageNodesRequest {
            requested_count: scheme.total as usize - healthy,
            free_bandwidth: piece_size,
            free_disk: piece_size,
            excluded_nodes: exclude_node_ids,
        })?;

        let put_limits = self
            .orders
            .create_put_repair_order_limits(&pointer, &get_limits, &new_nodes)?;

        // reconstruct from any k survivors, then write only the missing
        // piece numbers
        let ranger = self.ec.ranger(get_limits, scheme, pointer.size);
        let segment = ranger.range(0, pointer.size).await?;
        let all_pieces = encode_segment(&segment, &scheme)?;
        drop(segment);
        let upload_pieces: Vec<Option<Vec<u8>>> = all_pieces
            .into_iter()
            .enumerate()
            .map(|(num, piece)| {
                put_limits
                    .get(num)
                    .and_then(|limit| limit.as_ref())
                    .map(|_| piece)
            })
            .collect();

        let outcomes = self.ec.put_pieces(&put_limits, upload_pieces, cancel).await;
        if cancel.is_cancelled() {
            // uploaded pieces are orphaned; garbage collection reaps them
            return Err(RepairError::Cancelled);
        }

        let mut pieces = healthy_pieces;
        pieces.extend(outcomes.into_iter().flatten().map(|outcome| RemotePiece {
            piece_num: outcome.piece_num,
            node_id: outcome.node_id,
            hash: outcome.hash,
        }));

        let healthy_after = pieces.len();
        if let Some(metrics) = &self.metrics {
            if healthy_after <= scheme.repair_threshold as usize {
                metrics.repair_failed.inc();
            } else if healthy_after < scheme.success_threshold as usize {
                metrics.repair_partial.inc();
            } else {
                metrics.repair_success.inc();
            }
            metrics
                .healthy_ratio_after_repair
                .observe(healthy_after as f64 / scheme.total as f64);
        }
        info!(
            path,
            healthy_before = healthy,
            healthy_after,
            success_threshold = scheme.success_threshold,
            "repair rewrote segment pieces"
        );

        // partial repairs still improve durability; the pointer is rewritten
        // in every non-error case
        pointer
            .remote_mut()
            .expect("pointer verified remote above")
            .pieces = pieces;
        pointer.modified = SystemTime::now();
        self.metainfo.put(path, pointer).await?;
        Ok(())
    }
}
