//! Stripe verification and reverification.

use crate::containment::{ContainmentStore, PendingAudit};
use crate::metrics::AuditMetrics;
use crate::{AuditError, Report, Result};
use orbit_erasure::{ReedSolomon, Share};
use orbit_orders::{OrderError, OrdersService};
use orbit_piecestore::{NodeDialer, PieceError};
use orbit_types::{AddressedOrderLimit, NodeId, PieceId, Pointer};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Audit input: one stripe of one remote segment.
#[derive(Debug, Clone)]
pub struct Stripe {
    pub pointer: Pointer,
    pub path: String,
    pub index: u64,
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Floor on acceptable node throughput; the per-share timeout is
    /// `share_size / min_bytes_per_second`, clamped below by
    /// `min_download_timeout`.
    pub min_bytes_per_second: u64,
    pub min_download_timeout: Duration,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            min_bytes_per_second: 128,
            min_download_timeout: Duration::from_secs(5),
        }
    }
}

pub(crate) fn download_timeout(config: &VerifierConfig, share_size: u32) -> Duration {
    let rate = config.min_bytes_per_second.max(1);
    let by_rate = Duration::from_secs(share_size as u64 / rate);
    by_rate.max(config.min_download_timeout)
}

/// Downloads stripes and classifies piece holders.
pub struct Verifier {
    orders: Arc<OrdersService>,
    dialer: Arc<dyn NodeDialer>,
    containment: Arc<dyn ContainmentStore>,
    config: VerifierConfig,
    metrics: Option<Arc<AuditMetrics>>,
}

impl Verifier {
    pub fn new(
        orders: Arc<OrdersService>,
        dialer: Arc<dyn NodeDialer>,
        containment: Arc<dyn ContainmentStore>,
        config: VerifierConfig,
    ) -> Self {
        Self {
            orders,
            dialer,
            containment,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AuditMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Download one share per piece holder and classify every contacted
    /// node.
    pub async fn verify(&self, stripe: &Stripe, skip: &HashSet<NodeId>) -> Result<Report> {
        let remote = stripe.pointer.remote().ok_or(AuditError::NotRemote)?;
        let scheme = remote.redundancy;
        let share_size = scheme.share_size;
        let required = scheme.min_req as usize;

        let limits = self.orders.create_audit_order_limits(&stripe.pointer, skip)?;

        let node_by_piece: HashMap<usize, NodeId> = remote
            .pieces
            .iter()
            .map(|piece| (piece.piece_num as usize, piece.node_id))
            .collect();

        let mut offlines: Vec<NodeId> = Vec::new();
        let mut contained: Vec<(usize, NodeId)> = Vec::new();
        let mut candidates: Vec<Share> = Vec::new();

        for piece in &remote.pieces {
            if skip.contains(&piece.node_id) {
                continue;
            }
            let addressed = match &limits[piece.piece_num as usize] {
                Some(addressed) => addressed,
                None => {
                    // the orders service omits limits for nodes it already
                    // believes are offline
                    offlines.push(piece.node_id);
                    continue;
                }
            };

            let result = download_share(
                self.dialer.clone(),
                &self.config,
                addressed,
                stripe.index,
                share_size,
            )
            .await;
            match result {
                Ok(data) => candidates.push(Share {
                    number: piece.piece_num as usize,
                    data,
                }),
                Err(err) if err.is_timeout() => {
                    debug!(node = %piece.node_id, "share download timed out, containing node");
                    contained.push((piece.piece_num as usize, piece.node_id));
                }
                Err(err) if err.is_transport() => {
                    debug!(
                        target: "audit",
                        node = %piece.node_id,
                        divergence = "verify-transport-offline",
                        error = %err,
                        "transport failure during verify"
                    );
                    offlines.push(piece.node_id);
                }
                Err(err) => {
                    debug!(node = %piece.node_id, error = %err, "share download failed, containing node");
                    contained.push((piece.piece_num as usize, piece.node_id));
                }
            }
        }

        if candidates.len() < required {
            return Err(AuditError::NotEnoughShares {
                have: candidates.len(),
                need: required,
                offlines,
            });
        }

        let rs = ReedSolomon::new(required, scheme.total as usize)?;
        let correction = rs.correct(&candidates)?;
        let flagged: HashSet<usize> = correction.flagged.iter().copied().collect();
        let fails: Vec<NodeId> = correction
            .flagged
            .iter()
            .filter_map(|piece_num| node_by_piece.get(piece_num).copied())
            .collect();

        let stripe_bytes = rs.decode(&correction.shares)?;

        let mut pending_audits = Vec::new();
        for (piece_num, node_id) in &contained {
            let expected = rs.encode_single(&stripe_bytes, *piece_num)?;
            let pending = PendingAudit {
                node_id: *node_id,
                piece_id: PieceId::derive(remote.root_piece_id, *node_id),
                stripe_index: stripe.index,
                share_size,
                expected_share_hash: sha256(&expected),
            };
            self.containment.put(pending.clone()).await;
            pending_audits.push(pending);
        }

        let successes: Vec<NodeId> = candidates
            .iter()
            .filter(|share| !flagged.contains(&share.number))
            .filter_map(|share| node_by_piece.get(&share.number).copied())
            .collect();

        let report = Report {
            successes,
            fails,
            offlines,
            pending_audits,
        };
        info!(
            path = stripe.path,
            stripe = stripe.index,
            successes = report.successes.len(),
            fails = report.fails.len(),
            offlines = report.offlines.len(),
            contained = report.pending_audits.len(),
            "audit verify complete"
        );
        if let Some(metrics) = &self.metrics {
            metrics.verifies_total.inc();
            metrics.record_report(&report);
        }
        Ok(report)
    }

    /// Re-check every piece holder with an outstanding pending audit.
    ///
    /// One task per holder; results are collected over a channel bounded by
    /// the piece count. Holders without a pending record are skipped.
    pub async fn reverify(&self, stripe: &Stripe) -> Result<Report> {
        let remote = stripe.pointer.remote().ok_or(AuditError::NotRemote)?;

        let (tx, mut rx) = mpsc::channel(remote.pieces.len().max(1));
        let mut dispatched = 0usize;

        for piece in &remote.pieces {
            let pending = match self.containment.get(&piece.node_id).await {
                Some(pending) => pending,
                None => continue,
            };
            dispatched += 1;

            let orders = self.orders.clone();
            let dialer = self.dialer.clone();
            let containment = self.containment.clone();
            let config = self.config.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = reverify_one(orders, dialer, containment, config, pending).await;
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let mut report = Report::default();
        for _ in 0..dispatched {
            let Some(outcome) = rx.recv().await else {
                break;
            };
            match outcome {
                ReverifyOutcome::Success(node_id) => report.successes.push(node_id),
                ReverifyOutcome::Fail(node_id) => report.fails.push(node_id),
                ReverifyOutcome::Offline(node_id) => report.offlines.push(node_id),
                ReverifyOutcome::Contained(pending) => report.pending_audits.push(pending),
                ReverifyOutcome::Erred(node_id, message) => {
                    warn!(node = %node_id, error = %message, "reverify errored");
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.reverifies_total.inc();
            metrics.record_report(&report);
        }
        Ok(report)
    }
}

enum ReverifyOutcome {
    Success(NodeId),
    Fail(NodeId),
    Offline(NodeId),
    Contained(PendingAudit),
    Erred(NodeId, String),
}

async fn reverify_one(
    orders: Arc<OrdersService>,
    dialer: Arc<dyn NodeDialer>,
    containment: Arc<dyn ContainmentStore>,
    config: VerifierConfig,
    pending: PendingAudit,
) -> ReverifyOutcome {
    let node_id = pending.node_id;
    let addressed = match orders.create_audit_order_limit(node_id, pending.piece_id, pending.share_size)
    {
        Ok(addressed) => addressed,
        Err(OrderError::NodeOffline(_)) => return ReverifyOutcome::Offline(node_id),
        Err(err) => return ReverifyOutcome::Erred(node_id, err.to_string()),
    };

    let result = download_share(
        dialer,
        &config,
        &addressed,
        pending.stripe_index,
        pending.share_size,
    )
    .await;
    match result {
        Ok(data) => {
            containment.delete(&node_id).await;
            if sha256(&data) == pending.expected_share_hash {
                ReverifyOutcome::Success(node_id)
            } else {
                ReverifyOutcome::Fail(node_id)
            }
        }
        Err(err) if err.is_timeout() => {
            debug!(
                target: "audit",
                node = %node_id,
                divergence = "reverify-deadline-contained",
                "reverify timed out, node stays contained"
            );
            ReverifyOutcome::Contained(pending)
        }
        Err(err) if err.is_transport() => ReverifyOutcome::Offline(node_id),
        Err(_) => ReverifyOutcome::Contained(pending),
    }
}

async fn download_share(
    dialer: Arc<dyn NodeDialer>,
    config: &VerifierConfig,
    addressed: &AddressedOrderLimit,
    stripe_index: u64,
    share_size: u32,
) -> std::result::Result<Vec<u8>, PieceError> {
    let timeout = download_timeout(config, share_size);
    let offset = stripe_index * share_size as u64;
    let data = tokio::time::timeout(timeout, async {
        let client = dialer
            .dial(addressed.limit.storage_node_id, &addressed.address)
            .await?;
        client
            .download(&addressed.limit, offset, share_size as u64)
            .await
    })
    .await
    .map_err(|_| PieceError::Timeout)??;

    if data.len() != share_size as usize {
        return Err(PieceError::Protocol(format!(
            "short share read: {} of {} bytes",
            data.len(),
            share_size
        )));
    }
    Ok(data)
}

fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}
