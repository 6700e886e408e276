//! Erasure-coded piece client: fan-out uploads and k-of-n ranged reads.

use crate::client::NodeDialer;
use crate::{PieceError, Result};
use async_trait::async_trait;
use orbit_erasure::{ErasureError, ReedSolomon, Share};
use orbit_types::{AddressedOrderLimit, NodeId, RedundancyScheme};
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

impl From<ErasureError> for PieceError {
    fn from(err: ErasureError) -> Self {
        match err {
            ErasureError::NotEnoughShares { have, need } => {
                PieceError::NotEnoughShares { have, need }
            }
            other => PieceError::Protocol(other.to_string()),
        }
    }
}

/// Tunables for the erasure-coded client.
#[derive(Debug, Clone)]
pub struct EcConfig {
    pub dial_timeout: Duration,
    /// Bound on piece bytes held in flight during an upload fan-out.
    pub max_memory: u64,
}

impl Default for EcConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(20),
            max_memory: 8 * 1024 * 1024,
        }
    }
}

/// One successful piece upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub piece_num: u16,
    pub node_id: NodeId,
    pub hash: Vec<u8>,
}

/// Erasure-coded piece mover shared by the segment store and the repairer.
#[derive(Clone)]
pub struct EcClient {
    dialer: Arc<dyn NodeDialer>,
    config: EcConfig,
}

impl EcClient {
    pub fn new(dialer: Arc<dyn NodeDialer>, config: EcConfig) -> Self {
        Self { dialer, config }
    }

    pub fn dialer(&self) -> Arc<dyn NodeDialer> {
        self.dialer.clone()
    }

    /// Upload pieces to their addressed nodes concurrently.
    ///
    /// `limits` and `pieces` are indexed by piece number; an upload happens
    /// where both are present. In-flight bytes are bounded by `max_memory`.
    /// Returns per-piece outcomes, `None` where the upload failed or was
    /// never attempted.
    pub async fn put_pieces(
        &self,
        limits: &[Option<AddressedOrderLimit>],
        mut pieces: Vec<Option<Vec<u8>>>,
        cancel: &CancellationToken,
    ) -> Vec<Option<UploadOutcome>> {
        let piece_size = pieces
            .iter()
            .flatten()
            .map(|piece| piece.len() as u64)
            .max()
            .unwrap_or(1)
            .max(1);
        let in_flight = usize::try_from(self.config.max_memory / piece_size)
            .unwrap_or(usize::MAX)
            .clamp(1, limits.len().max(1));
        let semaphore = Arc::new(Semaphore::new(in_flight));

        let mut results: Vec<Option<UploadOutcome>> = (0..limits.len()).map(|_| None).collect();
        let (tx, mut rx) = mpsc::channel(limits.len().max(1));
        let mut spawned = 0usize;

        for (index, addressed) in limits.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let piece = match pieces.get_mut(index).and_then(Option::take) {
                Some(piece) => piece,
                None => continue,
            };
            let addressed = match addressed {
                Some(addressed) => addressed.clone(),
                None => continue,
            };

            let dialer = self.dialer.clone();
            let dial_timeout = self.config.dial_timeout;
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            spawned += 1;
            tokio::spawn(async move {
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => Err(PieceError::Cancelled),
                    result = upload_one(dialer, dial_timeout, semaphore, addressed, piece) => result,
                };
                let _ = tx.send((index, outcome)).await;
            });
        }
        drop(tx);

        for _ in 0..spawned {
            let Some((index, outcome)) = rx.recv().await else {
                break;
            };
            match outcome {
                Ok(mut outcome) => {
                    outcome.piece_num = index as u16;
                    results[index] = Some(outcome);
                }
                Err(err) => {
                    warn!(piece = index, error = %err, "piece upload failed");
                }
            }
        }
        results
    }

    /// Best-effort piece deletes; returns how many nodes acknowledged.
    pub async fn delete_pieces(
        &self,
        limits: &[Option<AddressedOrderLimit>],
        cancel: &CancellationToken,
    ) -> usize {
        let mut deleted = 0;
        for addressed in limits.iter().flatten() {
            if cancel.is_cancelled() {
                break;
            }
            let result = async {
                let client = tokio::time::timeout(
                    self.config.dial_timeout,
                    self.dialer
                        .dial(addressed.limit.storage_node_id, &addressed.address),
                )
                .await
                .map_err(|_| PieceError::Timeout)??;
                client.delete(&addressed.limit).await
            }
            .await;
            match result {
                Ok(()) => deleted += 1,
                Err(err) => {
                    // node failures do not fail the delete; the satellite
                    // already dropped the pointer
                    warn!(node = %addressed.limit.storage_node_id, error = %err, "piece delete failed");
                }
            }
        }
        deleted
    }

    /// Lazy reader over a remote segment.
    pub fn ranger(
        &self,
        limits: Vec<Option<AddressedOrderLimit>>,
        scheme: RedundancyScheme,
        size: u64,
    ) -> RemoteRanger {
        RemoteRanger {
            dialer: self.dialer.clone(),
            dial_timeout: self.config.dial_timeout,
            limits,
            scheme,
            size,
        }
    }
}

async fn upload_one(
    dialer: Arc<dyn NodeDialer>,
    dial_timeout: Duration,
    semaphore: Arc<Semaphore>,
    addressed: AddressedOrderLimit,
    piece: Vec<u8>,
) -> Result<UploadOutcome> {
    let _permit = semaphore
        .acquire()
        .await
        .map_err(|_| PieceError::Cancelled)?;
    let node_id = addressed.limit.storage_node_id;
    let client = tokio::time::timeout(dial_timeout, dialer.dial(node_id, &addressed.address))
        .await
        .map_err(|_| PieceError::Timeout)??;
    let hash = client.upload(&addressed.limit, &piece).await?;
    debug!(node = %node_id, bytes = piece.len(), "uploaded piece");
    // piece_num is rewritten by the caller from the result index
    Ok(UploadOutcome {
        piece_num: 0,
        node_id,
        hash,
    })
}

/// Random-access reader contract over a segment.
#[async_trait]
pub trait Ranger: Send + Sync {
    fn size(&self) -> u64;
    async fn range(&self, offset: u64, length: u64) -> Result<Vec<u8>>;
}

/// Reader over bytes already in memory.
pub struct InlineRanger {
    data: Vec<u8>,
}

impl InlineRanger {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

#[async_trait]
impl Ranger for InlineRanger {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let start = offset as usize;
        let end = start
            .checked_add(length as usize)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| PieceError::Protocol("range out of bounds".to_string()))?;
        Ok(self.data[start..end].to_vec())
    }
}

/// Reader that streams shares from any `k` live piece holders.
///
/// Holders are tried in random order; a holder that fails is replaced by the
/// next unused limit until either `k` share runs arrive or no replacement
/// remains.
pub struct RemoteRanger {
    dialer: Arc<dyn NodeDialer>,
    dial_timeout: Duration,
    limits: Vec<Option<AddressedOrderLimit>>,
    scheme: RedundancyScheme,
    size: u64,
}

#[async_trait]
impl Ranger for RemoteRanger {
    fn size(&self) -> u64 {
        self.size
    }

    async fn range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        if offset.checked_add(length).map(|end| end > self.size).unwrap_or(true) {
            return Err(PieceError::Protocol(format!(
                "range {}+{} beyond segment of {} bytes",
                offset, length, self.size
            )));
        }

        let stripe_size = self.scheme.stripe_size();
        let share_size = self.scheme.share_size as u64;
        let first_stripe = offset / stripe_size;
        let end_stripe = (offset + length + stripe_size - 1) / stripe_size;
        let stripe_span = end_stripe - first_stripe;
        let share_offset = first_stripe * share_size;
        let run_length = stripe_span * share_size;

        let needed = self.scheme.min_req as usize;
        let mut candidates: Vec<(usize, &AddressedOrderLimit)> = self
            .limits
            .iter()
            .enumerate()
            .filter_map(|(num, limit)| limit.as_ref().map(|limit| (num, limit)))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());

        let mut runs: Vec<(usize, Vec<u8>)> = Vec::with_capacity(needed);
        for (piece_num, addressed) in candidates {
            if runs.len() == needed {
                break;
            }
            let result = async {
                let client = tokio::time::timeout(
                    self.dial_timeout,
                    self.dialer
                        .dial(addressed.limit.storage_node_id, &addressed.address),
                )
                .await
                .map_err(|_| PieceError::Timeout)??;
                client
                    .download(&addressed.limit, share_offset, run_length)
                    .await
            }
            .await;
            match result {
                Ok(run) if run.len() as u64 == run_length => runs.push((piece_num, run)),
                Ok(run) => {
                    warn!(
                        piece = piece_num,
                        got = run.len(),
                        expected = run_length,
                        "short share read, trying replacement"
                    );
                }
                Err(err) => {
                    warn!(piece = piece_num, error = %err, "share download failed, trying replacement");
                }
            }
        }
        if runs.len() < needed {
            return Err(PieceError::NotEnoughShares {
                have: runs.len(),
                need: needed,
            });
        }

        let rs = ReedSolomon::new(needed, self.scheme.total as usize)?;
        let share_size = share_size as usize;
        let mut assembled = Vec::with_capacity((stripe_span * stripe_size) as usize);
        for stripe_index in 0..stripe_span as usize {
            let shares: Vec<Share> = runs
                .iter()
                .map(|(piece_num, run)| Share {
                    number: *piece_num,
                    data: run[stripe_index * share_size..(stripe_index + 1) * share_size].to_vec(),
                })
                .collect();
            assembled.extend_from_slice(&rs.decode(&shares)?);
        }

        let skip = (offset - first_stripe * stripe_size) as usize;
        Ok(assembled[skip..skip + length as usize].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::StorageNode;
    use crate::NodeClient;
    use ed25519_dalek::{Signer, SigningKey};
    use orbit_erasure::encode_segment;
    use orbit_types::{OrderAction, OrderLimit, PieceId, SerialNumber};
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::SystemTime;

    struct MemoryNodeClient {
        node: Arc<StorageNode>,
    }

    #[async_trait]
    impl NodeClient for MemoryNodeClient {
        async fn upload(&self, limit: &OrderLimit, data: &[u8]) -> Result<Vec<u8>> {
            self.node.upload(limit, data)
        }

        async fn download(&self, limit: &OrderLimit, offset: u64, length: u64) -> Result<Vec<u8>> {
            self.node.download(limit, offset, length)
        }

        async fn delete(&self, limit: &OrderLimit) -> Result<()> {
            self.node.delete(limit)
        }
    }

    struct MemoryDialer {
        nodes: HashMap<NodeId, Arc<StorageNode>>,
        offline: Mutex<HashSet<NodeId>>,
    }

    #[async_trait]
    impl NodeDialer for MemoryDialer {
        async fn dial(&self, node_id: NodeId, _address: &str) -> Result<Box<dyn NodeClient>> {
            if self.offline.lock().expect("lock").contains(&node_id) {
                return Err(PieceError::Transport("connection refused".to_string()));
            }
            let node = self
                .nodes
                .get(&node_id)
                .ok_or_else(|| PieceError::Transport("unknown node".to_string()))?;
            Ok(Box::new(MemoryNodeClient { node: node.clone() }))
        }
    }

    struct Cluster {
        ec: EcClient,
        dialer: Arc<MemoryDialer>,
        signer: SigningKey,
        node_ids: Vec<NodeId>,
        scheme: RedundancyScheme,
        root: PieceId,
    }

    impl Cluster {
        fn new(node_count: usize) -> Self {
            let signer = SigningKey::generate(&mut rand::rngs::OsRng);
            let mut nodes = HashMap::new();
            let mut node_ids = Vec::new();
            for _ in 0..node_count {
                let id = NodeId::random();
                nodes.insert(id, Arc::new(StorageNode::new(id, signer.verifying_key())));
                node_ids.push(id);
            }
            let dialer = Arc::new(MemoryDialer {
                nodes,
                offline: Mutex::new(HashSet::new()),
            });
            Self {
                ec: EcClient::new(dialer.clone(), EcConfig::default()),
                dialer,
                signer,
                node_ids,
                scheme: RedundancyScheme::new(2, 3, 4, 4, 64).expect("scheme"),
                root: PieceId::random(),
            }
        }

        fn limit(&self, action: OrderAction, node_id: NodeId, limit_bytes: u64) -> AddressedOrderLimit {
            let mut limit = OrderLimit {
                serial: SerialNumber::random(),
                action,
                storage_node_id: node_id,
                piece_id: PieceId::derive(self.root, node_id),
                limit_bytes,
                valid_until: SystemTime::now() + Duration::from_secs(60),
                satellite_signature: Vec::new(),
            };
            limit.satellite_signature = self.signer.sign(&limit.signing_bytes()).to_bytes().to_vec();
            AddressedOrderLimit {
                limit,
                address: "mem".to_string(),
            }
        }

        async fn upload_segment(&self, data: &[u8]) -> Vec<Option<AddressedOrderLimit>> {
            let pieces = encode_segment(data, &self.scheme).expect("encode");
            let piece_size = pieces[0].len() as u64;
            let put_limits: Vec<Option<AddressedOrderLimit>> = self
                .node_ids
                .iter()
                .map(|id| Some(self.limit(OrderAction::Put, *id, piece_size)))
                .collect();
            let outcomes = self
                .ec
                .put_pieces(
                    &put_limits,
                    pieces.into_iter().map(Some).collect(),
                    &CancellationToken::new(),
                )
                .await;
            assert_eq!(outcomes.iter().flatten().count(), 4);

            self.node_ids
                .iter()
                .map(|id| Some(self.limit(OrderAction::Get, *id, piece_size)))
                .collect()
        }
    }

    fn test_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 241) as u8).collect()
    }

    #[tokio::test]
    async fn put_then_ranged_get() {
        let cluster = Cluster::new(4);
        let data = test_data(500);
        let get_limits = cluster.upload_segment(&data).await;

        let ranger = cluster
            .ec
            .ranger(get_limits, cluster.scheme, data.len() as u64);
        assert_eq!(ranger.size(), 500);

        let whole = ranger.range(0, 500).await.expect("range");
        assert_eq!(whole, data);

        let middle = ranger.range(130, 77).await.expect("range");
        assert_eq!(middle, &data[130..207]);
    }

    #[tokio::test]
    async fn get_survives_node_failures() {
        let cluster = Cluster::new(4);
        let data = test_data(300);
        let get_limits = cluster.upload_segment(&data).await;

        // two nodes down still leaves k = 2 holders
        cluster
            .dialer
            .offline
            .lock()
            .expect("lock")
            .extend([cluster.node_ids[0], cluster.node_ids[3]]);

        let ranger = cluster
            .ec
            .ranger(get_limits, cluster.scheme, data.len() as u64);
        assert_eq!(ranger.range(0, 300).await.expect("range"), data);
    }

    #[tokio::test]
    async fn get_fails_below_k_holders() {
        let cluster = Cluster::new(4);
        let data = test_data(300);
        let get_limits = cluster.upload_segment(&data).await;

        cluster.dialer.offline.lock().expect("lock").extend([
            cluster.node_ids[0],
            cluster.node_ids[1],
            cluster.node_ids[2],
        ]);

        let ranger = cluster
            .ec
            .ranger(get_limits, cluster.scheme, data.len() as u64);
        let result = ranger.range(0, 300).await;
        assert!(matches!(
            result,
            Err(PieceError::NotEnoughShares { have: 1, need: 2 })
        ));
    }

    #[tokio::test]
    async fn put_reports_partial_success() {
        let cluster = Cluster::new(4);
        cluster
            .dialer
            .offline
            .lock()
            .expect("lock")
            .insert(cluster.node_ids[1]);

        let data = test_data(256);
        let pieces = encode_segment(&data, &cluster.scheme).expect("encode");
        let piece_size = pieces[0].len() as u64;
        let limits: Vec<Option<AddressedOrderLimit>> = cluster
            .node_ids
            .iter()
            .map(|id| Some(cluster.limit(OrderAction::Put, *id, piece_size)))
            .collect();

        let outcomes = cluster
            .ec
            .put_pieces(
                &limits,
                pieces.into_iter().map(Some).collect(),
                &CancellationToken::new(),
            )
            .await;
        assert!(outcomes[1].is_none());
        assert_eq!(outcomes.iter().flatten().count(), 3);
    }

    #[tokio::test]
    async fn cancelled_put_uploads_nothing_more() {
        let cluster = Cluster::new(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let data = test_data(256);
        let pieces = encode_segment(&data, &cluster.scheme).expect("encode");
        let piece_size = pieces[0].len() as u64;
        let limits: Vec<Option<AddressedOrderLimit>> = cluster
            .node_ids
            .iter()
            .map(|id| Some(cluster.limit(OrderAction::Put, *id, piece_size)))
            .collect();

        let outcomes = cluster
            .ec
            .put_pieces(&limits, pieces.into_iter().map(Some).collect(), &cancel)
            .await;
        assert_eq!(outcomes.iter().flatten().count(), 0);
    }

    #[tokio::test]
    async fn delete_is_best_effort() {
        let cluster = Cluster::new(4);
        let data = test_data(256);
        cluster.upload_segment(&data).await;

        cluster
            .dialer
            .offline
            .lock()
            .expect("lock")
            .insert(cluster.node_ids[2]);

        let delete_limits: Vec<Option<AddressedOrderLimit>> = cluster
            .node_ids
            .iter()
            .map(|id| Some(cluster.limit(OrderAction::Delete, *id, 0)))
            .collect();
        let deleted = cluster
            .ec
            .delete_pieces(&delete_limits, &CancellationToken::new())
            .await;
        assert_eq!(deleted, 3);
    }
}
