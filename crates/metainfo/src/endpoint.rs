//! The satellite-facing metainfo RPC surface.

use crate::metrics::MetainfoMetrics;
use crate::service::Service;
use crate::{MetainfoError, Result};
use async_trait::async_trait;
use orbit_access::{Action, ApiKey, Operation};
use orbit_orders::OrdersService;
use orbit_overlay::{FindStorageNodesRequest, Overlay};
use orbit_types::{
    create_path, join_paths, AddressedOrderLimit, ListItem, MetaFlags, NodeId, PieceId, Pointer,
    RedundancyScheme, SegmentRef,
};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Resolved API key record.
#[derive(Debug, Clone)]
pub struct ApiKeyInfo {
    pub project_id: String,
    pub secret: Vec<u8>,
}

/// API key store consulted by the endpoint.
pub trait ApiKeys: Send + Sync {
    fn get_by_head(&self, head: &[u8]) -> Option<ApiKeyInfo>;
}

/// In-memory key store.
#[derive(Default)]
pub struct MemoryApiKeys {
    keys: RwLock<std::collections::HashMap<Vec<u8>, ApiKeyInfo>>,
}

impl MemoryApiKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: &ApiKey, info: ApiKeyInfo) {
        self.keys
            .write()
            .expect("api keys lock poisoned")
            .insert(key.head().to_vec(), info);
    }
}

impl ApiKeys for MemoryApiKeys {
    fn get_by_head(&self, head: &[u8]) -> Option<ApiKeyInfo> {
        self.keys
            .read()
            .expect("api keys lock poisoned")
            .get(head)
            .cloned()
    }
}

/// Project quota hooks.
pub trait ProjectUsage: Send + Sync {
    fn exceeds_storage_usage(&self, project_id: &str) -> bool;
    fn exceeds_bandwidth_usage(&self, project_id: &str, bucket_id: &str) -> bool;
    fn add_storage_usage(&self, project_id: &str, inline: u64, remote: u64);
}

/// Usage hooks that enforce nothing.
pub struct NoopProjectUsage;

impl ProjectUsage for NoopProjectUsage {
    fn exceeds_storage_usage(&self, _project_id: &str) -> bool {
        false
    }
    fn exceeds_bandwidth_usage(&self, _project_id: &str, _bucket_id: &str) -> bool {
        false
    }
    fn add_storage_usage(&self, _project_id: &str, _inline: u64, _remote: u64) {}
}

/// Containment hook used on segment delete.
///
/// A narrow copy of the audit containment interface; the full store lives in
/// the audit service.
#[async_trait]
pub trait Containment: Send + Sync {
    /// Drop any pending audit for the node; returns whether one existed.
    async fn clear(&self, node_id: &NodeId) -> bool;
}

pub struct NoopContainment;

#[async_trait]
impl Containment for NoopContainment {
    async fn clear(&self, _node_id: &NodeId) -> bool {
        false
    }
}

/// The metainfo endpoint.
pub struct Endpoint {
    service: Arc<Service>,
    orders: Arc<OrdersService>,
    overlay: Arc<Overlay>,
    containment: Arc<dyn Containment>,
    usage: Arc<dyn ProjectUsage>,
    keys: Arc<dyn ApiKeys>,
    metrics: Option<Arc<MetainfoMetrics>>,
}

impl Endpoint {
    pub fn new(
        service: Arc<Service>,
        orders: Arc<OrdersService>,
        overlay: Arc<Overlay>,
        containment: Arc<dyn Containment>,
        usage: Arc<dyn ProjectUsage>,
        keys: Arc<dyn ApiKeys>,
    ) -> Self {
        Self {
            service,
            orders,
            overlay,
            containment,
            usage,
            keys,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetainfoMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, operation: &str, failed: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record(operation, failed);
        }
    }

    fn validate_auth(
        &self,
        api_key: &ApiKey,
        op: Operation,
        bucket: &str,
        path: &str,
    ) -> Result<ApiKeyInfo> {
        let info = self
            .keys
            .get_by_head(api_key.head())
            .ok_or_else(|| MetainfoError::Unauthenticated("invalid api credential".to_string()))?;
        let action = Action {
            op,
            bucket: bucket.to_string(),
            encrypted_path: path.to_string(),
            time: SystemTime::now(),
        };
        api_key
            .check(&info.secret, &action)
            .map_err(|err| MetainfoError::Unauthenticated(err.to_string()))?;
        Ok(info)
    }

    /// Fetch the pointer for a segment.
    pub async fn segment_info(
        &self,
        api_key: &ApiKey,
        bucket: &str,
        path: &str,
        segment_index: i64,
    ) -> Result<Pointer> {
        let result = self
            .segment_info_inner(api_key, bucket, path, segment_index)
            .await;
        self.record("segment_info", result.is_err());
        result
    }

    async fn segment_info_inner(
        &self,
        api_key: &ApiKey,
        bucket: &str,
        path: &str,
        segment_index: i64,
    ) -> Result<Pointer> {
        let info = self.validate_auth(api_key, Operation::Read, bucket, path)?;
        validate_bucket(bucket)?;
        let full_path = create_path(&info.project_id, segment_index, bucket, path)
            .map_err(|err| MetainfoError::InvalidArgument(err.to_string()))?;
        self.service.get(&full_path).await
    }

    /// Select nodes and mint PUT limits for a new remote segment.
    pub async fn create_segment(
        &self,
        api_key: &ApiKey,
        bucket: &str,
        path: &str,
        redundancy: RedundancyScheme,
        max_encrypted_segment_size: u64,
    ) -> Result<(PieceId, Vec<AddressedOrderLimit>)> {
        let result = self
            .create_segment_inner(api_key, bucket, path, redundancy, max_encrypted_segment_size)
            .await;
        self.record("create_segment", result.is_err());
        result
    }

    async fn create_segment_inner(
        &self,
        api_key: &ApiKey,
        bucket: &str,
        path: &str,
        redundancy: RedundancyScheme,
        max_encrypted_segment_size: u64,
    ) -> Result<(PieceId, Vec<AddressedOrderLimit>)> {
        let info = self.validate_auth(api_key, Operation::Write, bucket, path)?;
        validate_bucket(bucket)?;
        redundancy
            .validate()
            .map_err(|err| MetainfoError::InvalidArgument(err.to_string()))?;

        if self.usage.exceeds_storage_usage(&info.project_id) {
            warn!(project = %info.project_id, "storage quota exceeded");
            return Err(MetainfoError::ResourceExhausted(
                "storage quota exceeded".to_string(),
            ));
        }

        let max_piece_size = redundancy.piece_size(max_encrypted_segment_size);
        let nodes = self
            .overlay
            .find_storage_nodes(&FindStorageNodesRequest {
                requested_count: redundancy.total as usize,
                free_bandwidth: max_piece_size,
                free_disk: max_piece_size,
                excluded_nodes: Vec::new(),
            })
            .map_err(|err| MetainfoError::Internal(err.to_string()))?;

        let (root_piece_id, limits) = self.orders.create_put_order_limits(&nodes, max_piece_size);
        debug!(
            bucket,
            nodes = limits.len(),
            root = %root_piece_id,
            "created segment limits"
        );
        Ok((root_piece_id, limits))
    }

    /// Validate and persist a pointer assembled by the client.
    pub async fn commit_segment(
        &self,
        api_key: &ApiKey,
        bucket: &str,
        path: &str,
        segment_index: i64,
        pointer: Pointer,
        original_limits: Vec<AddressedOrderLimit>,
    ) -> Result<Pointer> {
        let result = self
            .commit_segment_inner(api_key, bucket, path, segment_index, pointer, original_limits)
            .await;
        self.record("commit_segment", result.is_err());
        result
    }

    async fn commit_segment_inner(
        &self,
        api_key: &ApiKey,
        bucket: &str,
        path: &str,
        segment_index: i64,
        pointer: Pointer,
        original_limits: Vec<AddressedOrderLimit>,
    ) -> Result<Pointer> {
        let info = self.validate_auth(api_key, Operation::Write, bucket, path)?;
        validate_bucket(bucket)?;
        self.validate_commit(&pointer, &original_limits)?;

        let full_path = create_path(&info.project_id, segment_index, bucket, path)
            .map_err(|err| MetainfoError::InvalidArgument(err.to_string()))?;

        let (inline_used, remote_used) = space_used(&pointer);
        self.usage
            .add_storage_usage(&info.project_id, inline_used, remote_used);

        self.service.put(&full_path, pointer).await?;
        self.service.get(&full_path).await
    }

    /// Fetch a pointer plus, for remote segments, GET limits for its pieces.
    pub async fn download_segment(
        &self,
        api_key: &ApiKey,
        bucket: &str,
        path: &str,
        segment_index: i64,
    ) -> Result<(Pointer, Option<Vec<Option<AddressedOrderLimit>>>)> {
        let result = self
            .download_segment_inner(api_key, bucket, path, segment_index)
            .await;
        self.record("download_segment", result.is_err());
        result
    }

    async fn download_segment_inner(
        &self,
        api_key: &ApiKey,
        bucket: &str,
        path: &str,
        segment_index: i64,
    ) -> Result<(Pointer, Option<Vec<Option<AddressedOrderLimit>>>)> {
        let info = self.validate_auth(api_key, Operation::Read, bucket, path)?;
        validate_bucket(bucket)?;

        let bucket_id = join_paths([info.project_id.as_str(), bucket]);
        if self
            .usage
            .exceeds_bandwidth_usage(&info.project_id, &bucket_id)
        {
            warn!(project = %info.project_id, bucket, "bandwidth quota exceeded");
            return Err(MetainfoError::ResourceExhausted(
                "bandwidth quota exceeded".to_string(),
            ));
        }

        let full_path = create_path(&info.project_id, segment_index, bucket, path)
            .map_err(|err| MetainfoError::InvalidArgument(err.to_string()))?;
        let pointer = self.service.get(&full_path).await?;

        if pointer.is_remote() {
            let limits = self
                .orders
                .create_get_order_limits(&pointer)
                .map_err(|err| MetainfoError::Internal(err.to_string()))?;
            Ok((pointer, Some(limits)))
        } else {
            Ok((pointer, None))
        }
    }

    /// Delete a pointer; for remote segments, return DELETE limits so the
    /// caller can clear pieces off the nodes.
    pub async fn delete_segment(
        &self,
        api_key: &ApiKey,
        bucket: &str,
        path: &str,
        segment_index: i64,
    ) -> Result<Option<Vec<Option<AddressedOrderLimit>>>> {
        let result = self
            .delete_segment_inner(api_key, bucket, path, segment_index)
            .await;
        self.record("delete_segment", result.is_err());
        result
    }

    async fn delete_segment_inner(
        &self,
        api_key: &ApiKey,
        bucket: &str,
        path: &str,
        segment_index: i64,
    ) -> Result<Option<Vec<Option<AddressedOrderLimit>>>> {
        let info = self.validate_auth(api_key, Operation::Delete, bucket, path)?;
        validate_bucket(bucket)?;

        let full_path = create_path(&info.project_id, segment_index, bucket, path)
            .map_err(|err| MetainfoError::InvalidArgument(err.to_string()))?;
        let pointer = self.service.delete(&full_path).await?;

        if let Some(remote) = pointer.remote() {
            for piece in &remote.pieces {
                self.containment.clear(&piece.node_id).await;
            }
            let limits = self
                .orders
                .create_delete_order_limits(&pointer)
                .map_err(|err| MetainfoError::Internal(err.to_string()))?;
            Ok(Some(limits))
        } else {
            Ok(None)
        }
    }

    /// List pointer paths under a prefix.
    pub async fn list_segments(
        &self,
        api_key: &ApiKey,
        prefix: &str,
        start_after: &str,
        end_before: &str,
        recursive: bool,
        limit: usize,
        meta_flags: MetaFlags,
    ) -> Result<(Vec<ListItem>, bool)> {
        let result = self
            .list_segments_inner(
                api_key,
                prefix,
                start_after,
                end_before,
                recursive,
                limit,
                meta_flags,
            )
            .await;
        self.record("list_segments", result.is_err());
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn list_segments_inner(
        &self,
        api_key: &ApiKey,
        prefix: &str,
        start_after: &str,
        end_before: &str,
        recursive: bool,
        limit: usize,
        meta_flags: MetaFlags,
    ) -> Result<(Vec<ListItem>, bool)> {
        let info = self.validate_auth(api_key, Operation::List, "", prefix)?;
        let full_prefix = join_paths([info.project_id.as_str(), prefix]);
        self.service
            .list(
                &full_prefix,
                start_after,
                end_before,
                recursive,
                limit,
                meta_flags,
            )
            .await
    }

    fn validate_commit(
        &self,
        pointer: &Pointer,
        original_limits: &[AddressedOrderLimit],
    ) -> Result<()> {
        let remote = match &pointer.segment {
            SegmentRef::Inline(_) => return Ok(()),
            SegmentRef::Remote(remote) => remote,
        };

        remote
            .redundancy
            .validate()
            .map_err(|err| MetainfoError::InvalidArgument(err.to_string()))?;

        if original_limits.len() != remote.redundancy.total as usize {
            return Err(MetainfoError::InvalidArgument(format!(
                "expected {} order limits, got {}",
                remote.redundancy.total,
                original_limits.len()
            )));
        }

        let mut seen = HashSet::new();
        for piece in &remote.pieces {
            if piece.piece_num >= remote.redundancy.total {
                return Err(MetainfoError::InvalidArgument(format!(
                    "piece number {} out of range",
                    piece.piece_num
                )));
            }
            if !seen.insert(piece.piece_num) {
                return Err(MetainfoError::InvalidArgument(format!(
                    "duplicate piece number {}",
                    piece.piece_num
                )));
            }

            let addressed = &original_limits[piece.piece_num as usize];
            self.orders
                .verify_order_limit(&addressed.limit)
                .map_err(|err| MetainfoError::InvalidArgument(err.to_string()))?;

            let derived = PieceId::derive(remote.root_piece_id, piece.node_id);
            if addressed.limit.piece_id.is_zero() || addressed.limit.piece_id != derived {
                return Err(MetainfoError::InvalidArgument(
                    "invalid order limit piece id".to_string(),
                ));
            }
            if addressed.limit.storage_node_id != piece.node_id {
                return Err(MetainfoError::InvalidArgument(
                    "piece node id does not match order limit node id".to_string(),
                ));
            }
        }

        // under-replicated pointers are refused, except when the repair and
        // success thresholds coincide (testing-only escape hatch)
        if remote.pieces.len() as u16 <= remote.redundancy.repair_threshold
            && remote.redundancy.repair_threshold != remote.redundancy.success_threshold
        {
            return Err(MetainfoError::InvalidArgument(format!(
                "number of valid pieces ({}) is less than or equal to the repair threshold ({})",
                remote.pieces.len(),
                remote.redundancy.repair_threshold
            )));
        }

        Ok(())
    }
}

fn validate_bucket(bucket: &str) -> Result<()> {
    if bucket.is_empty() {
        return Err(MetainfoError::InvalidArgument(
            "bucket not specified".to_string(),
        ));
    }
    if bucket.contains('/') {
        return Err(MetainfoError::InvalidArgument(
            "bucket should not contain slash".to_string(),
        ));
    }
    Ok(())
}

fn space_used(pointer: &Pointer) -> (u64, u64) {
    match &pointer.segment {
        SegmentRef::Inline(bytes) => (bytes.len() as u64, 0),
        SegmentRef::Remote(remote) => {
            let piece_size = pointer.size / remote.redundancy.min_req as u64;
            (0, piece_size * remote.pieces.len() as u64)
        }
    }
}
