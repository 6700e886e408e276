//! In-process metainfo client.
//!
//! Stands in for the RPC channel between an uplink and the satellite: it
//! carries the caller's API key and forwards each call to the endpoint.

use crate::endpoint::Endpoint;
use crate::Result;
use orbit_access::ApiKey;
use orbit_types::{
    AddressedOrderLimit, ListItem, MetaFlags, PieceId, Pointer, RedundancyScheme,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct MetainfoClient {
    endpoint: Arc<Endpoint>,
    api_key: ApiKey,
}

impl MetainfoClient {
    pub fn new(endpoint: Arc<Endpoint>, api_key: ApiKey) -> Self {
        Self { endpoint, api_key }
    }

    pub async fn segment_info(
        &self,
        bucket: &str,
        path: &str,
        segment_index: i64,
    ) -> Result<Pointer> {
        self.endpoint
            .segment_info(&self.api_key, bucket, path, segment_index)
            .await
    }

    pub async fn create_segment(
        &self,
        bucket: &str,
        path: &str,
        redundancy: RedundancyScheme,
        max_encrypted_segment_size: u64,
    ) -> Result<(PieceId, Vec<AddressedOrderLimit>)> {
        self.endpoint
            .create_segment(
                &self.api_key,
                bucket,
                path,
                redundancy,
                max_encrypted_segment_size,
            )
            .await
    }

    pub async fn commit_segment(
        &self,
        bucket: &str,
        path: &str,
        segment_index: i64,
        pointer: Pointer,
        original_limits: Vec<AddressedOrderLimit>,
    ) -> Result<Pointer> {
        self.endpoint
            .commit_segment(
                &self.api_key,
                bucket,
                path,
                segment_index,
                pointer,
                original_limits,
            )
            .await
    }

    pub async fn download_segment(
        &self,
        bucket: &str,
        path: &str,
        segment_index: i64,
    ) -> Result<(Pointer, Option<Vec<Option<AddressedOrderLimit>>>)> {
        self.endpoint
            .download_segment(&self.api_key, bucket, path, segment_index)
            .await
    }

    pub async fn delete_segment(
        &self,
        bucket: &str,
        path: &str,
        segment_index: i64,
    ) -> Result<Option<Vec<Option<AddressedOrderLimit>>>> {
        self.endpoint
            .delete_segment(&self.api_key, bucket, path, segment_index)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn list_segments(
        &self,
        prefix: &str,
        start_after: &str,
        end_before: &str,
        recursive: bool,
        limit: usize,
        meta_flags: MetaFlags,
    ) -> Result<(Vec<ListItem>, bool)> {
        self.endpoint
            .list_segments(
                &self.api_key,
                prefix,
                start_after,
                end_before,
                recursive,
                limit,
                meta_flags,
            )
            .await
    }
}
