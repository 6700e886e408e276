//! The segment store pipeline.

use crate::{Result, SegmentError};
use orbit_erasure::encode_segment;
use orbit_metainfo::MetainfoClient;
use orbit_piecestore::{EcClient, InlineRanger, Ranger};
use orbit_types::{
    AddressedOrderLimit, ListItem, Meta, MetaFlags, Pointer, RedundancyScheme, RemotePiece,
    RemoteSegment, SegmentRef,
};
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Minimum number of pieces to request for a download that should still
/// leave a repair able to reach the success threshold.
pub fn calc_needed_nodes(scheme: &RedundancyScheme) -> u16 {
    let mut extra = 1u64;
    if scheme.success_threshold > 0 {
        extra = (scheme.total as u64 - scheme.success_threshold as u64) * scheme.min_req as u64
            / scheme.success_threshold as u64;
        if extra == 0 {
            // always keep one node of headroom for error detection
            extra = 1;
        }
    }
    let needed = scheme.min_req as u64 + extra;
    needed.min(scheme.total as u64) as u16
}

/// Client-side segment store.
pub struct SegmentStore {
    metainfo: MetainfoClient,
    ec: EcClient,
    scheme: RedundancyScheme,
    max_inline_size: usize,
    max_segment_size: u64,
}

impl SegmentStore {
    pub fn new(
        metainfo: MetainfoClient,
        ec: EcClient,
        scheme: RedundancyScheme,
        max_inline_size: usize,
        max_segment_size: u64,
    ) -> Self {
        Self {
            metainfo,
            ec,
            scheme,
            max_inline_size,
            max_segment_size,
        }
    }

    /// Store a segment, inline or remote by size, and return its metadata.
    ///
    /// `path_fn` is invoked exactly once, after the segment has been
    /// buffered, so the path may depend on computed metadata such as size.
    pub async fn put<R, F>(
        &self,
        data: R,
        expiration: Option<SystemTime>,
        path_fn: F,
        cancel: &CancellationToken,
    ) -> Result<Meta>
    where
        R: AsyncRead + Unpin,
        F: FnOnce() -> Result<(String, Vec<u8>)>,
    {
        let mut buffer = Vec::new();
        let mut limited = data.take(self.max_segment_size + 1);
        limited.read_to_end(&mut buffer).await?;
        if buffer.len() as u64 > self.max_segment_size {
            return Err(SegmentError::SegmentTooLarge {
                size: buffer.len() as u64,
                max: self.max_segment_size,
            });
        }

        let (path, metadata) = path_fn()?;
        let (segment_index, bucket, rest) = split_segment_path(&path)?;

        if buffer.len() <= self.max_inline_size {
            let pointer = Pointer::new_inline(buffer, metadata, expiration);
            let committed = self
                .metainfo
                .commit_segment(&bucket, &rest, segment_index, pointer, Vec::new())
                .await?;
            debug!(path, size = committed.size, "committed inline segment");
            return Ok(committed.meta());
        }

        let (root_piece_id, limits) = self
            .metainfo
            .create_segment(&bucket, &rest, self.scheme, buffer.len() as u64)
            .await?;

        let size = buffer.len() as u64;
        let pieces = encode_segment(&buffer, &self.scheme)?;
        drop(buffer);

        let addressed: Vec<Option<AddressedOrderLimit>> =
            limits.iter().cloned().map(Some).collect();
        let outcomes = self
            .ec
            .put_pieces(&addressed, pieces.into_iter().map(Some).collect(), cancel)
            .await;

        let successful: Vec<RemotePiece> = outcomes
            .into_iter()
            .flatten()
            .map(|outcome| RemotePiece {
                piece_num: outcome.piece_num,
                node_id: outcome.node_id,
                hash: outcome.hash,
            })
            .collect();
        let required = self.scheme.success_threshold as usize;
        if successful.len() < required {
            return Err(SegmentError::NotEnoughStorage {
                successful: successful.len(),
                required,
            });
        }
        info!(
            path,
            size,
            pieces = successful.len(),
            "uploaded remote segment"
        );

        let pointer = Pointer::new_remote(
            size,
            metadata,
            expiration,
            RemoteSegment {
                root_piece_id,
                redundancy: self.scheme,
                pieces: successful,
            },
        );
        let committed = self
            .metainfo
            .commit_segment(&bucket, &rest, segment_index, pointer, limits)
            .await?;
        Ok(committed.meta())
    }

    /// Open a segment for reading.
    pub async fn get(&self, path: &str) -> Result<(Box<dyn Ranger>, Meta)> {
        let (segment_index, bucket, rest) = split_segment_path(path)?;
        let (pointer, limits) = self
            .metainfo
            .download_segment(&bucket, &rest, segment_index)
            .await?;
        let meta = pointer.meta();

        match &pointer.segment {
            SegmentRef::Inline(bytes) => Ok((Box::new(InlineRanger::new(bytes.clone())), meta)),
            SegmentRef::Remote(remote) => {
                let limits = limits.unwrap_or_default();
                let ranger = self.ec.ranger(limits, remote.redundancy, pointer.size);
                Ok((Box::new(ranger), meta))
            }
        }
    }

    /// Remove a segment: best-effort piece deletes, then the pointer.
    pub async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<()> {
        let (segment_index, bucket, rest) = split_segment_path(path)?;
        let limits = self
            .metainfo
            .delete_segment(&bucket, &rest, segment_index)
            .await?;
        if let Some(limits) = limits {
            let total = limits.iter().flatten().count();
            let deleted = self.ec.delete_pieces(&limits, cancel).await;
            if deleted < total {
                warn!(path, deleted, total, "some piece deletes failed");
            }
        }
        Ok(())
    }

    /// Fetch segment metadata.
    pub async fn meta(&self, path: &str) -> Result<Meta> {
        let (segment_index, bucket, rest) = split_segment_path(path)?;
        let pointer = self
            .metainfo
            .segment_info(&bucket, &rest, segment_index)
            .await?;
        Ok(pointer.meta())
    }

    /// List segments under a prefix.
    pub async fn list(
        &self,
        prefix: &str,
        start_after: &str,
        end_before: &str,
        recursive: bool,
        limit: usize,
        meta_flags: MetaFlags,
    ) -> Result<(Vec<ListItem>, bool)> {
        Ok(self
            .metainfo
            .list_segments(prefix, start_after, end_before, recursive, limit, meta_flags)
            .await?)
    }
}

/// Split a user path `<segment>/<bucket>/<rest>` into its parts.
fn split_segment_path(path: &str) -> Result<(i64, String, String)> {
    let components: Vec<&str> = if path.is_empty() {
        Vec::new()
    } else {
        path.split('/').collect()
    };
    let segment = components
        .first()
        .ok_or_else(|| SegmentError::InvalidPath(path.to_string()))?;

    let segment_index = if *segment == "l" {
        -1
    } else if let Some(index) = segment.strip_prefix('s') {
        index
            .parse::<i64>()
            .ok()
            .filter(|index| *index >= 0)
            .ok_or_else(|| SegmentError::InvalidPath(path.to_string()))?
    } else {
        return Err(SegmentError::InvalidPath(path.to_string()));
    };

    let bucket = components.get(1).copied().unwrap_or_default().to_string();
    let rest = components.get(2..).unwrap_or_default().join("/");
    Ok((segment_index, bucket, rest))
}
