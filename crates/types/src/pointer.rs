//! The segment pointer: the satellite's authoritative per-segment record.

use crate::{NodeId, PieceId, RedundancyScheme};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// One remote piece placement within a pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePiece {
    pub piece_num: u16,
    pub node_id: NodeId,
    /// Piece hash returned by the storage node at upload time.
    pub hash: Vec<u8>,
}

/// Remote-segment payload of a pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSegment {
    pub root_piece_id: PieceId,
    pub redundancy: RedundancyScheme,
    pub pieces: Vec<RemotePiece>,
}

impl RemoteSegment {
    pub fn piece_for_num(&self, piece_num: u16) -> Option<&RemotePiece> {
        self.pieces.iter().find(|piece| piece.piece_num == piece_num)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.pieces.iter().map(|piece| piece.node_id).collect()
    }
}

/// Inline-vs-remote discriminant of a pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentRef {
    /// Payload embedded at the satellite.
    Inline(Vec<u8>),
    /// Payload erasure-coded across storage nodes.
    Remote(RemoteSegment),
}

/// The authoritative per-segment record.
///
/// Top-level fields are shared by both variants; variant-specific state lives
/// in [`SegmentRef`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    pub size: u64,
    pub metadata: Vec<u8>,
    pub expiration: Option<SystemTime>,
    pub modified: SystemTime,
    pub segment: SegmentRef,
}

impl Pointer {
    pub fn new_inline(
        bytes: Vec<u8>,
        metadata: Vec<u8>,
        expiration: Option<SystemTime>,
    ) -> Self {
        Self {
            size: bytes.len() as u64,
            metadata,
            expiration,
            modified: SystemTime::now(),
            segment: SegmentRef::Inline(bytes),
        }
    }

    pub fn new_remote(
        size: u64,
        metadata: Vec<u8>,
        expiration: Option<SystemTime>,
        remote: RemoteSegment,
    ) -> Self {
        Self {
            size,
            metadata,
            expiration,
            modified: SystemTime::now(),
            segment: SegmentRef::Remote(remote),
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.segment, SegmentRef::Inline(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.segment, SegmentRef::Remote(_))
    }

    pub fn remote(&self) -> Option<&RemoteSegment> {
        match &self.segment {
            SegmentRef::Remote(remote) => Some(remote),
            SegmentRef::Inline(_) => None,
        }
    }

    pub fn remote_mut(&mut self) -> Option<&mut RemoteSegment> {
        match &mut self.segment {
            SegmentRef::Remote(remote) => Some(remote),
            SegmentRef::Inline(_) => None,
        }
    }

    pub fn meta(&self) -> Meta {
        Meta {
            modified: self.modified,
            expiration: self.expiration,
            size: self.size,
            data: self.metadata.clone(),
        }
    }
}

/// Metadata view of a pointer returned to segment-store callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub modified: SystemTime,
    pub expiration: Option<SystemTime>,
    pub size: u64,
    pub data: Vec<u8>,
}

/// Selector for which metadata fields a listing should populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFlags(pub u32);

impl MetaFlags {
    pub const NONE: MetaFlags = MetaFlags(0);
    pub const MODIFIED: MetaFlags = MetaFlags(1);
    pub const EXPIRATION: MetaFlags = MetaFlags(1 << 1);
    pub const SIZE: MetaFlags = MetaFlags(1 << 2);
    pub const USER_DEFINED: MetaFlags = MetaFlags(1 << 3);
    pub const ALL: MetaFlags = MetaFlags(u32::MAX);

    pub fn contains(&self, other: MetaFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// One entry of a listing: either a pointer-bearing record or, in
/// non-recursive listings, a collapsed prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub path: String,
    pub pointer: Option<Pointer>,
    pub is_prefix: bool,
}
