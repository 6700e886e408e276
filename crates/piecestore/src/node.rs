//! Storage-node piece logic: order-limit enforcement over an in-memory store.

use crate::{PieceError, Result};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use orbit_types::{NodeId, OrderAction, OrderLimit, PieceId};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;
use tracing::debug;

/// One storage node's piece store.
///
/// Every request is scoped to a satellite-signed order limit; the node
/// accepts it only if the signature verifies, the action fits the request,
/// the limit names this node, and the limit has not expired.
pub struct StorageNode {
    id: NodeId,
    satellite_key: VerifyingKey,
    pieces: Mutex<HashMap<PieceId, Vec<u8>>>,
}

impl StorageNode {
    pub fn new(id: NodeId, satellite_key: VerifyingKey) -> Self {
        Self {
            id,
            satellite_key,
            pieces: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn check_limit(&self, limit: &OrderLimit, length: u64) -> Result<()> {
        let signature = Signature::from_slice(&limit.satellite_signature)
            .map_err(|_| PieceError::Unauthorized("malformed satellite signature".to_string()))?;
        self.satellite_key
            .verify(&limit.signing_bytes(), &signature)
            .map_err(|_| PieceError::Unauthorized("invalid satellite signature".to_string()))?;

        if limit.storage_node_id != self.id {
            return Err(PieceError::Unauthorized(format!(
                "order limit is for node {}, not {}",
                limit.storage_node_id, self.id
            )));
        }
        if limit.is_expired(SystemTime::now()) {
            return Err(PieceError::Unauthorized("order limit expired".to_string()));
        }
        if length > limit.limit_bytes {
            return Err(PieceError::Unauthorized(format!(
                "requested {} bytes exceeds limit of {}",
                length, limit.limit_bytes
            )));
        }
        Ok(())
    }

    pub fn upload(&self, limit: &OrderLimit, data: &[u8]) -> Result<Vec<u8>> {
        if !matches!(limit.action, OrderAction::Put | OrderAction::PutRepair) {
            return Err(PieceError::Unauthorized(format!(
                "action {:?} cannot write",
                limit.action
            )));
        }
        self.check_limit(limit, data.len() as u64)?;

        self.pieces
            .lock()
            .expect("piece store lock poisoned")
            .insert(limit.piece_id, data.to_vec());
        debug!(node = %self.id, piece = %limit.piece_id, bytes = data.len(), "stored piece");

        let mut hasher = Sha256::new();
        hasher.update(data);
        Ok(hasher.finalize().to_vec())
    }

    pub fn download(&self, limit: &OrderLimit, offset: u64, length: u64) -> Result<Vec<u8>> {
        if !limit.action.is_read() {
            return Err(PieceError::Unauthorized(format!(
                "action {:?} cannot read",
                limit.action
            )));
        }
        self.check_limit(limit, length)?;

        let pieces = self.pieces.lock().expect("piece store lock poisoned");
        let piece = pieces.get(&limit.piece_id).ok_or(PieceError::NotFound)?;
        let start = offset as usize;
        let end = start
            .checked_add(length as usize)
            .filter(|end| *end <= piece.len())
            .ok_or_else(|| {
                PieceError::Protocol(format!(
                    "read of {} bytes at {} beyond piece of {} bytes",
                    length,
                    offset,
                    piece.len()
                ))
            })?;
        Ok(piece[start..end].to_vec())
    }

    pub fn delete(&self, limit: &OrderLimit) -> Result<()> {
        if limit.action != OrderAction::Delete {
            return Err(PieceError::Unauthorized(format!(
                "action {:?} cannot delete",
                limit.action
            )));
        }
        self.check_limit(limit, 0)?;

        self.pieces
            .lock()
            .expect("piece store lock poisoned")
            .remove(&limit.piece_id);
        Ok(())
    }

    /// Number of pieces currently held.
    pub fn piece_count(&self) -> usize {
        self.pieces.lock().expect("piece store lock poisoned").len()
    }

    /// Raw stored bytes, bypassing limits. For tests and inspection.
    pub fn stored_piece(&self, piece_id: &PieceId) -> Option<Vec<u8>> {
        self.pieces
            .lock()
            .expect("piece store lock poisoned")
            .get(piece_id)
            .cloned()
    }

    /// Flip one byte of a stored piece, bypassing limits. Returns false when
    /// the piece is absent. For tamper tests.
    pub fn corrupt_piece(&self, piece_id: &PieceId, byte_index: usize) -> bool {
        let mut pieces = self.pieces.lock().expect("piece store lock poisoned");
        match pieces.get_mut(piece_id) {
            Some(piece) if byte_index < piece.len() => {
                piece[byte_index] ^= 0xFF;
                true
            }
            _ => false,
        }
    }
}
