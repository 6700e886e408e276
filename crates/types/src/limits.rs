//! Order limits: satellite-signed capabilities for piece operations.

use crate::{NodeId, PieceId, SerialNumber};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Action authorized by an order limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderAction {
    Put,
    Get,
    Delete,
    GetAudit,
    GetRepair,
    PutRepair,
}

impl OrderAction {
    fn code(&self) -> u8 {
        match self {
            OrderAction::Put => 1,
            OrderAction::Get => 2,
            OrderAction::Delete => 3,
            OrderAction::GetAudit => 4,
            OrderAction::GetRepair => 5,
            OrderAction::PutRepair => 6,
        }
    }

    /// Whether the action reads piece bytes.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            OrderAction::Get | OrderAction::GetAudit | OrderAction::GetRepair
        )
    }
}

/// Short-lived satellite-signed capability naming one (action, node, piece).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLimit {
    pub serial: SerialNumber,
    pub action: OrderAction,
    pub storage_node_id: NodeId,
    pub piece_id: PieceId,
    pub limit_bytes: u64,
    pub valid_until: SystemTime,
    pub satellite_signature: Vec<u8>,
}

impl OrderLimit {
    /// Canonical byte form covered by the satellite signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + 1 + 32 + 32 + 8 + 8);
        bytes.extend_from_slice(&self.serial.0);
        bytes.push(self.action.code());
        bytes.extend_from_slice(self.storage_node_id.as_bytes());
        bytes.extend_from_slice(self.piece_id.as_bytes());
        bytes.extend_from_slice(&self.limit_bytes.to_be_bytes());
        let valid_secs = self
            .valid_until
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        bytes.extend_from_slice(&valid_secs.to_be_bytes());
        bytes
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        now > self.valid_until
    }
}

/// An order limit together with the node's dialable address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressedOrderLimit {
    pub limit: OrderLimit,
    pub address: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_limit(action: OrderAction) -> OrderLimit {
        OrderLimit {
            serial: SerialNumber([7u8; 16]),
            action,
            storage_node_id: NodeId::from_bytes([1u8; 32]),
            piece_id: PieceId::from_bytes([2u8; 32]),
            limit_bytes: 4096,
            valid_until: UNIX_EPOCH + Duration::from_secs(1_000_000),
            satellite_signature: Vec::new(),
        }
    }

    #[test]
    fn signing_bytes_cover_action() {
        let get = make_limit(OrderAction::Get);
        let put = make_limit(OrderAction::Put);
        assert_ne!(get.signing_bytes(), put.signing_bytes());
    }

    #[test]
    fn signing_bytes_exclude_signature() {
        let mut limit = make_limit(OrderAction::Get);
        let before = limit.signing_bytes();
        limit.satellite_signature = vec![9; 64];
        assert_eq!(before, limit.signing_bytes());
    }

    #[test]
    fn expiry() {
        let limit = make_limit(OrderAction::Get);
        assert!(!limit.is_expired(UNIX_EPOCH + Duration::from_secs(10)));
        assert!(limit.is_expired(UNIX_EPOCH + Duration::from_secs(2_000_000)));
    }
}
