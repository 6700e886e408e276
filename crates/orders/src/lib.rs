//! Order-limit issuance and verification
//!
//! The satellite mints short-lived signed capabilities for every byte-moving
//! operation. A limit names one action, one node, and one piece; storage
//! nodes verify the satellite signature before serving a request.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use orbit_overlay::{Overlay, OverlayError};
use orbit_types::{
    AddressedOrderLimit, NodeId, OrderAction, OrderLimit, PieceId, Pointer, RemotePiece,
    SerialNumber,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("overlay error: {0}")]
    Overlay(#[from] OverlayError),

    #[error("order limit signature invalid")]
    InvalidSignature,

    #[error("node is offline: {0}")]
    NodeOffline(NodeId),

    #[error("pointer has no remote segment")]
    NotRemote,

    #[error("not enough free piece numbers for {0} new nodes")]
    NoFreePieceNumbers(usize),
}

pub type Result<T> = std::result::Result<T, OrderError>;

/// Issuance settings.
#[derive(Debug, Clone)]
pub struct OrdersConfig {
    /// Lifetime of a minted limit.
    pub valid_for: Duration,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            valid_for: Duration::from_secs(3600),
        }
    }
}

/// The satellite's order-limit issuer.
pub struct OrdersService {
    signer: SigningKey,
    overlay: Arc<Overlay>,
    config: OrdersConfig,
}

impl OrdersService {
    pub fn new(signer: SigningKey, overlay: Arc<Overlay>, config: OrdersConfig) -> Self {
        Self {
            signer,
            overlay,
            config,
        }
    }

    /// Public key storage nodes use to verify limits.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signer.verifying_key()
    }

    fn mint(
        &self,
        action: OrderAction,
        storage_node_id: NodeId,
        piece_id: PieceId,
        limit_bytes: u64,
    ) -> OrderLimit {
        let mut limit = OrderLimit {
            serial: SerialNumber::random(),
            action,
            storage_node_id,
            piece_id,
            limit_bytes,
            valid_until: SystemTime::now() + self.config.valid_for,
            satellite_signature: Vec::new(),
        };
        let signature = self.signer.sign(&limit.signing_bytes());
        limit.satellite_signature = signature.to_bytes().to_vec();
        limit
    }

    /// Verify that a limit carries this satellite's signature.
    pub fn verify_order_limit(&self, limit: &OrderLimit) -> Result<()> {
        let signature = Signature::from_slice(&limit.satellite_signature)
            .map_err(|_| OrderError::InvalidSignature)?;
        self.verifying_key()
            .verify(&limit.signing_bytes(), &signature)
            .map_err(|_| OrderError::InvalidSignature)
    }

    /// Mint PUT limits for a fresh segment across `nodes`, plus the root
    /// piece ID every per-node piece ID derives from.
    pub fn create_put_order_limits(
        &self,
        nodes: &[orbit_overlay::NodeDossier],
        max_piece_size: u64,
    ) -> (PieceId, Vec<AddressedOrderLimit>) {
        let root_piece_id = PieceId::random();
        let limits = nodes
            .iter()
            .map(|node| AddressedOrderLimit {
                limit: self.mint(
                    OrderAction::Put,
                    node.node_id,
                    PieceId::derive(root_piece_id, node.node_id),
                    max_piece_size,
                ),
                address: node.address.clone(),
            })
            .collect();
        (root_piece_id, limits)
    }

    /// Mint GET limits for every piece of a remote pointer, indexed by piece
    /// number. Nodes the overlay considers offline get no limit.
    pub fn create_get_order_limits(
        &self,
        pointer: &Pointer,
    ) -> Result<Vec<Option<AddressedOrderLimit>>> {
        self.limits_for_pieces(pointer, OrderAction::Get, None, &HashSet::new())
    }

    /// Mint DELETE limits for every live piece holder of a remote pointer.
    pub fn create_delete_order_limits(
        &self,
        pointer: &Pointer,
    ) -> Result<Vec<Option<AddressedOrderLimit>>> {
        self.limits_for_pieces(pointer, OrderAction::Delete, None, &HashSet::new())
    }

    /// Mint GET_AUDIT limits, skipping `skip` and offline holders.
    pub fn create_audit_order_limits(
        &self,
        pointer: &Pointer,
        skip: &HashSet<NodeId>,
    ) -> Result<Vec<Option<AddressedOrderLimit>>> {
        let remote = pointer.remote().ok_or(OrderError::NotRemote)?;
        let share_size = remote.redundancy.share_size as u64;
        self.limits_for_pieces(pointer, OrderAction::GetAudit, Some(share_size), skip)
    }

    /// Mint a single GET_AUDIT limit for a reverify download.
    pub fn create_audit_order_limit(
        &self,
        node_id: NodeId,
        piece_id: PieceId,
        share_size: u32,
    ) -> Result<AddressedOrderLimit> {
        if !self.overlay.is_online(&node_id) {
            return Err(OrderError::NodeOffline(node_id));
        }
        let dossier = self.overlay.get(&node_id)?;
        Ok(AddressedOrderLimit {
            limit: self.mint(OrderAction::GetAudit, node_id, piece_id, share_size as u64),
            address: dossier.address,
        })
    }

    /// Mint GET_REPAIR limits for the surviving pieces of a pointer.
    pub fn create_get_repair_order_limits(
        &self,
        pointer: &Pointer,
        healthy: &[RemotePiece],
    ) -> Result<Vec<Option<AddressedOrderLimit>>> {
        let remote = pointer.remote().ok_or(OrderError::NotRemote)?;
        let limit_bytes = remote.redundancy.piece_size(pointer.size);
        let mut limits = vec![None; remote.redundancy.total as usize];
        for piece in healthy {
            let dossier = match self.overlay.get(&piece.node_id) {
                Ok(dossier) => dossier,
                Err(_) => {
                    debug!(node = %piece.node_id, piece = piece.piece_num, "no dossier for healthy piece");
                    continue;
                }
            };
            limits[piece.piece_num as usize] = Some(AddressedOrderLimit {
                limit: self.mint(
                    OrderAction::GetRepair,
                    piece.node_id,
                    PieceId::derive(remote.root_piece_id, piece.node_id),
                    limit_bytes,
                ),
                address: dossier.address,
            });
        }
        Ok(limits)
    }

    /// Mint PUT_REPAIR limits for replacement nodes, assigning each the
    /// lowest piece number not covered by the surviving GET_REPAIR limits.
    pub fn create_put_repair_order_limits(
        &self,
        pointer: &Pointer,
        get_limits: &[Option<AddressedOrderLimit>],
        new_nodes: &[orbit_overlay::NodeDossier],
    ) -> Result<Vec<Option<AddressedOrderLimit>>> {
        let remote = pointer.remote().ok_or(OrderError::NotRemote)?;
        let limit_bytes = remote.redundancy.piece_size(pointer.size);
        let total = remote.redundancy.total as usize;

        let mut limits = vec![None; total];
        let mut free_numbers = (0..total).filter(|num| {
            get_limits
                .get(*num)
                .map(|limit| limit.is_none())
                .unwrap_or(true)
        });
        for node in new_nodes {
            let piece_num = free_numbers
                .next()
                .ok_or(OrderError::NoFreePieceNumbers(new_nodes.len()))?;
            limits[piece_num] = Some(AddressedOrderLimit {
                limit: self.mint(
                    OrderAction::PutRepair,
                    node.node_id,
                    PieceId::derive(remote.root_piece_id, node.node_id),
                    limit_bytes,
                ),
                address: node.address.clone(),
            });
        }
        Ok(limits)
    }

    fn limits_for_pieces(
        &self,
        pointer: &Pointer,
        action: OrderAction,
        limit_bytes: Option<u64>,
        skip: &HashSet<NodeId>,
    ) -> Result<Vec<Option<AddressedOrderLimit>>> {
        let remote = pointer.remote().ok_or(OrderError::NotRemote)?;
        let limit_bytes = limit_bytes.unwrap_or_else(|| remote.redundancy.piece_size(pointer.size));
        let mut limits = vec![None; remote.redundancy.total as usize];
        for piece in &remote.pieces {
            if skip.contains(&piece.node_id) || !self.overlay.is_online(&piece.node_id) {
                continue;
            }
            let dossier = self.overlay.get(&piece.node_id)?;
            limits[piece.piece_num as usize] = Some(AddressedOrderLimit {
                limit: self.mint(
                    action,
                    piece.node_id,
                    PieceId::derive(remote.root_piece_id, piece.node_id),
                    limit_bytes,
                ),
                address: dossier.address,
            });
        }
        Ok(limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbit_overlay::{NodeDossier, NodeSelectionConfig};
    use orbit_types::{RedundancyScheme, RemoteSegment};

    fn service_with_nodes(count: usize) -> (OrdersService, Vec<NodeDossier>) {
        let overlay = Arc::new(Overlay::new(NodeSelectionConfig::default()));
        let mut nodes = Vec::new();
        for i in 0..count {
            let dossier = NodeDossier::new(NodeId::random(), format!("mem:{}", i));
            overlay.put(dossier.clone());
            nodes.push(dossier);
        }
        let signer = SigningKey::generate(&mut rand::rngs::OsRng);
        (
            OrdersService::new(signer, overlay, OrdersConfig::default()),
            nodes,
        )
    }

    fn remote_pointer(nodes: &[NodeDossier]) -> Pointer {
        let scheme = RedundancyScheme::new(2, 3, 4, 4, 1024).expect("scheme");
        let root_piece_id = PieceId::random();
        let pieces = nodes
            .iter()
            .enumerate()
            .map(|(num, node)| RemotePiece {
                piece_num: num as u16,
                node_id: node.node_id,
                hash: vec![],
            })
            .collect();
        Pointer::new_remote(
            100 * 1024,
            vec![],
            None,
            RemoteSegment {
                root_piece_id,
                redundancy: scheme,
                pieces,
            },
        )
    }

    #[test]
    fn put_limits_derive_piece_ids() {
        let (service, nodes) = service_with_nodes(4);
        let (root, limits) = service.create_put_order_limits(&nodes, 4096);

        assert_eq!(limits.len(), 4);
        for (node, addressed) in nodes.iter().zip(&limits) {
            assert_eq!(addressed.limit.action, OrderAction::Put);
            assert_eq!(addressed.limit.storage_node_id, node.node_id);
            assert_eq!(
                addressed.limit.piece_id,
                PieceId::derive(root, node.node_id)
            );
            service
                .verify_order_limit(&addressed.limit)
                .expect("signature verifies");
        }
    }

    #[test]
    fn tampered_limit_fails_verification() {
        let (service, nodes) = service_with_nodes(1);
        let (_, mut limits) = service.create_put_order_limits(&nodes, 4096);
        limits[0].limit.limit_bytes = u64::MAX;

        assert!(matches!(
            service.verify_order_limit(&limits[0].limit),
            Err(OrderError::InvalidSignature)
        ));
    }

    #[test]
    fn audit_limits_skip_requested_nodes() {
        let (service, nodes) = service_with_nodes(4);
        let pointer = remote_pointer(&nodes);

        let mut skip = HashSet::new();
        skip.insert(nodes[1].node_id);
        let limits = service
            .create_audit_order_limits(&pointer, &skip)
            .expect("limits");

        assert_eq!(limits.len(), 4);
        assert!(limits[1].is_none());
        assert_eq!(limits.iter().flatten().count(), 3);
        for addressed in limits.iter().flatten() {
            assert_eq!(addressed.limit.action, OrderAction::GetAudit);
            assert_eq!(addressed.limit.limit_bytes, 1024);
        }
    }

    #[test]
    fn get_limits_omit_offline_nodes() {
        let (service, nodes) = service_with_nodes(4);
        let pointer = remote_pointer(&nodes);
        service.overlay.disqualify(&nodes[2].node_id).expect("dq");

        let limits = service.create_get_order_limits(&pointer).expect("limits");
        assert!(limits[2].is_none());
        assert_eq!(limits.iter().flatten().count(), 3);
    }

    #[test]
    fn put_repair_fills_free_piece_numbers() {
        let (service, nodes) = service_with_nodes(6);
        let pointer = remote_pointer(&nodes[..4]);
        let remote = pointer.remote().expect("remote");

        // pieces 0 and 2 survive
        let healthy = vec![remote.pieces[0].clone(), remote.pieces[2].clone()];
        let get_limits = service
            .create_get_repair_order_limits(&pointer, &healthy)
            .expect("get limits");
        assert_eq!(get_limits.iter().flatten().count(), 2);

        let put_limits = service
            .create_put_repair_order_limits(&pointer, &get_limits, &nodes[4..])
            .expect("put limits");
        let assigned: Vec<usize> = put_limits
            .iter()
            .enumerate()
            .filter(|(_, limit)| limit.is_some())
            .map(|(num, _)| num)
            .collect();
        assert_eq!(assigned, vec![1, 3]);
    }
}
