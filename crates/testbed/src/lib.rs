//! In-process cluster harness for integration tests
//!
//! Assembles one satellite (pointer DB, overlay, orders, metainfo endpoint),
//! N in-memory storage nodes behind a fault-injecting dialer, and a client
//! segment store, all wired the way a deployment would wire them.

mod network;

pub use network::MemNetwork;

use ed25519_dalek::SigningKey;
use orbit_access::ApiKey;
use orbit_audit::{
    ContainmentStore, MemoryContainment, Stripe, Verifier, VerifierConfig,
};
use orbit_metainfo::{
    ApiKeyInfo, Endpoint, MemoryApiKeys, MemoryPointerDb, MetainfoClient, NoopProjectUsage,
    Service,
};
use orbit_orders::{OrdersConfig, OrdersService};
use orbit_overlay::{NodeDossier, NodeSelectionConfig, Overlay};
use orbit_piecestore::{EcClient, EcConfig, StorageNode};
use orbit_repair::{Repairer, RepairerConfig};
use orbit_segments::SegmentStore;
use orbit_types::{join_paths, NodeId, PieceId, Pointer, RedundancyScheme};
use std::sync::Arc;
use std::time::Duration;

pub const PROJECT_ID: &str = "proj";

#[derive(Debug, Clone)]
pub struct TestbedConfig {
    pub storage_nodes: usize,
    pub scheme: RedundancyScheme,
    pub max_inline_size: usize,
    pub max_segment_size: u64,
    pub selection: NodeSelectionConfig,
}

impl Default for TestbedConfig {
    fn default() -> Self {
        Self {
            storage_nodes: 4,
            scheme: RedundancyScheme::new(2, 3, 3, 4, 1024).expect("default scheme"),
            max_inline_size: 4 * 1024,
            max_segment_size: 64 * 1024 * 1024,
            selection: NodeSelectionConfig {
                audit_count: 0,
                new_node_percentage: 0.0,
                online_window: Duration::from_secs(3600),
                distinct_ip: false,
            },
        }
    }
}

/// One assembled cluster.
pub struct Testbed {
    pub config: TestbedConfig,
    pub overlay: Arc<Overlay>,
    pub orders: Arc<OrdersService>,
    pub service: Arc<Service>,
    pub endpoint: Arc<Endpoint>,
    pub network: Arc<MemNetwork>,
    pub containment: Arc<MemoryContainment>,
    pub api_key: ApiKey,
    pub node_ids: Vec<NodeId>,
}

impl Testbed {
    pub fn new(config: TestbedConfig) -> Self {
        let signer = SigningKey::generate(&mut rand::rngs::OsRng);
        let verifying_key = signer.verifying_key();

        let overlay = Arc::new(Overlay::new(config.selection.clone()));
        let mut node_ids = Vec::new();
        let network = MemNetwork::new();
        for index in 0..config.storage_nodes {
            let node_id = NodeId::random();
            let mut dossier = NodeDossier::new(node_id, format!("mem:{}", index));
            dossier.last_seen_ip = format!("10.1.0.{}", index);
            overlay.put(dossier);
            network.add_node(Arc::new(StorageNode::new(node_id, verifying_key)));
            node_ids.push(node_id);
        }
        let network = Arc::new(network);

        let orders = Arc::new(OrdersService::new(
            signer,
            overlay.clone(),
            OrdersConfig::default(),
        ));

        let containment = Arc::new(MemoryContainment::new());
        let keys = Arc::new(MemoryApiKeys::new());
        let api_key = ApiKey::new(b"testbed-secret");
        keys.register(
            &api_key,
            ApiKeyInfo {
                project_id: PROJECT_ID.to_string(),
                secret: b"testbed-secret".to_vec(),
            },
        );

        let service = Arc::new(Service::new(Arc::new(MemoryPointerDb::new())));
        let endpoint = Arc::new(Endpoint::new(
            service.clone(),
            orders.clone(),
            overlay.clone(),
            Arc::new(ContainmentBridge(containment.clone())),
            Arc::new(NoopProjectUsage),
            keys,
        ));

        Self {
            config,
            overlay,
            orders,
            service,
            endpoint,
            network,
            containment,
            api_key,
            node_ids,
        }
    }

    pub fn ec(&self) -> EcClient {
        EcClient::new(self.network.clone(), EcConfig::default())
    }

    pub fn metainfo_client(&self) -> MetainfoClient {
        MetainfoClient::new(self.endpoint.clone(), self.api_key.clone())
    }

    pub fn segment_store(&self) -> SegmentStore {
        SegmentStore::new(
            self.metainfo_client(),
            self.ec(),
            self.config.scheme,
            self.config.max_inline_size,
            self.config.max_segment_size,
        )
    }

    pub fn verifier(&self) -> Verifier {
        self.verifier_with(VerifierConfig::default())
    }

    pub fn verifier_with(&self, config: VerifierConfig) -> Verifier {
        Verifier::new(
            self.orders.clone(),
            self.network.clone(),
            self.containment.clone(),
            config,
        )
    }

    pub fn repairer(&self) -> Repairer {
        self.repairer_with(RepairerConfig::default())
    }

    pub fn repairer_with(&self, config: RepairerConfig) -> Repairer {
        Repairer::new(
            self.service.clone(),
            self.orders.clone(),
            self.overlay.clone(),
            self.ec(),
            config,
        )
    }

    /// Full pointer-db key for a user path like `l/bucket/file`.
    pub fn full_path(&self, path: &str) -> String {
        join_paths([PROJECT_ID, path])
    }

    /// Read a pointer straight from the satellite service.
    pub async fn pointer(&self, path: &str) -> Option<Pointer> {
        self.service.get(&self.full_path(path)).await.ok()
    }

    /// Build an audit stripe for a stored segment.
    pub async fn stripe(&self, path: &str, index: u64) -> Option<Stripe> {
        let full = self.full_path(path);
        let pointer = self.service.get(&full).await.ok()?;
        Some(Stripe {
            pointer,
            path: full,
            index,
        })
    }

    pub fn node(&self, node_id: &NodeId) -> Option<Arc<StorageNode>> {
        self.network.node(node_id)
    }

    /// Flip one byte of the piece a node stores for `root_piece_id`.
    pub fn corrupt_piece_on(&self, node_id: &NodeId, root_piece_id: PieceId) -> bool {
        let piece_id = PieceId::derive(root_piece_id, *node_id);
        self.network
            .node(node_id)
            .map(|node| node.corrupt_piece(&piece_id, 0))
            .unwrap_or(false)
    }

    /// Take a node off the network (dials fail with a transport error).
    pub fn set_offline(&self, node_id: &NodeId, offline: bool) {
        self.network.set_offline(node_id, offline);
    }

    /// Make a node respond only after `delay`.
    pub fn set_delay(&self, node_id: &NodeId, delay: Duration) {
        self.network.set_delay(node_id, delay);
    }

    /// Mark a node lost in the overlay, so selection and missing-piece
    /// queries treat it as gone.
    pub fn disqualify(&self, node_id: &NodeId) {
        self.overlay
            .disqualify(node_id)
            .expect("node registered in overlay");
    }
}

/// Adapter from the audit containment store to the narrow interface the
/// metainfo endpoint uses on delete.
struct ContainmentBridge(Arc<MemoryContainment>);

#[async_trait::async_trait]
impl orbit_metainfo::Containment for ContainmentBridge {
    async fn clear(&self, node_id: &NodeId) -> bool {
        self.0.delete(node_id).await
    }
}
