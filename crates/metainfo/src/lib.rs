//! Satellite metainfo: the pointer database and its RPC surface
//!
//! The pointer database is the single source of truth for segment pointers.
//! The endpoint layers capability-token auth, bucket/path/commit validation,
//! and quota checks on top, and mints order limits through the orders
//! service for every returned piece set.

mod client;
mod db;
mod endpoint;
mod metrics;
mod service;

pub use client::MetainfoClient;
pub use db::{DbError, MemoryPointerDb, PointerDb};
pub use endpoint::{
    ApiKeyInfo, ApiKeys, Containment, Endpoint, MemoryApiKeys, NoopContainment,
    NoopProjectUsage, ProjectUsage,
};
pub use metrics::MetainfoMetrics;
pub use service::Service;

use thiserror::Error;

/// Status-coded errors surfaced by the metainfo endpoint.
#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("exceeded usage limit: {0}")]
    ResourceExhausted(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetainfoError {
    /// Whether this is the key-not-found status.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetainfoError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, MetainfoError>;
