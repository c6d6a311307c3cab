//! CasPool Sink Adapters
//!
//! Implements the `CasPoolSink` port with various backends. The real
//! backend is the template engine that renders a CasPool into a pool
//! deployment; this crate only hands the request over.

use async_trait::async_trait;
use tracing::info;

use crate::domain::ports::CasPoolSink;
use crate::error::Result;
use crate::pool::CasPool;

/// Logging-based sink.
///
/// Serializes every provisioning request to the log stream. Useful for
/// development and for auditing what the operator would have provisioned.
#[derive(Debug, Clone, Default)]
pub struct LoggingCasPoolSink;

impl LoggingCasPoolSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CasPoolSink for LoggingCasPoolSink {
    async fn dispatch(&self, pool: &CasPool) -> Result<()> {
        let json = serde_json::to_string(pool)?;
        info!(
            spc = %pool.storage_pool_claim,
            node = %pool.node_name,
            request = %json,
            "CasPool provisioning request"
        );
        Ok(())
    }
}

/// In-memory sink for testing.
///
/// Collects provisioning requests for later inspection.
#[derive(Debug, Default)]
pub struct InMemoryCasPoolSink {
    pools: parking_lot::RwLock<Vec<CasPool>>,
}

#[allow(dead_code)]
impl InMemoryCasPoolSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pools(&self) -> Vec<CasPool> {
        self.pools.read().clone()
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }

    pub fn clear(&self) {
        self.pools.write().clear();
    }

    /// Requests targeted at a specific claim.
    pub fn pools_for_claim(&self, spc: &str) -> Vec<CasPool> {
        self.pools
            .read()
            .iter()
            .filter(|p| p.storage_pool_claim == spc)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CasPoolSink for InMemoryCasPoolSink {
    async fn dispatch(&self, pool: &CasPool) -> Result<()> {
        self.pools.write().push(pool.clone());
        Ok(())
    }
}
