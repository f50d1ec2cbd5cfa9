//! Lazily established, process-wide cached connection to the backing store.

use crate::error::CoachResult;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(600);

/// Opens a connection to the backing collaborator.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Send + Sync;

    async fn connect(&self) -> CoachResult<Self::Connection>;
}

struct Cached<T> {
    connection: Arc<T>,
    established: Instant,
}

/// Caches one connection and re-establishes it once it is older than the
/// freshness window. Callers racing on a stale entry share one connect.
pub struct ConnectionCache<C: Connector> {
    connector: C,
    freshness: Duration,
    slot: Mutex<Option<Cached<C::Connection>>>,
}

impl<C: Connector> ConnectionCache<C> {
    pub fn new(connector: C, freshness: Duration) -> Self {
        Self {
            connector,
            freshness,
            slot: Mutex::new(None),
        }
    }

    /// Returns the cached connection, connecting first if none is cached or the
    /// cached one has gone stale.
    pub async fn get(&self) -> CoachResult<Arc<C::Connection>> {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.as_ref() {
            if cached.established.elapsed() < self.freshness {
                return Ok(cached.connection.clone());
            }
            debug!("Cached store connection expired; reconnecting");
        }

        let connection = Arc::new(self.connector.connect().await?);
        info!(freshness_secs = self.freshness.as_secs(), "Store connection established");
        *slot = Some(Cached {
            connection: connection.clone(),
            established: Instant::now(),
        });
        Ok(connection)
    }

    /// Drops the cached connection so the next `get` reconnects.
    pub async fn invalidate(&self) {
        self.slot.lock().await.take();
    }
}
