//! Named connection pool with lazy construction and linear failover.
//!
//! The pool map is the only shared mutable state. Lookups take the read lock;
//! construction and close take the write lock. Neither lock is held across an
//! await point: `close` drains the map under the lock and awaits outside it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::conf::{ClientOptions, SelectorConf, init_logging};
use crate::db::executor::{Driver, PgDriver};
use crate::errors::{ConnectionError, DbError, Error, Result};

pub const MASTER: &str = "master";
pub const REPLICA: &str = "replica";

/// Failover order used by [`Selector::retry_master`].
pub const RETRY_MASTER: [&str; 2] = [REPLICA, MASTER];

type Factory<D> = Arc<dyn Fn(&str, &ClientOptions) -> Result<D> + Send + Sync>;

pub struct Selector<D: Driver> {
    configurations: HashMap<String, ClientOptions>,
    connections: RwLock<HashMap<String, Arc<D>>>,
    factory: Factory<D>,
}

impl<D: Driver> fmt::Debug for Selector<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("aliases", &self.configurations.keys().collect::<Vec<_>>())
            .field("connections", &self.connection_count())
            .finish()
    }
}

impl<D: Driver> Selector<D> {
    /// Aliases are matched case-insensitively; `factory` builds the driver of
    /// an alias on its first use.
    pub fn new<F>(configurations: HashMap<String, ClientOptions>, factory: F) -> Self
    where
        F: Fn(&str, &ClientOptions) -> Result<D> + Send + Sync + 'static,
    {
        let configurations = configurations
            .into_iter()
            .map(|(alias, options)| (alias.to_lowercase(), options))
            .collect();
        Self {
            configurations,
            connections: RwLock::new(HashMap::new()),
            factory: Arc::new(factory),
        }
    }

    /// A selector holding one live `master` connection and nothing to build.
    pub fn with_driver(driver: D) -> Self {
        let selector = Self::new(HashMap::new(), |alias: &str, _: &ClientOptions| {
            Err(ConnectionError::AliasNotFound(alias.to_string()).into())
        });
        selector
            .connections
            .write()
            .insert(MASTER.to_string(), Arc::new(driver));
        selector
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Live connection of `alias`, built on first use. Concurrent first uses
    /// of the same alias build exactly one connection.
    pub fn using(&self, alias: &str) -> Result<Arc<D>> {
        let alias = alias.to_lowercase();

        if let Some(conn) = self.connections.read().get(&alias) {
            return Ok(Arc::clone(conn));
        }

        let mut connections = self.connections.write();
        // Double-check after acquiring write lock
        if let Some(conn) = connections.get(&alias) {
            return Ok(Arc::clone(conn));
        }

        let options = match self.configurations.get(&alias) {
            Some(options) => options,
            None => {
                drop(connections);
                return Err(ConnectionError::AliasNotFound(alias).into());
            }
        };

        let conn = Arc::new((self.factory)(&alias, options)?);
        connections.insert(alias.clone(), Arc::clone(&conn));
        info!(alias = %alias, "connection created");
        Ok(conn)
    }

    /// Resolves `aliases` in order, skipping the ones that cannot be resolved,
    /// then retries `handler` across the resolved connections.
    pub async fn retry_aliases<T, F, Fut>(&self, handler: F, aliases: &[&str]) -> Result<T>
    where
        F: FnMut(Arc<D>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let drivers = aliases
            .iter()
            .filter_map(|alias| match self.using(alias) {
                Ok(conn) => Some(conn),
                Err(e) => {
                    debug!(alias = %alias, error = %e, "alias skipped");
                    None
                }
            })
            .collect::<Vec<_>>();
        retry(handler, &drivers).await
    }

    /// Replica first, master as fallback.
    pub async fn retry_master<T, F, Fut>(&self, handler: F) -> Result<T>
    where
        F: FnMut(Arc<D>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retry_aliases(handler, &RETRY_MASTER).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.retry_master(|conn| async move { conn.ping().await.map_err(Error::from) })
            .await
    }

    /// Closes every live connection and empties the pool, whatever the
    /// individual outcomes. Returns every close failure.
    pub async fn close(&self) -> Vec<DbError> {
        let drained = {
            let mut connections = self.connections.write();
            connections.drain().collect::<Vec<_>>()
        };

        let mut errors = Vec::new();
        for (alias, conn) in drained {
            match conn.close().await {
                Ok(()) => info!(alias = %alias, "connection closed"),
                Err(e) => {
                    warn!(alias = %alias, error = %e, "connection close failed");
                    errors.push(e);
                }
            }
        }
        errors
    }
}

impl Selector<PgDriver> {
    /// PostgreSQL selector over the configured aliases. Pools connect lazily.
    pub fn from_conf(conf: &SelectorConf) -> Self {
        if conf.log_init {
            init_logging();
        }
        Self::new(conf.connections.clone(), |_: &str, options: &ClientOptions| {
            Ok(PgDriver::connect_lazy(options)?)
        })
    }
}

/// Runs `handler` against each driver in order and returns the first
/// success. When every attempt fails the last error is returned.
pub async fn retry<D, T, F, Fut>(mut handler: F, drivers: &[Arc<D>]) -> Result<T>
where
    D: Driver,
    F: FnMut(Arc<D>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last = Error::Connection(ConnectionError::NoConnections);
    for (attempt, driver) in drivers.iter().enumerate() {
        match handler(Arc::clone(driver)).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(
                    attempt,
                    remaining = drivers.len() - attempt - 1,
                    error = %e,
                    "connection attempt failed"
                );
                last = e;
            }
        }
    }
    Err(last)
}
