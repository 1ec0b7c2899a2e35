//! Tenant-scoped directory connection pool
//!
//! Each tenant owns one [`TenantPool`] holding idle connections and a table
//! of outstanding leases, bucketed by full [`ConnectionIdentity`] equality.
//! Locks are never held across network I/O.

mod identity;

pub use identity::{load_pem_certificates, ConnectionIdentity, ConnectionIdentityBuilder};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use warden_core::config::{AuthType, PoolConfig};
use warden_core::{normalize_tenant, Error, Result};

use crate::connection::{Connector, DirectoryConnection};
use crate::metrics;

pub type BoxedConnection = Box<dyn DirectoryConnection>;

#[derive(Default)]
struct PoolState {
    idle: HashMap<ConnectionIdentity, Vec<BoxedConnection>>,
    outstanding: HashMap<ConnectionIdentity, HashSet<u64>>,
    closed: bool,
}

/// Connections belonging to one tenant
pub struct TenantPool {
    tenant: String,
    max_idle: usize,
    state: Mutex<PoolState>,
}

impl TenantPool {
    fn new(tenant: String, max_idle: usize) -> Self {
        Self {
            tenant,
            max_idle,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Pop an idle connection and register a lease for it
    fn take_idle(&self, identity: &ConnectionIdentity, lease: u64) -> Result<Option<BoxedConnection>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::NoPoolForTenant(self.tenant.clone()));
        }
        let conn = state.idle.get_mut(identity).and_then(Vec::pop);
        if conn.is_some() {
            state
                .outstanding
                .entry(identity.clone())
                .or_default()
                .insert(lease);
        }
        Ok(conn)
    }

    /// Register a lease for a freshly opened connection
    fn register(&self, identity: &ConnectionIdentity, lease: u64) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state
            .outstanding
            .entry(identity.clone())
            .or_default()
            .insert(lease);
        true
    }

    /// Drop the lease and park `conn` if there is room
    ///
    /// A connection the pool does not keep is left in `conn` for the caller
    /// to close.
    fn release(
        &self,
        identity: &ConnectionIdentity,
        lease: u64,
        conn: &mut Option<BoxedConnection>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::UnknownConnection(self.tenant.clone()));
        }

        let known = match state.outstanding.get_mut(identity) {
            Some(leases) => {
                let removed = leases.remove(&lease);
                if leases.is_empty() {
                    state.outstanding.remove(identity);
                }
                removed
            }
            None => false,
        };
        if !known {
            return Err(Error::UnknownConnection(self.tenant.clone()));
        }

        let idle = state.idle.entry(identity.clone()).or_default();
        if idle.len() < self.max_idle {
            if let Some(conn) = conn.take() {
                idle.push(conn);
            }
        } else if conn.is_some() {
            debug!(
                "Idle bucket for tenant {} is full ({}), closing returned connection",
                self.tenant, self.max_idle
            );
        }
        Ok(())
    }
}

/// Close a connection the pool let go of, off the caller's path
///
/// Returns happen from sync code and `Drop`, so the close runs as its own
/// task. Without a runtime the connection is simply dropped.
fn close_detached(mut conn: BoxedConnection, tenant: &str) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { conn.close().await });
        }
        Err(_) => debug!("No runtime to close a released connection for tenant {}", tenant),
    }
}

// ============================================================================
// Pooled connection
// ============================================================================

/// A borrowed connection
///
/// Must be handed back exactly once with
/// [`ConnectionPoolManager::return_connection`]. Dropping it unreturned
/// returns it implicitly.
pub struct PooledConnection {
    conn: Option<BoxedConnection>,
    identity: ConnectionIdentity,
    lease: u64,
    pool: Arc<TenantPool>,
    returned: bool,
}

impl PooledConnection {
    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn is_returned(&self) -> bool {
        self.returned
    }

    /// The live connection; fails once returned or after the tenant's pool was cleaned
    pub fn connection(&mut self) -> Result<&mut BoxedConnection> {
        if self.returned {
            return Err(Error::AlreadyReturned);
        }
        if self.pool.is_closed() {
            return Err(Error::NoPoolForTenant(self.pool.tenant.clone()));
        }
        self.conn.as_mut().ok_or(Error::AlreadyReturned)
    }

    fn release(&mut self) -> Result<()> {
        if self.returned {
            return Err(Error::AlreadyReturned);
        }
        self.returned = true;
        let mut conn = self.conn.take();
        let result = self.pool.release(&self.identity, self.lease, &mut conn);
        if let Some(conn) = conn {
            close_detached(conn, &self.pool.tenant);
        }
        result
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if !self.returned {
            if let Err(e) = self.release() {
                debug!("Dropped connection for tenant {} not returned: {}", self.pool.tenant, e);
            }
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Owner of every tenant pool
pub struct ConnectionPoolManager {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    pools: Mutex<HashMap<String, Arc<TenantPool>>>,
    next_lease: AtomicU64,
}

impl ConnectionPoolManager {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            connector,
            config,
            pools: Mutex::new(HashMap::new()),
            next_lease: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Create the pool for `tenant`; a no-op if it exists
    pub fn create_pool(&self, tenant: &str) {
        let key = normalize_tenant(tenant);
        let mut pools = self.pools.lock();
        if pools.contains_key(&key) {
            return;
        }
        debug!("Creating connection pool for tenant {}", key);
        pools.insert(
            key.clone(),
            Arc::new(TenantPool::new(key, self.config.max_idle_per_identity)),
        );
        metrics::record_pools_active(pools.len());
    }

    pub fn has_pool(&self, tenant: &str) -> bool {
        self.pools.lock().contains_key(&normalize_tenant(tenant))
    }

    fn pool(&self, tenant: &str) -> Result<Arc<TenantPool>> {
        self.pools
            .lock()
            .get(tenant)
            .cloned()
            .ok_or_else(|| Error::NoPoolForTenant(tenant.to_string()))
    }

    /// Borrow a bound connection for `identity`
    ///
    /// Reuses an idle connection of the same identity when one exists,
    /// otherwise tries each URI in order.
    pub async fn borrow_connection(&self, identity: &ConnectionIdentity) -> Result<PooledConnection> {
        let pool = self.pool(identity.tenant())?;
        let lease = self.next_lease.fetch_add(1, Ordering::Relaxed);

        if let Some(conn) = pool.take_idle(identity, lease)? {
            metrics::record_borrow(identity.tenant(), "idle");
            return Ok(PooledConnection {
                conn: Some(conn),
                identity: identity.clone(),
                lease,
                pool,
                returned: false,
            });
        }

        let mut conn = self.open(identity, true).await?;

        if !pool.register(identity, lease) {
            // cleaned while we were connecting
            conn.close().await;
            return Err(Error::NoPoolForTenant(identity.tenant().to_string()));
        }

        metrics::record_borrow(identity.tenant(), "new");
        Ok(PooledConnection {
            conn: Some(conn),
            identity: identity.clone(),
            lease,
            pool,
            returned: false,
        })
    }

    /// Hand a borrowed connection back
    pub fn return_connection(&self, pooled: &mut PooledConnection) -> Result<()> {
        let result = pooled.release();
        let outcome = match &result {
            Ok(()) => "ok",
            Err(Error::AlreadyReturned) => "already_returned",
            Err(_) => "unknown",
        };
        metrics::record_return(pooled.identity.tenant(), outcome);
        if let Err(e) = &result {
            warn!("Rejected connection return for tenant {}: {}", pooled.identity.tenant(), e);
        }
        result
    }

    /// Hand a borrowed connection back and pass `result` through
    ///
    /// A rejected return is logged by [`Self::return_connection`] and never
    /// replaces the outcome of the work done on the connection.
    pub fn return_with<T>(&self, pooled: &mut PooledConnection, result: Result<T>) -> Result<T> {
        let _ = self.return_connection(pooled);
        result
    }

    /// Open a connection outside the pool, without binding
    ///
    /// Used for end-user credential checks, which must not share a bind
    /// state with pooled connections.
    pub async fn connect_unpooled(&self, identity: &ConnectionIdentity) -> Result<BoxedConnection> {
        if !self.has_pool(identity.tenant()) {
            return Err(Error::NoPoolForTenant(identity.tenant().to_string()));
        }
        self.open(identity, false).await
    }

    async fn open(&self, identity: &ConnectionIdentity, bind: bool) -> Result<BoxedConnection> {
        let mut last_error = String::from("no connection URIs");

        for uri in identity.uris() {
            match self.try_open(uri, identity, bind).await {
                Ok(conn) => {
                    debug!("Connected to {} for tenant {}", uri, identity.tenant());
                    return Ok(conn);
                }
                Err(e) => {
                    warn!("Connection to {} failed: {}", uri, e);
                    metrics::record_connect_failure(uri);
                    last_error = format!("{}: {}", uri, e);
                }
            }
        }

        Err(Error::ConnectionUnavailable(last_error))
    }

    async fn try_open(
        &self,
        uri: &str,
        identity: &ConnectionIdentity,
        bind: bool,
    ) -> Result<BoxedConnection> {
        let mut conn = self.connector.connect(uri, identity).await?;
        if !bind || identity.auth_type() == AuthType::Anonymous {
            return Ok(conn);
        }

        let username = match identity.username() {
            Some(u) => u,
            None => {
                conn.close().await;
                return Err(Error::InvalidArgument(
                    "simple bind requires a username".into(),
                ));
            }
        };
        if let Err(e) = conn.bind(username, identity.password().unwrap_or("")).await {
            conn.close().await;
            return Err(e);
        }
        Ok(conn)
    }

    /// Drop the tenant's pool, closing idle connections and invalidating
    /// outstanding ones
    ///
    /// Outstanding connections are closed as their borrowers hand them back
    /// or drop them.
    pub async fn clean_pool(&self, tenant: &str) {
        let key = normalize_tenant(tenant);
        let removed = {
            let mut pools = self.pools.lock();
            let removed = pools.remove(&key);
            metrics::record_pools_active(pools.len());
            removed
        };

        let Some(pool) = removed else {
            debug!("No connection pool to clean for tenant {}", key);
            return;
        };

        let (idle, outstanding) = {
            let mut state = pool.state.lock();
            state.closed = true;
            let outstanding: usize = state.outstanding.values().map(HashSet::len).sum();
            state.outstanding.clear();
            let idle: Vec<BoxedConnection> = state.idle.drain().flat_map(|(_, v)| v).collect();
            (idle, outstanding)
        };

        let closed = idle.len();
        for mut conn in idle {
            conn.close().await;
        }

        info!(
            "Cleaned connection pool for tenant {}: closed {} idle, invalidated {} outstanding",
            key, closed, outstanding
        );
    }

    /// Outstanding leases for an identity
    pub fn outstanding(&self, identity: &ConnectionIdentity) -> usize {
        self.pool(identity.tenant())
            .map(|p| {
                p.state
                    .lock()
                    .outstanding
                    .get(identity)
                    .map(HashSet::len)
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// Idle connections parked for an identity
    pub fn idle_count(&self, identity: &ConnectionIdentity) -> usize {
        self.pool(identity.tenant())
            .map(|p| p.state.lock().idle.get(identity).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }
}
