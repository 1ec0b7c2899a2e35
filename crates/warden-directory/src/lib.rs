//! Warden directory engine
//!
//! Schema mapping, the tenant connection pool, group resolution and the
//! identity provider facade, over ldap3 or the in-process
//! [`MemoryDirectory`](memory::MemoryDirectory).

pub mod connection;
pub mod ldap;
pub mod memory;
pub mod metrics;
pub mod pool;
pub mod provider;
pub mod resolver;
pub mod schema;
pub mod store;

#[cfg(test)]
mod testing;

pub use connection::{Connector, DirectoryConnection, DirectoryEntry, SearchScope};
pub use ldap::Ldap3Connector;
pub use memory::MemoryDirectory;
pub use pool::{ConnectionIdentity, ConnectionPoolManager, PooledConnection};
pub use provider::{AttributeValues, IdentityProvider, TenantDirectory};
pub use resolver::GroupResolver;
pub use schema::{LinkAttribute, QueryKind, SchemaMapping};
pub use store::StoreContext;
