//! Connection identity: the pool bucket key

use std::fmt;
use std::path::Path;

use warden_core::config::{AuthType, IdentityStoreConfig};
use warden_core::{normalize_tenant, Error, Result};

/// Immutable description of one logical directory connection
///
/// Two identities are equal only if every field is equal, so identities
/// differing just in the global-catalog flag land in different buckets.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionIdentity {
    uris: Vec<String>,
    auth_type: AuthType,
    username: Option<String>,
    password: Option<String>,
    tenant: String,
    trusted_certs: Vec<Vec<u8>>,
    use_gc_port: bool,
}

impl ConnectionIdentity {
    pub fn builder(tenant: &str) -> ConnectionIdentityBuilder {
        ConnectionIdentityBuilder::new(tenant)
    }

    /// Service-account identity for an identity store
    pub fn for_store(tenant: &str, store: &IdentityStoreConfig) -> Result<Self> {
        let mut builder = Self::builder(tenant)
            .uris(store.connection_strings.iter().cloned())
            .auth_type(store.auth_type)
            .use_gc_port(store.use_global_catalog);
        if let Some(username) = &store.username {
            builder = builder.username(username);
        }
        if let Some(password) = &store.password {
            builder = builder.password(password);
        }
        for path in &store.trusted_certificates {
            for der in load_pem_certificates(path)? {
                builder = builder.trusted_cert(der);
            }
        }
        builder.build()
    }

    pub fn uris(&self) -> &[String] {
        &self.uris
    }

    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Normalized tenant name
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// DER-encoded certificates trusted for `ldaps://`
    pub fn trusted_certs(&self) -> &[Vec<u8>] {
        &self.trusted_certs
    }

    pub fn use_gc_port(&self) -> bool {
        self.use_gc_port
    }

    /// Same identity with different bind credentials
    pub fn with_credentials(&self, username: &str, password: &str) -> Self {
        Self {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            auth_type: AuthType::Simple,
            ..self.clone()
        }
    }
}

impl fmt::Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionIdentity")
            .field("uris", &self.uris)
            .field("auth_type", &self.auth_type)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tenant", &self.tenant)
            .field("trusted_certs", &self.trusted_certs.len())
            .field("use_gc_port", &self.use_gc_port)
            .finish()
    }
}

/// Builder for [`ConnectionIdentity`]
///
/// `build` takes a snapshot, so mutating the builder afterwards yields a
/// structurally different identity.
#[derive(Debug, Clone)]
pub struct ConnectionIdentityBuilder {
    uris: Vec<String>,
    auth_type: AuthType,
    username: Option<String>,
    password: Option<String>,
    tenant: String,
    trusted_certs: Vec<Vec<u8>>,
    use_gc_port: bool,
}

impl ConnectionIdentityBuilder {
    pub fn new(tenant: &str) -> Self {
        Self {
            uris: Vec::new(),
            auth_type: AuthType::Simple,
            username: None,
            password: None,
            tenant: normalize_tenant(tenant),
            trusted_certs: Vec::new(),
            use_gc_port: false,
        }
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uris.push(uri.into());
        self
    }

    pub fn uris(mut self, uris: impl IntoIterator<Item = String>) -> Self {
        self.uris.extend(uris);
        self
    }

    pub fn auth_type(mut self, auth_type: AuthType) -> Self {
        self.auth_type = auth_type;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn trusted_cert(mut self, der: Vec<u8>) -> Self {
        self.trusted_certs.push(der);
        self
    }

    pub fn use_gc_port(mut self, enabled: bool) -> Self {
        self.use_gc_port = enabled;
        self
    }

    pub fn build(&self) -> Result<ConnectionIdentity> {
        if self.uris.is_empty() {
            return Err(Error::InvalidArgument(
                "connection identity needs at least one URI".into(),
            ));
        }
        if self.tenant.is_empty() {
            return Err(Error::InvalidArgument(
                "connection identity needs a tenant".into(),
            ));
        }
        Ok(ConnectionIdentity {
            uris: self.uris.clone(),
            auth_type: self.auth_type,
            username: self.username.clone(),
            password: self.password.clone(),
            tenant: self.tenant.clone(),
            trusted_certs: self.trusted_certs.clone(),
            use_gc_port: self.use_gc_port,
        })
    }
}

/// Read every certificate from a PEM file as DER
pub fn load_pem_certificates(path: &Path) -> Result<Vec<Vec<u8>>> {
    let pem = std::fs::read(path)?;
    let mut reader = pem.as_slice();
    let certs = rustls_pemfile::certs(&mut reader)
        .map(|c| c.map(|der| der.as_ref().to_vec()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}
