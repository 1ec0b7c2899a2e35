//! LDAP backend over ldap3
//!
//! Supports plain LDAP, LDAPS and STARTTLS. When the identity asks for the
//! global catalog, URIs without an explicit port are redirected to the GC
//! ports.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchResult};
use tracing::{debug, warn};
use warden_core::config::PoolConfig;
use warden_core::{Error, Result, GC_PORT, GC_SSL_PORT};

use crate::connection::{Connector, DirectoryConnection, DirectoryEntry, SearchScope};
use crate::pool::ConnectionIdentity;

/// LDAP result codes we map explicitly
mod rc {
    pub const SUCCESS: u32 = 0;
    pub const NO_SUCH_OBJECT: u32 = 32;
    pub const INVALID_CREDENTIALS: u32 = 49;
    pub const UNWILLING_TO_PERFORM: u32 = 53;
}

/// Binary attributes rendered as strings instead of base64
const SID_ATTRIBUTES: [&str; 2] = ["objectSid", "tokenGroups"];

/// Opens ldap3 connections
pub struct Ldap3Connector {
    timeout: Duration,
    starttls: bool,
}

impl Ldap3Connector {
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.connect_timeout_secs),
            starttls: config.starttls,
        }
    }

    fn settings(&self, uri: &str, identity: &ConnectionIdentity) -> Result<LdapConnSettings> {
        let mut settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        if uri.starts_with("ldap://") {
            settings = settings.set_starttls(self.starttls);
        }
        if let Some(config) = tls_config(identity)? {
            settings = settings.set_config(config);
        }
        Ok(settings)
    }
}

#[async_trait]
impl Connector for Ldap3Connector {
    async fn connect(
        &self,
        uri: &str,
        identity: &ConnectionIdentity,
    ) -> Result<Box<dyn DirectoryConnection>> {
        let target = effective_uri(uri, identity.use_gc_port())?;
        let settings = self.settings(&target, identity)?;

        debug!("Connecting to LDAP server: {}", target);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &target)
            .await
            .map_err(|e| Error::Directory(format!("Failed to connect to {}: {}", target, e)))?;

        ldap3::drive!(conn);

        Ok(Box::new(Ldap3Connection { uri: target, ldap }))
    }
}

/// The URI actually dialed for `uri`
pub fn effective_uri(uri: &str, use_gc_port: bool) -> Result<String> {
    let mut parsed = url::Url::parse(uri)
        .map_err(|e| Error::Config(format!("Invalid connection string '{}': {}", uri, e)))?;

    if use_gc_port && parsed.port().is_none() {
        let port = match parsed.scheme() {
            "ldaps" => GC_SSL_PORT,
            _ => GC_PORT,
        };
        parsed
            .set_port(Some(port))
            .map_err(|_| Error::Config(format!("Cannot set port on '{}'", uri)))?;
        return Ok(parsed.to_string().trim_end_matches('/').to_string());
    }

    Ok(uri.to_string())
}

fn tls_config(identity: &ConnectionIdentity) -> Result<Option<Arc<rustls::ClientConfig>>> {
    if identity.trusted_certs().is_empty() {
        return Ok(None);
    }

    let mut roots = rustls::RootCertStore::empty();
    for der in identity.trusted_certs() {
        roots
            .add(rustls::pki_types::CertificateDer::from(der.clone()))
            .map_err(|e| Error::Config(format!("Invalid trusted certificate: {}", e)))?;
    }

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Some(Arc::new(config)))
}

pub struct Ldap3Connection {
    uri: String,
    ldap: Ldap,
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
        // an empty password would be an unauthenticated bind
        if password.is_empty() {
            return Err(Error::LoginFailed);
        }

        let result = self
            .ldap
            .simple_bind(dn, password)
            .await
            .map_err(|e| Error::Directory(format!("Bind failed: {}", e)))?;

        match result.rc {
            rc::SUCCESS => Ok(()),
            rc::INVALID_CREDENTIALS | rc::UNWILLING_TO_PERFORM => {
                debug!("Bind as {} rejected with code {}", dn, result.rc);
                Err(Error::LoginFailed)
            }
            code => Err(Error::Directory(format!(
                "Bind as {} failed with code {}: {}",
                dn, code, result.text
            ))),
        }
    }

    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>> {
        let scope = match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        };

        debug!("Searching {} with filter: {}", base, filter);

        let SearchResult(entries, result) = self
            .ldap
            .search(base, scope, filter, attrs.to_vec())
            .await
            .map_err(|e| Error::Directory(format!("Search failed: {}", e)))?;

        match result.rc {
            rc::SUCCESS => {}
            rc::NO_SUCH_OBJECT => return Ok(Vec::new()),
            code => {
                return Err(Error::Directory(format!(
                    "Search under {} failed with code {}: {}",
                    base, code, result.text
                )))
            }
        }

        Ok(entries
            .into_iter()
            .map(|raw| convert_entry(SearchEntry::construct(raw)))
            .collect())
    }

    async fn close(&mut self) {
        if let Err(e) = self.ldap.unbind().await {
            warn!("Unbind from {} failed: {}", self.uri, e);
        }
    }
}

fn convert_entry(entry: SearchEntry) -> DirectoryEntry {
    let mut out = DirectoryEntry::new(entry.dn);
    out.attrs = entry.attrs;

    for (name, values) in entry.bin_attrs {
        let is_sid = SID_ATTRIBUTES
            .iter()
            .any(|sid| name.eq_ignore_ascii_case(sid));
        let converted = values
            .iter()
            .map(|v| {
                if is_sid {
                    sid_to_string(v)
                        .unwrap_or_else(|| base64::engine::general_purpose::STANDARD.encode(v))
                } else {
                    base64::engine::general_purpose::STANDARD.encode(v)
                }
            })
            .collect();
        out.attrs.insert(name, converted);
    }
    out
}

/// Binary SID to `S-1-5-21-...` form
pub fn sid_to_string(bytes: &[u8]) -> Option<String> {
    if bytes.len() < 8 {
        return None;
    }
    let revision = bytes[0];
    let count = bytes[1] as usize;
    if bytes.len() != 8 + count * 4 {
        return None;
    }

    let authority = bytes[2..8]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));

    let mut sid = format!("S-{}-{}", revision, authority);
    for chunk in bytes[8..].chunks_exact(4) {
        let sub = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        sid.push_str(&format!("-{}", sub));
    }
    Some(sid)
}
