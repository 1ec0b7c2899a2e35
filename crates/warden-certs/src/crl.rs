//! Tenant-scoped CRL cache and CRL fetching
//!
//! Entries are keyed by distribution-point URL and inserted whole. The map
//! is read-mostly; a re-fetch simply overwrites the previous entry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use warden_core::config::HttpConfig;
use warden_core::normalize_tenant;
use x509_parser::prelude::*;

use crate::error::{CertError, CertResult};
use crate::ldap::LdapCrlFetcher;
use crate::metrics;

/// A parsed, verified CRL
#[derive(Debug, Clone)]
pub struct CachedCrl {
    pub url: String,
    /// Raw DER of the issuer name
    pub issuer: Vec<u8>,
    /// Revoked serial numbers without leading zero bytes
    pub revoked: HashSet<Vec<u8>>,
    pub this_update: i64,
    pub next_update: Option<i64>,
    pub fetched_at: DateTime<Utc>,
}

impl CachedCrl {
    /// Fresh while nextUpdate is absent or still ahead
    pub fn is_fresh(&self, now: i64) -> bool {
        self.next_update.map(|next| next > now).unwrap_or(true)
    }

    pub fn covers(&self, issuer_raw: &[u8]) -> bool {
        self.issuer == issuer_raw
    }

    pub fn is_revoked(&self, serial: &[u8]) -> bool {
        self.revoked.contains(normalize_serial(serial))
    }
}

/// Serial number bytes with leading zeros removed
///
/// CRL entries and OCSP `CertID`s are compared on this form.
pub fn normalize_serial(serial: &[u8]) -> &[u8] {
    let skip = serial.iter().take_while(|b| **b == 0).count();
    &serial[skip..]
}

/// Parse a DER CRL and check it against the certificate issuer
///
/// The CRL must name the issuer, carry a signature the issuer key verifies,
/// and not be stale at `now`.
pub fn parse_crl(url: &str, der: &[u8], issuer_der: &[u8], now: i64) -> CertResult<CachedCrl> {
    let (_, issuer) = X509Certificate::from_der(issuer_der)
        .map_err(|e| CertError::Parse(format!("invalid issuer certificate: {}", e)))?;
    let (_, crl) = CertificateRevocationList::from_der(der)
        .map_err(|e| CertError::Parse(format!("invalid CRL from {}: {}", url, e)))?;

    if crl.issuer().as_raw() != issuer.subject().as_raw() {
        return Err(CertError::CertValidation(format!(
            "CRL from {} is issued by {}, not {}",
            url,
            crl.issuer(),
            issuer.subject()
        )));
    }

    crl.verify_signature(issuer.public_key()).map_err(|e| {
        CertError::CertValidation(format!("CRL signature from {} does not verify: {}", url, e))
    })?;

    let next_update = crl.next_update().map(|t| t.timestamp());
    if let Some(next) = next_update {
        if next <= now {
            return Err(CertError::CertValidation(format!("CRL from {} is stale", url)));
        }
    }

    let revoked = crl
        .iter_revoked_certificates()
        .map(|r| normalize_serial(r.raw_serial()).to_vec())
        .collect();

    Ok(CachedCrl {
        url: url.to_string(),
        issuer: crl.issuer().as_raw().to_vec(),
        revoked,
        this_update: crl.last_update().timestamp(),
        next_update,
        fetched_at: Utc::now(),
    })
}

// ============================================================================
// Cache
// ============================================================================

/// CRLs fetched on behalf of one tenant
pub struct CrlCache {
    tenant: String,
    entries: RwLock<HashMap<String, Arc<CachedCrl>>>,
}

impl CrlCache {
    pub fn new(tenant: &str) -> Self {
        Self {
            tenant: normalize_tenant(tenant),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn get(&self, url: &str) -> Option<Arc<CachedCrl>> {
        self.entries.read().get(url).cloned()
    }

    pub fn insert(&self, crl: CachedCrl) -> Arc<CachedCrl> {
        let crl = Arc::new(crl);
        self.entries.write().insert(crl.url.clone(), crl.clone());
        crl
    }

    pub fn remove(&self, url: &str) -> Option<Arc<CachedCrl>> {
        self.entries.write().remove(url)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// One CRL cache per tenant
#[derive(Default)]
pub struct CrlCacheManager {
    caches: RwLock<HashMap<String, Arc<CrlCache>>>,
}

impl CrlCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the tenant's cache, or return the existing one
    pub fn create_cache(&self, tenant: &str) -> Arc<CrlCache> {
        let key = normalize_tenant(tenant);
        let mut caches = self.caches.write();
        caches
            .entry(key.clone())
            .or_insert_with(|| {
                info!("Created CRL cache for tenant {}", key);
                Arc::new(CrlCache::new(&key))
            })
            .clone()
    }

    pub fn get(&self, tenant: &str) -> Option<Arc<CrlCache>> {
        self.caches.read().get(&normalize_tenant(tenant)).cloned()
    }

    pub fn remove(&self, tenant: &str) -> bool {
        let removed = self.caches.write().remove(&normalize_tenant(tenant));
        if let Some(cache) = &removed {
            cache.clear();
            info!("Removed CRL cache for tenant {}", cache.tenant());
        }
        removed.is_some()
    }

    pub fn len(&self) -> usize {
        self.caches.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.read().is_empty()
    }
}

// ============================================================================
// Fetching
// ============================================================================

/// Source of raw CRL bytes
#[async_trait]
pub trait CrlFetcher: Send + Sync {
    /// Fetch the DER-encoded CRL published at `url`
    async fn fetch(&self, url: &str) -> CertResult<Vec<u8>>;
}

/// Fetches CRLs over HTTP(S)
pub struct HttpCrlFetcher {
    client: reqwest::Client,
}

impl HttpCrlFetcher {
    pub fn new(config: &HttpConfig) -> CertResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CertError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CrlFetcher for HttpCrlFetcher {
    async fn fetch(&self, url: &str) -> CertResult<Vec<u8>> {
        debug!("Fetching CRL from {}", url);
        let result = async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| CertError::RevocationStatusUnknown(format!("CRL fetch from {} failed: {}", url, e)))?;
            if !response.status().is_success() {
                return Err(CertError::RevocationStatusUnknown(format!(
                    "CRL fetch from {} returned {}",
                    url,
                    response.status()
                )));
            }
            let body = response
                .bytes()
                .await
                .map_err(|e| CertError::RevocationStatusUnknown(format!("CRL read from {} failed: {}", url, e)))?;
            decode_crl_body(&body)
        }
        .await;

        metrics::record_crl_fetch(result.is_ok());
        if let Err(e) = &result {
            warn!("{}", e);
        }
        result
    }
}

/// Routes each CRL location to the fetcher for its scheme
pub struct SchemeCrlFetcher {
    http: Arc<dyn CrlFetcher>,
    ldap: Arc<dyn CrlFetcher>,
}

impl SchemeCrlFetcher {
    pub fn new(http: Arc<dyn CrlFetcher>, ldap: Arc<dyn CrlFetcher>) -> Self {
        Self { http, ldap }
    }

    /// HTTP(S) through reqwest, LDAP(S) through ldap3
    pub fn for_config(config: &HttpConfig) -> CertResult<Self> {
        Ok(Self::new(
            Arc::new(HttpCrlFetcher::new(config)?),
            Arc::new(LdapCrlFetcher::new(config)),
        ))
    }
}

#[async_trait]
impl CrlFetcher for SchemeCrlFetcher {
    async fn fetch(&self, url: &str) -> CertResult<Vec<u8>> {
        let scheme = url::Url::parse(url).map(|u| u.scheme().to_string());
        match scheme.as_deref() {
            Ok("http") | Ok("https") => self.http.fetch(url).await,
            Ok("ldap") | Ok("ldaps") => self.ldap.fetch(url).await,
            _ => Err(CertError::RevocationStatusUnknown(format!(
                "unsupported CRL location {}",
                url
            ))),
        }
    }
}

/// Accept a CRL body in DER or PEM form
pub fn decode_crl_body(body: &[u8]) -> CertResult<Vec<u8>> {
    if !body.starts_with(b"-----BEGIN") {
        return Ok(body.to_vec());
    }
    let mut reader = body;
    let crl = rustls_pemfile::crls(&mut reader)
        .next()
        .transpose()?
        .map(|crl| crl.as_ref().to_vec())
        .ok_or_else(|| CertError::Parse("no CRL found in PEM body".into()));
    crl
}
