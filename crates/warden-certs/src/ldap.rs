//! CRL retrieval from directory distribution points
//!
//! An `ldap://host/<dn>?<attribute>` location names an entry whose attribute
//! holds the CRL. Without an attribute the `certificateRevocationList;binary`
//! value is read.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchResult};
use percent_encoding::percent_decode_str;
use tracing::{debug, warn};
use url::Url;
use warden_core::config::HttpConfig;

use crate::crl::{decode_crl_body, CrlFetcher};
use crate::error::{CertError, CertResult};
use crate::metrics;

pub const DEFAULT_CRL_ATTRIBUTE: &str = "certificateRevocationList;binary";

/// A parsed LDAP CRL distribution point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapCrlLocation {
    /// `ldap[s]://host[:port]`
    pub server: String,
    pub base_dn: String,
    pub attribute: String,
}

fn decode(part: &str, raw: &str) -> CertResult<String> {
    percent_decode_str(part)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| CertError::Config(format!("invalid CRL location {}: {}", raw, e)))
}

impl LdapCrlLocation {
    pub fn parse(raw: &str) -> CertResult<Self> {
        let url = Url::parse(raw)
            .map_err(|e| CertError::Config(format!("invalid CRL location {}: {}", raw, e)))?;
        let scheme = url.scheme();
        if scheme != "ldap" && scheme != "ldaps" {
            return Err(CertError::Config(format!("{} is not an LDAP location", raw)));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CertError::Config(format!("CRL location {} names no server", raw)))?;
        let server = match url.port() {
            Some(port) => format!("{}://{}:{}", scheme, host, port),
            None => format!("{}://{}", scheme, host),
        };

        let base_dn = decode(url.path().trim_start_matches('/'), raw)?;
        if base_dn.is_empty() {
            return Err(CertError::Config(format!("CRL location {} names no entry", raw)));
        }

        let attribute = match url.query().and_then(|q| q.split('?').next()) {
            Some(attr) if !attr.is_empty() => decode(attr, raw)?,
            _ => DEFAULT_CRL_ATTRIBUTE.to_string(),
        };

        Ok(Self {
            server,
            base_dn,
            attribute,
        })
    }
}

/// First value of `attribute`, matched with or without its options
fn crl_value(entry: &SearchEntry, attribute: &str) -> Option<Vec<u8>> {
    let base = attribute.split(';').next().unwrap_or(attribute);
    let matches = |name: &str| {
        name.eq_ignore_ascii_case(attribute)
            || name
                .split(';')
                .next()
                .is_some_and(|n| n.eq_ignore_ascii_case(base))
    };

    entry
        .bin_attrs
        .iter()
        .find(|(name, _)| matches(name))
        .and_then(|(_, values)| values.first().cloned())
        .or_else(|| {
            entry
                .attrs
                .iter()
                .find(|(name, _)| matches(name))
                .and_then(|(_, values)| values.first().map(|v| v.as_bytes().to_vec()))
        })
}

/// Reads CRLs published in a directory
pub struct LdapCrlFetcher {
    timeout: Duration,
}

impl LdapCrlFetcher {
    pub fn new(config: &HttpConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn read(&self, raw: &str) -> CertResult<Vec<u8>> {
        let location = LdapCrlLocation::parse(raw)
            .map_err(|e| CertError::RevocationStatusUnknown(e.to_string()))?;
        let unknown = |what: &str, e: ldap3::LdapError| {
            CertError::RevocationStatusUnknown(format!("CRL {} at {} failed: {}", what, raw, e))
        };

        let settings = LdapConnSettings::new().set_conn_timeout(self.timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &location.server)
            .await
            .map_err(|e| unknown("connect", e))?;
        ldap3::drive!(conn);

        let result = ldap
            .with_timeout(self.timeout)
            .search(
                &location.base_dn,
                Scope::Base,
                "(objectClass=*)",
                vec![location.attribute.as_str()],
            )
            .await;
        if let Err(e) = ldap.unbind().await {
            debug!("Unbind from {} failed: {}", location.server, e);
        }

        let (entries, _) = result
            .and_then(SearchResult::success)
            .map_err(|e| unknown("search", e))?;
        let body = entries
            .into_iter()
            .map(SearchEntry::construct)
            .find_map(|entry| crl_value(&entry, &location.attribute))
            .ok_or_else(|| {
                CertError::RevocationStatusUnknown(format!(
                    "{} holds no {} value",
                    location.base_dn, location.attribute
                ))
            })?;
        decode_crl_body(&body)
    }
}

#[async_trait]
impl CrlFetcher for LdapCrlFetcher {
    async fn fetch(&self, url: &str) -> CertResult<Vec<u8>> {
        debug!("Reading CRL from directory location {}", url);
        let result = self.read(url).await;

        metrics::record_crl_fetch(result.is_ok());
        if let Err(e) = &result {
            warn!("{}", e);
        }
        result
    }
}
