//! Configuration for Warden

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

use crate::types::SchemaOverrides;
use crate::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

impl WardenConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        debug!("Loaded configuration from {}", path);
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from `WARDEN_CONFIG` when set, then apply environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("WARDEN_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };

        if let Ok(level) = std::env::var("WARDEN_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("WARDEN_LOG_FORMAT") {
            config.logging.format = format;
        }
        if let Ok(timeout) = std::env::var("WARDEN_CONNECT_TIMEOUT") {
            if let Ok(t) = timeout.parse() {
                config.pool.connect_timeout_secs = t;
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for tenant in &self.tenants {
            if !seen.insert(crate::normalize_tenant(&tenant.name)) {
                return Err(Error::Config(format!("Duplicate tenant: {}", tenant.name)));
            }
            tenant.validate()?;
        }
        Ok(())
    }

    pub fn tenant(&self, name: &str) -> Option<&TenantConfig> {
        let key = crate::normalize_tenant(name);
        self.tenants
            .iter()
            .find(|t| crate::normalize_tenant(&t.name) == key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Directory connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle connections kept per connection identity
    #[serde(default = "default_max_idle")]
    pub max_idle_per_identity: usize,

    /// Upgrade plain `ldap://` connections with STARTTLS
    #[serde(default)]
    pub starttls: bool,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_idle() -> usize {
    8
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            max_idle_per_identity: default_max_idle(),
            starttls: false,
        }
    }
}

/// HTTP client settings for CRL and OCSP traffic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

fn default_http_timeout() -> u64 {
    15
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
        }
    }
}

// ============================================================================
// Tenants
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub name: String,

    /// PEM files holding the trust anchors for client certificates
    #[serde(default)]
    pub trust_anchors: Vec<PathBuf>,

    #[serde(default)]
    pub cert_policy: CertPolicy,

    #[serde(default)]
    pub stores: Vec<IdentityStoreConfig>,
}

impl TenantConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Tenant name is required".into()));
        }
        for store in &self.stores {
            store.validate()?;
        }
        self.cert_policy.validate()
    }

    pub fn store(&self, domain: &str) -> Option<&IdentityStoreConfig> {
        self.stores
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(domain) || s.alias_matches(domain))
    }
}

// ============================================================================
// Identity stores
// ============================================================================

/// Directory provider kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Microsoft Active Directory over LDAP
    #[default]
    ActiveDirectory,
    /// Generic LDAP with the OpenLDAP schema
    Ldap,
    /// LDAP server exposing an AD-compatible schema
    LdapWithAdMapping,
    /// Local operating-system accounts
    LocalOs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    Simple,
    Anonymous,
}

/// Group-resolution strategy flags
pub mod store_flags {
    /// Resolve nested groups with the AD matching-rule-in-chain operator
    pub const FLAG_AD_MATCHING_RULE_IN_CHAIN: u32 = 0x1;
    /// Search nested groups from the domain root instead of the group base DN
    pub const FLAG_DO_NOT_USE_BASE_DN_FOR_NESTED_GROUPS: u32 = 0x2;
    /// Skip nested resolution entirely
    pub const FLAG_DIRECT_GROUPS_ONLY: u32 = 0x4;
}

/// One directory backend definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityStoreConfig {
    /// Domain name, e.g. `acme.local`
    pub name: String,

    #[serde(default)]
    pub alias: Option<String>,

    #[serde(default)]
    pub provider: ProviderKind,

    /// Connection URIs in failover order
    pub connection_strings: Vec<String>,

    #[serde(default)]
    pub auth_type: AuthType,

    /// Bind DN or account name of the service account
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    pub user_base_dn: String,

    pub group_base_dn: String,

    /// Abstract attribute name -> directory attribute name
    #[serde(default)]
    pub attribute_map: BTreeMap<String, String>,

    #[serde(default)]
    pub schema: Option<SchemaOverrides>,

    /// See [`store_flags`]
    #[serde(default)]
    pub flags: u32,

    /// PEM files trusted for `ldaps://` connections
    #[serde(default)]
    pub trusted_certificates: Vec<PathBuf>,

    #[serde(default)]
    pub use_global_catalog: bool,
}

impl IdentityStoreConfig {
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn alias_matches(&self, domain: &str) -> bool {
        self.alias
            .as_deref()
            .map(|a| a.eq_ignore_ascii_case(domain))
            .unwrap_or(false)
    }

    /// DN of the domain root, made of the `dc=` components of the user base DN
    pub fn domain_dn(&self) -> String {
        self.user_base_dn
            .split(',')
            .map(str::trim)
            .filter(|rdn| {
                rdn.split_once('=')
                    .map(|(k, _)| k.trim().eq_ignore_ascii_case("dc"))
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Identity store name is required".into()));
        }

        if self.connection_strings.is_empty() {
            return Err(Error::Config(format!(
                "Identity store '{}' has no connection strings",
                self.name
            )));
        }

        for uri in &self.connection_strings {
            let parsed = url::Url::parse(uri).map_err(|e| {
                Error::Config(format!("Invalid connection string '{}': {}", uri, e))
            })?;
            if parsed.scheme() != "ldap" && parsed.scheme() != "ldaps" {
                return Err(Error::Config(format!(
                    "Connection string must start with ldap:// or ldaps://: {}",
                    uri
                )));
            }
        }

        if self.user_base_dn.trim().is_empty() {
            return Err(Error::Config(format!(
                "Identity store '{}' requires user_base_dn",
                self.name
            )));
        }

        if self.group_base_dn.trim().is_empty() {
            return Err(Error::Config(format!(
                "Identity store '{}' requires group_base_dn",
                self.name
            )));
        }

        if self.auth_type == AuthType::Simple && self.username.is_none() {
            return Err(Error::Config(format!(
                "Identity store '{}' uses simple bind but has no username",
                self.name
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Certificate policy
// ============================================================================

/// Client-certificate validation policy for one tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertPolicy {
    #[serde(default = "default_true")]
    pub revocation_check_enabled: bool,

    #[serde(default = "default_true")]
    pub use_crl: bool,

    #[serde(default)]
    pub use_ocsp: bool,

    /// Fall back to CRL checking when OCSP cannot give an answer
    #[serde(default)]
    pub use_crl_as_failover: bool,

    #[serde(default)]
    pub crl_url: Option<String>,

    #[serde(default)]
    pub ocsp_url: Option<String>,

    /// PEM file of the certificate that signs OCSP responses
    #[serde(default)]
    pub ocsp_signing_cert: Option<PathBuf>,

    /// Accepted certificate policy OIDs; empty accepts any
    #[serde(default)]
    pub allowed_policy_oids: Vec<String>,

    /// Use the CRL distribution point carried by the certificate
    #[serde(default = "default_true")]
    pub use_cert_crl: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CertPolicy {
    fn default() -> Self {
        Self {
            revocation_check_enabled: true,
            use_crl: true,
            use_ocsp: false,
            use_crl_as_failover: false,
            crl_url: None,
            ocsp_url: None,
            ocsp_signing_cert: None,
            allowed_policy_oids: Vec::new(),
            use_cert_crl: true,
        }
    }
}

impl CertPolicy {
    /// A policy that skips revocation checking
    pub fn without_revocation() -> Self {
        Self {
            revocation_check_enabled: false,
            use_crl: false,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (label, value) in [("crl_url", &self.crl_url), ("ocsp_url", &self.ocsp_url)] {
            if let Some(raw) = value {
                url::Url::parse(raw)
                    .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", label, raw, e)))?;
            }
        }

        for oid in &self.allowed_policy_oids {
            let valid = !oid.is_empty()
                && oid
                    .split('.')
                    .all(|c| !c.is_empty() && c.chars().all(|ch| ch.is_ascii_digit()));
            if !valid {
                return Err(Error::Config(format!("Invalid policy OID: {}", oid)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [logging]
        level = "debug"

        [pool]
        connect_timeout_secs = 3

        [[tenants]]
        name = "Acme"
        trust_anchors = ["/etc/warden/acme-ca.pem"]

        [tenants.cert_policy]
        use_ocsp = true
        use_crl_as_failover = true
        allowed_policy_oids = ["2.16.840.1.101.2.1.11.10"]

        [[tenants.stores]]
        name = "acme.local"
        alias = "ACME"
        provider = "active_directory"
        connection_strings = ["ldap://dc1.acme.local", "ldap://dc2.acme.local"]
        username = "CN=svc,CN=Users,DC=acme,DC=local"
        password = "secret"
        user_base_dn = "CN=Users,DC=acme,DC=local"
        group_base_dn = "OU=Groups,DC=acme,DC=local"
        flags = 5

        [tenants.stores.attribute_map]
        "http://schemas.xmlsoap.org/claims/EmailAddress" = "mail"
    "#;

    #[test]
    fn test_parse_sample_config() {
        let config = WardenConfig::from_toml(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.pool.connect_timeout_secs, 3);
        assert_eq!(config.pool.max_idle_per_identity, 8);

        let tenant = config.tenant("ACME").unwrap();
        assert!(tenant.cert_policy.use_ocsp);
        assert!(tenant.cert_policy.use_crl);

        let store = tenant.store("acme").unwrap();
        assert_eq!(store.connection_strings.len(), 2);
        assert!(store.has_flag(store_flags::FLAG_AD_MATCHING_RULE_IN_CHAIN));
        assert!(store.has_flag(store_flags::FLAG_DIRECT_GROUPS_ONLY));
        assert!(!store.has_flag(store_flags::FLAG_DO_NOT_USE_BASE_DN_FOR_NESTED_GROUPS));
        assert_eq!(store.domain_dn(), "DC=acme,DC=local");
    }

    #[test]
    fn test_store_validation() {
        let mut config = WardenConfig::from_toml(SAMPLE).unwrap();
        let store = &mut config.tenants[0].stores[0];

        store.connection_strings = vec!["http://dc1.acme.local".into()];
        assert!(store.validate().is_err());

        store.connection_strings = vec!["ldaps://dc1.acme.local:636".into()];
        assert!(store.validate().is_ok());

        store.group_base_dn.clear();
        assert!(store.validate().is_err());
    }

    #[test]
    fn test_duplicate_tenants_rejected() {
        let mut config = WardenConfig::from_toml(SAMPLE).unwrap();
        let mut twin = config.tenants[0].clone();
        twin.name = "ACME ".into();
        config.tenants.push(twin);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cert_policy_validation() {
        let mut policy = CertPolicy::default();
        assert!(policy.validate().is_ok());

        policy.crl_url = Some("not a url".into());
        assert!(policy.validate().is_err());

        policy.crl_url = None;
        policy.allowed_policy_oids = vec!["1.2.x".into()];
        assert!(policy.validate().is_err());

        let disabled = CertPolicy::without_revocation();
        assert!(!disabled.revocation_check_enabled);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = WardenConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.tenants.len(), 1);

        assert!(WardenConfig::from_file("/nonexistent/warden.toml").is_err());
    }
}
