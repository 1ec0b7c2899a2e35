//! Principal, user and group types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::{Error, Result};

// ============================================================================
// Principal Id
// ============================================================================

/// A (name, domain) pair identifying a user or group
///
/// Domains compare case-insensitively, names compare exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalId {
    pub name: String,
    pub domain: String,
}

impl PrincipalId {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
    }

    /// Parse `name@domain` or `DOMAIN\name`, falling back to `default_domain`
    /// for a bare name.
    pub fn parse(value: &str, default_domain: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::InvalidArgument("principal name is empty".into()));
        }

        let (name, domain) = if let Some((domain, name)) = value.split_once('\\') {
            (name, domain)
        } else if let Some((name, domain)) = value.rsplit_once('@') {
            (name, domain)
        } else {
            (value, default_domain)
        };

        if name.is_empty() || domain.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "malformed principal name: {}",
                value
            )));
        }

        Ok(Self::new(name, domain))
    }

    /// `name@domain`
    pub fn upn(&self) -> String {
        format!("{}@{}", self.name, self.domain)
    }

    /// `domain\name`
    pub fn netbios(&self) -> String {
        format!("{}\\{}", self.domain, self.name)
    }

    pub fn in_domain(&self, domain: &str) -> bool {
        self.domain.eq_ignore_ascii_case(domain)
    }
}

impl PartialEq for PrincipalId {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.domain.eq_ignore_ascii_case(&other.domain)
    }
}

impl Eq for PrincipalId {}

impl Hash for PrincipalId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.domain.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}

// ============================================================================
// Account control
// ============================================================================

/// Active Directory `userAccountControl` bits
pub mod account_control {
    pub const ACCOUNT_DISABLED: u32 = 0x0000_0002;
    pub const ACCOUNT_LOCKED: u32 = 0x0000_0010;
    pub const DONT_EXPIRE_PASSWORD: u32 = 0x0001_0000;
    pub const PASSWORD_EXPIRED: u32 = 0x0080_0000;

    pub fn is_disabled(flags: u32) -> bool {
        flags & ACCOUNT_DISABLED != 0
    }

    pub fn is_locked(flags: u32) -> bool {
        flags & ACCOUNT_LOCKED != 0
    }

    pub fn is_password_expired(flags: u32) -> bool {
        flags & PASSWORD_EXPIRED != 0
    }
}

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonDetail {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub description: Option<String>,
    pub user_principal_name: Option<String>,
}

/// A user found in a directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonUser {
    pub id: PrincipalId,
    pub alias: Option<PrincipalId>,
    pub object_id: Option<String>,
    pub detail: PersonDetail,
    pub disabled: bool,
    pub locked: bool,
    #[serde(default)]
    pub password_expired: bool,
}

impl PartialEq for PersonUser {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PersonUser {}

impl Hash for PersonUser {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ============================================================================
// Groups
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupDetail {
    pub description: String,
}

/// A group found in a directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: PrincipalId,
    pub alias: Option<PrincipalId>,
    pub object_id: Option<String>,
    pub detail: Option<GroupDetail>,
}

impl Group {
    pub fn description(&self) -> Option<&str> {
        self.detail.as_ref().map(|d| d.description.as_str())
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Group {}

impl Hash for Group {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Result of a group-membership query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrincipalGroupLookupInfo {
    /// Groups found, de-duplicated by principal id in discovery order
    pub groups: Vec<Group>,
    /// Object id of the principal that was resolved
    pub principal_object_id: Option<String>,
}

impl PrincipalGroupLookupInfo {
    pub fn contains(&self, id: &PrincipalId) -> bool {
        self.groups.iter().any(|g| &g.id == id)
    }

    /// Group names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.iter().map(|g| g.id.name.clone()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_principal_forms() {
        let upn = PrincipalId::parse("jdoe@Acme.Local", "other").unwrap();
        assert_eq!(upn, PrincipalId::new("jdoe", "acme.local"));

        let netbios = PrincipalId::parse("ACME\\jdoe", "other").unwrap();
        assert_eq!(netbios.name, "jdoe");
        assert_eq!(netbios.domain, "ACME");

        let bare = PrincipalId::parse("jdoe", "acme.local").unwrap();
        assert_eq!(bare.upn(), "jdoe@acme.local");

        assert!(PrincipalId::parse("", "acme.local").is_err());
        assert!(PrincipalId::parse("@acme.local", "acme.local").is_err());
    }

    #[test]
    fn test_domain_comparison_is_case_insensitive() {
        let mut set = HashSet::new();
        set.insert(PrincipalId::new("jdoe", "ACME.LOCAL"));
        assert!(set.contains(&PrincipalId::new("jdoe", "acme.local")));
        assert!(!set.contains(&PrincipalId::new("JDOE", "acme.local")));
    }

    #[test]
    fn test_account_control_bits() {
        assert!(account_control::is_disabled(0x202));
        assert!(!account_control::is_locked(0x202));
        assert!(account_control::is_locked(0x10));
        assert!(!account_control::is_disabled(account_control::DONT_EXPIRE_PASSWORD));
    }

    #[test]
    fn test_lookup_info_names() {
        let info = PrincipalGroupLookupInfo {
            groups: vec![
                Group {
                    id: PrincipalId::new("b", "acme"),
                    alias: None,
                    object_id: None,
                    detail: None,
                },
                Group {
                    id: PrincipalId::new("a", "acme"),
                    alias: None,
                    object_id: None,
                    detail: None,
                },
            ],
            principal_object_id: None,
        };
        assert_eq!(info.names(), vec!["a", "b"]);
        assert!(info.contains(&PrincipalId::new("a", "ACME")));
    }
}
