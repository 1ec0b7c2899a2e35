//! Directory connection abstraction
//!
//! The pool, resolver and provider only talk to these traits. The ldap3
//! backend lives in [`crate::ldap`], an in-process model in [`crate::memory`].

use std::collections::HashMap;

use async_trait::async_trait;
use warden_core::Result;

use crate::pool::ConnectionIdentity;

/// LDAP search scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    Base,
    OneLevel,
    Subtree,
}

/// One search result entry
///
/// Attribute names are matched case-insensitively, as LDAP does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
}

/// A ranged attribute chunk, e.g. `member;range=0-1499`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangedValues<'a> {
    pub start: usize,
    /// `None` when the server marked this chunk as the last one (`*`)
    pub end: Option<usize>,
    pub values: &'a [String],
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
        }
    }

    pub fn with(mut self, attr: &str, values: &[&str]) -> Self {
        self.attrs.insert(
            attr.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn values(&self, attr: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn first(&self, attr: &str) -> Option<&str> {
        self.values(attr).first().map(String::as_str)
    }

    pub fn has_attribute(&self, attr: &str) -> bool {
        self.attrs.keys().any(|name| name.eq_ignore_ascii_case(attr))
    }

    /// Ranged chunk of `attr`, if the server returned one
    pub fn ranged(&self, attr: &str) -> Option<RangedValues<'_>> {
        self.attrs.iter().find_map(|(name, values)| {
            let (base, option) = name.split_once(';')?;
            if !base.eq_ignore_ascii_case(attr) {
                return None;
            }
            let range = option
                .strip_prefix("range=")
                .or_else(|| option.strip_prefix("Range="))?;
            let (start, end) = range.split_once('-')?;
            let start = start.parse().ok()?;
            let end = if end == "*" {
                None
            } else {
                Some(end.parse().ok()?)
            };
            Some(RangedValues { start, end, values })
        })
    }
}

/// A live, possibly bound, directory connection
#[async_trait]
pub trait DirectoryConnection: Send {
    /// URI this connection was opened against
    fn uri(&self) -> &str;

    /// Simple bind; bad credentials surface as [`warden_core::Error::LoginFailed`]
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()>;

    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>>;

    /// Best-effort close
    async fn close(&mut self);
}

/// Opens connections to a single URI on behalf of an identity
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        uri: &str,
        identity: &ConnectionIdentity,
    ) -> Result<Box<dyn DirectoryConnection>>;
}
