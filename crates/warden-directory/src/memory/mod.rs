//! In-process directory
//!
//! A small LDAP model that evaluates real search filters, including the AD
//! transitive matching rule and ranged attribute retrieval. Used by tests.

pub mod filter;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;
use warden_core::{Error, Result};

use crate::connection::{Connector, DirectoryConnection, DirectoryEntry, SearchScope};
use crate::pool::ConnectionIdentity;
use filter::Filter;

/// OID of LDAP_MATCHING_RULE_IN_CHAIN
pub const MATCHING_RULE_IN_CHAIN: &str = "1.2.840.113556.1.4.1941";

const PASSWORD_ATTR: &str = "userPassword";

fn dn_key(dn: &str) -> String {
    dn.split(',')
        .map(|rdn| rdn.trim().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Default)]
struct Inner {
    entries: RwLock<BTreeMap<String, DirectoryEntry>>,
    unreachable: RwLock<HashSet<String>>,
    max_values: RwLock<Option<usize>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    searches: AtomicUsize,
}

/// Shared in-memory directory; clones see the same data
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Inner>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entry(&self, entry: DirectoryEntry) {
        self.inner.entries.write().insert(dn_key(&entry.dn), entry);
    }

    pub fn remove_entry(&self, dn: &str) -> Option<DirectoryEntry> {
        self.inner.entries.write().remove(&dn_key(dn))
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse connections to `uri`
    pub fn set_unreachable(&self, uri: &str) {
        self.inner.unreachable.write().insert(uri.to_string());
    }

    /// Return multi-valued attributes in chunks of `max`, like AD's MaxValRange
    pub fn set_max_values_per_attribute(&self, max: Option<usize>) {
        *self.inner.max_values.write() = max;
    }

    pub fn connections_opened(&self) -> usize {
        self.inner.opened.load(Ordering::Relaxed)
    }

    pub fn connections_closed(&self) -> usize {
        self.inner.closed.load(Ordering::Relaxed)
    }

    pub fn searches_performed(&self) -> usize {
        self.inner.searches.load(Ordering::Relaxed)
    }

    fn find_bind_entry(&self, dn: &str) -> Option<DirectoryEntry> {
        let entries = self.inner.entries.read();
        if let Some(entry) = entries.get(&dn_key(dn)) {
            return Some(entry.clone());
        }
        // AD also accepts a UPN as the bind name
        entries
            .values()
            .find(|e| {
                e.first("userPrincipalName")
                    .map(|upn| upn.eq_ignore_ascii_case(dn))
                    .unwrap_or(false)
            })
            .cloned()
    }

    fn search_entries(
        &self,
        base: &str,
        scope: SearchScope,
        filter: &Filter,
        attrs: &[&str],
    ) -> Vec<DirectoryEntry> {
        self.inner.searches.fetch_add(1, Ordering::Relaxed);
        let entries = self.inner.entries.read();
        let base = dn_key(base);
        let max_values = *self.inner.max_values.read();

        entries
            .iter()
            .filter(|(key, _)| in_scope(key, &base, scope))
            .filter(|(_, entry)| evaluate(&entries, entry, filter))
            .map(|(_, entry)| project(entry, attrs, max_values))
            .collect()
    }
}

fn in_scope(key: &str, base: &str, scope: SearchScope) -> bool {
    match scope {
        SearchScope::Base => key == base,
        SearchScope::OneLevel => key
            .split_once(',')
            .map(|(_, parent)| parent == base)
            .unwrap_or(false),
        SearchScope::Subtree => {
            base.is_empty() || key == base || key.ends_with(&format!(",{}", base))
        }
    }
}

// ============================================================================
// Filter evaluation
// ============================================================================

fn evaluate(all: &BTreeMap<String, DirectoryEntry>, entry: &DirectoryEntry, filter: &Filter) -> bool {
    match filter {
        Filter::And(filters) => filters.iter().all(|f| evaluate(all, entry, f)),
        Filter::Or(filters) => filters.iter().any(|f| evaluate(all, entry, f)),
        Filter::Not(inner) => !evaluate(all, entry, inner),
        Filter::Equal(attr, value) | Filter::Approx(attr, value) => entry
            .values(attr)
            .iter()
            .any(|v| values_equal(v, value)),
        Filter::GreaterOrEqual(attr, value) => entry
            .values(attr)
            .iter()
            .any(|v| compare(v, value) != std::cmp::Ordering::Less),
        Filter::LessOrEqual(attr, value) => entry
            .values(attr)
            .iter()
            .any(|v| compare(v, value) != std::cmp::Ordering::Greater),
        Filter::Present(attr) => entry.has_attribute(attr),
        Filter::Substring {
            attr,
            initial,
            any,
            last,
        } => entry
            .values(attr)
            .iter()
            .any(|v| substring_match(v, initial.as_deref(), any, last.as_deref())),
        Filter::Extensible { attr, rule, value } => match rule.as_deref() {
            Some(MATCHING_RULE_IN_CHAIN) => in_chain(all, entry, attr, value),
            None => entry.values(attr).iter().any(|v| values_equal(v, value)),
            Some(_) => false,
        },
    }
}

fn values_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b) || (a.contains('=') && dn_key(a) == dn_key(b))
}

fn compare(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()),
    }
}

fn substring_match(value: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let value = value.to_lowercase();
    let mut rest = value.as_str();

    if let Some(initial) = initial {
        let initial = initial.to_lowercase();
        match rest.strip_prefix(initial.as_str()) {
            Some(r) => rest = r,
            None => return false,
        }
    }
    for part in any {
        let part = part.to_lowercase();
        match rest.find(part.as_str()) {
            Some(i) => rest = &rest[i + part.len()..],
            None => return false,
        }
    }
    match last {
        Some(last) => rest.ends_with(last.to_lowercase().as_str()),
        None => true,
    }
}

/// Does `entry` reach `target` by following `attr` DN links transitively?
fn in_chain(all: &BTreeMap<String, DirectoryEntry>, entry: &DirectoryEntry, attr: &str, target: &str) -> bool {
    let target = dn_key(target);
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    visited.insert(dn_key(&entry.dn));
    queue.push_back(entry);

    while let Some(current) = queue.pop_front() {
        for value in current.values(attr) {
            let key = dn_key(value);
            if key == target {
                return true;
            }
            if visited.insert(key.clone()) {
                if let Some(next) = all.get(&key) {
                    queue.push_back(next);
                }
            }
        }
    }
    false
}

// ============================================================================
// Attribute projection
// ============================================================================

fn project(entry: &DirectoryEntry, attrs: &[&str], max_values: Option<usize>) -> DirectoryEntry {
    let all = attrs.is_empty() || attrs.contains(&"*");
    let mut out = DirectoryEntry::new(entry.dn.clone());

    for (name, values) in &entry.attrs {
        if name.eq_ignore_ascii_case(PASSWORD_ATTR) {
            continue;
        }

        let requested_range = attrs.iter().find_map(|a| {
            let (base, option) = a.split_once(';')?;
            if !base.eq_ignore_ascii_case(name) {
                return None;
            }
            let (start, _) = option.strip_prefix("range=")?.split_once('-')?;
            start.parse::<usize>().ok()
        });
        let plain = all || attrs.iter().any(|a| a.eq_ignore_ascii_case(name));

        let start = match (requested_range, plain) {
            (Some(start), _) => start,
            (None, true) => 0,
            (None, false) => continue,
        };

        match max_values {
            Some(max) if max > 0 && (values.len() > max || requested_range.is_some()) => {
                let start = start.min(values.len());
                let end = (start + max).min(values.len());
                let tag = if end >= values.len() {
                    format!("{};range={}-*", name, start)
                } else {
                    format!("{};range={}-{}", name, start, end - 1)
                };
                out.attrs.insert(tag, values[start..end].to_vec());
            }
            _ => {
                out.attrs.insert(name.clone(), values[start.min(values.len())..].to_vec());
            }
        }
    }

    out
}

// ============================================================================
// Connector
// ============================================================================

pub struct MemoryConnection {
    directory: MemoryDirectory,
    uri: String,
    bound_dn: Option<String>,
    closed: bool,
}

impl MemoryConnection {
    pub fn bound_dn(&self) -> Option<&str> {
        self.bound_dn.as_deref()
    }
}

#[async_trait]
impl DirectoryConnection for MemoryConnection {
    fn uri(&self) -> &str {
        &self.uri
    }

    async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
        if self.closed {
            return Err(Error::Directory("connection closed".into()));
        }
        let entry = self.directory.find_bind_entry(dn).ok_or(Error::LoginFailed)?;
        let ok = !password.is_empty() && entry.first(PASSWORD_ATTR) == Some(password);
        if !ok {
            return Err(Error::LoginFailed);
        }
        self.bound_dn = Some(entry.dn);
        Ok(())
    }

    async fn search(
        &mut self,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>> {
        if self.closed {
            return Err(Error::Directory("connection closed".into()));
        }
        let parsed = filter::parse(filter)?;
        let results = self.directory.search_entries(base, scope, &parsed, attrs);
        debug!("memory search base={} filter={} -> {} entries", base, filter, results.len());
        Ok(results)
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.directory.inner.closed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl Connector for MemoryDirectory {
    async fn connect(
        &self,
        uri: &str,
        _identity: &ConnectionIdentity,
    ) -> Result<Box<dyn DirectoryConnection>> {
        if self.inner.unreachable.read().contains(uri) {
            return Err(Error::Directory(format!("{} is unreachable", uri)));
        }
        self.inner.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryConnection {
            directory: self.clone(),
            uri: uri.to_string(),
            bound_dn: None,
            closed: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryDirectory {
        let dir = MemoryDirectory::new();
        dir.add_entry(
            DirectoryEntry::new("CN=Jane Doe,CN=Users,DC=corp,DC=local")
                .with("objectClass", &["top", "user"])
                .with("sAMAccountName", &["jdoe"])
                .with("userPrincipalName", &["jdoe@corp.local"])
                .with("userPassword", &["pw"]),
        );
        dir.add_entry(
            DirectoryEntry::new("CN=G1,CN=Groups,DC=corp,DC=local")
                .with("objectClass", &["group"])
                .with("member", &["CN=Jane Doe,CN=Users,DC=corp,DC=local"]),
        );
        dir.add_entry(
            DirectoryEntry::new("CN=G2,CN=Groups,DC=corp,DC=local")
                .with("objectClass", &["group"])
                .with("member", &["CN=G1,CN=Groups,DC=corp,DC=local"]),
        );
        dir
    }

    async fn open(dir: &MemoryDirectory) -> Box<dyn DirectoryConnection> {
        let id = ConnectionIdentity::builder("corp")
            .uri("ldap://memory")
            .build()
            .unwrap();
        dir.connect("ldap://memory", &id).await.unwrap()
    }

    #[tokio::test]
    async fn test_search_scopes() {
        let dir = sample();
        let mut conn = open(&dir).await;

        let all = conn
            .search("DC=corp,DC=local", SearchScope::Subtree, "(objectClass=*)", &[])
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let groups = conn
            .search("cn=groups,dc=corp,dc=local", SearchScope::OneLevel, "(objectClass=group)", &[])
            .await
            .unwrap();
        assert_eq!(groups.len(), 2);

        let base = conn
            .search("CN=G1,CN=Groups,DC=corp,DC=local", SearchScope::Base, "(objectClass=*)", &["member"])
            .await
            .unwrap();
        assert_eq!(base.len(), 1);
        assert!(!base[0].has_attribute("objectClass"));
    }

    #[tokio::test]
    async fn test_password_is_never_returned() {
        let dir = sample();
        let mut conn = open(&dir).await;
        let users = conn
            .search("DC=corp,DC=local", SearchScope::Subtree, "(sAMAccountName=JDOE)", &["*"])
            .await
            .unwrap();
        assert_eq!(users.len(), 1);
        assert!(users[0].first("userPassword").is_none());
    }

    #[tokio::test]
    async fn test_bind() {
        let dir = sample();
        let mut conn = open(&dir).await;
        assert!(matches!(conn.bind("jdoe@corp.local", "bad").await, Err(Error::LoginFailed)));
        assert!(matches!(conn.bind("CN=nobody", "pw").await, Err(Error::LoginFailed)));
        conn.bind("cn=jane doe,cn=users,dc=corp,dc=local", "pw").await.unwrap();
        conn.bind("jdoe@corp.local", "pw").await.unwrap();
    }

    #[tokio::test]
    async fn test_transitive_matching_rule() {
        let dir = sample();
        let mut conn = open(&dir).await;
        let filter = format!(
            "(&(objectClass=group)(member:{}:=CN=Jane Doe,CN=Users,DC=corp,DC=local))",
            MATCHING_RULE_IN_CHAIN
        );
        let groups = conn
            .search("DC=corp,DC=local", SearchScope::Subtree, &filter, &["cn"])
            .await
            .unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[tokio::test]
    async fn test_ranged_values() {
        let dir = sample();
        dir.add_entry(
            DirectoryEntry::new("CN=Big,DC=corp,DC=local")
                .with("objectClass", &["group"])
                .with("member", &["a", "b", "c", "d", "e"]),
        );
        dir.set_max_values_per_attribute(Some(2));
        let mut conn = open(&dir).await;

        let first = conn
            .search("CN=Big,DC=corp,DC=local", SearchScope::Base, "(objectClass=*)", &["member"])
            .await
            .unwrap();
        let chunk = first[0].ranged("member").unwrap();
        assert_eq!((chunk.start, chunk.end), (0, Some(1)));

        let last = conn
            .search("CN=Big,DC=corp,DC=local", SearchScope::Base, "(objectClass=*)", &["member;range=4-*"])
            .await
            .unwrap();
        let chunk = last[0].ranged("member").unwrap();
        assert_eq!(chunk.end, None);
        assert_eq!(chunk.values, &["e".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_uri() {
        let dir = sample();
        dir.set_unreachable("ldap://down");
        let id = ConnectionIdentity::builder("corp").uri("ldap://down").build().unwrap();
        assert!(dir.connect("ldap://down", &id).await.is_err());
        assert_eq!(dir.connections_opened(), 0);
    }
}
