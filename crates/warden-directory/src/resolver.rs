//! Group membership resolution
//!
//! Direct parents are one search. Nested parents are either a single
//! matching-rule-in-chain search or a breadth-first walk over direct-parent
//! searches with a visited set, so membership cycles terminate.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};
use warden_core::config::store_flags;
use warden_core::types::{AttributeId, Group, PersonUser, PrincipalGroupLookupInfo, PrincipalId};
use warden_core::{Error, Result};

use crate::connection::{DirectoryEntry, SearchScope};
use crate::metrics;
use crate::pool::{BoxedConnection, ConnectionPoolManager};
use crate::schema::{LinkAttribute, QueryKind};
use crate::store::{PrincipalEntry, PrincipalKind, StoreContext};

/// Guard against servers that keep answering with empty range chunks
const MAX_RANGE_PAGES: usize = 1024;

fn key(value: &str) -> String {
    value
        .split(',')
        .map(|rdn| rdn.trim().to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

fn as_refs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

/// What a member search is looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemberKind {
    User,
    Group,
}

impl MemberKind {
    fn by_name(&self) -> QueryKind {
        match self {
            MemberKind::User => QueryKind::UserByCriteriaForName,
            MemberKind::Group => QueryKind::GroupByCriteriaForName,
        }
    }

    fn by_criteria(&self) -> QueryKind {
        match self {
            MemberKind::User => QueryKind::UserByCriteria,
            MemberKind::Group => QueryKind::GroupByCriteria,
        }
    }

    fn all(&self) -> QueryKind {
        match self {
            MemberKind::User => QueryKind::AllUsers,
            MemberKind::Group => QueryKind::AllGroups,
        }
    }

    fn by_link(&self) -> QueryKind {
        match self {
            MemberKind::User => QueryKind::UserByLinkAttribute,
            MemberKind::Group => QueryKind::GroupByLinkAttribute,
        }
    }

    fn link_id(&self) -> AttributeId {
        match self {
            MemberKind::User => AttributeId::UserGroupMembersListLink,
            MemberKind::Group => AttributeId::GroupGroupMembersListLink,
        }
    }
}

/// How member names are matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameMatch {
    /// Prefix on the name attributes
    Prefix,
    /// Prefix or substring, unioned
    Search,
}

pub struct GroupResolver {
    ctx: Arc<StoreContext>,
    pools: Arc<ConnectionPoolManager>,
}

impl GroupResolver {
    pub fn new(ctx: Arc<StoreContext>, pools: Arc<ConnectionPoolManager>) -> Self {
        Self { ctx, pools }
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    pub async fn find_direct_parent_groups(&self, principal: &PrincipalId) -> Result<PrincipalGroupLookupInfo> {
        let mut pooled = self.pools.borrow_connection(self.ctx.identity()).await?;
        let result = {
            let conn = pooled.connection()?;
            match self.lookup_principal(conn, principal).await {
                Ok(found) => self.direct_parent_groups(conn, &found).await,
                Err(e) => Err(e),
            }
        };
        self.pools.return_with(&mut pooled, result)
    }

    pub async fn find_nested_parent_groups(&self, principal: &PrincipalId) -> Result<PrincipalGroupLookupInfo> {
        let mut pooled = self.pools.borrow_connection(self.ctx.identity()).await?;
        let result = {
            let conn = pooled.connection()?;
            match self.lookup_principal(conn, principal).await {
                Ok(found) => self.nested_parent_groups(conn, &found).await,
                Err(e) => Err(e),
            }
        };
        self.pools.return_with(&mut pooled, result)
    }

    pub async fn find_users_in_group(
        &self,
        group: &PrincipalId,
        name_prefix: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PersonUser>> {
        let entries = self
            .members(group, MemberKind::User, name_prefix, NameMatch::Prefix, limit)
            .await?;
        Ok(self.users(entries, limit))
    }

    pub async fn find_groups_in_group(
        &self,
        group: &PrincipalId,
        name_prefix: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Group>> {
        let entries = self
            .members(group, MemberKind::Group, name_prefix, NameMatch::Prefix, limit)
            .await?;
        Ok(self.groups(entries, limit))
    }

    pub async fn find_users_by_name_in_group(
        &self,
        group: &PrincipalId,
        search: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PersonUser>> {
        let entries = self
            .members(group, MemberKind::User, search, NameMatch::Search, limit)
            .await?;
        Ok(self.users(entries, limit))
    }

    pub async fn find_groups_by_name_in_group(
        &self,
        group: &PrincipalId,
        search: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Group>> {
        let entries = self
            .members(group, MemberKind::Group, search, NameMatch::Search, limit)
            .await?;
        Ok(self.groups(entries, limit))
    }

    // ========================================================================
    // Lookups on a borrowed connection
    // ========================================================================

    async fn search(
        &self,
        conn: &mut BoxedConnection,
        base: &str,
        scope: SearchScope,
        filter: &str,
        attrs: &[String],
    ) -> Result<Vec<DirectoryEntry>> {
        metrics::record_search(self.ctx.schema().flavor_name());
        conn.search(base, scope, filter, &as_refs(attrs)).await
    }

    /// Find a principal as a user first, then as a group
    pub(crate) async fn lookup_principal(
        &self,
        conn: &mut BoxedConnection,
        principal: &PrincipalId,
    ) -> Result<PrincipalEntry> {
        if let Some(entry) = self.lookup_user(conn, principal).await? {
            return Ok(PrincipalEntry {
                kind: PrincipalKind::User,
                entry,
            });
        }
        if let Some(entry) = self.lookup_group(conn, principal).await? {
            return Ok(PrincipalEntry {
                kind: PrincipalKind::Group,
                entry,
            });
        }
        Err(Error::InvalidPrincipal(principal.to_string()))
    }

    pub(crate) async fn lookup_user(
        &self,
        conn: &mut BoxedConnection,
        principal: &PrincipalId,
    ) -> Result<Option<DirectoryEntry>> {
        self.lookup_user_with(conn, principal, &[]).await
    }

    /// User lookup that also fetches `extra` backend attributes
    pub(crate) async fn lookup_user_with(
        &self,
        conn: &mut BoxedConnection,
        principal: &PrincipalId,
        extra: &[String],
    ) -> Result<Option<DirectoryEntry>> {
        let filter = self
            .ctx
            .schema()
            .render(QueryKind::UserByAccountName, &[&principal.name])?;
        let mut attrs = self.ctx.user_attributes();
        for attr in extra {
            if !attrs.iter().any(|a| a.eq_ignore_ascii_case(attr)) {
                attrs.push(attr.clone());
            }
        }
        let entries = self
            .search(conn, &self.ctx.config().user_base_dn, SearchScope::Subtree, &filter, &attrs)
            .await?;
        single(entries, principal)
    }

    pub(crate) async fn lookup_group(
        &self,
        conn: &mut BoxedConnection,
        principal: &PrincipalId,
    ) -> Result<Option<DirectoryEntry>> {
        let filter = self
            .ctx
            .schema()
            .render(QueryKind::GroupByAccountName, &[&principal.name])?;
        let attrs = self.ctx.group_attributes_with_members();
        let entries = self
            .search(conn, &self.ctx.config().group_base_dn, SearchScope::Subtree, &filter, &attrs)
            .await?;
        single(entries, principal)
    }

    async fn parents_of(
        &self,
        conn: &mut BoxedConnection,
        base: &str,
        membership_id: &str,
    ) -> Result<Vec<DirectoryEntry>> {
        let filter = self
            .ctx
            .schema()
            .render(QueryKind::DirectParentGroups, &[membership_id])?;
        let attrs = self.ctx.group_attributes();
        self.search(conn, base, SearchScope::Subtree, &filter, &attrs)
            .await
    }

    pub(crate) async fn direct_parent_groups(
        &self,
        conn: &mut BoxedConnection,
        principal: &PrincipalEntry,
    ) -> Result<PrincipalGroupLookupInfo> {
        let mut info = self.lookup_info(principal);
        let Some(id) = self.ctx.membership_id(principal) else {
            return Ok(info);
        };

        let base = self.ctx.config().group_base_dn.clone();
        let entries = self.parents_of(conn, &base, &id).await?;
        let mut seen = HashSet::new();
        for entry in entries {
            if let Some(group) = self.ctx.group_from_entry(&entry) {
                if seen.insert(group.id.clone()) {
                    info.groups.push(group);
                }
            }
        }
        Ok(info)
    }

    pub(crate) async fn nested_parent_groups(
        &self,
        conn: &mut BoxedConnection,
        principal: &PrincipalEntry,
    ) -> Result<PrincipalGroupLookupInfo> {
        let store = self.ctx.config();
        if store.has_flag(store_flags::FLAG_DIRECT_GROUPS_ONLY) {
            return self.direct_parent_groups(conn, principal).await;
        }

        let mut info = self.lookup_info(principal);
        let Some(start) = self.ctx.membership_id(principal) else {
            return Ok(info);
        };

        let base = if store.has_flag(store_flags::FLAG_DO_NOT_USE_BASE_DN_FOR_NESTED_GROUPS) {
            store.domain_dn()
        } else {
            store.group_base_dn.clone()
        };

        if store.has_flag(store_flags::FLAG_AD_MATCHING_RULE_IN_CHAIN) {
            if self.ctx.schema().supports(QueryKind::NestedParentGroups) {
                let filter = self
                    .ctx
                    .schema()
                    .render(QueryKind::NestedParentGroups, &[&start])?;
                let attrs = self.ctx.group_attributes();
                let entries = self
                    .search(conn, &base, SearchScope::Subtree, &filter, &attrs)
                    .await?;
                let mut seen = HashSet::new();
                info.groups = entries
                    .iter()
                    .filter_map(|e| self.ctx.group_from_entry(e))
                    .filter(|g| seen.insert(g.id.clone()))
                    .collect();
                return Ok(info);
            }
            warn!(
                "Matching rule in chain requested for {} but the {} schema has no such query; expanding recursively",
                self.ctx.domain(),
                self.ctx.schema().flavor_name()
            );
        }

        info.groups = self.expand_parents(conn, &base, start).await?;
        Ok(info)
    }

    /// Breadth-first walk over direct-parent searches
    async fn expand_parents(
        &self,
        conn: &mut BoxedConnection,
        base: &str,
        start: String,
    ) -> Result<Vec<Group>> {
        let mut groups = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(member) = queue.pop_front() {
            for entry in self.parents_of(conn, base, &member).await? {
                let Some(group) = self.ctx.group_from_entry(&entry) else {
                    continue;
                };
                let found = PrincipalEntry {
                    kind: PrincipalKind::Group,
                    entry,
                };
                let next = self.ctx.membership_id(&found);
                if !visited.insert(key(next.as_deref().unwrap_or(&found.entry.dn))) {
                    continue;
                }
                groups.push(group);
                if let Some(next) = next {
                    queue.push_back(next);
                }
            }
        }

        debug!("Expanded {} nested groups under {}", groups.len(), base);
        Ok(groups)
    }

    fn lookup_info(&self, principal: &PrincipalEntry) -> PrincipalGroupLookupInfo {
        let object_id = match principal.kind {
            PrincipalKind::User => AttributeId::UserObjectId,
            PrincipalKind::Group => AttributeId::GroupObjectId,
        };
        PrincipalGroupLookupInfo {
            groups: Vec::new(),
            principal_object_id: self
                .ctx
                .schema()
                .attribute(object_id)
                .and_then(|attr| principal.entry.first(attr))
                .map(str::to_string),
        }
    }

    // ========================================================================
    // Members
    // ========================================================================

    async fn members(
        &self,
        group: &PrincipalId,
        kind: MemberKind,
        name: &str,
        matching: NameMatch,
        limit: Option<usize>,
    ) -> Result<Vec<DirectoryEntry>> {
        if limit == Some(0) {
            return Ok(Vec::new());
        }

        let mut pooled = self.pools.borrow_connection(self.ctx.identity()).await?;
        let result = {
            let conn = pooled.connection()?;
            self.members_on(conn, group, kind, name, matching, limit).await
        };
        self.pools.return_with(&mut pooled, result)
    }

    async fn members_on(
        &self,
        conn: &mut BoxedConnection,
        group: &PrincipalId,
        kind: MemberKind,
        name: &str,
        matching: NameMatch,
        limit: Option<usize>,
    ) -> Result<Vec<DirectoryEntry>> {
        let group_entry = self
            .lookup_group(conn, group)
            .await?
            .ok_or_else(|| Error::InvalidPrincipal(group.to_string()))?;

        let criteria = self.member_filter(kind, name, matching)?;
        let values = self.member_values(conn, &group_entry).await?;
        let attrs = match kind {
            MemberKind::User => self.ctx.user_attributes(),
            MemberKind::Group => self.ctx.group_attributes(),
        };

        let mut found = Vec::new();
        let mut seen = HashSet::new();
        for value in values {
            if limit.map(|l| found.len() >= l).unwrap_or(false) {
                break;
            }
            let entries = match self.ctx.schema().link(kind.link_id()) {
                Some(LinkAttribute::ByDn) => {
                    self.search(conn, &value, SearchScope::Base, &criteria, &attrs)
                        .await?
                }
                Some(LinkAttribute::ByIdentifier(_)) => {
                    let link = self.ctx.schema().render(kind.by_link(), &[&value])?;
                    let filter = format!("(&{}{})", link, criteria);
                    let base = match kind {
                        MemberKind::User => &self.ctx.config().user_base_dn,
                        MemberKind::Group => &self.ctx.config().group_base_dn,
                    };
                    self.search(conn, base, SearchScope::Subtree, &filter, &attrs)
                        .await?
                }
                None => return Ok(Vec::new()),
            };
            for entry in entries {
                if seen.insert(key(&entry.dn)) {
                    found.push(entry);
                }
            }
        }
        Ok(found)
    }

    /// Filter a resolved member must also satisfy
    fn member_filter(&self, kind: MemberKind, name: &str, matching: NameMatch) -> Result<String> {
        let schema = self.ctx.schema();
        if name.is_empty() {
            return schema.render(kind.all(), &[]);
        }
        let prefix = schema.render(kind.by_name(), &[name])?;
        match matching {
            NameMatch::Prefix => Ok(prefix),
            NameMatch::Search => {
                let substring = schema.render(kind.by_criteria(), &[name])?;
                Ok(format!("(|{}{})", prefix, substring))
            }
        }
    }

    /// All member values of a group, following ranged retrieval
    async fn member_values(
        &self,
        conn: &mut BoxedConnection,
        group: &DirectoryEntry,
    ) -> Result<Vec<String>> {
        let attr = self
            .ctx
            .schema()
            .require_attribute(AttributeId::GroupMembersList)?
            .to_string();

        let mut values = group.values(&attr).to_vec();
        let mut next = group.ranged(&attr).and_then(|chunk| {
            values.extend(chunk.values.iter().cloned());
            chunk.end.map(|end| end + 1)
        });

        let mut pages = 0;
        while let Some(start) = next {
            pages += 1;
            if pages > MAX_RANGE_PAGES {
                warn!("Giving up on ranged retrieval of {} for {}", attr, group.dn);
                break;
            }

            let request = vec![format!("{};range={}-*", attr, start)];
            let entries = self
                .search(conn, &group.dn, SearchScope::Base, "(objectClass=*)", &request)
                .await?;
            let Some(entry) = entries.first() else {
                break;
            };
            next = match entry.ranged(&attr) {
                Some(chunk) => {
                    values.extend(chunk.values.iter().cloned());
                    chunk.end.map(|end| end + 1)
                }
                None => {
                    values.extend(entry.values(&attr).iter().cloned());
                    None
                }
            };
        }

        Ok(values)
    }

    fn users(&self, entries: Vec<DirectoryEntry>, limit: Option<usize>) -> Vec<PersonUser> {
        let mut seen = HashSet::new();
        entries
            .iter()
            .filter_map(|e| self.ctx.user_from_entry(e))
            .filter(|u| seen.insert(u.id.clone()))
            .take(limit.unwrap_or(usize::MAX))
            .collect()
    }

    fn groups(&self, entries: Vec<DirectoryEntry>, limit: Option<usize>) -> Vec<Group> {
        let mut seen = HashSet::new();
        entries
            .iter()
            .filter_map(|e| self.ctx.group_from_entry(e))
            .filter(|g| seen.insert(g.id.clone()))
            .take(limit.unwrap_or(usize::MAX))
            .collect()
    }
}

fn single(mut entries: Vec<DirectoryEntry>, principal: &PrincipalId) -> Result<Option<DirectoryEntry>> {
    match entries.len() {
        0 => Ok(None),
        1 => Ok(entries.pop()),
        n => Err(Error::InvalidPrincipal(format!(
            "{} matches {} directory entries",
            principal, n
        ))),
    }
}
