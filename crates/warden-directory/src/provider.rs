//! Identity provider facade
//!
//! One [`IdentityProvider`] serves one identity store. It authenticates
//! users, looks up users and groups and answers attribute queries, borrowing
//! service connections from the shared [`ConnectionPoolManager`].
//! [`TenantDirectory`] groups the providers of every tenant.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};
use warden_core::config::{IdentityStoreConfig, ProviderKind, TenantConfig};
use warden_core::types::{AttributeId, Group, PersonUser, PrincipalGroupLookupInfo, PrincipalId};
use warden_core::{normalize_tenant, Error, Result};

use crate::connection::{DirectoryEntry, SearchScope};
use crate::metrics;
use crate::pool::{BoxedConnection, ConnectionPoolManager};
use crate::resolver::GroupResolver;
use crate::schema::{is_valid_attribute_name, QueryKind, SchemaMapping};
use crate::store::{PrincipalEntry, PrincipalKind, StoreContext};

/// Claim names with a default mapping
pub mod claims {
    pub const GROUP_IDENTITY: &str = "http://rsa.com/schemas/attr-names/2009/01/GroupIdentity";
    pub const UPN: &str = "http://schemas.xmlsoap.org/claims/UPN";
    pub const IS_SOLUTION: &str = "http://vmware.com/schemas/attr-names/2011/07/isSolution";
    pub const EMAIL: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
    pub const GIVEN_NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname";
    pub const SURNAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname";
}

/// Mapped values computed by the provider instead of read from an entry
mod special {
    pub const MEMBER_OF: &str = "memberOf";
    pub const USER_PRINCIPAL_NAME: &str = "userPrincipalName";
    pub const SUBJECT_TYPE: &str = "subjectType";

    pub fn is_special(mapped: &str) -> bool {
        [MEMBER_OF, USER_PRINCIPAL_NAME, SUBJECT_TYPE]
            .iter()
            .any(|s| s.eq_ignore_ascii_case(mapped))
    }
}

const CONFIG_NAMING_CONTEXT: &str = "configurationNamingContext";
const UPN_SUFFIXES: &str = "uPNSuffixes";

/// How long registered UPN suffixes are served before the forest is read again
pub const UPN_SUFFIX_REFRESH: Duration = Duration::from_secs(6 * 60 * 60);

/// Values of one requested attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeValues {
    pub name: String,
    pub values: Vec<String>,
}

/// Claim mappings every store starts with; configured entries replace them
pub fn default_attribute_map(schema: &SchemaMapping) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert(claims::GROUP_IDENTITY.to_string(), special::MEMBER_OF.to_string());
    map.insert(claims::UPN.to_string(), special::USER_PRINCIPAL_NAME.to_string());
    map.insert(claims::IS_SOLUTION.to_string(), special::SUBJECT_TYPE.to_string());

    let plain = [
        (claims::EMAIL, AttributeId::UserEmail),
        (claims::GIVEN_NAME, AttributeId::UserFirstName),
        (claims::SURNAME, AttributeId::UserLastName),
    ];
    for (claim, id) in plain {
        if let Some(attr) = schema.attribute(id) {
            map.insert(claim.to_string(), attr.to_string());
        }
    }
    map
}

// ============================================================================
// Identity provider
// ============================================================================

pub struct IdentityProvider {
    ctx: Arc<StoreContext>,
    pools: Arc<ConnectionPoolManager>,
    resolver: GroupResolver,
    attribute_map: BTreeMap<String, String>,
    upn_suffixes: Mutex<Option<(Instant, BTreeSet<String>)>>,
}

impl IdentityProvider {
    pub fn new(ctx: Arc<StoreContext>, pools: Arc<ConnectionPoolManager>) -> Self {
        let mut attribute_map = default_attribute_map(ctx.schema());
        attribute_map.extend(
            ctx.config()
                .attribute_map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Self {
            resolver: GroupResolver::new(ctx.clone(), pools.clone()),
            ctx,
            pools,
            attribute_map,
            upn_suffixes: Mutex::new(None),
        }
    }

    pub fn for_store(
        tenant: &str,
        config: IdentityStoreConfig,
        pools: Arc<ConnectionPoolManager>,
    ) -> Result<Self> {
        let ctx = StoreContext::new(tenant, config)?;
        Ok(Self::new(Arc::new(ctx), pools))
    }

    pub fn context(&self) -> &StoreContext {
        &self.ctx
    }

    pub fn resolver(&self) -> &GroupResolver {
        &self.resolver
    }

    pub fn domain(&self) -> &str {
        self.ctx.domain()
    }

    fn check_domain(&self, principal: &PrincipalId) -> Result<()> {
        if self.ctx.serves(&principal.domain) {
            Ok(())
        } else {
            Err(Error::InvalidPrincipal(format!(
                "{} is not served by identity store {}",
                principal,
                self.ctx.domain()
            )))
        }
    }

    async fn search(
        &self,
        conn: &mut BoxedConnection,
        base: &str,
        filter: &str,
        attrs: &[String],
    ) -> Result<Vec<DirectoryEntry>> {
        metrics::record_search(self.ctx.schema().flavor_name());
        let attrs: Vec<&str> = attrs.iter().map(String::as_str).collect();
        conn.search(base, SearchScope::Subtree, filter, &attrs).await
    }

    /// Run one subtree search on a borrowed service connection
    async fn search_pooled(&self, base: &str, filter: &str, attrs: &[String]) -> Result<Vec<DirectoryEntry>> {
        let mut pooled = self.pools.borrow_connection(self.ctx.identity()).await?;
        let result = {
            let conn = pooled.connection()?;
            self.search(conn, base, filter, attrs).await
        };
        self.pools.return_with(&mut pooled, result)
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// Verify `password` for `principal`, returning the canonical id
    ///
    /// The user DN is resolved with the service account. The credential
    /// check binds on a fresh connection that never enters the pool.
    pub async fn authenticate(&self, principal: &PrincipalId, password: &str) -> Result<PrincipalId> {
        self.check_domain(principal)?;

        let entry = {
            let mut pooled = self.pools.borrow_connection(self.ctx.identity()).await?;
            let found = match pooled.connection() {
                Ok(conn) => self.resolver.lookup_user(conn, principal).await,
                Err(e) => Err(e),
            };
            self.pools.return_with(&mut pooled, found)?
        };
        let Some(entry) = entry else {
            metrics::record_authentication(false);
            return Err(Error::InvalidPrincipal(principal.to_string()));
        };

        let mut conn = self.pools.connect_unpooled(self.ctx.identity()).await?;
        let result = conn.bind(&entry.dn, password).await;
        conn.close().await;
        metrics::record_authentication(result.is_ok());

        match result {
            Ok(()) => {
                info!("Authenticated {} against {}", principal, self.ctx.domain());
                Ok(self
                    .ctx
                    .user_from_entry(&entry)
                    .map(|user| user.id)
                    .unwrap_or_else(|| principal.clone()))
            }
            Err(e) => {
                warn!("Authentication of {} failed: {}", principal, e);
                Err(e)
            }
        }
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub async fn find_user(&self, principal: &PrincipalId) -> Result<PersonUser> {
        self.check_domain(principal)?;
        let filter = self
            .ctx
            .schema()
            .render(QueryKind::UserByAccountName, &[&principal.name])?;
        self.find_single_user(&filter, &principal.to_string()).await
    }

    /// Find a user by `name@domain` UPN
    ///
    /// When the suffix is this store's domain the account name matches too.
    /// Backends without a UPN attribute fall back to the account name.
    pub async fn find_user_by_upn(&self, upn: &str) -> Result<PersonUser> {
        let id = PrincipalId::parse(upn, self.ctx.domain())?;
        let schema = self.ctx.schema();
        let own_domain = self.ctx.serves(&id.domain);
        let upn = id.upn();

        let filter = if own_domain && schema.supports(QueryKind::UserByAccountNameOrUpn) {
            schema.render(QueryKind::UserByAccountNameOrUpn, &[&id.name, &upn])?
        } else if schema.supports(QueryKind::UserByUpn) {
            schema.render(QueryKind::UserByUpn, &[&upn])?
        } else if own_domain {
            schema.render(QueryKind::UserByAccountName, &[&id.name])?
        } else {
            return Err(Error::InvalidPrincipal(upn));
        };
        self.find_single_user(&filter, &upn).await
    }

    pub async fn find_user_by_object_id(&self, object_id: &str) -> Result<PersonUser> {
        let filter = self
            .ctx
            .schema()
            .render(QueryKind::UserByObjectId, &[object_id])?;
        self.find_single_user(&filter, object_id).await
    }

    /// Enabled user whose directory `attribute` equals `value`
    ///
    /// The id comes from the stored UPN when there is one.
    pub async fn find_active_user(&self, attribute: &str, value: &str) -> Result<PrincipalId> {
        if !is_valid_attribute_name(attribute) {
            return Err(Error::InvalidArgument(format!(
                "invalid attribute name '{}'",
                attribute
            )));
        }
        if value.is_empty() {
            return Err(Error::InvalidArgument(format!("empty value for {}", attribute)));
        }

        let filter = self
            .ctx
            .schema()
            .render(QueryKind::UserByAttribute, &[attribute, value])?;
        let user = self
            .find_single_user(&filter, &format!("{}={}", attribute, value))
            .await?;
        if user.disabled {
            return Err(Error::InvalidPrincipal(format!(
                "User account '{}' is not active",
                user.id
            )));
        }

        match user.detail.user_principal_name.as_deref().filter(|u| !u.is_empty()) {
            Some(upn) => PrincipalId::parse(upn, self.ctx.domain()),
            None => Ok(user.id),
        }
    }

    /// Fail when the account is locked out or its password has expired
    pub async fn check_user_account_flags(&self, principal: &PrincipalId) -> Result<()> {
        let user = self.find_user(principal).await?;
        if user.locked {
            Err(Error::AccountLocked(principal.to_string()))
        } else if user.password_expired {
            Err(Error::PasswordExpired(principal.to_string()))
        } else {
            Ok(())
        }
    }

    async fn find_single_user(&self, filter: &str, what: &str) -> Result<PersonUser> {
        let attrs = self.ctx.user_attributes();
        let entries = self
            .search_pooled(&self.ctx.config().user_base_dn, filter, &attrs)
            .await?;
        let mut users: Vec<PersonUser> = entries
            .iter()
            .filter_map(|e| self.ctx.user_from_entry(e))
            .collect();
        match users.len() {
            0 => Err(Error::InvalidPrincipal(what.to_string())),
            1 => Ok(users.remove(0)),
            n => Err(Error::InvalidPrincipal(format!("{} matches {} users", what, n))),
        }
    }

    /// Users matching `search`, or every user when it is empty
    pub async fn find_users(&self, search: &str, limit: Option<usize>) -> Result<Vec<PersonUser>> {
        let filter = self.criteria_filter(QueryKind::UserByCriteria, QueryKind::AllUsers, search)?;
        let attrs = self.ctx.user_attributes();
        let entries = self
            .search_pooled(&self.ctx.config().user_base_dn, &filter, &attrs)
            .await?;
        Ok(collect_unique(
            entries.iter().filter_map(|e| self.ctx.user_from_entry(e)),
            |u| u.id.clone(),
            limit,
        ))
    }

    /// Disabled users matching `search`
    ///
    /// The account control bit is checked on every candidate, since the
    /// OpenLDAP query returns all users.
    pub async fn find_disabled_users(&self, search: &str, limit: Option<usize>) -> Result<Vec<PersonUser>> {
        let filter =
            self.criteria_filter(QueryKind::UserByCriteria, QueryKind::AllDisabledUsers, search)?;
        let attrs = self.ctx.user_attributes();
        let entries = self
            .search_pooled(&self.ctx.config().user_base_dn, &filter, &attrs)
            .await?;
        Ok(collect_unique(
            entries
                .iter()
                .filter_map(|e| self.ctx.user_from_entry(e))
                .filter(|u| u.disabled),
            |u| u.id.clone(),
            limit,
        ))
    }

    /// Locked-out users matching `search`
    pub async fn find_locked_users(
        &self,
        search: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PersonUser>> {
        let filter =
            self.criteria_filter(QueryKind::UserByCriteria, QueryKind::AllUsers, search)?;
        let attrs = self.ctx.user_attributes();
        let entries = self
            .search_pooled(&self.ctx.config().user_base_dn, &filter, &attrs)
            .await?;
        Ok(collect_unique(
            entries
                .iter()
                .filter_map(|e| self.ctx.user_from_entry(e))
                .filter(|u| u.locked),
            |u| u.id.clone(),
            limit,
        ))
    }

    fn criteria_filter(&self, criteria: QueryKind, all: QueryKind, search: &str) -> Result<String> {
        if search.is_empty() {
            self.ctx.schema().render(all, &[])
        } else {
            self.ctx.schema().render(criteria, &[search])
        }
    }

    // ========================================================================
    // Groups
    // ========================================================================

    pub async fn find_group(&self, group: &PrincipalId) -> Result<Group> {
        self.check_domain(group)?;
        let filter = self
            .ctx
            .schema()
            .render(QueryKind::GroupByAccountName, &[&group.name])?;
        self.find_single_group(&filter, &group.to_string()).await
    }

    pub async fn find_group_by_object_id(&self, object_id: &str) -> Result<Group> {
        let filter = self
            .ctx
            .schema()
            .render(QueryKind::GroupByObjectId, &[object_id])?;
        self.find_single_group(&filter, object_id).await
    }

    async fn find_single_group(&self, filter: &str, what: &str) -> Result<Group> {
        let attrs = self.ctx.group_attributes();
        let entries = self
            .search_pooled(&self.ctx.config().group_base_dn, filter, &attrs)
            .await?;
        let mut groups: Vec<Group> = entries
            .iter()
            .filter_map(|e| self.ctx.group_from_entry(e))
            .collect();
        match groups.len() {
            0 => Err(Error::InvalidPrincipal(what.to_string())),
            1 => Ok(groups.remove(0)),
            n => Err(Error::InvalidPrincipal(format!("{} matches {} groups", what, n))),
        }
    }

    /// Groups matching `search`, or every group when it is empty
    pub async fn find_groups(&self, search: &str, limit: Option<usize>) -> Result<Vec<Group>> {
        let filter = self.criteria_filter(QueryKind::GroupByCriteria, QueryKind::AllGroups, search)?;
        let attrs = self.ctx.group_attributes();
        let entries = self
            .search_pooled(&self.ctx.config().group_base_dn, &filter, &attrs)
            .await?;
        Ok(collect_unique(
            entries.iter().filter_map(|e| self.ctx.group_from_entry(e)),
            |g| g.id.clone(),
            limit,
        ))
    }

    pub async fn find_direct_parent_groups(&self, principal: &PrincipalId) -> Result<PrincipalGroupLookupInfo> {
        self.check_domain(principal)?;
        self.resolver.find_direct_parent_groups(principal).await
    }

    pub async fn find_nested_parent_groups(&self, principal: &PrincipalId) -> Result<PrincipalGroupLookupInfo> {
        self.check_domain(principal)?;
        self.resolver.find_nested_parent_groups(principal).await
    }

    /// Whether `principal` is a direct or nested member of `group`
    pub async fn check_user_group_membership(
        &self,
        principal: &PrincipalId,
        group: &PrincipalId,
    ) -> Result<bool> {
        if !self.ctx.serves(&group.domain) {
            return Ok(false);
        }
        let info = self.find_nested_parent_groups(principal).await?;
        Ok(info
            .groups
            .iter()
            .any(|g| g.id.name.eq_ignore_ascii_case(&group.name)))
    }

    // ========================================================================
    // UPN suffixes
    // ========================================================================

    /// Extra UPN suffixes registered in the AD forest, lowercased
    ///
    /// Read from the partitions container under the rootDSE's configuration
    /// naming context and cached for [`UPN_SUFFIX_REFRESH`]. Stores without
    /// an AD schema register none. A failed read is logged and yields none.
    pub async fn get_registered_upn_suffixes(&self) -> BTreeSet<String> {
        if !matches!(
            self.ctx.config().provider,
            ProviderKind::ActiveDirectory | ProviderKind::LdapWithAdMapping
        ) {
            return BTreeSet::new();
        }

        let cached = self
            .upn_suffixes
            .lock()
            .as_ref()
            .filter(|(read_at, _)| read_at.elapsed() < UPN_SUFFIX_REFRESH)
            .map(|(_, suffixes)| suffixes.clone());
        if let Some(suffixes) = cached {
            return suffixes;
        }

        let mut pooled = match self.pools.borrow_connection(self.ctx.identity()).await {
            Ok(pooled) => pooled,
            Err(e) => {
                warn!("Cannot read UPN suffixes of {}: {}", self.ctx.domain(), e);
                return BTreeSet::new();
            }
        };
        let result = match pooled.connection() {
            Ok(conn) => read_upn_suffixes(conn).await,
            Err(e) => Err(e),
        };
        match self.pools.return_with(&mut pooled, result) {
            Ok(suffixes) => {
                debug!("{} registers {} UPN suffixes", self.ctx.domain(), suffixes.len());
                *self.upn_suffixes.lock() = Some((Instant::now(), suffixes.clone()));
                suffixes
            }
            Err(e) => {
                warn!("Cannot read UPN suffixes of {}: {}", self.ctx.domain(), e);
                BTreeSet::new()
            }
        }
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Values for each requested claim name, in request order
    pub async fn get_attributes(&self, principal: &PrincipalId, names: &[&str]) -> Result<Vec<AttributeValues>> {
        self.check_domain(principal)?;

        let mut mapped = Vec::with_capacity(names.len());
        for name in names {
            let attr = self
                .attribute_map
                .get(*name)
                .ok_or_else(|| Error::NoAttributeMapping(name.to_string()))?;
            mapped.push((*name, attr.as_str()));
        }

        let fetch: Vec<String> = mapped
            .iter()
            .filter(|(_, attr)| !special::is_special(attr))
            .map(|(_, attr)| attr.to_string())
            .collect();

        let mut pooled = self.pools.borrow_connection(self.ctx.identity()).await?;
        let result = match pooled.connection() {
            Ok(conn) => self.read_attributes(conn, principal, &mapped, &fetch).await,
            Err(e) => Err(e),
        };
        self.pools.return_with(&mut pooled, result)
    }

    async fn read_attributes(
        &self,
        conn: &mut BoxedConnection,
        principal: &PrincipalId,
        mapped: &[(&str, &str)],
        fetch: &[String],
    ) -> Result<Vec<AttributeValues>> {
        let entry = self
            .resolver
            .lookup_user_with(conn, principal, fetch)
            .await?
            .ok_or_else(|| Error::InvalidPrincipal(principal.to_string()))?;

        let account = self
            .ctx
            .schema()
            .attribute(AttributeId::UserAccountName)
            .and_then(|attr| entry.first(attr))
            .unwrap_or(&principal.name)
            .to_string();

        let mut groups: Option<Vec<Group>> = None;
        let mut out = Vec::with_capacity(mapped.len());
        for (name, attr) in mapped {
            let values = if attr.eq_ignore_ascii_case(special::SUBJECT_TYPE) {
                // directory users are never solution users
                vec!["false".to_string()]
            } else if attr.eq_ignore_ascii_case(special::USER_PRINCIPAL_NAME) {
                let stored = self
                    .ctx
                    .schema()
                    .attribute(AttributeId::UserPrincipalName)
                    .and_then(|upn| entry.first(upn))
                    .filter(|upn| !upn.is_empty());
                vec![match stored {
                    Some(upn) => upn.to_string(),
                    None => format!("{}@{}", account, self.ctx.domain()),
                }]
            } else if attr.eq_ignore_ascii_case(special::MEMBER_OF) {
                if groups.is_none() {
                    let found = PrincipalEntry {
                        kind: PrincipalKind::User,
                        entry: entry.clone(),
                    };
                    groups = Some(self.resolver.nested_parent_groups(conn, &found).await?.groups);
                }
                groups
                    .iter()
                    .flatten()
                    .map(|g| g.id.netbios())
                    .collect()
            } else {
                entry
                    .values(attr)
                    .iter()
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .collect()
            };
            out.push(AttributeValues {
                name: name.to_string(),
                values,
            });
        }

        debug!("Resolved {} attributes for {}", out.len(), principal);
        Ok(out)
    }
}

async fn read_upn_suffixes(conn: &mut BoxedConnection) -> Result<BTreeSet<String>> {
    let root = conn
        .search("", SearchScope::Base, "(objectClass=*)", &[CONFIG_NAMING_CONTEXT])
        .await?;
    let config_nc = root
        .iter()
        .find_map(|e| e.first(CONFIG_NAMING_CONTEXT))
        .filter(|nc| !nc.is_empty())
        .ok_or_else(|| Error::Directory(format!("rootDSE has no {}", CONFIG_NAMING_CONTEXT)))?;

    let partitions = format!("CN=Partitions,{}", config_nc);
    let entries = conn
        .search(&partitions, SearchScope::Base, "(objectClass=*)", &[UPN_SUFFIXES])
        .await?;
    Ok(entries
        .iter()
        .flat_map(|e| e.values(UPN_SUFFIXES).iter())
        .map(|suffix| suffix.trim().to_ascii_lowercase())
        .filter(|suffix| !suffix.is_empty())
        .collect())
}

fn collect_unique<T, K, F>(items: impl Iterator<Item = T>, key: F, limit: Option<usize>) -> Vec<T>
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    items
        .filter(|item| seen.insert(key(item)))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

// ============================================================================
// Tenants
// ============================================================================

/// Identity providers of every initialised tenant
pub struct TenantDirectory {
    pools: Arc<ConnectionPoolManager>,
    tenants: RwLock<HashMap<String, Vec<Arc<IdentityProvider>>>>,
}

impl TenantDirectory {
    pub fn new(pools: Arc<ConnectionPoolManager>) -> Self {
        Self {
            pools,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    pub fn pools(&self) -> &Arc<ConnectionPoolManager> {
        &self.pools
    }

    /// Create the tenant's pool and a provider per store
    ///
    /// Calling it again for a live tenant keeps the existing providers.
    pub fn init_tenant(&self, config: &TenantConfig) -> Result<()> {
        let key = normalize_tenant(&config.name);
        if self.tenants.read().contains_key(&key) {
            return Ok(());
        }

        let providers = config
            .stores
            .iter()
            .map(|store| {
                IdentityProvider::for_store(&key, store.clone(), self.pools.clone()).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;

        self.pools.create_pool(&key);
        info!("Initialised tenant {} with {} identity store(s)", key, providers.len());
        self.tenants.write().entry(key).or_insert(providers);
        Ok(())
    }

    /// Drop the tenant's providers and close its pool
    pub async fn clean_tenant(&self, tenant: &str) {
        let key = normalize_tenant(tenant);
        self.tenants.write().remove(&key);
        self.pools.clean_pool(&key).await;
    }

    pub fn providers(&self, tenant: &str) -> Result<Vec<Arc<IdentityProvider>>> {
        let key = normalize_tenant(tenant);
        self.tenants
            .read()
            .get(&key)
            .cloned()
            .ok_or(Error::NoPoolForTenant(key))
    }

    /// Provider whose store serves `domain`, by name or alias
    pub fn provider(&self, tenant: &str, domain: &str) -> Result<Arc<IdentityProvider>> {
        self.providers(tenant)?
            .into_iter()
            .find(|p| p.context().serves(domain))
            .ok_or_else(|| {
                Error::InvalidPrincipal(format!(
                    "no identity store for domain {} in tenant {}",
                    domain, tenant
                ))
            })
    }

    pub fn provider_for(&self, tenant: &str, principal: &PrincipalId) -> Result<Arc<IdentityProvider>> {
        self.provider(tenant, &principal.domain)
    }
}
