//! Per-store context: configuration, schema and the service identity
//!
//! Also turns raw directory entries into users and groups.

use warden_core::config::IdentityStoreConfig;
use warden_core::types::{
    account_control, AttributeId, Group, GroupDetail, PersonDetail, PersonUser, PrincipalId,
};
use warden_core::{normalize_tenant, Result};

use crate::connection::DirectoryEntry;
use crate::pool::ConnectionIdentity;
use crate::schema::{LinkAttribute, SchemaMapping};

const USER_ATTRIBUTES: [AttributeId; 12] = [
    AttributeId::UserAccountName,
    AttributeId::UserObjectId,
    AttributeId::UserFirstName,
    AttributeId::UserLastName,
    AttributeId::UserEmail,
    AttributeId::UserDescription,
    AttributeId::UserDisplayName,
    AttributeId::UserCommonName,
    AttributeId::UserPrincipalName,
    AttributeId::UserAccountControl,
    AttributeId::UserLockoutTime,
    AttributeId::UserGroupMembersListLink,
];

const GROUP_ATTRIBUTES: [AttributeId; 4] = [
    AttributeId::GroupAccountName,
    AttributeId::GroupObjectId,
    AttributeId::GroupDescription,
    AttributeId::GroupGroupMembersListLink,
];

/// Whether an entry was found as a user or a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    User,
    Group,
}

impl PrincipalKind {
    pub fn link_id(&self) -> AttributeId {
        match self {
            PrincipalKind::User => AttributeId::UserGroupMembersListLink,
            PrincipalKind::Group => AttributeId::GroupGroupMembersListLink,
        }
    }
}

/// A resolved directory principal
#[derive(Debug, Clone)]
pub struct PrincipalEntry {
    pub kind: PrincipalKind,
    pub entry: DirectoryEntry,
}

/// Immutable view of one identity store
#[derive(Debug, Clone)]
pub struct StoreContext {
    tenant: String,
    config: IdentityStoreConfig,
    schema: SchemaMapping,
    identity: ConnectionIdentity,
}

impl StoreContext {
    pub fn new(tenant: &str, config: IdentityStoreConfig) -> Result<Self> {
        let schema = SchemaMapping::for_provider(config.provider, config.schema.as_ref())?;
        let identity = ConnectionIdentity::for_store(tenant, &config)?;
        Ok(Self::with_parts(tenant, config, schema, identity))
    }

    pub fn with_parts(
        tenant: &str,
        config: IdentityStoreConfig,
        schema: SchemaMapping,
        identity: ConnectionIdentity,
    ) -> Self {
        Self {
            tenant: normalize_tenant(tenant),
            config,
            schema,
            identity,
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn config(&self) -> &IdentityStoreConfig {
        &self.config
    }

    pub fn schema(&self) -> &SchemaMapping {
        &self.schema
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn domain(&self) -> &str {
        &self.config.name
    }

    pub fn serves(&self, domain: &str) -> bool {
        self.config.name.eq_ignore_ascii_case(domain) || self.config.alias_matches(domain)
    }

    pub fn user_attributes(&self) -> Vec<String> {
        self.schema.attributes_for(&USER_ATTRIBUTES)
    }

    pub fn group_attributes(&self) -> Vec<String> {
        self.schema.attributes_for(&GROUP_ATTRIBUTES)
    }

    /// Group attributes plus the member list
    pub fn group_attributes_with_members(&self) -> Vec<String> {
        let mut attrs = self.group_attributes();
        if let Some(member) = self.schema.attribute(AttributeId::GroupMembersList) {
            attrs.push(member.to_string());
        }
        attrs
    }

    /// Value a group's member list uses to reference this principal
    pub fn membership_id(&self, principal: &PrincipalEntry) -> Option<String> {
        match self.schema.link(principal.kind.link_id())? {
            LinkAttribute::ByDn => Some(principal.entry.dn.clone()),
            LinkAttribute::ByIdentifier(attr) => principal.entry.first(&attr).map(str::to_string),
        }
    }

    fn principal_id(&self, name: &str) -> (PrincipalId, Option<PrincipalId>) {
        let id = PrincipalId::new(name, self.config.name.clone());
        let alias = self
            .config
            .alias
            .as_ref()
            .map(|alias| PrincipalId::new(name, alias.clone()));
        (id, alias)
    }

    fn read(&self, entry: &DirectoryEntry, id: AttributeId) -> Option<String> {
        self.schema
            .attribute(id)
            .and_then(|attr| entry.first(attr))
            .map(str::to_string)
    }

    /// Account control bits; unparsable or out-of-range values read as none
    pub fn account_flags(&self, entry: &DirectoryEntry) -> u32 {
        self.read(entry, AttributeId::UserAccountControl)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    }

    pub fn user_from_entry(&self, entry: &DirectoryEntry) -> Option<PersonUser> {
        let name = self.read(entry, AttributeId::UserAccountName)?;
        let (id, alias) = self.principal_id(&name);

        let flags = self.account_flags(entry);
        let lockout = self
            .read(entry, AttributeId::UserLockoutTime)
            .map(|v| v.trim() != "0" && !v.trim().is_empty())
            .unwrap_or(false);

        Some(PersonUser {
            id,
            alias,
            object_id: self.read(entry, AttributeId::UserObjectId),
            detail: PersonDetail {
                first_name: self.read(entry, AttributeId::UserFirstName),
                last_name: self.read(entry, AttributeId::UserLastName),
                email: self.read(entry, AttributeId::UserEmail),
                description: self.read(entry, AttributeId::UserDescription),
                user_principal_name: self.read(entry, AttributeId::UserPrincipalName),
            },
            disabled: account_control::is_disabled(flags),
            locked: account_control::is_locked(flags) || lockout,
            password_expired: account_control::is_password_expired(flags),
        })
    }

    pub fn group_from_entry(&self, entry: &DirectoryEntry) -> Option<Group> {
        let name = self.read(entry, AttributeId::GroupAccountName)?;
        let (id, alias) = self.principal_id(&name);
        Some(Group {
            id,
            alias,
            object_id: self.read(entry, AttributeId::GroupObjectId),
            detail: Some(GroupDetail {
                description: self
                    .read(entry, AttributeId::GroupDescription)
                    .unwrap_or_default(),
            }),
        })
    }
}
