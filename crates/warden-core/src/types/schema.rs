//! Abstract directory object and attribute identifiers
//!
//! These ids are directory-neutral. A schema mapping translates them into
//! concrete object classes and attribute names for one backend flavor.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Abstract object kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectId {
    User,
    Group,
    PasswordSettings,
    Domain,
}

impl ObjectId {
    pub const ALL: [ObjectId; 4] = [
        ObjectId::User,
        ObjectId::Group,
        ObjectId::PasswordSettings,
        ObjectId::Domain,
    ];
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectId::User => "user",
            ObjectId::Group => "group",
            ObjectId::PasswordSettings => "password_settings",
            ObjectId::Domain => "domain",
        };
        f.write_str(name)
    }
}

/// Abstract attribute ids, grouped by the object kind they belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeId {
    UserAccountControl,
    UserAccountName,
    UserCommonName,
    UserDescription,
    UserDisplayName,
    UserEmail,
    UserFirstName,
    UserLastName,
    UserLockoutTime,
    UserMemberOf,
    UserObjectId,
    UserPasswordSettingsObject,
    UserPrimaryGroupId,
    UserPrincipalName,
    UserPwdLastSet,
    UserGroupMembersListLink,
    GroupAccountName,
    GroupDescription,
    GroupMemberOf,
    GroupMembersList,
    GroupObjectId,
    GroupGroupMembersListLink,
    GroupType,
    GroupTokenGroups,
    PasswordSettingsMaximumPwdAge,
    PasswordSettingsLockoutDuration,
    DomainMaxPwdAge,
}

impl AttributeId {
    pub const ALL: [AttributeId; 27] = [
        AttributeId::UserAccountControl,
        AttributeId::UserAccountName,
        AttributeId::UserCommonName,
        AttributeId::UserDescription,
        AttributeId::UserDisplayName,
        AttributeId::UserEmail,
        AttributeId::UserFirstName,
        AttributeId::UserLastName,
        AttributeId::UserLockoutTime,
        AttributeId::UserMemberOf,
        AttributeId::UserObjectId,
        AttributeId::UserPasswordSettingsObject,
        AttributeId::UserPrimaryGroupId,
        AttributeId::UserPrincipalName,
        AttributeId::UserPwdLastSet,
        AttributeId::UserGroupMembersListLink,
        AttributeId::GroupAccountName,
        AttributeId::GroupDescription,
        AttributeId::GroupMemberOf,
        AttributeId::GroupMembersList,
        AttributeId::GroupObjectId,
        AttributeId::GroupGroupMembersListLink,
        AttributeId::GroupType,
        AttributeId::GroupTokenGroups,
        AttributeId::PasswordSettingsMaximumPwdAge,
        AttributeId::PasswordSettingsLockoutDuration,
        AttributeId::DomainMaxPwdAge,
    ];

    /// The object kind this attribute is defined on
    pub fn kind(&self) -> ObjectId {
        use AttributeId::*;
        match self {
            UserAccountControl | UserAccountName | UserCommonName | UserDescription
            | UserDisplayName | UserEmail | UserFirstName | UserLastName | UserLockoutTime
            | UserMemberOf | UserObjectId | UserPasswordSettingsObject | UserPrimaryGroupId
            | UserPrincipalName | UserPwdLastSet | UserGroupMembersListLink => ObjectId::User,
            GroupAccountName | GroupDescription | GroupMemberOf | GroupMembersList
            | GroupObjectId | GroupGroupMembersListLink | GroupType | GroupTokenGroups => {
                ObjectId::Group
            }
            PasswordSettingsMaximumPwdAge | PasswordSettingsLockoutDuration => {
                ObjectId::PasswordSettings
            }
            DomainMaxPwdAge => ObjectId::Domain,
        }
    }

    /// Link attributes describe how a group's member list references a principal
    pub fn is_link(&self) -> bool {
        matches!(
            self,
            AttributeId::UserGroupMembersListLink | AttributeId::GroupGroupMembersListLink
        )
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Reuse the serde name so logs and config keys agree
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(s)) => f.write_str(&s),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// Caller-supplied schema overrides
///
/// A `None` value marks the id as explicitly unmapped. In configuration
/// files an empty string expresses the same thing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaOverrides {
    #[serde(default, with = "empty_is_unmapped")]
    pub objects: BTreeMap<ObjectId, Option<String>>,

    #[serde(default, with = "empty_is_unmapped")]
    pub attributes: BTreeMap<AttributeId, Option<String>>,
}

impl SchemaOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(mut self, id: ObjectId, class: &str) -> Self {
        self.objects.insert(id, Some(class.to_string()));
        self
    }

    pub fn attribute(mut self, id: AttributeId, name: &str) -> Self {
        self.attributes.insert(id, Some(name.to_string()));
        self
    }

    pub fn unmapped_object(mut self, id: ObjectId) -> Self {
        self.objects.insert(id, None);
        self
    }

    pub fn unmapped_attribute(mut self, id: AttributeId) -> Self {
        self.attributes.insert(id, None);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.attributes.is_empty()
    }
}

mod empty_is_unmapped {
    use super::*;
    use serde::de::value::StrDeserializer;
    use serde::de::IntoDeserializer;

    pub fn serialize<K, S>(map: &BTreeMap<K, Option<String>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize + Ord,
        S: Serializer,
    {
        let flat: BTreeMap<&K, &str> = map
            .iter()
            .map(|(k, v)| (k, v.as_deref().unwrap_or("")))
            .collect();
        flat.serialize(serializer)
    }

    pub fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, Option<String>>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        D: Deserializer<'de>,
    {
        let flat = BTreeMap::<String, String>::deserialize(deserializer)?;
        let mut out = BTreeMap::new();
        for (key, value) in flat {
            let key_de: StrDeserializer<'_, D::Error> = key.as_str().into_deserializer();
            let id = K::deserialize(key_de)?;
            let value = value.trim().to_string();
            out.insert(id, if value.is_empty() { None } else { Some(value) });
        }
        Ok(out)
    }
}
