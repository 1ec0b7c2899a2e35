//! Directory schema flavors
//!
//! A flavor supplies the default object/attribute names for one kind of
//! directory and knows how to shape each query filter from resolved names.

use warden_core::types::{AttributeId, ObjectId};

use super::{QueryKind, DN_LINK};

/// Resolved names a flavor builds filters from
pub trait NameTable {
    fn object_class(&self, id: ObjectId) -> Option<&str>;
    fn attribute(&self, id: AttributeId) -> Option<&str>;
}

/// One directory flavor (Active Directory, OpenLDAP, ...)
pub trait SchemaFlavor: Send + Sync {
    fn name(&self) -> &'static str;

    fn default_object_class(&self, id: ObjectId) -> Option<&'static str>;

    fn default_attribute(&self, id: AttributeId) -> Option<&'static str>;

    /// Filter template for `kind` using `{N}` positional placeholders, or
    /// `None` when the query cannot be expressed with the resolved names.
    fn build_filter(&self, kind: QueryKind, names: &dyn NameTable) -> Option<String>;
}

// ============================================================================
// Active Directory
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveDirectoryFlavor;

impl SchemaFlavor for ActiveDirectoryFlavor {
    fn name(&self) -> &'static str {
        "active_directory"
    }

    fn default_object_class(&self, id: ObjectId) -> Option<&'static str> {
        Some(match id {
            ObjectId::User => "user",
            ObjectId::Group => "group",
            ObjectId::PasswordSettings => "msDS-PasswordSettings",
            ObjectId::Domain => "domain",
        })
    }

    fn default_attribute(&self, id: AttributeId) -> Option<&'static str> {
        use AttributeId::*;
        Some(match id {
            UserAccountControl => "userAccountControl",
            UserAccountName => "sAMAccountName",
            UserCommonName => "cn",
            UserDescription => "description",
            UserDisplayName => "displayname",
            UserEmail => "mail",
            UserFirstName => "givenName",
            UserLastName => "sn",
            UserLockoutTime => "lockoutTime",
            UserMemberOf => "memberof",
            UserObjectId => "objectSid",
            UserPasswordSettingsObject => "msDS-ResultantPSO",
            UserPrimaryGroupId => "primaryGroupID",
            UserPrincipalName => "userPrincipalName",
            UserPwdLastSet => "pwdLastSet",
            UserGroupMembersListLink => DN_LINK,
            GroupAccountName => "sAMAccountName",
            GroupDescription => "description",
            GroupMemberOf => "memberof",
            GroupMembersList => "member",
            GroupObjectId => "objectSid",
            GroupGroupMembersListLink => DN_LINK,
            GroupType => "groupType",
            GroupTokenGroups => "tokenGroups",
            PasswordSettingsMaximumPwdAge => "msDS-MaximumPasswordAge",
            PasswordSettingsLockoutDuration => return None,
            DomainMaxPwdAge => "maxPwdAge",
        })
    }

    fn build_filter(&self, kind: QueryKind, n: &dyn NameTable) -> Option<String> {
        use AttributeId::*;
        let user = move || n.object_class(ObjectId::User);
        let group = move || n.object_class(ObjectId::Group);

        let filter = match kind {
            QueryKind::UserByAccountName => attr_first(n.attribute(UserAccountName)?, user()?),
            QueryKind::UserByUpn => attr_first(n.attribute(UserPrincipalName)?, user()?),
            QueryKind::UserByAccountNameOrUpn => format!(
                "(&(|({}={{0}})({}={{1}}))(objectClass={}))",
                n.attribute(UserAccountName)?,
                n.attribute(UserPrincipalName)?,
                user()?
            ),
            QueryKind::UserByObjectId => class_first(user()?, n.attribute(UserObjectId)?),
            QueryKind::UserByAttribute => format!("(&({{0}}={{1}})(objectClass={}))", user()?),
            QueryKind::UserByCriteria => format!(
                "(&(objectClass={})(|({}=*{{0}}*)({}=*{{0}}*)({}=*{{0}}*)(cn=*{{0}}*)(name=*{{0}}*)({}=*{{0}}*)))",
                user()?,
                n.attribute(UserAccountName)?,
                n.attribute(UserLastName)?,
                n.attribute(UserFirstName)?,
                n.attribute(UserDisplayName)?
            ),
            QueryKind::UserByCriteriaForName => format!(
                "(&(objectClass={})(|({}={{0}}*)({}={{0}}*)({}={{0}}*)({}={{0}}*)({}={{0}}*)({}={{0}}*)))",
                user()?,
                n.attribute(UserAccountName)?,
                n.attribute(UserLastName)?,
                n.attribute(UserFirstName)?,
                n.attribute(UserCommonName)?,
                n.attribute(UserDisplayName)?,
                n.attribute(UserPrincipalName)?
            ),
            QueryKind::AllUsers => format!("(objectClass={})", user()?),
            QueryKind::AllDisabledUsers => format!(
                "(&(objectclass={})(!({}=0)))",
                user()?,
                n.attribute(UserAccountControl)?
            ),
            QueryKind::GroupByAccountName => attr_first(n.attribute(GroupAccountName)?, group()?),
            QueryKind::GroupByObjectId => class_first(group()?, n.attribute(GroupObjectId)?),
            QueryKind::GroupByCriteria => group_criteria(group()?, n)?,
            QueryKind::GroupByCriteriaForName => format!(
                "(&(objectClass={})(|({}={{0}}*)(cn={{0}}*)))",
                group()?,
                n.attribute(GroupAccountName)?
            ),
            QueryKind::AllGroups => format!("(objectClass={})", group()?),
            QueryKind::DirectParentGroups => class_first(group()?, n.attribute(GroupMembersList)?),
            QueryKind::NestedParentGroups => format!(
                "(&(objectClass={})({}:1.2.840.113556.1.4.1941:={{0}}))",
                group()?,
                n.attribute(GroupMembersList)?
            ),
            QueryKind::UserOrGroupByAccountName => {
                let user_acct = n.attribute(UserAccountName)?;
                let group_acct = n.attribute(GroupAccountName)?;
                if user_acct == group_acct {
                    format!(
                        "(&({}={{0}})(|(objectClass={})(objectClass={})))",
                        user_acct,
                        user()?,
                        group()?
                    )
                } else {
                    format!(
                        "(|(&({}={{0}})(objectClass={}))(&({}={{0}})(objectClass={})))",
                        user_acct,
                        user()?,
                        group_acct,
                        group()?
                    )
                }
            }
            QueryKind::UserOrGroupByAccountNameOrUpn => {
                let user_acct = n.attribute(UserAccountName)?;
                let group_acct = n.attribute(GroupAccountName)?;
                let upn = n.attribute(UserPrincipalName)?;
                if user_acct == group_acct {
                    format!(
                        "(|(&({}={{0}})(|(objectClass={})(objectClass={})))(&({}={{1}})(objectClass={})))",
                        user_acct,
                        user()?,
                        group()?,
                        upn,
                        user()?
                    )
                } else {
                    format!(
                        "(|(&(|({}={{0}})({}={{1}}))(objectClass={}))(&({}={{0}})(objectClass={})))",
                        user_acct,
                        upn,
                        user()?,
                        group_acct,
                        group()?
                    )
                }
            }
            QueryKind::PasswordSettings => {
                format!("(objectclass={})", n.object_class(ObjectId::PasswordSettings)?)
            }
            QueryKind::DomainObject => format!("(objectclass={})", n.object_class(ObjectId::Domain)?),
            QueryKind::UserByLinkAttribute => {
                attr_first(identifier_link(n, UserGroupMembersListLink)?, user()?)
            }
            QueryKind::GroupByLinkAttribute => {
                attr_first(identifier_link(n, GroupGroupMembersListLink)?, group()?)
            }
        };

        Some(filter)
    }
}

// ============================================================================
// OpenLDAP
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct OpenLdapFlavor;

impl SchemaFlavor for OpenLdapFlavor {
    fn name(&self) -> &'static str {
        "openldap"
    }

    fn default_object_class(&self, id: ObjectId) -> Option<&'static str> {
        match id {
            ObjectId::User => Some("inetOrgPerson"),
            ObjectId::Group => Some("groupOfUniqueNames"),
            ObjectId::PasswordSettings => Some("pwdPolicy"),
            ObjectId::Domain => None,
        }
    }

    fn default_attribute(&self, id: AttributeId) -> Option<&'static str> {
        use AttributeId::*;
        match id {
            UserAccountControl => Some("userAccountControl"),
            UserAccountName => Some("uid"),
            UserCommonName => Some("cn"),
            UserDescription => Some("description"),
            UserDisplayName => Some("displayName"),
            UserEmail => Some("mail"),
            UserFirstName => Some("givenName"),
            UserLastName => Some("sn"),
            UserLockoutTime => Some("pwdAccountLockedTime"),
            UserObjectId => Some("entryUUID"),
            UserGroupMembersListLink => Some(DN_LINK),
            GroupAccountName => Some("cn"),
            GroupDescription => Some("description"),
            GroupMembersList => Some("uniqueMember"),
            GroupObjectId => Some("entryUUID"),
            GroupGroupMembersListLink => Some(DN_LINK),
            GroupType => Some("groupType"),
            GroupTokenGroups => Some("tokenGroups"),
            PasswordSettingsLockoutDuration => Some("pwdLockoutDuration"),
            UserMemberOf | UserPasswordSettingsObject | UserPrimaryGroupId | UserPrincipalName
            | UserPwdLastSet | GroupMemberOf | PasswordSettingsMaximumPwdAge
            | DomainMaxPwdAge => None,
        }
    }

    fn build_filter(&self, kind: QueryKind, n: &dyn NameTable) -> Option<String> {
        use AttributeId::*;
        let user = move || n.object_class(ObjectId::User);
        let group = move || n.object_class(ObjectId::Group);

        let filter = match kind {
            // no userPrincipalName and no matching rule in chain
            QueryKind::UserByUpn
            | QueryKind::UserByAccountNameOrUpn
            | QueryKind::UserOrGroupByAccountNameOrUpn
            | QueryKind::NestedParentGroups
            | QueryKind::DomainObject => return None,
            QueryKind::UserByAccountName => class_first(user()?, n.attribute(UserAccountName)?),
            QueryKind::UserByObjectId => class_first(user()?, n.attribute(UserObjectId)?),
            QueryKind::UserByAttribute => format!("(&(objectClass={})({{0}}={{1}}))", user()?),
            QueryKind::UserByCriteria => format!(
                "(&(objectClass={})(|({}=*{{0}}*)({}=*{{0}}*)({}=*{{0}}*)({}=*{{0}}*)({}=*{{0}}*)))",
                user()?,
                n.attribute(UserAccountName)?,
                n.attribute(UserLastName)?,
                n.attribute(UserFirstName)?,
                n.attribute(UserDisplayName)?,
                n.attribute(UserDescription)?
            ),
            QueryKind::UserByCriteriaForName => format!(
                "(&(objectClass={})(|({}={{0}}*)({}={{0}}*)({}={{0}}*)({}={{0}}*)({}={{0}}*)({}={{0}}*)))",
                user()?,
                n.attribute(UserAccountName)?,
                n.attribute(UserEmail)?,
                n.attribute(UserLastName)?,
                n.attribute(UserFirstName)?,
                n.attribute(UserCommonName)?,
                n.attribute(UserDisplayName)?
            ),
            QueryKind::AllUsers | QueryKind::AllDisabledUsers => {
                format!("(objectClass={})", user()?)
            }
            QueryKind::GroupByAccountName => class_first(group()?, n.attribute(GroupAccountName)?),
            QueryKind::GroupByObjectId => class_first(group()?, n.attribute(GroupObjectId)?),
            QueryKind::GroupByCriteria => group_criteria(group()?, n)?,
            QueryKind::GroupByCriteriaForName => format!(
                "(&(objectClass={})({}={{0}}*))",
                group()?,
                n.attribute(GroupAccountName)?
            ),
            QueryKind::AllGroups => format!("(objectClass={})", group()?),
            QueryKind::DirectParentGroups => class_first(group()?, n.attribute(GroupMembersList)?),
            QueryKind::UserOrGroupByAccountName => {
                let user_acct = n.attribute(UserAccountName)?;
                let group_acct = n.attribute(GroupAccountName)?;
                if user_acct == group_acct {
                    format!(
                        "(&(|(objectClass={})(objectClass={}))({}={{0}}))",
                        user()?,
                        group()?,
                        group_acct
                    )
                } else {
                    format!(
                        "(|(&(objectClass={})({}={{0}}))(&(objectClass={})({}={{0}})))",
                        user()?,
                        user_acct,
                        group()?,
                        group_acct
                    )
                }
            }
            QueryKind::PasswordSettings => {
                format!("(objectClass={})", n.object_class(ObjectId::PasswordSettings)?)
            }
            QueryKind::UserByLinkAttribute => {
                class_first(user()?, identifier_link(n, UserGroupMembersListLink)?)
            }
            QueryKind::GroupByLinkAttribute => {
                class_first(group()?, identifier_link(n, GroupGroupMembersListLink)?)
            }
        };

        Some(filter)
    }
}

fn attr_first(attr: &str, class: &str) -> String {
    format!("(&({}={{0}})(objectClass={}))", attr, class)
}

fn class_first(class: &str, attr: &str) -> String {
    format!("(&(objectClass={})({}={{0}}))", class, attr)
}

fn group_criteria(class: &str, n: &dyn NameTable) -> Option<String> {
    Some(format!(
        "(&(objectClass={})(|({}=*{{0}}*)({}=*{{0}}*)({}=*{{0}}*)))",
        class,
        n.attribute(AttributeId::GroupAccountName)?,
        n.attribute(AttributeId::GroupDescription)?,
        n.attribute(AttributeId::GroupObjectId)?
    ))
}

/// Link attribute name when members are referenced by identifier, not DN
fn identifier_link<'a>(n: &'a dyn NameTable, id: AttributeId) -> Option<&'a str> {
    n.attribute(id)
        .filter(|name| !name.eq_ignore_ascii_case(DN_LINK))
}
