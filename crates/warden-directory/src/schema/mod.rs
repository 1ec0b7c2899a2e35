//! Schema mapping and query filter generation
//!
//! A [`SchemaMapping`] resolves the directory-neutral [`ObjectId`] and
//! [`AttributeId`] ids to concrete names for one backend, then precomputes
//! a [`FilterTemplate`] for every query the backend can express. Overrides
//! always win over the flavor defaults, including an explicit "unmapped".

mod flavor;
mod validate;

pub use flavor::{ActiveDirectoryFlavor, NameTable, OpenLdapFlavor, SchemaFlavor};
pub use validate::is_valid_attribute_name;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;
use warden_core::config::ProviderKind;
use warden_core::types::{AttributeId, ObjectId, SchemaOverrides};
use warden_core::{Error, Result};

/// Pseudo attribute name meaning "the entry's distinguished name"
pub const DN_LINK: &str = "dn";

/// Every query a mapping may provide a template for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    UserByAccountName,
    UserByUpn,
    /// `{0}` account name, `{1}` UPN
    UserByAccountNameOrUpn,
    UserByObjectId,
    /// `{0}` attribute name, `{1}` value
    UserByAttribute,
    UserByCriteria,
    UserByCriteriaForName,
    AllUsers,
    AllDisabledUsers,
    GroupByAccountName,
    GroupByObjectId,
    GroupByCriteria,
    GroupByCriteriaForName,
    AllGroups,
    DirectParentGroups,
    NestedParentGroups,
    UserOrGroupByAccountName,
    /// `{0}` account name, `{1}` UPN
    UserOrGroupByAccountNameOrUpn,
    PasswordSettings,
    DomainObject,
    UserByLinkAttribute,
    GroupByLinkAttribute,
}

impl QueryKind {
    pub const ALL: [QueryKind; 22] = [
        QueryKind::UserByAccountName,
        QueryKind::UserByUpn,
        QueryKind::UserByAccountNameOrUpn,
        QueryKind::UserByObjectId,
        QueryKind::UserByAttribute,
        QueryKind::UserByCriteria,
        QueryKind::UserByCriteriaForName,
        QueryKind::AllUsers,
        QueryKind::AllDisabledUsers,
        QueryKind::GroupByAccountName,
        QueryKind::GroupByObjectId,
        QueryKind::GroupByCriteria,
        QueryKind::GroupByCriteriaForName,
        QueryKind::AllGroups,
        QueryKind::DirectParentGroups,
        QueryKind::NestedParentGroups,
        QueryKind::UserOrGroupByAccountName,
        QueryKind::UserOrGroupByAccountNameOrUpn,
        QueryKind::PasswordSettings,
        QueryKind::DomainObject,
        QueryKind::UserByLinkAttribute,
        QueryKind::GroupByLinkAttribute,
    ];
}

/// How a group's member list references a principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAttribute {
    /// Members are listed by distinguished name
    ByDn,
    /// Members are listed by the value of this attribute
    ByIdentifier(String),
}

// ============================================================================
// Filter templates
// ============================================================================

/// Escape a value for use inside an LDAP filter assertion (RFC 4515)
pub fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

/// A filter with `{N}` positional placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterTemplate {
    template: String,
    arity: usize,
}

impl FilterTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let arity = (0..10)
            .take_while(|i| template.contains(&format!("{{{}}}", i)))
            .count();
        Self { template, arity }
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Number of positional parameters the template expects
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Substitute escaped `args` into the placeholders
    pub fn render(&self, args: &[&str]) -> Result<String> {
        if args.len() != self.arity {
            return Err(Error::InvalidArgument(format!(
                "filter {} expects {} argument(s), got {}",
                self.template,
                self.arity,
                args.len()
            )));
        }

        let mut out = self.template.clone();
        for (i, arg) in args.iter().enumerate() {
            out = out.replace(&format!("{{{}}}", i), &escape_filter_value(arg));
        }
        Ok(out)
    }
}

impl fmt::Display for FilterTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

// ============================================================================
// Schema mapping
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ResolvedNames {
    objects: HashMap<ObjectId, String>,
    attributes: HashMap<AttributeId, String>,
}

impl NameTable for ResolvedNames {
    fn object_class(&self, id: ObjectId) -> Option<&str> {
        self.objects.get(&id).map(String::as_str)
    }

    fn attribute(&self, id: AttributeId) -> Option<&str> {
        self.attributes.get(&id).map(String::as_str)
    }
}

/// Immutable name table and filter set for one identity store
#[derive(Clone)]
pub struct SchemaMapping {
    flavor: Arc<dyn SchemaFlavor>,
    names: ResolvedNames,
    filters: HashMap<QueryKind, FilterTemplate>,
}

impl fmt::Debug for SchemaMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaMapping")
            .field("flavor", &self.flavor.name())
            .field("objects", &self.names.objects.len())
            .field("attributes", &self.names.attributes.len())
            .field("filters", &self.filters.len())
            .finish()
    }
}

impl SchemaMapping {
    /// Build a mapping from flavor defaults plus optional overrides
    ///
    /// Every resolved name is checked against attribute-description syntax
    /// here; nothing downstream re-validates.
    pub fn new(flavor: Arc<dyn SchemaFlavor>, overrides: Option<&SchemaOverrides>) -> Result<Self> {
        let mut names = ResolvedNames::default();

        for id in ObjectId::ALL {
            let resolved = match overrides.and_then(|o| o.objects.get(&id)) {
                Some(value) => value.clone(),
                None => flavor.default_object_class(id).map(str::to_string),
            };
            if let Some(class) = resolved {
                if !is_valid_attribute_name(&class) {
                    return Err(Error::InvalidSchema(format!(
                        "invalid object class '{}' for {}",
                        class, id
                    )));
                }
                names.objects.insert(id, class);
            }
        }

        for id in AttributeId::ALL {
            let resolved = match overrides.and_then(|o| o.attributes.get(&id)) {
                Some(value) => value.clone(),
                None => flavor.default_attribute(id).map(str::to_string),
            };
            if let Some(attr) = resolved {
                if !is_valid_attribute_name(&attr) {
                    return Err(Error::InvalidSchema(format!(
                        "invalid attribute name '{}' for {}",
                        attr, id
                    )));
                }
                names.attributes.insert(id, attr);
            }
        }

        let filters = QueryKind::ALL
            .iter()
            .filter_map(|kind| {
                flavor
                    .build_filter(*kind, &names)
                    .map(|f| (*kind, FilterTemplate::new(f)))
            })
            .collect::<HashMap<_, _>>();

        debug!(
            "Built {} schema mapping: {} objects, {} attributes, {} filters",
            flavor.name(),
            names.objects.len(),
            names.attributes.len(),
            filters.len()
        );

        Ok(Self {
            flavor,
            names,
            filters,
        })
    }

    /// Pick the flavor a provider kind speaks
    pub fn for_provider(kind: ProviderKind, overrides: Option<&SchemaOverrides>) -> Result<Self> {
        let flavor: Arc<dyn SchemaFlavor> = match kind {
            ProviderKind::ActiveDirectory | ProviderKind::LdapWithAdMapping => {
                Arc::new(ActiveDirectoryFlavor)
            }
            ProviderKind::Ldap => Arc::new(OpenLdapFlavor),
            ProviderKind::LocalOs => {
                return Err(Error::NotImplemented(
                    "local OS provider has no directory schema".to_string(),
                ))
            }
        };
        Self::new(flavor, overrides)
    }

    pub fn active_directory() -> Result<Self> {
        Self::new(Arc::new(ActiveDirectoryFlavor), None)
    }

    pub fn open_ldap() -> Result<Self> {
        Self::new(Arc::new(OpenLdapFlavor), None)
    }

    pub fn flavor_name(&self) -> &'static str {
        self.flavor.name()
    }

    pub fn object_class(&self, id: ObjectId) -> Option<&str> {
        self.names.object_class(id)
    }

    pub fn attribute(&self, id: AttributeId) -> Option<&str> {
        self.names.attribute(id)
    }

    /// Like [`attribute`](Self::attribute) but unmapped is an error
    pub fn require_attribute(&self, id: AttributeId) -> Result<&str> {
        self.attribute(id)
            .ok_or_else(|| Error::NoAttributeMapping(id.to_string()))
    }

    pub fn filter(&self, kind: QueryKind) -> Option<&FilterTemplate> {
        self.filters.get(&kind)
    }

    pub fn supports(&self, kind: QueryKind) -> bool {
        self.filters.contains_key(&kind)
    }

    /// Render the template for `kind`, failing if the backend can't express it
    pub fn render(&self, kind: QueryKind, args: &[&str]) -> Result<String> {
        self.filter(kind)
            .ok_or_else(|| {
                Error::UnsupportedQuery(format!("{:?} for {} schema", kind, self.flavor.name()))
            })?
            .render(args)
    }

    /// Link attribute configured for a link id
    pub fn link(&self, id: AttributeId) -> Option<LinkAttribute> {
        if !id.is_link() {
            return None;
        }
        self.attribute(id).map(|name| {
            if Self::is_dn_attribute(name) {
                LinkAttribute::ByDn
            } else {
                LinkAttribute::ByIdentifier(name.to_string())
            }
        })
    }

    pub fn is_dn_attribute(name: &str) -> bool {
        name.eq_ignore_ascii_case(DN_LINK)
    }

    pub fn does_link_exist(&self, id: AttributeId) -> bool {
        self.link(id).is_some()
    }

    /// Backend names for the given ids, skipping unmapped ones
    pub fn attributes_for(&self, ids: &[AttributeId]) -> Vec<String> {
        ids.iter()
            .filter_map(|id| self.attribute(*id))
            .filter(|name| !Self::is_dn_attribute(name))
            .map(str::to_string)
            .collect()
    }
}
