//! Shared test fixtures

use std::collections::BTreeMap;
use std::sync::Arc;

use warden_core::config::{AuthType, IdentityStoreConfig, PoolConfig, ProviderKind};
use warden_core::types::{AttributeId, ObjectId, SchemaOverrides};

use crate::connection::DirectoryEntry;
use crate::memory::MemoryDirectory;
use crate::pool::ConnectionPoolManager;
use crate::store::StoreContext;

pub const AD_SERVICE_DN: &str = "CN=svc,CN=Users,DC=acme,DC=local";
pub const LDAP_SERVICE_DN: &str = "cn=admin,dc=example,dc=org";
pub const AD_PARTITIONS_DN: &str = "CN=Partitions,CN=Configuration,DC=acme,DC=local";

pub fn ad_store() -> IdentityStoreConfig {
    IdentityStoreConfig {
        name: "acme.local".into(),
        alias: Some("ACME".into()),
        provider: ProviderKind::ActiveDirectory,
        connection_strings: vec!["ldap://dc1.acme.local".into()],
        auth_type: AuthType::Simple,
        username: Some(AD_SERVICE_DN.into()),
        password: Some("secret".into()),
        user_base_dn: "CN=Users,DC=acme,DC=local".into(),
        group_base_dn: "CN=Groups,DC=acme,DC=local".into(),
        attribute_map: BTreeMap::new(),
        schema: None,
        flags: 0,
        trusted_certificates: Vec::new(),
        use_global_catalog: false,
    }
}

pub fn ldap_store() -> IdentityStoreConfig {
    IdentityStoreConfig {
        name: "example.org".into(),
        alias: None,
        provider: ProviderKind::Ldap,
        connection_strings: vec!["ldap://ldap.example.org".into()],
        auth_type: AuthType::Simple,
        username: Some(LDAP_SERVICE_DN.into()),
        password: Some("admin".into()),
        user_base_dn: "ou=people,dc=example,dc=org".into(),
        group_base_dn: "ou=groups,dc=example,dc=org".into(),
        attribute_map: BTreeMap::new(),
        schema: None,
        flags: 0,
        trusted_certificates: Vec::new(),
        use_global_catalog: false,
    }
}

/// OpenLDAP with posixGroup memberUid links
pub fn posix_store() -> IdentityStoreConfig {
    let mut store = ldap_store();
    store.schema = Some(
        SchemaOverrides::new()
            .object(ObjectId::Group, "posixGroup")
            .attribute(AttributeId::GroupMembersList, "memberUid")
            .attribute(AttributeId::UserGroupMembersListLink, "uid")
            .unmapped_attribute(AttributeId::GroupGroupMembersListLink),
    );
    store
}

fn ad_user(cn: &str, account: &str, first: &str, last: &str, rid: u32, flags: u32) -> DirectoryEntry {
    let sid = format!("S-1-5-21-100-{}", rid);
    let upn = format!("{}@acme.local", account);
    let mail = format!("{}@acme.example", account);
    let display = format!("{} {}", first, last);
    let flags = flags.to_string();
    DirectoryEntry::new(format!("CN={},CN=Users,DC=acme,DC=local", cn))
        .with("objectClass", &["top", "person", "user"])
        .with("cn", &[cn])
        .with("sAMAccountName", &[account])
        .with("givenName", &[first])
        .with("sn", &[last])
        .with("displayName", &[display.as_str()])
        .with("mail", &[mail.as_str()])
        .with("userPrincipalName", &[upn.as_str()])
        .with("objectSid", &[sid.as_str()])
        .with("userAccountControl", &[flags.as_str()])
}

fn ad_group(dn: &str, name: &str, rid: u32, description: &str, members: &[&str]) -> DirectoryEntry {
    let sid = format!("S-1-5-21-100-{}", rid);
    DirectoryEntry::new(dn)
        .with("objectClass", &["top", "group"])
        .with("cn", &[name])
        .with("sAMAccountName", &[name])
        .with("objectSid", &[sid.as_str()])
        .with("description", &[description])
        .with("member", members)
}

fn groups_dn(name: &str) -> String {
    format!("CN={},CN=Groups,DC=acme,DC=local", name)
}

/// AD tenant with a membership cycle: NG14 is in NG16, NG16 in NG15, NG15 in NG14
///
/// The rootDSE points at a partitions container registering two extra UPN
/// suffixes.
pub fn ad_directory() -> MemoryDirectory {
    let dir = MemoryDirectory::new();

    dir.add_entry(
        DirectoryEntry::new("")
            .with("objectClass", &["top"])
            .with("configurationNamingContext", &["CN=Configuration,DC=acme,DC=local"])
            .with("rootDomainNamingContext", &["DC=acme,DC=local"]),
    );
    dir.add_entry(
        DirectoryEntry::new(AD_PARTITIONS_DN)
            .with("objectClass", &["top", "crossRefContainer"])
            .with("uPNSuffixes", &["Acme.Example", "corp.acme.local"]),
    );

    dir.add_entry(
        DirectoryEntry::new(AD_SERVICE_DN)
            .with("objectClass", &["top", "person", "user"])
            .with("sAMAccountName", &["svc"])
            .with("objectSid", &["S-1-5-21-100-500"])
            .with("userPassword", &["secret"]),
    );

    let jdoe = ad_user("Jane Doe", "jdoe", "Jane", "Doe", 1001, 0x200)
        .with("description", &["Engineering lead"])
        .with("userPassword", &["Passw0rd"]);
    let bsmith = ad_user("Bob Smith", "bsmith", "Bob", "Smith", 1002, 0x202)
        .with("userPassword", &["hunter2"]);
    let asmith = ad_user("Alice Smith", "asmith", "Alice", "Smith", 1003, 0x200)
        .with("lockoutTime", &["133497000000000000"])
        .with("userPassword", &["alice"]);
    let (jdoe_dn, bsmith_dn, asmith_dn) = (jdoe.dn.clone(), bsmith.dn.clone(), asmith.dn.clone());
    dir.add_entry(jdoe);
    dir.add_entry(bsmith);
    dir.add_entry(asmith);

    let (eng, backend) = (groups_dn("Engineering"), groups_dn("Backend"));
    let (ng14, ng15, ng16) = (groups_dn("NG14"), groups_dn("NG15"), groups_dn("NG16"));

    dir.add_entry(ad_group(
        &eng,
        "Engineering",
        2001,
        "Engineering staff",
        &[jdoe_dn.as_str(), bsmith_dn.as_str(), backend.as_str()],
    ));
    dir.add_entry(ad_group(&backend, "Backend", 2002, "Backend team", &[asmith_dn.as_str()]));
    dir.add_entry(ad_group(&ng14, "NG14", 2014, "Nested 14", &[jdoe_dn.as_str(), ng15.as_str()]));
    dir.add_entry(ad_group(&ng15, "NG15", 2015, "Nested 15", &[ng16.as_str()]));
    dir.add_entry(ad_group(&ng16, "NG16", 2016, "Nested 16", &[ng14.as_str()]));
    dir.add_entry(ad_group(
        "CN=Domain Admins,OU=Builtin,DC=acme,DC=local",
        "Domain Admins",
        512,
        "Administrators",
        &[ng14.as_str()],
    ));

    dir
}

fn person(uid: &str, first: &str, last: &str, password: &str, n: u32) -> DirectoryEntry {
    let cn = format!("{} {}", first, last);
    let mail = format!("{}@example.org", uid);
    let uuid = format!("6f1c{:04}-0000-4000-8000-000000000000", n);
    DirectoryEntry::new(format!("uid={},ou=people,dc=example,dc=org", uid))
        .with("objectClass", &["top", "person", "inetOrgPerson"])
        .with("uid", &[uid])
        .with("cn", &[cn.as_str()])
        .with("displayName", &[cn.as_str()])
        .with("givenName", &[first])
        .with("sn", &[last])
        .with("mail", &[mail.as_str()])
        .with("entryUUID", &[uuid.as_str()])
        .with("userPassword", &[password])
}

fn ldap_base(dir: &MemoryDirectory) {
    dir.add_entry(
        DirectoryEntry::new(LDAP_SERVICE_DN)
            .with("objectClass", &["organizationalRole", "simpleSecurityObject"])
            .with("cn", &["admin"])
            .with("userPassword", &["admin"]),
    );
    dir.add_entry(person("jdoe", "Jane", "Doe", "Passw0rd", 1));
    dir.add_entry(person("rroe", "Richard", "Roe", "roe123", 2));
}

/// OpenLDAP tenant with groupOfUniqueNames: jdoe is in developers, developers in staff
pub fn ldap_directory() -> MemoryDirectory {
    let dir = MemoryDirectory::new();
    ldap_base(&dir);
    dir.add_entry(
        DirectoryEntry::new("cn=developers,ou=groups,dc=example,dc=org")
            .with("objectClass", &["groupOfUniqueNames"])
            .with("cn", &["developers"])
            .with("description", &["Developers"])
            .with(
                "uniqueMember",
                &[
                    "uid=jdoe,ou=people,dc=example,dc=org",
                    "uid=rroe,ou=people,dc=example,dc=org",
                ],
            ),
    );
    dir.add_entry(
        DirectoryEntry::new("cn=staff,ou=groups,dc=example,dc=org")
            .with("objectClass", &["groupOfUniqueNames"])
            .with("cn", &["staff"])
            .with("uniqueMember", &["cn=developers,ou=groups,dc=example,dc=org"]),
    );
    dir
}

/// OpenLDAP tenant with posixGroup memberUid lists
pub fn posix_directory() -> MemoryDirectory {
    let dir = MemoryDirectory::new();
    ldap_base(&dir);
    dir.add_entry(
        DirectoryEntry::new("cn=developers,ou=groups,dc=example,dc=org")
            .with("objectClass", &["posixGroup"])
            .with("cn", &["developers"])
            .with("memberUid", &["jdoe", "rroe"]),
    );
    dir.add_entry(
        DirectoryEntry::new("cn=ops,ou=groups,dc=example,dc=org")
            .with("objectClass", &["posixGroup"])
            .with("cn", &["ops"])
            .with("memberUid", &["rroe"]),
    );
    dir
}

/// Pool manager with the tenant's pool created, plus the store context
pub fn setup(
    tenant: &str,
    store: IdentityStoreConfig,
    dir: MemoryDirectory,
) -> (Arc<ConnectionPoolManager>, Arc<StoreContext>) {
    let pools = Arc::new(ConnectionPoolManager::new(Arc::new(dir), PoolConfig::default()));
    pools.create_pool(tenant);
    let ctx = StoreContext::new(tenant, store).unwrap();
    (pools, Arc::new(ctx))
}
