//! Integration tests for principal resolution against an in-memory directory.
//!
//! The fake serves a handful of domains through the public transport traits and evaluates the
//! subset of LDAP filter syntax the engine produces.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use addir::{
    filter, ConnectTarget, DirectoryConfig, DirectoryEntry, DirectorySession, DirectoryTransport,
    Error, NetbiosMap, Principal, PrincipalSearchType, Result, SearchMode, SearchScope,
    UserDirectory,
};
use async_trait::async_trait;

const PERSON: &str = "CN=Person,CN=Schema,CN=Configuration,DC=corp,DC=local";
const GROUP: &str = "CN=Group,CN=Schema,CN=Configuration,DC=corp,DC=local";

/// In-memory directory servers keyed by domain name.
#[derive(Default)]
struct FakeDirectory {
    servers: HashMap<String, Vec<DirectoryEntry>>,
    passwords: HashMap<String, String>,
    connects: Mutex<Vec<String>>,
}

impl FakeDirectory {
    fn domain(mut self, domain: &str, entries: Vec<DirectoryEntry>) -> Self {
        self.servers
            .entry(domain.to_lowercase())
            .or_default()
            .extend(entries);
        self
    }

    fn password(mut self, dn: &str, password: &str) -> Self {
        self.passwords.insert(dn.to_lowercase(), password.to_string());
        self
    }

    fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }
}

struct FakeTransport(Arc<FakeDirectory>);

#[async_trait]
impl DirectoryTransport for FakeTransport {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn DirectorySession>> {
        let host = target.host.clone().unwrap_or_default().to_lowercase();
        self.0.connects.lock().unwrap().push(host.clone());
        if !self.0.servers.contains_key(&host) {
            return Err(Error::ldap(format!("no route to {host}")));
        }
        Ok(Box::new(FakeSession {
            directory: Arc::clone(&self.0),
            host,
            bound: false,
        }))
    }
}

struct FakeSession {
    directory: Arc<FakeDirectory>,
    host: String,
    bound: bool,
}

#[async_trait]
impl DirectorySession for FakeSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        let expected = self.directory.passwords.get(&dn.to_lowercase());
        if password.is_empty() || expected.map(String::as_str) != Some(password) {
            return Err(Error::InvalidCredentials);
        }
        self.bound = true;
        Ok(())
    }

    async fn default_bind(&mut self) -> Result<()> {
        self.bound = true;
        Ok(())
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        _attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>> {
        assert!(self.bound, "search on an unbound session");
        let (parsed, rest) = parse_filter(filter);
        assert!(rest.is_empty(), "trailing filter text: {rest}");

        let entries = &self.directory.servers[&self.host];
        Ok(entries
            .iter()
            .filter(|entry| in_scope(&entry.dn, base_dn, scope))
            .filter(|entry| parsed.matches(entry))
            .cloned()
            .collect())
    }

    async fn unbind(&mut self) -> Result<()> {
        self.bound = false;
        Ok(())
    }
}

fn in_scope(dn: &str, base: &str, scope: SearchScope) -> bool {
    let (dn, base) = (dn.to_lowercase(), base.to_lowercase());
    match scope {
        SearchScope::Base => dn == base,
        SearchScope::OneLevel => dn.split_once(',').is_some_and(|(_, parent)| parent == base),
        SearchScope::Subtree => {
            !base.is_empty() && (dn == base || dn.ends_with(&format!(",{base}")))
        }
    }
}

enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Present(String),
    Equal(String, String),
    Prefix(String, String),
}

impl Filter {
    fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Self::And(children) => children.iter().all(|c| c.matches(entry)),
            Self::Or(children) => children.iter().any(|c| c.matches(entry)),
            Self::Present(attribute) => {
                attribute.eq_ignore_ascii_case("objectClass") || entry.values(attribute).is_some()
            }
            // The fake keeps the category short names in objectClass.
            Self::Equal(attribute, value) if attribute.eq_ignore_ascii_case("objectCategory") => {
                values(entry, "objectClass").any(|v| v.eq_ignore_ascii_case(value))
            }
            Self::Equal(attribute, value) => {
                values(entry, attribute).any(|v| v.eq_ignore_ascii_case(value))
            }
            Self::Prefix(attribute, prefix) => {
                let prefix = prefix.to_lowercase();
                values(entry, attribute).any(|v| v.to_lowercase().starts_with(&prefix))
            }
        }
    }
}

fn values<'a>(entry: &'a DirectoryEntry, attribute: &str) -> impl Iterator<Item = &'a String> {
    entry.values(attribute).unwrap_or_default().iter()
}

fn parse_filter(input: &str) -> (Filter, &str) {
    let rest = input.strip_prefix('(').expect("filter must start with '('");
    if let Some(op) = rest.chars().next().filter(|c| *c == '&' || *c == '|') {
        let mut rest = &rest[1..];
        let mut children = Vec::new();
        while !rest.starts_with(')') {
            let (child, remaining) = parse_filter(rest);
            children.push(child);
            rest = remaining;
        }
        let node = if op == '&' {
            Filter::And(children)
        } else {
            Filter::Or(children)
        };
        return (node, &rest[1..]);
    }

    let end = rest.find(')').expect("unterminated filter");
    let (attribute, value) = rest[..end].split_once('=').expect("missing '='");
    let attribute = attribute.to_string();
    let node = if value == "*" {
        Filter::Present(attribute)
    } else if let Some(prefix) = value.strip_suffix('*') {
        Filter::Prefix(attribute, filter::unescape(prefix))
    } else {
        Filter::Equal(attribute, filter::unescape(value))
    };
    (node, &rest[end + 1..])
}

fn root_dse(domain_root: &str) -> DirectoryEntry {
    DirectoryEntry::new("")
        .with_attribute("defaultNamingContext", [domain_root])
        .with_attribute("rootDomainNamingContext", ["DC=corp,DC=local"])
        .with_attribute("configurationNamingContext", ["CN=Configuration,DC=corp,DC=local"])
}

fn user(dn: &str, account: &str, groups: &[&str]) -> DirectoryEntry {
    DirectoryEntry::new(dn)
        .with_attribute("sAMAccountName", [account])
        .with_attribute("userPrincipalName", [format!("{account}@corp.local")])
        .with_attribute("objectClass", ["top", "person", "organizationalPerson", "user"])
        .with_attribute("objectCategory", [PERSON])
        .with_attribute("memberOf", groups.iter().copied())
}

fn group(dn: &str, name: &str, groups: &[&str]) -> DirectoryEntry {
    DirectoryEntry::new(dn)
        .with_attribute("sAMAccountName", [name])
        .with_attribute("name", [name])
        .with_attribute("objectClass", ["top", "group"])
        .with_attribute("objectCategory", [GROUP])
        .with_attribute("memberOf", groups.iter().copied())
}

fn trust(domain_root: &str, partner: &str, direction: u32) -> DirectoryEntry {
    DirectoryEntry::new(format!("CN={partner},CN=System,{domain_root}"))
        .with_attribute("objectClass", ["top", "trustedDomain"])
        .with_attribute("trustPartner", [partner])
        .with_attribute("trustDirection", [direction.to_string()])
}

const ALICE: &str = "CN=Alice,OU=People,DC=a,DC=local";
const BOB: &str = "CN=Bob,OU=People,DC=b,DC=local";
const CAROL: &str = "CN=Carol,OU=People,DC=corp,DC=local";
const DAVE: &str = "CN=Dave,OU=People,DC=eu,DC=corp,DC=local";
const GROUP_A: &str = "CN=A,OU=Groups,DC=corp,DC=local";
const GROUP_B: &str = "CN=B,OU=Groups,DC=corp,DC=local";

fn fixture() -> Arc<FakeDirectory> {
    Arc::new(
        FakeDirectory::default()
            .domain(
                "a.local",
                vec![root_dse("DC=a,DC=local"), user(ALICE, "alice", &[])],
            )
            .domain(
                "b.local",
                vec![
                    root_dse("DC=b,DC=local"),
                    user(BOB, "bob", &[]),
                    user("CN=Alina,OU=People,DC=b,DC=local", "alina", &[]),
                ],
            )
            .domain(
                "corp.local",
                vec![
                    root_dse("DC=corp,DC=local"),
                    user(CAROL, "carol", &[GROUP_A]),
                    group(GROUP_A, "A", &[GROUP_B]),
                    group(GROUP_B, "B", &[GROUP_A]),
                    trust("DC=corp,DC=local", "in.local", 1),
                    trust("DC=corp,DC=local", "out.local", 2),
                    trust("DC=corp,DC=local", "both.local", 3),
                    DirectoryEntry::new("CN=CORPEU,CN=Partitions,CN=Configuration,DC=corp,DC=local")
                        .with_attribute("nETBIOSName", ["CORPEU"])
                        .with_attribute("dnsRoot", ["eu.corp.local"]),
                ],
            )
            .domain(
                "eu.corp.local",
                vec![root_dse("DC=eu,DC=corp,DC=local"), user(DAVE, "dave", &[])],
            )
            .password(ALICE, "alice-secret")
            .password(DAVE, "dave-secret"),
    )
}

fn directory(config: DirectoryConfig, fake: &Arc<FakeDirectory>) -> UserDirectory {
    UserDirectory::with_transport(config, Arc::new(FakeTransport(Arc::clone(fake))))
        .expect("valid configuration")
}

fn names(principals: &[Principal]) -> Vec<String> {
    principals.iter().map(|p| p.id().to_string()).collect()
}

#[tokio::test]
async fn test_lookup_stops_at_first_matching_domain() {
    let fake = fixture();
    let directory = directory(
        DirectoryConfig::new().with_specific_domains(["a.local", "b.local"]),
        &fake,
    );

    let alice = directory.try_get_user("alice").await.expect("alice exists");
    assert_eq!(alice.id().to_string(), "alice@a.local");
    assert_eq!(fake.connects(), vec!["a.local"]);

    let bob = directory.try_get_user("BOB").await.expect("bob exists");
    assert_eq!(bob.id().to_string(), "bob@b.local");
    assert_eq!(fake.connects(), vec!["a.local", "a.local", "b.local"]);
}

#[tokio::test]
async fn test_unreachable_domain_is_skipped() {
    let fake = fixture();
    let directory = directory(
        DirectoryConfig::new().with_specific_domains(["down.local", "b.local"]),
        &fake,
    );

    let bob = directory.try_get_user("bob").await.expect("bob exists");
    assert_eq!(bob.id().domain_alias(), "b.local");
    assert!(directory.try_get_user("nobody").await.is_none());
}

#[tokio::test]
async fn test_trusted_domains_exclude_outbound_trusts() {
    let fake = fixture();
    let directory = directory(
        DirectoryConfig::new()
            .with_search_mode(SearchMode::TrustedDomains)
            .with_current_domain("corp.local"),
        &fake,
    );

    let domains: Vec<&str> = directory.domains().await.iter().collect();
    assert_eq!(domains, vec!["corp.local", "in.local", "both.local"]);
}

#[tokio::test]
async fn test_cyclic_group_membership_closure() {
    let fake = fixture();
    let directory = directory(
        DirectoryConfig::new()
            .with_current_domain("corp.local")
            .with_recursive_search(true),
        &fake,
    );

    let carol = directory.try_get_user("carol").await.expect("carol exists");
    assert_eq!(carol.group_names().await, vec!["A@corp.local", "B@corp.local"]);
    assert!(carol.is_member_of_group("b").await);
    assert!(carol.is_member_of_group("A@CORP.LOCAL").await);
    assert!(!carol.is_member_of_group("B@other.local").await);

    // Membership is cached on the user after the first computation.
    let before = fake.connects().len();
    assert!(carol.is_member_of_group("A").await);
    assert_eq!(fake.connects().len(), before);

    let group_a = directory.try_get_group("A").await.expect("group A exists");
    let members = directory.group_members(&group_a).await;
    let mut member_names = names(&members);
    member_names.sort();
    assert_eq!(member_names, vec!["B@corp.local", "carol@corp.local"]);
}

#[tokio::test]
async fn test_direct_membership_without_recursion() {
    let fake = fixture();
    let directory = directory(
        DirectoryConfig::new().with_current_domain("corp.local"),
        &fake,
    );

    assert!(directory.is_member_of_group("carol", "A").await);
    assert!(!directory.is_member_of_group("carol", "B").await);
    assert!(!directory.is_member_of_group("nobody", "A").await);
}

#[tokio::test]
async fn test_free_text_search_is_lazy_per_domain() {
    let fake = fixture();
    let directory = directory(
        DirectoryConfig::new().with_specific_domains(["a.local", "b.local"]),
        &fake,
    );

    let mut search = directory.find_users("ali");
    assert!(fake.connects().is_empty());

    let first = search.next().await.expect("first result");
    assert_eq!(first.id().to_string(), "alice@a.local");
    assert_eq!(fake.connects(), vec!["a.local"]);

    let second = search.next().await.expect("second result");
    assert_eq!(second.id().to_string(), "alina@b.local");
    assert!(search.next().await.is_none());
    assert_eq!(fake.connects(), vec!["a.local", "b.local"]);
}

#[tokio::test]
async fn test_free_text_search_escapes_input() {
    let fake = fixture();
    let directory = directory(
        DirectoryConfig::new().with_specific_domains(["a.local", "b.local"]),
        &fake,
    );

    let found = directory
        .find_principals("*)(", PrincipalSearchType::UsersAndGroups)
        .collect_all()
        .await;
    assert!(found.is_empty());

    let everyone = directory
        .find_principals("", PrincipalSearchType::UsersAndGroups)
        .collect_all()
        .await;
    assert_eq!(names(&everyone), vec!["alice@a.local", "bob@b.local", "alina@b.local"]);
}

#[tokio::test]
async fn test_credential_validation() {
    let fake = fixture();
    let directory = directory(
        DirectoryConfig::new().with_specific_domains(["a.local", "b.local"]),
        &fake,
    );

    let alice = directory
        .try_get_and_validate_user("alice", "alice-secret")
        .await
        .expect("valid credentials");
    assert_eq!(alice.id().principal(), "alice");

    assert!(directory.try_get_and_validate_user("alice", "wrong").await.is_none());
    assert!(directory.try_get_and_validate_user("alice", "").await.is_none());
    assert!(directory.try_get_and_validate_user("nobody", "x").await.is_none());
    assert!(directory.try_get_and_validate_user("bob", "anything").await.is_none());
}

#[tokio::test]
async fn test_netbios_login_resolution() {
    let fake = fixture();
    let directory = directory(
        DirectoryConfig::new().with_current_domain("corp.local"),
        &fake,
    );

    let id = directory
        .try_parse_login_name("CORPEU\\dave")
        .await
        .expect("parsable login");
    assert_eq!(id.to_string(), "dave@eu.corp.local");
    let lookups = fake.connects().len();

    let dave = directory
        .try_get_and_validate_user("corpeu\\dave", "dave-secret")
        .await
        .expect("valid credentials");
    assert_eq!(dave.id().to_string(), "dave@eu.corp.local");
    assert!(!fake.connects()[lookups..].contains(&"corp.local".to_string()));
}

#[tokio::test]
async fn test_netbios_static_overrides() {
    let fake = fixture();
    let directory = directory(
        DirectoryConfig::new()
            .with_current_domain("corp.local")
            .with_netbios_overrides(NetbiosMap::parse("BRANCH=b.local")),
        &fake,
    );

    let bob = directory.try_get_user("branch\\bob").await.expect("bob exists");
    assert_eq!(bob.id().to_string(), "bob@b.local");
    assert_eq!(fake.connects(), vec!["b.local"]);
}
