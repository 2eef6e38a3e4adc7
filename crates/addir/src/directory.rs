//! Principal lookup, free-text search and credential validation across the configured domains.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use addir_core::{DirectoryConfig, Error, Result};

use crate::dn::DistinguishedName;
use crate::domains::{DomainResolver, DomainSet};
use crate::filter;
use crate::group::{Group, Principal};
use crate::membership::Membership;
use crate::principal::{GroupId, PrincipalId, PrincipalSearchType, UserId};
use crate::session::{close, Connector};
use crate::transport::{select_transport, DirectoryEntry, DirectoryTransport, SearchScope};
use crate::user::User;

/// Directory of users and groups spanning one or more domains.
///
/// # Examples
///
/// ```no_run
/// use addir::{DirectoryConfig, SearchMode, UserDirectory};
///
/// # async fn example() -> addir::Result<()> {
/// let config = DirectoryConfig::new()
///     .with_search_mode(SearchMode::TrustedDomains)
///     .with_recursive_search(true);
/// let directory = UserDirectory::new(config)?;
///
/// if let Some(user) = directory.try_get_user("alice@kramerica.local").await {
///     println!("{:?}", user.group_names().await);
/// }
/// # Ok(())
/// # }
/// ```
pub struct UserDirectory {
    connector: Connector,
    resolver: DomainResolver,
    membership: Arc<Membership>,
    attributes: Vec<String>,
}

impl UserDirectory {
    /// Creates a directory using the transport selected by the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] if a setting is out of range, or
    /// [`Error::ConfigError`] if the configuration requests a transport that is not available
    /// on this platform.
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        let config = config.validated()?;
        let transport = select_transport(&config)?;
        Ok(Self::build(config, transport))
    }

    /// Creates a directory over an explicit transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] if a setting is out of range.
    pub fn with_transport(
        config: DirectoryConfig,
        transport: Arc<dyn DirectoryTransport>,
    ) -> Result<Self> {
        Ok(Self::build(config.validated()?, transport))
    }

    fn build(config: DirectoryConfig, transport: Arc<dyn DirectoryTransport>) -> Self {
        info!(
            search_mode = ?config.search_mode,
            recursive = config.search_recursively,
            "initializing user directory"
        );
        let attributes = config.attributes.all();
        let connector = Connector::new(Arc::new(config), transport);
        Self {
            resolver: DomainResolver::new(connector.clone()),
            membership: Arc::new(Membership::new(connector.clone())),
            connector,
            attributes,
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &DirectoryConfig {
        self.connector.config()
    }

    /// Domain and NETBIOS resolution used by this directory.
    #[must_use]
    pub fn resolver(&self) -> &DomainResolver {
        &self.resolver
    }

    /// Domains searched by unqualified lookups.
    pub async fn domains(&self) -> &DomainSet {
        self.resolver.domains().await
    }

    /// Looks up a single principal by exact name.
    ///
    /// `name@domain` searches only that domain; a bare name searches each domain in turn and
    /// returns the first match. Domains that fail are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] for [`PrincipalSearchType::UsersAndGroups`]: an exact
    /// lookup must name the kind of principal it wants.
    pub async fn try_get_principal(
        &self,
        name: &str,
        search_type: PrincipalSearchType,
    ) -> Result<Option<Principal>> {
        if search_type == PrincipalSearchType::UsersAndGroups {
            return Err(Error::ConfigError(
                "exact lookups must search either users or groups".to_string(),
            ));
        }

        let (bare, domains) = match PrincipalId::parse(name) {
            Some(id) => (id.principal().to_string(), vec![id.domain_alias().to_string()]),
            None => (
                name.to_string(),
                self.domains().await.iter().map(str::to_owned).collect(),
            ),
        };

        let config = self.config();
        let lookup = match search_type {
            PrincipalSearchType::Users => filter::user_lookup_filter(
                &config.attributes,
                &bare,
                config.include_group_managed_service_accounts,
            ),
            _ => filter::group_lookup_filter(&config.attributes, &bare),
        };

        for domain in &domains {
            let entries = match self
                .connector
                .search(
                    Some(domain.as_str()),
                    &filter::search_path(domain),
                    SearchScope::Subtree,
                    &lookup,
                    &self.attributes,
                )
                .await
            {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(domain = %domain, error = %err, "principal lookup failed");
                    continue;
                }
            };

            let found = entries
                .iter()
                .filter_map(|entry| self.principal_from_entry(entry))
                .find(|principal| matches_type(principal, search_type));
            if found.is_some() {
                return Ok(found);
            }
        }

        debug!(name, "principal not found");
        Ok(None)
    }

    /// Looks up a user by `name`, `name@domain` or `NETBIOS\name`.
    pub async fn try_get_user(&self, name: &str) -> Option<User> {
        let name = self.qualify_login(name).await;
        self.try_get_principal(&name, PrincipalSearchType::Users)
            .await
            .ok()
            .flatten()
            .and_then(Principal::into_user)
    }

    /// Looks up a group by `name` or `name@domain`.
    pub async fn try_get_group(&self, name: &str) -> Option<Group> {
        self.try_get_principal(name, PrincipalSearchType::Groups)
            .await
            .ok()
            .flatten()
            .and_then(Principal::into_group)
    }

    /// Starts a free-text prefix search across the domain set.
    ///
    /// Nothing is queried until the returned cursor is advanced, and each domain is queried
    /// only once the previous one's results have been consumed.
    #[must_use]
    pub fn find_principals(
        &self,
        term: &str,
        search_type: PrincipalSearchType,
    ) -> PrincipalSearch<'_> {
        let config = self.config();
        PrincipalSearch {
            directory: self,
            filter: filter::free_text_filter(
                &config.attributes,
                term,
                search_type,
                config.include_group_managed_service_accounts,
            ),
            search_type,
            domains: None,
            batch: VecDeque::new(),
        }
    }

    /// Free-text search restricted to users.
    #[must_use]
    pub fn find_users(&self, term: &str) -> PrincipalSearch<'_> {
        self.find_principals(term, PrincipalSearchType::Users)
    }

    /// Free-text search restricted to groups.
    #[must_use]
    pub fn find_groups(&self, term: &str) -> PrincipalSearch<'_> {
        self.find_principals(term, PrincipalSearchType::Groups)
    }

    /// Parses `NETBIOS\name` or `name@domain` into a user identity.
    ///
    /// NETBIOS names that cannot be mapped to a DNS name are used as the domain unchanged.
    pub async fn try_parse_login_name(&self, login: &str) -> Option<UserId> {
        match login.split_once('\\') {
            Some((netbios, name)) => {
                let (netbios, name) = (netbios.trim(), name.trim());
                if netbios.is_empty() || name.is_empty() {
                    return None;
                }
                let domain = self
                    .resolver
                    .domain_name_from_netbios(netbios)
                    .await
                    .unwrap_or_else(|| netbios.to_string());
                Some(UserId::new(name, domain))
            }
            None => UserId::parse(login),
        }
    }

    /// Returns the user if `password` is valid for them.
    ///
    /// Unknown users, wrong passwords and directory failures all yield `None`.
    pub async fn try_get_and_validate_user(&self, name: &str, password: &str) -> Option<User> {
        let user = self.try_get_user(name).await?;
        let dn = user.id().distinguished_name()?.as_str().to_owned();
        match self
            .verify_password(user.id().domain_alias(), &dn, password)
            .await
        {
            Ok(()) => {
                debug!(user = %user.id(), "credentials validated");
                Some(user)
            }
            Err(err) if err.should_log() => {
                warn!(user = %user.id(), code = err.error_code(), "credential validation failed");
                None
            }
            Err(err) => {
                debug!(user = %user.id(), code = err.error_code(), "credential validation failed");
                None
            }
        }
    }

    async fn verify_password(&self, domain: &str, dn: &str, password: &str) -> Result<()> {
        let mut session = self.connector.connect(Some(domain)).await?;
        let result = match session.simple_bind(dn, password).await {
            Ok(()) => session
                .search(
                    dn,
                    SearchScope::Base,
                    "(objectClass=*)",
                    std::slice::from_ref(&self.config().attributes.account_name),
                )
                .await
                .map(|_| ()),
            Err(err) => Err(err),
        };
        close(session.as_mut()).await;
        result
    }

    /// Returns true if the named user belongs to the named group.
    ///
    /// A bare group name is taken to be in the user's domain.
    pub async fn is_member_of_group(&self, user: &str, group: &str) -> bool {
        match self.try_get_user(user).await {
            Some(user) => user.is_member_of_group(group).await,
            None => false,
        }
    }

    /// Members of a group: direct ones, or every nested member when recursive search is enabled.
    ///
    /// Only members in the group's own domain are returned.
    pub async fn group_members(&self, group: &Group) -> Vec<Principal> {
        let root = match group.id().distinguished_name() {
            Some(dn) => dn.clone(),
            None => {
                let resolved = self
                    .try_get_group(&group.id().to_fully_qualified_name())
                    .await;
                match resolved.and_then(|g| g.id().distinguished_name().cloned()) {
                    Some(dn) => dn,
                    None => return Vec::new(),
                }
            }
        };

        let recursive = self.config().search_recursively;
        let domain = group.id().domain_alias().to_string();
        let mut seen: HashSet<String> = HashSet::from([root.as_str().to_lowercase()]);
        let mut pending = VecDeque::from([root]);
        let mut members = Vec::new();

        while let Some(parent) = pending.pop_front() {
            let lookup = filter::member_of_filter(&self.config().attributes, parent.as_str());
            let entries = match self
                .connector
                .search(
                    Some(domain.as_str()),
                    &filter::search_path(&domain),
                    SearchScope::Subtree,
                    &lookup,
                    &self.attributes,
                )
                .await
            {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(group = %parent, error = %err, "failed to list group members");
                    continue;
                }
            };

            for entry in &entries {
                if !seen.insert(entry.dn.to_lowercase()) {
                    continue;
                }
                let Some(member) = self.principal_from_entry(entry) else {
                    continue;
                };
                if recursive && !member.is_user() {
                    if let Some(dn) = member.id().distinguished_name() {
                        pending.push_back(dn.clone());
                    }
                }
                members.push(member);
            }
        }

        members
    }

    async fn qualify_login(&self, name: &str) -> String {
        if name.contains('\\') {
            if let Some(id) = self.try_parse_login_name(name).await {
                return id.to_fully_qualified_name();
            }
        }
        name.to_string()
    }

    /// Converts a search result into a principal, discarding entries without a usable name.
    fn principal_from_entry(&self, entry: &DirectoryEntry) -> Option<Principal> {
        let config = self.config();
        let attributes = &config.attributes;
        let categories = entry
            .values(&attributes.object_category)
            .unwrap_or_default();
        let is_user = if categories.iter().any(|c| filter::is_gmsa_category(c)) {
            config.include_group_managed_service_accounts
        } else {
            categories.iter().any(|c| filter::is_person_category(c))
        };

        let account = entry.first(&attributes.account_name);
        let name = if is_user {
            account?
        } else {
            account.or_else(|| entry.first(&attributes.name))?
        };
        let domain = filter::domain_path(&entry.dn);
        if domain.is_empty() {
            debug!(dn = %entry.dn, "skipping entry outside any domain");
            return None;
        }

        let mut id = PrincipalId::new(name, domain);
        if let Ok(dn) = DistinguishedName::parse(&entry.dn) {
            id = id.with_distinguished_name(dn);
        }

        if is_user {
            let mut builder = User::builder(UserId::from(id), Arc::clone(&self.membership));
            if let Some(display_name) = entry.first(&attributes.display_name) {
                builder = builder.display_name(display_name);
            }
            if let Some(email) = entry.first(&attributes.email) {
                builder = builder.email(email);
            }
            if let Some(principal_name) = entry.first(&attributes.principal_name) {
                builder = builder.principal_name(principal_name);
            }
            Some(Principal::User(builder.build()))
        } else {
            let mut group = Group::new(GroupId::from(id));
            if let Some(display_name) = entry.first(&attributes.display_name) {
                group = group.with_display_name(display_name);
            }
            if let Some(email) = entry.first(&attributes.email) {
                group = group.with_email(email);
            }
            Some(Principal::Group(group))
        }
    }
}

impl fmt::Debug for UserDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDirectory")
            .field("config", self.config())
            .finish_non_exhaustive()
    }
}

fn matches_type(principal: &Principal, search_type: PrincipalSearchType) -> bool {
    match search_type {
        PrincipalSearchType::Users => principal.is_user(),
        PrincipalSearchType::Groups => !principal.is_user(),
        PrincipalSearchType::UsersAndGroups => true,
    }
}

/// Lazy cursor over free-text search results.
///
/// Domains are queried one at a time, in domain-set order, as results are pulled. A domain that
/// fails is logged and skipped. The cursor cannot be restarted.
pub struct PrincipalSearch<'a> {
    directory: &'a UserDirectory,
    filter: String,
    search_type: PrincipalSearchType,
    domains: Option<VecDeque<String>>,
    batch: VecDeque<Principal>,
}

impl PrincipalSearch<'_> {
    /// Next matching principal, or `None` once every domain has been searched.
    pub async fn next(&mut self) -> Option<Principal> {
        loop {
            if let Some(principal) = self.batch.pop_front() {
                return Some(principal);
            }

            if self.domains.is_none() {
                let domains = self.directory.domains().await;
                self.domains = Some(domains.iter().map(str::to_owned).collect());
            }
            let domain = self.domains.as_mut()?.pop_front()?;
            self.batch = self.search_domain(&domain).await.into();
        }
    }

    /// Drains the cursor.
    pub async fn collect_all(mut self) -> Vec<Principal> {
        let mut principals = Vec::new();
        while let Some(principal) = self.next().await {
            principals.push(principal);
        }
        principals
    }

    async fn search_domain(&self, domain: &str) -> Vec<Principal> {
        let directory = self.directory;
        match directory
            .connector
            .search(
                Some(domain),
                &filter::search_path(domain),
                SearchScope::Subtree,
                &self.filter,
                &directory.attributes,
            )
            .await
        {
            Ok(entries) => entries
                .iter()
                .filter_map(|entry| directory.principal_from_entry(entry))
                .filter(|principal| matches_type(principal, self.search_type))
                .collect(),
            Err(err) => {
                warn!(domain, error = %err, "principal search failed");
                Vec::new()
            }
        }
    }
}

impl fmt::Debug for PrincipalSearch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrincipalSearch")
            .field("filter", &self.filter)
            .field("remaining_domains", &self.domains)
            .field("buffered", &self.batch.len())
            .finish_non_exhaustive()
    }
}
