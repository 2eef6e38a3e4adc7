//! Domain set resolution, trust enumeration and NETBIOS name lookup.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use addir_core::{Result, SearchMode};

use crate::filter;
use crate::session::{close, Connector};
use crate::transport::{read_root_dse, DirectorySession, SearchScope};

/// Ordered set of domain names with case-insensitive uniqueness.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainSet {
    domains: Vec<String>,
    keys: HashSet<String>,
}

impl DomainSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a domain; returns false if an equal name (ignoring case) was already present.
    pub fn insert(&mut self, domain: impl Into<String>) -> bool {
        let domain = domain.into();
        let domain = domain.trim();
        if domain.is_empty() || !self.keys.insert(domain.to_lowercase()) {
            return false;
        }
        self.domains.push(domain.to_string());
        true
    }

    /// Returns true if the domain is in the set (case-insensitive).
    #[must_use]
    pub fn contains(&self, domain: &str) -> bool {
        self.keys.contains(&domain.trim().to_lowercase())
    }

    /// Domains in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.domains.iter().map(String::as_str)
    }

    /// Number of domains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for DomainSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for domain in iter {
            set.insert(domain);
        }
        set
    }
}

/// Direction of a trust relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDirection {
    /// The target domain may authenticate against the source domain.
    Inbound,
    /// The target domain trusts the source domain.
    Outbound,
    /// Both directions.
    Bidirectional,
}

impl TrustDirection {
    /// Decodes the `trustDirection` attribute; disabled (0) and unknown values yield `None`.
    #[must_use]
    pub fn from_attribute(value: &str) -> Option<Self> {
        match value.trim().parse::<u32>().ok()? {
            1 => Some(Self::Inbound),
            2 => Some(Self::Outbound),
            3 => Some(Self::Bidirectional),
            _ => None,
        }
    }
}

/// A trust between two domains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustRelationship {
    /// Domain the relationship was read from.
    pub source: String,
    /// Partner domain.
    pub target: String,
    /// Direction of the trust.
    pub direction: TrustDirection,
}

/// Adds every trust target this resolver may query to `domains`.
///
/// Outbound-only trusts are skipped: their targets trust us, not the other way round.
pub fn add_trusted_domains<'a, I>(domains: &mut DomainSet, relationships: I)
where
    I: IntoIterator<Item = &'a TrustRelationship>,
{
    for relationship in relationships {
        if relationship.direction != TrustDirection::Outbound {
            domains.insert(relationship.target.clone());
        }
    }
}

const TRUST_ATTRIBUTES: &[&str] = &["trustPartner", "name", "trustDirection"];

/// Resolves the domains a configuration searches and maps NETBIOS names to DNS names.
///
/// Results are computed on first use and kept for the lifetime of the resolver.
pub struct DomainResolver {
    connector: Connector,
    current: OnceCell<Option<String>>,
    domains: OnceCell<DomainSet>,
    netbios_cache: RwLock<HashMap<String, Option<String>>>,
}

impl DomainResolver {
    pub(crate) fn new(connector: Connector) -> Self {
        Self {
            connector,
            current: OnceCell::new(),
            domains: OnceCell::new(),
            netbios_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Domains searched by lookups under the configured mode.
    pub async fn domains(&self) -> &DomainSet {
        self.domains.get_or_init(|| self.resolve_domains()).await
    }

    /// The domain the host is joined to, or the configured override.
    pub async fn current_domain(&self) -> Option<&str> {
        self.current
            .get_or_init(|| self.detect_current_domain())
            .await
            .as_deref()
    }

    async fn resolve_domains(&self) -> DomainSet {
        let config = self.connector.config();
        let domains = match config.search_mode {
            SearchMode::SpecificDomains => config.domains.iter().cloned().collect(),
            SearchMode::CurrentDomain => self.current_domain().await.into_iter().collect(),
            SearchMode::TrustedDomains => {
                let Some(current) = self.current_domain().await else {
                    return DomainSet::new();
                };
                let mut domains: DomainSet = std::iter::once(current).collect();
                let relationships = self.trust_relationships(current).await;
                add_trusted_domains(&mut domains, &relationships);
                domains
            }
        };
        debug!(count = domains.len(), "resolved domain set");
        domains
    }

    async fn detect_current_domain(&self) -> Option<String> {
        let config = self.connector.config();
        if let Some(domain) = &config.current_domain {
            return Some(domain.clone());
        }

        if config.domain_controller.is_some() {
            match self.default_naming_context().await {
                Ok(Some(context)) => {
                    let domain = filter::domain_path(&context);
                    if !domain.is_empty() {
                        return Some(domain);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, code = err.error_code(), "failed to read root DSE of domain controller");
                }
            }
        }

        match std::env::var("USERDNSDOMAIN") {
            Ok(domain) if !domain.trim().is_empty() => Some(domain.trim().to_lowercase()),
            _ => {
                warn!("could not determine the current domain; configure one explicitly");
                None
            }
        }
    }

    async fn default_naming_context(&self) -> Result<Option<String>> {
        let mut session = self.connector.admin_session(None).await?;
        let root_dse = read_root_dse(session.as_mut()).await;
        close(session.as_mut()).await;
        Ok(root_dse?.default_naming_context)
    }

    /// Trusts of the current domain and of its forest root.
    ///
    /// Enumeration failures are logged and contribute no relationships.
    pub async fn trust_relationships(&self, current: &str) -> Vec<TrustRelationship> {
        let mut relationships = match self.domain_trusts(current).await {
            Ok(found) => found,
            Err(err) => {
                warn!(domain = current, error = %err, "failed to enumerate domain trusts");
                Vec::new()
            }
        };

        match self.forest_root(current).await {
            Ok(Some(root)) if !root.eq_ignore_ascii_case(current) => {
                match self.domain_trusts(&root).await {
                    Ok(found) => relationships.extend(found),
                    Err(err) => {
                        warn!(domain = %root, error = %err, "failed to enumerate forest trusts");
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(domain = current, error = %err, "failed to locate forest root");
            }
        }

        relationships
    }

    async fn forest_root(&self, domain: &str) -> Result<Option<String>> {
        let mut session = self.connector.admin_session(Some(domain)).await?;
        let root_dse = read_root_dse(session.as_mut()).await;
        close(session.as_mut()).await;
        Ok(root_dse?
            .root_domain_naming_context
            .map(|context| filter::domain_path(&context))
            .filter(|root| !root.is_empty()))
    }

    async fn domain_trusts(&self, domain: &str) -> Result<Vec<TrustRelationship>> {
        let base = format!("CN=System,{}", filter::search_path(domain));
        let attributes: Vec<String> = TRUST_ATTRIBUTES.iter().map(|a| (*a).to_string()).collect();
        let entries = self
            .connector
            .search(
                Some(domain),
                &base,
                SearchScope::OneLevel,
                "(objectClass=trustedDomain)",
                &attributes,
            )
            .await?;

        Ok(entries
            .iter()
            .filter_map(|entry| {
                let target = entry.first("trustPartner").or_else(|| entry.first("name"))?;
                let direction = TrustDirection::from_attribute(entry.first("trustDirection")?)?;
                Some(TrustRelationship {
                    source: domain.to_string(),
                    target: target.to_string(),
                    direction,
                })
            })
            .collect())
    }

    /// Maps a NETBIOS domain name to its DNS name.
    ///
    /// Static overrides are consulted first, then the configuration partition of the current
    /// domain. Hits and confirmed misses are cached; `None` means "use the name as-is".
    pub async fn domain_name_from_netbios(&self, netbios: &str) -> Option<String> {
        let config = self.connector.config();
        if let Some(dns) = config.netbios_overrides.get(netbios) {
            return Some(dns.to_string());
        }

        let key = netbios.to_uppercase();
        if let Some(cached) = self
            .netbios_cache
            .read()
            .ok()
            .and_then(|cache| cache.get(&key).cloned())
        {
            return cached;
        }

        match self.lookup_netbios(netbios).await {
            Ok(found) => {
                if let Ok(mut cache) = self.netbios_cache.write() {
                    cache.entry(key).or_insert_with(|| found.clone());
                }
                found
            }
            Err(err) => {
                warn!(netbios, error = %err, "NETBIOS name lookup failed");
                None
            }
        }
    }

    async fn lookup_netbios(&self, netbios: &str) -> Result<Option<String>> {
        let current = self.current_domain().await.map(str::to_owned);
        let mut session = self.connector.admin_session(current.as_deref()).await?;
        let result = query_netbios(session.as_mut(), netbios).await;
        close(session.as_mut()).await;
        result
    }
}

async fn query_netbios(
    session: &mut dyn DirectorySession,
    netbios: &str,
) -> Result<Option<String>> {
    let Some(configuration) = read_root_dse(session).await?.configuration_naming_context else {
        return Ok(None);
    };
    let filter = format!("(nETBIOSName={})", filter::escape_filter_value(netbios));
    let entries = session
        .search(
            &configuration,
            SearchScope::Subtree,
            &filter,
            &["dnsRoot".to_string()],
        )
        .await?;
    Ok(entries
        .iter()
        .find_map(|entry| entry.first("dnsRoot").map(str::to_owned)))
}
