//! Configuration structures for directory resolution.
//!
//! This module provides the configuration surface callers hand to the resolution engine: which
//! domains to search, how to reach them, and which attribute names the directory schema uses.

use crate::credentials::BindCredentials;
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use validator::Validate;

/// Default connection timeout (seconds).
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Which set of domains principal lookups are run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SearchMode {
    /// Only the domain the host is joined to (or the configured override).
    #[default]
    CurrentDomain,
    /// The current domain plus every domain it is allowed to query through trusts.
    TrustedDomains,
    /// Exactly the configured domain list.
    SpecificDomains,
}

/// Transport security for directory connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TlsMode {
    /// Plain LDAP.
    #[default]
    Ldap,
    /// LDAP over TLS with certificate validation.
    Ldaps,
    /// LDAP over TLS without certificate validation.
    ///
    /// This is an operator escape hatch for lab environments, never a default.
    LdapsBypassCert,
}

impl TlsMode {
    /// Returns true if connections are wrapped in TLS.
    #[must_use]
    pub const fn uses_tls(self) -> bool {
        !matches!(self, Self::Ldap)
    }

    /// Returns true if server certificates are validated.
    #[must_use]
    pub const fn verifies_certificates(self) -> bool {
        !matches!(self, Self::LdapsBypassCert)
    }

    /// Well-known port for the mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Ldap => 389,
            Self::Ldaps | Self::LdapsBypassCert => 636,
        }
    }
}

/// Which LDAP client implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransportPreference {
    /// Native client when the host supports it, portable client otherwise.
    #[default]
    Auto,
    /// The operating system's directory client.
    Native,
    /// The cross-platform client.
    Portable,
}

/// Attribute names read from directory entries.
///
/// Defaults match the Active Directory schema; override individual names for directories that
/// expose the same data under different attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeNames {
    /// Short logon name.
    pub account_name: String,
    /// Relative name of the entry.
    pub name: String,
    /// Human readable name.
    pub display_name: String,
    /// Primary email address.
    pub email: String,
    /// `name@domain` style identifier.
    pub principal_name: String,
    /// Distinguished names of the groups an entry belongs to.
    pub member_of: String,
    /// Schema class of the entry.
    pub object_category: String,
}

impl Default for AttributeNames {
    fn default() -> Self {
        Self {
            account_name: "sAMAccountName".to_string(),
            name: "name".to_string(),
            display_name: "displayName".to_string(),
            email: "mail".to_string(),
            principal_name: "userPrincipalName".to_string(),
            member_of: "memberOf".to_string(),
            object_category: "objectCategory".to_string(),
        }
    }
}

impl AttributeNames {
    /// All attribute names, in the order they are requested from the directory.
    #[must_use]
    pub fn all(&self) -> Vec<String> {
        vec![
            self.account_name.clone(),
            self.name.clone(),
            self.display_name.clone(),
            self.email.clone(),
            self.principal_name.clone(),
            self.member_of.clone(),
            self.object_category.clone(),
        ]
    }
}

/// Case-insensitive map from NETBIOS short domain names to DNS domain names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct NetbiosMap {
    entries: HashMap<String, (String, String)>,
}

impl NetbiosMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `NETBIOS=dns.domain.name` lines.
    ///
    /// Blank lines, lines without `=` and lines with an empty side are skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut map = Self::new();
        for line in text.lines() {
            if let Some((netbios, dns)) = line.split_once('=') {
                let (netbios, dns) = (netbios.trim(), dns.trim());
                if !netbios.is_empty() && !dns.is_empty() {
                    map.insert(netbios, dns);
                }
            }
        }
        map
    }

    /// Adds or replaces a mapping.
    pub fn insert(&mut self, netbios: impl Into<String>, dns: impl Into<String>) {
        let netbios = netbios.into();
        self.entries
            .insert(netbios.to_uppercase(), (netbios, dns.into()));
    }

    /// Looks up the DNS name for a NETBIOS name (case-insensitive).
    #[must_use]
    pub fn get(&self, netbios: &str) -> Option<&str> {
        self.entries
            .get(&netbios.to_uppercase())
            .map(|(_, dns)| dns.as_str())
    }

    /// Number of mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(netbios, dns)` pairs with the NETBIOS name as originally written.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries
            .values()
            .map(|(netbios, dns)| (netbios.as_str(), dns.as_str()))
    }
}

impl From<Vec<String>> for NetbiosMap {
    fn from(lines: Vec<String>) -> Self {
        Self::parse(&lines.join("\n"))
    }
}

impl From<NetbiosMap> for Vec<String> {
    fn from(map: NetbiosMap) -> Self {
        let mut lines: Vec<String> = map
            .iter()
            .map(|(netbios, dns)| format!("{netbios}={dns}"))
            .collect();
        lines.sort();
        lines
    }
}

/// Configuration for a directory resolution instance.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DirectoryConfig {
    /// Which domains are searched
    #[serde(default)]
    pub search_mode: SearchMode,

    /// Domains searched in [`SearchMode::SpecificDomains`]
    #[serde(default)]
    pub domains: Vec<String>,

    /// Static NETBIOS to DNS domain mappings
    #[serde(default)]
    pub netbios_overrides: NetbiosMap,

    /// Overrides detection of the domain the host is joined to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_domain: Option<String>,

    /// Domain controller to connect to instead of the domain name itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_controller: Option<String>,

    /// Port override
    #[validate(range(min = 1))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Transport security
    #[serde(default)]
    pub tls_mode: TlsMode,

    /// Whether group membership is resolved transitively
    #[serde(default)]
    pub search_recursively: bool,

    /// Whether group managed service accounts are treated as users
    #[serde(default)]
    pub include_group_managed_service_accounts: bool,

    /// Attribute names for non-default schemas
    #[serde(default)]
    pub attributes: AttributeNames,

    /// Credentials used to bind before searching
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<BindCredentials>,

    /// LDAP client selection
    #[serde(default)]
    pub transport: TransportPreference,

    /// Connection timeout in seconds
    #[validate(range(min = 1, max = 300))]
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
}

const fn default_connection_timeout_secs() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

impl DirectoryConfig {
    /// Create a configuration searching the current domain with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            search_mode: SearchMode::default(),
            domains: Vec::new(),
            netbios_overrides: NetbiosMap::new(),
            current_domain: None,
            domain_controller: None,
            port: None,
            tls_mode: TlsMode::default(),
            search_recursively: false,
            include_group_managed_service_accounts: false,
            attributes: AttributeNames::default(),
            credentials: None,
            transport: TransportPreference::default(),
            connection_timeout_secs: default_connection_timeout_secs(),
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ValidationError`] listing the fields outside their allowed ranges.
    pub fn validated(self) -> Result<Self, Error> {
        self.validate()?;
        Ok(self)
    }

    /// Set the search mode.
    #[must_use]
    pub const fn with_search_mode(mut self, mode: SearchMode) -> Self {
        self.search_mode = mode;
        self
    }

    /// Search exactly the given domains.
    #[must_use]
    pub fn with_specific_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_mode = SearchMode::SpecificDomains;
        self.domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Set the NETBIOS overrides.
    #[must_use]
    pub fn with_netbios_overrides(mut self, map: NetbiosMap) -> Self {
        self.netbios_overrides = map;
        self
    }

    /// Override the detected current domain.
    #[must_use]
    pub fn with_current_domain(mut self, domain: impl Into<String>) -> Self {
        self.current_domain = Some(domain.into());
        self
    }

    /// Connect to a specific domain controller.
    #[must_use]
    pub fn with_domain_controller(mut self, host: impl Into<String>) -> Self {
        self.domain_controller = Some(host.into());
        self
    }

    /// Override the port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the transport security mode.
    #[must_use]
    pub const fn with_tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls_mode = mode;
        self
    }

    /// Enable or disable transitive group resolution.
    #[must_use]
    pub const fn with_recursive_search(mut self, recursive: bool) -> Self {
        self.search_recursively = recursive;
        self
    }

    /// Include or exclude group managed service accounts from user searches.
    #[must_use]
    pub const fn with_group_managed_service_accounts(mut self, include: bool) -> Self {
        self.include_group_managed_service_accounts = include;
        self
    }

    /// Set custom attribute names.
    #[must_use]
    pub fn with_attributes(mut self, attributes: AttributeNames) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set the search bind credentials.
    #[must_use]
    pub fn with_credentials(mut self, credentials: BindCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the transport preference.
    #[must_use]
    pub const fn with_transport(mut self, transport: TransportPreference) -> Self {
        self.transport = transport;
        self
    }

    /// Set the connection timeout in seconds.
    #[must_use]
    pub const fn with_connection_timeout_secs(mut self, seconds: u64) -> Self {
        self.connection_timeout_secs = seconds;
        self
    }

    /// Port connections are made on.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.tls_mode.default_port())
    }

    /// Get the connection timeout as a Duration.
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self::new()
    }
}
