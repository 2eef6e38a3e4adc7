//! Directory transport seam.
//!
//! The engine talks to directory servers only through [`DirectoryTransport`] and
//! [`DirectorySession`], so the same resolution logic runs over the portable `ldap3` client,
//! the Windows directory client, or an in-memory directory in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use addir_core::{DirectoryConfig, Error, Result, TlsMode, TransportPreference};

use crate::portable::PortableTransport;

/// Represents the search scope for LDAP queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Base object only.
    Base,
    /// One level below the base.
    OneLevel,
    /// Entire subtree.
    Subtree,
}

/// LDAP entry returned by a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Distinguished name of the entry.
    pub dn: String,
    /// Attribute map (values preserved order from server).
    pub attributes: HashMap<String, Vec<String>>,
}

impl DirectoryEntry {
    /// Creates an entry with no attributes.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attributes: HashMap::new(),
        }
    }

    /// Adds values for an attribute.
    #[must_use]
    pub fn with_attribute<I, S>(mut self, attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes
            .entry(attribute.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Returns all values for the attribute (case-insensitive name).
    #[must_use]
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
    }

    /// Returns the first non-empty value of the attribute if present.
    #[must_use]
    pub fn first(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)
            .and_then(|values| values.iter().find(|value| !value.is_empty()))
            .map(String::as_str)
    }
}

/// Where a session connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Host name; `None` lets the native client locate a domain controller itself.
    pub host: Option<String>,
    /// TCP port.
    pub port: u16,
    /// Transport security.
    pub tls_mode: TlsMode,
}

impl ConnectTarget {
    /// Target for a domain, honouring the configured domain controller and port.
    #[must_use]
    pub fn for_domain(config: &DirectoryConfig, domain: Option<&str>) -> Self {
        Self {
            host: config
                .domain_controller
                .clone()
                .or_else(|| domain.map(str::to_owned)),
            port: config.effective_port(),
            tls_mode: config.tls_mode,
        }
    }
}

/// An open connection to a directory server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectorySession: Send {
    /// Binds with a name and password.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()>;
    /// Binds with the process identity where supported, anonymously otherwise.
    async fn default_bind(&mut self) -> Result<()>;
    /// Runs a search and returns every matching entry.
    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>>;
    /// Closes the connection.
    async fn unbind(&mut self) -> Result<()>;
}

/// Opens directory sessions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryTransport: Send + Sync {
    /// Connects without binding.
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn DirectorySession>>;
}

/// Naming contexts advertised by a server's root DSE.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootDse {
    /// Root of the server's own domain.
    pub default_naming_context: Option<String>,
    /// Root of the forest root domain.
    pub root_domain_naming_context: Option<String>,
    /// Root of the configuration partition.
    pub configuration_naming_context: Option<String>,
}

/// Reads the root DSE over an already bound session.
///
/// # Errors
///
/// Returns the session's error if the search fails.
pub async fn read_root_dse(session: &mut dyn DirectorySession) -> Result<RootDse> {
    let attributes = [
        "defaultNamingContext".to_string(),
        "rootDomainNamingContext".to_string(),
        "configurationNamingContext".to_string(),
    ];
    let entries = session
        .search("", SearchScope::Base, "(objectClass=*)", &attributes)
        .await?;
    let Some(entry) = entries.first() else {
        return Ok(RootDse::default());
    };

    Ok(RootDse {
        default_naming_context: entry.first("defaultNamingContext").map(str::to_owned),
        root_domain_naming_context: entry.first("rootDomainNamingContext").map(str::to_owned),
        configuration_naming_context: entry
            .first("configurationNamingContext")
            .map(str::to_owned),
    })
}

/// Picks the transport for a configuration.
///
/// # Errors
///
/// Returns [`Error::ConfigError`] if the native client is requested on a platform without one.
pub fn select_transport(config: &DirectoryConfig) -> Result<Arc<dyn DirectoryTransport>> {
    let native = native_available();
    match config.transport {
        TransportPreference::Portable => Ok(portable(config)),
        TransportPreference::Native if native => native_transport(config),
        TransportPreference::Native => Err(Error::ConfigError(
            "the native directory client is not available on this platform".to_string(),
        )),
        TransportPreference::Auto if native && host_is_domain_joined() => {
            info!("using native directory client");
            native_transport(config)
        }
        TransportPreference::Auto => Ok(portable(config)),
    }
}

fn portable(config: &DirectoryConfig) -> Arc<dyn DirectoryTransport> {
    info!("using portable directory client");
    Arc::new(PortableTransport::new(config.connection_timeout()))
}

fn host_is_domain_joined() -> bool {
    std::env::var("USERDNSDOMAIN").is_ok_and(|domain| !domain.trim().is_empty())
}

#[cfg(windows)]
const fn native_available() -> bool {
    true
}

#[cfg(not(windows))]
const fn native_available() -> bool {
    false
}

#[cfg(windows)]
#[allow(clippy::unnecessary_wraps)]
fn native_transport(config: &DirectoryConfig) -> Result<Arc<dyn DirectoryTransport>> {
    Ok(Arc::new(crate::native::NativeTransport::new(
        config.connection_timeout(),
    )))
}

#[cfg(not(windows))]
fn native_transport(_config: &DirectoryConfig) -> Result<Arc<dyn DirectoryTransport>> {
    Err(Error::ConfigError(
        "the native directory client is not available on this platform".to_string(),
    ))
}
