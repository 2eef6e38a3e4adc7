//! Portable directory transport backed by `ldap3`.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use native_tls::TlsConnector;
use tokio::time::timeout;
use url::Url;

use addir_core::{Error, Result};

use crate::transport::{
    ConnectTarget, DirectoryEntry, DirectorySession, DirectoryTransport, SearchScope,
};

impl From<SearchScope> for Scope {
    fn from(scope: SearchScope) -> Self {
        match scope {
            SearchScope::Base => Scope::Base,
            SearchScope::OneLevel => Scope::OneLevel,
            SearchScope::Subtree => Scope::Subtree,
        }
    }
}

/// Cross-platform LDAP transport.
pub struct PortableTransport {
    connection_timeout: Duration,
}

impl PortableTransport {
    /// Creates a transport with the given connection timeout.
    #[must_use]
    pub fn new(connection_timeout: Duration) -> Self {
        Self { connection_timeout }
    }
}

#[async_trait]
impl DirectoryTransport for PortableTransport {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn DirectorySession>> {
        let url = ldap_url(target)?;
        let settings = build_ldap_settings(target, self.connection_timeout)?;
        let (conn, ldap) = LdapConnAsync::with_settings(settings, url.as_str())
            .await
            .map_err(map_ldap_error)?;
        ldap3::drive!(conn);
        Ok(Box::new(PortableSession {
            inner: ldap,
            connection_timeout: self.connection_timeout,
        }))
    }
}

struct PortableSession {
    inner: ldap3::Ldap,
    connection_timeout: Duration,
}

#[async_trait]
impl DirectorySession for PortableSession {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> Result<()> {
        // An empty password would turn into an unauthenticated bind that most servers accept.
        if password.is_empty() {
            return Err(Error::InvalidCredentials);
        }
        let result = timeout(self.connection_timeout, self.inner.simple_bind(dn, password))
            .await
            .map_err(|_| Error::Timeout("LDAP bind timed out".to_string()))?
            .map_err(map_ldap_error)?;
        result.success().map_err(|_| Error::InvalidCredentials)?;
        Ok(())
    }

    async fn default_bind(&mut self) -> Result<()> {
        let result = timeout(self.connection_timeout, self.inner.simple_bind("", ""))
            .await
            .map_err(|_| Error::Timeout("LDAP bind timed out".to_string()))?
            .map_err(map_ldap_error)?;
        result.success().map_err(map_ldap_error)?;
        Ok(())
    }

    async fn search(
        &mut self,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>> {
        let result = self
            .inner
            .search(base_dn, scope.into(), filter, attributes.to_vec())
            .await
            .map_err(map_ldap_error)?;
        let (entries, _) = result.success().map_err(map_ldap_error)?;
        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(|entry| DirectoryEntry {
                dn: entry.dn,
                attributes: entry.attrs,
            })
            .collect())
    }

    async fn unbind(&mut self) -> Result<()> {
        self.inner.unbind().await.map_err(map_ldap_error)
    }
}

fn ldap_url(target: &ConnectTarget) -> Result<Url> {
    let host = target.host.as_deref().ok_or_else(|| {
        Error::ConfigError("no directory host: configure a domain or domain controller".into())
    })?;
    let scheme = if target.tls_mode.uses_tls() {
        "ldaps"
    } else {
        "ldap"
    };
    Ok(Url::parse(&format!("{scheme}://{host}:{}", target.port))?)
}

fn build_ldap_settings(target: &ConnectTarget, connection_timeout: Duration) -> Result<LdapConnSettings> {
    let mut settings = LdapConnSettings::new().set_conn_timeout(connection_timeout);

    if target.tls_mode.uses_tls() && !target.tls_mode.verifies_certificates() {
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|err| {
                Error::ConfigError(format!("failed to construct TLS connector: {err}"))
            })?;
        settings = settings.set_connector(connector).set_no_tls_verify(true);
    }

    Ok(settings)
}

fn map_ldap_error(err: ldap3::LdapError) -> Error {
    Error::ldap(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use addir_core::TlsMode;

    fn target(tls_mode: TlsMode) -> ConnectTarget {
        ConnectTarget {
            host: Some("dc01.kramerica.local".to_string()),
            port: tls_mode.default_port(),
            tls_mode,
        }
    }

    #[test]
    fn url_follows_tls_mode() {
        assert_eq!(
            ldap_url(&target(TlsMode::Ldap)).unwrap().as_str(),
            "ldap://dc01.kramerica.local:389"
        );
        assert_eq!(
            ldap_url(&target(TlsMode::LdapsBypassCert)).unwrap().as_str(),
            "ldaps://dc01.kramerica.local:636"
        );
    }

    #[test]
    fn url_requires_host() {
        let mut target = target(TlsMode::Ldap);
        target.host = None;
        assert!(matches!(ldap_url(&target), Err(Error::ConfigError(_))));
    }

    #[test]
    fn settings_build_for_every_mode() {
        for mode in [TlsMode::Ldap, TlsMode::Ldaps, TlsMode::LdapsBypassCert] {
            assert!(build_ldap_settings(&target(mode), Duration::from_secs(5)).is_ok());
        }
    }
}
