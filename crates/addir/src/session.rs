//! Short-lived, bound directory sessions.

use std::sync::Arc;

use tracing::debug;

use addir_core::{DirectoryConfig, Result};

use crate::transport::{
    ConnectTarget, DirectoryEntry, DirectorySession, DirectoryTransport, SearchScope,
};

/// Opens sessions bound with the configured search credentials.
#[derive(Clone)]
pub(crate) struct Connector {
    config: Arc<DirectoryConfig>,
    transport: Arc<dyn DirectoryTransport>,
}

impl Connector {
    pub(crate) fn new(config: Arc<DirectoryConfig>, transport: Arc<dyn DirectoryTransport>) -> Self {
        Self { config, transport }
    }

    pub(crate) fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// Connects to `domain` (or the configured domain controller) without binding.
    pub(crate) async fn connect(&self, domain: Option<&str>) -> Result<Box<dyn DirectorySession>> {
        let target = ConnectTarget::for_domain(&self.config, domain);
        self.transport.connect(&target).await
    }

    /// Connects and binds with the search account, or the default identity when none is set.
    pub(crate) async fn admin_session(
        &self,
        domain: Option<&str>,
    ) -> Result<Box<dyn DirectorySession>> {
        let mut session = self.connect(domain).await?;
        let bound = match &self.config.credentials {
            Some(credentials) => {
                session
                    .simple_bind(credentials.bind_dn(), credentials.bind_password())
                    .await
            }
            None => session.default_bind().await,
        };
        if let Err(err) = bound {
            close(session.as_mut()).await;
            return Err(err);
        }
        Ok(session)
    }

    /// Runs one search on its own session.
    pub(crate) async fn search(
        &self,
        domain: Option<&str>,
        base_dn: &str,
        scope: SearchScope,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<DirectoryEntry>> {
        debug!(domain, base_dn, filter, "directory search");
        let mut session = self.admin_session(domain).await?;
        let entries = session.search(base_dn, scope, filter, attributes).await;
        close(session.as_mut()).await;
        entries
    }
}

/// Unbinds, ignoring failures: the work on the session is already done.
pub(crate) async fn close(session: &mut dyn DirectorySession) {
    if let Err(err) = session.unbind().await {
        debug!(error = %err, "unbind failed");
    }
}
