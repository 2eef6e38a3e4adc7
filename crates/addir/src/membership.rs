//! Group membership closure over `memberOf` edges.

use std::collections::{HashSet, VecDeque};

use tracing::{debug, warn};

use addir_core::Result;

use crate::dn::DistinguishedName;
use crate::filter;
use crate::principal::{GroupId, PrincipalId};
use crate::session::Connector;
use crate::transport::SearchScope;

/// Computes the groups a principal belongs to.
pub(crate) struct Membership {
    connector: Connector,
}

impl Membership {
    pub(crate) fn new(connector: Connector) -> Self {
        Self { connector }
    }

    /// Groups `principal` belongs to.
    ///
    /// With recursive search enabled, every group reached for the first time is expanded in
    /// turn, so membership cycles terminate once each group has been visited.
    pub(crate) async fn closure(&self, principal: &PrincipalId) -> HashSet<GroupId> {
        let recursive = self.connector.config().search_recursively;
        let mut visited = HashSet::new();
        let mut pending = VecDeque::from([principal.clone()]);

        while let Some(next) = pending.pop_front() {
            let parents = match self.direct_groups(&next).await {
                Ok(parents) => parents,
                Err(err) => {
                    warn!(principal = %next, error = %err, "failed to read group membership");
                    continue;
                }
            };
            for group in parents {
                if visited.insert(group.clone()) && recursive {
                    pending.push_back(group.into());
                }
            }
        }

        debug!(principal = %principal, groups = visited.len(), "resolved group membership");
        visited
    }

    /// Groups listed directly in the principal's membership attribute.
    pub(crate) async fn direct_groups(&self, principal: &PrincipalId) -> Result<Vec<GroupId>> {
        let config = self.connector.config();
        let attributes = [config.attributes.member_of.clone()];
        let domain = principal.domain_alias();

        let entries = match principal.distinguished_name() {
            Some(dn) => {
                self.connector
                    .search(
                        Some(domain),
                        dn.as_str(),
                        SearchScope::Base,
                        "(objectClass=*)",
                        &attributes,
                    )
                    .await?
            }
            None => {
                let lookup = filter::group_lookup_filter(&config.attributes, principal.principal());
                self.connector
                    .search(
                        Some(domain),
                        &principal.search_path(),
                        SearchScope::Subtree,
                        &lookup,
                        &attributes,
                    )
                    .await?
            }
        };

        Ok(entries
            .iter()
            .take(1)
            .filter_map(|entry| entry.values(&config.attributes.member_of))
            .flatten()
            .filter_map(|dn| group_from_dn(dn))
            .collect())
    }
}

/// Builds a group identity from a `memberOf` value: the first `CN` names the group and the `DC`
/// components its domain.
pub(crate) fn group_from_dn(value: &str) -> Option<GroupId> {
    let dn = match DistinguishedName::parse(value) {
        Ok(dn) => dn,
        Err(err) => {
            debug!(dn = value, error = %err, "skipping malformed group name");
            return None;
        }
    };
    let name = dn.get("CN")?.to_string();
    let domain = dn.domain_path();
    if name.is_empty() || domain.is_empty() {
        return None;
    }
    Some(PrincipalId::new(name, domain).with_distinguished_name(dn).into())
}
