//! Principal identities.
//!
//! A principal is identified by its bare name and the domain it was found in. Both parts compare
//! case-insensitively; the distinguished name travels along for binds and re-lookups but is not
//! part of the identity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::str::FromStr;

use crate::dn::DistinguishedName;
use crate::filter;

/// Which principal kinds a search covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalSearchType {
    /// User accounts only.
    Users,
    /// Groups only.
    Groups,
    /// Users and groups.
    UsersAndGroups,
}

/// Identity of a user or group.
#[derive(Debug, Clone)]
pub struct PrincipalId {
    principal: String,
    domain_alias: String,
    distinguished_name: Option<DistinguishedName>,
}

impl PrincipalId {
    /// Creates an identity without a distinguished name.
    #[must_use]
    pub fn new(principal: impl Into<String>, domain_alias: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            domain_alias: domain_alias.into(),
            distinguished_name: None,
        }
    }

    /// Attaches the directory path of the entry.
    #[must_use]
    pub fn with_distinguished_name(mut self, dn: DistinguishedName) -> Self {
        self.distinguished_name = Some(dn);
        self
    }

    /// Parses `name@domain`.
    ///
    /// Returns `None` unless the text splits on its first `@` into two non-empty parts.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (principal, domain_alias) = text.split_once('@')?;
        if principal.is_empty() || domain_alias.is_empty() {
            return None;
        }
        Some(Self::new(principal, domain_alias))
    }

    /// Bare account or group name.
    #[must_use]
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Domain the principal was found in.
    #[must_use]
    pub fn domain_alias(&self) -> &str {
        &self.domain_alias
    }

    /// Directory path of the entry, when known.
    #[must_use]
    pub fn distinguished_name(&self) -> Option<&DistinguishedName> {
        self.distinguished_name.as_ref()
    }

    /// Canonical `name@domain` form.
    #[must_use]
    pub fn to_fully_qualified_name(&self) -> String {
        format!("{}@{}", self.principal, self.domain_alias)
    }

    /// Root of the principal's domain, e.g. `DC=kramerica,DC=local`.
    #[must_use]
    pub fn search_path(&self) -> String {
        filter::search_path(&self.domain_alias)
    }

    fn key(&self) -> (String, String) {
        (self.domain_alias.to_lowercase(), self.principal.to_lowercase())
    }
}

impl PartialEq for PrincipalId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PrincipalId {}

impl Hash for PrincipalId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.principal, self.domain_alias)
    }
}

impl FromStr for PrincipalId {
    type Err = addir_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| {
            addir_core::Error::InvalidRequest(format!("`{s}` is not a name@domain principal"))
        })
    }
}

macro_rules! principal_id_variant {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(PrincipalId);

        impl $name {
            /// Creates an identity without a distinguished name.
            #[must_use]
            pub fn new(principal: impl Into<String>, domain_alias: impl Into<String>) -> Self {
                Self(PrincipalId::new(principal, domain_alias))
            }

            /// Parses `name@domain`.
            #[must_use]
            pub fn parse(text: &str) -> Option<Self> {
                PrincipalId::parse(text).map(Self)
            }

            /// Borrows the shared identity.
            #[must_use]
            pub fn as_principal_id(&self) -> &PrincipalId {
                &self.0
            }
        }

        impl From<PrincipalId> for $name {
            fn from(id: PrincipalId) -> Self {
                Self(id)
            }
        }

        impl From<$name> for PrincipalId {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl Deref for $name {
            type Target = PrincipalId;

            fn deref(&self) -> &PrincipalId {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

principal_id_variant!(
    /// Identity of a user account.
    UserId
);

principal_id_variant!(
    /// Identity of a group.
    GroupId
);
