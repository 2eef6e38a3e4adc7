//! Principal resolution across Active Directory domains.
//!
//! This crate looks up users and groups by name across a configurable set of domains, runs
//! lazy free-text searches, computes transitive group membership and validates passwords. All
//! directory traffic goes through the [`DirectoryTransport`] seam, backed by the portable
//! `ldap3` client or, on Windows, the operating system's directory client.

#![deny(missing_docs)]

mod directory;
mod dn;
mod domains;
pub mod filter;
mod group;
mod membership;
#[cfg(windows)]
mod native;
mod portable;
mod principal;
mod session;
mod transport;
mod user;

pub use addir_core::{
    AttributeNames, BindCredentials, DirectoryConfig, Error, NetbiosMap, SearchMode, TlsMode,
    TransportPreference,
};
pub use directory::{PrincipalSearch, UserDirectory};
pub use dn::{DistinguishedName, DistinguishedNameError, RelativeDistinguishedName};
pub use domains::{
    add_trusted_domains, DomainResolver, DomainSet, TrustDirection, TrustRelationship,
};
pub use group::{Group, Principal};
#[cfg(windows)]
pub use native::NativeTransport;
pub use portable::PortableTransport;
pub use principal::{GroupId, PrincipalId, PrincipalSearchType, UserId};
pub use transport::{
    read_root_dse, select_transport, ConnectTarget, DirectoryEntry, DirectorySession,
    DirectoryTransport, RootDse, SearchScope,
};
pub use user::User;

/// Convenient result alias that reuses the core error type.
pub type Result<T> = addir_core::Result<T>;
