//! Directory user representation.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::membership::Membership;
use crate::principal::{GroupId, UserId};

/// A user found in the directory.
///
/// Group membership is resolved from the directory on first use and cached for the lifetime of
/// this value.
pub struct User {
    id: UserId,
    display_name: Option<String>,
    email: Option<String>,
    principal_name: Option<String>,
    membership: Arc<Membership>,
    groups: OnceCell<HashSet<GroupId>>,
}

impl User {
    /// Creates a builder for a new user instance.
    #[must_use]
    pub(crate) fn builder(id: UserId, membership: Arc<Membership>) -> UserBuilder {
        UserBuilder {
            id,
            display_name: None,
            email: None,
            principal_name: None,
            membership,
        }
    }

    /// Identity of the user.
    #[must_use]
    pub fn id(&self) -> &UserId {
        &self.id
    }

    /// Human readable name.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Primary email address.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// `userPrincipalName`, when set.
    #[must_use]
    pub fn principal_name(&self) -> Option<&str> {
        self.principal_name.as_deref()
    }

    /// Groups the user belongs to, transitively when recursive search is configured.
    pub async fn groups(&self) -> &HashSet<GroupId> {
        self.groups
            .get_or_init(|| self.membership.closure(self.id.as_principal_id()))
            .await
    }

    /// Returns true if the user belongs to the group.
    pub async fn is_member_of(&self, group: &GroupId) -> bool {
        self.groups().await.contains(group)
    }

    /// Returns true if the user belongs to the named group.
    ///
    /// `name@domain` is matched exactly; a bare name is looked up in the user's own domain.
    pub async fn is_member_of_group(&self, group: &str) -> bool {
        let id = GroupId::parse(group)
            .unwrap_or_else(|| GroupId::new(group, self.id.domain_alias()));
        self.is_member_of(&id).await
    }

    /// Fully qualified names of the user's groups, sorted.
    pub async fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .groups()
            .await
            .iter()
            .map(|group| group.to_fully_qualified_name())
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("email", &self.email)
            .field("principal_name", &self.principal_name)
            .field("groups", &self.groups.get())
            .finish_non_exhaustive()
    }
}

/// Builder for [`User`].
pub(crate) struct UserBuilder {
    id: UserId,
    display_name: Option<String>,
    email: Option<String>,
    principal_name: Option<String>,
    membership: Arc<Membership>,
}

impl UserBuilder {
    /// Sets the display name.
    #[must_use]
    pub(crate) fn display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Sets the email address.
    #[must_use]
    pub(crate) fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the user principal name.
    #[must_use]
    pub(crate) fn principal_name(mut self, principal_name: impl Into<String>) -> Self {
        self.principal_name = Some(principal_name.into());
        self
    }

    /// Finalises the builder and returns the [`User`].
    #[must_use]
    pub(crate) fn build(self) -> User {
        User {
            id: self.id,
            display_name: self.display_name,
            email: self.email,
            principal_name: self.principal_name,
            membership: self.membership,
            groups: OnceCell::new(),
        }
    }
}
