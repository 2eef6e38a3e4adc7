//! Directory group and principal representations.

use crate::principal::{GroupId, PrincipalId};
use crate::user::User;

/// A group found in the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    id: GroupId,
    display_name: Option<String>,
    email: Option<String>,
}

impl Group {
    /// Creates a group with no optional attributes.
    #[must_use]
    pub fn new(id: GroupId) -> Self {
        Self {
            id,
            display_name: None,
            email: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Sets the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Identity of the group.
    #[must_use]
    pub fn id(&self) -> &GroupId {
        &self.id
    }

    /// Human readable name.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Group email address.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }
}

/// A user or a group.
#[derive(Debug)]
pub enum Principal {
    /// A user account.
    User(User),
    /// A group.
    Group(Group),
}

impl Principal {
    /// Shared identity of the principal.
    #[must_use]
    pub fn id(&self) -> &PrincipalId {
        match self {
            Self::User(user) => user.id().as_principal_id(),
            Self::Group(group) => group.id().as_principal_id(),
        }
    }

    /// Human readable name.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        match self {
            Self::User(user) => user.display_name(),
            Self::Group(group) => group.display_name(),
        }
    }

    /// Returns true for users.
    #[must_use]
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }

    /// Returns the user, if this is one.
    #[must_use]
    pub fn into_user(self) -> Option<User> {
        match self {
            Self::User(user) => Some(user),
            Self::Group(_) => None,
        }
    }

    /// Returns the group, if this is one.
    #[must_use]
    pub fn into_group(self) -> Option<Group> {
        match self {
            Self::Group(group) => Some(group),
            Self::User(_) => None,
        }
    }
}
