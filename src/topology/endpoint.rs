//! Database endpoints
//!
//! Exactly two endpoints exist for the lifetime of a process: the primary
//! and the secondary. Both are loaded from configuration at boot and are
//! immutable afterwards.

use std::fmt;

/// Which of the two configured endpoints an [`Endpoint`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    /// Preferred endpoint; active whenever it is healthy and caught up.
    Primary,
    /// Standby endpoint; active only in degraded mode.
    Secondary,
}

impl EndpointRole {
    /// The other endpoint of the pair.
    pub fn peer(self) -> Self {
        match self {
            Self::Primary => Self::Secondary,
            Self::Secondary => Self::Primary,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection details for one database.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    name: String,
    url: String,
    user: String,
    password: String,
}

impl Endpoint {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// Logical name, also used as `target_db` in the replication queue.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.url)
    }
}

// Credentials stay out of logs and panics.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The pair of configured endpoints.
#[derive(Debug, Clone)]
pub struct Endpoints {
    primary: Endpoint,
    secondary: Endpoint,
}

impl Endpoints {
    pub fn new(primary: Endpoint, secondary: Endpoint) -> Self {
        Self { primary, secondary }
    }

    pub fn primary(&self) -> &Endpoint {
        &self.primary
    }

    pub fn secondary(&self) -> &Endpoint {
        &self.secondary
    }

    /// Endpoint playing the given role.
    pub fn get(&self, role: EndpointRole) -> &Endpoint {
        match role {
            EndpointRole::Primary => &self.primary,
            EndpointRole::Secondary => &self.secondary,
        }
    }

    /// Resolve a queue `target_db` name to a role, ignoring ASCII case.
    ///
    /// Returns `None` for names matching neither endpoint (stale or
    /// renamed targets).
    pub fn resolve(&self, name: &str) -> Option<EndpointRole> {
        if self.primary.name.eq_ignore_ascii_case(name) {
            Some(EndpointRole::Primary)
        } else if self.secondary.name.eq_ignore_ascii_case(name) {
            Some(EndpointRole::Secondary)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> Endpoints {
        Endpoints::new(
            Endpoint::new("library", "postgresql://a/library", "u", "secret"),
            Endpoint::new("librarybackup", "postgresql://b/librarybackup", "u", "secret"),
        )
    }

    #[test]
    fn test_peer_is_involutive() {
        assert_eq!(EndpointRole::Primary.peer(), EndpointRole::Secondary);
        assert_eq!(EndpointRole::Secondary.peer(), EndpointRole::Primary);
        assert_eq!(EndpointRole::Primary.peer().peer(), EndpointRole::Primary);
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let endpoints = endpoints();
        assert_eq!(endpoints.resolve("LIBRARY"), Some(EndpointRole::Primary));
        assert_eq!(
            endpoints.resolve("LibraryBackup"),
            Some(EndpointRole::Secondary)
        );
        assert_eq!(endpoints.resolve("archive"), None);
    }

    #[test]
    fn test_debug_redacts_password() {
        let endpoints = endpoints();
        let debug = format!("{:?}", endpoints.primary());
        assert!(!debug.contains("secret"));
        assert!(debug.contains("redacted"));
    }

    #[test]
    fn test_display_shows_name_and_url() {
        let endpoints = endpoints();
        assert_eq!(
            endpoints.secondary().to_string(),
            "librarybackup (postgresql://b/librarybackup)"
        );
    }
}
