//! Caller roles used for role-tiered user quotas.

use std::{fmt, str::FromStr};

use serde::Deserialize;

/// Role of the user issuing a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Platform administrators.
    Admin,
    /// Developers integrating with the platform.
    Developer,
    /// Analysts working on extracted data.
    Analyst,
    /// Read-mostly users.
    Viewer,
    /// Autonomous agents calling tools.
    AiAgent,
    /// Any caller without a more specific role.
    #[default]
    Default,
}

impl UserRole {
    /// Every role, in declaration order.
    pub const ALL: [UserRole; 6] = [
        UserRole::Admin,
        UserRole::Developer,
        UserRole::Analyst,
        UserRole::Viewer,
        UserRole::AiAgent,
        UserRole::Default,
    ];

    /// Parses a role as sent by the caller. Unknown roles become [`UserRole::Default`].
    pub fn from_header(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }

    /// The canonical lowercase name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Developer => "developer",
            UserRole::Analyst => "analyst",
            UserRole::Viewer => "viewer",
            UserRole::AiAgent => "ai_agent",
            UserRole::Default => "default",
        }
    }
}

impl FromStr for UserRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        UserRole::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a role name that is not known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown user role '{}'", self.0)
    }
}

impl std::error::Error for UnknownRole {}
