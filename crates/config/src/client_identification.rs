//! Caller identification configuration.

use serde::Deserialize;

/// How the gate reads the caller's identity from a request.
///
/// Identity headers are expected to be set by the authenticating proxy in
/// front of the gate; the gate trusts them as-is.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientIdentificationConfig {
    /// HTTP header carrying the user identifier.
    pub user_id_header: String,
    /// HTTP header carrying the user role.
    pub role_header: String,
}

impl Default for ClientIdentificationConfig {
    fn default() -> Self {
        Self {
            user_id_header: "X-User-Id".to_string(),
            role_header: "X-User-Role".to_string(),
        }
    }
}
