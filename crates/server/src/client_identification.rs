mod middleware;

use config::{ClientIdentificationConfig, UserRole};
use http::Request;
pub(crate) use middleware::ClientIdentificationLayer;

/// The user a request is made on behalf of, as stated by the platform in front of the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CallerIdentity {
    pub user_id: String,
    pub role: UserRole,
}

/// Errors that can occur during client identification extraction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum ClientIdentificationError {
    /// The user id header is absent or blank.
    #[error("The {header} header is required")]
    MissingUserId { header: String },
    /// The user id header is not visible ASCII.
    #[error("The {header} header must be visible ASCII")]
    InvalidUserId { header: String },
}

/// Reads the caller identity from the configured headers.
///
/// The user id is required. A missing or unknown role falls back to the default role.
pub(crate) fn extract_caller_identity<B>(
    req: &Request<B>,
    config: &ClientIdentificationConfig,
) -> Result<CallerIdentity, ClientIdentificationError> {
    let header = &config.user_id_header;

    let value = req
        .headers()
        .get(header.as_str())
        .ok_or_else(|| ClientIdentificationError::MissingUserId { header: header.clone() })?;

    let user_id = value
        .to_str()
        .map_err(|_| ClientIdentificationError::InvalidUserId { header: header.clone() })?
        .trim();

    if user_id.is_empty() {
        return Err(ClientIdentificationError::MissingUserId { header: header.clone() });
    }

    let role = match req.headers().get(config.role_header.as_str()).map(|v| v.to_str()) {
        Some(Ok(value)) => value.parse().unwrap_or_else(|_| {
            log::debug!("Unknown role '{value}' for user '{user_id}', using the default role");
            UserRole::Default
        }),
        Some(Err(_)) | None => UserRole::Default,
    };

    Ok(CallerIdentity {
        user_id: user_id.to_string(),
        role,
    })
}
