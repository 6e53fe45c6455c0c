use std::sync::Arc;

use axum::{Extension, Json, extract::State};
use rate_limit::{RateLimitManager, RateLimitSnapshot};

use crate::client_identification::CallerIdentity;

/// Quota state of the calling user. Consumes no quota.
pub(crate) async fn rate_limit_snapshot(
    State(manager): State<Arc<RateLimitManager>>,
    Extension(identity): Extension<CallerIdentity>,
) -> Json<RateLimitSnapshot> {
    Json(manager.snapshot(&identity.user_id, identity.role).await)
}
