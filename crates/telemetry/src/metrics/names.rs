//! Metric and attribute names. HTTP names follow the OpenTelemetry semantic conventions:
//! https://opentelemetry.io/docs/specs/semconv/http/http-metrics/

/// HTTP server request duration in milliseconds
pub const HTTP_SERVER_REQUEST_DURATION: &str = "http.server.request.duration";

/// Counter of per-dimension rate limit decisions ([`DIMENSION`], [`OUTCOME`])
pub const RATE_LIMIT_DECISIONS: &str = "rate_limit.decisions";

/// Counter of window store failures ([`DIMENSION`], [`STORE_ERROR`])
pub const RATE_LIMIT_STORE_ERRORS: &str = "rate_limit.store.errors";

/// Window store operation duration in milliseconds ([`STORE_BACKEND`], [`STORE_OPERATION`], [`STORE_OUTCOME`])
pub const RATE_LIMIT_STORE_DURATION: &str = "rate_limit.store.duration";

/// Kind of the checked dimension: `global`, `user`, `tool`, `user_tool`, `resource` or `user_resource`
pub const DIMENSION: &str = "rate_limit.dimension";

/// Decision for one dimension: `allowed`, `rejected`, `failed_open` or `failed_closed`
pub const OUTCOME: &str = "rate_limit.outcome";

/// Kind of store failure: `connection`, `query` or `timeout`
pub const STORE_ERROR: &str = "rate_limit.store.error";

/// Window store backend: `redis` or `memory`
pub const STORE_BACKEND: &str = "rate_limit.store.backend";

/// Window store operation, such as `count` or `check_and_record`
pub const STORE_OPERATION: &str = "rate_limit.store.operation";

/// `ok`, or the kind of store failure
pub const STORE_OUTCOME: &str = "rate_limit.store.outcome";
