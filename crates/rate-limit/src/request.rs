//! Request information for rate limiting.

use config::UserRole;

/// What a request does, as far as quotas are concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// A call of the named tool.
    Tool(String),
    /// A read of a resource.
    ResourceRead,
}

/// Information about a request that needs to be rate limited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRequest {
    /// The authenticated user issuing the request.
    pub user_id: String,
    /// Role of the user, selecting the per-user quota tier.
    pub role: UserRole,
    /// The operation, if it is one with its own quotas.
    pub operation: Option<Operation>,
}

impl RateLimitRequest {
    /// Create a new builder for a request by `user_id`.
    pub fn builder(user_id: impl Into<String>) -> RateLimitRequestBuilder {
        RateLimitRequestBuilder {
            user_id: user_id.into(),
            role: UserRole::Default,
            operation: None,
        }
    }
}

/// Builder for creating rate limit requests.
#[derive(Debug)]
pub struct RateLimitRequestBuilder {
    user_id: String,
    role: UserRole,
    operation: Option<Operation>,
}

impl RateLimitRequestBuilder {
    /// Set the role of the user.
    pub fn role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }

    /// Mark the request as a call of the given tool.
    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.operation = Some(Operation::Tool(name.into()));
        self
    }

    /// Mark the request as a resource read.
    pub fn resource_read(mut self) -> Self {
        self.operation = Some(Operation::ResourceRead);
        self
    }

    /// Build the rate limit request.
    pub fn build(self) -> RateLimitRequest {
        RateLimitRequest {
            user_id: self.user_id,
            role: self.role,
            operation: self.operation,
        }
    }
}
