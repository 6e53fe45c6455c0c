//! Typed identities of the windows a request is counted against.

use std::{borrow::Cow, fmt};

/// One counting dimension. Renders to the storage key of its window.
///
/// Identifier parts are escaped before rendering so that a user or tool
/// name containing `:` can never produce the key of another dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DimensionKey {
    /// Every request reaching the gate. Renders as `global`.
    Global,
    /// All requests of one user. Renders as `user:<id>`.
    User {
        /// The calling user.
        user_id: String,
    },
    /// All calls of one tool, across users. Renders as `tool:<name>`.
    Tool {
        /// The called tool.
        tool: String,
    },
    /// Calls of one tool by one user. Renders as `user:<id>:tool:<name>`.
    UserTool {
        /// The calling user.
        user_id: String,
        /// The called tool.
        tool: String,
    },
    /// All resource reads. Renders as `resource:read`.
    ResourceRead,
    /// Resource reads of one user. Renders as `user:<id>:resource:read`.
    UserResourceRead {
        /// The calling user.
        user_id: String,
    },
}

/// The shape of a [`DimensionKey`], without its identifiers. Used as a metric attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionKind {
    /// See [`DimensionKey::Global`].
    Global,
    /// See [`DimensionKey::User`].
    User,
    /// See [`DimensionKey::Tool`].
    Tool,
    /// See [`DimensionKey::UserTool`].
    UserTool,
    /// See [`DimensionKey::ResourceRead`].
    ResourceRead,
    /// See [`DimensionKey::UserResourceRead`].
    UserResourceRead,
}

impl DimensionKind {
    /// Name used in metric attributes and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionKind::Global => "global",
            DimensionKind::User => "user",
            DimensionKind::Tool => "tool",
            DimensionKind::UserTool => "user_tool",
            DimensionKind::ResourceRead => "resource",
            DimensionKind::UserResourceRead => "user_resource",
        }
    }
}

impl DimensionKey {
    /// The dimension of one user.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self::User {
            user_id: user_id.into(),
        }
    }

    /// The tool-wide dimension of one tool.
    pub fn tool(tool: impl Into<String>) -> Self {
        Self::Tool { tool: tool.into() }
    }

    /// The dimension of one user calling one tool.
    pub fn user_tool(user_id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self::UserTool {
            user_id: user_id.into(),
            tool: tool.into(),
        }
    }

    /// The resource read dimension of one user.
    pub fn user_resource_read(user_id: impl Into<String>) -> Self {
        Self::UserResourceRead {
            user_id: user_id.into(),
        }
    }

    /// The shape of this key.
    pub fn kind(&self) -> DimensionKind {
        match self {
            DimensionKey::Global => DimensionKind::Global,
            DimensionKey::User { .. } => DimensionKind::User,
            DimensionKey::Tool { .. } => DimensionKind::Tool,
            DimensionKey::UserTool { .. } => DimensionKind::UserTool,
            DimensionKey::ResourceRead => DimensionKind::ResourceRead,
            DimensionKey::UserResourceRead { .. } => DimensionKind::UserResourceRead,
        }
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionKey::Global => f.write_str("global"),
            DimensionKey::User { user_id } => write!(f, "user:{}", escape(user_id)),
            DimensionKey::Tool { tool } => write!(f, "tool:{}", escape(tool)),
            DimensionKey::UserTool { user_id, tool } => {
                write!(f, "user:{}:tool:{}", escape(user_id), escape(tool))
            }
            DimensionKey::ResourceRead => f.write_str("resource:read"),
            DimensionKey::UserResourceRead { user_id } => write!(f, "user:{}:resource:read", escape(user_id)),
        }
    }
}

/// Percent-encodes the separator and the escape character itself.
fn escape(part: &str) -> Cow<'_, str> {
    if !part.contains([':', '%']) {
        return Cow::Borrowed(part);
    }

    let mut escaped = String::with_capacity(part.len() + 4);

    for c in part.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            c => escaped.push(c),
        }
    }

    Cow::Owned(escaped)
}
