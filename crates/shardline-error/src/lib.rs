use std::fmt;

use thiserror::Error;

/// Primary error type for shardline operations.
///
/// Variants are grouped by the stage of the pipeline that raises them: parse
/// and routing errors reject a statement before any shard is touched,
/// execution errors are subject to the per-call failure policy, aggregate
/// errors summarize fan-out over many physical connections, and shutdown
/// errors are always fatal.
#[derive(Error, Debug)]
pub enum ShardError {
    // === Parse Errors ===
    /// Malformed SQL fragment.
    #[error("SQL error at {line}:{col} (offset {offset}): {message}")]
    Parse {
        offset: usize,
        line: u32,
        col: u32,
        message: String,
    },

    // === Routing Errors ===
    /// A logical table has no sharding rule and no default data source exists.
    #[error("no sharding rule configured for table '{table}'")]
    NoShardingRule { table: String },

    /// A logical or physical data-source name could not be resolved.
    #[error("no data source named '{name}'")]
    NoDataSource { name: String },

    /// The shard-resolution capability produced no target for a key value.
    #[error("no shard of '{logic_name}' matches value {value}")]
    NoMatchingShard { logic_name: String, value: String },

    /// A user-supplied sharding expression produced an unusable identifier.
    #[error("ill-formed sharding expression '{expression}': {detail}")]
    IllFormedExpression { expression: String, detail: String },

    /// A condition shape the selected algorithm cannot evaluate.
    #[error("sharding algorithm '{algorithm}' cannot evaluate {condition} conditions")]
    UnsupportedCondition {
        algorithm: &'static str,
        condition: &'static str,
    },

    /// A placeholder referenced by a condition or limit has no bound value.
    #[error("no value bound for parameter {index}")]
    MissingParameter { index: usize },

    // === Rewrite Errors ===
    /// The edit list violates ordering or bounds invariants.
    #[error("invalid rewrite: {detail}")]
    Rewrite { detail: String },

    // === Execution Errors ===
    /// A physical connection or statement failed.
    #[error("data source '{data_source}' failed: {message}")]
    Physical {
        data_source: String,
        message: String,
    },

    /// One or more physical connections failed during a fan-out operation.
    #[error("{operation} failed on {} connection(s): {}", .failures.len(), join_failures(.failures))]
    Aggregate {
        operation: &'static str,
        failures: Vec<ShardError>,
    },

    /// The logical connection has already been closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Work was cancelled before it started because the engine shut down.
    #[error("execution cancelled by engine shutdown")]
    Cancelled,

    // === Shutdown Errors ===
    /// The engine no longer accepts work.
    #[error("execution engine is shut down")]
    ExecutorShutdown,

    /// In-flight work did not finish within the grace period.
    #[error("execution engine did not terminate within {grace_ms} ms")]
    ShutdownTimeout { grace_ms: u64 },

    // === Usage Errors ===
    /// Operation outside the supported capability subset.
    #[error("unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    // === Internal ===
    /// Internal logic error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

fn join_failures(failures: &[ShardError]) -> String {
    let mut out = String::new();
    for (i, failure) in failures.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        out.push_str(&failure.to_string());
    }
    out
}

/// Coarse classification of [`ShardError`] used by callers to decide policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Parse,
    Routing,
    Execution,
    ConnectionAggregate,
    Shutdown,
    Usage,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parse => "parse",
            Self::Routing => "routing",
            Self::Execution => "execution",
            Self::ConnectionAggregate => "connection-aggregate",
            Self::Shutdown => "shutdown",
            Self::Usage => "usage",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl ShardError {
    /// Map this error to its category.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Parse { .. } => ErrorCategory::Parse,
            Self::NoShardingRule { .. }
            | Self::NoDataSource { .. }
            | Self::NoMatchingShard { .. }
            | Self::IllFormedExpression { .. }
            | Self::UnsupportedCondition { .. }
            | Self::MissingParameter { .. }
            | Self::Rewrite { .. } => ErrorCategory::Routing,
            Self::Physical { .. } | Self::ConnectionClosed | Self::Cancelled => {
                ErrorCategory::Execution
            }
            Self::Aggregate { .. } => ErrorCategory::ConnectionAggregate,
            Self::ExecutorShutdown | Self::ShutdownTimeout { .. } => ErrorCategory::Shutdown,
            Self::Unsupported { .. } | Self::Config(_) => ErrorCategory::Usage,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether this error rejects the statement before any shard is touched.
    pub const fn is_terminal_before_execution(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Parse | ErrorCategory::Routing
        )
    }

    /// Whether this error must never be swallowed by the failure policy.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ShutdownTimeout { .. } | Self::Internal(_))
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NoShardingRule { .. } => {
                Some("Add a table rule or configure a default data source")
            }
            Self::NoDataSource { .. } => Some("Check the data-source names in the sharding rule"),
            Self::UnsupportedCondition { .. } => {
                Some("Use an equality or IN predicate on the sharding column")
            }
            Self::ShutdownTimeout { .. } => {
                Some("Increase shutdown_grace_ms or cancel long-running statements")
            }
            _ => None,
        }
    }

    /// Create a physical execution error.
    pub fn physical(data_source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Physical {
            data_source: data_source.into(),
            message: message.into(),
        }
    }

    /// Create a rewrite invariant error.
    pub fn rewrite(detail: impl Into<String>) -> Self {
        Self::Rewrite {
            detail: detail.into(),
        }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Collapse collected failures into `Ok` or a single aggregate error.
    pub fn aggregate(operation: &'static str, failures: Vec<Self>) -> Result<()> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self::Aggregate {
                operation,
                failures,
            })
        }
    }
}

/// Result type alias using `ShardError`.
pub type Result<T> = std::result::Result<T, ShardError>;
