//! Runtime properties of a sharding data source.

use serde::{Deserialize, Serialize};
use shardline_core::ExecutorConfig;
use shardline_error::{Result, ShardError};
use shardline_types::DatabaseType;

fn default_fail_fast() -> bool {
    true
}

/// Dialect, executor sizing, and the default failure policy.
///
/// ```json
/// { "dialect": "mysql", "executor": { "executor_size": 8 }, "fail_fast": true }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingProperties {
    #[serde(default)]
    pub dialect: DatabaseType,
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Default for new statements; each statement may override it.
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
}

impl Default for ShardingProperties {
    fn default() -> Self {
        Self {
            dialect: DatabaseType::default(),
            executor: ExecutorConfig::default(),
            fail_fast: default_fail_fast(),
        }
    }
}

impl ShardingProperties {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ShardError::Config(format!("invalid properties: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let props = ShardingProperties::from_json_str(r#"{"dialect": "sqlserver"}"#).unwrap();
        assert_eq!(props.dialect, DatabaseType::SqlServer);
        assert!(props.fail_fast);
        assert_eq!(props.executor.shutdown_grace_ms, 5_000);
    }

    #[test]
    fn test_executor_override() {
        let props = ShardingProperties::from_json_str(
            r#"{"executor": {"executor_size": 3}, "fail_fast": false}"#,
        )
        .unwrap();
        assert_eq!(props.executor.executor_size, 3);
        assert!(!props.fail_fast);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = ShardingProperties::from_json_str("{").unwrap_err();
        assert!(matches!(err, ShardError::Config(_)));
    }
}
