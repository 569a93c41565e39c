//! Declarative sharding configuration.
//!
//! The configuration is plain data deserialized with serde. It is turned
//! into a [`ShardingRule`](crate::rule::ShardingRule) by
//! [`ShardingRule::from_config`](crate::rule::ShardingRule::from_config),
//! which also resolves expression algorithms against an
//! [`ExpressionRegistry`](crate::algorithm::ExpressionRegistry).
//!
//! Data node lists accept inline notation so that a table spread over many
//! shards does not need to be spelled out:
//!
//! ```text
//! ds_${0..1}.orders_${0..3}      -> ds_0.orders_0 .. ds_1.orders_3
//! ds_${[east, west]}.orders      -> ds_east.orders, ds_west.orders
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shardline_error::{Result, ShardError};

/// Top-level sharding configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// Data source for statements that touch no sharded table.
    #[serde(default)]
    pub default_data_source: Option<String>,

    /// Logical data source names known to the rule.
    #[serde(default)]
    pub data_sources: Vec<String>,

    #[serde(default)]
    pub tables: Vec<TableRuleConfig>,

    /// Groups of logic tables that always shard identically.
    #[serde(default)]
    pub binding_tables: Vec<Vec<String>>,

    #[serde(default)]
    pub default_database_strategy: Option<StrategyConfig>,

    #[serde(default)]
    pub default_table_strategy: Option<StrategyConfig>,
}

impl ShardingConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ShardError::Config(format!("invalid sharding config: {e}")))
    }
}

/// Sharding rule for one logic table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRuleConfig {
    pub logic_table: String,

    /// Comma-separated `data_source.table` nodes, inline notation allowed.
    /// When absent the table lives under its logic name in every data source.
    #[serde(default)]
    pub actual_data_nodes: Option<String>,

    #[serde(default)]
    pub database_strategy: Option<StrategyConfig>,

    #[serde(default)]
    pub table_strategy: Option<StrategyConfig>,

    /// Column filled by the key generator when an INSERT omits it.
    #[serde(default)]
    pub generated_key_column: Option<String>,
}

/// Sharding columns plus the algorithm that maps their values to targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub sharding_columns: Vec<String>,
    pub algorithm: AlgorithmConfig,
}

/// Built-in algorithms and the named-expression escape hatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlgorithmConfig {
    /// Target whose name ends in `_{value % n}`. `n` defaults to the number
    /// of available targets.
    Modulo {
        #[serde(default)]
        shard_count: Option<u32>,
    },
    /// Inclusive integer ranges mapped to targets.
    Range { ranges: Vec<RangeEntry> },
    /// Exact key text mapped to a target.
    Lookup { entries: BTreeMap<String, String> },
    /// A closure registered under `name` in the expression registry.
    Expression { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeEntry {
    pub lower: i64,
    pub upper: i64,
    pub target: String,
}

/// A physical table in a physical data source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataNode {
    pub data_source: String,
    pub table: String,
}

impl DataNode {
    /// Parse `data_source.table`.
    pub fn parse(node: &str) -> Result<Self> {
        let Some((ds, table)) = node.trim().split_once('.') else {
            return Err(ShardError::Config(format!(
                "data node '{node}' must be written as data_source.table"
            )));
        };
        if ds.is_empty() || table.is_empty() {
            return Err(ShardError::Config(format!("data node '{node}' has an empty part")));
        }
        Ok(Self {
            data_source: ds.to_owned(),
            table: table.to_owned(),
        })
    }
}

/// Expand inline notation in a comma-separated list.
pub fn expand_inline(expression: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for segment in split_top_level(expression)? {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        out.extend(expand_segment(segment)?);
    }
    Ok(out)
}

/// Split on commas outside `${...}`.
fn split_top_level(expression: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let bytes = expression.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                depth += 1;
                i += 1;
            }
            b'}' if depth > 0 => depth -= 1,
            b',' if depth == 0 => {
                parts.push(&expression[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    if depth != 0 {
        return Err(ShardError::Config(format!(
            "unterminated '${{' in '{expression}'"
        )));
    }
    parts.push(&expression[start..]);
    Ok(parts)
}

fn expand_segment(segment: &str) -> Result<Vec<String>> {
    let Some(open) = segment.find("${") else {
        return Ok(vec![segment.to_owned()]);
    };
    let close = segment[open..]
        .find('}')
        .map(|rel| open + rel)
        .ok_or_else(|| ShardError::Config(format!("unterminated '${{' in '{segment}'")))?;
    let prefix = &segment[..open];
    let choices = expand_group(segment[open + 2..close].trim(), segment)?;
    let suffixes = expand_segment(&segment[close + 1..])?;
    let mut out = Vec::with_capacity(choices.len() * suffixes.len());
    for choice in &choices {
        for suffix in &suffixes {
            out.push(format!("{prefix}{choice}{suffix}"));
        }
    }
    Ok(out)
}

fn expand_group(body: &str, segment: &str) -> Result<Vec<String>> {
    if let Some(list) = body.strip_prefix('[').and_then(|b| b.strip_suffix(']')) {
        return Ok(list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect());
    }
    if let Some((lo, hi)) = body.split_once("..") {
        let bad = || ShardError::Config(format!("bad range '{body}' in '{segment}'"));
        let lo: i64 = lo.trim().parse().map_err(|_| bad())?;
        let hi: i64 = hi.trim().parse().map_err(|_| bad())?;
        if lo > hi {
            return Err(bad());
        }
        return Ok((lo..=hi).map(|n| n.to_string()).collect());
    }
    Err(ShardError::Config(format!(
        "unsupported inline expression '${{{body}}}' in '{segment}'"
    )))
}
