//! Resolved sharding rule: table rules, strategies, and binding groups.

use std::collections::BTreeSet;

use shardline_error::{Result, ShardError};

use crate::algorithm::{build_algorithm, ExpressionRegistry, ShardingStrategy, ShardingValues};
use crate::config::{expand_inline, DataNode, ShardingConfig, StrategyConfig};

/// Where one logic table lives and how its rows are split.
#[derive(Debug, Clone)]
pub struct TableRule {
    logic_table: String,
    data_nodes: Vec<DataNode>,
    database_strategy: Option<ShardingStrategy>,
    table_strategy: Option<ShardingStrategy>,
    generated_key_column: Option<String>,
}

impl TableRule {
    /// Build a rule directly. `data_nodes` must not be empty.
    pub fn new(
        logic_table: impl Into<String>,
        data_nodes: Vec<DataNode>,
        database_strategy: Option<ShardingStrategy>,
        table_strategy: Option<ShardingStrategy>,
    ) -> Result<Self> {
        let logic_table = logic_table.into();
        if data_nodes.is_empty() {
            return Err(ShardError::Config(format!(
                "table '{logic_table}' has no data nodes"
            )));
        }
        Ok(Self {
            logic_table,
            data_nodes,
            database_strategy,
            table_strategy,
            generated_key_column: None,
        })
    }

    #[must_use]
    pub fn with_generated_key(mut self, column: impl Into<String>) -> Self {
        self.generated_key_column = Some(column.into());
        self
    }

    #[must_use]
    pub fn logic_table(&self) -> &str {
        &self.logic_table
    }

    #[must_use]
    pub fn data_nodes(&self) -> &[DataNode] {
        &self.data_nodes
    }

    #[must_use]
    pub fn generated_key_column(&self) -> Option<&str> {
        self.generated_key_column.as_deref()
    }

    /// Data sources holding this table, in first-seen order.
    #[must_use]
    pub fn data_source_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.data_nodes
            .iter()
            .filter(|n| seen.insert(n.data_source.as_str()))
            .map(|n| n.data_source.clone())
            .collect()
    }

    /// Physical tables of this rule inside `data_source`, in node order.
    #[must_use]
    pub fn tables_in(&self, data_source: &str) -> Vec<String> {
        self.data_nodes
            .iter()
            .filter(|n| n.data_source == data_source)
            .map(|n| n.table.clone())
            .collect()
    }

    /// Position of `table` among the physical tables in `data_source`.
    #[must_use]
    pub fn table_index(&self, data_source: &str, table: &str) -> Option<usize> {
        self.data_nodes
            .iter()
            .filter(|n| n.data_source == data_source)
            .position(|n| n.table == table)
    }

    /// Every sharding column of both strategies, lowercased.
    #[must_use]
    pub fn sharding_columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for strategy in [&self.database_strategy, &self.table_strategy].into_iter().flatten() {
            for column in strategy.columns() {
                if !columns.contains(&column.as_str()) {
                    columns.push(column);
                }
            }
        }
        columns
    }

    /// Data nodes selected by `values`. A strategy whose columns are not
    /// all pinned leaves its level unnarrowed.
    pub fn route(&self, values: &ShardingValues) -> Result<Vec<DataNode>> {
        let all_sources = self.data_source_names();
        let sources = match &self.database_strategy {
            Some(strategy) => strategy.shard(&self.logic_table, &all_sources, values)?,
            None => all_sources,
        };
        let mut nodes = Vec::new();
        for source in sources {
            let available = self.tables_in(&source);
            let tables = match &self.table_strategy {
                Some(strategy) => strategy.shard(&self.logic_table, &available, values)?,
                None => available,
            };
            nodes.extend(tables.into_iter().map(|table| DataNode {
                data_source: source.clone(),
                table,
            }));
        }
        Ok(nodes)
    }
}

/// The full sharding rule consulted by the router.
#[derive(Debug, Clone, Default)]
pub struct ShardingRule {
    data_sources: Vec<String>,
    default_data_source: Option<String>,
    tables: Vec<TableRule>,
    /// Lowercased logic table names per group.
    binding_groups: Vec<Vec<String>>,
}

impl ShardingRule {
    /// Rule with explicit table rules and no binding groups.
    #[must_use]
    pub fn new(tables: Vec<TableRule>, default_data_source: Option<String>) -> Self {
        let mut data_sources: Vec<String> = Vec::new();
        for name in tables.iter().flat_map(TableRule::data_source_names) {
            if !data_sources.contains(&name) {
                data_sources.push(name);
            }
        }
        if let Some(default) = &default_data_source {
            if !data_sources.contains(default) {
                data_sources.push(default.clone());
            }
        }
        Self {
            data_sources,
            default_data_source,
            tables,
            binding_groups: Vec::new(),
        }
    }

    /// Resolve `config` into a rule, instantiating algorithms.
    pub fn from_config(config: &ShardingConfig, registry: &ExpressionRegistry) -> Result<Self> {
        let build_strategy =
            |strategy: Option<&StrategyConfig>| -> Result<Option<ShardingStrategy>> {
                strategy
                    .map(|s| {
                        if s.sharding_columns.is_empty() {
                            return Err(ShardError::Config(
                                "sharding strategy names no columns".to_owned(),
                            ));
                        }
                        Ok(ShardingStrategy::new(
                            s.sharding_columns.clone(),
                            build_algorithm(&s.algorithm, registry)?,
                        ))
                    })
                    .transpose()
            };

        let mut tables = Vec::with_capacity(config.tables.len());
        for table in &config.tables {
            let nodes = match &table.actual_data_nodes {
                Some(spec) => expand_inline(spec)?
                    .iter()
                    .map(|n| DataNode::parse(n))
                    .collect::<Result<Vec<_>>>()?,
                None => config
                    .data_sources
                    .iter()
                    .map(|ds| DataNode {
                        data_source: ds.clone(),
                        table: table.logic_table.clone(),
                    })
                    .collect(),
            };
            if !config.data_sources.is_empty() {
                if let Some(stray) = nodes
                    .iter()
                    .find(|n| !config.data_sources.contains(&n.data_source))
                {
                    return Err(ShardError::Config(format!(
                        "table '{}' uses undeclared data source '{}'",
                        table.logic_table, stray.data_source
                    )));
                }
            }
            let database_strategy = build_strategy(
                table
                    .database_strategy
                    .as_ref()
                    .or(config.default_database_strategy.as_ref()),
            )?;
            let table_strategy = build_strategy(
                table
                    .table_strategy
                    .as_ref()
                    .or(config.default_table_strategy.as_ref()),
            )?;
            let mut rule = TableRule::new(
                table.logic_table.clone(),
                nodes,
                database_strategy,
                table_strategy,
            )?;
            rule.generated_key_column = table.generated_key_column.clone();
            tables.push(rule);
        }

        let mut rule = Self::new(tables, config.default_data_source.clone());
        for ds in &config.data_sources {
            if !rule.data_sources.contains(ds) {
                rule.data_sources.push(ds.clone());
            }
        }
        for group in &config.binding_tables {
            let mut lowered = Vec::with_capacity(group.len());
            for name in group {
                if rule.find_table_rule(name).is_none() {
                    return Err(ShardError::Config(format!(
                        "binding table '{name}' has no table rule"
                    )));
                }
                lowered.push(name.to_ascii_lowercase());
            }
            rule.binding_groups.push(lowered);
        }
        tracing::debug!(
            target: "shardline.route",
            tables = rule.tables.len(),
            data_sources = rule.data_sources.len(),
            binding_groups = rule.binding_groups.len(),
            "sharding rule built"
        );
        Ok(rule)
    }

    /// Declare `tables` as routing together.
    pub fn add_binding_group(&mut self, tables: &[&str]) -> Result<()> {
        for name in tables {
            if self.find_table_rule(name).is_none() {
                return Err(ShardError::Config(format!(
                    "binding table '{name}' has no table rule"
                )));
            }
        }
        self.binding_groups
            .push(tables.iter().map(|t| t.to_ascii_lowercase()).collect());
        Ok(())
    }

    /// Case-insensitive lookup.
    #[must_use]
    pub fn find_table_rule(&self, logic_table: &str) -> Option<&TableRule> {
        self.tables
            .iter()
            .find(|t| t.logic_table.eq_ignore_ascii_case(logic_table))
    }

    /// Whether `a` and `b` belong to one binding group.
    #[must_use]
    pub fn is_binding(&self, a: &str, b: &str) -> bool {
        let (a, b) = (a.to_ascii_lowercase(), b.to_ascii_lowercase());
        self.binding_groups
            .iter()
            .any(|g| g.contains(&a) && g.contains(&b))
    }

    #[must_use]
    pub fn default_data_source(&self) -> Option<&str> {
        self.default_data_source.as_deref()
    }

    /// Every data source named by the rule.
    #[must_use]
    pub fn data_source_names(&self) -> &[String] {
        &self.data_sources
    }

    #[must_use]
    pub fn table_rules(&self) -> &[TableRule] {
        &self.tables
    }
}
