// Clause parsers. Each consumes one clause from a `TokenCursor` and
// records what it finds in the `SqlStatement`.

pub mod ddl;
pub mod expr;
pub mod limit;
pub mod set_items;
pub mod table;
