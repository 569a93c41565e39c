pub mod kind;
pub mod value;

pub use kind::{DatabaseType, IsolationLevel, SqlKind};
pub use value::ShardValue;
