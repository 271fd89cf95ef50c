//! Relational backend: dialects, statement rendering and caching, and the
//! SQL accessor.

mod accessor;
mod cache;
mod dialect;
mod render;

pub use accessor::SqlAccessor;
pub use cache::StatementCacheStats;
pub use dialect::{MySqlDialect, PostgresDialect, SqlDialect};
pub use render::render;
