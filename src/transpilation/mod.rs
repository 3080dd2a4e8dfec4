//! Dialect-parametric SQL emission

mod dialect;
mod human_readable;

pub use dialect::SqlDialect;
pub use human_readable::HumanReadableSql;
