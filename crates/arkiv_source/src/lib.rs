mod engine;
mod ordering;
mod selection;

pub use engine::{DbSource, SourceConfig};
pub use ordering::{circular_tables, order_by_foreign_keys};
pub use selection::{DEFAULT_WHERE, SYSTEM_DATABASES, exclusion_regex, split_list};
