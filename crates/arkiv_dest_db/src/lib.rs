mod destination;
mod schema;

pub use destination::{DbDestConfig, DbDestination};
pub use schema::{compare_create_table, rename_database_create, rewrite_statement_name, strip_auto_increment};
