/// A foreign key edge: child column referencing a parent column.
///
/// Used both for ordering tables before deletion and for rendering
/// remediation hints out of integrity violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FkEdge {
    pub child_database: String,
    pub child_table: String,
    pub child_column: String,
    pub parent_database: String,
    pub parent_table: String,
    pub parent_column: String,
}

/// Per-table facts a gateway learns during a run.
///
/// Values are monotonic for the lifetime of the run: once learned they are
/// never invalidated, and `prerequisites_checked` only flips false to true.
#[derive(Debug, Clone, Default)]
pub struct TableMeta {
    pub primary_key: Option<String>,
    pub pk_is_digit: Option<bool>,
    pub prerequisites_checked: bool,
}
