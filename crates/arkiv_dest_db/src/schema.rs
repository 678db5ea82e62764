use arkiv_core::ArchiveError;
use log::{debug, info};
use regex::Regex;
use std::sync::LazyLock;

static AUTO_INCREMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"AUTO_INCREMENT=\d+ ").expect("auto increment pattern compiles"));

/// Rewrite every backticked occurrence of a database name inside a
/// `SHOW CREATE DATABASE` statement, used when creating the archive copy.
pub fn rename_database_create(statement: &str, from: &str, to: &str) -> String {
    statement.replace(&format!("`{from}`"), &format!("`{to}`"))
}

/// Rewrite `<keyword> `from`` into `<keyword> `to``, used to compare the
/// archive object's create statement against the source's.
pub fn rewrite_statement_name(statement: &str, keyword: &str, from: &str, to: &str) -> String {
    statement.replace(
        &format!("{keyword} `{from}`"),
        &format!("{keyword} `{to}`"),
    )
}

/// Drop the `AUTO_INCREMENT=<n>` counter, which legitimately drifts between
/// source and archive.
pub fn strip_auto_increment(statement: &str) -> String {
    AUTO_INCREMENT_RE.replace_all(statement, "").into_owned()
}

/// Compare source and archive table create statements, ignoring the archive
/// name and the AUTO_INCREMENT counter. Any other difference is fatal.
pub fn compare_create_table(
    src_statement: &str,
    dst_statement: &str,
    src_table: &str,
    dst_table: &str,
) -> Result<(), ArchiveError> {
    let dst_statement = rewrite_statement_name(dst_statement, "TABLE", dst_table, src_table);
    let dst_statement = strip_auto_increment(&dst_statement);
    let src_statement = strip_auto_increment(src_statement);

    debug!("comparing source create statement {src_statement}");
    debug!("comparing destination create statement {dst_statement}");

    if dst_statement == src_statement {
        info!("source and destination tables are identical");
        return Ok(());
    }

    for (src_line, dst_line) in src_statement.lines().zip(dst_statement.lines()) {
        if src_line != dst_line {
            debug!("create statement diff: '{src_line}' != '{dst_line}'");
        }
    }
    Err(ArchiveError::NotEqualTableCreateStatements {
        table: src_table.to_string(),
    })
}
