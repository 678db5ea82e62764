use arkiv_core::Row;
use log::warn;
use regex::Regex;
use std::sync::LazyLock;

/// Pattern over the server's human-readable integrity-violation text, e.g.
/// `Cannot delete or update a parent row: a foreign key constraint fails
/// (`db`.`child`, CONSTRAINT `fk` FOREIGN KEY (`col`) REFERENCES `parent`
/// (`id`))`.
static FK_VIOLATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)^.+fails \(`(?P<db>.+)`\.`(?P<table>.+)`, CONSTRAINT `.+` FOREIGN KEY \(`(?P<fk>.+)`\) REFERENCES `(?P<ref_table>.+)` \(`(?P<ref_column>.+)`\)\)$",
    )
    .expect("foreign key violation pattern compiles")
});

/// Parsed fields of a foreign key integrity violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FkViolation {
    /// Database holding the child table.
    pub database: String,
    /// Child table still referencing the row being deleted.
    pub table: String,
    /// Foreign key column on the child table.
    pub fk_column: String,
    /// Parent table the delete was issued against.
    pub referenced_table: String,
    /// Referenced column on the parent table.
    pub referenced_column: String,
}

/// Parse a foreign key violation message. Returns `None` (and warns) when
/// the text does not match, which callers log as-is.
pub fn parse_fk_violation(error: &str) -> Option<FkViolation> {
    let Some(caps) = FK_VIOLATION_RE.captures(error) else {
        warn!(
            "SQL error '{error}' does not match regexp '{}'",
            FK_VIOLATION_RE.as_str()
        );
        return None;
    };

    Some(FkViolation {
        database: caps["db"].to_string(),
        table: caps["table"].to_string(),
        fk_column: caps["fk"].to_string(),
        referenced_table: caps["ref_table"].to_string(),
        referenced_column: caps["ref_column"].to_string(),
    })
}

/// Render a SELECT that lists the orphan children blocking the delete of
/// `row`. Diagnostic only, never executed.
pub fn select_hint(error: &str, row: &Row) -> String {
    let Some(violation) = parse_fk_violation(error) else {
        return format!("Unable to parse exception, here data: {row:?}");
    };

    let parent_value = row
        .get(violation.referenced_column.as_str())
        .map(|value| value.as_plain_string())
        .unwrap_or_default();

    format!(
        "SELECT * FROM `{}`.`{}` WHERE `{}` = '{}'",
        violation.database, violation.table, violation.fk_column, parent_value
    )
}

/// Render an UPDATE that propagates the parent's deleted-column into orphan
/// children so a later run can delete them. Diagnostic only, never executed.
pub fn fix_hint(error: &str, row: &Row, deleted_column: &str) -> String {
    let Some(violation) = parse_fk_violation(error) else {
        return format!("Unable to parse exception, here data: {row:?}");
    };

    let parent_value = row
        .get(violation.referenced_column.as_str())
        .map(|value| value.as_plain_string())
        .unwrap_or_default();
    let is_digit = !parent_value.is_empty() && parent_value.bytes().all(|b| b.is_ascii_digit());
    let rendered_value = if is_digit {
        parent_value
    } else {
        format!("'{parent_value}'")
    };

    format!(
        "UPDATE `{db}`.`{table}` INNER JOIN `{db}`.`{ref_table}` ON \
         `{db}`.`{ref_table}`.`{ref_column}` = `{db}`.`{table}`.`{fk}` \
         SET `{db}`.`{table}`.`{deleted}` = `{db}`.`{ref_table}`.`{deleted}` \
         WHERE {fk} = {value} AND `{db}`.`{table}`.`{deleted}` IS NULL",
        db = violation.database,
        table = violation.table,
        ref_table = violation.referenced_table,
        ref_column = violation.referenced_column,
        fk = violation.fk_column,
        deleted = deleted_column,
        value = rendered_value,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use arkiv_core::Value;

    const ERROR: &str = "Cannot delete or update a parent row: a foreign key constraint fails \
        (`nova`.`instance_metadata`, CONSTRAINT `instance_metadata_instance_uuid_fkey` \
        FOREIGN KEY (`instance_uuid`) REFERENCES `instances` (`uuid`))";

    fn parent_row(uuid: &str) -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Int(12));
        row.insert("uuid".to_string(), Value::Text(uuid.to_string()));
        row
    }

    #[test]
    fn parses_driver_violation_text() {
        let violation = parse_fk_violation(ERROR).unwrap();
        assert_eq!(violation.database, "nova");
        assert_eq!(violation.table, "instance_metadata");
        assert_eq!(violation.fk_column, "instance_uuid");
        assert_eq!(violation.referenced_table, "instances");
        assert_eq!(violation.referenced_column, "uuid");
    }

    #[test]
    fn unparseable_text_yields_fallback() {
        assert!(parse_fk_violation("Deadlock found").is_none());
        let hint = select_hint("Deadlock found", &parent_row("x"));
        assert!(hint.starts_with("Unable to parse exception"));
    }

    #[test]
    fn select_hint_targets_orphan_children() {
        let hint = select_hint(ERROR, &parent_row("86a0ac7b"));
        assert_eq!(
            hint,
            "SELECT * FROM `nova`.`instance_metadata` WHERE `instance_uuid` = '86a0ac7b'"
        );
    }

    #[test]
    fn fix_hint_propagates_deleted_column_and_quotes_non_digit_keys() {
        let hint = fix_hint(ERROR, &parent_row("86a0ac7b"), "deleted_at");
        assert!(hint.contains("UPDATE `nova`.`instance_metadata` INNER JOIN `nova`.`instances`"));
        assert!(hint.contains(
            "SET `nova`.`instance_metadata`.`deleted_at` = `nova`.`instances`.`deleted_at`"
        ));
        assert!(hint.contains("WHERE instance_uuid = '86a0ac7b'"));
        assert!(hint.ends_with("AND `nova`.`instance_metadata`.`deleted_at` IS NULL"));
    }

    #[test]
    fn fix_hint_keeps_digit_keys_unquoted() {
        let error = "Cannot delete or update a parent row: a foreign key constraint fails \
            (`shop`.`order_line`, CONSTRAINT `order_line_ibfk_1` \
            FOREIGN KEY (`order_id`) REFERENCES `orders` (`id`))";
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Int(41));
        let hint = fix_hint(error, &row, "deleted_at");
        assert!(hint.contains("WHERE order_id = 41 AND"));
    }
}
