/// Quote an identifier (database/table/column name) using backticks.
pub fn quote_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Build a backtick-qualified `db`.`table` name.
pub fn qualified_name(database: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(database), quote_ident(table))
}

/// Escape a string for use inside a MySQL single-quoted literal.
pub fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace('"', "\\\"")
        .replace('\0', "\\0")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_backtick_escaped() {
        assert_eq!(quote_ident("users"), "`users`");
        assert_eq!(quote_ident("odd`name"), "`odd``name`");
        assert_eq!(qualified_name("nova", "instances"), "`nova`.`instances`");
    }

    #[test]
    fn string_escaping_covers_quotes_and_control_bytes() {
        assert_eq!(escape_string("it's"), "it\\'s");
        assert_eq!(escape_string("a\\b"), "a\\\\b");
        assert_eq!(escape_string("line1\nline2"), "line1\\nline2");
        assert_eq!(escape_string("nul\0byte"), "nul\\0byte");
    }
}
