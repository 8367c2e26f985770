//! SQL identifier sanitization
//!
//! Every schema, table and column name the pipeline creates is derived from
//! untrusted text (document paths, JSON keys). [`sanitize`] maps that text onto
//! a lower-case identifier that is always safe to splice into DDL.

/// Postgres maximum identifier length in bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Postgres reserved key words that cannot be used as bare identifiers
const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc",
    "asymmetric", "authorization", "between", "binary", "both", "case",
    "cast", "check", "collate", "column", "constraint", "create", "cross",
    "current_catalog", "current_date", "current_role", "current_schema",
    "current_time", "current_timestamp", "current_user", "default",
    "deferrable", "desc", "distinct", "do", "else", "end", "except",
    "false", "fetch", "for", "foreign", "freeze", "from", "full", "grant",
    "group", "having", "ilike", "in", "initially", "inner", "intersect",
    "into", "is", "isnull", "join", "lateral", "leading", "left", "like",
    "limit", "localtime", "localtimestamp", "natural", "not", "notnull",
    "null", "offset", "on", "only", "or", "order", "outer", "over",
    "overlaps", "placing", "primary", "references", "returning", "right",
    "select", "session_user", "similar", "some", "symmetric", "table",
    "then", "to", "trailing", "true", "union", "unique", "user", "using",
    "variadic", "verbose", "when", "where", "window", "with",
];

/// Check whether `word` is a reserved key word (case-insensitive)
pub fn is_reserved_word(word: &str) -> bool {
    let lower = word.to_ascii_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
}

/// Convert arbitrary text into a safe lower-case identifier
///
/// **Algorithm:**
/// 1. Replace every character that is not an ASCII letter or digit with `_`
/// 2. Lower-case the result
/// 3. Empty input becomes `c_empty`
/// 4. A leading digit or a reserved key word gets a `c_` prefix
///
/// Never fails and never returns an empty string.
///
/// ```
/// use dref_common::identifier::sanitize;
///
/// assert_eq!(sanitize("3-session's notes"), "c_3_session_s_notes");
/// assert_eq!(sanitize("select"), "c_select");
/// assert_eq!(sanitize(""), "c_empty");
/// ```
pub fn sanitize(text: &str) -> String {
    let name: String = text
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect();

    if name.is_empty() {
        return "c_empty".to_string();
    }

    let starts_with_digit = name.chars().next().is_some_and(|c| c.is_ascii_digit());
    if starts_with_digit || is_reserved_word(&name) {
        format!("c_{}", name)
    } else {
        name
    }
}

/// Cut an identifier to at most `max_len` bytes
///
/// Sanitized identifiers are pure ASCII, so byte and char boundaries agree.
/// Falls back to a char-boundary search for anything else.
pub fn truncate_identifier(name: &str, max_len: usize) -> &str {
    if name.len() <= max_len {
        return name;
    }
    let mut end = max_len;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Check that `name` can be used unquoted in generated SQL
///
/// Accepts `[a-z_][a-z0-9_]*` up to [`MAX_IDENTIFIER_LEN`] bytes.
pub fn is_valid_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return false;
    }
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    first_ok && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Double-quote an identifier for SQL, escaping embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for SQL, escaping embedded single quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_punctuation_and_leading_digit() {
        assert_eq!(sanitize("3-session's notes"), "c_3_session_s_notes");
    }

    #[test]
    fn test_sanitize_reserved_word() {
        assert_eq!(sanitize("select"), "c_select");
        assert_eq!(sanitize("SELECT"), "c_select");
        assert_eq!(sanitize("Table"), "c_table");
    }

    #[test]
    fn test_sanitize_empty() {
        assert_eq!(sanitize(""), "c_empty");
    }

    #[test]
    fn test_sanitize_plain_names_unchanged() {
        assert_eq!(sanitize("spells"), "spells");
        assert_eq!(sanitize("spells-phb"), "spells_phb");
        assert_eq!(sanitize("CamelCase"), "camelcase");
    }

    #[test]
    fn test_sanitize_non_ascii_replaced() {
        assert_eq!(sanitize("élan"), "_lan");
        assert!(is_valid_identifier(&sanitize("日本語")));
    }

    #[test]
    fn test_sanitized_names_are_valid_identifiers() {
        for input in ["", "select", "9lives", "a b c", "__x__", "fluff-spells"] {
            let name = sanitize(input);
            assert!(is_valid_identifier(&name), "{:?} -> {:?}", input, name);
        }
    }

    #[test]
    fn test_truncate_identifier() {
        assert_eq!(truncate_identifier("abcdef", 3), "abc");
        assert_eq!(truncate_identifier("abc", 10), "abc");
    }

    #[test]
    fn test_is_valid_identifier_rejects() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("Abc"));
        assert!(!is_valid_identifier("a-b"));
        assert!(!is_valid_identifier(&"a".repeat(64)));
        assert!(is_valid_identifier(&"a".repeat(63)));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }
}
