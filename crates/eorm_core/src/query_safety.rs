#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanState {
    Normal,
    LineComment,
    BlockComment,
    SingleQuote,
    DoubleQuote,
}

pub fn is_safe_read_query(sql: &str) -> bool {
    let stripped = strip_comments(sql);
    let trimmed = stripped.trim();

    if trimmed.is_empty() {
        return false;
    }

    if has_multiple_statements(trimmed) {
        return false;
    }

    let Some(keyword) = first_keyword(trimmed) else {
        return false;
    };

    matches!(
        keyword.as_str(),
        "SELECT" | "SHOW" | "EXPLAIN" | "WITH" | "DESC" | "DESCRIBE"
    )
}

pub fn strip_comments(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut result = String::with_capacity(sql.len());
    let mut index = 0;
    let mut state = ScanState::Normal;

    while index < chars.len() {
        let current = chars[index];
        let next = chars.get(index + 1).copied();

        match state {
            ScanState::Normal => {
                if current == '-' && next == Some('-') {
                    state = ScanState::LineComment;
                    index += 2;
                    continue;
                }

                if current == '/' && next == Some('*') {
                    state = ScanState::BlockComment;
                    index += 2;
                    continue;
                }

                if current == '\'' {
                    state = ScanState::SingleQuote;
                } else if current == '"' {
                    state = ScanState::DoubleQuote;
                }

                result.push(current);
                index += 1;
            }

            ScanState::LineComment => {
                if current == '\n' {
                    result.push('\n');
                    state = ScanState::Normal;
                }
                index += 1;
            }

            ScanState::BlockComment => {
                if current == '*' && next == Some('/') {
                    state = ScanState::Normal;
                    index += 2;
                } else {
                    index += 1;
                }
            }

            ScanState::SingleQuote => {
                result.push(current);

                if current == '\'' {
                    if next == Some('\'') {
                        result.push('\'');
                        index += 2;
                        continue;
                    }
                    state = ScanState::Normal;
                }

                index += 1;
            }

            ScanState::DoubleQuote => {
                result.push(current);

                if current == '"' {
                    if next == Some('"') {
                        result.push('"');
                        index += 2;
                        continue;
                    }
                    state = ScanState::Normal;
                }

                index += 1;
            }
        }
    }

    result
}

/// Replace every character that lives inside a string literal or a comment
/// with a space, keeping the result the same length (and therefore the same
/// byte/char offsets) as the input. Lets callers run plain substring/regex
/// search for top-level keywords (`ORDER BY`, a FROM-clause identifier, an
/// existing `LIMIT`) without matching text that only looks like SQL because
/// it sits inside a literal or a comment.
pub fn mask_non_code(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut result = String::with_capacity(sql.len());
    let mut index = 0;
    let mut state = ScanState::Normal;

    while index < chars.len() {
        let current = chars[index];
        let next = chars.get(index + 1).copied();

        match state {
            ScanState::Normal => {
                if current == '-' && next == Some('-') {
                    state = ScanState::LineComment;
                    result.push(' ');
                    result.push(' ');
                    index += 2;
                    continue;
                }
                if current == '/' && next == Some('*') {
                    state = ScanState::BlockComment;
                    result.push(' ');
                    result.push(' ');
                    index += 2;
                    continue;
                }
                if current == '\'' {
                    state = ScanState::SingleQuote;
                } else if current == '"' {
                    state = ScanState::DoubleQuote;
                }
                result.push(current);
                index += 1;
            }
            ScanState::LineComment => {
                if current == '\n' {
                    result.push('\n');
                    state = ScanState::Normal;
                } else {
                    result.push(' ');
                }
                index += 1;
            }
            ScanState::BlockComment => {
                if current == '*' && next == Some('/') {
                    result.push(' ');
                    result.push(' ');
                    state = ScanState::Normal;
                    index += 2;
                } else {
                    result.push(if current == '\n' { '\n' } else { ' ' });
                    index += 1;
                }
            }
            ScanState::SingleQuote => {
                if current == '\'' {
                    if next == Some('\'') {
                        result.push(' ');
                        result.push(' ');
                        index += 2;
                        continue;
                    }
                    result.push('\'');
                    state = ScanState::Normal;
                } else {
                    result.push(' ');
                }
                index += 1;
            }
            ScanState::DoubleQuote => {
                if current == '"' {
                    if next == Some('"') {
                        result.push(' ');
                        result.push(' ');
                        index += 2;
                        continue;
                    }
                    result.push('"');
                    state = ScanState::Normal;
                } else {
                    result.push(' ');
                }
                index += 1;
            }
        }
    }

    result
}

/// Case-insensitive search for `needle` outside string literals/comments.
/// Returns the byte offset into `sql` (not `mask_non_code`'s output) of the
/// first match.
pub fn find_top_level(sql: &str, needle: &str) -> Option<usize> {
    let masked = mask_non_code(sql);
    let masked_upper = masked.to_ascii_uppercase();
    let needle_upper = needle.to_ascii_uppercase();
    masked_upper.find(&needle_upper)
}

pub fn has_multiple_statements(sql: &str) -> bool {
    let mut state = ScanState::Normal;
    let mut seen_semicolon = false;
    let chars: Vec<char> = sql.chars().collect();
    let mut index = 0;

    while index < chars.len() {
        let current = chars[index];
        let next = chars.get(index + 1).copied();

        match state {
            ScanState::Normal => {
                if current == '\'' {
                    state = ScanState::SingleQuote;
                } else if current == '"' {
                    state = ScanState::DoubleQuote;
                } else if current == ';' {
                    seen_semicolon = true;
                } else if seen_semicolon && !current.is_whitespace() {
                    return true;
                }
            }

            ScanState::SingleQuote => {
                if current == '\'' {
                    if next == Some('\'') {
                        index += 1;
                    } else {
                        state = ScanState::Normal;
                    }
                }
            }

            ScanState::DoubleQuote => {
                if current == '"' {
                    if next == Some('"') {
                        index += 1;
                    } else {
                        state = ScanState::Normal;
                    }
                }
            }

            ScanState::LineComment | ScanState::BlockComment => {}
        }

        index += 1;
    }

    false
}

const DISALLOWED_FRAGMENT_KEYWORDS: &[&str] = &[
    "SELECT", "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "EXEC", "EXECUTE", "UNION",
    "GRANT", "REVOKE", "TRUNCATE", "MERGE", "CALL",
];

/// Allow-list check for column-list/ORDER BY/GROUP BY/JOIN-predicate
/// fragments fed into the query builder: no statement separators, no
/// comment introducers, and none of the DML/DDL keywords that have no
/// business appearing in those positions. This is a lexical filter, not a
/// parser — it is deliberately conservative and will refuse fragments a
/// full parser would accept.
pub fn is_safe_fragment(fragment: &str) -> bool {
    if fragment.trim().is_empty() {
        return true;
    }
    if has_multiple_statements(fragment) || find_top_level(fragment, ";").is_some() {
        return false;
    }
    if find_top_level(fragment, "--").is_some() || find_top_level(fragment, "/*").is_some() {
        return false;
    }
    let masked = mask_non_code(fragment).to_ascii_uppercase();
    for keyword in DISALLOWED_FRAGMENT_KEYWORDS {
        if word_present(&masked, keyword) {
            return false;
        }
    }
    true
}

fn word_present(haystack_upper: &str, word: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = haystack_upper[start..].find(word) {
        let abs = start + pos;
        let before_ok = abs == 0
            || !haystack_upper.as_bytes()[abs - 1].is_ascii_alphanumeric()
                && haystack_upper.as_bytes()[abs - 1] != b'_';
        let after = abs + word.len();
        let after_ok = after >= haystack_upper.len()
            || !haystack_upper.as_bytes()[after].is_ascii_alphanumeric()
                && haystack_upper.as_bytes()[after] != b'_';
        if before_ok && after_ok {
            return true;
        }
        start = abs + word.len();
    }
    false
}

pub fn first_keyword(sql: &str) -> Option<String> {
    sql.split_whitespace()
        .map(|part| part.trim_start_matches(|c: char| !c.is_ascii_alphabetic()))
        .find(|part| !part.is_empty())
        .map(|part| {
            part.chars()
                .take_while(|ch| ch.is_ascii_alphabetic())
                .collect::<String>()
                .to_ascii_uppercase()
        })
        .filter(|word| !word.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{find_top_level, is_safe_fragment, is_safe_read_query, mask_non_code};

    #[test]
    fn allows_basic_read_queries() {
        assert!(is_safe_read_query("SELECT * FROM users"));
        assert!(is_safe_read_query(
            "with cte as (select 1) select * from cte"
        ));
        assert!(is_safe_read_query("SHOW TABLES"));
        assert!(is_safe_read_query("DESC users"));
    }

    #[test]
    fn rejects_write_queries() {
        assert!(!is_safe_read_query("INSERT INTO users VALUES (1)"));
        assert!(!is_safe_read_query("UPDATE users SET name = 'a'"));
        assert!(!is_safe_read_query("DELETE FROM users"));
        assert!(!is_safe_read_query("DROP TABLE users"));
    }

    #[test]
    fn rejects_multiple_statements() {
        assert!(!is_safe_read_query("SELECT 1; DROP TABLE users"));
        assert!(!is_safe_read_query("SELECT 1; SELECT 2"));
    }

    #[test]
    fn allows_single_statement_with_trailing_semicolon() {
        assert!(is_safe_read_query("SELECT 1;"));
        assert!(is_safe_read_query("-- comment\nSELECT 1;"));
    }

    #[test]
    fn strips_comments_before_keyword_detection() {
        assert!(is_safe_read_query("-- hello\nSELECT * FROM users"));
        assert!(is_safe_read_query("/* hello */ SELECT * FROM users"));
        assert!(!is_safe_read_query("/* hello */ DELETE FROM users"));
    }

    #[test]
    fn mask_non_code_preserves_length() {
        let sql = "SELECT * FROM t WHERE name = 'order by trick' -- order by\n";
        let masked = mask_non_code(sql);
        assert_eq!(masked.chars().count(), sql.chars().count());
        assert!(!masked.to_ascii_uppercase().contains("ORDER BY"));
    }

    #[test]
    fn find_top_level_ignores_literals_and_comments() {
        let sql = "SELECT * FROM t WHERE name = 'ORDER BY' -- ORDER BY\nORDER BY id";
        let pos = find_top_level(sql, "ORDER BY").unwrap();
        assert!(sql[pos..].starts_with("ORDER BY id"));
    }

    #[test]
    fn find_top_level_returns_none_when_absent() {
        assert!(find_top_level("SELECT * FROM t", "ORDER BY").is_none());
    }

    #[test]
    fn safe_fragment_allows_plain_predicates_and_functions() {
        assert!(is_safe_fragment("age > ? AND status = ?"));
        assert!(is_safe_fragment("COUNT(*) > 0"));
        assert!(is_safe_fragment("name"));
        assert!(is_safe_fragment(""));
    }

    #[test]
    fn safe_fragment_rejects_injected_statements() {
        assert!(!is_safe_fragment("1=1; DROP TABLE users"));
        assert!(!is_safe_fragment("1=1 UNION SELECT password FROM users"));
        assert!(!is_safe_fragment("id = 1 -- bypass"));
    }

    #[test]
    fn safe_fragment_does_not_false_positive_on_substrings() {
        // "selected" contains "select" but is not the keyword.
        assert!(is_safe_fragment("selected_flag = 1"));
    }
}
