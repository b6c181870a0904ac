use crate::query_safety::find_top_level;
use crate::record::Record;

#[derive(Debug, Clone)]
pub struct Page {
    pub rows: Vec<Record>,
    pub page: u64,
    pub size: u64,
    pub total: u64,
}

impl Page {
    pub fn total_pages(&self) -> u64 {
        if self.size == 0 {
            0
        } else {
            self.total.div_ceil(self.size)
        }
    }
}

/// Lexically strip an existing top-level `LIMIT ... [OFFSET ...]` clause
/// (ignoring string literals/comments) so a user-supplied SELECT can be
/// re-paginated per the target dialect's own rules.
pub fn strip_limit_offset(sql: &str) -> String {
    let Some(pos) = find_top_level(sql, "LIMIT") else {
        return sql.trim_end().to_string();
    };
    sql[..pos].trim_end().to_string()
}

/// Derive the COUNT query for an arbitrary SELECT: replace the select list
/// with `COUNT(*)` when the statement has no GROUP BY/HAVING/DISTINCT (the
/// common case), otherwise wrap it as a subquery — those constructs change
/// the number of result rows, so rewriting the select list would change the
/// meaning of COUNT.
pub fn derive_count_sql(select_sql: &str) -> String {
    let stripped = strip_limit_offset(select_sql);
    let needs_wrap = find_top_level(&stripped, "GROUP BY").is_some()
        || find_top_level(&stripped, "HAVING").is_some()
        || find_top_level(&stripped, "DISTINCT").is_some();

    if needs_wrap {
        return format!("SELECT COUNT(*) AS count FROM ({}) AS eorm_count_t", stripped);
    }

    match find_top_level(&stripped, "SELECT").zip(find_top_level(&stripped, " FROM ")) {
        Some((select_pos, from_pos)) => {
            let before = &stripped[..select_pos];
            let rest = &stripped[from_pos..];
            format!("{}SELECT COUNT(*) AS count{}", before, rest)
        }
        None => format!("SELECT COUNT(*) AS count FROM ({}) AS eorm_count_t", stripped),
    }
}
