use chrono::Utc;

use crate::query_safety::{find_top_level, mask_non_code};
use crate::record::Record;
use crate::value::Value;

/// Per-table timestamp field configuration. Presence of a field name
/// enables that half independently — a table can auto-stamp `created_at`
/// without ever touching `updated_at`.
#[derive(Debug, Clone, Default)]
pub struct TimestampPolicy {
    pub created_at_field: Option<String>,
    pub updated_at_field: Option<String>,
}

impl TimestampPolicy {
    /// Applied before INSERT. Does not overwrite a value the caller already
    /// set.
    pub fn apply_on_insert(&self, record: &mut Record) {
        if let Some(field) = &self.created_at_field {
            if !record.has(field) {
                record.set(field.clone(), Value::DateTime(Utc::now()));
            }
        }
        if let Some(field) = &self.updated_at_field {
            if !record.has(field) {
                record.set(field.clone(), Value::DateTime(Utc::now()));
            }
        }
    }

    /// Applied before UPDATE. Always overwrites `updated_at`; never touches
    /// `created_at`.
    pub fn apply_on_update(&self, record: &mut Record) {
        if let Some(field) = &self.updated_at_field {
            record.set(field.clone(), Value::DateTime(Utc::now()));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftDeleteMode {
    Timestamp,
    Bool,
}

#[derive(Debug, Clone)]
pub struct SoftDeletePolicy {
    pub field: String,
    pub mode: SoftDeleteMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftDeleteView {
    ActiveOnly,
    WithTrashed,
    OnlyTrashed,
}

impl SoftDeletePolicy {
    /// The predicate appended to a SELECT's WHERE clause for the given view
    /// mode. `None` for `WithTrashed`, since it adds nothing.
    pub fn view_predicate(&self, view: SoftDeleteView) -> Option<String> {
        let quoted = &self.field;
        match (view, self.mode) {
            (SoftDeleteView::WithTrashed, _) => None,
            (SoftDeleteView::ActiveOnly, SoftDeleteMode::Timestamp) => {
                Some(format!("{} IS NULL", quoted))
            }
            (SoftDeleteView::ActiveOnly, SoftDeleteMode::Bool) => {
                Some(format!("{} = 0", quoted))
            }
            (SoftDeleteView::OnlyTrashed, SoftDeleteMode::Timestamp) => {
                Some(format!("{} IS NOT NULL", quoted))
            }
            (SoftDeleteView::OnlyTrashed, SoftDeleteMode::Bool) => {
                Some(format!("{} = 1", quoted))
            }
        }
    }

    /// The `SET` assignment a `delete()` turns into instead of a physical
    /// DELETE.
    pub fn delete_assignment(&self) -> (String, Value) {
        match self.mode {
            SoftDeleteMode::Timestamp => (self.field.clone(), Value::DateTime(Utc::now())),
            SoftDeleteMode::Bool => (self.field.clone(), Value::Bool(true)),
        }
    }

    /// The `SET` assignment a `restore()` applies.
    pub fn restore_assignment(&self) -> (String, Value) {
        match self.mode {
            SoftDeleteMode::Timestamp => (self.field.clone(), Value::Null),
            SoftDeleteMode::Bool => (self.field.clone(), Value::Bool(false)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimisticLockPolicy {
    pub version_field: String,
}

pub enum VersionCheck {
    /// The record carried a version; caller must append this predicate
    /// (with this argument) to its WHERE clause and bump the SET column to
    /// the returned next value.
    Applies { predicate: String, current: Value, next: Value },
    /// The record did not carry the version field; proceed unmodified.
    NotApplicable,
}

impl OptimisticLockPolicy {
    pub fn check_on_update(&self, record: &Record) -> VersionCheck {
        match record.get(&self.version_field) {
            Some(Value::Int(v)) => VersionCheck::Applies {
                predicate: format!("{} = ?", self.version_field),
                current: Value::Int(*v),
                next: Value::Int(v + 1),
            },
            _ => VersionCheck::NotApplicable,
        }
    }
}

/// Locates identifiers in top-level FROM/JOIN clauses of a raw SELECT and
/// appends the missing soft-delete predicate for each one that has a
/// configured policy, without touching the query if it cannot be
/// confidently decomposed or already references the soft-delete column.
///
/// `lookup` maps a bare table name (or its alias) to its soft-delete policy.
pub fn inject_soft_delete_predicates(
    sql: &str,
    lookup: impl Fn(&str) -> Option<SoftDeletePolicy>,
) -> String {
    let masked = mask_non_code(sql);
    let tables = extract_from_join_tables(&masked);
    if tables.is_empty() {
        return sql.to_string();
    }

    let mut predicates = Vec::new();
    for (table, alias) in &tables {
        if let Some(policy) = lookup(table) {
            let qualifier = alias.as_deref().unwrap_or(table);
            let column_ref = format!("{}.{}", qualifier, policy.field);
            // Already referenced: don't risk a double/contradictory filter.
            if masked.to_ascii_lowercase().contains(&column_ref.to_ascii_lowercase())
                || masked
                    .to_ascii_lowercase()
                    .contains(&format!(" {} ", policy.field.to_ascii_lowercase()).as_str())
            {
                continue;
            }
            if let Some(pred) = policy.view_predicate(SoftDeleteView::ActiveOnly) {
                predicates.push(format!(
                    "{}.{}",
                    qualifier,
                    pred
                ));
            }
        }
    }

    if predicates.is_empty() {
        return sql.to_string();
    }

    let addition = predicates.join(" AND ");
    if find_top_level(sql, "WHERE").is_some() {
        let pos = find_top_level(sql, "WHERE").unwrap();
        let insert_at = pos + "WHERE".len();
        let mut result = sql.to_string();
        result.insert_str(insert_at, &format!(" {} AND", addition));
        result
    } else {
        // Insert before ORDER BY/GROUP BY/LIMIT if present, else append.
        for clause in ["GROUP BY", "ORDER BY", "LIMIT"] {
            if let Some(pos) = find_top_level(sql, clause) {
                let mut result = sql.to_string();
                result.insert_str(pos, &format!("WHERE {} ", addition));
                return result;
            }
        }
        format!("{} WHERE {}", sql, addition)
    }
}

/// Best-effort extraction of `(table, alias)` pairs from top-level FROM/JOIN
/// clauses of an already-masked (literal/comment-free) SQL string. Bails
/// (returns empty) on anything it cannot confidently read as a plain
/// `schema.table [AS] alias` list — subselects, table-valued functions, and
/// other dialect extensions are left alone rather than guessed at.
fn extract_from_join_tables(masked: &str) -> Vec<(String, Option<String>)> {
    let upper = masked.to_ascii_uppercase();
    let mut results = Vec::new();

    let mut search_positions = Vec::new();
    if let Some(pos) = upper.find(" FROM ") {
        search_positions.push(pos + 6);
    }
    let mut start = 0;
    while let Some(pos) = upper[start..].find(" JOIN ") {
        search_positions.push(start + pos + 6);
        start += pos + 6;
    }

    for pos in search_positions {
        let rest = &masked[pos..];
        let clause_end = rest
            .find(|c: char| c == '(')
            .map(|i| i.min(rest.len()))
            .unwrap_or(rest.len());
        let first_token_area = &rest[..clause_end.min(rest.len())];
        let mut tokens = first_token_area.split_whitespace();
        let Some(table) = tokens.next() else { continue };
        if table.contains('(') {
            continue;
        }
        let table = table.trim_end_matches(',').to_string();

        let mut alias = tokens.next().map(|s| s.to_string());
        if let Some(a) = &alias {
            let a_upper = a.to_ascii_uppercase();
            if a_upper == "AS" {
                alias = tokens.next().map(|s| s.trim_end_matches(',').to_string());
            } else if [
                "WHERE", "ON", "GROUP", "ORDER", "LIMIT", "JOIN", "INNER", "LEFT", "RIGHT", "FULL",
                ",",
            ]
            .contains(&a_upper.as_str())
            {
                alias = None;
            } else {
                alias = Some(a.trim_end_matches(',').to_string());
            }
        }

        results.push((table, alias));
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_set_on_insert_without_overwriting() {
        let policy = TimestampPolicy {
            created_at_field: Some("created_at".into()),
            updated_at_field: Some("updated_at".into()),
        };
        let mut record = Record::new();
        record.set("created_at", Value::Text("preset".into()));
        policy.apply_on_insert(&mut record);

        assert_eq!(record.get("created_at"), Some(&Value::Text("preset".into())));
        assert!(matches!(record.get("updated_at"), Some(Value::DateTime(_))));
    }

    #[test]
    fn timestamps_always_overwrite_updated_at_on_update() {
        let policy = TimestampPolicy {
            created_at_field: None,
            updated_at_field: Some("updated_at".into()),
        };
        let mut record = Record::new();
        record.set("updated_at", Value::Text("stale".into()));
        policy.apply_on_update(&mut record);
        assert!(matches!(record.get("updated_at"), Some(Value::DateTime(_))));
    }

    #[test]
    fn soft_delete_view_predicates_per_mode() {
        let ts = SoftDeletePolicy {
            field: "deleted_at".into(),
            mode: SoftDeleteMode::Timestamp,
        };
        assert_eq!(
            ts.view_predicate(SoftDeleteView::ActiveOnly),
            Some("deleted_at IS NULL".to_string())
        );
        assert_eq!(ts.view_predicate(SoftDeleteView::WithTrashed), None);

        let boolean = SoftDeletePolicy {
            field: "is_deleted".into(),
            mode: SoftDeleteMode::Bool,
        };
        assert_eq!(
            boolean.view_predicate(SoftDeleteView::OnlyTrashed),
            Some("is_deleted = 1".to_string())
        );
    }

    #[test]
    fn optimistic_lock_applies_only_when_version_present() {
        let policy = OptimisticLockPolicy {
            version_field: "version".into(),
        };
        let mut record = Record::new();
        record.set("version", Value::Int(3));
        match policy.check_on_update(&record) {
            VersionCheck::Applies { next, .. } => assert_eq!(next, Value::Int(4)),
            VersionCheck::NotApplicable => panic!("expected Applies"),
        }

        let record_without = Record::new();
        assert!(matches!(
            policy.check_on_update(&record_without),
            VersionCheck::NotApplicable
        ));
    }

    #[test]
    fn injects_soft_delete_predicate_into_raw_sql_with_existing_where() {
        let sql = "SELECT * FROM users u WHERE u.active = 1";
        let result = inject_soft_delete_predicates(sql, |table| {
            if table.eq_ignore_ascii_case("users") {
                Some(SoftDeletePolicy {
                    field: "deleted_at".into(),
                    mode: SoftDeleteMode::Timestamp,
                })
            } else {
                None
            }
        });
        assert!(result.contains("u.deleted_at IS NULL"));
        assert!(result.contains("u.active = 1"));
    }

    #[test]
    fn injects_soft_delete_predicate_when_no_where_clause_present() {
        let sql = "SELECT * FROM users";
        let result = inject_soft_delete_predicates(sql, |table| {
            if table.eq_ignore_ascii_case("users") {
                Some(SoftDeletePolicy {
                    field: "deleted_at".into(),
                    mode: SoftDeleteMode::Timestamp,
                })
            } else {
                None
            }
        });
        assert!(result.contains("WHERE"));
        assert!(result.contains("deleted_at IS NULL"));
    }

    #[test]
    fn leaves_query_unchanged_when_column_already_referenced() {
        let sql = "SELECT * FROM users u WHERE u.deleted_at IS NOT NULL";
        let result = inject_soft_delete_predicates(sql, |table| {
            if table.eq_ignore_ascii_case("users") {
                Some(SoftDeletePolicy {
                    field: "deleted_at".into(),
                    mode: SoftDeleteMode::Timestamp,
                })
            } else {
                None
            }
        });
        assert_eq!(result, sql);
    }

    #[test]
    fn leaves_query_unchanged_when_table_has_no_policy() {
        let sql = "SELECT * FROM orders";
        let result = inject_soft_delete_predicates(sql, |_| None);
        assert_eq!(result, sql);
    }
}
