use crate::dialect::Dialect;
use crate::error::EormError;
use crate::record::Record;
use crate::value::Value;

/// `^[A-Za-z_][A-Za-z0-9_]*$`, checked without pulling in a regex engine —
/// every identifier position this crate validates is plain ASCII.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate a FROM-position table reference, which may be schema-qualified
/// (`schema.table`) — dotted names are only accepted here, never in a plain
/// column-identifier position.
pub fn validate_table_ref(table: &str) -> Result<(), EormError> {
    if table
        .split('.')
        .all(|part| !part.is_empty() && is_valid_identifier(part))
    {
        Ok(())
    } else {
        Err(EormError::invalid_identifier(table))
    }
}

pub fn validate_column(name: &str) -> Result<(), EormError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(EormError::invalid_identifier(name))
    }
}

/// Builds INSERT/UPDATE/DELETE/COUNT statements from a table name plus a
/// `Record`, honouring the target dialect's quoting and placeholder style.
pub struct SqlSynthesizer<'a> {
    dialect: &'a dyn Dialect,
}

/// An INSERT ready to execute: SQL text, positional arguments in column
/// order, and the primary-key column that was omitted (if any) so the
/// caller can write the generated id back into the record.
pub struct InsertPlan {
    pub sql: String,
    pub args: Vec<Value>,
    pub omitted_key: Option<String>,
}

pub struct MutationPlan {
    pub sql: String,
    pub args: Vec<Value>,
}

impl<'a> SqlSynthesizer<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self { dialect }
    }

    /// `primary_keys` drives the single-integer-key omission rule: when
    /// there is exactly one primary-key column and the record's value for
    /// it is absent or zero, the column is dropped from the INSERT so the
    /// driver can auto-generate it.
    pub fn insert(&self, table: &str, record: &Record, primary_keys: &[String]) -> Result<InsertPlan, EormError> {
        validate_table_ref(table)?;

        let omitted_key = if primary_keys.len() == 1 {
            let key = &primary_keys[0];
            let is_zero_or_absent = match record.get(key) {
                None => true,
                Some(Value::Null) => true,
                Some(Value::Int(0)) => true,
                _ => false,
            };
            if is_zero_or_absent {
                Some(key.clone())
            } else {
                None
            }
        } else {
            None
        };

        let mut columns = Vec::new();
        let mut args = Vec::new();
        for key in record.keys() {
            if Some(key) == omitted_key.as_deref() {
                continue;
            }
            validate_column(key)?;
            columns.push(key.to_string());
            args.push(record.get(key).cloned().unwrap_or(Value::Null));
        }

        let quoted_table = quote_possibly_qualified(self.dialect, table);
        let quoted_columns: Vec<String> = columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect();
        let placeholders: Vec<String> = (1..=args.len()).map(|i| self.dialect.placeholder(i)).collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quoted_table,
            quoted_columns.join(", "),
            placeholders.join(", ")
        );

        Ok(InsertPlan {
            sql,
            args,
            omitted_key,
        })
    }

    /// `exclude` lists columns the caller manages separately (primary keys,
    /// the optimistic-lock version column) and that must not appear in the
    /// SET clause even if present in the record.
    pub fn update(
        &self,
        table: &str,
        record: &Record,
        exclude: &[String],
        where_sql: &str,
        where_args: &[Value],
    ) -> Result<MutationPlan, EormError> {
        validate_table_ref(table)?;

        let mut set_parts = Vec::new();
        let mut args = Vec::new();
        let mut next_index = 1;

        for key in record.keys() {
            if exclude.iter().any(|e| e.eq_ignore_ascii_case(key)) {
                continue;
            }
            validate_column(key)?;
            set_parts.push(format!(
                "{} = {}",
                self.dialect.quote_identifier(key),
                self.dialect.placeholder(next_index)
            ));
            args.push(record.get(key).cloned().unwrap_or(Value::Null));
            next_index += 1;
        }

        let quoted_table = quote_possibly_qualified(self.dialect, table);
        let mut sql = format!("UPDATE {} SET {}", quoted_table, set_parts.join(", "));

        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&renumber_placeholders(self.dialect, where_sql, next_index));
            args.extend(where_args.iter().cloned());
        }

        Ok(MutationPlan { sql, args })
    }

    pub fn delete(
        &self,
        table: &str,
        where_sql: &str,
        where_args: &[Value],
    ) -> Result<MutationPlan, EormError> {
        validate_table_ref(table)?;
        if where_sql.is_empty() {
            return Err(EormError::UnboundedMutationRefused);
        }
        let quoted_table = quote_possibly_qualified(self.dialect, table);
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            quoted_table,
            renumber_placeholders(self.dialect, where_sql, 1)
        );
        Ok(MutationPlan {
            sql,
            args: where_args.to_vec(),
        })
    }

    pub fn count(&self, table: &str, where_sql: &str) -> Result<String, EormError> {
        validate_table_ref(table)?;
        let quoted_table = quote_possibly_qualified(self.dialect, table);
        let mut sql = format!("SELECT COUNT(*) FROM {}", quoted_table);
        if !where_sql.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(where_sql);
        }
        Ok(sql)
    }
}

fn quote_possibly_qualified(dialect: &dyn Dialect, table: &str) -> String {
    match table.split_once('.') {
        Some((schema, name)) => dialect.qualified_table(Some(schema), name),
        None => dialect.qualified_table(None, table),
    }
}

/// Callers build WHERE fragments with `?` placeholders regardless of target
/// dialect (mirroring how the query builder accumulates predicates); this
/// renumbers them to the dialect's style starting at `start_index`, for
/// dialects whose placeholders are positional rather than anonymous.
fn renumber_placeholders(dialect: &dyn Dialect, fragment: &str, start_index: usize) -> String {
    use crate::dialect::PlaceholderStyle;
    if dialect.placeholder_style() == PlaceholderStyle::QuestionMark {
        return fragment.to_string();
    }

    let mut result = String::with_capacity(fragment.len());
    let mut index = start_index;
    let mut in_single = false;
    let mut in_double = false;
    for c in fragment.chars() {
        match c {
            '\'' if !in_double => {
                in_single = !in_single;
                result.push(c);
            }
            '"' if !in_single => {
                in_double = !in_double;
                result.push(c);
            }
            '?' if !in_single && !in_double => {
                result.push_str(&dialect.placeholder(index));
                index += 1;
            }
            _ => result.push(c),
        }
    }
    result
}
