use crate::query_safety::find_top_level;
use crate::value::Value;

/// Placeholder style for parameterized queries, one per supported dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` (MySQL, SQLite).
    QuestionMark,
    /// `$1`, `$2`, … (PostgreSQL).
    DollarNumber,
    /// `@p1`, `@p2`, … (SQL Server).
    AtParam,
    /// `:1`, `:2`, … (Oracle).
    ColonNumber,
}

impl PlaceholderStyle {
    /// Render the Nth (1-based) placeholder for this style.
    pub fn format(&self, index: usize) -> String {
        match self {
            PlaceholderStyle::QuestionMark => "?".to_string(),
            PlaceholderStyle::DollarNumber => format!("${}", index),
            PlaceholderStyle::AtParam => format!("@p{}", index),
            PlaceholderStyle::ColonNumber => format!(":{}", index),
        }
    }
}

/// Identifies which of the five supported SQL backends a `Dialect` speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectTag {
    MySql,
    Postgres,
    Sqlite,
    MsSql,
    Oracle,
}

impl DialectTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialectTag::MySql => "mysql",
            DialectTag::Postgres => "postgres",
            DialectTag::Sqlite => "sqlite",
            DialectTag::MsSql => "mssql",
            DialectTag::Oracle => "oracle",
        }
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        match self {
            DialectTag::MySql => &MySqlDialect,
            DialectTag::Postgres => &PostgresDialect,
            DialectTag::Sqlite => &SqliteDialect,
            DialectTag::MsSql => &MsSqlDialect,
            DialectTag::Oracle => &OracleDialect,
        }
    }
}

/// Per-dialect SQL syntax: quoting, literal rendering, placeholder style,
/// and LIMIT/OFFSET translation. Stateless and side-effect free — this is
/// the in-scope half of driver support; talking to an actual socket is a
/// `RawConnection` implementation, not a `Dialect`.
pub trait Dialect: Send + Sync {
    fn tag(&self) -> DialectTag;

    /// Quote an identifier (table/column name).
    fn quote_identifier(&self, name: &str) -> String;

    /// Build a qualified table reference (`schema.table` when applicable).
    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(s) => format!(
                "{}.{}",
                self.quote_identifier(s),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    /// Convert a `Value` to a SQL literal string (used only where a
    /// parameterised placeholder is not appropriate, e.g. template
    /// `inparam` fragments).
    fn value_to_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_nan() {
                    "'NaN'".to_string()
                } else if f.is_infinite() {
                    if *f > 0.0 {
                        "'Infinity'".to_string()
                    } else {
                        "'-Infinity'".to_string()
                    }
                } else {
                    f.to_string()
                }
            }
            Value::Text(s) => format!("'{}'", self.escape_string(s)),
            Value::Bytes(b) => format!("X'{}'", hex::encode(b)),
            Value::Json(s) => format!("'{}'", self.escape_string(s)),
            Value::Decimal(s) => s.clone(),
            Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            Value::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
        }
    }

    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }

    fn placeholder_style(&self) -> PlaceholderStyle;

    fn placeholder(&self, index: usize) -> String {
        self.placeholder_style().format(index)
    }

    /// Whether this dialect supports a `RETURNING` clause for generated keys.
    fn supports_returning(&self) -> bool {
        false
    }

    /// Whether `paginate` needs an ORDER BY present in `base_sql` to behave
    /// deterministically (SQL Server/Oracle do; MySQL/Postgres/SQLite don't
    /// require one, though an unordered page is still the caller's problem).
    fn requires_order_by(&self) -> bool {
        false
    }

    /// Translate an arbitrary SELECT (with no existing LIMIT/OFFSET — the
    /// pagination engine strips those before calling this) into its
    /// dialect-correct paginated form. `limit` of `None` means "no cap",
    /// which SQL Server/Oracle render via a large sentinel upper bound
    /// since their syntax requires one.
    fn paginate(&self, base_sql: &str, limit: Option<u64>, offset: u64) -> String;
}

fn ensure_order_by(sql: &str, fallback: &str) -> String {
    if find_top_level(sql, "ORDER BY").is_some() {
        sql.to_string()
    } else {
        format!("{} ORDER BY {}", sql, fallback)
    }
}

pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn tag(&self) -> DialectTag {
        DialectTag::MySql
    }
    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }
    fn paginate(&self, base_sql: &str, limit: Option<u64>, offset: u64) -> String {
        match limit {
            Some(n) => format!("{} LIMIT {} OFFSET {}", base_sql, n, offset),
            None => format!("{} LIMIT 18446744073709551615 OFFSET {}", base_sql, offset),
        }
    }
}

pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn tag(&self) -> DialectTag {
        DialectTag::Sqlite
    }
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
    fn qualified_table(&self, _schema: Option<&str>, table: &str) -> String {
        // SQLite attaches databases instead of schemas; callers needing a
        // second database use ATTACH and qualify manually.
        self.quote_identifier(table)
    }
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }
    fn paginate(&self, base_sql: &str, limit: Option<u64>, offset: u64) -> String {
        match limit {
            Some(n) => format!("{} LIMIT {} OFFSET {}", base_sql, n, offset),
            None => format!("{} LIMIT -1 OFFSET {}", base_sql, offset),
        }
    }
}

pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn tag(&self) -> DialectTag {
        DialectTag::Postgres
    }
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::DollarNumber
    }
    fn supports_returning(&self) -> bool {
        true
    }
    fn paginate(&self, base_sql: &str, limit: Option<u64>, offset: u64) -> String {
        match limit {
            Some(n) => format!("{} LIMIT {} OFFSET {}", base_sql, n, offset),
            None => format!("{} OFFSET {}", base_sql, offset),
        }
    }
}

pub struct MsSqlDialect;

impl Dialect for MsSqlDialect {
    fn tag(&self) -> DialectTag {
        DialectTag::MsSql
    }
    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::AtParam
    }
    fn requires_order_by(&self) -> bool {
        true
    }
    fn paginate(&self, base_sql: &str, limit: Option<u64>, offset: u64) -> String {
        let ordered = ensure_order_by(base_sql, "(SELECT NULL)");
        match limit {
            Some(n) => format!(
                "{} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                ordered, offset, n
            ),
            None => format!("{} OFFSET {} ROWS", ordered, offset),
        }
    }
}

pub struct OracleDialect;

impl Dialect for OracleDialect {
    fn tag(&self) -> DialectTag {
        DialectTag::Oracle
    }
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::ColonNumber
    }
    fn requires_order_by(&self) -> bool {
        true
    }
    fn paginate(&self, base_sql: &str, limit: Option<u64>, offset: u64) -> String {
        let ordered = ensure_order_by(base_sql, "1");
        let upper = offset
            .saturating_add(limit.unwrap_or(u64::MAX - offset).min(u64::MAX - offset));
        format!(
            "SELECT * FROM (SELECT a.*, ROWNUM rn FROM ({}) a WHERE ROWNUM <= {}) WHERE rn > {}",
            ordered, upper, offset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mysql_quotes_with_backticks_and_question_placeholders() {
        let d = MySqlDialect;
        assert_eq!(d.quote_identifier("user name"), "`user name`");
        assert_eq!(d.placeholder(1), "?");
        assert_eq!(d.placeholder(2), "?");
    }

    #[test]
    fn postgres_uses_dollar_numbered_placeholders_and_returning() {
        let d = PostgresDialect;
        assert_eq!(d.placeholder(1), "$1");
        assert_eq!(d.placeholder(3), "$3");
        assert!(d.supports_returning());
    }

    #[test]
    fn mssql_pagination_requires_order_by_and_uses_offset_fetch() {
        let d = MsSqlDialect;
        let sql = d.paginate("SELECT * FROM users", Some(10), 20);
        assert!(sql.contains("ORDER BY (SELECT NULL)"));
        assert!(sql.ends_with("OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"));

        let already_ordered = d.paginate("SELECT * FROM users ORDER BY id", Some(10), 0);
        assert_eq!(
            already_ordered,
            "SELECT * FROM users ORDER BY id OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn oracle_pagination_wraps_with_rownum() {
        let d = OracleDialect;
        let sql = d.paginate("SELECT * FROM users", Some(25), 50);
        assert!(sql.starts_with("SELECT * FROM (SELECT a.*, ROWNUM rn FROM (SELECT * FROM users ORDER BY 1) a WHERE ROWNUM <= 75) WHERE rn > 50"));
    }

    #[test]
    fn sqlite_and_mysql_translate_limit_offset_directly() {
        assert_eq!(
            SqliteDialect.paginate("SELECT * FROM t", Some(5), 10),
            "SELECT * FROM t LIMIT 5 OFFSET 10"
        );
        assert_eq!(
            MySqlDialect.paginate("SELECT * FROM t", Some(5), 10),
            "SELECT * FROM t LIMIT 5 OFFSET 10"
        );
    }

    #[test]
    fn mssql_identifier_quoting_escapes_closing_bracket() {
        assert_eq!(MsSqlDialect.quote_identifier("a]b"), "[a]]b]");
    }
}
