use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{derive_cache_key, CachedPayload, ResultDiscriminator};
use crate::error::EormError;
use crate::executor::{with_timeout, Executor};
use crate::pagination::{derive_count_sql, Page};
use crate::query_safety::mask_non_code;
use crate::raw_connection::ExecResult;
use crate::record::Record;
use crate::value::Value;

/// One statement type a template bundle entry can declare. Controls which
/// terminal (`query`/`exec`) the invocation is expected to be driven through,
/// though nothing stops a caller from calling `exec()` on a `select` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatementType {
    Select,
    Insert,
    Update,
    Delete,
    Exec,
}

/// A dynamic, conditionally-included SQL snippet: present only when `name`
/// appears in the invocation's map-mode parameters, in which case its `sql`
/// fragment is appended to the rendered statement and its value appended to
/// the argument vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InParam {
    pub name: String,
    #[serde(rename = "type")]
    pub type_hint: String,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSql {
    pub name: String,
    pub sql: String,
    #[serde(rename = "type")]
    pub statement_type: TemplateStatementType,
    #[serde(default)]
    pub inparam: Option<Vec<InParam>>,
    #[serde(default)]
    pub order: Option<String>,
}

/// On-disk shape of one template file: a namespace plus the named statements
/// it declares. Mirrors every other JSON-persisted format in this crate
/// (`EormConfig`) rather than inventing a bespoke serialisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateBundle {
    pub version: String,
    pub namespace: String,
    pub sqls: Vec<TemplateSql>,
}

struct CompiledTemplate {
    sql: String,
    statement_type: TemplateStatementType,
    inparam: Vec<InParam>,
}

/// Parameters for a template invocation, auto-detected from the value shape
/// the caller passes: a map binds `:name` placeholders by name, a vector
/// binds `?` placeholders positionally.
pub enum TemplateParams {
    Map(HashMap<String, Value>),
    Positional(Vec<Value>),
}

impl From<Vec<Value>> for TemplateParams {
    fn from(values: Vec<Value>) -> Self {
        TemplateParams::Positional(values)
    }
}

impl From<HashMap<String, Value>> for TemplateParams {
    fn from(values: HashMap<String, Value>) -> Self {
        TemplateParams::Map(values)
    }
}

/// Process-wide registry of compiled templates keyed by `<namespace>.<name>`,
/// the same `RwLock<HashMap<...>>` shape the connection registry uses for its
/// own process-wide table.
#[derive(Default)]
pub struct TemplateEngine {
    templates: RwLock<HashMap<String, Arc<CompiledTemplate>>>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_bundle(&self, bundle: TemplateBundle) -> Result<(), EormError> {
        let mut guard = self.templates.write().unwrap();
        for entry in bundle.sqls {
            let key = format!("{}.{}", bundle.namespace, entry.name);
            guard.insert(
                key,
                Arc::new(CompiledTemplate {
                    sql: entry.sql,
                    statement_type: entry.statement_type,
                    inparam: entry.inparam.unwrap_or_default(),
                }),
            );
        }
        Ok(())
    }

    pub fn load_file(&self, path: &Path) -> Result<(), EormError> {
        let content = std::fs::read_to_string(path)?;
        let bundle: TemplateBundle = serde_json::from_str(&content)?;
        self.load_bundle(bundle)
    }

    /// Loads every `.json` file found by walking `dir` recursively. Files
    /// that fail to parse as a bundle are skipped rather than aborting the
    /// whole directory load, matching the teacher's `ScriptsDirectory` walk
    /// (a malformed script in one subfolder must not hide every other one).
    pub fn load_directory(&self, dir: &Path) -> Result<(), EormError> {
        if !dir.is_dir() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.load_directory(&path)?;
            } else if path.extension().is_some_and(|ext| ext == "json") {
                let _ = self.load_file(&path);
            }
        }
        Ok(())
    }

    fn get(&self, namespace: &str, name: &str) -> Result<Arc<CompiledTemplate>, EormError> {
        let key = format!("{}.{}", namespace, name);
        self.templates
            .read()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(EormError::TemplateNotFound(key))
    }

    /// Prepares an invocation against `"<namespace>.<name>"`. Lookup failure
    /// is captured in the returned builder's deferred-error slot rather than
    /// returned here, matching `QueryBuilder::new`'s own deferred-validation
    /// style.
    pub fn prepare<'e>(
        &self,
        executor: &'e dyn Executor,
        qualified_name: &str,
        params: impl Into<TemplateParams>,
    ) -> TemplateQuery<'e> {
        let (namespace, name) = qualified_name.split_once('.').unwrap_or((qualified_name, ""));
        let (template, error) = match self.get(namespace, name) {
            Ok(t) => (Some(t), None),
            Err(e) => (None, Some(e)),
        };
        TemplateQuery {
            executor,
            template,
            params: params.into(),
            cache_repository: None,
            cache_ttl: None,
            timeout: None,
            error,
        }
    }
}

/// Counts top-level `?` occurrences in `sql`, ignoring ones inside string
/// literals or comments.
fn count_positional_placeholders(sql: &str) -> usize {
    mask_non_code(sql).chars().filter(|c| *c == '?').count()
}

/// Renumbers a template's literal `?` placeholders to the target dialect's
/// style, in left-to-right order, starting at 1.
fn render_positional(dialect: &dyn crate::dialect::Dialect, sql: &str) -> String {
    let masked = mask_non_code(sql);
    let mut result = String::with_capacity(sql.len());
    let mut index = 1;
    for (original_char, masked_char) in sql.chars().zip(masked.chars()) {
        if masked_char == '?' {
            result.push_str(&dialect.placeholder(index));
            index += 1;
        } else {
            result.push(original_char);
        }
    }
    result
}

/// Substitutes `:name` occurrences (outside literals/comments) with the
/// dialect's placeholder style, collecting bound values in first-seen order.
/// Names absent from `map` are left as a `NULL` literal — the bundle author
/// declared a name the caller didn't supply.
fn render_named(
    dialect: &dyn crate::dialect::Dialect,
    sql: &str,
    map: &HashMap<String, Value>,
) -> (String, Vec<Value>) {
    let masked = mask_non_code(sql);
    let masked_chars: Vec<char> = masked.chars().collect();
    let original_chars: Vec<char> = sql.chars().collect();

    let mut result = String::with_capacity(sql.len());
    let mut args = Vec::new();
    let mut index = 1;
    let mut i = 0;
    while i < masked_chars.len() {
        if masked_chars[i] == ':'
            && masked_chars
                .get(i + 1)
                .is_some_and(|c| c.is_ascii_alphabetic() || *c == '_')
        {
            let start = i + 1;
            let mut end = start;
            while end < masked_chars.len()
                && (masked_chars[end].is_ascii_alphanumeric() || masked_chars[end] == '_')
            {
                end += 1;
            }
            let name: String = original_chars[start..end].iter().collect();
            match map.get(&name) {
                Some(value) => {
                    result.push_str(&dialect.placeholder(index));
                    index += 1;
                    args.push(value.clone());
                }
                None => result.push_str("NULL"),
            }
            i = end;
        } else {
            result.push(original_chars[i]);
            i += 1;
        }
    }

    (result, args)
}

/// A prepared template invocation. Mirrors `QueryBuilder`'s deferred-error
/// style and shares its cache/timeout plumbing via the same `Executor`.
pub struct TemplateQuery<'e> {
    executor: &'e dyn Executor,
    template: Option<Arc<CompiledTemplate>>,
    params: TemplateParams,
    cache_repository: Option<String>,
    cache_ttl: Option<Duration>,
    timeout: Option<Duration>,
    error: Option<EormError>,
}

impl<'e> TemplateQuery<'e> {
    pub fn cache(mut self, repository: impl Into<String>, ttl: Duration) -> Self {
        self.cache_repository = Some(repository.into());
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }

    fn render(&self) -> Result<(String, Vec<Value>), EormError> {
        let template = self.template.as_ref().expect("checked by caller");
        let dialect = self.executor.dialect();

        match &self.params {
            TemplateParams::Map(map) => {
                let (mut sql, mut args) = render_named(dialect, &template.sql, map);
                for param in &template.inparam {
                    if let Some(value) = map.get(&param.name) {
                        sql.push(' ');
                        sql.push_str(&render_named(dialect, &param.sql, map).0);
                        args.push(value.clone());
                    }
                }
                Ok((sql, args))
            }
            TemplateParams::Positional(values) => {
                let expected = count_positional_placeholders(&template.sql);
                if expected != values.len() {
                    return Err(EormError::ParamCountMismatch {
                        expected,
                        actual: values.len(),
                    });
                }
                Ok((render_positional(dialect, &template.sql), values.clone()))
            }
        }
    }

    pub async fn query(self) -> Result<Vec<Record>, EormError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let (sql, args) = self.render()?;
        let timeout = self.timeout.or(self.executor.query_timeout());
        with_timeout(timeout, async {
            if let Some(rows) = self.cached_read(&sql, &args).await? {
                return Ok(rows);
            }
            let rows = self.executor.raw_query(&sql, &args).await?;
            self.cache_write(&sql, &args, rows.clone(), None).await?;
            Ok(rows)
        })
        .await
    }

    pub async fn query_first(self) -> Result<Option<Record>, EormError> {
        let rows = self.query().await?;
        Ok(rows.into_iter().next())
    }

    pub async fn exec(self) -> Result<ExecResult, EormError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let (sql, args) = self.render()?;
        let timeout = self.timeout.or(self.executor.query_timeout());
        with_timeout(timeout, async { self.executor.raw_execute(&sql, &args).await }).await
    }

    pub async fn paginate(self, page: u64, size: u64) -> Result<Page, EormError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let dialect = self.executor.dialect();
        let (base_sql, args) = self.render()?;
        let count_sql = derive_count_sql(&base_sql);
        let offset = page.saturating_sub(1).saturating_mul(size);
        let paged_sql = dialect.paginate(&base_sql, Some(size), offset);
        let timeout = self.timeout.or(self.executor.query_timeout());

        with_timeout(timeout, async {
            let count_rows = self.executor.raw_query(&count_sql, &args).await?;
            let total = count_rows.first().map(|r| r.int("count") as u64).unwrap_or(0);
            let rows = self.executor.raw_query(&paged_sql, &args).await?;
            Ok(Page { rows, page, size, total })
        })
        .await
    }

    async fn cached_read(&self, sql: &str, args: &[Value]) -> Result<Option<Vec<Record>>, EormError> {
        let Some(cache) = self.executor.cache() else { return Ok(None) };
        let Some(repo) = &self.cache_repository else { return Ok(None) };
        let key = derive_cache_key(self.executor.database_name(), sql, args, ResultDiscriminator::List);
        Ok(cache.get(repo, &key).await?.map(|p| p.rows))
    }

    async fn cache_write(
        &self,
        sql: &str,
        args: &[Value],
        rows: Vec<Record>,
        count: Option<u64>,
    ) -> Result<(), EormError> {
        let Some(cache) = self.executor.cache() else { return Ok(()) };
        let Some(repo) = &self.cache_repository else { return Ok(()) };
        let ttl = self.cache_ttl.unwrap_or_else(|| self.executor.default_cache_ttl());
        let key = derive_cache_key(self.executor.database_name(), sql, args, ResultDiscriminator::List);
        cache.set(repo, &key, CachedPayload { rows, count }, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests_support::FakeExecutor;

    fn bundle() -> TemplateBundle {
        TemplateBundle {
            version: "1".to_string(),
            namespace: "users".to_string(),
            sqls: vec![
                TemplateSql {
                    name: "by_id".to_string(),
                    sql: "SELECT * FROM users WHERE id = ?".to_string(),
                    statement_type: TemplateStatementType::Select,
                    inparam: None,
                    order: None,
                },
                TemplateSql {
                    name: "search".to_string(),
                    sql: "SELECT * FROM users WHERE active = :active".to_string(),
                    statement_type: TemplateStatementType::Select,
                    inparam: Some(vec![InParam {
                        name: "name".to_string(),
                        type_hint: "string".to_string(),
                        sql: "AND name = :name".to_string(),
                    }]),
                    order: None,
                },
            ],
        }
    }

    #[test]
    fn loads_bundle_and_finds_templates_by_qualified_name() {
        let engine = TemplateEngine::new();
        engine.load_bundle(bundle()).unwrap();
        assert!(engine.get("users", "by_id").is_ok());
        assert!(engine.get("users", "missing").is_err());
    }

    #[tokio::test]
    async fn positional_mode_rejects_mismatched_argument_count() {
        let engine = TemplateEngine::new();
        engine.load_bundle(bundle()).unwrap();
        let executor = FakeExecutor::new();
        let err = engine
            .prepare(&executor, "users.by_id", vec![])
            .query()
            .await
            .unwrap_err();
        assert!(matches!(err, EormError::ParamCountMismatch { expected: 1, actual: 0 }));
    }

    #[tokio::test]
    async fn positional_mode_renders_dialect_placeholder() {
        let engine = TemplateEngine::new();
        engine.load_bundle(bundle()).unwrap();
        let executor = FakeExecutor::new();
        engine
            .prepare(&executor, "users.by_id", vec![Value::Int(1)])
            .query()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn map_mode_includes_inparam_only_when_present() {
        let engine = TemplateEngine::new();
        engine.load_bundle(bundle()).unwrap();
        let executor = FakeExecutor::new();

        let mut params = HashMap::new();
        params.insert("active".to_string(), Value::Bool(true));
        let query = engine.prepare(&executor, "users.search", params);
        let (sql, args) = query.render().unwrap();
        assert!(!sql.contains("AND name"));
        assert_eq!(args.len(), 1);

        let mut params = HashMap::new();
        params.insert("active".to_string(), Value::Bool(true));
        params.insert("name".to_string(), Value::Text("Bob".to_string()));
        let query = engine.prepare(&executor, "users.search", params);
        let (sql, args) = query.render().unwrap();
        assert!(sql.contains("AND name"));
        assert_eq!(args.len(), 2);
    }

    #[tokio::test]
    async fn unknown_template_surfaces_not_found_from_terminal() {
        let engine = TemplateEngine::new();
        let executor = FakeExecutor::new();
        let err = engine
            .prepare(&executor, "users.missing", vec![])
            .query()
            .await
            .unwrap_err();
        assert!(matches!(err, EormError::TemplateNotFound(_)));
    }
}
