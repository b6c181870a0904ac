use std::time::Duration;

use crate::cache::{derive_cache_key, CachedPayload, ResultDiscriminator};
use crate::error::EormError;
use crate::executor::{with_timeout, Executor};
use crate::pagination::{derive_count_sql, Page};
use crate::policy::SoftDeleteView;
use crate::query_safety::is_safe_fragment;
use crate::record::Record;
use crate::sql_synth::{validate_table_ref, SqlSynthesizer};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinKind {
    fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL JOIN",
        }
    }
}

struct Join {
    kind: JoinKind,
    target: String,
    predicate: String,
    args: Vec<Value>,
}

enum FromSource {
    Table(String),
    Subquery {
        sql: String,
        args: Vec<Value>,
        alias: String,
    },
}

/// Fluent predicate/join/group/subquery composer. Mutable staging
/// structure: composers never fail loudly — the first validation failure
/// is captured in `error` and every terminal checks it before touching the
/// executor, so a caller who ignores a composer's return value still gets
/// the error back from whichever terminal they call.
pub struct QueryBuilder<'e> {
    executor: &'e dyn Executor,
    from: Option<FromSource>,
    columns: Vec<String>,
    subquery_columns: Vec<(String, String, Vec<Value>)>,
    and_predicates: Vec<(String, Vec<Value>)>,
    or_predicates: Vec<(String, Vec<Value>)>,
    joins: Vec<Join>,
    group_by: Vec<String>,
    having: Vec<(String, Vec<Value>)>,
    order_by: Vec<String>,
    limit: Option<u64>,
    offset: Option<u64>,
    soft_delete_view: SoftDeleteView,
    skip_timestamps: bool,
    cache_repository: Option<String>,
    cache_ttl: Option<Duration>,
    count_cache_ttl: Option<Duration>,
    timeout: Option<Duration>,
    error: Option<EormError>,
}

impl<'e> QueryBuilder<'e> {
    pub fn new(executor: &'e dyn Executor, table: impl Into<String>) -> Self {
        let table = table.into();
        let error = validate_table_ref(&table).err();
        Self {
            executor,
            from: Some(FromSource::Table(table)),
            columns: Vec::new(),
            subquery_columns: Vec::new(),
            and_predicates: Vec::new(),
            or_predicates: Vec::new(),
            joins: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            soft_delete_view: SoftDeleteView::ActiveOnly,
            skip_timestamps: false,
            cache_repository: None,
            cache_ttl: None,
            count_cache_ttl: None,
            timeout: None,
            error,
        }
    }

    pub fn from_subquery(executor: &'e dyn Executor, sql: impl Into<String>, args: Vec<Value>, alias: impl Into<String>) -> Self {
        let mut builder = Self::new(executor, "placeholder");
        builder.from = Some(FromSource::Subquery {
            sql: sql.into(),
            args,
            alias: alias.into(),
        });
        builder.error = None;
        builder
    }

    fn fail_if_unsafe(&mut self, fragment: &str) {
        if self.error.is_some() {
            return;
        }
        if !is_safe_fragment(fragment) {
            self.error = Some(EormError::unsafe_fragment(fragment));
        }
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        for c in columns {
            self.fail_if_unsafe(c);
        }
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn select_subquery(mut self, alias: impl Into<String>, sql: impl Into<String>, args: Vec<Value>) -> Self {
        self.subquery_columns.push((alias.into(), sql.into(), args));
        self
    }

    pub fn where_(mut self, fragment: impl Into<String>, args: Vec<Value>) -> Self {
        let fragment = fragment.into();
        self.fail_if_unsafe(&fragment);
        self.and_predicates.push((fragment, args));
        self
    }

    pub fn or_where(mut self, fragment: impl Into<String>, args: Vec<Value>) -> Self {
        let fragment = fragment.into();
        self.fail_if_unsafe(&fragment);
        self.or_predicates.push((fragment, args));
        self
    }

    pub fn where_group(mut self, build: impl FnOnce(WhereGroup) -> WhereGroup) -> Self {
        let group = build(WhereGroup::new());
        if let Some(err) = group.error {
            self.error = Some(err);
            return self;
        }
        if let Some((sql, args)) = group.render() {
            self.and_predicates.push((format!("({})", sql), args));
        }
        self
    }

    pub fn or_where_group(mut self, build: impl FnOnce(WhereGroup) -> WhereGroup) -> Self {
        let group = build(WhereGroup::new());
        if let Some(err) = group.error {
            self.error = Some(err);
            return self;
        }
        if let Some((sql, args)) = group.render() {
            self.or_predicates.push((format!("({})", sql), args));
        }
        self
    }

    fn join_impl(mut self, kind: JoinKind, target: impl Into<String>, predicate: impl Into<String>, args: Vec<Value>) -> Self {
        let target = target.into();
        let predicate = predicate.into();
        self.fail_if_unsafe(&target);
        self.fail_if_unsafe(&predicate);
        self.joins.push(Join { kind, target, predicate, args });
        self
    }

    pub fn join(self, target: impl Into<String>, predicate: impl Into<String>, args: Vec<Value>) -> Self {
        self.join_impl(JoinKind::Inner, target, predicate, args)
    }
    pub fn left_join(self, target: impl Into<String>, predicate: impl Into<String>, args: Vec<Value>) -> Self {
        self.join_impl(JoinKind::Left, target, predicate, args)
    }
    pub fn right_join(self, target: impl Into<String>, predicate: impl Into<String>, args: Vec<Value>) -> Self {
        self.join_impl(JoinKind::Right, target, predicate, args)
    }
    pub fn full_join(self, target: impl Into<String>, predicate: impl Into<String>, args: Vec<Value>) -> Self {
        self.join_impl(JoinKind::Full, target, predicate, args)
    }

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        for c in columns {
            self.fail_if_unsafe(c);
        }
        self.group_by = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn having(mut self, fragment: impl Into<String>, args: Vec<Value>) -> Self {
        let fragment = fragment.into();
        self.fail_if_unsafe(&fragment);
        self.having.push((fragment, args));
        self
    }

    pub fn order_by(mut self, fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        self.fail_if_unsafe(&fragment);
        self.order_by.push(fragment);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn with_trashed(mut self) -> Self {
        self.soft_delete_view = SoftDeleteView::WithTrashed;
        self
    }

    pub fn only_trashed(mut self) -> Self {
        self.soft_delete_view = SoftDeleteView::OnlyTrashed;
        self
    }

    pub fn skip_timestamps(mut self) -> Self {
        self.skip_timestamps = true;
        self
    }

    pub fn cache(mut self, repository: impl Into<String>, ttl: Duration) -> Self {
        self.cache_repository = Some(repository.into());
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn count_cache_ttl(mut self, ttl: Duration) -> Self {
        self.count_cache_ttl = Some(ttl);
        self
    }

    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = Some(d);
        self
    }

    fn table_name(&self) -> Option<&str> {
        match &self.from {
            Some(FromSource::Table(t)) => Some(t.as_str()),
            _ => None,
        }
    }

    /// Render `(sql, args)` in strict source order: subquery-in-SELECT args,
    /// JOIN args, WHERE args (AND then OR), HAVING args.
    fn render_select(&self) -> (String, Vec<Value>) {
        let dialect = self.executor.dialect();
        let mut args = Vec::new();

        let select_list = if self.columns.is_empty() && self.subquery_columns.is_empty() {
            "*".to_string()
        } else {
            let mut parts: Vec<String> = self.columns.clone();
            for (alias, sql, sub_args) in &self.subquery_columns {
                parts.push(format!("({}) AS {}", sql, alias));
                args.extend(sub_args.iter().cloned());
            }
            parts.join(", ")
        };

        let from_clause = match &self.from {
            Some(FromSource::Table(t)) => {
                let quoted = match t.split_once('.') {
                    Some((schema, name)) => dialect.qualified_table(Some(schema), name),
                    None => dialect.qualified_table(None, t),
                };
                quoted
            }
            Some(FromSource::Subquery { sql, args: sub_args, alias }) => {
                args.extend(sub_args.iter().cloned());
                format!("({}) AS {}", sql, alias)
            }
            None => String::new(),
        };

        let mut sql = format!("SELECT {} FROM {}", select_list, from_clause);

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join.kind.keyword());
            sql.push(' ');
            sql.push_str(&join.target);
            sql.push_str(" ON ");
            sql.push_str(&join.predicate);
            args.extend(join.args.iter().cloned());
        }

        let mut and_parts: Vec<String> = self.and_predicates.iter().map(|(f, _)| f.clone()).collect();
        if let (Some(table), SoftDeleteView::ActiveOnly | SoftDeleteView::OnlyTrashed) =
            (self.table_name(), self.soft_delete_view)
        {
            if let Some(policy) = self.executor.soft_delete_policy(table) {
                if let Some(pred) = policy.view_predicate(self.soft_delete_view) {
                    and_parts.push(pred);
                }
            }
        }
        let and_args: Vec<Value> = self.and_predicates.iter().flat_map(|(_, a)| a.clone()).collect();
        let or_args: Vec<Value> = self.or_predicates.iter().flat_map(|(_, a)| a.clone()).collect();
        let or_parts: Vec<String> = self.or_predicates.iter().map(|(f, _)| f.clone()).collect();

        if !and_parts.is_empty() || !or_parts.is_empty() {
            sql.push_str(" WHERE ");
            if !or_parts.is_empty() {
                if !and_parts.is_empty() {
                    sql.push('(');
                    sql.push_str(&and_parts.join(" AND "));
                    sql.push(')');
                    sql.push_str(" OR ");
                }
                sql.push_str(&or_parts.join(" OR "));
            } else {
                sql.push_str(&and_parts.join(" AND "));
            }
        }
        args.extend(and_args);
        args.extend(or_args);

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&self.having.iter().map(|(f, _)| f.clone()).collect::<Vec<_>>().join(" AND "));
            args.extend(self.having.iter().flat_map(|(_, a)| a.clone()));
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }

        if let Some(n) = self.limit {
            sql.push_str(&format!(" LIMIT {}", n));
            if let Some(o) = self.offset {
                sql.push_str(&format!(" OFFSET {}", o));
            }
        }

        (sql, args)
    }

    pub async fn find(self) -> Result<Vec<Record>, EormError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let (sql, args) = self.render_select();
        with_timeout(self.timeout.or(self.executor.query_timeout()), async {
            if let Some(rows) = self.cached_read(&sql, &args, ResultDiscriminator::List).await? {
                return Ok(rows);
            }
            let rows = self.executor.raw_query(&sql, &args).await?;
            self.cache_write(&sql, &args, ResultDiscriminator::List, rows.clone(), None).await?;
            Ok(rows)
        })
        .await
    }

    pub async fn find_first(mut self) -> Result<Option<Record>, EormError> {
        self.limit = Some(1);
        self.offset = None;
        let rows = self.find().await?;
        Ok(rows.into_iter().next())
    }

    pub async fn count(self) -> Result<u64, EormError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let timeout = self.timeout.or(self.executor.query_timeout());
        let (select_sql, args) = self.render_select();
        let count_sql = derive_count_sql(&select_sql);
        with_timeout(timeout, async {
            if let Some(cached) = self
                .cache_read_count(&select_sql, &args)
                .await?
            {
                return Ok(cached);
            }
            let rows = self.executor.raw_query(&count_sql, &args).await?;
            let count = rows.first().map(|r| r.int("count") as u64).unwrap_or(0);
            self.cache_write(&select_sql, &args, ResultDiscriminator::Count, vec![], Some(count))
                .await?;
            Ok(count)
        })
        .await
    }

    pub async fn paginate(self, page: u64, size: u64) -> Result<Page, EormError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let dialect = self.executor.dialect();
        let offset = page.saturating_sub(1).saturating_mul(size);
        let (base_sql, args) = self.render_select();
        let count_sql = derive_count_sql(&base_sql);
        let paged_sql = dialect.paginate(&base_sql, Some(size), offset);

        let timeout = self.timeout.or(self.executor.query_timeout());
        with_timeout(timeout, async {
            let total = if let Some(cached) = self.cache_read_count(&base_sql, &args).await? {
                cached
            } else {
                let rows = self.executor.raw_query(&count_sql, &args).await?;
                let total = rows.first().map(|r| r.int("count") as u64).unwrap_or(0);
                self.cache_write(
                    &base_sql,
                    &args,
                    ResultDiscriminator::Count,
                    vec![],
                    Some(total),
                )
                .await?;
                total
            };

            let rows = if let Some(cached) = self
                .cached_read(&paged_sql, &args, ResultDiscriminator::Page { page, size })
                .await?
            {
                cached
            } else {
                let rows = self.executor.raw_query(&paged_sql, &args).await?;
                self.cache_write(
                    &paged_sql,
                    &args,
                    ResultDiscriminator::Page { page, size },
                    rows.clone(),
                    None,
                )
                .await?;
                rows
            };

            Ok(Page { rows, page, size, total })
        })
        .await
    }

    pub async fn update(self, record: Record) -> Result<u64, EormError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let Some(table) = self.table_name().map(|t| t.to_string()) else {
            return Err(EormError::invalid_identifier("update target must be a table"));
        };

        let mut record = record;
        if !self.skip_timestamps {
            self.executor.timestamp_policy(&table).apply_on_update(&mut record);
        }

        let mut exclude = Vec::new();
        let mut version_predicate = None;
        let mut version_arg = None;
        if let Some(lock) = self.executor.optimistic_lock_policy(&table) {
            use crate::policy::VersionCheck;
            match lock.check_on_update(&record) {
                VersionCheck::Applies { predicate, current, next } => {
                    exclude.push(lock.version_field.clone());
                    record.set(lock.version_field.clone(), next);
                    version_predicate = Some(predicate);
                    version_arg = Some(current);
                }
                VersionCheck::NotApplicable => {}
            }
        }

        let (mut where_sql, mut where_args) = self.where_clause_only();
        if let Some(pred) = version_predicate {
            if where_sql.is_empty() {
                where_sql = pred;
            } else {
                where_sql = format!("{} AND {}", where_sql, pred);
            }
            where_args.push(version_arg.unwrap());
        }

        let synth = SqlSynthesizer::new(self.executor.dialect());
        let plan = synth.update(&table, &record, &exclude, &where_sql, &where_args)?;
        let had_version_check = version_predicate_was_set(&exclude);
        let result = self.executor.raw_execute(&plan.sql, &plan.args).await?;

        if had_version_check && result.rows_affected == 0 {
            return Err(EormError::VersionMismatch);
        }

        self.invalidate_cache().await?;
        Ok(result.rows_affected)
    }

    pub async fn delete(self) -> Result<u64, EormError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let Some(table) = self.table_name().map(|t| t.to_string()) else {
            return Err(EormError::invalid_identifier("delete target must be a table"));
        };
        let (where_sql, where_args) = self.where_clause_only();
        if where_sql.is_empty() {
            return Err(EormError::UnboundedMutationRefused);
        }

        let affected = if let Some(policy) = self.executor.soft_delete_policy(&table) {
            let (field, value) = policy.delete_assignment();
            let mut record = Record::new();
            record.set(field, value);
            let synth = SqlSynthesizer::new(self.executor.dialect());
            let plan = synth.update(&table, &record, &[], &where_sql, &where_args)?;
            self.executor.raw_execute(&plan.sql, &plan.args).await?.rows_affected
        } else {
            let synth = SqlSynthesizer::new(self.executor.dialect());
            let plan = synth.delete(&table, &where_sql, &where_args)?;
            self.executor.raw_execute(&plan.sql, &plan.args).await?.rows_affected
        };

        self.invalidate_cache().await?;
        Ok(affected)
    }

    /// Resets a soft-deleted row's sentinel column back to "active"
    /// (`NULL`/`0` depending on the table's configured mode). Requires both
    /// a configured soft-delete policy for the table and a non-empty WHERE
    /// clause, refused by default like `delete`/`update`.
    pub async fn restore(self) -> Result<u64, EormError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let Some(table) = self.table_name().map(|t| t.to_string()) else {
            return Err(EormError::invalid_identifier("restore target must be a table"));
        };
        let Some(policy) = self.executor.soft_delete_policy(&table) else {
            return Err(EormError::NotSupported(format!(
                "no soft-delete policy configured for table '{}'",
                table
            )));
        };
        let (where_sql, where_args) = self.where_clause_only();
        if where_sql.is_empty() {
            return Err(EormError::UnboundedMutationRefused);
        }

        let (field, value) = policy.restore_assignment();
        let mut record = Record::new();
        record.set(field, value);
        let synth = SqlSynthesizer::new(self.executor.dialect());
        let plan = synth.update(&table, &record, &[], &where_sql, &where_args)?;
        let result = self.executor.raw_execute(&plan.sql, &plan.args).await?;

        self.invalidate_cache().await?;
        Ok(result.rows_affected)
    }

    /// Issues a physical `DELETE` regardless of any configured soft-delete
    /// policy. Still refuses an unbounded (no-WHERE) delete by default
    /// (spec §9 open question ii).
    pub async fn force_delete(self) -> Result<u64, EormError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let Some(table) = self.table_name().map(|t| t.to_string()) else {
            return Err(EormError::invalid_identifier("delete target must be a table"));
        };
        let (where_sql, where_args) = self.where_clause_only();
        if where_sql.is_empty() {
            return Err(EormError::UnboundedMutationRefused);
        }

        let synth = SqlSynthesizer::new(self.executor.dialect());
        let plan = synth.delete(&table, &where_sql, &where_args)?;
        let affected = self.executor.raw_execute(&plan.sql, &plan.args).await?.rows_affected;

        self.invalidate_cache().await?;
        Ok(affected)
    }

    fn where_clause_only(&self) -> (String, Vec<Value>) {
        let and_parts: Vec<String> = self.and_predicates.iter().map(|(f, _)| f.clone()).collect();
        let or_parts: Vec<String> = self.or_predicates.iter().map(|(f, _)| f.clone()).collect();
        let and_args: Vec<Value> = self.and_predicates.iter().flat_map(|(_, a)| a.clone()).collect();
        let or_args: Vec<Value> = self.or_predicates.iter().flat_map(|(_, a)| a.clone()).collect();

        if and_parts.is_empty() && or_parts.is_empty() {
            return (String::new(), Vec::new());
        }

        let mut sql = String::new();
        if !or_parts.is_empty() {
            if !and_parts.is_empty() {
                sql.push('(');
                sql.push_str(&and_parts.join(" AND "));
                sql.push(')');
                sql.push_str(" OR ");
            }
            sql.push_str(&or_parts.join(" OR "));
        } else {
            sql.push_str(&and_parts.join(" AND "));
        }

        let mut args = and_args;
        args.extend(or_args);
        (sql, args)
    }

    async fn cached_read(
        &self,
        sql: &str,
        args: &[Value],
        discriminator: ResultDiscriminator,
    ) -> Result<Option<Vec<Record>>, EormError> {
        let Some(cache) = self.executor.cache() else { return Ok(None) };
        let Some(repo) = &self.cache_repository else { return Ok(None) };
        let key = derive_cache_key(self.executor.database_name(), sql, args, discriminator);
        Ok(cache.get(repo, &key).await?.map(|p| p.rows))
    }

    async fn cache_read_count(&self, sql: &str, args: &[Value]) -> Result<Option<u64>, EormError> {
        let Some(cache) = self.executor.cache() else { return Ok(None) };
        let Some(repo) = &self.cache_repository else { return Ok(None) };
        let key = derive_cache_key(self.executor.database_name(), sql, args, ResultDiscriminator::Count);
        Ok(cache.get(repo, &key).await?.and_then(|p| p.count))
    }

    async fn cache_write(
        &self,
        sql: &str,
        args: &[Value],
        discriminator: ResultDiscriminator,
        rows: Vec<Record>,
        count: Option<u64>,
    ) -> Result<(), EormError> {
        let Some(cache) = self.executor.cache() else { return Ok(()) };
        let Some(repo) = &self.cache_repository else { return Ok(()) };
        let ttl = if matches!(discriminator, ResultDiscriminator::Count) {
            self.count_cache_ttl
                .or(self.cache_ttl)
                .unwrap_or_else(|| self.executor.default_cache_ttl())
        } else {
            self.cache_ttl.unwrap_or_else(|| self.executor.default_cache_ttl())
        };
        let key = derive_cache_key(self.executor.database_name(), sql, args, discriminator);
        cache.set(repo, &key, CachedPayload { rows, count }, ttl).await
    }

    async fn invalidate_cache(&self) -> Result<(), EormError> {
        let Some(cache) = self.executor.cache() else { return Ok(()) };
        let Some(repo) = &self.cache_repository else { return Ok(()) };
        cache.clear_repository(repo).await
    }
}

fn version_predicate_was_set(exclude: &[String]) -> bool {
    !exclude.is_empty()
}

/// A nested AND/OR group passed to `where_group`/`or_where_group`; has no
/// terminals of its own, only composers, and its rendered string is wrapped
/// in parens by the parent.
pub struct WhereGroup {
    and_predicates: Vec<(String, Vec<Value>)>,
    or_predicates: Vec<(String, Vec<Value>)>,
    error: Option<EormError>,
}

impl WhereGroup {
    fn new() -> Self {
        Self {
            and_predicates: Vec::new(),
            or_predicates: Vec::new(),
            error: None,
        }
    }

    pub fn where_(mut self, fragment: impl Into<String>, args: Vec<Value>) -> Self {
        let fragment = fragment.into();
        if !is_safe_fragment(&fragment) {
            self.error = Some(EormError::unsafe_fragment(&fragment));
        }
        self.and_predicates.push((fragment, args));
        self
    }

    pub fn or_where(mut self, fragment: impl Into<String>, args: Vec<Value>) -> Self {
        let fragment = fragment.into();
        if !is_safe_fragment(&fragment) {
            self.error = Some(EormError::unsafe_fragment(&fragment));
        }
        self.or_predicates.push((fragment, args));
        self
    }

    fn render(&self) -> Option<(String, Vec<Value>)> {
        if self.and_predicates.is_empty() && self.or_predicates.is_empty() {
            return None;
        }
        let and_parts: Vec<String> = self.and_predicates.iter().map(|(f, _)| f.clone()).collect();
        let or_parts: Vec<String> = self.or_predicates.iter().map(|(f, _)| f.clone()).collect();
        let mut sql = String::new();
        if !or_parts.is_empty() {
            if !and_parts.is_empty() {
                sql.push('(');
                sql.push_str(&and_parts.join(" AND "));
                sql.push(')');
                sql.push_str(" OR ");
            }
            sql.push_str(&or_parts.join(" OR "));
        } else {
            sql.push_str(&and_parts.join(" AND "));
        }
        let mut args: Vec<Value> = self.and_predicates.iter().flat_map(|(_, a)| a.clone()).collect();
        args.extend(self.or_predicates.iter().flat_map(|(_, a)| a.clone()));
        Some((sql, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests_support::FakeExecutor;

    #[tokio::test]
    async fn renders_and_or_grouping_per_spec() {
        let exec = FakeExecutor::new();
        let builder = QueryBuilder::new(&exec, "users")
            .where_("age > ?", vec![Value::Int(18)])
            .where_("active = ?", vec![Value::Bool(true)])
            .or_where("is_admin = ?", vec![Value::Bool(true)]);
        let (sql, args) = builder.render_select();
        assert!(sql.contains("WHERE (age > ? AND active = ?) OR is_admin = ?"));
        assert_eq!(args.len(), 3);
    }

    #[tokio::test]
    async fn unsafe_fragment_is_captured_and_surfaces_on_terminal() {
        let exec = FakeExecutor::new();
        let builder = QueryBuilder::new(&exec, "users").where_("1=1; DROP TABLE users", vec![]);
        let err = builder.find().await.unwrap_err();
        assert!(matches!(err, EormError::UnsafeSqlFragment(_)));
    }

    #[tokio::test]
    async fn delete_without_where_is_refused() {
        let exec = FakeExecutor::new();
        let err = QueryBuilder::new(&exec, "users").delete().await.unwrap_err();
        assert!(matches!(err, EormError::UnboundedMutationRefused));
    }

    #[tokio::test]
    async fn soft_delete_view_adds_predicate_by_default() {
        let exec = FakeExecutor::with_soft_delete("deleted_at");
        let builder = QueryBuilder::new(&exec, "users");
        let (sql, _) = builder.render_select();
        assert!(sql.contains("deleted_at IS NULL"));
    }

    #[tokio::test]
    async fn with_trashed_suppresses_soft_delete_predicate() {
        let exec = FakeExecutor::with_soft_delete("deleted_at");
        let builder = QueryBuilder::new(&exec, "users").with_trashed();
        let (sql, _) = builder.render_select();
        assert!(!sql.contains("deleted_at"));
    }

    #[tokio::test]
    async fn restore_without_where_is_refused() {
        let exec = FakeExecutor::with_soft_delete("deleted_at");
        let err = QueryBuilder::new(&exec, "users").restore().await.unwrap_err();
        assert!(matches!(err, EormError::UnboundedMutationRefused));
    }

    #[tokio::test]
    async fn restore_without_configured_policy_is_not_supported() {
        let exec = FakeExecutor::new();
        let err = QueryBuilder::new(&exec, "users")
            .where_("id = ?", vec![Value::Int(2)])
            .restore()
            .await
            .unwrap_err();
        assert!(matches!(err, EormError::NotSupported(_)));
    }

    #[tokio::test]
    async fn force_delete_without_where_is_refused() {
        let exec = FakeExecutor::with_soft_delete("deleted_at");
        let err = QueryBuilder::new(&exec, "users").force_delete().await.unwrap_err();
        assert!(matches!(err, EormError::UnboundedMutationRefused));
    }
}
