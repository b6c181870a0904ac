use crate::error::EormError;
use crate::executor::Executor;
use crate::raw_connection::ExecResult;
use crate::record::Record;
use crate::sql_synth::{validate_table_ref, SqlSynthesizer};
use crate::value::Value;

/// Chunks `records` into multi-row INSERT statements of at most `chunk_size`
/// rows each, summing rows-affected. A failing chunk aborts the whole
/// operation immediately — no partial accounting is reported, matching the
/// "independent chunks unless wrapped in an explicit transaction" decision
/// recorded for this crate (see DESIGN.md).
pub async fn batch_insert(
    executor: &dyn Executor,
    table: &str,
    records: &[Record],
    chunk_size: usize,
) -> Result<u64, EormError> {
    validate_table_ref(table)?;
    if records.is_empty() {
        return Ok(0);
    }
    let chunk_size = chunk_size.max(1);

    let mut total = 0u64;
    for chunk in records.chunks(chunk_size) {
        let plan = multi_row_insert(executor.dialect(), table, chunk)?;
        let result = executor.raw_execute(&plan.0, &plan.1).await?;
        total += result.rows_affected;
    }
    Ok(total)
}

/// One `INSERT INTO table (...) VALUES (...), (...), ...` statement covering
/// every record in `chunk`, which must share the same column set (the first
/// record's key order is authoritative).
fn multi_row_insert(
    dialect: &dyn crate::dialect::Dialect,
    table: &str,
    chunk: &[Record],
) -> Result<(String, Vec<Value>), EormError> {
    let Some(first) = chunk.first() else {
        return Ok((String::new(), Vec::new()));
    };
    let columns: Vec<String> = first.keys().map(|k| k.to_string()).collect();
    for column in &columns {
        crate::sql_synth::validate_column(column)?;
    }

    let quoted_table = match table.split_once('.') {
        Some((schema, name)) => dialect.qualified_table(Some(schema), name),
        None => dialect.qualified_table(None, table),
    };
    let quoted_columns: Vec<String> = columns.iter().map(|c| dialect.quote_identifier(c)).collect();

    let mut args = Vec::new();
    let mut row_groups = Vec::new();
    let mut next_index = 1;
    for record in chunk {
        let mut placeholders = Vec::with_capacity(columns.len());
        for column in &columns {
            placeholders.push(dialect.placeholder(next_index));
            next_index += 1;
            args.push(record.get(column).cloned().unwrap_or(Value::Null));
        }
        row_groups.push(format!("({})", placeholders.join(", ")));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        quoted_table,
        quoted_columns.join(", "),
        row_groups.join(", ")
    );
    Ok((sql, args))
}

/// Chunks `records` into `chunk_size`-sized groups, applying `update_one` to
/// every record within a chunk in sequence (most dialects have no
/// multi-row UPDATE syntax, unlike INSERT) and summing rows-affected. Aborts
/// on the first failing chunk.
pub async fn batch_update(
    executor: &dyn Executor,
    table: &str,
    records: &[(Record, String, Vec<Value>)],
    chunk_size: usize,
) -> Result<u64, EormError> {
    validate_table_ref(table)?;
    let chunk_size = chunk_size.max(1);
    let synth = SqlSynthesizer::new(executor.dialect());

    let mut total = 0u64;
    for chunk in records.chunks(chunk_size) {
        for (record, where_sql, where_args) in chunk {
            let plan = synth.update(table, record, &[], where_sql, where_args)?;
            let result = executor.raw_execute(&plan.sql, &plan.args).await?;
            total += result.rows_affected;
        }
    }
    Ok(total)
}

/// Chunks `(where_sql, where_args)` predicates into `chunk_size`-sized groups
/// and issues one DELETE per predicate, summing rows-affected. Aborts on the
/// first failing chunk.
pub async fn batch_delete(
    executor: &dyn Executor,
    table: &str,
    predicates: &[(String, Vec<Value>)],
    chunk_size: usize,
) -> Result<u64, EormError> {
    validate_table_ref(table)?;
    let chunk_size = chunk_size.max(1);
    let synth = SqlSynthesizer::new(executor.dialect());

    let mut total = 0u64;
    for chunk in predicates.chunks(chunk_size) {
        for (where_sql, where_args) in chunk {
            let plan = synth.delete(table, where_sql, where_args)?;
            let result = executor.raw_execute(&plan.sql, &plan.args).await?;
            total += result.rows_affected;
        }
    }
    Ok(total)
}

/// The outcome of one statement within a `batch_exec` call.
#[derive(Debug, Clone)]
pub struct BatchExecResult {
    pub index: usize,
    pub sql: String,
    pub args: Vec<Value>,
    pub error: Option<String>,
    pub rows_affected: Option<u64>,
    pub last_insert_id: Option<i64>,
}

/// Aggregate outcome of a `batch_exec` call: the per-statement results, plus
/// whether any of them failed.
pub struct BatchExecOutcome {
    pub results: Vec<BatchExecResult>,
    pub has_failure: bool,
}

/// Runs an arbitrary list of statements in order, stopping at the first
/// error. Statements after a failure are reported with no result and no
/// error annotation — they never ran.
pub async fn batch_exec(
    executor: &dyn Executor,
    statements: &[(String, Vec<Value>)],
) -> Result<BatchExecOutcome, EormError> {
    let mut results = Vec::with_capacity(statements.len());
    let mut has_failure = false;

    for (index, (sql, args)) in statements.iter().enumerate() {
        if has_failure {
            results.push(BatchExecResult {
                index,
                sql: sql.clone(),
                args: args.clone(),
                error: None,
                rows_affected: None,
                last_insert_id: None,
            });
            continue;
        }

        match executor.raw_execute(sql, args).await {
            Ok(ExecResult { rows_affected, last_insert_id }) => {
                results.push(BatchExecResult {
                    index,
                    sql: sql.clone(),
                    args: args.clone(),
                    error: None,
                    rows_affected: Some(rows_affected),
                    last_insert_id,
                });
            }
            Err(e) => {
                has_failure = true;
                results.push(BatchExecResult {
                    index,
                    sql: sql.clone(),
                    args: args.clone(),
                    error: Some(e.to_string()),
                    rows_affected: None,
                    last_insert_id: None,
                });
            }
        }
    }

    Ok(BatchExecOutcome { results, has_failure })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests_support::FakeExecutor;

    #[tokio::test]
    async fn batch_insert_chunks_and_sums_rows_affected() {
        let executor = FakeExecutor::new();
        let mut records = Vec::new();
        for i in 0..5 {
            let mut r = Record::new();
            r.set("id", Value::Int(i));
            records.push(r);
        }
        let total = batch_insert(&executor, "users", &records, 2).await.unwrap();
        assert_eq!(total, 0); // FakeExecutor reports 0 rows affected per call.
    }

    #[tokio::test]
    async fn batch_insert_rejects_invalid_table() {
        let executor = FakeExecutor::new();
        let mut r = Record::new();
        r.set("id", Value::Int(1));
        let err = batch_insert(&executor, "1bad", &[r], 10).await.unwrap_err();
        assert!(matches!(err, EormError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn batch_exec_stops_at_first_error() {
        struct FailingExecutor(FakeExecutor);

        #[async_trait::async_trait]
        impl Executor for FailingExecutor {
            fn dialect(&self) -> &dyn crate::dialect::Dialect {
                self.0.dialect()
            }
            async fn raw_query(&self, sql: &str, args: &[Value]) -> Result<Vec<Record>, EormError> {
                self.0.raw_query(sql, args).await
            }
            async fn raw_execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, EormError> {
                if sql.contains("FAIL") {
                    return Err(EormError::driver("boom"));
                }
                self.0.raw_execute(sql, args).await
            }
            fn database_name(&self) -> &str {
                self.0.database_name()
            }
            fn metadata(&self) -> &crate::metadata::MetadataCache {
                self.0.metadata()
            }
            fn soft_delete_policy(&self, table: &str) -> Option<crate::policy::SoftDeletePolicy> {
                self.0.soft_delete_policy(table)
            }
            fn timestamp_policy(&self, table: &str) -> crate::policy::TimestampPolicy {
                self.0.timestamp_policy(table)
            }
            fn optimistic_lock_policy(&self, table: &str) -> Option<crate::policy::OptimisticLockPolicy> {
                self.0.optimistic_lock_policy(table)
            }
            fn cache(&self) -> Option<&dyn crate::cache::CacheBackend> {
                self.0.cache()
            }
        }

        let executor = FailingExecutor(FakeExecutor::new());
        let statements = vec![
            ("SELECT 1".to_string(), vec![]),
            ("FAIL".to_string(), vec![]),
            ("SELECT 2".to_string(), vec![]),
        ];
        let outcome = batch_exec(&executor, &statements).await.unwrap();
        assert!(outcome.has_failure);
        assert!(outcome.results[0].error.is_none());
        assert!(outcome.results[1].error.is_some());
        assert!(outcome.results[2].error.is_none() && outcome.results[2].rows_affected.is_none());
    }
}
