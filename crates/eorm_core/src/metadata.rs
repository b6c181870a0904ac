use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::EormError;
use crate::raw_connection::RawConnection;

/// Primary-key and column-type snapshot for one table, loaded lazily on
/// first use and retained for the life of the handle. Column lookups are
/// case-folded since SQL identifiers are conventionally case-insensitive
/// even on dialects that preserve the stored case.
#[derive(Debug, Clone, Default)]
pub struct MetadataSnapshot {
    pub primary_keys: Vec<String>,
    columns: HashMap<String, String>,
}

impl MetadataSnapshot {
    pub fn new(primary_keys: Vec<String>, columns: Vec<(String, String)>) -> Self {
        let columns = columns
            .into_iter()
            .map(|(name, ty)| (name.to_ascii_lowercase(), ty))
            .collect();
        Self {
            primary_keys,
            columns,
        }
    }

    pub fn column_type(&self, name: &str) -> Option<&str> {
        self.columns.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(&name.to_ascii_lowercase())
    }
}

/// Catalog queries a driver must provide so the metadata cache can populate
/// a snapshot without the core knowing anything dialect-specific about
/// `information_schema`/`pragma_table_info`/`sys.columns`/etc.
#[async_trait::async_trait]
pub trait CatalogQueries: Send + Sync {
    async fn primary_keys(&self, conn: &dyn RawConnection, table: &str) -> Result<Vec<String>, EormError>;
    async fn columns(&self, conn: &dyn RawConnection, table: &str) -> Result<Vec<(String, String)>, EormError>;
}

/// Per-(database, table) snapshot cache. One-shot population under a
/// per-table lock, then read-only — matches the concurrency model's
/// "metadata cache: one-shot population under per-table mutex" shared-state
/// entry.
#[derive(Default)]
pub struct MetadataCache {
    entries: RwLock<HashMap<String, Arc<MetadataSnapshot>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_cached(&self, table: &str) -> Option<Arc<MetadataSnapshot>> {
        self.entries.read().unwrap().get(&table.to_ascii_lowercase()).cloned()
    }

    pub async fn get_or_load(
        &self,
        conn: &dyn RawConnection,
        catalog: &dyn CatalogQueries,
        table: &str,
    ) -> Result<Arc<MetadataSnapshot>, EormError> {
        if let Some(existing) = self.get_cached(table) {
            return Ok(existing);
        }

        let primary_keys = catalog.primary_keys(conn, table).await?;
        let columns = catalog.columns(conn, table).await?;
        let snapshot = Arc::new(MetadataSnapshot::new(primary_keys, columns));

        let mut guard = self.entries.write().unwrap();
        let key = table.to_ascii_lowercase();
        let snapshot = guard.entry(key).or_insert(snapshot).clone();
        Ok(snapshot)
    }

    pub fn invalidate(&self, table: &str) {
        self.entries.write().unwrap().remove(&table.to_ascii_lowercase());
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_lookup_is_case_insensitive() {
        let snap = MetadataSnapshot::new(
            vec!["id".to_string()],
            vec![("Name".to_string(), "TEXT".to_string())],
        );
        assert_eq!(snap.column_type("name"), Some("TEXT"));
        assert_eq!(snap.column_type("NAME"), Some("TEXT"));
        assert!(snap.has_column("Name"));
        assert!(!snap.has_column("missing"));
    }

    #[test]
    fn cache_starts_empty() {
        let cache = MetadataCache::new();
        assert!(cache.get_cached("users").is_none());
    }
}
