use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EormError;
use crate::record::Record;
use crate::value::Value;

/// What a cached result shape looks like, folded into the key so a list
/// query and a count query over the same SQL+args never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultDiscriminator {
    List,
    First,
    Count,
    Page { page: u64, size: u64 },
}

impl ResultDiscriminator {
    fn suffix(&self) -> String {
        match self {
            ResultDiscriminator::List => String::new(),
            ResultDiscriminator::First => "_first".to_string(),
            ResultDiscriminator::Count => "_count".to_string(),
            ResultDiscriminator::Page { page, size } => format!("_p{}_s{}", page, size),
        }
    }
}

/// Deterministic value stringification used by key derivation — must agree
/// byte-for-byte across repeated calls with logically equal arguments.
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) | Value::Json(s) | Value::Decimal(s) => s.clone(),
        Value::Bytes(b) => hex::encode(b),
        Value::DateTime(dt) => dt.to_rfc3339(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Time(t) => t.format("%H:%M:%S%.f").to_string(),
    }
}

/// `hash(database_name || "\x00" || sql || "\x00" || arg1 || ...)` plus a
/// literal discriminator suffix.
pub fn derive_cache_key(
    database_name: &str,
    sql: &str,
    args: &[Value],
    discriminator: ResultDiscriminator,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(database_name.as_bytes());
    hasher.update(b"\x00");
    hasher.update(sql.as_bytes());
    for arg in args {
        hasher.update(b"\x00");
        hasher.update(stringify(arg).as_bytes());
    }
    let digest = hasher.finalize();
    format!("{}{}", hex::encode(digest), discriminator.suffix())
}

/// A repository-namespaced cache entry — note this stores results as an
/// opaque JSON envelope so both the in-process and external backends share
/// one serialisation format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPayload {
    pub rows: Vec<Record>,
    pub count: Option<u64>,
}

/// Cache backends implement get/set/delete/clearRepository/clearAll/status;
/// callers select one through builder override -> handle override -> process
/// default precedence (implemented by the caller, not by the trait).
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, repository: &str, key: &str) -> Result<Option<CachedPayload>, EormError>;

    async fn set(
        &self,
        repository: &str,
        key: &str,
        value: CachedPayload,
        ttl: Duration,
    ) -> Result<(), EormError>;

    async fn delete(&self, repository: &str, key: &str) -> Result<(), EormError>;

    /// Coarse invalidation: clears every entry belonging to `repository`,
    /// regardless of key. This is the only invalidation write-through uses.
    async fn clear_repository(&self, repository: &str) -> Result<(), EormError>;

    async fn clear_all(&self) -> Result<(), EormError>;

    async fn status(&self) -> Result<CacheStatus, EormError>;
}

#[derive(Debug, Clone, Default)]
pub struct CacheStatus {
    pub connected: bool,
    pub entry_count: Option<u64>,
}

struct Entry {
    payload: CachedPayload,
    expires_at: Instant,
}

const STRIPE_COUNT: usize = 16;

/// In-process backend: striped locks plus a background sweep that drops
/// expired entries, matching the health monitor's own
/// spawn-a-background-task idiom rather than sweeping inline on every read.
pub struct InProcessCacheBackend {
    stripes: Vec<Mutex<HashMap<String, Entry>>>,
    repositories: Mutex<HashMap<String, Vec<usize>>>,
}

impl InProcessCacheBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stripes: (0..STRIPE_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            repositories: Mutex::new(HashMap::new()),
        })
    }

    fn stripe_for(&self, key: &str) -> &Mutex<HashMap<String, Entry>> {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let index = digest[0] as usize % self.stripes.len();
        &self.stripes[index]
    }

    fn composite(repository: &str, key: &str) -> String {
        format!("{}\x00{}", repository, key)
    }

    /// Spawn the periodic TTL sweep. Call once per backend instance; the
    /// returned task should be aborted when the owning handle closes.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let backend = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let now = Instant::now();
                for stripe in &backend.stripes {
                    let mut guard = stripe.lock().unwrap();
                    guard.retain(|_, entry| entry.expires_at > now);
                }
            }
        })
    }
}

impl Default for InProcessCacheBackend {
    fn default() -> Self {
        Self {
            stripes: (0..STRIPE_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            repositories: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait::async_trait]
impl CacheBackend for InProcessCacheBackend {
    async fn get(&self, repository: &str, key: &str) -> Result<Option<CachedPayload>, EormError> {
        let composite = Self::composite(repository, key);
        let stripe = self.stripe_for(&composite);
        let guard = stripe.lock().unwrap();
        // Deep clone on read: callers must never be able to mutate the
        // cached instance through a returned reference.
        Ok(guard.get(&composite).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.payload.clone())
            } else {
                None
            }
        }))
    }

    async fn set(
        &self,
        repository: &str,
        key: &str,
        value: CachedPayload,
        ttl: Duration,
    ) -> Result<(), EormError> {
        let composite = Self::composite(repository, key);
        let stripe_index = {
            let mut hasher = Sha256::new();
            hasher.update(composite.as_bytes());
            hasher.finalize()[0] as usize % self.stripes.len()
        };
        {
            let mut guard = self.stripes[stripe_index].lock().unwrap();
            guard.insert(
                composite.clone(),
                Entry {
                    payload: value,
                    expires_at: Instant::now() + ttl,
                },
            );
        }
        let mut repos = self.repositories.lock().unwrap();
        repos
            .entry(repository.to_string())
            .or_default()
            .push(stripe_index);
        Ok(())
    }

    async fn delete(&self, repository: &str, key: &str) -> Result<(), EormError> {
        let composite = Self::composite(repository, key);
        let stripe = self.stripe_for(&composite);
        stripe.lock().unwrap().remove(&composite);
        Ok(())
    }

    async fn clear_repository(&self, repository: &str) -> Result<(), EormError> {
        let prefix = format!("{}\x00", repository);
        for stripe in &self.stripes {
            let mut guard = stripe.lock().unwrap();
            guard.retain(|k, _| !k.starts_with(&prefix));
        }
        self.repositories.lock().unwrap().remove(repository);
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), EormError> {
        for stripe in &self.stripes {
            stripe.lock().unwrap().clear();
        }
        self.repositories.lock().unwrap().clear();
        Ok(())
    }

    async fn status(&self) -> Result<CacheStatus, EormError> {
        let count: usize = self.stripes.iter().map(|s| s.lock().unwrap().len()).sum();
        Ok(CacheStatus {
            connected: true,
            entry_count: Some(count as u64),
        })
    }
}
