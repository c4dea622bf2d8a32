use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

/// Process-wide registry of per-key mutexes. Admin mutations and the spend
/// monitor serialize on the same key so a manual stats reset cannot
/// interleave with an in-flight rotation. Cross-key reads never take these.
static KEY_LOCKS: Lazy<DashMap<String, Arc<Mutex<()>>>> = Lazy::new(DashMap::new);

pub fn key_lock(id: &str) -> Arc<Mutex<()>> {
    KEY_LOCKS
        .entry(id.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}
