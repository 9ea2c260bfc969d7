use std::time::Duration;

use moka::future::Cache;

/// Rendered pages kept for a fixed time, keyed by request.
///
/// Entries are never refreshed in place: once an entry is older than the
/// TTL it is gone and the next request renders it again. The number of
/// pages is bounded, since every distinct query string gets its own key.
#[derive(Clone)]
pub struct PageCache {
    pages: Cache<String, String>,
}

impl PageCache {
    pub fn new(ttl: Duration, max_pages: u64) -> Self {
        let pages = Cache::builder()
            .max_capacity(max_pages)
            .time_to_live(ttl)
            .build();
        Self { pages }
    }

    /// Key a page by path and query plus the viewer, since the layout
    /// renders the viewer's name.
    pub fn key(path_and_query: &str, viewer: Option<&str>) -> String {
        format!("{}|{}", path_and_query, viewer.unwrap_or(""))
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.pages.get(key).await
    }

    pub async fn insert(&self, key: String, body: String) {
        self.pages.insert(key, body).await;
    }

    /// Drop every page. Takes effect for reads immediately.
    pub fn clear(&self) {
        self.pages.invalidate_all();
    }

    /// Number of live pages once pending evictions have run.
    pub async fn len(&self) -> u64 {
        self.pages.run_pending_tasks().await;
        self.pages.entry_count()
    }
}
