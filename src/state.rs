use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::cache::PageCache;
use crate::config::Config;

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub page_cache: PageCache,
}

impl AppState {
    pub fn new(db: DbPool, config: Config) -> Self {
        let ttl = Duration::from_secs(config.cache.index_ttl_secs);
        let page_cache = PageCache::new(ttl, config.cache.max_pages);
        Self {
            db,
            config,
            page_cache,
        }
    }
}
