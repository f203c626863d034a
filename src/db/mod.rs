mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::Config;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Build the connection pool. Every connection gets the configured busy
/// timeout and enforces foreign keys, so cascades on purge work.
pub fn create_pool(config: &Config) -> Result<DbPool, r2d2::Error> {
    let busy_timeout = config.busy_timeout;
    let manager = SqliteConnectionManager::file(&config.database_path).with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    Pool::builder().max_size(config.pool_size).build(manager)
}
