//! Database schema definitions
//!
//! This module contains the SQL schema backing the SQLite queue backend.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Every durable list; head = highest id, tail = lowest id
CREATE TABLE IF NOT EXISTS queue_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    record TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_items_queue ON queue_items(queue, id);

-- Visited records, keyed by URL identity hash
CREATE TABLE IF NOT EXISTS visited (
    key TEXT PRIMARY KEY,
    visited_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

-- Robots.txt fetch results per host; NULL expiry never expires
CREATE TABLE IF NOT EXISTS robots (
    key TEXT PRIMARY KEY,
    status INTEGER NOT NULL,
    body BLOB NOT NULL,
    fetched_at INTEGER NOT NULL,
    expires_at INTEGER
);

-- Last fetch attempt per host
CREATE TABLE IF NOT EXISTS last_crawl (
    key TEXT PRIMARY KEY,
    crawled_at INTEGER NOT NULL
);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
