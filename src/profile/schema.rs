//! Profile database schema.
//!
//! Three tables: `users`, `liked_papers` (one row per user and paper URL),
//! and `search_history` (trimmed to the newest entries per user).

use crate::profile::error::ProfileError;
use libsql::{Connection, params};

/// Initialize the database schema
pub async fn initialize_schema(conn: &Connection) -> Result<(), ProfileError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            username TEXT PRIMARY KEY,
            created_at TEXT NOT NULL
        )",
        params![],
    )
    .await
    .map_err(|e| ProfileError::Schema(format!("Failed to create users table: {}", e)))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS liked_papers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            paper_url TEXT NOT NULL,
            title TEXT NOT NULL,
            abstract TEXT NOT NULL,
            url_pdf TEXT,
            date TEXT,
            liked_at TEXT NOT NULL,
            UNIQUE (username, paper_url),
            FOREIGN KEY (username) REFERENCES users(username) ON DELETE CASCADE
        )",
        params![],
    )
    .await
    .map_err(|e| ProfileError::Schema(format!("Failed to create liked_papers table: {}", e)))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS search_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL,
            query TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            results_count INTEGER NOT NULL,
            top_result TEXT,
            FOREIGN KEY (username) REFERENCES users(username) ON DELETE CASCADE
        )",
        params![],
    )
    .await
    .map_err(|e| ProfileError::Schema(format!("Failed to create search_history table: {}", e)))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_search_history_username ON search_history(username)",
        params![],
    )
    .await
    .map_err(|e| ProfileError::Schema(format!("Failed to create index on search_history: {}", e)))?;

    Ok(())
}
