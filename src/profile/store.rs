//! Profile operations on a libsql database

use chrono::{DateTime, Utc};
use libsql::{Connection, Row, params};
use tracing::{debug, instrument};

use super::{LikedPaper, SearchHistoryEntry};
use crate::index::DocumentRecord;
use crate::profile::error::ProfileError;
use crate::profile::schema;
use crate::rank::SearchSummary;

/// Search history entries kept per user
pub const HISTORY_LIMIT: usize = 100;

/// User profiles: accounts, liked papers, and search history
#[derive(Clone)]
pub struct ProfileStore {
    conn: Connection,
}

impl ProfileStore {
    /// Create a store on an open connection
    #[instrument(skip(conn))]
    pub async fn new(conn: Connection) -> Result<Self, ProfileError> {
        schema::initialize_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Open or create the database at `path`
    pub async fn new_from_path(path: &str) -> Result<Self, ProfileError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| ProfileError::Connection(format!("Failed to open database: {}", e)))?;

        let conn = db
            .connect()
            .map_err(|e| ProfileError::Connection(format!("Failed to connect to database: {}", e)))?;

        Self::new(conn).await
    }

    /// Register `username`; false when it is empty or already taken
    #[instrument(skip(self))]
    pub async fn create_user(&self, username: &str) -> Result<bool, ProfileError> {
        if username.trim().is_empty() {
            return Ok(false);
        }
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO users (username, created_at) VALUES (?, ?)",
                params![username, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| ProfileError::Query(format!("Failed to create user: {}", e)))?;
        Ok(inserted > 0)
    }

    pub async fn user_exists(&self, username: &str) -> Result<bool, ProfileError> {
        let mut rows = self
            .conn
            .query("SELECT 1 FROM users WHERE username = ?", params![username])
            .await
            .map_err(|e| ProfileError::Query(format!("Failed to look up user: {}", e)))?;
        Ok(rows.next().await?.is_some())
    }

    /// Like a paper; false for an unknown user or an already liked paper URL
    #[instrument(skip(self, paper), fields(paper_url = %paper.paper_url))]
    pub async fn like_paper(
        &self,
        username: &str,
        paper: &DocumentRecord,
    ) -> Result<bool, ProfileError> {
        if !self.user_exists(username).await? {
            return Ok(false);
        }
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO liked_papers
                 (username, paper_url, title, abstract, url_pdf, date, liked_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    username,
                    paper.paper_url.clone(),
                    paper.title.clone(),
                    paper.abstract_text.clone(),
                    paper.url_pdf.clone(),
                    paper.date.clone(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| ProfileError::Query(format!("Failed to like paper: {}", e)))?;
        debug!("Like inserted: {}", inserted > 0);
        Ok(inserted > 0)
    }

    /// Remove a like; false only for an unknown user
    pub async fn unlike_paper(&self, username: &str, paper_url: &str) -> Result<bool, ProfileError> {
        if !self.user_exists(username).await? {
            return Ok(false);
        }
        self.conn
            .execute(
                "DELETE FROM liked_papers WHERE username = ? AND paper_url = ?",
                params![username, paper_url],
            )
            .await
            .map_err(|e| ProfileError::Query(format!("Failed to unlike paper: {}", e)))?;
        Ok(true)
    }

    pub async fn is_paper_liked(&self, username: &str, paper_url: &str) -> Result<bool, ProfileError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM liked_papers WHERE username = ? AND paper_url = ?",
                params![username, paper_url],
            )
            .await
            .map_err(|e| ProfileError::Query(format!("Failed to check like: {}", e)))?;
        Ok(rows.next().await?.is_some())
    }

    /// Liked papers in the order they were liked
    pub async fn liked_papers(&self, username: &str) -> Result<Vec<LikedPaper>, ProfileError> {
        let mut rows = self
            .conn
            .query(
                "SELECT paper_url, title, abstract, url_pdf, date, liked_at
                 FROM liked_papers WHERE username = ? ORDER BY id",
                params![username],
            )
            .await
            .map_err(|e| ProfileError::Query(format!("Failed to list liked papers: {}", e)))?;

        let mut papers = Vec::new();
        while let Some(row) = rows.next().await? {
            papers.push(row_to_liked_paper(&row)?);
        }
        Ok(papers)
    }

    /// Append a search and keep only the newest [`HISTORY_LIMIT`] entries.
    /// Unknown users are ignored.
    #[instrument(skip(self, summary))]
    pub async fn add_search_history(
        &self,
        username: &str,
        query: &str,
        summary: &SearchSummary,
    ) -> Result<(), ProfileError> {
        if !self.user_exists(username).await? {
            return Ok(());
        }
        self.conn
            .execute(
                "INSERT INTO search_history (username, query, timestamp, results_count, top_result)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    username,
                    query,
                    Utc::now().to_rfc3339(),
                    summary.results_count as i64,
                    summary.top_title.clone(),
                ],
            )
            .await
            .map_err(|e| ProfileError::Query(format!("Failed to record search: {}", e)))?;

        self.conn
            .execute(
                "DELETE FROM search_history WHERE username = ? AND id NOT IN (
                     SELECT id FROM search_history WHERE username = ? ORDER BY id DESC LIMIT ?
                 )",
                params![username, username, HISTORY_LIMIT as i64],
            )
            .await
            .map_err(|e| ProfileError::Query(format!("Failed to trim search history: {}", e)))?;
        Ok(())
    }

    /// Search history, oldest first
    pub async fn search_history(&self, username: &str) -> Result<Vec<SearchHistoryEntry>, ProfileError> {
        let mut rows = self
            .conn
            .query(
                "SELECT query, timestamp, results_count, top_result
                 FROM search_history WHERE username = ? ORDER BY id",
                params![username],
            )
            .await
            .map_err(|e| ProfileError::Query(format!("Failed to list search history: {}", e)))?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(row_to_history_entry(&row)?);
        }
        Ok(entries)
    }
}

fn timestamp(raw: &str) -> Result<DateTime<Utc>, ProfileError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ProfileError::Data(format!("Bad timestamp {:?}: {}", raw, e)))
}

fn row_to_liked_paper(row: &Row) -> Result<LikedPaper, ProfileError> {
    let liked_at: String = row
        .get(5)
        .map_err(|e| ProfileError::Data(format!("Failed to get liked_at: {}", e)))?;
    Ok(LikedPaper {
        paper_url: row
            .get(0)
            .map_err(|e| ProfileError::Data(format!("Failed to get paper_url: {}", e)))?,
        title: row
            .get(1)
            .map_err(|e| ProfileError::Data(format!("Failed to get title: {}", e)))?,
        abstract_text: row
            .get(2)
            .map_err(|e| ProfileError::Data(format!("Failed to get abstract: {}", e)))?,
        url_pdf: row
            .get(3)
            .map_err(|e| ProfileError::Data(format!("Failed to get url_pdf: {}", e)))?,
        date: row
            .get(4)
            .map_err(|e| ProfileError::Data(format!("Failed to get date: {}", e)))?,
        liked_at: timestamp(&liked_at)?,
    })
}

fn row_to_history_entry(row: &Row) -> Result<SearchHistoryEntry, ProfileError> {
    let raw_time: String = row
        .get(1)
        .map_err(|e| ProfileError::Data(format!("Failed to get timestamp: {}", e)))?;
    let results_count: i64 = row
        .get(2)
        .map_err(|e| ProfileError::Data(format!("Failed to get results_count: {}", e)))?;
    Ok(SearchHistoryEntry {
        query: row
            .get(0)
            .map_err(|e| ProfileError::Data(format!("Failed to get query: {}", e)))?,
        timestamp: timestamp(&raw_time)?,
        results_count: results_count.max(0) as usize,
        top_result: row
            .get(3)
            .map_err(|e| ProfileError::Data(format!("Failed to get top_result: {}", e)))?,
    })
}
