use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::chunk::split_into_chunks;
use crate::error::MemoryError;
use crate::types::*;

/// Upper bound on terms passed to a single FTS5 MATCH.
const MAX_QUERY_TERMS: usize = 32;

/// Knowledge index and per-session conversation history in one SQLite file.
///
/// Thread-safe: the connection sits behind a Mutex. Every call is a short
/// synchronous query, so callers on the async runtime use it directly.
pub struct MemoryManager {
    db: Mutex<Connection>,
}

impl MemoryManager {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Open an in-memory database with the schema applied (tests, dry runs).
    pub fn in_memory() -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory()?;
        crate::db::init_db(&conn)?;
        Ok(Self::new(conn))
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-query leaves SQLite itself consistent; keep serving.
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -------------------------------------------------------------------------
    // Knowledge
    // -------------------------------------------------------------------------

    /// Read a UTF-8 document, chunk it and replace `collection` with the result.
    /// Returns the number of chunks stored.
    pub fn load_document(
        &self,
        path: &Path,
        collection: &str,
        chunk_chars: usize,
    ) -> Result<usize, MemoryError> {
        let display_path = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| MemoryError::Document {
            path: display_path.clone(),
            source,
        })?;
        let chunks = split_into_chunks(&text, chunk_chars);
        if chunks.is_empty() {
            return Err(MemoryError::EmptyDocument { path: display_path });
        }
        let stored = self.replace_collection(collection, &display_path, &chunks)?;
        info!(collection, source = %display_path, chunks = stored, "knowledge document loaded");
        Ok(stored)
    }

    /// Atomically swap every chunk of `collection` for `chunks`.
    /// Keeps the FTS5 index in sync.
    pub fn replace_collection(
        &self,
        collection: &str,
        source: &str,
        chunks: &[String],
    ) -> Result<usize, MemoryError> {
        let mut db = self.conn();
        let tx = db.transaction()?;
        let now = chrono::Utc::now().to_rfc3339();

        {
            let mut existing = tx.prepare(
                "SELECT id, content FROM knowledge_chunks WHERE collection = ?1",
            )?;
            let old: Vec<(i64, String)> = existing
                .query_map(rusqlite::params![collection], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .filter_map(|r| r.ok())
                .collect();
            for (id, content) in &old {
                tx.execute(
                    "INSERT INTO knowledge_chunks_fts(knowledge_chunks_fts, rowid, content)
                     VALUES('delete', ?1, ?2)",
                    rusqlite::params![id, content],
                )?;
            }
            if !old.is_empty() {
                debug!(collection, removed = old.len(), "replacing knowledge chunks");
            }
        }
        tx.execute(
            "DELETE FROM knowledge_chunks WHERE collection = ?1",
            rusqlite::params![collection],
        )?;

        for (index, content) in chunks.iter().enumerate() {
            tx.execute(
                "INSERT INTO knowledge_chunks (collection, source, chunk_index, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![collection, source, index as i64, content, now],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO knowledge_chunks_fts(rowid, content) VALUES(?1, ?2)",
                rusqlite::params![id, content],
            )?;
        }

        tx.commit()?;
        Ok(chunks.len())
    }

    /// Number of chunks currently stored for `collection`.
    pub fn chunk_count(&self, collection: &str) -> Result<usize, MemoryError> {
        let db = self.conn();
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM knowledge_chunks WHERE collection = ?1",
            rusqlite::params![collection],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// Full-text search over one collection, best match first.
    ///
    /// Free text is reduced to an OR of quoted terms so user punctuation never
    /// reaches the FTS5 query parser. A query with no usable terms returns
    /// nothing.
    pub fn knowledge_search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeChunk>, MemoryError> {
        let Some(fts_query) = build_fts_query(query) else {
            return Ok(Vec::new());
        };
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT c.id, c.collection, c.source, c.chunk_index, c.content
             FROM knowledge_chunks_fts f
             JOIN knowledge_chunks c ON c.id = f.rowid
             WHERE knowledge_chunks_fts MATCH ?1 AND c.collection = ?2
             ORDER BY rank
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![fts_query, collection, limit as i64],
            |row| {
                Ok(KnowledgeChunk {
                    id: row.get(0)?,
                    collection: row.get(1)?,
                    source: row.get(2)?,
                    chunk_index: row.get(3)?,
                    content: row.get(4)?,
                })
            },
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // -------------------------------------------------------------------------
    // Conversation history
    // -------------------------------------------------------------------------

    /// Append one message to a session's history.
    pub fn save_message(
        &self,
        session_key: &str,
        role: &str,
        content: &str,
        model_used: Option<&str>,
    ) -> Result<(), MemoryError> {
        let db = self.conn();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO conversations (session_key, role, content, model_used, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![session_key, role, content, model_used, now],
        )?;
        Ok(())
    }

    /// The most recent `limit` messages of a session, oldest first.
    pub fn get_history(
        &self,
        session_key: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, MemoryError> {
        let db = self.conn();
        let mut stmt = db.prepare(
            "SELECT id, session_key, role, content, model_used, created_at
             FROM conversations
             WHERE session_key = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_key, limit as i64], |row| {
            Ok(ConversationMessage {
                id: row.get(0)?,
                session_key: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                model_used: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        // Reverse so oldest first
        let mut msgs: Vec<_> = rows.filter_map(|r| r.ok()).collect();
        msgs.reverse();
        Ok(msgs)
    }
}

/// Turn free text into `"term1" OR "term2" ...`; `None` when nothing is left.
fn build_fts_query(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.chars().count() < 2 {
            continue;
        }
        let term = raw.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
        if terms.len() == MAX_QUERY_TERMS {
            break;
        }
    }
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_chunks() -> Vec<String> {
        vec![
            "An Importer Exporter Code (IEC) from DGFT is mandatory for every exporter.".to_string(),
            "RCMC registration is obtained from the relevant Export Promotion Council.".to_string(),
            "Shipping bills are filed electronically on ICEGATE before goods leave port.".to_string(),
        ]
    }

    #[test]
    fn fts_query_quotes_and_dedups_terms() {
        assert_eq!(
            build_fts_query("How do I get an IEC? iec!").as_deref(),
            Some("\"how\" OR \"do\" OR \"get\" OR \"an\" OR \"iec\"")
        );
        assert_eq!(build_fts_query("? ! -"), None);
    }

    #[test]
    fn search_finds_matching_chunk() {
        let mem = MemoryManager::in_memory().unwrap();
        mem.replace_collection("MSME_INFO", "kb.md", &sample_chunks())
            .unwrap();

        let hits = mem
            .knowledge_search("MSME_INFO", "What is RCMC registration?", 5)
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].content.contains("RCMC"));
        assert_eq!(hits[0].source, "kb.md");
    }

    #[test]
    fn search_is_scoped_to_collection() {
        let mem = MemoryManager::in_memory().unwrap();
        mem.replace_collection("A", "a.md", &sample_chunks()).unwrap();
        let hits = mem.knowledge_search("B", "IEC exporter", 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn replace_collection_drops_previous_chunks() {
        let mem = MemoryManager::in_memory().unwrap();
        mem.replace_collection("MSME_INFO", "old.md", &sample_chunks())
            .unwrap();
        mem.replace_collection(
            "MSME_INFO",
            "new.md",
            &["Letters of credit protect the exporter.".to_string()],
        )
        .unwrap();

        assert_eq!(mem.chunk_count("MSME_INFO").unwrap(), 1);
        assert!(mem
            .knowledge_search("MSME_INFO", "ICEGATE shipping", 5)
            .unwrap()
            .is_empty());
        let hits = mem.knowledge_search("MSME_INFO", "credit", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "new.md");
    }

    #[test]
    fn load_document_chunks_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Incoterms define delivery responsibilities.\n").unwrap();
        writeln!(file, "FOB means the seller loads goods on board.").unwrap();

        let mem = MemoryManager::in_memory().unwrap();
        let n = mem.load_document(file.path(), "MSME_INFO", 1200).unwrap();
        assert_eq!(n, 1);
        assert_eq!(mem.chunk_count("MSME_INFO").unwrap(), 1);
    }

    #[test]
    fn load_document_rejects_missing_and_empty_files() {
        let mem = MemoryManager::in_memory().unwrap();
        let missing = mem.load_document(Path::new("/nonexistent/kb.md"), "X", 100);
        assert!(matches!(missing, Err(MemoryError::Document { .. })));

        let empty = tempfile::NamedTempFile::new().unwrap();
        let result = mem.load_document(empty.path(), "X", 100);
        assert!(matches!(result, Err(MemoryError::EmptyDocument { .. })));
    }

    #[test]
    fn history_is_returned_oldest_first_and_limited() {
        let mem = MemoryManager::in_memory().unwrap();
        mem.save_message("911234567890", "user", "q1", None).unwrap();
        mem.save_message("911234567890", "assistant", "a1", Some("gpt-4o"))
            .unwrap();
        mem.save_message("911234567890", "user", "q2", None).unwrap();
        mem.save_message("other", "user", "unrelated", None).unwrap();

        let history = mem.get_history("911234567890", 2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "a1");
        assert_eq!(history[0].model_used.as_deref(), Some("gpt-4o"));
        assert_eq!(history[1].content, "q2");
    }
}
