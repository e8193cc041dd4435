use rusqlite::{Connection, Result};

/// Initialise knowledge and history tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_knowledge_chunks_table(conn)?;
    create_knowledge_fts_index(conn)?;
    create_conversations_table(conn)?;
    Ok(())
}

/// One row per chunk of a loaded document. `collection` groups the chunks of
/// one knowledge base so a reload can replace them wholesale.
fn create_knowledge_chunks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS knowledge_chunks (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            collection  TEXT NOT NULL,
            source      TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(collection, chunk_index)
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_collection
            ON knowledge_chunks(collection);",
    )
}

/// External-content FTS5 index over chunk text, synced manually on write.
fn create_knowledge_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_chunks_fts
            USING fts5(content, content='knowledge_chunks', content_rowid='id');",
    )
}

fn create_conversations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            session_key TEXT NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            model_used  TEXT,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conv_session
            ON conversations(session_key, id);",
    )
}
