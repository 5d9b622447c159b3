use rusqlite::{Connection, Result};

/// Initialise all graph-store tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    create_users_table(conn)?;
    create_conversations_table(conn)?;
    create_messages_table(conn)?;
    create_topics_table(conn)?;
    create_topic_relations_table(conn)?;
    create_insights_table(conn)?;
    create_link_tables(conn)?;
    create_global_insights_table(conn)?;
    create_processing_log_table(conn)?;
    Ok(())
}

fn create_users_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            consent_global  INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );",
    )
}

fn create_conversations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id                      TEXT PRIMARY KEY,
            user_id                 TEXT NOT NULL REFERENCES users(id),
            summary                 TEXT,
            message_count           INTEGER NOT NULL DEFAULT 0,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL,
            processed               INTEGER NOT NULL DEFAULT 0,
            is_useful               INTEGER,
            usefulness_reason       TEXT,
            global_sharing_blocked  INTEGER NOT NULL DEFAULT 0,
            deleted                 INTEGER NOT NULL DEFAULT 0,
            deleted_at              TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations(user_id, deleted);
        CREATE INDEX IF NOT EXISTS idx_conversations_idle
            ON conversations(processed, updated_at);",
    )
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            role             TEXT NOT NULL,
            content          TEXT NOT NULL,
            created_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, id);",
    )
}

fn create_topics_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS topics (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE,
            description TEXT,
            created_at  TEXT NOT NULL
        );",
    )
}

fn create_topic_relations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS topic_relations (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            source_topic_id  INTEGER NOT NULL REFERENCES topics(id),
            target_topic_id  INTEGER NOT NULL REFERENCES topics(id),
            strength         REAL NOT NULL DEFAULT 0.5,
            relation_type    TEXT NOT NULL DEFAULT 'related',
            UNIQUE(source_topic_id, target_topic_id)
        );",
    )
}

fn create_insights_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS insights (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id   TEXT NOT NULL REFERENCES conversations(id),
            user_id           TEXT NOT NULL,
            content           TEXT NOT NULL,
            importance_score  REAL NOT NULL DEFAULT 0.5,
            vector_ref        TEXT,
            created_at        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_insights_user
            ON insights(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_insights_conversation
            ON insights(conversation_id);",
    )
}

fn create_link_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversation_topics (
            conversation_id  TEXT NOT NULL REFERENCES conversations(id),
            topic_id         INTEGER NOT NULL REFERENCES topics(id),
            PRIMARY KEY (conversation_id, topic_id)
        );
        CREATE TABLE IF NOT EXISTS insight_topics (
            insight_id  INTEGER NOT NULL REFERENCES insights(id),
            topic_id    INTEGER NOT NULL REFERENCES topics(id),
            PRIMARY KEY (insight_id, topic_id)
        );
        CREATE INDEX IF NOT EXISTS idx_conversation_topics_topic
            ON conversation_topics(topic_id);
        CREATE INDEX IF NOT EXISTS idx_insight_topics_topic
            ON insight_topics(topic_id);",
    )
}

fn create_global_insights_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS global_insights (
            id          TEXT PRIMARY KEY,
            content     TEXT NOT NULL,
            topic_ids   TEXT NOT NULL DEFAULT '',
            use_count   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL
        );",
    )
}

fn create_processing_log_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS processing_log (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id    TEXT NOT NULL,
            user_id            TEXT NOT NULL,
            created_at         TEXT NOT NULL,
            is_useful          INTEGER NOT NULL,
            reason             TEXT,
            topics_extracted   TEXT NOT NULL DEFAULT '[]',
            insights_count     INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_processing_log_conversation
            ON processing_log(conversation_id);",
    )
}
