use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};
use crate::types::{Conversation, DueConversation, Message, MessageRole};

pub fn create_conversation(conn: &Connection, conversation_id: &str, user_id: &str) -> Result<Conversation> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO conversations
         (id, user_id, summary, message_count, created_at, updated_at,
          processed, is_useful, usefulness_reason, global_sharing_blocked, deleted, deleted_at)
         VALUES (?1, ?2, NULL, 0, ?3, ?3, 0, NULL, NULL, 0, 0, NULL)",
        params![conversation_id, user_id, now],
    )?;
    get_conversation(conn, conversation_id)?.ok_or_else(|| StoreError::ConversationNotFound {
        id: conversation_id.to_string(),
    })
}

pub fn get_conversation(conn: &Connection, conversation_id: &str) -> Result<Option<Conversation>> {
    Ok(conn
        .query_row(
            "SELECT id, user_id, summary, message_count, created_at, updated_at,
                    processed, is_useful, usefulness_reason, global_sharing_blocked,
                    deleted, deleted_at
             FROM conversations WHERE id = ?1",
            params![conversation_id],
            row_to_conversation,
        )
        .ok())
}

/// Append a message and bump the conversation's activity timestamp.
///
/// `updated_at` is touched *only* here — the deferred processor's own writes
/// (topic links, edges, insights, verdict fields) never bump it, so idle
/// selection reflects true user inactivity rather than background work.
pub fn add_message(
    conn: &Connection,
    conversation_id: &str,
    role: MessageRole,
    content: &str,
) -> Result<Message> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO messages (conversation_id, role, content, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![conversation_id, role.as_str(), content, now],
    )?;
    let id = conn.last_insert_rowid();
    conn.execute(
        "UPDATE conversations SET message_count = message_count + 1, updated_at = ?1
         WHERE id = ?2",
        params![now, conversation_id],
    )?;
    Ok(Message {
        id,
        conversation_id: conversation_id.to_string(),
        role,
        content: content.to_string(),
        created_at: now,
    })
}

pub fn get_messages(conn: &Connection, conversation_id: &str) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, role, content, created_at
         FROM messages WHERE conversation_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![conversation_id], row_to_message)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn set_global_sharing_blocked(conn: &Connection, conversation_id: &str, blocked: bool) -> Result<()> {
    conn.execute(
        "UPDATE conversations SET global_sharing_blocked = ?1 WHERE id = ?2",
        params![blocked, conversation_id],
    )?;
    Ok(())
}

pub fn is_global_sharing_blocked(conn: &Connection, conversation_id: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT global_sharing_blocked FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| row.get::<_, bool>(0),
        )
        .unwrap_or(false))
}

/// Conversations owned by `user_id`, most recently active first, excluding
/// soft-deleted rows.
pub fn list_user_conversations(conn: &Connection, user_id: &str, limit: usize) -> Result<Vec<Conversation>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, summary, message_count, created_at, updated_at,
                processed, is_useful, usefulness_reason, global_sharing_blocked,
                deleted, deleted_at
         FROM conversations
         WHERE user_id = ?1 AND deleted = 0
         ORDER BY updated_at DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![user_id, limit as i64], row_to_conversation)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Idle-selection query (§4.2): conversations ready for the deferred
/// processor, oldest-activity-first, bounded to `limit` rows per tick.
pub fn get_due_conversations(
    conn: &Connection,
    idle_threshold_secs: i64,
    limit: usize,
) -> Result<Vec<DueConversation>> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(idle_threshold_secs)).to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT id, user_id FROM conversations
         WHERE processed = 0 AND message_count > 0 AND updated_at < ?1 AND deleted = 0
         ORDER BY updated_at ASC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![cutoff, limit as i64], |row| {
        Ok(DueConversation {
            id: row.get(0)?,
            user_id: row.get(1)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Stamp the processor's verdict without touching `updated_at`.
pub fn mark_processed(
    conn: &Connection,
    conversation_id: &str,
    is_useful: bool,
    reason: Option<&str>,
    summary: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE conversations
         SET processed = 1, is_useful = ?1, usefulness_reason = ?2, summary = COALESCE(?3, summary)
         WHERE id = ?4",
        params![is_useful, reason, summary, conversation_id],
    )?;
    Ok(())
}

/// Soft-delete contract (§4.3): verify ownership, anonymize owned insights,
/// drop the user's topic links, mark deleted. Messages and GlobalInsight
/// rows are left untouched so global derivatives survive.
pub fn delete_conversation_from_user_graph(
    conn: &Connection,
    conversation_id: &str,
    user_id: &str,
) -> Result<()> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT user_id FROM conversations WHERE id = ?1 AND deleted = 0",
            params![conversation_id],
            |row| row.get(0),
        )
        .ok();
    match owner {
        None => {
            return Err(StoreError::ConversationNotFound {
                id: conversation_id.to_string(),
            })
        }
        Some(owner) if owner != user_id => {
            return Err(StoreError::NotOwner {
                id: conversation_id.to_string(),
                user_id: user_id.to_string(),
            })
        }
        _ => {}
    }

    conn.execute(
        "UPDATE insights SET user_id = 'anonymous' WHERE conversation_id = ?1",
        params![conversation_id],
    )?;
    conn.execute(
        "DELETE FROM conversation_topics WHERE conversation_id = ?1",
        params![conversation_id],
    )?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE conversations SET deleted = 1, deleted_at = ?1 WHERE id = ?2",
        params![now, conversation_id],
    )?;
    Ok(())
}

fn row_to_conversation(row: &rusqlite::Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        summary: row.get(2)?,
        message_count: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        processed: row.get(6)?,
        is_useful: row.get(7)?,
        usefulness_reason: row.get(8)?,
        global_sharing_blocked: row.get(9)?,
        deleted: row.get(10)?,
        deleted_at: row.get(11)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let role_str: String = row.get(2)?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: role_str.parse().unwrap_or(MessageRole::User),
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::users::get_or_create_user;

    fn memdb() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn message_count_tracks_inserts() {
        let conn = memdb();
        get_or_create_user(&conn, "u1").unwrap();
        create_conversation(&conn, "c1", "u1").unwrap();
        add_message(&conn, "c1", MessageRole::User, "hi").unwrap();
        add_message(&conn, "c1", MessageRole::Assistant, "hello").unwrap();
        let conv = get_conversation(&conn, "c1").unwrap().unwrap();
        assert_eq!(conv.message_count, 2);
    }

    #[test]
    fn messages_return_in_insertion_order() {
        let conn = memdb();
        get_or_create_user(&conn, "u1").unwrap();
        create_conversation(&conn, "c1", "u1").unwrap();
        add_message(&conn, "c1", MessageRole::User, "first").unwrap();
        add_message(&conn, "c1", MessageRole::Assistant, "second").unwrap();
        let msgs = get_messages(&conn, "c1").unwrap();
        assert_eq!(msgs[0].content, "first");
        assert_eq!(msgs[1].content, "second");
    }

    #[test]
    fn mark_processed_does_not_touch_updated_at() {
        let conn = memdb();
        get_or_create_user(&conn, "u1").unwrap();
        create_conversation(&conn, "c1", "u1").unwrap();
        add_message(&conn, "c1", MessageRole::User, "hi").unwrap();
        let before = get_conversation(&conn, "c1").unwrap().unwrap().updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        mark_processed(&conn, "c1", true, Some("ok"), Some("summary")).unwrap();
        let after = get_conversation(&conn, "c1").unwrap().unwrap();
        assert_eq!(after.updated_at, before);
        assert_eq!(after.is_useful, Some(true));
        assert_eq!(after.summary.as_deref(), Some("summary"));
    }

    #[test]
    fn soft_delete_requires_ownership() {
        let conn = memdb();
        get_or_create_user(&conn, "u1").unwrap();
        get_or_create_user(&conn, "u2").unwrap();
        create_conversation(&conn, "c1", "u1").unwrap();
        let err = delete_conversation_from_user_graph(&conn, "c1", "u2").unwrap_err();
        assert_eq!(err.code(), "NOT_OWNER");
    }

    #[test]
    fn soft_delete_anonymizes_insights_and_hides_conversation() {
        let conn = memdb();
        get_or_create_user(&conn, "u1").unwrap();
        create_conversation(&conn, "c1", "u1").unwrap();
        conn.execute(
            "INSERT INTO insights (conversation_id, user_id, content, importance_score, created_at)
             VALUES ('c1', 'u1', 'x', 0.7, '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        delete_conversation_from_user_graph(&conn, "c1", "u1").unwrap();
        let owner: String = conn
            .query_row("SELECT user_id FROM insights WHERE conversation_id = 'c1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(owner, "anonymous");
        assert!(list_user_conversations(&conn, "u1", 10).unwrap().is_empty());
    }
}
