use rusqlite::{params, Connection};

use crate::error::Result;
use crate::types::{GlobalConversationSummary, GlobalInsight, Insight, InsightWithTopics};

pub fn save_insight(
    conn: &Connection,
    conversation_id: &str,
    user_id: &str,
    content: &str,
    importance_score: f64,
) -> Result<Insight> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO insights (conversation_id, user_id, content, importance_score, vector_ref, created_at)
         VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
        params![conversation_id, user_id, content, importance_score, now],
    )?;
    let id = conn.last_insert_rowid();
    Ok(Insight {
        id,
        conversation_id: conversation_id.to_string(),
        user_id: user_id.to_string(),
        content: content.to_string(),
        importance_score,
        vector_ref: None,
        created_at: now,
    })
}

pub fn set_insight_vector_ref(conn: &Connection, insight_id: i64, vector_ref: &str) -> Result<()> {
    conn.execute(
        "UPDATE insights SET vector_ref = ?1 WHERE id = ?2",
        params![vector_ref, insight_id],
    )?;
    Ok(())
}

pub fn link_insight_topic(conn: &Connection, insight_id: i64, topic_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO insight_topics (insight_id, topic_id) VALUES (?1, ?2)",
        params![insight_id, topic_id],
    )?;
    Ok(())
}

pub fn link_conversation_topic(conn: &Connection, conversation_id: &str, topic_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO conversation_topics (conversation_id, topic_id) VALUES (?1, ?2)",
        params![conversation_id, topic_id],
    )?;
    Ok(())
}

/// Most recent insights a user owns, newest first (§4.1 item 1).
pub fn get_recent_user_insights(conn: &Connection, user_id: &str, limit: usize) -> Result<Vec<InsightWithTopics>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, user_id, content, importance_score, vector_ref, created_at
         FROM insights WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![user_id, limit as i64], row_to_insight)?;
    let insights: Vec<Insight> = rows.filter_map(|r| r.ok()).collect();
    attach_topics(conn, insights)
}

/// Insights linked to any of `topic_ids` and owned by `user_id`, used as the
/// fallback when the personal pool is empty (§4.1 item 3).
pub fn get_related_insights(
    conn: &Connection,
    user_id: &str,
    topic_ids: &[i64],
    limit: usize,
) -> Result<Vec<InsightWithTopics>> {
    if topic_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = topic_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT DISTINCT i.id, i.conversation_id, i.user_id, i.content, i.importance_score,
                i.vector_ref, i.created_at
         FROM insights i
         JOIN insight_topics it ON it.insight_id = i.id
         WHERE i.user_id = ? AND it.topic_id IN ({placeholders})
         ORDER BY i.created_at DESC
         LIMIT ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id.to_string())];
    for id in topic_ids {
        param_values.push(Box::new(*id));
    }
    param_values.push(Box::new(limit as i64));
    let params_ref: Vec<&dyn rusqlite::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), row_to_insight)?;
    let insights: Vec<Insight> = rows.filter_map(|r| r.ok()).collect();
    attach_topics(conn, insights)
}

/// GlobalInsight rows, excluding the current user's own and any derived
/// from a `globalSharingBlocked` conversation (§3 invariant 5, §4.1 item 2).
///
/// `GlobalInsight.id` is always `global_{conversationId}`, which is used to
/// join back to `conversations` for the ownership/blocked filter.
pub fn get_global_insights(conn: &Connection, excluding_user: &str, limit: usize) -> Result<Vec<GlobalInsight>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.content, g.topic_ids, g.use_count, g.created_at
         FROM global_insights g
         JOIN conversations c ON c.id = substr(g.id, 8)
         WHERE c.user_id != ?1 AND c.global_sharing_blocked = 0 AND c.deleted = 0
         ORDER BY g.created_at DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![excluding_user, limit as i64], row_to_global_insight)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn get_global_conversation_summaries(
    conn: &Connection,
    excluding_user: &str,
    limit: usize,
) -> Result<Vec<GlobalConversationSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, summary, updated_at FROM conversations
         WHERE user_id != ?1 AND global_sharing_blocked = 0 AND deleted = 0
           AND processed = 1 AND is_useful = 1 AND summary IS NOT NULL
         ORDER BY updated_at DESC
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![excluding_user, limit as i64], |row| {
        Ok(GlobalConversationSummary {
            conversation_id: row.get(0)?,
            summary: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            updated_at: row.get(2)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Upsert the GlobalInsight derived from a conversation's summary. Re-running
/// the processor on the same conversation bumps `use_count` instead of
/// duplicating the row — part of the idempotent-processing guarantee (§8).
pub fn upsert_global_insight(
    conn: &Connection,
    conversation_id: &str,
    content: &str,
    topic_ids: &[i64],
) -> Result<()> {
    let id = format!("global_{conversation_id}");
    let topic_ids_str = topic_ids
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let now = chrono::Utc::now().to_rfc3339();
    let existing: Option<i64> = conn
        .query_row(
            "SELECT use_count FROM global_insights WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .ok();
    match existing {
        Some(count) => {
            conn.execute(
                "UPDATE global_insights SET content = ?1, topic_ids = ?2, use_count = ?3 WHERE id = ?4",
                params![content, topic_ids_str, count + 1, id],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO global_insights (id, content, topic_ids, use_count, created_at)
                 VALUES (?1, ?2, ?3, 1, ?4)",
                params![id, content, topic_ids_str, now],
            )?;
        }
    }
    Ok(())
}

/// Delete an insight and its topic links, returning its `vector_ref` (if
/// any) so the caller can also evict it from the vector index.
pub fn delete_insight(conn: &Connection, insight_id: i64) -> Result<Option<String>> {
    let vector_ref: Option<String> = conn
        .query_row(
            "SELECT vector_ref FROM insights WHERE id = ?1",
            params![insight_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .ok()
        .flatten();
    conn.execute("DELETE FROM insight_topics WHERE insight_id = ?1", params![insight_id])?;
    conn.execute("DELETE FROM insights WHERE id = ?1", params![insight_id])?;
    Ok(vector_ref)
}

fn attach_topics(conn: &Connection, insights: Vec<Insight>) -> Result<Vec<InsightWithTopics>> {
    let mut out = Vec::with_capacity(insights.len());
    let mut stmt = conn.prepare(
        "SELECT t.name FROM topics t
         JOIN insight_topics it ON it.topic_id = t.id
         WHERE it.insight_id = ?1",
    )?;
    for insight in insights {
        let topics: Vec<String> = stmt
            .query_map(params![insight.id], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        out.push(InsightWithTopics { insight, topics });
    }
    Ok(out)
}

fn row_to_insight(row: &rusqlite::Row) -> rusqlite::Result<Insight> {
    Ok(Insight {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        user_id: row.get(2)?,
        content: row.get(3)?,
        importance_score: row.get(4)?,
        vector_ref: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn row_to_global_insight(row: &rusqlite::Row) -> rusqlite::Result<GlobalInsight> {
    let topic_ids_str: String = row.get(2)?;
    let topic_ids = topic_ids_str
        .split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    Ok(GlobalInsight {
        id: row.get(0)?,
        content: row.get(1)?,
        topic_ids,
        use_count: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::{add_message, create_conversation, mark_processed, set_global_sharing_blocked};
    use crate::db::init_db;
    use crate::types::MessageRole;
    use crate::users::get_or_create_user;

    fn memdb() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn global_insights_exclude_blocked_conversations() {
        let conn = memdb();
        get_or_create_user(&conn, "u1").unwrap();
        get_or_create_user(&conn, "u2").unwrap();
        create_conversation(&conn, "c1", "u1").unwrap();
        add_message(&conn, "c1", MessageRole::User, "hi").unwrap();
        mark_processed(&conn, "c1", true, None, Some("summary")).unwrap();
        upsert_global_insight(&conn, "c1", "derived insight", &[]).unwrap();

        let before = get_global_insights(&conn, "u2", 10).unwrap();
        assert_eq!(before.len(), 1);

        set_global_sharing_blocked(&conn, "c1", true).unwrap();
        let after = get_global_insights(&conn, "u2", 10).unwrap();
        assert!(after.is_empty());
    }

    #[test]
    fn global_insights_exclude_own_user() {
        let conn = memdb();
        get_or_create_user(&conn, "u1").unwrap();
        create_conversation(&conn, "c1", "u1").unwrap();
        add_message(&conn, "c1", MessageRole::User, "hi").unwrap();
        mark_processed(&conn, "c1", true, None, Some("summary")).unwrap();
        upsert_global_insight(&conn, "c1", "derived insight", &[]).unwrap();

        let own = get_global_insights(&conn, "u1", 10).unwrap();
        assert!(own.is_empty());
    }

    #[test]
    fn delete_insight_removes_row_and_returns_vector_ref() {
        let conn = memdb();
        get_or_create_user(&conn, "u1").unwrap();
        create_conversation(&conn, "c1", "u1").unwrap();
        let insight = save_insight(&conn, "c1", "u1", "likes rust", 0.7).unwrap();
        set_insight_vector_ref(&conn, insight.id, "vec-1").unwrap();

        let removed = delete_insight(&conn, insight.id).unwrap();
        assert_eq!(removed.as_deref(), Some("vec-1"));
        let remaining = get_recent_user_insights(&conn, "u1", 10).unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn upsert_global_insight_bumps_use_count_on_repeat() {
        let conn = memdb();
        get_or_create_user(&conn, "u1").unwrap();
        create_conversation(&conn, "c1", "u1").unwrap();
        upsert_global_insight(&conn, "c1", "v1", &[]).unwrap();
        upsert_global_insight(&conn, "c1", "v2", &[]).unwrap();
        let row = get_global_insights(&conn, "nobody", 10).unwrap();
        assert_eq!(row[0].use_count, 2);
        assert_eq!(row[0].content, "v2");
    }
}
