use rusqlite::{params, Connection};

use loomgraph_core::types::normalize_topic_name;

use crate::error::Result;
use crate::types::Topic;

/// Co-occurrence reinforcement increment applied to an edge's strength
/// each time its two topics are extracted together (§4.2, §8).
const REINFORCEMENT_STEP: f64 = 0.1;
const DEFAULT_STRENGTH: f64 = 0.5;

/// Get-or-create a topic by normalized name. Concurrent callers racing on the
/// same name resolve to one row via `INSERT OR IGNORE` + read-back.
pub fn get_or_create_topic(conn: &Connection, name: &str) -> Result<Topic> {
    let normalized = normalize_topic_name(name);
    if normalized.is_empty() {
        return Err(crate::error::StoreError::InvalidInput(
            "topic name normalizes to empty string".to_string(),
        ));
    }
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO topics (name, description, created_at) VALUES (?1, NULL, ?2)",
        params![normalized, now],
    )?;
    get_topic_by_name(conn, &normalized)?.ok_or_else(|| {
        crate::error::StoreError::InvalidInput(format!("failed to materialize topic {normalized}"))
    })
}

pub fn get_topic_by_name(conn: &Connection, name: &str) -> Result<Option<Topic>> {
    Ok(conn
        .query_row(
            "SELECT id, name, description, created_at FROM topics WHERE name = ?1",
            params![name],
            row_to_topic,
        )
        .ok())
}

pub fn get_topic(conn: &Connection, topic_id: i64) -> Result<Option<Topic>> {
    Ok(conn
        .query_row(
            "SELECT id, name, description, created_at FROM topics WHERE id = ?1",
            params![topic_id],
            row_to_topic,
        )
        .ok())
}

/// Upsert the undirected edge between two topics, reinforcing its strength
/// by `REINFORCEMENT_STEP` on every co-occurrence and clamping to [0,1].
/// Edges are stored directed (source < target by convention) but the graph
/// queries treat them as undirected.
pub fn link_topics(conn: &Connection, topic_a: i64, topic_b: i64) -> Result<()> {
    if topic_a == topic_b {
        return Ok(());
    }
    let (source, target) = if topic_a < topic_b {
        (topic_a, topic_b)
    } else {
        (topic_b, topic_a)
    };

    let existing: Option<f64> = conn
        .query_row(
            "SELECT strength FROM topic_relations WHERE source_topic_id = ?1 AND target_topic_id = ?2",
            params![source, target],
            |row| row.get(0),
        )
        .ok();

    match existing {
        Some(strength) => {
            let new_strength = (strength + REINFORCEMENT_STEP).min(1.0);
            conn.execute(
                "UPDATE topic_relations SET strength = ?1
                 WHERE source_topic_id = ?2 AND target_topic_id = ?3",
                params![new_strength, source, target],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO topic_relations (source_topic_id, target_topic_id, strength, relation_type)
                 VALUES (?1, ?2, ?3, 'related')",
                params![source, target, DEFAULT_STRENGTH],
            )?;
        }
    }
    Ok(())
}

/// Variant of [`link_topics`] backing the manual `/api/graph/link-topics`
/// endpoint: an explicit `strength` sets the edge to that value outright
/// instead of reinforcing it, since a human curating the graph by hand means
/// something different than two topics co-occurring in a conversation.
pub fn link_topics_with_strength(conn: &Connection, topic_a: i64, topic_b: i64, strength: Option<f64>) -> Result<()> {
    let Some(strength) = strength else {
        return link_topics(conn, topic_a, topic_b);
    };
    if topic_a == topic_b {
        return Ok(());
    }
    let (source, target) = if topic_a < topic_b {
        (topic_a, topic_b)
    } else {
        (topic_b, topic_a)
    };
    let clamped = strength.clamp(0.0, 1.0);
    conn.execute(
        "INSERT INTO topic_relations (source_topic_id, target_topic_id, strength, relation_type)
         VALUES (?1, ?2, ?3, 'related')
         ON CONFLICT(source_topic_id, target_topic_id) DO UPDATE SET strength = excluded.strength",
        params![source, target, clamped],
    )?;
    Ok(())
}

/// All topics a user has engaged with, via any conversation they own.
pub fn get_all_user_topics(conn: &Connection, user_id: &str) -> Result<Vec<Topic>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT t.id, t.name, t.description, t.created_at
         FROM topics t
         JOIN conversation_topics ct ON ct.topic_id = t.id
         JOIN conversations c ON c.id = ct.conversation_id
         WHERE c.user_id = ?1 AND c.deleted = 0
         ORDER BY t.name",
    )?;
    let rows = stmt.query_map(params![user_id], row_to_topic)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Topics related to `current_topics` by an edge, ranked by strength,
/// excluding the input topics themselves. Used for `/api/graph/suggestions`.
pub fn get_suggested_topics(
    conn: &Connection,
    current_topic_ids: &[i64],
    limit: usize,
) -> Result<Vec<Topic>> {
    if current_topic_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = current_topic_ids
        .iter()
        .map(|_| "?")
        .collect::<Vec<_>>()
        .join(",");
    let sql = format!(
        "SELECT DISTINCT t.id, t.name, t.description, t.created_at
         FROM topic_relations r
         JOIN topics t ON t.id = CASE
             WHEN r.source_topic_id IN ({placeholders}) THEN r.target_topic_id
             ELSE r.source_topic_id
         END
         WHERE (r.source_topic_id IN ({placeholders}) OR r.target_topic_id IN ({placeholders}))
           AND t.id NOT IN ({placeholders})
         ORDER BY r.strength DESC
         LIMIT ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for _ in 0..4 {
        for id in current_topic_ids {
            param_values.push(Box::new(*id));
        }
    }
    param_values.push(Box::new(limit as i64));
    let params_ref: Vec<&dyn rusqlite::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), row_to_topic)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn row_to_topic(row: &rusqlite::Row) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn memdb() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn get_or_create_resolves_to_same_row_for_equivalent_names() {
        let conn = memdb();
        let a = get_or_create_topic(&conn, "  TLS Handshake ").unwrap();
        let b = get_or_create_topic(&conn, "tls-handshake").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.name, "tls-handshake");
    }

    #[test]
    fn link_topics_reinforces_and_clamps() {
        let conn = memdb();
        let a = get_or_create_topic(&conn, "rust").unwrap();
        let b = get_or_create_topic(&conn, "async").unwrap();
        for _ in 0..20 {
            link_topics(&conn, a.id, b.id).unwrap();
        }
        let strength: f64 = conn
            .query_row(
                "SELECT strength FROM topic_relations WHERE source_topic_id = ?1 AND target_topic_id = ?2",
                params![a.id.min(b.id), a.id.max(b.id)],
                |row| row.get(0),
            )
            .unwrap();
        assert!((strength - 1.0).abs() < 1e-9);
    }

    #[test]
    fn link_topics_with_strength_sets_exact_value_and_skips_reinforcement() {
        let conn = memdb();
        let a = get_or_create_topic(&conn, "rust").unwrap();
        let b = get_or_create_topic(&conn, "async").unwrap();
        link_topics_with_strength(&conn, a.id, b.id, Some(0.9)).unwrap();
        link_topics_with_strength(&conn, a.id, b.id, Some(0.3)).unwrap();
        let strength: f64 = conn
            .query_row(
                "SELECT strength FROM topic_relations WHERE source_topic_id = ?1 AND target_topic_id = ?2",
                params![a.id.min(b.id), a.id.max(b.id)],
                |row| row.get(0),
            )
            .unwrap();
        assert!((strength - 0.3).abs() < 1e-9);
    }

    #[test]
    fn link_topics_is_order_independent() {
        let conn = memdb();
        let a = get_or_create_topic(&conn, "graphs").unwrap();
        let b = get_or_create_topic(&conn, "queues").unwrap();
        link_topics(&conn, a.id, b.id).unwrap();
        link_topics(&conn, b.id, a.id).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM topic_relations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
