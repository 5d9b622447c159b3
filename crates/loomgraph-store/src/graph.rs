use rusqlite::{params, Connection};

use crate::error::Result;
use crate::types::{
    GlobalKnowledgeMap, GraphEdge, GraphNode, GraphSection, GraphStats, Topic, TopicRelation, UserKnowledgeMap,
};
use crate::{conversations, insights};

/// Insights and conversations folded into a knowledge-map response are
/// capped here rather than left unbounded — the map is a dashboard view,
/// not a full export.
const MAP_INSIGHTS_LIMIT: usize = 100;
const MAP_CONVERSATIONS_LIMIT: usize = 100;

/// Topic nodes with frequency = number of distinct conversations referencing
/// them, optionally scoped to a single user. `normalizedFrequency` is
/// `frequency / max(frequency)` over the returned set (§4.3).
pub fn get_graph_nodes(conn: &Connection, user_id: Option<&str>) -> Result<Vec<GraphNode>> {
    let mut nodes: Vec<GraphNode> = match user_id {
        Some(uid) => {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, COUNT(DISTINCT ct.conversation_id) AS freq
                 FROM topics t
                 JOIN conversation_topics ct ON ct.topic_id = t.id
                 JOIN conversations c ON c.id = ct.conversation_id
                 WHERE c.user_id = ?1 AND c.deleted = 0
                 GROUP BY t.id, t.name",
            )?;
            let rows = stmt.query_map(params![uid], row_to_node)?;
            rows.filter_map(|r| r.ok()).collect()
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, COUNT(DISTINCT ct.conversation_id) AS freq
                 FROM topics t
                 JOIN conversation_topics ct ON ct.topic_id = t.id
                 JOIN conversations c ON c.id = ct.conversation_id
                 WHERE c.deleted = 0
                 GROUP BY t.id, t.name",
            )?;
            let rows = stmt.query_map([], row_to_node)?;
            rows.filter_map(|r| r.ok()).collect()
        }
    };

    let max_freq = nodes.iter().map(|n| n.frequency).max().unwrap_or(0).max(1);
    for node in &mut nodes {
        node.normalized_frequency = node.frequency as f64 / max_freq as f64;
    }
    Ok(nodes)
}

/// Edges whose both endpoints are present in `node_ids` — dangling edges are
/// dropped so every edge in a response is drawable (§8 testable property).
pub fn get_graph_edges(conn: &Connection, node_ids: &[i64]) -> Result<Vec<GraphEdge>> {
    if node_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = node_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT source_topic_id, target_topic_id, strength, relation_type
         FROM topic_relations
         WHERE source_topic_id IN ({placeholders}) AND target_topic_id IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for _ in 0..2 {
        for id in node_ids {
            param_values.push(Box::new(*id));
        }
    }
    let params_ref: Vec<&dyn rusqlite::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), |row| {
        Ok(GraphEdge {
            source: row.get(0)?,
            target: row.get(1)?,
            strength: row.get(2)?,
            relation_type: row.get(3)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn get_graph_stats(conn: &Connection, user_id: Option<&str>) -> Result<GraphStats> {
    let nodes = get_graph_nodes(conn, user_id)?;
    let node_ids: Vec<i64> = nodes.iter().map(|n| n.topic_id).collect();
    let edges = get_graph_edges(conn, &node_ids)?;

    let (insight_count, conversation_count): (usize, usize) = match user_id {
        Some(uid) => (
            conn.query_row(
                "SELECT COUNT(*) FROM insights WHERE user_id = ?1",
                params![uid],
                |row| row.get::<_, i64>(0),
            )? as usize,
            conn.query_row(
                "SELECT COUNT(*) FROM conversations WHERE user_id = ?1 AND deleted = 0",
                params![uid],
                |row| row.get::<_, i64>(0),
            )? as usize,
        ),
        None => (
            conn.query_row("SELECT COUNT(*) FROM insights", [], |row| row.get::<_, i64>(0))? as usize,
            conn.query_row("SELECT COUNT(*) FROM conversations WHERE deleted = 0", [], |row| {
                row.get::<_, i64>(0)
            })? as usize,
        ),
    };

    Ok(GraphStats {
        topic_count: nodes.len(),
        edge_count: edges.len(),
        insight_count,
        conversation_count,
    })
}

fn row_to_node(row: &rusqlite::Row) -> rusqlite::Result<GraphNode> {
    Ok(GraphNode {
        topic_id: row.get(0)?,
        name: row.get(1)?,
        frequency: row.get(2)?,
        normalized_frequency: 0.0,
    })
}

/// Full topic rows for a node set, used by the knowledge-map aggregate —
/// `get_graph_nodes` only carries the frequency projection, not `description`.
pub fn get_topics_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<Topic>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!("SELECT id, name, description, created_at FROM topics WHERE id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::ToSql> = ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
    let rows = stmt.query_map(params_ref.as_slice(), |row| {
        Ok(Topic {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            created_at: row.get(3)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Full relation rows (with `id`) for a node set — the `relations` field of
/// the knowledge-map aggregate, as opposed to `get_graph_edges`'s id-less
/// drawing projection.
pub fn get_topic_relations(conn: &Connection, node_ids: &[i64]) -> Result<Vec<TopicRelation>> {
    if node_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = node_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT id, source_topic_id, target_topic_id, strength, relation_type
         FROM topic_relations
         WHERE source_topic_id IN ({placeholders}) AND target_topic_id IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for _ in 0..2 {
        for id in node_ids {
            param_values.push(Box::new(*id));
        }
    }
    let params_ref: Vec<&dyn rusqlite::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), |row| {
        Ok(TopicRelation {
            id: row.get(0)?,
            source_topic_id: row.get(1)?,
            target_topic_id: row.get(2)?,
            strength: row.get(3)?,
            relation_type: row.get(4)?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Combined view behind `/api/graph/user/:userId/map` and `.../full` (§4.3,
/// §6): everything needed to render one user's slice of the graph in a
/// single round trip.
pub fn get_user_knowledge_map(conn: &Connection, user_id: &str) -> Result<UserKnowledgeMap> {
    let nodes = get_graph_nodes(conn, Some(user_id))?;
    let node_ids: Vec<i64> = nodes.iter().map(|n| n.topic_id).collect();
    let edges = get_graph_edges(conn, &node_ids)?;
    let stats = get_graph_stats(conn, Some(user_id))?;
    let topics = get_topics_by_ids(conn, &node_ids)?;
    let relations = get_topic_relations(conn, &node_ids)?;
    let insight_list = insights::get_recent_user_insights(conn, user_id, MAP_INSIGHTS_LIMIT)?;
    let conversation_list = conversations::list_user_conversations(conn, user_id, MAP_CONVERSATIONS_LIMIT)?;

    Ok(UserKnowledgeMap {
        stats,
        graph: GraphSection { nodes, edges },
        topics,
        relations,
        insights: insight_list,
        conversations: conversation_list,
    })
}

/// Combined view behind `/api/graph/global` (§6), excluding `user_id`'s own
/// contributions and anything flagged `globalSharingBlocked` the same way
/// the individual global queries already do.
pub fn get_global_knowledge_map(conn: &Connection, user_id: &str) -> Result<GlobalKnowledgeMap> {
    let nodes = get_graph_nodes(conn, None)?;
    let node_ids: Vec<i64> = nodes.iter().map(|n| n.topic_id).collect();
    let edges = get_graph_edges(conn, &node_ids)?;
    let stats = get_graph_stats(conn, None)?;
    let topics = get_topics_by_ids(conn, &node_ids)?;
    let relations = get_topic_relations(conn, &node_ids)?;
    let insight_list = insights::get_global_insights(conn, user_id, MAP_INSIGHTS_LIMIT)?;
    let conversation_list = insights::get_global_conversation_summaries(conn, user_id, MAP_CONVERSATIONS_LIMIT)?;

    Ok(GlobalKnowledgeMap {
        stats,
        graph: GraphSection { nodes, edges },
        topics,
        relations,
        insights: insight_list,
        conversations: conversation_list,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::create_conversation;
    use crate::db::init_db;
    use crate::insights::link_conversation_topic;
    use crate::topics::{get_or_create_topic, link_topics};
    use crate::users::get_or_create_user;

    fn memdb() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn
    }

    #[test]
    fn edges_exclude_dangling_endpoints() {
        let conn = memdb();
        let a = get_or_create_topic(&conn, "a").unwrap();
        let b = get_or_create_topic(&conn, "b").unwrap();
        link_topics(&conn, a.id, b.id).unwrap();
        // node set excludes `b` — edge referencing it must not appear
        let edges = get_graph_edges(&conn, &[a.id]).unwrap();
        assert!(edges.is_empty());
        let edges = get_graph_edges(&conn, &[a.id, b.id]).unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn user_knowledge_map_aggregates_all_sections() {
        let conn = memdb();
        get_or_create_user(&conn, "u1").unwrap();
        let a = get_or_create_topic(&conn, "rust").unwrap();
        let b = get_or_create_topic(&conn, "async").unwrap();
        link_topics(&conn, a.id, b.id).unwrap();
        create_conversation(&conn, "c1", "u1").unwrap();
        link_conversation_topic(&conn, "c1", a.id).unwrap();
        link_conversation_topic(&conn, "c1", b.id).unwrap();
        crate::insights::save_insight(&conn, "c1", "u1", "likes rust", 0.7).unwrap();

        let map = get_user_knowledge_map(&conn, "u1").unwrap();
        assert_eq!(map.graph.nodes.len(), 2);
        assert_eq!(map.graph.edges.len(), 1);
        assert_eq!(map.topics.len(), 2);
        assert_eq!(map.relations.len(), 1);
        assert_eq!(map.insights.len(), 1);
        assert_eq!(map.conversations.len(), 1);
        assert_eq!(map.stats.topic_count, 2);
    }

    #[test]
    fn normalized_frequency_peaks_at_one() {
        let conn = memdb();
        get_or_create_user(&conn, "u1").unwrap();
        let t1 = get_or_create_topic(&conn, "popular").unwrap();
        let t2 = get_or_create_topic(&conn, "rare").unwrap();
        create_conversation(&conn, "c1", "u1").unwrap();
        create_conversation(&conn, "c2", "u1").unwrap();
        link_conversation_topic(&conn, "c1", t1.id).unwrap();
        link_conversation_topic(&conn, "c2", t1.id).unwrap();
        link_conversation_topic(&conn, "c1", t2.id).unwrap();

        let nodes = get_graph_nodes(&conn, None).unwrap();
        let popular = nodes.iter().find(|n| n.name == "popular").unwrap();
        let rare = nodes.iter().find(|n| n.name == "rare").unwrap();
        assert_eq!(popular.normalized_frequency, 1.0);
        assert!(rare.normalized_frequency < 1.0);
    }
}
