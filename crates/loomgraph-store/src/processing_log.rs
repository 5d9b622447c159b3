use rusqlite::{params, Connection};

use crate::error::Result;
use crate::types::ProcessingLogEntry;

#[allow(clippy::too_many_arguments)]
pub fn append_log(
    conn: &Connection,
    conversation_id: &str,
    user_id: &str,
    is_useful: bool,
    reason: Option<&str>,
    topics_extracted: &[String],
    insights_count: u32,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let topics_json = serde_json::to_string(topics_extracted)?;
    conn.execute(
        "INSERT INTO processing_log
         (conversation_id, user_id, created_at, is_useful, reason, topics_extracted, insights_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![conversation_id, user_id, now, is_useful, reason, topics_json, insights_count],
    )?;
    Ok(())
}

pub fn get_logs(conn: &Connection, limit: usize) -> Result<Vec<ProcessingLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, user_id, created_at, is_useful, reason,
                topics_extracted, insights_count
         FROM processing_log ORDER BY created_at DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], row_to_entry)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn get_log_for_conversation(conn: &Connection, conversation_id: &str) -> Result<Option<ProcessingLogEntry>> {
    Ok(conn
        .query_row(
            "SELECT id, conversation_id, user_id, created_at, is_useful, reason,
                    topics_extracted, insights_count
             FROM processing_log WHERE conversation_id = ?1 ORDER BY created_at DESC LIMIT 1",
            params![conversation_id],
            row_to_entry,
        )
        .ok())
}

pub struct ProcessorStats {
    pub total_processed: usize,
    pub useful_count: usize,
    pub not_useful_count: usize,
}

pub fn get_stats(conn: &Connection) -> Result<ProcessorStats> {
    let total = conn.query_row("SELECT COUNT(*) FROM processing_log", [], |row| row.get::<_, i64>(0))?;
    let useful = conn.query_row(
        "SELECT COUNT(*) FROM processing_log WHERE is_useful = 1",
        [],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(ProcessorStats {
        total_processed: total as usize,
        useful_count: useful as usize,
        not_useful_count: (total - useful) as usize,
    })
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<ProcessingLogEntry> {
    let topics_json: String = row.get(6)?;
    let topics_extracted: Vec<String> = serde_json::from_str(&topics_json).unwrap_or_default();
    Ok(ProcessingLogEntry {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        user_id: row.get(2)?,
        created_at: row.get(3)?,
        is_useful: row.get(4)?,
        reason: row.get(5)?,
        topics_extracted,
        insights_count: row.get(7)?,
    })
}
