use rusqlite::{params, Connection};

use crate::error::Result;
use crate::types::User;

/// Idempotent get-or-create: races resolve to the same row via `INSERT OR IGNORE`
/// followed by a read-back, matching the store's other get-or-create operations.
pub fn get_or_create_user(conn: &Connection, user_id: &str) -> Result<User> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR IGNORE INTO users (id, consent_global, created_at) VALUES (?1, 0, ?2)",
        params![user_id, now],
    )?;
    get_user(conn, user_id)?.ok_or_else(|| {
        crate::error::StoreError::UserNotFound {
            id: user_id.to_string(),
        }
    })
}

pub fn get_user(conn: &Connection, user_id: &str) -> Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT id, consent_global, created_at FROM users WHERE id = ?1",
            params![user_id],
            row_to_user,
        )
        .ok();
    Ok(row)
}

pub fn set_consent_global(conn: &Connection, user_id: &str, consent: bool) -> Result<()> {
    conn.execute(
        "UPDATE users SET consent_global = ?1 WHERE id = ?2",
        params![consent, user_id],
    )?;
    Ok(())
}

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        consent_global: row.get(1)?,
        created_at: row.get(2)?,
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
    fn get_or_create_is_idempotent() {
        let conn = memdb();
        let a = get_or_create_user(&conn, "u1").unwrap();
        let b = get_or_create_user(&conn, "u1").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.created_at, b.created_at);
    }

    #[test]
    fn consent_defaults_false() {
        let conn = memdb();
        let u = get_or_create_user(&conn, "u2").unwrap();
        assert!(!u.consent_global);
        set_consent_global(&conn, "u2", true).unwrap();
        let u = get_user(&conn, "u2").unwrap().unwrap();
        assert!(u.consent_global);
    }
}
