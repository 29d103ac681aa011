//! Persistence for kiosks, sessions and check-ins
//!
//! Every function takes a plain connection so callers decide the
//! transaction boundary: multi-step transitions pass `&mut *tx`, single
//! statements pass a pooled connection.

use rollcall_core::Result;
use sqlx::SqliteConnection;

use crate::checkin::CheckIn;
use crate::kiosk::{Kiosk, Location};
use crate::session::Session;

// Kiosks

pub async fn insert_kiosk(
    conn: &mut SqliteConnection,
    id: &str,
    secret_hash: &str,
    now: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO kiosks (id, state, secret_hash, created_at) VALUES (?, 'unpaired', ?, ?)",
    )
    .bind(id)
    .bind(secret_hash)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_kiosk(conn: &mut SqliteConnection, id: &str) -> Result<Option<Kiosk>> {
    let kiosk = sqlx::query_as::<_, Kiosk>("SELECT * FROM kiosks WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(kiosk)
}

pub async fn list_kiosks(conn: &mut SqliteConnection) -> Result<Vec<Kiosk>> {
    let kiosks = sqlx::query_as::<_, Kiosk>("SELECT * FROM kiosks ORDER BY created_at, id")
        .fetch_all(&mut *conn)
        .await?;
    Ok(kiosks)
}

/// Consume a registration PIN and mark its kiosk paired.
///
/// Returns the kiosk id, or `None` if no unpaired kiosk holds the PIN. The
/// conditional update makes a concurrent second attempt with the same PIN
/// find nothing.
pub async fn consume_registration_pin(
    conn: &mut SqliteConnection,
    registration_pin: &str,
    location: &Location,
    now: i64,
) -> Result<Option<String>> {
    let id = sqlx::query_scalar::<_, String>(
        "UPDATE kiosks SET state = 'paired', registration_pin = NULL, building = ?, room = ?, paired_at = ?
         WHERE registration_pin = ? AND state = 'unpaired'
         RETURNING id",
    )
    .bind(&location.building)
    .bind(&location.room)
    .bind(now)
    .bind(registration_pin)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

/// Return a paired kiosk to the unpaired state, dropping its display PIN
pub async fn mark_unpaired(conn: &mut SqliteConnection, kiosk_id: &str) -> Result<bool> {
    let done = sqlx::query(
        "UPDATE kiosks SET state = 'unpaired', display_pin = NULL, building = NULL, room = NULL, paired_at = NULL
         WHERE id = ? AND state = 'paired'",
    )
    .bind(kiosk_id)
    .execute(&mut *conn)
    .await?;
    Ok(done.rows_affected() == 1)
}

// Sessions

pub async fn insert_session(conn: &mut SqliteConnection, session: &Session) -> Result<()> {
    sqlx::query(
        "INSERT INTO sessions (id, kiosk_id, teacher_id, teacher_name, discipline, secret, rotate_seconds, state, started_at, ended_at, schedule_snapshot)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&session.id)
    .bind(&session.kiosk_id)
    .bind(&session.teacher_id)
    .bind(&session.teacher_name)
    .bind(&session.discipline)
    .bind(&session.secret)
    .bind(session.rotate_seconds)
    .bind(session.state)
    .bind(session.started_at)
    .bind(session.ended_at)
    .bind(&session.schedule_snapshot)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_session(conn: &mut SqliteConnection, id: &str) -> Result<Option<Session>> {
    let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(session)
}

pub async fn active_session_for_kiosk(
    conn: &mut SqliteConnection,
    kiosk_id: &str,
) -> Result<Option<Session>> {
    let session = sqlx::query_as::<_, Session>(
        "SELECT * FROM sessions WHERE kiosk_id = ? AND state = 'active'",
    )
    .bind(kiosk_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(session)
}

/// Sessions filtered by owner and/or kiosk, newest first
pub async fn list_sessions(
    conn: &mut SqliteConnection,
    teacher_id: Option<&str>,
    kiosk_id: Option<&str>,
) -> Result<Vec<Session>> {
    let sessions = sqlx::query_as::<_, Session>(
        "SELECT * FROM sessions
         WHERE (?1 IS NULL OR teacher_id = ?1) AND (?2 IS NULL OR kiosk_id = ?2)
         ORDER BY started_at DESC, id",
    )
    .bind(teacher_id)
    .bind(kiosk_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(sessions)
}

/// Close a session if it is still active. Returns whether it changed.
pub async fn close_session(conn: &mut SqliteConnection, id: &str, now: i64) -> Result<bool> {
    let done = sqlx::query(
        "UPDATE sessions SET state = 'closed', ended_at = ? WHERE id = ? AND state = 'active'",
    )
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(done.rows_affected() == 1)
}

// Check-ins

/// Insert a check-in if the session is active and the student has none yet.
///
/// Returns the number of rows inserted (0 or 1).
pub async fn insert_check_in(conn: &mut SqliteConnection, check_in: &CheckIn) -> Result<u64> {
    let done = sqlx::query(
        "INSERT INTO check_ins (id, session_id, student_external_id, student_name, student_email, marked_at)
         SELECT ?, id, ?, ?, ?, ? FROM sessions WHERE id = ? AND state = 'active'
         ON CONFLICT (session_id, student_external_id) DO NOTHING",
    )
    .bind(&check_in.id)
    .bind(&check_in.student_external_id)
    .bind(&check_in.student_name)
    .bind(&check_in.student_email)
    .bind(check_in.marked_at)
    .bind(&check_in.session_id)
    .execute(&mut *conn)
    .await?;
    Ok(done.rows_affected())
}

pub async fn get_check_in(
    conn: &mut SqliteConnection,
    session_id: &str,
    student_external_id: &str,
) -> Result<Option<CheckIn>> {
    let check_in = sqlx::query_as::<_, CheckIn>(
        "SELECT * FROM check_ins WHERE session_id = ? AND student_external_id = ?",
    )
    .bind(session_id)
    .bind(student_external_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(check_in)
}

/// Check-ins for a session in arrival order
pub async fn list_check_ins(conn: &mut SqliteConnection, session_id: &str) -> Result<Vec<CheckIn>> {
    let check_ins = sqlx::query_as::<_, CheckIn>(
        "SELECT * FROM check_ins WHERE session_id = ? ORDER BY marked_at, rowid",
    )
    .bind(session_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(check_ins)
}

pub async fn count_check_ins(conn: &mut SqliteConnection, session_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM check_ins WHERE session_id = ?")
        .bind(session_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Database;

    #[tokio::test]
    async fn test_consume_registration_pin_once() {
        let db = Database::open_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        insert_kiosk(&mut conn, "k1", "hash", 100).await.unwrap();
        sqlx::query("UPDATE kiosks SET registration_pin = '123456' WHERE id = 'k1'")
            .execute(&mut *conn)
            .await
            .unwrap();

        let location = Location {
            building: "B".into(),
            room: "101".into(),
        };
        let first = consume_registration_pin(&mut conn, "123456", &location, 200)
            .await
            .unwrap();
        assert_eq!(first.as_deref(), Some("k1"));

        let second = consume_registration_pin(&mut conn, "123456", &location, 201)
            .await
            .unwrap();
        assert!(second.is_none());

        let kiosk = get_kiosk(&mut conn, "k1").await.unwrap().unwrap();
        assert!(kiosk.is_paired());
        assert_eq!(kiosk.room.as_deref(), Some("101"));
        assert_eq!(kiosk.paired_at, Some(200));
        assert!(kiosk.registration_pin.is_none());
    }

    #[tokio::test]
    async fn test_mark_unpaired_requires_paired() {
        let db = Database::open_in_memory().await.unwrap();
        let mut conn = db.pool().acquire().await.unwrap();

        insert_kiosk(&mut conn, "k1", "hash", 100).await.unwrap();
        assert!(!mark_unpaired(&mut conn, "k1").await.unwrap());
        assert!(get_kiosk(&mut conn, "missing").await.unwrap().is_none());
        assert_eq!(list_kiosks(&mut conn).await.unwrap().len(), 1);
    }
}
