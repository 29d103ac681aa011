//! Concurrency against a file-backed pool
//!
//! The in-memory pool used by the unit tests has a single connection and
//! serialises everything. These run on the same pool configuration the
//! server uses, so concurrent writers really contend for the SQLite lock.

use futures::future::join_all;
use rollcall_attendance::{
    token, AttendanceManager, Lesson, Location, PairRequest, StartSessionRequest,
};
use rollcall_core::protocol::{CheckInRequest, CheckInStatus};
use rollcall_core::{unix_timestamp, Config, Database, Error, Principal, Role};
use tempfile::TempDir;

async fn file_manager() -> (AttendanceManager, TempDir) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("rollcall.db")).await.unwrap();
    (AttendanceManager::new(db, &Config::default()), dir)
}

fn admin() -> Principal {
    Principal::new("admin-1", Role::Admin, "Admin")
}

fn teacher(id: &str) -> Principal {
    Principal::new(id, Role::Teacher, format!("Teacher {id}"))
}

fn student(external_id: &str) -> Principal {
    Principal::new(format!("acct-{external_id}"), Role::Student, "Student").with_entity_id(external_id)
}

async fn paired_kiosk(manager: &AttendanceManager, room: usize) -> (String, String, String) {
    let registration = manager.init_kiosk().await.unwrap();
    let paired = manager
        .pair_kiosk(
            &admin(),
            PairRequest {
                registration_pin: registration.registration_pin.to_string(),
                location: Location {
                    building: "Main".into(),
                    room: room.to_string(),
                },
            },
        )
        .await
        .unwrap();
    (
        registration.kiosk_id,
        registration.kiosk_secret,
        paired.display_pin.to_string(),
    )
}

fn start_request(display_pin: String) -> StartSessionRequest {
    StartSessionRequest {
        display_pin,
        candidates: vec![Lesson::new("Algorithms", "10:00", "11:30")],
        selected: Some(0),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_on_distinct_kiosks() {
    let (manager, _dir) = file_manager().await;

    let mut kiosks = Vec::new();
    for room in 0..20 {
        kiosks.push(paired_kiosk(&manager, room).await);
    }

    let handles: Vec<_> = kiosks
        .iter()
        .enumerate()
        .map(|(i, (_, _, display_pin))| {
            let manager = manager.clone();
            let request = start_request(display_pin.clone());
            tokio::spawn(async move {
                manager
                    .start_session(&teacher(&format!("t{i}")), request)
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert!(failures.is_empty(), "starts failed: {failures:?}");

    for (kiosk_id, secret, _) in &kiosks {
        let view = manager.kiosk_view(kiosk_id, secret).await.unwrap();
        assert!(view.session.is_some(), "kiosk {kiosk_id} has no session");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_on_one_kiosk_open_one_session() {
    let (manager, _dir) = file_manager().await;
    let (kiosk_id, _, display_pin) = paired_kiosk(&manager, 101).await;

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let manager = manager.clone();
            let request = start_request(display_pin.clone());
            tokio::spawn(async move {
                manager
                    .start_session(&teacher(&format!("t{i}")), request)
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    // Losers see the reissued PIN or the running session, never a storage failure
    for result in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(
            matches!(result, Error::NotFound(_) | Error::Conflict(_)),
            "unexpected error: {result:?}"
        );
    }

    let sessions = manager
        .list_sessions(&admin(), Some(&kiosk_id))
        .await
        .unwrap();
    assert_eq!(sessions.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_check_ins() {
    let (manager, _dir) = file_manager().await;
    let (kiosk_id, kiosk_secret, display_pin) = paired_kiosk(&manager, 101).await;
    manager
        .start_session(&teacher("t1"), start_request(display_pin))
        .await
        .unwrap();

    let view = manager.kiosk_view(&kiosk_id, &kiosk_secret).await.unwrap();
    let session = view.session.unwrap();
    let rotate = u32::try_from(session.rotate_seconds).unwrap();
    let now = unix_timestamp();
    let payload =
        token::current_payload(session.secret.as_bytes(), &session.session_id, now, rotate).unwrap();

    let students = 5;
    let repeats = 6;
    let handles: Vec<_> = (0..students * repeats)
        .map(|i| {
            let manager = manager.clone();
            let external_id = format!("s-{}", i % students);
            let request = CheckInRequest {
                session_id: payload.session_id.clone(),
                token: payload.token.clone(),
                student_external_id: external_id.clone(),
                student_name: "Student".into(),
                student_email: String::new(),
            };
            tokio::spawn(async move {
                manager
                    .check_in_at(&student(&external_id), request, now)
                    .await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert!(failures.is_empty(), "check-ins failed: {failures:?}");

    let marked = results
        .iter()
        .filter(|r| matches!(r, Ok(resp) if resp.status == CheckInStatus::Marked))
        .count();
    assert_eq!(marked, students);
    assert_eq!(results.len() - marked, students * (repeats - 1));

    let attendees = manager
        .attendees(&teacher("t1"), &session.session_id)
        .await
        .unwrap();
    assert_eq!(attendees.len(), students);
}
