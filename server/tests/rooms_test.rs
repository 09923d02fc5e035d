//! Room key parsing and membership authorization against the relational store.

use momentum_realtime::db::{self, DbPool};
use momentum_realtime::rooms::{self, RoomKey};

fn open_db() -> (DbPool, tempfile::TempDir) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();
    let db = db::init_db(&data_dir).expect("Failed to init DB");
    (db, tmp_dir)
}

fn seed(db: &DbPool, sql: &str, params: &[&str]) {
    let conn = db.lock().unwrap();
    conn.execute(sql, rusqlite::params_from_iter(params.iter()))
        .unwrap();
}

#[test]
fn test_parse_known_room_keys() {
    assert_eq!(
        RoomKey::parse("challenge:42"),
        Some(RoomKey::Challenge("42".to_string()))
    );
    assert_eq!(RoomKey::parse("team:7"), Some(RoomKey::Team("7".to_string())));
    assert_eq!(RoomKey::parse("habit:9"), Some(RoomKey::Habit("9".to_string())));
    assert_eq!(
        RoomKey::parse("user:alice"),
        Some(RoomKey::User("alice".to_string()))
    );
    assert_eq!(RoomKey::parse("presence"), Some(RoomKey::Presence));
}

#[test]
fn test_parse_rejects_malformed_keys() {
    assert_eq!(RoomKey::parse("bogus:1"), None);
    assert_eq!(RoomKey::parse("challenge:"), None);
    assert_eq!(RoomKey::parse("challenge"), None);
    assert_eq!(RoomKey::parse(""), None);
}

#[test]
fn test_display_round_trips() {
    for raw in ["challenge:42", "team:7", "habit:9", "user:alice", "presence"] {
        let key = RoomKey::parse(raw).unwrap();
        assert_eq!(key.to_string(), raw);
    }
}

#[tokio::test]
async fn test_challenge_membership() {
    let (db, _tmp) = open_db();
    seed(
        &db,
        "INSERT INTO challenges (id, title, created_at) VALUES (?1, ?2, ?3)",
        &["42", "Cold showers", "2026-01-01T00:00:00Z"],
    );
    seed(
        &db,
        "INSERT INTO challenge_participants (challenge_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        &["42", "alice", "2026-01-01T00:00:00Z"],
    );

    let room = RoomKey::Challenge("42".to_string());
    assert!(rooms::is_member(&db, "alice", &room).await);
    assert!(!rooms::is_member(&db, "mallory", &room).await);
}

#[tokio::test]
async fn test_team_membership() {
    let (db, _tmp) = open_db();
    seed(
        &db,
        "INSERT INTO teams (id, name, created_at) VALUES (?1, ?2, ?3)",
        &["7", "Early birds", "2026-01-01T00:00:00Z"],
    );
    seed(
        &db,
        "INSERT INTO team_members (team_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        &["7", "alice", "2026-01-01T00:00:00Z"],
    );

    let room = RoomKey::Team("7".to_string());
    assert!(rooms::is_member(&db, "alice", &room).await);
    assert!(!rooms::is_member(&db, "bob", &room).await);
}

#[tokio::test]
async fn test_habit_owner_and_followers_are_members() {
    let (db, _tmp) = open_db();
    seed(
        &db,
        "INSERT INTO habits (id, owner_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        &["9", "alice", "Morning run", "2026-01-01T00:00:00Z"],
    );
    seed(
        &db,
        "INSERT INTO habit_members (habit_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        &["9", "bob", "2026-01-02T00:00:00Z"],
    );

    let room = RoomKey::Habit("9".to_string());
    assert!(rooms::is_member(&db, "alice", &room).await, "owner is a member");
    assert!(rooms::is_member(&db, "bob", &room).await, "follower is a member");
    assert!(!rooms::is_member(&db, "mallory", &room).await);
}

#[tokio::test]
async fn test_personal_room_restricted_to_owner() {
    let (db, _tmp) = open_db();

    let room = RoomKey::User("alice".to_string());
    assert!(rooms::is_member(&db, "alice", &room).await);
    assert!(!rooms::is_member(&db, "bob", &room).await);
}

#[tokio::test]
async fn test_presence_open_to_all_authenticated_users() {
    let (db, _tmp) = open_db();
    assert!(rooms::is_member(&db, "anyone", &RoomKey::Presence).await);
}
