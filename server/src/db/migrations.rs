use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking — no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
            "-- Migration 1: membership tables.
-- Written by the CRUD layer; the realtime core only ever SELECTs from these
-- to authorize room joins.

CREATE TABLE users (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE challenges (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE challenge_participants (
    challenge_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (challenge_id, user_id),
    FOREIGN KEY (challenge_id) REFERENCES challenges(id)
);

CREATE INDEX idx_challenge_participants_user ON challenge_participants(user_id);

CREATE TABLE teams (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE team_members (
    team_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (team_id, user_id),
    FOREIGN KEY (team_id) REFERENCES teams(id)
);

CREATE INDEX idx_team_members_user ON team_members(user_id);

CREATE TABLE habits (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE habit_members (
    habit_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (habit_id, user_id),
    FOREIGN KEY (habit_id) REFERENCES habits(id)
);

CREATE INDEX idx_habit_members_user ON habit_members(user_id);
",
        ),
        M::up(
            "-- Migration 2: offline delivery queue owned by the realtime core.
-- Timestamps are unix milliseconds so expiry comparisons stay numeric.

CREATE TABLE queued_messages (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    event TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX idx_queued_messages_user ON queued_messages(user_id, expires_at);
CREATE INDEX idx_queued_messages_expiry ON queued_messages(expires_at);
",
        ),
    ])
}
