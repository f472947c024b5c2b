// SPDX-License-Identifier: MPL-2.0

/// SQL schema for the cache database
pub const SCHEMA: &str = r#"
-- Database version for migrations
PRAGMA user_version = 2;

-- users: one table per concern, all keyed by user id
CREATE TABLE IF NOT EXISTS user_details (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    bio TEXT,
    image TEXT,
    links TEXT NOT NULL DEFAULT '[]',
    status TEXT,
    indexed_at INTEGER NOT NULL,
    fetched_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_counts (
    id TEXT PRIMARY KEY,
    posts INTEGER NOT NULL DEFAULT 0,
    replies INTEGER NOT NULL DEFAULT 0,
    tagged INTEGER NOT NULL DEFAULT 0,
    tags INTEGER NOT NULL DEFAULT 0,
    unique_tags INTEGER NOT NULL DEFAULT 0,
    followers INTEGER NOT NULL DEFAULT 0,
    following INTEGER NOT NULL DEFAULT 0,
    friends INTEGER NOT NULL DEFAULT 0,
    bookmarks INTEGER NOT NULL DEFAULT 0,
    fetched_at INTEGER NOT NULL
);

-- relationships: keyed by actor:target
CREATE TABLE IF NOT EXISTS user_relationships (
    id TEXT PRIMARY KEY,
    following INTEGER NOT NULL DEFAULT 0,
    followed_by INTEGER NOT NULL DEFAULT 0,
    muted INTEGER NOT NULL DEFAULT 0,
    fetched_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_tags (
    id TEXT PRIMARY KEY,
    tags TEXT NOT NULL DEFAULT '[]',
    fetched_at INTEGER NOT NULL
);

-- posts: keyed by owner:local_id
CREATE TABLE IF NOT EXISTS post_details (
    id TEXT PRIMARY KEY,
    author TEXT NOT NULL,
    content TEXT NOT NULL,
    kind TEXT NOT NULL,
    uri TEXT NOT NULL,
    indexed_at INTEGER NOT NULL,
    attachments TEXT NOT NULL DEFAULT '[]',
    fetched_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_post_details_author ON post_details(author);
CREATE INDEX IF NOT EXISTS idx_post_details_indexed_at ON post_details(indexed_at DESC);

CREATE TABLE IF NOT EXISTS post_counts (
    id TEXT PRIMARY KEY,
    tags INTEGER NOT NULL DEFAULT 0,
    unique_tags INTEGER NOT NULL DEFAULT 0,
    replies INTEGER NOT NULL DEFAULT 0,
    reposts INTEGER NOT NULL DEFAULT 0,
    fetched_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS post_tags (
    id TEXT PRIMARY KEY,
    tags TEXT NOT NULL DEFAULT '[]',
    fetched_at INTEGER NOT NULL
);

-- streams: ordered member ids as a JSON array, newest first
CREATE TABLE IF NOT EXISTS post_streams (
    id TEXT PRIMARY KEY,
    stream TEXT NOT NULL DEFAULT '[]',
    fetched_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS user_streams (
    id TEXT PRIMARY KEY,
    stream TEXT NOT NULL DEFAULT '[]',
    fetched_at INTEGER NOT NULL
);

-- notifications: persisted verbatim, keyed by user_id:sequence
CREATE TABLE IF NOT EXISTS notifications (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    kind TEXT,
    timestamp INTEGER NOT NULL,
    body TEXT NOT NULL,
    fetched_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, timestamp DESC);

-- sync_meta: watermarks and other small values
CREATE TABLE IF NOT EXISTS sync_meta (
    id TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    fetched_at INTEGER NOT NULL
);
"#;
