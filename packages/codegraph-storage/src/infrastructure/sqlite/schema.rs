//! Schema for the connection graph (§6's logical schema plus the checkpoint queue).
//!
//! Foreign keys and `ON DELETE CASCADE` implement the mapping/connection cascade semantics at the
//! schema level, per §4.1A — higher components never have to remember to delete a mapping when
//! they delete a connection.

pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS projects (
    id          INTEGER PRIMARY KEY,
    name        TEXT NOT NULL,
    root_path   TEXT NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS files (
    id           INTEGER PRIMARY KEY,
    project_id   INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    path         TEXT NOT NULL,
    language     TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    UNIQUE (project_id, path)
);

CREATE TABLE IF NOT EXISTS connections (
    id              INTEGER PRIMARY KEY,
    file_id         INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    direction       TEXT NOT NULL CHECK (direction IN ('incoming', 'outgoing')),
    start_line      INTEGER NOT NULL CHECK (start_line >= 1),
    end_line        INTEGER NOT NULL CHECK (end_line >= start_line),
    code_snippet    TEXT NOT NULL,
    description     TEXT NOT NULL,
    technology_name TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_connections_file_id ON connections(file_id);
CREATE INDEX IF NOT EXISTS idx_connections_direction_technology
    ON connections(direction, technology_name);

CREATE TABLE IF NOT EXISTS connection_mappings (
    id              INTEGER PRIMARY KEY,
    outgoing_id     INTEGER NOT NULL REFERENCES connections(id) ON DELETE CASCADE,
    incoming_id     INTEGER NOT NULL REFERENCES connections(id) ON DELETE CASCADE,
    confidence      REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
    technology_name TEXT NOT NULL,
    rationale       TEXT
);

CREATE TABLE IF NOT EXISTS checkpoint_queue (
    id           INTEGER PRIMARY KEY,
    project_id   INTEGER NOT NULL,
    file_path    TEXT NOT NULL,
    change_kind  TEXT NOT NULL CHECK (change_kind IN ('added', 'modified', 'deleted')),
    old_content  TEXT,
    new_content  TEXT,
    created_at   TEXT NOT NULL
);
"#;
