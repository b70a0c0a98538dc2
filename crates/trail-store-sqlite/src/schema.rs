//! SQL schema for the Trail SQLite store.
//!
//! Executed once at connection startup. Immutability and the projector-only
//! state guard are enforced by triggers, so a stray statement from any other
//! code path fails inside SQLite itself.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Events are strictly append-only.
CREATE TABLE IF NOT EXISTS events (
    event_id         TEXT PRIMARY KEY,
    aggregate_id     TEXT NOT NULL,
    sequence_number  INTEGER NOT NULL CHECK (sequence_number >= 1),
    versioned_type   TEXT NOT NULL,
    payload_json     TEXT NOT NULL,
    created_by       TEXT NOT NULL,
    device_id        TEXT NOT NULL,
    client_timestamp TEXT NOT NULL,   -- RFC 3339 with the device's offset
    server_timestamp TEXT NOT NULL,   -- RFC 3339 UTC; server-assigned
    session_id       TEXT NOT NULL,
    source_ip        TEXT NOT NULL,
    base_version     INTEGER,
    content_hash     TEXT NOT NULL,
    chain_hash       TEXT NOT NULL,
    UNIQUE (aggregate_id, sequence_number)
);

CREATE TRIGGER IF NOT EXISTS events_no_update BEFORE UPDATE ON events
BEGIN
    SELECT RAISE(ABORT, 'events are append-only');
END;

CREATE TRIGGER IF NOT EXISTS events_no_delete BEFORE DELETE ON events
BEGIN
    SELECT RAISE(ABORT, 'events are append-only');
END;

-- What the projector decided for each event; answers idempotent retries.
CREATE TABLE IF NOT EXISTS projections (
    event_id         TEXT PRIMARY KEY REFERENCES events(event_id),
    outcome          TEXT NOT NULL CHECK (outcome IN ('applied', 'converged', 'conflicted')),
    version          INTEGER,
    matched_sequence INTEGER,
    conflict_id      TEXT
);

CREATE TRIGGER IF NOT EXISTS projections_no_update BEFORE UPDATE ON projections
BEGIN
    SELECT RAISE(ABORT, 'projection records are append-only');
END;

CREATE TRIGGER IF NOT EXISTS projections_no_delete BEFORE DELETE ON projections
BEGIN
    SELECT RAISE(ABORT, 'projection records are append-only');
END;

-- Single row. The projector raises projector_active inside its own
-- transaction; protected is set from the store's write mode at open.
CREATE TABLE IF NOT EXISTS write_guard (
    id               INTEGER PRIMARY KEY CHECK (id = 1),
    protected        INTEGER NOT NULL DEFAULT 1,
    projector_active INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO write_guard (id, protected, projector_active) VALUES (1, 1, 0);

CREATE TABLE IF NOT EXISTS states (
    aggregate_id    TEXT PRIMARY KEY,
    current_payload TEXT NOT NULL,
    version         INTEGER NOT NULL,
    last_event_id   TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TRIGGER IF NOT EXISTS states_guard_insert BEFORE INSERT ON states
WHEN (SELECT protected = 1 AND projector_active = 0 FROM write_guard WHERE id = 1)
BEGIN
    SELECT RAISE(ABORT, 'state writes must originate from the projector');
END;

CREATE TRIGGER IF NOT EXISTS states_guard_update BEFORE UPDATE ON states
WHEN (SELECT protected = 1 AND projector_active = 0 FROM write_guard WHERE id = 1)
BEGIN
    SELECT RAISE(ABORT, 'state writes must originate from the projector');
END;

CREATE TRIGGER IF NOT EXISTS states_guard_delete BEFORE DELETE ON states
WHEN (SELECT protected = 1 AND projector_active = 0 FROM write_guard WHERE id = 1)
BEGIN
    SELECT RAISE(ABORT, 'state writes must originate from the projector');
END;

CREATE TABLE IF NOT EXISTS conflicts (
    conflict_id         TEXT PRIMARY KEY,
    aggregate_id        TEXT NOT NULL,
    base_version        INTEGER NOT NULL,
    incoming_event_id   TEXT NOT NULL REFERENCES events(event_id),
    incoming_sequence   INTEGER NOT NULL,
    winning_event_id    TEXT,
    status              TEXT NOT NULL CHECK (status IN ('open', 'resolved')),
    resolution_event_id TEXT REFERENCES events(event_id),
    resolution_note     TEXT,
    resolved_by         TEXT,
    created_at          TEXT NOT NULL,
    resolved_at         TEXT
);

CREATE INDEX IF NOT EXISTS conflicts_aggregate_status_idx ON conflicts(aggregate_id, status);

CREATE TRIGGER IF NOT EXISTS conflicts_open_on_insert BEFORE INSERT ON conflicts
WHEN NEW.status <> 'open'
BEGIN
    SELECT RAISE(ABORT, 'conflicts are created open');
END;

-- open -> resolved is the only transition, and it must name the
-- corrective event. Identity columns never change.
CREATE TRIGGER IF NOT EXISTS conflicts_transition BEFORE UPDATE ON conflicts
WHEN OLD.status <> 'open'
  OR NEW.status <> 'resolved'
  OR NEW.resolution_event_id IS NULL
  OR NEW.conflict_id IS NOT OLD.conflict_id
  OR NEW.aggregate_id IS NOT OLD.aggregate_id
  OR NEW.base_version IS NOT OLD.base_version
  OR NEW.incoming_event_id IS NOT OLD.incoming_event_id
  OR NEW.incoming_sequence IS NOT OLD.incoming_sequence
  OR NEW.created_at IS NOT OLD.created_at
BEGIN
    SELECT RAISE(ABORT, 'conflicts may only move from open to resolved');
END;

CREATE TRIGGER IF NOT EXISTS conflicts_no_delete BEFORE DELETE ON conflicts
BEGIN
    SELECT RAISE(ABORT, 'conflicts are never deleted');
END;

-- Raised by the auditor; never cleared by the store.
CREATE TABLE IF NOT EXISTS compliance_flags (
    flag_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    aggregate_id TEXT NOT NULL,
    at_sequence  INTEGER NOT NULL,
    detected_at  TEXT NOT NULL,
    detail       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS compliance_flags_aggregate_idx ON compliance_flags(aggregate_id);

PRAGMA user_version = 1;
";
