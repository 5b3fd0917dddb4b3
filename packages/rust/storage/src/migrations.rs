//! SQL migration definitions for the LeadScout database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: companies, people, context_snippets, search_logs",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Parent organizations
CREATE TABLE IF NOT EXISTS companies (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    domain     TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_companies_name ON companies(name);

-- Contacts being enriched
CREATE TABLE IF NOT EXISTS people (
    id         TEXT PRIMARY KEY,
    company_id TEXT REFERENCES companies(id) ON DELETE SET NULL,
    full_name  TEXT NOT NULL,
    email      TEXT NOT NULL UNIQUE,
    title      TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_people_company_id ON people(company_id);

-- Validated research results (immutable)
CREATE TABLE IF NOT EXISTS context_snippets (
    id               TEXT PRIMARY KEY,
    entity_type      TEXT NOT NULL,
    entity_id        TEXT NOT NULL,
    payload_json     TEXT NOT NULL,
    source_urls_json TEXT NOT NULL,
    created_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snippets_entity
    ON context_snippets(entity_type, entity_id, created_at);

-- Per-iteration search history for each snippet
CREATE TABLE IF NOT EXISTS search_logs (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    snippet_id       TEXT NOT NULL REFERENCES context_snippets(id) ON DELETE CASCADE,
    iteration        INTEGER NOT NULL,
    query            TEXT NOT NULL,
    top_results_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_search_logs_snippet ON search_logs(snippet_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Durable enrichment job queue",
            sql: r#"
CREATE TABLE IF NOT EXISTS enrichment_jobs (
    id               TEXT PRIMARY KEY,
    subject_id       TEXT NOT NULL,
    status           TEXT NOT NULL,
    attempts_made    INTEGER NOT NULL DEFAULT 0,
    max_attempts     INTEGER NOT NULL,
    payload_json     TEXT NOT NULL,
    last_error       TEXT,
    snippet_id       TEXT,
    run_at_ms        INTEGER NOT NULL,
    lease_expires_ms INTEGER,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    finished_at_ms   INTEGER
);

CREATE INDEX IF NOT EXISTS idx_jobs_ready ON enrichment_jobs(status, run_at_ms);
CREATE INDEX IF NOT EXISTS idx_jobs_finished ON enrichment_jobs(finished_at_ms);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
