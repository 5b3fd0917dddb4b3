//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding subjects (people and
//! their companies), persisted context snippets with their search logs, and
//! the durable enrichment job table (see [`jobs`]).
//!
//! **Access rules:**
//! - Workers and the CLI: read-write via [`Storage::open`]
//! - Inspection commands: read-only via [`Storage::open_readonly`]

pub mod jobs;
mod migrations;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use leadscout_shared::{
    Company, ContextSnippet, EnrichmentError, NewContextSnippet, Person, Result, SearchLogEntry,
    SnippetId, Subject,
};
use libsql::{Connection, Database, params};
use uuid::Uuid;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EnrichmentError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;
        configure_connection(&conn).await?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;
        configure_connection(&conn).await?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        EnrichmentError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(EnrichmentError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Company operations
    // -----------------------------------------------------------------------

    /// Insert a new company record.
    pub async fn insert_company(&self, name: &str, domain: Option<&str>) -> Result<Company> {
        self.check_writable()?;
        let company = Company {
            id: Uuid::now_v7().to_string(),
            name: name.to_string(),
            domain: domain.map(String::from),
            created_at: Utc::now(),
        };
        self.conn
            .execute(
                "INSERT INTO companies (id, name, domain, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    company.id.as_str(),
                    company.name.as_str(),
                    company.domain.as_deref(),
                    format_ts(&company.created_at),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(company)
    }

    /// Get a company by ID.
    pub async fn get_company(&self, id: &str) -> Result<Option<Company>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, domain, created_at FROM companies WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_company(&row, 0)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Find the first company with exactly this name.
    pub async fn find_company_by_name(&self, name: &str) -> Result<Option<Company>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, domain, created_at FROM companies
                 WHERE name = ?1 ORDER BY created_at LIMIT 1",
                params![name],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_company(&row, 0)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Person operations
    // -----------------------------------------------------------------------

    /// Insert a new person, optionally attached to a company.
    pub async fn insert_person(
        &self,
        company_id: Option<&str>,
        full_name: &str,
        email: &str,
        title: Option<&str>,
    ) -> Result<Person> {
        self.check_writable()?;
        let person = Person {
            id: Uuid::now_v7().to_string(),
            company_id: company_id.map(String::from),
            full_name: full_name.to_string(),
            email: email.to_string(),
            title: title.map(String::from),
            created_at: Utc::now(),
        };
        self.conn
            .execute(
                "INSERT INTO people (id, company_id, full_name, email, title, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    person.id.as_str(),
                    person.company_id.as_deref(),
                    person.full_name.as_str(),
                    person.email.as_str(),
                    person.title.as_deref(),
                    format_ts(&person.created_at),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(person)
    }

    /// Find a person by email address.
    pub async fn find_person_by_email(&self, email: &str) -> Result<Option<Person>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, company_id, full_name, email, title, created_at
                 FROM people WHERE email = ?1",
                params![email],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_person(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Resolve a person together with their company (if any).
    pub async fn resolve_subject(&self, person_id: &str) -> Result<Option<Subject>> {
        let mut rows = self
            .conn
            .query(
                "SELECT p.id, p.company_id, p.full_name, p.email, p.title, p.created_at,
                        c.id, c.name, c.domain, c.created_at
                 FROM people p
                 LEFT JOIN companies c ON c.id = p.company_id
                 WHERE p.id = ?1",
                params![person_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_subject(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// List all people with their companies, ordered by name.
    pub async fn list_subjects(&self) -> Result<Vec<Subject>> {
        let mut rows = self
            .conn
            .query(
                "SELECT p.id, p.company_id, p.full_name, p.email, p.title, p.created_at,
                        c.id, c.name, c.domain, c.created_at
                 FROM people p
                 LEFT JOIN companies c ON c.id = p.company_id
                 ORDER BY p.full_name",
                params![],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_subject(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Context snippet operations
    // -----------------------------------------------------------------------

    /// Write a snippet and its search logs in a single transaction.
    ///
    /// Runs on a dedicated connection so concurrent writers sharing
    /// `self.conn` never see a half-written snippet.
    pub async fn insert_context_snippet(&self, snippet: &NewContextSnippet) -> Result<SnippetId> {
        self.check_writable()?;
        let id = SnippetId::new();
        let payload_json = serde_json::to_string(&snippet.payload)?;
        let source_urls_json = serde_json::to_string(&snippet.source_urls)?;

        let conn = self.db.connect().map_err(storage_err)?;
        configure_connection(&conn).await?;
        let tx = conn.transaction().await.map_err(storage_err)?;

        tx.execute(
            "INSERT INTO context_snippets
               (id, entity_type, entity_id, payload_json, source_urls_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                snippet.entity_type.as_str(),
                snippet.entity_id.as_str(),
                payload_json,
                source_urls_json,
                format_ts(&Utc::now()),
            ],
        )
        .await
        .map_err(storage_err)?;

        for log in &snippet.search_logs {
            let top_results_json = serde_json::to_string(&log.top_results)?;
            tx.execute(
                "INSERT INTO search_logs (snippet_id, iteration, query, top_results_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id.to_string(),
                    i64::from(log.iteration),
                    log.query.as_str(),
                    top_results_json,
                ],
            )
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(id)
    }

    /// Snippets recorded for an entity, newest first (search logs not loaded).
    pub async fn list_snippets_for_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<ContextSnippet>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity_type, entity_id, payload_json, source_urls_json, created_at
                 FROM context_snippets
                 WHERE entity_type = ?1 AND entity_id = ?2
                 ORDER BY created_at DESC, id DESC",
                params![entity_type, entity_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_snippet(&row)?);
        }
        Ok(results)
    }

    /// Get a snippet by ID, including its search logs in iteration order.
    pub async fn get_snippet(&self, id: &SnippetId) -> Result<Option<ContextSnippet>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity_type, entity_id, payload_json, source_urls_json, created_at
                 FROM context_snippets WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut snippet = match rows.next().await {
            Ok(Some(row)) => row_to_snippet(&row)?,
            Ok(None) => return Ok(None),
            Err(e) => return Err(storage_err(e)),
        };

        let mut rows = self
            .conn
            .query(
                "SELECT iteration, query, top_results_json FROM search_logs
                 WHERE snippet_id = ?1 ORDER BY iteration, id",
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        while let Ok(Some(row)) = rows.next().await {
            let top_results: String = row.get(2).map_err(storage_err)?;
            snippet.search_logs.push(SearchLogEntry {
                iteration: row.get::<i64>(0).map_err(storage_err)? as u32,
                query: row.get(1).map_err(storage_err)?,
                top_results: serde_json::from_str(&top_results)?,
            });
        }
        Ok(Some(snippet))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn storage_err(e: impl std::fmt::Display) -> EnrichmentError {
    EnrichmentError::Storage(e.to_string())
}

/// Per-connection pragmas. They may return a row, so they go through
/// `query` and are stepped once.
async fn configure_connection(conn: &Connection) -> Result<()> {
    for pragma in [
        format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"),
        "PRAGMA foreign_keys = ON".to_string(),
    ] {
        let mut rows = conn.query(&pragma, params![]).await.map_err(storage_err)?;
        rows.next().await.map_err(storage_err)?;
    }
    Ok(())
}

/// Fixed-width RFC 3339 so lexical order matches chronological order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EnrichmentError::Storage(format!("invalid date: {e}")))
}

/// Read a company from `row` starting at column `offset`.
fn row_to_company(row: &libsql::Row, offset: i32) -> Result<Company> {
    let created_at: String = row.get(offset + 3).map_err(storage_err)?;
    Ok(Company {
        id: row.get(offset).map_err(storage_err)?,
        name: row.get(offset + 1).map_err(storage_err)?,
        domain: row.get::<String>(offset + 2).ok(),
        created_at: parse_ts(&created_at)?,
    })
}

fn row_to_person(row: &libsql::Row) -> Result<Person> {
    let created_at: String = row.get(5).map_err(storage_err)?;
    Ok(Person {
        id: row.get(0).map_err(storage_err)?,
        company_id: row.get::<String>(1).ok(),
        full_name: row.get(2).map_err(storage_err)?,
        email: row.get(3).map_err(storage_err)?,
        title: row.get::<String>(4).ok(),
        created_at: parse_ts(&created_at)?,
    })
}

/// Person columns 0..6, joined company columns 6..10 (NULL when absent).
fn row_to_subject(row: &libsql::Row) -> Result<Subject> {
    let person = row_to_person(row)?;
    let company = match row.get::<String>(6) {
        Ok(_) => Some(row_to_company(row, 6)?),
        Err(_) => None,
    };
    Ok(Subject { person, company })
}

fn row_to_snippet(row: &libsql::Row) -> Result<ContextSnippet> {
    let id: String = row.get(0).map_err(storage_err)?;
    let payload: String = row.get(3).map_err(storage_err)?;
    let source_urls: String = row.get(4).map_err(storage_err)?;
    let created_at: String = row.get(5).map_err(storage_err)?;
    Ok(ContextSnippet {
        id: id
            .parse()
            .map_err(|e| EnrichmentError::Storage(format!("invalid snippet id: {e}")))?,
        entity_type: row.get(1).map_err(storage_err)?,
        entity_id: row.get(2).map_err(storage_err)?,
        payload: serde_json::from_str(&payload)?,
        source_urls: serde_json::from_str(&source_urls)?,
        search_logs: Vec::new(),
        created_at: parse_ts(&created_at)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use leadscout_shared::{COMPANY_ENTITY, ResearchResult};

    /// Create a temp file storage for testing.
    pub(crate) async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("ls_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn acme_payload() -> ResearchResult {
        ResearchResult {
            company_value_prop: "Delivering excellence.".into(),
            product_names: vec!["widgetpro".into()],
            pricing_model: "Subscription".into(),
            key_competitors: vec!["globex inc".into()],
            company_domain: "https://acme.com".into(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("ls_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn subject_resolution() {
        let storage = test_storage().await;
        let company = storage
            .insert_company("Acme Corporation", Some("https://acme.com"))
            .await
            .expect("insert company");
        let alice = storage
            .insert_person(Some(&company.id), "Alice Smith", "alice@acme.com", Some("CEO"))
            .await
            .expect("insert person");
        let loner = storage
            .insert_person(None, "No Company", "nobody@example.com", None)
            .await
            .expect("insert person");

        let subject = storage
            .resolve_subject(&alice.id)
            .await
            .expect("resolve")
            .expect("subject exists");
        assert_eq!(subject.person.full_name, "Alice Smith");
        let parent = subject.company.expect("company joined");
        assert_eq!(parent.domain.as_deref(), Some("https://acme.com"));

        let subject = storage.resolve_subject(&loner.id).await.unwrap().unwrap();
        assert!(subject.company.is_none());
        assert!(subject.person.title.is_none());

        assert!(storage.resolve_subject("missing").await.unwrap().is_none());

        let all = storage.list_subjects().await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].person.full_name, "Alice Smith");

        let found = storage.find_company_by_name("Acme Corporation").await.unwrap();
        assert_eq!(found.map(|c| c.id), Some(company.id));
        assert!(storage.find_person_by_email("alice@acme.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn snippet_written_with_logs() {
        let storage = test_storage().await;
        let snippet = NewContextSnippet {
            entity_type: COMPANY_ENTITY.into(),
            entity_id: "company-1".into(),
            payload: acme_payload(),
            source_urls: vec!["https://acme.com/about".into(), "https://acme.com/pricing".into()],
            search_logs: vec![
                SearchLogEntry {
                    iteration: 1,
                    query: "\"Acme\" company value prop site:acme.com".into(),
                    top_results: vec!["https://acme.com/about".into()],
                },
                SearchLogEntry {
                    iteration: 2,
                    query: "\"Acme\" pricing model site:acme.com".into(),
                    top_results: vec!["https://acme.com/pricing".into()],
                },
            ],
        };

        let id = storage
            .insert_context_snippet(&snippet)
            .await
            .expect("insert snippet");

        let stored = storage.get_snippet(&id).await.unwrap().expect("snippet exists");
        assert_eq!(stored.payload, acme_payload());
        assert_eq!(stored.source_urls.len(), 2);
        assert_eq!(stored.search_logs, snippet.search_logs);
    }

    #[tokio::test]
    async fn snippets_listed_newest_first() {
        let storage = test_storage().await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let snippet = NewContextSnippet {
                entity_type: COMPANY_ENTITY.into(),
                entity_id: "company-1".into(),
                payload: acme_payload(),
                source_urls: vec![],
                search_logs: vec![],
            };
            ids.push(storage.insert_context_snippet(&snippet).await.unwrap());
        }

        let listed = storage
            .list_snippets_for_entity(COMPANY_ENTITY, "company-1")
            .await
            .expect("list");
        let listed_ids: Vec<_> = listed.into_iter().map(|s| s.id).collect();
        ids.reverse();
        assert_eq!(listed_ids, ids);

        let other = storage
            .list_snippets_for_entity(COMPANY_ENTITY, "company-2")
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("ls_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_company("Acme", None).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.insert_company("Globex", None).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
