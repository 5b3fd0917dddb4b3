//! Shared test doubles for the core crate.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use leadscout_shared::{
    Company, EnrichmentError, JobId, NewContextSnippet, Person, ProgressEvent, ProgressStep,
    Result, SnippetId, Subject,
};
use leadscout_storage::Storage;

use crate::agent::ResearchStore;
use crate::progress::ProgressSink;

/// Temp-file storage, fresh per test.
pub(crate) async fn test_storage() -> Storage {
    let tmp = std::env::temp_dir().join(format!("ls_core_test_{}.db", JobId::new()));
    Storage::open(&tmp).await.expect("open test db")
}

/// A subject at "Acme Corporation". `None` means no company at all.
pub(crate) fn acme_subject(person_id: &str, domain: Option<&str>) -> Subject {
    let now = Utc::now();
    let company = domain.map(|d| Company {
        id: format!("company-of-{person_id}"),
        name: "Acme Corporation".into(),
        domain: Some(d.to_string()),
        created_at: now,
    });
    Subject {
        person: Person {
            id: person_id.into(),
            company_id: company.as_ref().map(|c| c.id.clone()),
            full_name: "Alice Smith".into(),
            email: format!("{person_id}@acme.com"),
            title: Some("CEO".into()),
            created_at: now,
        },
        company,
    }
}

/// In-memory [`ResearchStore`].
#[derive(Default)]
pub(crate) struct MemoryStore {
    subjects: Mutex<HashMap<String, Subject>>,
    persisted: Mutex<Vec<NewContextSnippet>>,
    fail_writes: bool,
}

impl MemoryStore {
    pub(crate) fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Default::default()
        }
    }

    pub(crate) fn add(&self, subject: Subject) {
        self.subjects
            .lock()
            .unwrap()
            .insert(subject.person.id.clone(), subject);
    }

    pub(crate) fn persisted(&self) -> Vec<NewContextSnippet> {
        self.persisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResearchStore for MemoryStore {
    async fn resolve_subject(&self, subject_id: &str) -> Result<Option<Subject>> {
        Ok(self.subjects.lock().unwrap().get(subject_id).cloned())
    }

    async fn persist_snippet(&self, snippet: &NewContextSnippet) -> Result<SnippetId> {
        if self.fail_writes {
            return Err(EnrichmentError::Persistence("disk full".into()));
        }
        self.persisted.lock().unwrap().push(snippet.clone());
        Ok(SnippetId::new())
    }
}

/// Records every event it receives.
#[derive(Default)]
pub(crate) struct EventRecorder {
    events: Mutex<Vec<ProgressEvent>>,
}

impl EventRecorder {
    pub(crate) fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn steps(&self) -> Vec<ProgressStep> {
        self.events().into_iter().map(|e| e.step).collect()
    }
}

impl ProgressSink for EventRecorder {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
