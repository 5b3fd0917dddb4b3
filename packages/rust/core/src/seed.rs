//! Demo data: one company with two contacts.

use leadscout_shared::Result;
use leadscout_storage::Storage;
use tracing::info;

const DEMO_COMPANY: &str = "Acme Corporation";
const DEMO_DOMAIN: &str = "https://acme.com";
const DEMO_PEOPLE: [(&str, &str, &str); 2] = [
    ("Alice Smith", "alice@acme.com", "CEO"),
    ("Bob Johnson", "bob@acme.com", "CTO"),
];

/// What [`seed_demo_data`] left in the database.
#[derive(Debug, Clone)]
pub struct SeedSummary {
    pub company_id: String,
    /// Alice first, then Bob.
    pub person_ids: Vec<String>,
    /// Rows inserted by this call (0 when already seeded).
    pub inserted: usize,
}

/// Insert the demo company and people unless they already exist.
pub async fn seed_demo_data(storage: &Storage) -> Result<SeedSummary> {
    let mut inserted = 0;

    let company = match storage.find_company_by_name(DEMO_COMPANY).await? {
        Some(company) => company,
        None => {
            inserted += 1;
            storage.insert_company(DEMO_COMPANY, Some(DEMO_DOMAIN)).await?
        }
    };

    let mut person_ids = Vec::with_capacity(DEMO_PEOPLE.len());
    for (name, email, title) in DEMO_PEOPLE {
        let person = match storage.find_person_by_email(email).await? {
            Some(person) => person,
            None => {
                inserted += 1;
                storage
                    .insert_person(Some(&company.id), name, email, Some(title))
                    .await?
            }
        };
        person_ids.push(person.id);
    }

    info!(company_id = %company.id, inserted, "demo data seeded");
    Ok(SeedSummary {
        company_id: company.id,
        person_ids,
        inserted,
    })
}
