//! Schema gate for researched payloads.
//!
//! Nothing reaches storage without passing [`validate`]. Violations are
//! reported per field in a [`FieldErrors`] map.

use std::collections::HashSet;

use leadscout_shared::{FieldErrors, ResearchField, ResearchFieldSet, ResearchResult};
use serde_json::Value;
use url::Url;

const VALUE_PROP_REQUIRED: &str = "Company value proposition is required.";
const PRODUCTS_REQUIRED: &str = "At least one product name is required.";
const PRICING_REQUIRED: &str = "Pricing model is required.";
const COMPETITORS_REQUIRED: &str = "At least one competitor is required.";
const DOMAIN_INVALID: &str = "A valid company domain URL is required.";

/// Normalize a partial field set into a full payload.
///
/// Strings are trimmed, sequences are de-duplicated keeping first
/// occurrence order, and absent fields become `""` / `[]`.
pub fn clean(fields: &ResearchFieldSet) -> ResearchResult {
    ResearchResult {
        company_value_prop: trimmed(&fields.company_value_prop),
        product_names: dedup(&fields.product_names),
        pricing_model: trimmed(&fields.pricing_model),
        key_competitors: dedup(&fields.key_competitors),
        company_domain: trimmed(&fields.company_domain),
    }
}

fn trimmed(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn dedup(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

/// Check a cleaned payload against the persisted contract.
pub fn validate(payload: &ResearchResult) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::default();

    if payload.company_value_prop.is_empty() {
        errors.add(ResearchField::CompanyValueProp.as_str(), VALUE_PROP_REQUIRED);
    }
    if payload.product_names.is_empty() {
        errors.add(ResearchField::ProductNames.as_str(), PRODUCTS_REQUIRED);
    }
    if payload.pricing_model.is_empty() {
        errors.add(ResearchField::PricingModel.as_str(), PRICING_REQUIRED);
    }
    if payload.key_competitors.is_empty() {
        errors.add(ResearchField::KeyCompetitors.as_str(), COMPETITORS_REQUIRED);
    }
    if Url::parse(&payload.company_domain).is_err() {
        errors.add(ResearchField::CompanyDomain.as_str(), DOMAIN_INVALID);
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// Validate an arbitrary JSON document (keys are case-sensitive).
///
/// Type mismatches and missing keys are reported per field before the
/// content rules of [`validate`] are applied.
pub fn validate_value(value: &Value) -> Result<ResearchResult, FieldErrors> {
    let mut errors = FieldErrors::default();
    let Some(object) = value.as_object() else {
        errors.add("_root", "Expected object.");
        return Err(errors);
    };

    for field in ResearchField::ALL {
        let key = field.as_str();
        match object.get(key) {
            None | Some(Value::Null) => errors.add(key, "Required"),
            Some(Value::String(_)) if !field.is_list() => {}
            Some(Value::Array(items)) if field.is_list() => {
                if !items.iter().all(Value::is_string) {
                    errors.add(key, "Expected array of strings.");
                }
            }
            Some(_) if field.is_list() => errors.add(key, "Expected array of strings."),
            Some(_) => errors.add(key, "Expected string."),
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let payload: ResearchResult = serde_json::from_value(value.clone()).map_err(|e| {
        let mut errors = FieldErrors::default();
        errors.add("_root", e.to_string());
        errors
    })?;
    validate(&payload)?;
    Ok(payload)
}
