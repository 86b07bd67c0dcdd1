use lazy_static::lazy_static;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::store::{Filter, Record, RecordStore, StoreError};

/// Collection names in the external record store.
pub mod collections {
    pub const STUDENTS: &str = "Students";
    pub const MENTORS: &str = "Mentors";
    pub const MEETINGS: &str = "Meetings";
}

/// Field names the portal reads from record field bags.
pub mod fields {
    pub const EMAIL: &str = "Email";
    pub const NAME: &str = "Name";
    pub const PREFERRED_NAME: &str = "Preferred Name";
    pub const RECRUITMENT_MANAGER: &str = "Recruitment Manager";
    pub const LEAD_MENTOR: &str = "Lead Mentor";
    pub const MEETINGS: &str = "Student-Mentor Meetings";
    pub const MENTORS_ATTENDED: &str = "Mentors Attended";
    pub const STATUS: &str = "Status";
    pub const COMPANY: &str = "Company";
    pub const ROLE: &str = "Role";
    pub const SKILLS: &str = "Skills";
    pub const LINKEDIN: &str = "LinkedIn";
    pub const BIO: &str = "Bio";
}

lazy_static! {
    /// Student fields clients may patch through `/student/update`. Anything
    /// outside this set is silently dropped from the patch.
    static ref ALLOWED_UPDATE_FIELDS: HashSet<&'static str> = [
        fields::PREFERRED_NAME,
        "Phone",
        fields::LINKEDIN,
        "Resume Link",
        "Goals",
        "Notes",
    ]
    .into_iter()
    .collect();
}

/// Keep only allow-listed keys of an update payload.
pub fn filter_updates(updates: &Value) -> Map<String, Value> {
    let mut kept = Map::new();
    if let Some(patch) = updates.as_object() {
        for (key, value) in patch {
            if ALLOWED_UPDATE_FIELDS.contains(key.as_str()) {
                kept.insert(key.clone(), value.clone());
            }
        }
    }
    kept
}

/// Minimal identity handed back alongside a freshly minted session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdentity {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
}

impl StudentIdentity {
    pub fn from_record(record: &Record) -> Self {
        let name = record.field_str(fields::NAME).map(str::to_string);
        let first_name = record
            .field_str(fields::PREFERRED_NAME)
            .map(str::to_string)
            .or_else(|| {
                name.as_deref()
                    .and_then(|n| n.split_whitespace().next())
                    .map(str::to_string)
            });
        Self {
            id: record.id.clone(),
            email: crate::auth::normalize_email(record.field_str(fields::EMAIL).unwrap_or("")),
            name,
            first_name,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Mentor {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

impl Mentor {
    pub fn from_record(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            name: record.field_str(fields::NAME).map(str::to_string),
            company: record.field_str(fields::COMPANY).map(str::to_string),
            role: record.field_str(fields::ROLE).map(str::to_string),
            skills: string_list(record.fields.get(fields::SKILLS)),
            email: record.field_str(fields::EMAIL).map(str::to_string),
            linkedin: record.field_str(fields::LINKEDIN).map(str::to_string),
            bio: record.field_str(fields::BIO).map(str::to_string),
        }
    }

    /// Active unless the record says otherwise. A missing status must not
    /// hide a mentor from the directory.
    pub fn record_is_active(record: &Record) -> bool {
        match record.field_str(fields::STATUS) {
            Some(status) => status.eq_ignore_ascii_case("active"),
            None => true,
        }
    }
}

/// Multi-select fields arrive as arrays of strings; tolerate a single plain
/// string as well.
fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        ),
        Value::String(single) => Some(vec![single.clone()]),
        _ => None,
    }
}

/// A meeting with its first attending mentor resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HydratedMeeting {
    pub id: String,
    pub fields: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentor_attended: Option<Mentor>,
}

/// Request-scoped composite of a student record and its resolved links.
/// Never persisted; every request re-resolves from the record store.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HydratedStudent {
    pub id: String,
    pub fields: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recruitment_manager: Option<Mentor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_mentor: Option<Mentor>,
    pub meetings: Vec<HydratedMeeting>,
}

/// Look up the single student owning `email`. The caller normalizes the
/// email first; the fold-case filter tolerates irregular stored values.
pub async fn find_student_by_email(
    store: &dyn RecordStore,
    email: &str,
) -> Result<Option<Record>, StoreError> {
    let found = store
        .find(
            collections::STUDENTS,
            Some(Filter::eq_ci(fields::EMAIL, email)),
            Some(1),
        )
        .await?;
    Ok(found.into_iter().next())
}
