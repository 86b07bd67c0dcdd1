//! Link hydration.
//!
//! Resolves a student's mentor and meeting references into nested objects.
//! Every linked lookup is independent and read-only, so they fan out
//! concurrently; a miss or a store error on one link degrades that link to
//! absence and never fails the request or its sibling lookups. Nothing is
//! cached: repeated hydration re-fetches every link.

use futures::future::join_all;

use crate::models::{collections, fields, HydratedMeeting, HydratedStudent, Mentor};
use crate::store::{Record, RecordStore};

pub async fn hydrate_student(store: &dyn RecordStore, student: Record) -> HydratedStudent {
    let manager_id = student.first_link(fields::RECRUITMENT_MANAGER);
    let lead_id = student.first_link(fields::LEAD_MENTOR);
    let meeting_ids = student.links(fields::MEETINGS);

    let (recruitment_manager, lead_mentor, meetings) = tokio::join!(
        fetch_mentor(store, manager_id),
        fetch_mentor(store, lead_id),
        hydrate_meetings(store, &meeting_ids),
    );

    HydratedStudent {
        id: student.id,
        fields: student.fields,
        recruitment_manager,
        lead_mentor,
        meetings,
    }
}

/// Resolve all meeting links concurrently. `join_all` keeps the output in
/// the order of `ids` no matter which lookup completes first; unresolvable
/// meetings are dropped from the sequence.
async fn hydrate_meetings(store: &dyn RecordStore, ids: &[String]) -> Vec<HydratedMeeting> {
    let lookups = ids.iter().map(|id| hydrate_meeting(store, id));
    join_all(lookups).await.into_iter().flatten().collect()
}

async fn hydrate_meeting(store: &dyn RecordStore, id: &str) -> Option<HydratedMeeting> {
    let record = match store.find_by_id(collections::MEETINGS, id).await {
        Ok(Some(record)) => record,
        Ok(None) => return None,
        Err(err) => {
            log::warn!("meeting lookup `{}` failed: {}", id, err);
            return None;
        }
    };
    let mentor_attended = fetch_mentor(store, record.first_link(fields::MENTORS_ATTENDED)).await;
    Some(HydratedMeeting {
        id: record.id,
        fields: record.fields,
        mentor_attended,
    })
}

async fn fetch_mentor(store: &dyn RecordStore, id: Option<String>) -> Option<Mentor> {
    let id = id?;
    match store.find_by_id(collections::MENTORS, &id).await {
        Ok(Some(record)) => Some(Mentor::from_record(&record)),
        Ok(None) => None,
        Err(err) => {
            log::warn!("mentor lookup `{}` failed: {}", id, err);
            None
        }
    }
}
