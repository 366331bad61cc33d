use crate::cache::{OfflineCache, RecordKind};
use crate::logging;
use crate::redmine::{RedmineClient, RedmineError};

pub struct SeedResult {
    pub kinds_refreshed: usize,
    pub records_cached: usize,
    pub errors: Vec<String>,
}

/// Pulls projects and the server enumerations into the offline cache so
/// lists and pickers work without a connection. Failures are collected
/// per kind; the rest still seed.
pub fn seed_metadata(client: &RedmineClient, cache: &OfflineCache) -> SeedResult {
    let mut result = SeedResult {
        kinds_refreshed: 0,
        records_cached: 0,
        errors: Vec::new(),
    };

    let outcomes = [
        (RecordKind::Projects, seed(cache, RecordKind::Projects, || client.list_projects())),
        (RecordKind::Trackers, seed(cache, RecordKind::Trackers, || client.list_trackers())),
        (
            RecordKind::IssueStatuses,
            seed(cache, RecordKind::IssueStatuses, || client.list_issue_statuses()),
        ),
        (
            RecordKind::IssuePriorities,
            seed(cache, RecordKind::IssuePriorities, || client.list_issue_priorities()),
        ),
        (RecordKind::Queries, seed(cache, RecordKind::Queries, || client.list_queries())),
        (
            RecordKind::CustomFields,
            seed(cache, RecordKind::CustomFields, || client.list_custom_fields()),
        ),
    ];

    for (kind, outcome) in outcomes {
        match outcome {
            Ok(count) => {
                logging::info(format!("seeded {} {}", count, kind.as_str()));
                result.kinds_refreshed += 1;
                result.records_cached += count;
            }
            Err(err) => {
                let msg = format!("failed to seed {}: {}", kind.as_str(), err);
                logging::warn(&msg);
                result.errors.push(msg);
            }
        }
    }

    result
}

fn seed<T, F>(cache: &OfflineCache, kind: RecordKind, fetch: F) -> Result<usize, String>
where
    T: serde::Serialize,
    F: FnOnce() -> Result<Vec<T>, RedmineError>,
{
    let records = fetch().map_err(|err| err.to_string())?;
    cache.store(kind, &records).map_err(|err| err.to_string())?;
    Ok(records.len())
}
