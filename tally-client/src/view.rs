use crate::domain::{RelatedData, TimeEntry};
use crate::format::{self, Rounding};
use std::collections::HashMap;
use uuid::Uuid;

/// What the change callback carries after every committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelChange {
    pub model_type: String,
    pub kind: ChangeKind,
    pub id: u64,
    pub guid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl ModelChange {
    pub fn time_entry(kind: ChangeKind, id: u64, guid: Uuid) -> Self {
        Self::new("time_entry", kind, id, Some(guid))
    }

    pub fn new(model_type: &str, kind: ChangeKind, id: u64, guid: Option<Uuid>) -> Self {
        Self {
            model_type: model_type.to_owned(),
            kind,
            id,
            guid: guid.map(|g| g.to_string()).unwrap_or_default(),
        }
    }
}

/// A time entry flattened for display: durations formatted, relations
/// resolved into one label, tags joined back into one string.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeEntryViewItem {
    pub guid: String,
    pub description: String,
    pub project_and_task_label: String,
    pub color: String,
    pub pid: u64,
    pub tid: u64,
    pub duration_in_seconds: i64,
    pub duration: String,
    pub billable: bool,
    pub tags: String,
    pub started: i64,
    pub ended: i64,
    pub date_header: String,
    pub date_duration: String,
}

/// One row of the tracking autocomplete dropdown.
#[derive(Debug, Clone, PartialEq)]
pub struct AutocompleteItem {
    pub text: String,
    pub description: String,
    pub project_and_task_label: String,
    pub project_color: String,
    pub project_id: u64,
    pub task_id: u64,
    pub kind: AutocompleteKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutocompleteKind {
    TimeEntry,
    Task,
    Project,
}

pub fn time_entry_view_item(
    te: &TimeEntry,
    related: &RelatedData,
    now: i64,
    date_duration: &str,
) -> TimeEntryViewItem {
    let (task, project, client) = related.entry_relations(te);
    let duration = te.duration_at(now);
    TimeEntryViewItem {
        guid: te.guid.to_string(),
        description: te.description.clone(),
        project_and_task_label: RelatedData::join_task_name(task, project, client),
        color: project.map(|p| p.color.clone()).unwrap_or_default(),
        pid: project.map(|p| p.id).unwrap_or(0),
        tid: task.map(|t| t.id).unwrap_or(0),
        duration_in_seconds: te.duration_in_seconds,
        duration: format::format_hhmmss(duration),
        billable: te.billable,
        tags: te.tags_string(),
        started: te.start,
        ended: te.stop,
        date_header: te.date_header(),
        date_duration: date_duration.to_owned(),
    }
}

/// Stopped, visible entries sorted newest first, each carrying its
/// local-day rollup so the UI can print date headers directly.
pub fn time_entry_view_items(related: &RelatedData, now: i64) -> Vec<TimeEntryViewItem> {
    let mut visible: Vec<&TimeEntry> = related
        .time_entries
        .iter()
        .filter(|te| !te.is_running() && !te.is_marked_deleted())
        .collect();
    visible.sort_by(|a, b| b.start.cmp(&a.start));

    let mut date_durations: HashMap<String, i64> = HashMap::new();
    for te in &visible {
        *date_durations.entry(te.date_header()).or_default() += te.duration_in_seconds;
    }

    visible
        .into_iter()
        .map(|te| {
            let total = date_durations.get(&te.date_header()).copied().unwrap_or(0);
            let formatted = format::format_hhmm(total, Rounding::Classic);
            time_entry_view_item(te, related, now, &formatted)
        })
        .collect()
}

/// Sum of the visible durations grouped under one date header.
pub fn duration_for_date_header(related: &RelatedData, date: &str) -> i64 {
    related
        .time_entries
        .iter()
        .filter(|te| !te.is_running() && !te.is_marked_deleted() && te.date_header() == date)
        .map(|te| te.duration_in_seconds)
        .sum()
}

/// Autocomplete rows in the usual three flavors:
/// `Description - Task. Project. Client`, `Task. Project. Client`,
/// `Project. Client`. Deleted entries, inactive projects and empty
/// texts are skipped.
pub fn autocomplete_items(
    related: &RelatedData,
    include_time_entries: bool,
    include_tasks: bool,
    include_projects: bool,
) -> Vec<AutocompleteItem> {
    let mut items = Vec::new();

    if include_time_entries {
        for te in &related.time_entries {
            if te.is_marked_deleted() || te.description.is_empty() {
                continue;
            }
            let (task, project, client) = related.entry_relations(te);
            if project.map(|p| !p.active).unwrap_or(false) {
                continue;
            }
            let label = RelatedData::join_task_name(task, project, client);
            let text = if label.is_empty() {
                te.description.clone()
            } else {
                format!("{} - {}", te.description, label)
            };
            items.push(AutocompleteItem {
                text,
                description: te.description.clone(),
                project_and_task_label: label,
                project_color: project.map(|p| p.color.clone()).unwrap_or_default(),
                project_id: project.map(|p| p.id).unwrap_or(0),
                task_id: task.map(|t| t.id).unwrap_or(0),
                kind: AutocompleteKind::TimeEntry,
            });
        }
    }

    if include_tasks {
        for task in &related.tasks {
            let project = task.pid.and_then(|pid| related.project_by_id(pid));
            if project.map(|p| !p.active).unwrap_or(false) {
                continue;
            }
            let client = project
                .and_then(|p| p.cid)
                .and_then(|cid| related.client_by_id(cid));
            let text = RelatedData::join_task_name(Some(task), project, client);
            if text.is_empty() {
                continue;
            }
            items.push(AutocompleteItem {
                text: text.clone(),
                description: String::new(),
                project_and_task_label: text,
                project_color: project.map(|p| p.color.clone()).unwrap_or_default(),
                project_id: project.map(|p| p.id).unwrap_or(0),
                task_id: task.id,
                kind: AutocompleteKind::Task,
            });
        }
    }

    if include_projects {
        for project in &related.projects {
            if !project.active {
                continue;
            }
            let client = project.cid.and_then(|cid| related.client_by_id(cid));
            let text = RelatedData::join_task_name(None, Some(project), client);
            if text.is_empty() {
                continue;
            }
            items.push(AutocompleteItem {
                text: text.clone(),
                description: String::new(),
                project_and_task_label: text,
                project_color: project.color.clone(),
                project_id: project.id,
                task_id: 0,
                kind: AutocompleteKind::Project,
            });
        }
    }

    items.sort_by(|a, b| a.text.cmp(&b.text));
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Client, Project, Task};
    use tally_common::api::{ClientData, ProjectData, TaskData};

    fn related_with_entries() -> RelatedData {
        let mut related = RelatedData::default();
        related.clients.push(Client::from_data(&ClientData {
            id: 3,
            guid: None,
            wid: 1,
            name: "Acme".into(),
        }));
        related.projects.push(Project::from_data(&ProjectData {
            id: 5,
            guid: None,
            wid: 1,
            cid: Some(3),
            name: "Rollout".into(),
            color: "#06aaf5".into(),
            active: true,
            billable: false,
        }));
        related.projects.push(Project::from_data(&ProjectData {
            id: 6,
            guid: None,
            wid: 1,
            cid: None,
            name: "Retired".into(),
            color: String::new(),
            active: false,
            billable: false,
        }));
        related.tasks.push(Task::from_data(&TaskData {
            id: 9,
            wid: 1,
            pid: Some(5),
            name: "Phase one".into(),
            active: true,
        }));

        let mut a = TimeEntry::new(1, "review".into(), "test".into());
        a.start = 1_000;
        a.stop = 1_600;
        a.duration_in_seconds = 600;
        a.pid = Some(5);
        related.time_entries.push(a);

        let mut b = TimeEntry::new(1, "standup".into(), "test".into());
        b.start = 2_000;
        b.stop = 2_300;
        b.duration_in_seconds = 300;
        related.time_entries.push(b);

        related
    }

    #[test]
    fn view_items_sorted_and_rolled_up() {
        let related = related_with_entries();
        let items = time_entry_view_items(&related, 3_000);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].description, "standup");
        assert_eq!(items[1].description, "review");
        assert_eq!(items[1].project_and_task_label, "Rollout. Acme");
        assert_eq!(items[1].duration, "0:10:00");
        // Same local day, shared rollup.
        assert_eq!(items[0].date_duration, items[1].date_duration);
        assert_eq!(items[0].date_duration, "0:15");
    }

    #[test]
    fn view_items_skip_running_and_deleted() {
        let mut related = related_with_entries();
        let mut running = TimeEntry::new(1, "now".into(), "test".into());
        running.start_running(5_000);
        related.time_entries.push(running);
        related.time_entries[0].deleted_at = Some(9_000);

        let items = time_entry_view_items(&related, 6_000);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "standup");
    }

    #[test]
    fn date_header_rollup_matches() {
        let related = related_with_entries();
        let header = related.time_entries[0].date_header();
        assert_eq!(duration_for_date_header(&related, &header), 900);
        assert_eq!(duration_for_date_header(&related, "1999-01-01"), 0);
    }

    #[test]
    fn autocomplete_covers_three_kinds() {
        let related = related_with_entries();
        let items = autocomplete_items(&related, true, true, true);

        let te_items: Vec<_> = items
            .iter()
            .filter(|i| i.kind == AutocompleteKind::TimeEntry)
            .collect();
        assert_eq!(te_items.len(), 2);
        assert!(items
            .iter()
            .any(|i| i.text == "review - Rollout. Acme" && i.project_id == 5));
        assert!(items
            .iter()
            .any(|i| i.kind == AutocompleteKind::Task && i.text == "Phase one. Rollout. Acme"));
        assert!(items
            .iter()
            .any(|i| i.kind == AutocompleteKind::Project && i.text == "Rollout. Acme"));
        // Inactive project is not offered.
        assert!(!items.iter().any(|i| i.text.contains("Retired")));

        let sorted: Vec<_> = items.iter().map(|i| i.text.clone()).collect();
        let mut expected = sorted.clone();
        expected.sort();
        assert_eq!(sorted, expected);
    }
}
