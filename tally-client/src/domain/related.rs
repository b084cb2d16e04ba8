use crate::domain::{Client, Project, Tag, Task, TimeEntry, Workspace};
use uuid::Uuid;

/// The one aggregate owning every entity of the logged-in user.
///
/// Cross-references between entities (entry → project, project →
/// client) are remote ids resolved through the lookups below, never
/// pointers, so pull merges can rewrite any row without invalidating
/// the rest of the graph.
#[derive(Debug, Default)]
pub struct RelatedData {
    pub workspaces: Vec<Workspace>,
    pub clients: Vec<Client>,
    pub projects: Vec<Project>,
    pub tasks: Vec<Task>,
    pub tags: Vec<Tag>,
    pub time_entries: Vec<TimeEntry>,
}

impl RelatedData {
    pub fn workspace_by_id(&self, id: u64) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.id == id)
    }

    pub fn client_by_id(&self, id: u64) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    pub fn client_by_guid(&self, guid: Uuid) -> Option<&Client> {
        self.clients.iter().find(|c| c.guid == Some(guid))
    }

    pub fn project_by_id(&self, id: u64) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn project_by_guid(&self, guid: Uuid) -> Option<&Project> {
        self.projects.iter().find(|p| p.guid == Some(guid))
    }

    pub fn project_by_name(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name == name)
    }

    pub fn task_by_id(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn tag_by_id(&self, id: u64) -> Option<&Tag> {
        self.tags.iter().find(|t| t.id == id)
    }

    pub fn tag_by_guid(&self, guid: Uuid) -> Option<&Tag> {
        self.tags.iter().find(|t| t.guid == Some(guid))
    }

    pub fn time_entry_by_id(&self, id: u64) -> Option<&TimeEntry> {
        self.time_entries.iter().find(|te| te.id != 0 && te.id == id)
    }

    pub fn time_entry_by_guid(&self, guid: Uuid) -> Option<&TimeEntry> {
        self.time_entries.iter().find(|te| te.guid == guid)
    }

    pub fn time_entry_by_guid_mut(&mut self, guid: Uuid) -> Option<&mut TimeEntry> {
        self.time_entries.iter_mut().find(|te| te.guid == guid)
    }

    /// Newest first; stable so same-second entries keep their order.
    pub fn sort_time_entries_by_start(&mut self) {
        self.time_entries.sort_by(|a, b| b.start.cmp(&a.start));
    }

    /// Everything the next batch push must carry.
    pub fn collect_pushable(&self) -> Vec<&TimeEntry> {
        self.time_entries
            .iter()
            .filter(|te| te.needs_push())
            .collect()
    }

    /// The unique entry with a negative duration, if any.
    pub fn running_time_entry(&self) -> Option<&TimeEntry> {
        self.time_entries
            .iter()
            .find(|te| te.is_running() && !te.is_marked_deleted())
    }

    /// Most recently started stopped entry; what "continue latest"
    /// picks up.
    pub fn latest_time_entry(&self) -> Option<&TimeEntry> {
        self.time_entries
            .iter()
            .filter(|te| !te.is_running() && !te.is_marked_deleted())
            .max_by_key(|te| te.start)
    }

    pub fn has_premium_workspaces(&self) -> bool {
        self.workspaces.iter().any(|w| w.premium)
    }

    pub fn active_projects(&self) -> Vec<&Project> {
        self.projects.iter().filter(|p| p.active).collect()
    }

    /// Unique tag names, sorted.
    pub fn tag_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tags.iter().map(|t| t.name.clone()).collect();
        names.sort();
        names.dedup();
        names
    }

    /// `"Task. Project. Client"`, skipping whatever is missing.
    pub fn join_task_name(
        task: Option<&Task>,
        project: Option<&Project>,
        client: Option<&Client>,
    ) -> String {
        let parts = [
            task.map(|t| t.name.as_str()),
            project.map(|p| p.name.as_str()),
            client.map(|c| c.name.as_str()),
        ];
        parts
            .into_iter()
            .flatten()
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(". ")
    }

    /// Resolve the task/project/client chain a time entry points at.
    /// A task's project takes precedence over the entry's own.
    pub fn entry_relations(
        &self,
        te: &TimeEntry,
    ) -> (Option<&Task>, Option<&Project>, Option<&Client>) {
        let task = te.tid.and_then(|tid| self.task_by_id(tid));
        let project = task
            .and_then(|t| t.pid)
            .or(te.pid)
            .and_then(|pid| self.project_by_id(pid));
        let client = project
            .and_then(|p| p.cid)
            .and_then(|cid| self.client_by_id(cid));
        (task, project, client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_common::api::{ClientData, ProjectData, TagData, TaskData};

    fn graph() -> RelatedData {
        let mut related = RelatedData::default();
        related.clients.push(Client::from_data(&ClientData {
            id: 3,
            guid: Some(Uuid::now_v7()),
            wid: 1,
            name: "Acme".into(),
        }));
        related.projects.push(Project::from_data(&ProjectData {
            id: 5,
            guid: Some(Uuid::now_v7()),
            wid: 1,
            cid: Some(3),
            name: "Rollout".into(),
            color: "#06aaf5".into(),
            active: true,
            billable: false,
        }));
        related.tasks.push(Task::from_data(&TaskData {
            id: 9,
            wid: 1,
            pid: Some(5),
            name: "Phase one".into(),
            active: true,
        }));
        related
    }

    #[test]
    fn lookups_resolve_by_id_and_guid() {
        let related = graph();
        assert_eq!(related.project_by_id(5).unwrap().name, "Rollout");
        assert_eq!(related.project_by_name("Rollout").unwrap().id, 5);
        let guid = related.projects[0].guid.unwrap();
        assert_eq!(related.project_by_guid(guid).unwrap().id, 5);
        assert!(related.project_by_id(6).is_none());
    }

    #[test]
    fn local_only_entries_do_not_collide_on_id_zero() {
        let mut related = RelatedData::default();
        related
            .time_entries
            .push(TimeEntry::new(1, "a".into(), "test".into()));
        related
            .time_entries
            .push(TimeEntry::new(1, "b".into(), "test".into()));
        assert!(related.time_entry_by_id(0).is_none());
    }

    #[test]
    fn join_task_name_skips_missing_parts() {
        let related = graph();
        let task = related.task_by_id(9);
        let project = related.project_by_id(5);
        let client = related.client_by_id(3);
        assert_eq!(
            RelatedData::join_task_name(task, project, client),
            "Phase one. Rollout. Acme"
        );
        assert_eq!(
            RelatedData::join_task_name(None, project, client),
            "Rollout. Acme"
        );
        assert_eq!(RelatedData::join_task_name(None, None, None), "");
    }

    #[test]
    fn entry_relations_prefer_task_project() {
        let mut related = graph();
        related.projects.push(Project::from_data(&ProjectData {
            id: 6,
            guid: None,
            wid: 1,
            cid: None,
            name: "Other".into(),
            color: String::new(),
            active: true,
            billable: false,
        }));
        let mut te = TimeEntry::new(1, "work".into(), "test".into());
        te.tid = Some(9);
        te.pid = Some(6);
        let (task, project, client) = related.entry_relations(&te);
        assert_eq!(task.unwrap().id, 9);
        assert_eq!(project.unwrap().id, 5);
        assert_eq!(client.unwrap().id, 3);
    }

    #[test]
    fn sort_is_descending_by_start() {
        let mut related = RelatedData::default();
        for (desc, start) in [("old", 100), ("new", 300), ("mid", 200)] {
            let mut te = TimeEntry::new(1, desc.into(), "test".into());
            te.start = start;
            related.time_entries.push(te);
        }
        related.sort_time_entries_by_start();
        let order: Vec<&str> = related
            .time_entries
            .iter()
            .map(|te| te.description.as_str())
            .collect();
        assert_eq!(order, vec!["new", "mid", "old"]);
    }

    #[test]
    fn tag_names_are_sorted_and_unique() {
        let mut related = RelatedData::default();
        for (id, name) in [(1, "work"), (2, "billable"), (3, "work")] {
            related.tags.push(Tag::from_data(&TagData {
                id,
                guid: None,
                wid: 1,
                name: name.into(),
            }));
        }
        assert_eq!(related.tag_names(), vec!["billable", "work"]);
    }
}
