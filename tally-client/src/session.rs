use crate::domain::{RelatedData, TimeEntry};
use crate::error::EngineError;
use crate::format;
use tally_common::api::UserData;
use tracing::{debug, warn};
use uuid::Uuid;

/// The logged-in user: identity, sync cursor and the owned entity
/// graph. Every time-entry lifecycle operation lives here so that the
/// running-entry invariant has a single enforcement point.
#[derive(Debug)]
pub struct Session {
    pub local_id: i64,
    pub id: u64,
    pub api_token: String,
    pub email: String,
    pub fullname: String,
    pub default_wid: u64,
    /// Server cursor of the last successful pull.
    pub since: u64,
    pub record_timeline: bool,
    pub store_start_and_stop_time: bool,
    /// Needs a store write.
    pub dirty: bool,
    pub app_name: String,
    pub app_version: String,
    pub related: RelatedData,
}

impl Session {
    pub fn new(app_name: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            local_id: 0,
            id: 0,
            api_token: String::new(),
            email: String::new(),
            fullname: String::new(),
            default_wid: 0,
            since: 0,
            record_timeline: false,
            store_start_and_stop_time: true,
            dirty: false,
            app_name: app_name.into(),
            app_version: app_version.into(),
            related: RelatedData::default(),
        }
    }

    /// The `created_with` stamp for entries born on this client.
    pub fn created_with(&self) -> String {
        format!("{}/{}", self.app_name, self.app_version)
    }

    /// Adopt the identity fields of a pulled or logged-in user payload.
    pub fn apply_identity(&mut self, data: &UserData) {
        self.id = data.id;
        if let Some(token) = &data.api_token {
            self.api_token = token.clone();
        }
        self.email = data.email.clone();
        self.fullname = data.fullname.clone();
        self.default_wid = data.default_wid;
        self.record_timeline = data.record_timeline;
        self.store_start_and_stop_time = data.store_start_and_stop_time;
        self.dirty = true;
    }

    pub fn set_record_timeline(&mut self, value: bool) {
        if self.record_timeline != value {
            self.record_timeline = value;
            self.dirty = true;
        }
    }

    pub fn has_premium_workspaces(&self) -> bool {
        self.related.has_premium_workspaces()
    }

    fn default_workspace(&self) -> u64 {
        if self.default_wid > 0 {
            self.default_wid
        } else {
            self.related.workspaces.first().map(|w| w.id).unwrap_or(0)
        }
    }

    /// Start tracking. Stops whatever was running first, then creates
    /// a fresh entry: running when `duration` is empty, a completed
    /// `[now - duration, now]` block otherwise.
    pub fn start(
        &mut self,
        description: &str,
        duration: &str,
        task_id: u64,
        project_id: u64,
        now: i64,
    ) -> Result<Uuid, EngineError> {
        self.stop(now);

        let project = (project_id > 0).then(|| self.related.project_by_id(project_id));
        let wid = project
            .flatten()
            .map(|p| p.wid)
            .unwrap_or_else(|| self.default_workspace());
        let billable = project.flatten().map(|p| p.billable).unwrap_or(false);

        let mut te = TimeEntry::new(wid, description.to_owned(), self.created_with());
        te.pid = (project_id > 0).then_some(project_id);
        te.tid = (task_id > 0).then_some(task_id);
        te.billable = billable;

        if duration.trim().is_empty() {
            te.start_running(now);
        } else {
            let seconds = format::parse_duration(duration);
            te.stop = now;
            te.start = now - seconds;
            te.duration_in_seconds = seconds;
        }
        te.touch(now as u64);

        let guid = te.guid;
        debug!(%guid, "started time entry");
        self.related.time_entries.push(te);
        Ok(guid)
    }

    /// Stop every running entry. Normally that is one; more than one
    /// means the invariant was broken elsewhere, so stop them all and
    /// say so.
    pub fn stop(&mut self, now: i64) -> Vec<Uuid> {
        let mut stopped: Vec<(i64, Uuid)> = Vec::new();
        for te in &mut self.related.time_entries {
            if te.is_running() && !te.is_marked_deleted() {
                te.stop_running(now);
                stopped.push((te.start, te.guid));
            }
        }
        if stopped.len() > 1 {
            warn!(count = stopped.len(), "multiple running entries stopped");
        }
        stopped.sort_by_key(|(start, _)| *start);
        stopped.into_iter().map(|(_, guid)| guid).collect()
    }

    /// Stop the running entry at an explicit time.
    pub fn stop_at(&mut self, at: i64) -> Result<Uuid, EngineError> {
        let te = self
            .related
            .time_entries
            .iter_mut()
            .find(|te| te.is_running() && !te.is_marked_deleted())
            .ok_or_else(|| EngineError::user_input("No running time entry"))?;
        if at <= te.start {
            return Err(EngineError::user_input("Stop time must be after start"));
        }
        te.stop_running(at);
        Ok(te.guid)
    }

    /// Continue a stopped entry. When start/stop times are not kept
    /// and the entry is from today it is resumed in place; otherwise a
    /// fresh clone starts running.
    pub fn continue_entry(&mut self, guid: Uuid, now: i64) -> Result<Uuid, EngineError> {
        let target = self
            .related
            .time_entry_by_guid(guid)
            .ok_or_else(|| EngineError::user_input("Time entry not found"))?;
        if target.is_running() {
            return Ok(target.guid);
        }

        let extend_in_place =
            !self.store_start_and_stop_time && target.date_header() == format::date_header(now);

        self.stop(now);

        if extend_in_place {
            let te = self
                .related
                .time_entry_by_guid_mut(guid)
                .ok_or_else(|| EngineError::Internal("continued entry vanished".into()))?;
            te.stop = 0;
            te.duration_in_seconds = -now;
            te.touch(now as u64);
            return Ok(te.guid);
        }

        let source = self
            .related
            .time_entry_by_guid(guid)
            .ok_or_else(|| EngineError::Internal("continued entry vanished".into()))?;
        let mut te = TimeEntry::new(
            source.wid,
            source.description.clone(),
            self.created_with(),
        );
        te.pid = source.pid;
        te.tid = source.tid;
        te.billable = source.billable;
        te.tags = source.tags.clone();
        te.start_running(now);
        te.touch(now as u64);

        let new_guid = te.guid;
        self.related.time_entries.push(te);
        Ok(new_guid)
    }

    /// Continue whatever ran last. `None` when the graph has nothing
    /// to continue.
    pub fn continue_latest(&mut self, now: i64) -> Result<Option<Uuid>, EngineError> {
        match self.related.latest_time_entry().map(|te| te.guid) {
            Some(guid) => self.continue_entry(guid, now).map(Some),
            None => Ok(None),
        }
    }

    /// Cut the running entry at `at`: the old part stops there, a new
    /// running entry with the same metadata picks up from there.
    pub fn split_at(&mut self, at: i64) -> Result<Uuid, EngineError> {
        let running = self
            .related
            .time_entries
            .iter_mut()
            .find(|te| te.is_running() && !te.is_marked_deleted())
            .ok_or_else(|| EngineError::user_input("No running time entry"))?;
        if at <= running.start {
            return Err(EngineError::user_input("Split time must be after start"));
        }
        running.stop_running(at);

        let source = running.clone();
        let mut te = TimeEntry::new(
            source.wid,
            source.description.clone(),
            self.created_with(),
        );
        te.pid = source.pid;
        te.tid = source.tid;
        te.billable = source.billable;
        te.tags = source.tags;
        te.start_running(at);
        te.touch(at as u64);

        let guid = te.guid;
        self.related.time_entries.push(te);
        Ok(guid)
    }

    /// Tombstone an entry. Entries the server never saw are purged
    /// outright; there is nothing to confirm.
    pub fn delete_entry(&mut self, guid: Uuid, now: i64) -> Result<(), EngineError> {
        let te = self
            .related
            .time_entry_by_guid_mut(guid)
            .ok_or_else(|| EngineError::user_input("Time entry not found"))?;
        te.mark_deleted(now);
        if te.id == 0 {
            te.confirmed_deleted = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("tally", "0.1.0")
    }

    #[test]
    fn start_creates_a_single_running_entry() {
        let mut s = session();
        let now = 1_700_000_000;
        let guid = s.start("write spec", "", 0, 0, now).unwrap();

        let te = s.related.time_entry_by_guid(guid).unwrap();
        assert_eq!(te.description, "write spec");
        assert_eq!(te.start, now);
        assert!(te.duration_in_seconds < 0);
        assert_eq!(te.id, 0);
        assert!(te.ui_modified_at > 0);

        let running: Vec<_> = s
            .related
            .time_entries
            .iter()
            .filter(|te| te.is_running())
            .collect();
        assert_eq!(running.len(), 1);
    }

    #[test]
    fn start_stops_the_previous_entry() {
        let mut s = session();
        let first = s.start("one", "", 0, 0, 1_000).unwrap();
        let second = s.start("two", "", 0, 0, 1_060).unwrap();

        let one = s.related.time_entry_by_guid(first).unwrap();
        assert!(!one.is_running());
        assert_eq!(one.stop, 1_060);
        assert_eq!(one.duration_in_seconds, 60);

        let two = s.related.time_entry_by_guid(second).unwrap();
        assert!(two.is_running());
    }

    #[test]
    fn start_with_duration_creates_a_completed_block() {
        let mut s = session();
        let now = 2_000_000;
        let guid = s.start("meeting", "0:30:00", 0, 0, now).unwrap();
        let te = s.related.time_entry_by_guid(guid).unwrap();
        assert!(!te.is_running());
        assert_eq!(te.stop, now);
        assert_eq!(te.start, now - 1_800);
        assert_eq!(te.duration_in_seconds, 1_800);
    }

    #[test]
    fn stop_round_trip() {
        let mut s = session();
        let guid = s.start("write spec", "", 0, 0, 1_000).unwrap();
        let stopped = s.stop(1_003);
        assert_eq!(stopped, vec![guid]);

        let te = s.related.time_entry_by_guid(guid).unwrap();
        assert_eq!(te.stop, 1_003);
        assert_eq!(te.duration_in_seconds, 3);
        assert!(te.ui_modified_at > 0);

        assert!(s.stop(1_004).is_empty());
    }

    #[test]
    fn stop_at_rejects_times_before_start() {
        let mut s = session();
        s.start("work", "", 0, 0, 1_000).unwrap();
        assert!(matches!(
            s.stop_at(999),
            Err(EngineError::UserInput(_))
        ));
        assert!(s.stop_at(1_001).is_ok());
        assert!(matches!(s.stop_at(2_000), Err(EngineError::UserInput(_))));
    }

    #[test]
    fn continue_clones_metadata() {
        let mut s = session();
        let orig = s.start("deep work", "", 0, 0, 1_000).unwrap();
        {
            let te = s.related.time_entry_by_guid_mut(orig).unwrap();
            te.set_tags_string("focus;billing", 1_001);
            te.billable = true;
        }
        s.stop(1_100);

        let cont = s.continue_entry(orig, 2_000).unwrap();
        assert_ne!(cont, orig);
        let te = s.related.time_entry_by_guid(cont).unwrap();
        assert!(te.is_running());
        assert_eq!(te.description, "deep work");
        assert_eq!(te.tags, vec!["focus", "billing"]);
        assert!(te.billable);
    }

    #[test]
    fn continue_running_entry_is_a_noop() {
        let mut s = session();
        let guid = s.start("work", "", 0, 0, 1_000).unwrap();
        let count = s.related.time_entries.len();
        assert_eq!(s.continue_entry(guid, 1_100).unwrap(), guid);
        assert_eq!(s.related.time_entries.len(), count);
    }

    #[test]
    fn continue_latest_with_empty_graph_finds_nothing() {
        let mut s = session();
        assert_eq!(s.continue_latest(1_000).unwrap(), None);
        assert!(s.related.time_entries.is_empty());
    }

    #[test]
    fn split_keeps_exactly_one_running_entry() {
        let mut s = session();
        let orig = s.start("long haul", "", 0, 0, 1_000).unwrap();
        {
            let te = s.related.time_entry_by_guid_mut(orig).unwrap();
            te.pid = Some(5);
            te.set_tags_string("ops", 1_001);
        }

        let new = s.split_at(1_030).unwrap();

        let old = s.related.time_entry_by_guid(orig).unwrap();
        assert!(!old.is_running());
        assert_eq!(old.stop, 1_030);
        assert_eq!(old.duration_in_seconds, 30);
        assert!(old.ui_modified_at > 0);

        let fresh = s.related.time_entry_by_guid(new).unwrap();
        assert!(fresh.is_running());
        assert_eq!(fresh.start, 1_030);
        assert_eq!(fresh.description, "long haul");
        assert_eq!(fresh.pid, Some(5));
        assert_eq!(fresh.tags, vec!["ops"]);
        assert!(fresh.ui_modified_at > 0);

        let running: Vec<_> = s
            .related
            .time_entries
            .iter()
            .filter(|te| te.is_running())
            .collect();
        assert_eq!(running.len(), 1);
    }

    #[test]
    fn split_requires_a_running_entry() {
        let mut s = session();
        assert!(matches!(s.split_at(100), Err(EngineError::UserInput(_))));
    }

    #[test]
    fn delete_tombstones_pushed_entries() {
        let mut s = session();
        let guid = s.start("done", "", 0, 0, 1_000).unwrap();
        s.stop(1_100);
        s.related.time_entry_by_guid_mut(guid).unwrap().id = 9;

        s.delete_entry(guid, 1_200).unwrap();
        let te = s.related.time_entry_by_guid(guid).unwrap();
        assert!(te.deleted_at.is_some());
        assert!(!te.confirmed_deleted);
        assert!(te.needs_push());
    }

    #[test]
    fn delete_purges_never_pushed_entries() {
        let mut s = session();
        let guid = s.start("oops", "", 0, 0, 1_000).unwrap();
        s.delete_entry(guid, 1_001).unwrap();
        let te = s.related.time_entry_by_guid(guid).unwrap();
        assert!(te.confirmed_deleted);
        assert!(!te.needs_push());
    }

    #[test]
    fn pushable_skips_synced_entries() {
        let mut s = session();
        let guid = s.start("synced", "", 0, 0, 1_000).unwrap();
        s.stop(1_100);
        {
            let te = s.related.time_entry_by_guid_mut(guid).unwrap();
            te.id = 42;
            te.ui_modified_at = 0;
        }
        assert!(s.related.collect_pushable().is_empty());
    }
}
