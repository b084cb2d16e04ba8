use crate::format;
use tally_common::api::TimeEntryData;
use uuid::Uuid;

/// A single tracked stretch of time.
///
/// Identity is threefold: `local_id` is assigned by the store and never
/// leaves this machine, `id` is the server's id (0 until the first
/// confirmed push), `guid` is generated here at creation and correlates
/// the two worlds. A negative `duration_in_seconds` marks the entry as
/// running since `-duration_in_seconds`; the server speaks that
/// convention and we keep it verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeEntry {
    pub local_id: i64,
    pub id: u64,
    pub guid: Uuid,
    pub wid: u64,
    pub pid: Option<u64>,
    pub tid: Option<u64>,
    pub description: String,
    pub tags: Vec<String>,
    pub billable: bool,
    pub start: i64,
    pub stop: i64,
    pub duration_in_seconds: i64,
    pub created_with: String,
    /// Unix seconds of the last local edit; non-zero means the entry
    /// awaits a push and wins pull conflicts.
    pub ui_modified_at: u64,
    /// Deletion timestamp reported by the server.
    pub server_deleted_at: Option<i64>,
    /// Local tombstone; the entry is hidden but kept around until the
    /// server confirms the delete.
    pub deleted_at: Option<i64>,
    /// Needs a store write.
    pub dirty: bool,
    /// Server confirmed the delete; the row is purged on next save.
    pub confirmed_deleted: bool,
    /// Message of a rejected push, kept for the UI until the user
    /// corrects the entry.
    pub validation_error: Option<String>,
}

impl TimeEntry {
    pub fn new(wid: u64, description: String, created_with: String) -> Self {
        Self {
            local_id: 0,
            id: 0,
            guid: Uuid::now_v7(),
            wid,
            pid: None,
            tid: None,
            description,
            tags: Vec::new(),
            billable: false,
            start: 0,
            stop: 0,
            duration_in_seconds: 0,
            created_with,
            ui_modified_at: 0,
            server_deleted_at: None,
            deleted_at: None,
            dirty: true,
            confirmed_deleted: false,
            validation_error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.duration_in_seconds < 0
    }

    pub fn is_marked_deleted(&self) -> bool {
        self.deleted_at.is_some() || self.server_deleted_at.is_some()
    }

    /// Whether the entry belongs in the next batch push: locally
    /// edited, never pushed, or tombstoned awaiting confirmation.
    pub fn needs_push(&self) -> bool {
        if self.confirmed_deleted {
            return false;
        }
        self.ui_modified_at > 0 || self.id == 0 || self.deleted_at.is_some()
    }

    /// Seconds tracked so far, resolving the running sign convention.
    pub fn duration_at(&self, now: i64) -> i64 {
        if self.is_running() {
            now + self.duration_in_seconds
        } else {
            self.duration_in_seconds
        }
    }

    pub fn date_header(&self) -> String {
        format::date_header(self.start)
    }

    pub fn tags_string(&self) -> String {
        self.tags.join(";")
    }

    /// Record a local edit; refreshes the conflict clock and flags the
    /// row for persisting.
    pub fn touch(&mut self, at: u64) {
        // ui_modified_at must strictly increase even within one second.
        self.ui_modified_at = at.max(self.ui_modified_at + 1);
        self.dirty = true;
    }

    pub fn start_running(&mut self, at: i64) {
        self.start = at;
        self.stop = 0;
        self.duration_in_seconds = -at;
        self.dirty = true;
    }

    /// Stop at `at`. No-op on entries that are not running.
    pub fn stop_running(&mut self, at: i64) {
        if !self.is_running() {
            return;
        }
        self.stop = at;
        self.duration_in_seconds = at - self.start;
        self.touch(at as u64);
    }

    pub fn mark_deleted(&mut self, at: i64) {
        self.deleted_at = Some(at);
        self.touch(at as u64);
    }

    // Typed setters: each one flips the entry to locally-edited only
    // when the value actually changes, and reports whether it did.

    pub fn set_description(&mut self, value: &str, now: u64) -> bool {
        if self.description == value {
            return false;
        }
        self.description = value.to_owned();
        self.touch(now);
        true
    }

    /// Parse and apply a duration string. On a stopped entry the stop
    /// moves; on a running one the start moves so that the elapsed
    /// time matches.
    pub fn set_duration_string(&mut self, value: &str, now: i64) -> bool {
        let seconds = format::parse_duration(value);
        if seconds == self.duration_at(now) {
            return false;
        }
        if self.is_running() {
            self.start = now - seconds;
            self.duration_in_seconds = -self.start;
        } else {
            self.duration_in_seconds = seconds;
            self.stop = self.start + seconds;
        }
        self.touch(now as u64);
        true
    }

    pub fn set_start(&mut self, at: i64, now: u64) -> bool {
        if self.start == at {
            return false;
        }
        self.start = at;
        if self.is_running() {
            self.duration_in_seconds = -at;
        } else if self.stop > 0 {
            self.duration_in_seconds = self.stop - self.start;
        }
        self.touch(now);
        true
    }

    pub fn set_stop(&mut self, at: i64, now: u64) -> bool {
        if self.stop == at {
            return false;
        }
        self.stop = at;
        if !self.is_running() {
            self.duration_in_seconds = self.stop - self.start;
        }
        self.touch(now);
        true
    }

    /// Replace the tag list from a semicolon-joined string, preserving
    /// order and dropping empty segments.
    pub fn set_tags_string(&mut self, value: &str, now: u64) -> bool {
        let tags: Vec<String> = value
            .split(';')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();
        if self.tags == tags {
            return false;
        }
        self.tags = tags;
        self.touch(now);
        true
    }

    pub fn set_billable(&mut self, value: bool, now: u64) -> bool {
        if self.billable == value {
            return false;
        }
        self.billable = value;
        self.touch(now);
        true
    }

    pub fn set_pid(&mut self, pid: Option<u64>, now: u64) -> bool {
        if self.pid == pid {
            return false;
        }
        self.pid = pid;
        self.touch(now);
        true
    }

    pub fn set_tid(&mut self, tid: Option<u64>, now: u64) -> bool {
        if self.tid == tid {
            return false;
        }
        self.tid = tid;
        self.touch(now);
        true
    }

    // Wire conversions.

    pub fn from_data(data: &TimeEntryData) -> Self {
        Self {
            local_id: 0,
            id: data.id,
            // Entries born on other clients may come without a guid;
            // assign one so local correlation always works.
            guid: data.guid.unwrap_or_else(Uuid::now_v7),
            wid: data.wid,
            pid: data.pid,
            tid: data.tid,
            description: data.description.clone(),
            tags: data.tags.clone(),
            billable: data.billable,
            start: data.start,
            stop: data.stop,
            duration_in_seconds: data.duration,
            created_with: data.created_with.clone().unwrap_or_default(),
            ui_modified_at: 0,
            server_deleted_at: data.server_deleted_at,
            deleted_at: None,
            dirty: true,
            confirmed_deleted: false,
            validation_error: None,
        }
    }

    /// Server-wins overwrite during a pull. Keeps local identity
    /// (local id, guid) and the local tombstone.
    pub fn update_from(&mut self, data: &TimeEntryData) {
        let incoming = Self {
            local_id: self.local_id,
            guid: self.guid,
            deleted_at: self.deleted_at,
            dirty: self.dirty,
            confirmed_deleted: self.confirmed_deleted,
            validation_error: self.validation_error.clone(),
            ..Self::from_data(data)
        };
        if *self != incoming {
            *self = Self {
                dirty: true,
                ..incoming
            };
        }
    }

    pub fn to_data(&self) -> TimeEntryData {
        TimeEntryData {
            id: self.id,
            guid: Some(self.guid),
            wid: self.wid,
            pid: self.pid,
            tid: self.tid,
            description: self.description.clone(),
            tags: self.tags.clone(),
            billable: self.billable,
            start: self.start,
            stop: self.stop,
            duration: self.duration_in_seconds,
            created_with: Some(self.created_with.clone()),
            server_deleted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> TimeEntry {
        TimeEntry::new(1, "write tests".into(), "tally/0.1.0".into())
    }

    #[test]
    fn new_entry_is_push_pending_without_edits() {
        let te = entry();
        assert_eq!(te.id, 0);
        assert_eq!(te.ui_modified_at, 0);
        assert!(te.needs_push());
    }

    #[test]
    fn running_sign_convention() {
        let mut te = entry();
        te.start_running(1_000);
        assert!(te.is_running());
        assert_eq!(te.duration_at(1_060), 60);

        te.stop_running(1_090);
        assert!(!te.is_running());
        assert_eq!(te.duration_in_seconds, 90);
        assert_eq!(te.stop, 1_090);
        assert!(te.ui_modified_at > 0);
    }

    #[test]
    fn stop_running_ignores_stopped_entries() {
        let mut te = entry();
        te.start = 100;
        te.stop = 200;
        te.duration_in_seconds = 100;
        te.stop_running(300);
        assert_eq!(te.stop, 200);
        assert_eq!(te.ui_modified_at, 0);
    }

    #[test]
    fn setters_only_touch_on_change() {
        let mut te = entry();
        assert!(!te.set_description("write tests", 10));
        assert_eq!(te.ui_modified_at, 0);

        assert!(te.set_description("write more tests", 10));
        let first = te.ui_modified_at;
        assert!(first > 0);

        assert!(te.set_billable(true, 10));
        assert!(te.ui_modified_at > first, "edit clock must increase");
    }

    #[test]
    fn duration_string_moves_stop_on_stopped_entry() {
        let mut te = entry();
        te.start = 1_000;
        te.stop = 1_060;
        te.duration_in_seconds = 60;
        assert!(te.set_duration_string("0:05:00", 2_000));
        assert_eq!(te.duration_in_seconds, 300);
        assert_eq!(te.stop, 1_300);
    }

    #[test]
    fn duration_string_moves_start_on_running_entry() {
        let mut te = entry();
        te.start_running(1_000);
        assert!(te.set_duration_string("0:01:00", 1_030));
        assert_eq!(te.start, 970);
        assert_eq!(te.duration_at(1_030), 60);
        assert!(te.is_running());
    }

    #[test]
    fn tags_round_trip_semicolons() {
        let mut te = entry();
        assert!(te.set_tags_string("alpha; beta ;;gamma", 5));
        assert_eq!(te.tags, vec!["alpha", "beta", "gamma"]);
        assert_eq!(te.tags_string(), "alpha;beta;gamma");
        assert!(!te.set_tags_string("alpha;beta;gamma", 6));
    }

    #[test]
    fn update_from_preserves_identity_and_tombstone() {
        let mut te = entry();
        te.local_id = 7;
        te.id = 42;
        te.deleted_at = Some(900);
        let guid = te.guid;

        let mut data = te.to_data();
        data.guid = None;
        data.description = "server copy".into();
        te.update_from(&data);

        assert_eq!(te.local_id, 7);
        assert_eq!(te.guid, guid);
        assert_eq!(te.deleted_at, Some(900));
        assert_eq!(te.description, "server copy");
        assert_eq!(te.ui_modified_at, 0);
    }
}
