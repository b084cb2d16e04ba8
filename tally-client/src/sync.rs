use crate::api_client::ApiClient;
use crate::database::Database;
use crate::domain::{Client, Project, Tag, Task, TimeEntry, Workspace};
use crate::error::EngineError;
use crate::session::Session;
use crate::view::{ChangeKind, ModelChange};
use std::cmp::min;
use std::time::Duration;
use tally_common::api::{BatchUpdate, BatchUpdateResult, TimeEntryBody, UserData};
use tracing::{debug, warn};
use uuid::Uuid;

/// Retry schedule for failed pushes and pulls: 1s, 2s, 4s, ... capped
/// at 60s, reset by any success.
#[derive(Debug, Default)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    const CAP: Duration = Duration::from_secs(60);

    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(&self) -> Duration {
        min(Duration::from_secs(1 << min(self.attempt, 6)), Self::CAP)
    }

    pub fn bump(&mut self) {
        self.attempt = min(self.attempt + 1, 6);
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Merge a pulled user payload into the session graph.
///
/// Per incoming record: match by guid first, then by remote id. Unknown
/// records are inserted clean. Known records are overwritten only when
/// the local copy has no pending edit (`ui_modified_at == 0`); local
/// edits win and stay queued for push. Server-side deletions tombstone
/// the local copy, purging it immediately when nothing dirty is lost.
pub fn merge_user_data(session: &mut Session, data: &UserData, since: u64) -> Vec<ModelChange> {
    let mut changes = Vec::new();

    session.apply_identity(data);

    if let Some(workspaces) = &data.workspaces {
        for incoming in workspaces {
            match session
                .related
                .workspaces
                .iter_mut()
                .find(|w| w.id == incoming.id)
            {
                Some(ws) => {
                    ws.update_from(incoming);
                    changes.push(ModelChange::new("workspace", ChangeKind::Update, ws.id, None));
                }
                None => {
                    session.related.workspaces.push(Workspace::from_data(incoming));
                    changes.push(ModelChange::new(
                        "workspace",
                        ChangeKind::Insert,
                        incoming.id,
                        None,
                    ));
                }
            }
        }
    }

    if let Some(clients) = &data.clients {
        for incoming in clients {
            let found = session.related.clients.iter_mut().find(|c| {
                (incoming.guid.is_some() && c.guid == incoming.guid) || c.id == incoming.id
            });
            match found {
                Some(client) => {
                    client.update_from(incoming);
                    changes.push(ModelChange::new(
                        "client",
                        ChangeKind::Update,
                        client.id,
                        client.guid,
                    ));
                }
                None => {
                    session.related.clients.push(Client::from_data(incoming));
                    changes.push(ModelChange::new(
                        "client",
                        ChangeKind::Insert,
                        incoming.id,
                        incoming.guid,
                    ));
                }
            }
        }
    }

    if let Some(projects) = &data.projects {
        for incoming in projects {
            let found = session.related.projects.iter_mut().find(|p| {
                (incoming.guid.is_some() && p.guid == incoming.guid) || p.id == incoming.id
            });
            match found {
                Some(project) => {
                    project.update_from(incoming);
                    changes.push(ModelChange::new(
                        "project",
                        ChangeKind::Update,
                        project.id,
                        project.guid,
                    ));
                }
                None => {
                    session.related.projects.push(Project::from_data(incoming));
                    changes.push(ModelChange::new(
                        "project",
                        ChangeKind::Insert,
                        incoming.id,
                        incoming.guid,
                    ));
                }
            }
        }
    }

    if let Some(tasks) = &data.tasks {
        for incoming in tasks {
            match session
                .related
                .tasks
                .iter_mut()
                .find(|t| t.id == incoming.id)
            {
                Some(task) => {
                    task.update_from(incoming);
                    changes.push(ModelChange::new("task", ChangeKind::Update, task.id, None));
                }
                None => {
                    session.related.tasks.push(Task::from_data(incoming));
                    changes.push(ModelChange::new(
                        "task",
                        ChangeKind::Insert,
                        incoming.id,
                        None,
                    ));
                }
            }
        }
    }

    if let Some(tags) = &data.tags {
        for incoming in tags {
            let found = session.related.tags.iter_mut().find(|t| {
                (incoming.guid.is_some() && t.guid == incoming.guid) || t.id == incoming.id
            });
            match found {
                Some(tag) => {
                    tag.update_from(incoming);
                    changes.push(ModelChange::new("tag", ChangeKind::Update, tag.id, tag.guid));
                }
                None => {
                    session.related.tags.push(Tag::from_data(incoming));
                    changes.push(ModelChange::new(
                        "tag",
                        ChangeKind::Insert,
                        incoming.id,
                        incoming.guid,
                    ));
                }
            }
        }
    }

    if let Some(time_entries) = &data.time_entries {
        for incoming in time_entries {
            let found = session.related.time_entries.iter_mut().find(|te| {
                incoming.guid == Some(te.guid) || (incoming.id > 0 && te.id == incoming.id)
            });
            match found {
                Some(te) => {
                    if incoming.server_deleted_at.is_some() {
                        te.server_deleted_at = incoming.server_deleted_at;
                        te.dirty = true;
                        if te.ui_modified_at == 0 {
                            te.confirmed_deleted = true;
                        } else {
                            // Convert the pending edit into a delete;
                            // the next push confirms and purges it.
                            te.deleted_at = te.deleted_at.or(incoming.server_deleted_at);
                        }
                        changes.push(ModelChange::time_entry(ChangeKind::Delete, te.id, te.guid));
                    } else if te.ui_modified_at == 0 {
                        te.update_from(incoming);
                        changes.push(ModelChange::time_entry(ChangeKind::Update, te.id, te.guid));
                    }
                    // Locally edited and alive on the server: local wins.
                }
                None => {
                    if incoming.server_deleted_at.is_some() {
                        continue;
                    }
                    let te = TimeEntry::from_data(incoming);
                    changes.push(ModelChange::time_entry(ChangeKind::Insert, te.id, te.guid));
                    session.related.time_entries.push(te);
                }
            }
        }
    }

    session.since = since;
    session.dirty = true;
    changes
}

/// Pull from the server and merge. `full` ignores the stored cursor.
pub async fn pull(
    api: &ApiClient,
    session: &mut Session,
    full: bool,
) -> Result<Vec<ModelChange>, EngineError> {
    let since = if full { 0 } else { session.since };
    let res = api.me(&session.api_token, since, true).await?;
    debug!(since = res.since, "merging pulled data");
    Ok(merge_user_data(session, &res.data, res.since))
}

/// Build the batch body for everything push-pending. The session stays
/// borrowed only while copying out; callers release the writer lock
/// before the request goes on the wire.
pub fn build_batch(session: &Session) -> Vec<BatchUpdate> {
    session
        .related
        .collect_pushable()
        .into_iter()
        .map(|te| {
            if te.deleted_at.is_some() {
                BatchUpdate {
                    method: "DELETE".into(),
                    relative_url: format!("/api/v8/time_entries/{}", te.id),
                    guid: te.guid,
                    body: None,
                }
            } else {
                let (method, relative_url) = if te.id == 0 {
                    ("POST".to_owned(), "/api/v8/time_entries".to_owned())
                } else {
                    ("PUT".to_owned(), format!("/api/v8/time_entries/{}", te.id))
                };
                let body = serde_json::to_value(TimeEntryBody {
                    time_entry: te.to_data(),
                })
                .unwrap_or_default();
                BatchUpdate {
                    method,
                    relative_url,
                    guid: te.guid,
                    body: Some(body),
                }
            }
        })
        .collect()
}

/// What one batch push did to the graph.
#[derive(Debug, Default)]
pub struct PushOutcome {
    pub changes: Vec<ModelChange>,
    /// Per-entity 4xx rejections, reported through the error callback.
    pub validation_errors: Vec<(Uuid, String)>,
}

/// Apply per-entity outcomes in server order. Success clears the edit
/// clock and adopts the server's normalized copy; 404 means the entity
/// is gone remotely and gets dropped here too; other 4xx pin the error
/// message on the entry and leave it dirty for the user to fix.
pub fn apply_batch_results(
    session: &mut Session,
    updates: &[BatchUpdate],
    results: &[BatchUpdateResult],
) -> PushOutcome {
    let mut outcome = PushOutcome::default();

    for (i, result) in results.iter().enumerate() {
        let sent = updates.get(i);
        let guid = result.guid.or(sent.map(|u| u.guid));
        let Some(guid) = guid else {
            warn!(position = i, "batch outcome without a guid");
            continue;
        };
        let Some(te) = session.related.time_entry_by_guid_mut(guid) else {
            warn!(%guid, "batch outcome for unknown entry");
            continue;
        };
        let was_delete = sent.map(|u| u.method == "DELETE").unwrap_or(false);

        if result.is_success() {
            if was_delete {
                te.confirmed_deleted = true;
                te.dirty = true;
                outcome
                    .changes
                    .push(ModelChange::time_entry(ChangeKind::Delete, te.id, te.guid));
            } else {
                match result.time_entry() {
                    Some(data) => {
                        te.update_from(&data);
                        te.ui_modified_at = 0;
                        te.validation_error = None;
                        te.dirty = true;
                        outcome
                            .changes
                            .push(ModelChange::time_entry(ChangeKind::Update, te.id, te.guid));
                    }
                    // A create answered without a body never told us
                    // the server id; clearing the edit clock here
                    // would re-POST the entry as a fresh one on the
                    // next tick. Leave it queued.
                    None if te.id == 0 => {
                        warn!(%guid, "create succeeded without a body, keeping entry queued");
                    }
                    None => {
                        te.ui_modified_at = 0;
                        te.validation_error = None;
                        te.dirty = true;
                        outcome
                            .changes
                            .push(ModelChange::time_entry(ChangeKind::Update, te.id, te.guid));
                    }
                }
            }
        } else if result.status == 404 {
            if !was_delete {
                warn!(%guid, "entry vanished server-side, dropping local changes");
            }
            te.confirmed_deleted = true;
            te.dirty = true;
            outcome
                .changes
                .push(ModelChange::time_entry(ChangeKind::Delete, te.id, te.guid));
        } else if (400..500).contains(&result.status) {
            let message = result.error_message();
            warn!(%guid, %message, "entry rejected by server");
            te.validation_error = Some(message.clone());
            outcome.validation_errors.push((guid, message));
        } else {
            // 5xx on a single entity: leave it dirty, next tick retries.
            warn!(%guid, status = result.status, "server failed to process entry");
        }
    }

    outcome
}

/// Push everything pending in one batch. Network and 5xx failures
/// surface as errors so callers can schedule a backoff retry; entries
/// stay dirty either way.
pub async fn push(api: &ApiClient, session: &mut Session) -> Result<PushOutcome, EngineError> {
    let updates = build_batch(session);
    if updates.is_empty() {
        return Ok(PushOutcome::default());
    }
    let results = api.batch_update(&session.api_token, &updates).await?;
    Ok(apply_batch_results(session, &updates, &results))
}

#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub changes: Vec<ModelChange>,
    pub validation_errors: Vec<(Uuid, String)>,
}

/// One sync round: pull, persist, push, persist. Downloading first
/// means pushes are built against the freshest graph the server will
/// compare them to.
pub async fn sync(
    api: &ApiClient,
    db: &Database,
    session: &mut Session,
    full: bool,
) -> Result<SyncOutcome, EngineError> {
    let mut changes = pull(api, session, full).await?;
    db.save_user(session, true).await?;

    let pushed = push(api, session).await?;
    changes.extend(pushed.changes);
    db.save_user(session, true).await?;

    Ok(SyncOutcome {
        changes,
        validation_errors: pushed.validation_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> ApiClient {
        ApiClient::new(&server.uri(), "tally", "0.1.0").unwrap()
    }

    fn logged_in_session() -> Session {
        let mut s = Session::new("tally", "0.1.0");
        s.id = 101;
        s.api_token = "token-101".into();
        s
    }

    fn me_body(time_entries: serde_json::Value, since: u64) -> serde_json::Value {
        json!({
            "since": since,
            "data": {
                "id": 101,
                "email": "user@example.com",
                "fullname": "Test User",
                "default_wid": 1,
                "workspaces": [
                    {"id": 1, "name": "Personal", "premium": false, "admin": true,
                     "only_admins_may_create_projects": false}
                ],
                "projects": [
                    {"id": 5, "wid": 1, "name": "Rollout", "color": "#06aaf5",
                     "active": true, "billable": false}
                ],
                "time_entries": time_entries,
            }
        })
    }

    #[tokio::test]
    async fn full_pull_populates_an_empty_graph() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v8/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(me_body(
                json!([{ "id": 7, "guid": Uuid::now_v7(), "wid": 1, "description": "from server",
                         "start": 1_000, "stop": 1_600, "duration": 600 }]),
                5_000,
            )))
            .mount(&server)
            .await;

        let mut session = logged_in_session();
        let changes = pull(&api_for(&server), &mut session, true).await.unwrap();

        assert_eq!(session.related.workspaces.len(), 1);
        assert_eq!(session.related.projects.len(), 1);
        assert_eq!(session.related.time_entries.len(), 1);
        assert_eq!(session.since, 5_000);
        assert_eq!(session.email, "user@example.com");

        let te = &session.related.time_entries[0];
        assert_eq!(te.id, 7);
        assert_eq!(te.ui_modified_at, 0);
        assert!(!te.needs_push());
        assert!(changes
            .iter()
            .any(|c| c.model_type == "time_entry" && c.kind == ChangeKind::Insert));
    }

    #[tokio::test]
    async fn pull_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v8/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(me_body(
                json!([{ "id": 7, "guid": Uuid::now_v7(), "wid": 1, "description": "stable",
                         "start": 1_000, "stop": 1_600, "duration": 600 }]),
                5_000,
            )))
            .mount(&server)
            .await;

        let api = api_for(&server);
        let mut session = logged_in_session();
        pull(&api, &mut session, true).await.unwrap();
        let first = session.related.time_entries.clone();

        pull(&api, &mut session, false).await.unwrap();
        assert_eq!(session.related.time_entries, first);
        assert_eq!(session.related.workspaces.len(), 1);
        assert_eq!(session.related.projects.len(), 1);
    }

    #[tokio::test]
    async fn local_edits_win_pull_conflicts() {
        let mut session = logged_in_session();
        let mut te = TimeEntry::new(1, "local".into(), "tally/0.1.0".into());
        te.id = 7;
        te.touch(2_000);
        let guid = te.guid;
        session.related.time_entries.push(te);

        let data: UserData = serde_json::from_value(
            me_body(
                json!([{ "id": 7, "guid": guid, "wid": 1, "description": "server",
                         "start": 1_000, "stop": 1_600, "duration": 600 }]),
                6_000,
            )["data"]
                .clone(),
        )
        .unwrap();
        merge_user_data(&mut session, &data, 6_000);

        let te = session.related.time_entry_by_guid(guid).unwrap();
        assert_eq!(te.description, "local");
        assert!(te.ui_modified_at > 0, "entry must stay pending");
        assert_eq!(session.since, 6_000);
    }

    #[tokio::test]
    async fn server_deletion_purges_clean_entries() {
        let mut session = logged_in_session();
        let mut te = TimeEntry::new(1, "gone".into(), "tally/0.1.0".into());
        te.id = 7;
        let guid = te.guid;
        session.related.time_entries.push(te);

        let data: UserData = serde_json::from_value(
            me_body(
                json!([{ "id": 7, "guid": guid, "wid": 1, "description": "gone",
                         "start": 1_000, "stop": 1_600, "duration": 600,
                         "server_deleted_at": 9_000 }]),
                7_000,
            )["data"]
                .clone(),
        )
        .unwrap();
        let changes = merge_user_data(&mut session, &data, 7_000);

        let te = session.related.time_entry_by_guid(guid).unwrap();
        assert!(te.confirmed_deleted);
        assert!(changes
            .iter()
            .any(|c| c.kind == ChangeKind::Delete && c.model_type == "time_entry"));
    }

    #[tokio::test]
    async fn push_assigns_remote_identity() {
        let mut session = logged_in_session();
        let guid = session.start("write spec", "", 0, 0, 1_000).unwrap();
        session.stop(1_003);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v8/batch_updates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "status": 200, "guid": guid,
                  "body": { "data": { "id": 42, "guid": guid, "wid": 1,
                                      "description": "write spec",
                                      "start": 1_000, "stop": 1_003, "duration": 3 } } }
            ])))
            .mount(&server)
            .await;

        let outcome = push(&api_for(&server), &mut session).await.unwrap();

        let te = session.related.time_entry_by_guid(guid).unwrap();
        assert_eq!(te.id, 42);
        assert_eq!(te.guid, guid, "guid survives the push");
        assert_eq!(te.ui_modified_at, 0);
        assert!(session.related.collect_pushable().is_empty());
        assert!(outcome.validation_errors.is_empty());
    }

    #[tokio::test]
    async fn push_builds_methods_per_state() {
        let mut session = logged_in_session();

        // Draft: never pushed.
        session.start("draft", "", 0, 0, 1_000).unwrap();
        session.stop(1_100);

        // Locally edited: has a remote id.
        let mut edited = TimeEntry::new(1, "edited".into(), "tally/0.1.0".into());
        edited.id = 7;
        edited.touch(1_200);
        session.related.time_entries.push(edited);

        // Tombstoned: delete pending.
        let mut doomed = TimeEntry::new(1, "doomed".into(), "tally/0.1.0".into());
        doomed.id = 9;
        doomed.mark_deleted(1_300);
        session.related.time_entries.push(doomed);

        let batch = build_batch(&session);
        let methods: Vec<&str> = batch.iter().map(|u| u.method.as_str()).collect();
        assert_eq!(methods, vec!["POST", "PUT", "DELETE"]);
        assert_eq!(batch[0].relative_url, "/api/v8/time_entries");
        assert_eq!(batch[1].relative_url, "/api/v8/time_entries/7");
        assert_eq!(batch[2].relative_url, "/api/v8/time_entries/9");
        assert!(batch[2].body.is_none());
        assert!(batch[0].body.as_ref().unwrap().get("time_entry").is_some());
    }

    #[tokio::test]
    async fn confirmed_delete_is_purged_from_graph_and_store() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let mut session = logged_in_session();
        let mut te = TimeEntry::new(1, "doomed".into(), "tally/0.1.0".into());
        te.id = 9;
        te.mark_deleted(1_300);
        let guid = te.guid;
        session.related.time_entries.push(te);
        db.save_user(&mut session, true).await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v8/batch_updates"))
            .respond_with(ResponseTemplate::new(200)
                .set_body_json(json!([{ "status": 200, "guid": guid }])))
            .mount(&server)
            .await;

        let outcome = push(&api_for(&server), &mut session).await.unwrap();
        assert!(outcome
            .changes
            .iter()
            .any(|c| c.kind == ChangeKind::Delete));

        db.save_user(&mut session, true).await.unwrap();
        assert!(session.related.time_entry_by_guid(guid).is_none());
        let listed = db.list_time_entries(session.local_id, "", None).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn bodiless_success_keeps_creates_queued() {
        let mut session = logged_in_session();
        let guid = session.start("no body", "", 0, 0, 1_000).unwrap();
        session.stop(1_003);

        let mut edited = TimeEntry::new(1, "edited".into(), "tally/0.1.0".into());
        edited.id = 7;
        edited.touch(1_200);
        let edited_guid = edited.guid;
        session.related.time_entries.push(edited);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v8/batch_updates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "status": 200, "guid": guid },
                { "status": 200, "guid": edited_guid }
            ])))
            .mount(&server)
            .await;

        push(&api_for(&server), &mut session).await.unwrap();

        // The create came back without a server id; pushing it off
        // the queue now would re-create it on the next tick.
        let te = session.related.time_entry_by_guid(guid).unwrap();
        assert_eq!(te.id, 0);
        assert!(te.ui_modified_at > 0);
        assert!(te.needs_push());

        // The update already had its id; a bodiless ack settles it.
        let te = session.related.time_entry_by_guid(edited_guid).unwrap();
        assert_eq!(te.ui_modified_at, 0);
        assert!(!te.needs_push());
    }

    #[tokio::test]
    async fn deletes_answered_404_are_dropped() {
        let mut session = logged_in_session();
        let mut te = TimeEntry::new(1, "already gone".into(), "tally/0.1.0".into());
        te.id = 9;
        te.mark_deleted(1_300);
        let guid = te.guid;
        session.related.time_entries.push(te);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v8/batch_updates"))
            .respond_with(ResponseTemplate::new(200)
                .set_body_json(json!([{ "status": 404, "guid": guid }])))
            .mount(&server)
            .await;

        push(&api_for(&server), &mut session).await.unwrap();
        let te = session.related.time_entry_by_guid(guid).unwrap();
        assert!(te.confirmed_deleted);
    }

    #[tokio::test]
    async fn validation_rejections_keep_entries_dirty() {
        let mut session = logged_in_session();
        let guid = session.start("bad data", "", 0, 0, 1_000).unwrap();
        session.stop(1_100);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v8/batch_updates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "status": 400, "guid": guid, "body": "Description too long" }
            ])))
            .mount(&server)
            .await;

        let outcome = push(&api_for(&server), &mut session).await.unwrap();
        assert_eq!(outcome.validation_errors.len(), 1);
        assert_eq!(outcome.validation_errors[0].1, "Description too long");

        let te = session.related.time_entry_by_guid(guid).unwrap();
        assert!(te.needs_push(), "rejected entry stays queued");
        assert_eq!(te.validation_error.as_deref(), Some("Description too long"));
    }

    #[tokio::test]
    async fn server_errors_fail_the_whole_batch() {
        let mut session = logged_in_session();
        session.start("kept", "", 0, 0, 1_000).unwrap();
        session.stop(1_100);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v8/batch_updates"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = push(&api_for(&server), &mut session).await.unwrap_err();
        assert!(matches!(err, EngineError::Network(_)));
        assert_eq!(session.related.collect_pushable().len(), 1);
    }

    #[tokio::test]
    async fn unauthorized_pull_signals_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v8/me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut session = logged_in_session();
        let err = pull(&api_for(&server), &mut session, false).await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized));
    }

    #[tokio::test]
    async fn sync_pulls_then_pushes_and_persists() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let mut session = logged_in_session();
        let guid = session.start("round trip", "", 0, 0, 1_000).unwrap();
        session.stop(1_003);
        db.save_user(&mut session, true).await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v8/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(me_body(json!([]), 8_000)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v8/batch_updates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "status": 200, "guid": guid,
                  "body": { "data": { "id": 77, "guid": guid, "wid": 1,
                                      "description": "round trip",
                                      "start": 1_000, "stop": 1_003, "duration": 3 } } }
            ])))
            .mount(&server)
            .await;

        let outcome = super::sync(&api_for(&server), &db, &mut session, false)
            .await
            .unwrap();
        assert!(outcome.validation_errors.is_empty());
        assert_eq!(session.since, 8_000);
        assert!(session.related.collect_pushable().is_empty());

        let mut loaded = Session::new("tally", "0.1.0");
        db.load_user_by_id(101, &mut loaded, true).await.unwrap();
        assert_eq!(loaded.since, 8_000);
        assert_eq!(loaded.related.time_entries[0].id, 77);
    }

    #[test]
    fn backoff_schedule_caps_and_resets() {
        let mut backoff = Backoff::new();
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(backoff.delay().as_secs());
            backoff.bump();
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        backoff.reset();
        assert_eq!(backoff.delay().as_secs(), 1);
    }
}
