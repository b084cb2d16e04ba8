use crate::api_client::ApiClient;
use crate::database::Database;
use crate::error::EngineError;
use crate::session::Session;
use crate::settings::{Settings, StoredSettings};
use crate::stream::{self, StreamEvent};
use crate::sync::{self, Backoff, PushOutcome};
use crate::view::{
    self, AutocompleteItem, ChangeKind, ModelChange, TimeEntryViewItem,
};
use crate::format::{self, Rounding};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tally_common::api::{FeedbackRequest, UpdateCheckResponse, UserData};
use tally_common::domain::UpdateChannel;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

pub type ChangeCallback = Arc<dyn Fn(&ModelChange) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type UpdateCallback = Arc<dyn Fn(&UpdateCheckResponse) + Send + Sync>;

/// Callbacks the UI host registers at init. They are invoked from
/// worker tasks, never while the writer lock is held; marshaling onto
/// a UI thread is the callee's business.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_change: Option<ChangeCallback>,
    pub on_error: Option<ErrorCallback>,
    pub on_update: Option<UpdateCallback>,
}

impl Callbacks {
    fn emit_changes(&self, changes: &[ModelChange]) {
        if let Some(cb) = &self.on_change {
            for change in changes {
                cb(change);
            }
        }
    }

    fn emit_error(&self, message: &str) {
        if let Some(cb) = &self.on_error {
            cb(message);
        }
    }

    fn emit_update(&self, update: &UpdateCheckResponse) {
        if let Some(cb) = &self.on_update {
            cb(update);
        }
    }
}

/// Bursts of edits coalesce into one push.
const PUSH_DEBOUNCE: Duration = Duration::from_millis(200);
/// Background partial pull cadence.
const PULL_INTERVAL: Duration = Duration::from_secs(300);

/// Everything behind the single writer lock.
struct State {
    session: Option<Session>,
}

/// The dispatcher: owns the store, the HTTP client, the writer lock
/// around the session graph, and the background workers. All facade
/// operations go through here.
pub struct Context {
    app_name: String,
    app_version: String,
    api_url: String,
    websocket_url: String,
    db: Database,
    api: RwLock<Arc<ApiClient>>,
    callbacks: Callbacks,
    state: Mutex<State>,
    /// Taken before the writer lock is released so change callbacks
    /// fire in exactly the commit order.
    emit_lock: Mutex<()>,
    push_notify: Arc<Notify>,
    pull_notify: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    ws_switch_tx: watch::Sender<bool>,
    timeline_switch_tx: watch::Sender<bool>,
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

impl Context {
    pub async fn new(
        settings: &Settings,
        app_name: &str,
        app_version: &str,
        callbacks: Callbacks,
    ) -> Result<Arc<Self>, EngineError> {
        let db = Database::new(&settings.db_path).await?;
        let api = ApiClient::new(&settings.api_url, app_name, app_version)?;
        let (shutdown_tx, _) = watch::channel(false);
        let (ws_switch_tx, _) = watch::channel(false);
        let (timeline_switch_tx, _) = watch::channel(false);

        let ctx = Arc::new(Self {
            app_name: app_name.to_owned(),
            app_version: app_version.to_owned(),
            api_url: settings.api_url.clone(),
            websocket_url: settings.websocket_url.clone(),
            db,
            api: RwLock::new(Arc::new(api)),
            callbacks,
            state: Mutex::new(State { session: None }),
            emit_lock: Mutex::new(()),
            push_notify: Arc::new(Notify::new()),
            pull_notify: Arc::new(Notify::new()),
            shutdown_tx,
            ws_switch_tx,
            timeline_switch_tx,
        });
        ctx.configure_proxy().await?;
        Ok(ctx)
    }

    fn api(&self) -> Arc<ApiClient> {
        self.api.read().expect("api client lock poisoned").clone()
    }

    fn new_session(&self) -> Session {
        Session::new(self.app_name.clone(), self.app_version.clone())
    }

    /// Rebuild the HTTP client against the stored proxy settings.
    pub async fn configure_proxy(&self) -> Result<(), EngineError> {
        let stored = self.db.load_settings().await?;
        let api = if stored.use_proxy {
            ApiClient::with_proxy(&self.api_url, &self.app_name, &self.app_version, &stored.proxy)?
        } else {
            ApiClient::new(&self.api_url, &self.app_name, &self.app_version)?
        };
        *self.api.write().expect("api client lock poisoned") = Arc::new(api);
        Ok(())
    }

    // Session lifecycle.

    /// Load the user owning the stored api token, if any. Lazily
    /// called by every read that needs a session.
    pub async fn load_current_user(&self) -> Result<bool, EngineError> {
        let mut state = self.state.lock().await;
        if state.session.is_some() {
            return Ok(true);
        }
        let mut session = self.new_session();
        let found = self.db.load_current_user(&mut session, true).await?;
        if found {
            state.session = Some(session);
        }
        Ok(found)
    }

    /// Identity of the current user: (remote id, email, fullname).
    pub async fn current_user(&self) -> Result<Option<(u64, String, String)>, EngineError> {
        self.load_current_user().await?;
        let state = self.state.lock().await;
        Ok(state
            .session
            .as_ref()
            .map(|s| (s.id, s.email.clone(), s.fullname.clone())))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(), EngineError> {
        if email.is_empty() {
            return Err(EngineError::user_input("Empty email"));
        }
        if password.is_empty() {
            return Err(EngineError::user_input("Empty password"));
        }

        let res = self.api().login(email, password).await?;
        self.adopt_user(&res.data).await
    }

    /// Adopt a user payload that already carries an api token (login
    /// response or a host-supplied JSON blob).
    async fn adopt_user(&self, data: &UserData) -> Result<(), EngineError> {
        let token = data
            .api_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EngineError::Parse("user payload carries no api token".into()))?;

        let mut session = self.new_session();
        // Pick up whatever this machine already knows about the user.
        self.db.load_user_by_id(data.id, &mut session, true).await?;
        let since = session.since;
        sync::merge_user_data(&mut session, data, since);
        session.api_token = token.clone();

        let mut state = self.state.lock().await;
        self.db.set_current_api_token(&token).await?;
        self.db.save_user(&mut session, true).await?;
        state.session = Some(session);
        debug!("user logged in");
        Ok(())
    }

    /// `set_logged_in_user`: UI hosts that finished authentication on
    /// their own hand over the raw user JSON.
    pub async fn set_logged_in_user(&self, json: &str) -> Result<(), EngineError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let inner = value.get("data").unwrap_or(&value);
        let data: UserData = serde_json::from_value(inner.clone())?;
        self.adopt_user(&data).await
    }

    pub async fn logout(&self) -> Result<(), EngineError> {
        let _ = self.ws_switch_tx.send(false);
        let mut state = self.state.lock().await;
        if state.session.is_none() {
            return Ok(());
        }
        self.db.clear_current_api_token().await?;
        state.session = None;
        debug!("user logged out");
        Ok(())
    }

    /// Wipe the local replica and sign out, as one operation under one
    /// lock hold. Nothing observable is left half-done: the user is
    /// gone from memory even if clearing the token row fails.
    pub async fn clear_cache(&self) -> Result<(), EngineError> {
        let _ = self.ws_switch_tx.send(false);
        let mut state = self.state.lock().await;
        let Some(session) = state.session.take() else {
            return Ok(());
        };
        self.db.delete_user(&session, true).await?;
        self.db.clear_current_api_token().await?;
        debug!("local cache cleared");
        Ok(())
    }

    pub async fn set_api_token(&self, token: &str) -> Result<(), EngineError> {
        self.db.set_current_api_token(token).await
    }

    pub async fn get_api_token(&self) -> Result<String, EngineError> {
        self.db.current_api_token().await
    }

    pub async fn has_premium_workspaces(&self) -> Result<bool, EngineError> {
        self.load_current_user().await?;
        let state = self.state.lock().await;
        let session = state
            .session
            .as_ref()
            .ok_or_else(|| EngineError::user_input("Please login to check if you have premium workspaces"))?;
        Ok(session.has_premium_workspaces())
    }

    // Stored settings.

    pub async fn get_settings(&self) -> Result<StoredSettings, EngineError> {
        self.db.load_settings().await
    }

    pub async fn set_settings(&self, settings: &StoredSettings) -> Result<(), EngineError> {
        self.db.save_settings(settings).await?;
        self.configure_proxy().await
    }

    pub async fn get_update_channel(&self) -> Result<UpdateChannel, EngineError> {
        self.db.load_update_channel().await
    }

    pub async fn set_update_channel(&self, channel: &str) -> Result<(), EngineError> {
        let channel = UpdateChannel::from_str(channel).map_err(EngineError::UserInput)?;
        self.db.save_update_channel(channel).await
    }

    pub async fn check_for_updates(&self) {
        let channel = match self.db.load_update_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                self.callbacks.emit_error(&err.to_string());
                return;
            }
        };
        match self
            .api()
            .check_updates(&self.app_name, &self.app_version, channel)
            .await
        {
            Ok(Some(update)) => self.callbacks.emit_update(&update),
            Ok(None) => debug!("no update available"),
            Err(err) => self.callbacks.emit_error(&err.to_string()),
        }
    }

    pub async fn feedback_send(
        &self,
        topic: &str,
        details: &str,
        base64_image: &str,
    ) -> Result<(), EngineError> {
        if topic.is_empty() {
            return Err(EngineError::user_input("Missing topic"));
        }
        if details.is_empty() {
            return Err(EngineError::user_input("Missing details"));
        }
        let token = self.api_token_snapshot().await;
        if token.is_empty() {
            return Err(EngineError::user_input("Please login to send feedback"));
        }
        let feedback = FeedbackRequest {
            topic: topic.to_owned(),
            details: details.to_owned(),
            base64_encoded_image: (!base64_image.is_empty()).then(|| base64_image.to_owned()),
        };
        self.api().send_feedback(&token, &feedback).await
    }

    // Mutations. Each one runs under the writer lock, persists, then
    // emits its change records after the lock is released and nudges
    // the push worker.

    async fn mutate<T, F>(&self, login_message: &str, op: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Session, i64) -> Result<(T, Vec<ModelChange>), EngineError>,
    {
        self.load_current_user().await?;
        let now = unix_now();

        let mut state = self.state.lock().await;
        let session = state
            .session
            .as_mut()
            .ok_or_else(|| EngineError::user_input(login_message))?;
        let (value, changes) = op(session, now)?;
        self.db.save_user(session, true).await?;

        let emit_guard = self.emit_lock.lock().await;
        drop(state);
        self.callbacks.emit_changes(&changes);
        drop(emit_guard);

        if !changes.is_empty() {
            self.push_notify.notify_one();
        }
        Ok(value)
    }

    pub async fn start(
        &self,
        description: &str,
        duration: &str,
        task_id: u64,
        project_id: u64,
    ) -> Result<TimeEntryViewItem, EngineError> {
        let description = description.to_owned();
        let duration = duration.to_owned();
        self.mutate("Please login to start time tracking", move |session, now| {
            let previous = session
                .related
                .running_time_entry()
                .map(|te| (te.id, te.guid));
            let guid = session.start(&description, &duration, task_id, project_id, now)?;

            let mut changes = Vec::new();
            if let Some((id, guid)) = previous {
                changes.push(ModelChange::time_entry(ChangeKind::Update, id, guid));
            }
            changes.push(ModelChange::time_entry(ChangeKind::Insert, 0, guid));

            let te = session
                .related
                .time_entry_by_guid(guid)
                .ok_or_else(|| EngineError::Internal("started entry vanished".into()))?;
            Ok((
                view::time_entry_view_item(te, &session.related, now, ""),
                changes,
            ))
        })
        .await
    }

    /// Returns the stopped entry, or None when nothing ran.
    pub async fn stop(&self) -> Result<Option<TimeEntryViewItem>, EngineError> {
        self.mutate("Please login to stop time tracking", |session, now| {
            let stopped = session.stop(now);
            let changes: Vec<ModelChange> = stopped
                .iter()
                .filter_map(|guid| session.related.time_entry_by_guid(*guid))
                .map(|te| ModelChange::time_entry(ChangeKind::Update, te.id, te.guid))
                .collect();
            let item = stopped.first().and_then(|guid| {
                session
                    .related
                    .time_entry_by_guid(*guid)
                    .map(|te| view::time_entry_view_item(te, &session.related, now, ""))
            });
            Ok((item, changes))
        })
        .await
    }

    pub async fn stop_running_time_entry_at(
        &self,
        at: i64,
    ) -> Result<TimeEntryViewItem, EngineError> {
        self.mutate("Please login to stop running time entry", move |session, now| {
            let guid = session.stop_at(at)?;
            let te = session
                .related
                .time_entry_by_guid(guid)
                .ok_or_else(|| EngineError::Internal("stopped entry vanished".into()))?;
            Ok((
                view::time_entry_view_item(te, &session.related, now, ""),
                vec![ModelChange::time_entry(ChangeKind::Update, te.id, te.guid)],
            ))
        })
        .await
    }

    pub async fn split_running_time_entry_at(
        &self,
        at: i64,
    ) -> Result<TimeEntryViewItem, EngineError> {
        self.mutate("Please login to split time entry", move |session, now| {
            let old = session
                .related
                .running_time_entry()
                .map(|te| (te.id, te.guid));
            let guid = session.split_at(at)?;

            let mut changes = Vec::new();
            if let Some((id, old_guid)) = old {
                changes.push(ModelChange::time_entry(ChangeKind::Update, id, old_guid));
            }
            changes.push(ModelChange::time_entry(ChangeKind::Insert, 0, guid));

            let te = session
                .related
                .time_entry_by_guid(guid)
                .ok_or_else(|| EngineError::Internal("split entry vanished".into()))?;
            Ok((
                view::time_entry_view_item(te, &session.related, now, ""),
                changes,
            ))
        })
        .await
    }

    pub async fn continue_entry(&self, guid: &str) -> Result<TimeEntryViewItem, EngineError> {
        let guid = parse_guid(guid)?;
        self.mutate("Please login to continue time tracking", move |session, now| {
            let new_guid = session.continue_entry(guid, now)?;
            let kind = if new_guid == guid {
                ChangeKind::Update
            } else {
                ChangeKind::Insert
            };
            let te = session
                .related
                .time_entry_by_guid(new_guid)
                .ok_or_else(|| EngineError::Internal("continued entry vanished".into()))?;
            Ok((
                view::time_entry_view_item(te, &session.related, now, ""),
                vec![ModelChange::time_entry(kind, te.id, te.guid)],
            ))
        })
        .await
    }

    /// Continue whatever ran last; None with an untouched graph when
    /// there is nothing to continue.
    pub async fn continue_latest(&self) -> Result<Option<TimeEntryViewItem>, EngineError> {
        self.mutate(
            "Please login to continue tracking last time entry",
            |session, now| {
                let latest = session.related.latest_time_entry().map(|te| te.guid);
                match session.continue_latest(now)? {
                    Some(guid) => {
                        let kind = if latest == Some(guid) {
                            ChangeKind::Update
                        } else {
                            ChangeKind::Insert
                        };
                        let te = session.related.time_entry_by_guid(guid).ok_or_else(|| {
                            EngineError::Internal("continued entry vanished".into())
                        })?;
                        Ok((
                            Some(view::time_entry_view_item(te, &session.related, now, "")),
                            vec![ModelChange::time_entry(kind, te.id, te.guid)],
                        ))
                    }
                    None => Ok((None, Vec::new())),
                }
            },
        )
        .await
    }

    pub async fn delete_time_entry(&self, guid: &str) -> Result<(), EngineError> {
        let guid = parse_guid(guid)?;
        self.mutate("Please login to delete time entry", move |session, now| {
            session.delete_entry(guid, now)?;
            let te = session
                .related
                .time_entry_by_guid(guid)
                .ok_or_else(|| EngineError::Internal("deleted entry vanished".into()))?;
            Ok((
                (),
                vec![ModelChange::time_entry(ChangeKind::Delete, te.id, te.guid)],
            ))
        })
        .await
    }

    async fn set_time_entry_field<F>(&self, guid: &str, message: &str, op: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Session, Uuid, i64) -> Result<bool, EngineError>,
    {
        let guid = parse_guid(guid)?;
        self.mutate(message, move |session, now| {
            let changed = op(session, guid, now)?;
            let changes = if changed {
                let te = session
                    .related
                    .time_entry_by_guid(guid)
                    .ok_or_else(|| EngineError::Internal("edited entry vanished".into()))?;
                vec![ModelChange::time_entry(ChangeKind::Update, te.id, te.guid)]
            } else {
                Vec::new()
            };
            Ok(((), changes))
        })
        .await
    }

    pub async fn set_time_entry_description(
        &self,
        guid: &str,
        value: &str,
    ) -> Result<(), EngineError> {
        let value = value.to_owned();
        self.set_time_entry_field(
            guid,
            "Please login to change time entry description",
            move |session, guid, now| {
                let te = find_entry(session, guid)?;
                Ok(te.set_description(&value, now as u64))
            },
        )
        .await
    }

    pub async fn set_time_entry_duration(&self, guid: &str, value: &str) -> Result<(), EngineError> {
        let value = value.to_owned();
        self.set_time_entry_field(
            guid,
            "Please login to set time entry duration",
            move |session, guid, now| {
                let te = find_entry(session, guid)?;
                Ok(te.set_duration_string(&value, now))
            },
        )
        .await
    }

    /// Assign project and task; the entry inherits the project's
    /// billable flag the way the server would.
    pub async fn set_time_entry_project(
        &self,
        guid: &str,
        task_id: u64,
        project_id: u64,
    ) -> Result<(), EngineError> {
        self.set_time_entry_field(
            guid,
            "Please login to select project",
            move |session, guid, now| {
                let billable = (project_id > 0)
                    .then(|| session.related.project_by_id(project_id).map(|p| p.billable))
                    .flatten();
                let te = find_entry(session, guid)?;
                let mut changed = te.set_pid((project_id > 0).then_some(project_id), now as u64);
                changed |= te.set_tid((task_id > 0).then_some(task_id), now as u64);
                if let Some(billable) = billable {
                    changed |= te.set_billable(billable, now as u64);
                }
                Ok(changed)
            },
        )
        .await
    }

    pub async fn set_time_entry_start_iso_8601(
        &self,
        guid: &str,
        value: &str,
    ) -> Result<(), EngineError> {
        let at = format::parse_iso8601(value)?;
        self.set_time_entry_field(
            guid,
            "Please login to change time entry start time",
            move |session, guid, now| {
                let te = find_entry(session, guid)?;
                Ok(te.set_start(at, now as u64))
            },
        )
        .await
    }

    pub async fn set_time_entry_end_iso_8601(
        &self,
        guid: &str,
        value: &str,
    ) -> Result<(), EngineError> {
        let at = format::parse_iso8601(value)?;
        self.set_time_entry_field(
            guid,
            "Please login to change time entry end time",
            move |session, guid, now| {
                let te = find_entry(session, guid)?;
                Ok(te.set_stop(at, now as u64))
            },
        )
        .await
    }

    pub async fn set_time_entry_tags(&self, guid: &str, value: &str) -> Result<(), EngineError> {
        let value = value.to_owned();
        self.set_time_entry_field(
            guid,
            "Please login to change time entry tags",
            move |session, guid, now| {
                let te = find_entry(session, guid)?;
                Ok(te.set_tags_string(&value, now as u64))
            },
        )
        .await
    }

    pub async fn set_time_entry_billable(&self, guid: &str, value: bool) -> Result<(), EngineError> {
        self.set_time_entry_field(
            guid,
            "Please login to change time entry billable state",
            move |session, guid, now| {
                let te = find_entry(session, guid)?;
                Ok(te.set_billable(value, now as u64))
            },
        )
        .await
    }

    // Queries. These take the lock briefly and copy primitive data out.

    pub async fn time_entry_view_items(&self) -> Result<Vec<TimeEntryViewItem>, EngineError> {
        self.load_current_user().await?;
        let state = self.state.lock().await;
        let Some(session) = state.session.as_ref() else {
            return Ok(Vec::new());
        };
        Ok(view::time_entry_view_items(&session.related, unix_now()))
    }

    pub async fn running_time_entry_view_item(
        &self,
    ) -> Result<Option<TimeEntryViewItem>, EngineError> {
        self.load_current_user().await?;
        let state = self.state.lock().await;
        let session = state
            .session
            .as_ref()
            .ok_or_else(|| EngineError::user_input("Please login to access tracking time entry"))?;
        Ok(session
            .related
            .running_time_entry()
            .map(|te| view::time_entry_view_item(te, &session.related, unix_now(), "")))
    }

    pub async fn time_entry_view_item_by_guid(
        &self,
        guid: &str,
    ) -> Result<Option<TimeEntryViewItem>, EngineError> {
        let guid = parse_guid(guid)?;
        self.load_current_user().await?;
        let state = self.state.lock().await;
        let session = state
            .session
            .as_ref()
            .ok_or_else(|| EngineError::user_input("Please login to load time entry data"))?;
        Ok(session
            .related
            .time_entry_by_guid(guid)
            .map(|te| view::time_entry_view_item(te, &session.related, unix_now(), "")))
    }

    pub async fn duration_for_date_header(&self, date: &str) -> Result<String, EngineError> {
        self.load_current_user().await?;
        let state = self.state.lock().await;
        let session = state
            .session
            .as_ref()
            .ok_or_else(|| EngineError::user_input("Please login to access time entry"))?;
        let total = view::duration_for_date_header(&session.related, date);
        Ok(format::format_hhmm(total, Rounding::Truncate))
    }

    pub async fn autocomplete_items(
        &self,
        include_time_entries: bool,
        include_tasks: bool,
        include_projects: bool,
    ) -> Result<Vec<AutocompleteItem>, EngineError> {
        self.load_current_user().await?;
        let state = self.state.lock().await;
        let Some(session) = state.session.as_ref() else {
            return Ok(Vec::new());
        };
        Ok(view::autocomplete_items(
            &session.related,
            include_time_entries,
            include_tasks,
            include_projects,
        ))
    }

    pub async fn tags(&self) -> Result<Vec<String>, EngineError> {
        self.load_current_user().await?;
        let state = self.state.lock().await;
        let session = state
            .session
            .as_ref()
            .ok_or_else(|| EngineError::user_input("Please login to list tags"))?;
        Ok(session.related.tag_names())
    }

    /// Stored history straight from the database, filtered and
    /// limited, without touching the in-memory graph.
    pub async fn history(
        &self,
        search: &str,
        limit: Option<usize>,
    ) -> Result<Vec<crate::domain::TimeEntry>, EngineError> {
        self.load_current_user().await?;
        let local_id = {
            let state = self.state.lock().await;
            state
                .session
                .as_ref()
                .map(|s| s.local_id)
                .ok_or_else(|| EngineError::user_input("Please login to list time entries"))?
        };
        self.db.list_time_entries(local_id, search, limit).await
    }

    /// How many entries wait for the next push.
    pub async fn pushable_models(&self) -> Result<usize, EngineError> {
        self.load_current_user().await?;
        let state = self.state.lock().await;
        let session = state
            .session
            .as_ref()
            .ok_or_else(|| EngineError::user_input("Please login to check if sync is required"))?;
        Ok(session.related.collect_pushable().len())
    }

    // Sync. The writer lock is never held across the wire: request
    // bodies are copied out, the response is applied in a second hold.

    async fn api_token_snapshot(&self) -> String {
        let state = self.state.lock().await;
        state
            .session
            .as_ref()
            .map(|s| s.api_token.clone())
            .unwrap_or_default()
    }

    /// Pull and merge. The writer lock is dropped for the wire round
    /// trip; merge, save and callback emission happen in the second
    /// hold.
    async fn do_pull(&self, full: bool) -> Result<(), EngineError> {
        let (token, since) = {
            let state = self.state.lock().await;
            let session = state
                .session
                .as_ref()
                .ok_or_else(|| EngineError::user_input("Please login to sync"))?;
            (
                session.api_token.clone(),
                if full { 0 } else { session.since },
            )
        };
        if token.is_empty() {
            return Err(EngineError::user_input("Please login to sync"));
        }

        let res = self.api().me(&token, since, true).await?;

        let mut state = self.state.lock().await;
        let session = state
            .session
            .as_mut()
            .ok_or_else(|| EngineError::user_input("Please login to sync"))?;
        let changes = sync::merge_user_data(session, &res.data, res.since);
        self.db.save_user(session, true).await?;

        let emit_guard = self.emit_lock.lock().await;
        drop(state);
        self.callbacks.emit_changes(&changes);
        drop(emit_guard);
        Ok(())
    }

    /// Push the pending batch, built under one lock hold and applied
    /// under another.
    async fn do_push(&self) -> Result<(), EngineError> {
        let (token, updates) = {
            let state = self.state.lock().await;
            let session = state
                .session
                .as_ref()
                .ok_or_else(|| EngineError::user_input("Please login to sync"))?;
            (session.api_token.clone(), sync::build_batch(session))
        };
        if updates.is_empty() {
            return Ok(());
        }
        if token.is_empty() {
            return Err(EngineError::user_input("Please login to sync"));
        }

        let results = self.api().batch_update(&token, &updates).await?;

        let mut state = self.state.lock().await;
        let session = state
            .session
            .as_mut()
            .ok_or_else(|| EngineError::user_input("Please login to sync"))?;
        let PushOutcome {
            changes,
            validation_errors,
        } = sync::apply_batch_results(session, &updates, &results);
        self.db.save_user(session, true).await?;

        let emit_guard = self.emit_lock.lock().await;
        drop(state);
        self.callbacks.emit_changes(&changes);
        for (_, message) in &validation_errors {
            self.callbacks.emit_error(message);
        }
        drop(emit_guard);
        Ok(())
    }

    /// One full sync round: pull everything, then push what's pending.
    pub async fn sync(&self, full: bool) -> Result<(), EngineError> {
        self.load_current_user().await?;
        self.do_pull(full).await?;
        self.do_push().await
    }

    /// Schedule a partial pull on the pull worker.
    pub fn trigger_partial_sync(&self) {
        self.pull_notify.notify_one();
        self.push_notify.notify_one();
    }

    /// The server said our token is no good: forget it, stop the
    /// stream, tell the UI.
    async fn handle_auth_failure(&self) {
        warn!("api token rejected, signing out of sync");
        let _ = self.ws_switch_tx.send(false);
        {
            let mut state = self.state.lock().await;
            if let Some(session) = state.session.as_mut() {
                session.api_token.clear();
            }
        }
        if let Err(err) = self.db.clear_current_api_token().await {
            error!(%err, "failed to clear rejected api token");
        }
        self.callbacks.emit_error("Invalid credentials");
    }

    // Switches.

    pub fn websocket_switch(&self, on: bool) {
        debug!(on, "websocket switch");
        let _ = self.ws_switch_tx.send(on);
    }

    pub fn timeline_switch(&self, on: bool) {
        debug!(on, "timeline switch");
        let _ = self.timeline_switch_tx.send(on);
    }

    pub async fn timeline_is_recording_enabled(&self) -> bool {
        let state = self.state.lock().await;
        state
            .session
            .as_ref()
            .map(|s| s.record_timeline)
            .unwrap_or(false)
    }

    pub async fn timeline_toggle_recording(&self) -> Result<bool, EngineError> {
        let enabled = self
            .mutate("Please login to toggle timeline recording", |session, _now| {
                session.set_record_timeline(!session.record_timeline);
                Ok((session.record_timeline, Vec::new()))
            })
            .await?;
        self.timeline_switch(enabled);
        Ok(enabled)
    }

    // Workers.

    pub fn shutdown(&self) {
        debug!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn the background workers: debounced push, periodic pull,
    /// websocket supervision. They exit promptly on `shutdown`.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(push_worker(self.clone())),
            tokio::spawn(pull_worker(self.clone())),
            tokio::spawn(websocket_worker(self.clone())),
        ]
    }
}

fn find_entry(session: &mut Session, guid: Uuid) -> Result<&mut crate::domain::TimeEntry, EngineError> {
    session
        .related
        .time_entry_by_guid_mut(guid)
        .ok_or_else(|| EngineError::user_input("Time entry not found"))
}

fn parse_guid(guid: &str) -> Result<Uuid, EngineError> {
    if guid.is_empty() {
        return Err(EngineError::user_input("Missing GUID"));
    }
    Uuid::parse_str(guid).map_err(|_| EngineError::user_input("Invalid GUID"))
}

async fn push_worker(ctx: Arc<Context>) {
    let mut shutdown = ctx.shutdown_rx();
    let mut backoff = Backoff::new();
    loop {
        tokio::select! {
            _ = ctx.push_notify.notified() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        }
        // Let a burst of edits settle into one batch.
        tokio::time::sleep(PUSH_DEBOUNCE).await;

        loop {
            match ctx.do_push().await {
                Ok(()) => {
                    backoff.reset();
                    break;
                }
                Err(EngineError::Unauthorized) => {
                    ctx.handle_auth_failure().await;
                    break;
                }
                Err(err @ EngineError::Network(_)) => {
                    let delay = backoff.delay();
                    backoff.bump();
                    debug!(%err, ?delay, "push failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                }
                Err(EngineError::UserInput(_)) => break,
                Err(err) => {
                    ctx.callbacks.emit_error(&err.to_string());
                    break;
                }
            }
        }
    }
}

async fn pull_worker(ctx: Arc<Context>) {
    let mut shutdown = ctx.shutdown_rx();
    let mut ticker = tokio::time::interval(PULL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so startup stays quiet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = ctx.pull_notify.notified() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
                continue;
            }
        }
        match ctx.do_pull(false).await {
            Ok(()) => {}
            Err(EngineError::Unauthorized) => ctx.handle_auth_failure().await,
            Err(EngineError::UserInput(_)) => {}
            Err(err @ EngineError::Network(_)) => debug!(%err, "pull failed, next tick retries"),
            Err(err) => ctx.callbacks.emit_error(&err.to_string()),
        }
    }
}

async fn websocket_worker(ctx: Arc<Context>) {
    let mut switch = ctx.ws_switch_tx.subscribe();
    let mut shutdown = ctx.shutdown_rx();

    loop {
        while !*switch.borrow() {
            tokio::select! {
                res = switch.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }

        let token = ctx.api_token_snapshot().await;
        if token.is_empty() {
            ctx.callbacks.emit_error("Please login to enable live updates");
            let _ = ctx.ws_switch_tx.send(false);
            continue;
        }

        let (events_tx, mut events_rx) = mpsc::channel(8);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let stream = tokio::spawn(stream::run(
            ctx.websocket_url.clone(),
            token,
            events_tx,
            cancel_rx,
        ));

        loop {
            tokio::select! {
                event = events_rx.recv() => match event {
                    Some(StreamEvent::UpdateNotice) => ctx.pull_notify.notify_one(),
                    Some(StreamEvent::AuthRejected) => {
                        ctx.handle_auth_failure().await;
                        break;
                    }
                    None => break,
                },
                _ = switch.changed() => {
                    if !*switch.borrow() {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let _ = cancel_tx.send(true);
        let _ = stream.await;
        if *shutdown.borrow() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_settings(server_uri: &str) -> Settings {
        Settings {
            db_path: "sqlite::memory:".into(),
            api_url: server_uri.into(),
            websocket_url: server_uri.into(),
            timeline_upload_url: server_uri.into(),
            log_path: String::new(),
            log_level: "debug".into(),
        }
    }

    async fn context_with(server: &MockServer) -> Arc<Context> {
        Context::new(&test_settings(&server.uri()), "tally", "0.1.0", Callbacks::default())
            .await
            .unwrap()
    }

    fn mount_login(server: &MockServer) -> impl std::future::Future<Output = ()> + '_ {
        Mock::given(method("POST"))
            .and(path("/api/v8/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "id": 101,
                    "api_token": "token-101",
                    "email": "user@example.com",
                    "fullname": "Test User",
                    "default_wid": 1,
                    "workspaces": [
                        {"id": 1, "name": "Personal", "premium": true, "admin": true,
                         "only_admins_may_create_projects": false}
                    ]
                }
            })))
            .mount(server)
    }

    #[tokio::test]
    async fn mutations_require_a_login() {
        let server = MockServer::start().await;
        let ctx = context_with(&server).await;
        let err = ctx.start("work", "", 0, 0).await.unwrap_err();
        assert!(matches!(err, EngineError::UserInput(_)));
        assert!(err.to_string().contains("login"));
    }

    #[tokio::test]
    async fn login_requires_credentials() {
        let server = MockServer::start().await;
        let ctx = context_with(&server).await;
        assert!(ctx.login("", "pw").await.is_err());
        assert!(ctx.login("a@b.c", "").await.is_err());
    }

    #[tokio::test]
    async fn login_then_track_round_trip() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        let ctx = context_with(&server).await;

        ctx.login("user@example.com", "secret").await.unwrap();
        let (id, email, _) = ctx.current_user().await.unwrap().unwrap();
        assert_eq!(id, 101);
        assert_eq!(email, "user@example.com");
        assert_eq!(ctx.get_api_token().await.unwrap(), "token-101");
        assert!(ctx.has_premium_workspaces().await.unwrap());

        let item = ctx.start("write spec", "", 0, 0).await.unwrap();
        assert_eq!(item.description, "write spec");
        assert!(item.duration_in_seconds < 0);
        assert_eq!(ctx.pushable_models().await.unwrap(), 1);

        let running = ctx.running_time_entry_view_item().await.unwrap();
        assert_eq!(running.unwrap().guid, item.guid);

        let stopped = ctx.stop().await.unwrap().unwrap();
        assert_eq!(stopped.guid, item.guid);
        assert!(ctx.running_time_entry_view_item().await.unwrap().is_none());
        assert!(ctx.stop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn change_callbacks_fire_after_commit() {
        let server = MockServer::start().await;
        mount_login(&server).await;

        let seen: Arc<std::sync::Mutex<Vec<ModelChange>>> = Arc::default();
        let sink = seen.clone();
        let callbacks = Callbacks {
            on_change: Some(Arc::new(move |change: &ModelChange| {
                sink.lock().unwrap().push(change.clone());
            })),
            ..Default::default()
        };
        let ctx = Context::new(&test_settings(&server.uri()), "tally", "0.1.0", callbacks)
            .await
            .unwrap();

        ctx.login("user@example.com", "secret").await.unwrap();
        let item = ctx.start("tracked", "", 0, 0).await.unwrap();
        ctx.delete_time_entry(&item.guid).await.unwrap();

        let seen = seen.lock().unwrap();
        let inserts: Vec<_> = seen.iter().filter(|c| c.kind == ChangeKind::Insert).collect();
        let deletes: Vec<_> = seen.iter().filter(|c| c.kind == ChangeKind::Delete).collect();
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].guid, item.guid);
        assert_eq!(deletes.len(), 1);
    }

    #[tokio::test]
    async fn sync_round_trip_assigns_remote_ids() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v8/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "since": 9_000,
                "data": { "id": 101, "email": "user@example.com", "fullname": "Test User",
                          "default_wid": 1 }
            })))
            .mount(&server)
            .await;

        let ctx = context_with(&server).await;
        ctx.login("user@example.com", "secret").await.unwrap();
        let item = ctx.start("push me", "", 0, 0).await.unwrap();
        ctx.stop().await.unwrap();

        let guid = Uuid::parse_str(&item.guid).unwrap();
        Mock::given(method("POST"))
            .and(path("/api/v8/batch_updates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "status": 200, "guid": guid,
                  "body": { "data": { "id": 42, "guid": guid, "wid": 1,
                                      "description": "push me",
                                      "start": 1_000, "stop": 1_003, "duration": 3 } } }
            ])))
            .mount(&server)
            .await;

        ctx.sync(false).await.unwrap();
        assert_eq!(ctx.pushable_models().await.unwrap(), 0);
        let after = ctx
            .time_entry_view_item_by_guid(&item.guid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.guid, item.guid);
    }

    #[tokio::test]
    async fn clear_cache_signs_out_atomically() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        let ctx = context_with(&server).await;
        ctx.login("user@example.com", "secret").await.unwrap();
        ctx.start("wiped", "", 0, 0).await.unwrap();

        ctx.clear_cache().await.unwrap();
        assert!(ctx.current_user().await.unwrap().is_none());
        assert_eq!(ctx.get_api_token().await.unwrap(), "");
    }

    #[tokio::test]
    async fn set_time_entry_fields_mark_pending() {
        let server = MockServer::start().await;
        mount_login(&server).await;
        let ctx = context_with(&server).await;
        ctx.login("user@example.com", "secret").await.unwrap();

        let item = ctx.start("edit me", "0:10:00", 0, 0).await.unwrap();
        ctx.set_time_entry_description(&item.guid, "edited").await.unwrap();
        ctx.set_time_entry_tags(&item.guid, "a;b").await.unwrap();
        ctx.set_time_entry_billable(&item.guid, true).await.unwrap();

        let after = ctx
            .time_entry_view_item_by_guid(&item.guid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.description, "edited");
        assert_eq!(after.tags, "a;b");
        assert!(after.billable);
        assert_eq!(ctx.pushable_models().await.unwrap(), 1);

        let err = ctx.set_time_entry_description("", "x").await.unwrap_err();
        assert_eq!(err.to_string(), "Missing GUID");
    }
}
