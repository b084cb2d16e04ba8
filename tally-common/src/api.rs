use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response of `POST /api/v8/sessions`. The interesting part is the
/// user payload carrying the api token we keep for later requests.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub data: UserData,
}

/// Response of `GET /api/v8/me`. `since` is the server cursor for
/// incremental pulls.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub since: u64,
    pub data: UserData,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserData {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub fullname: String,
    #[serde(default)]
    pub default_wid: u64,
    #[serde(default)]
    pub record_timeline: bool,
    #[serde(default = "default_true")]
    pub store_start_and_stop_time: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspaces: Option<Vec<WorkspaceData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clients: Option<Vec<ClientData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<ProjectData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TaskData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<TagData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_entries: Option<Vec<TimeEntryData>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceData {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub premium: bool,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub only_admins_may_create_projects: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientData {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<Uuid>,
    pub wid: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectData {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<Uuid>,
    pub wid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<u64>,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub billable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskData {
    pub id: u64,
    pub wid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u64>,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagData {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<Uuid>,
    pub wid: u64,
    pub name: String,
}

/// Time entry as it travels over the wire. Times are unix seconds;
/// a negative `duration` means the entry is running since `-duration`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeEntryData {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<Uuid>,
    pub wid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<u64>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub billable: bool,
    pub start: i64,
    #[serde(default)]
    pub stop: i64,
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_with: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_deleted_at: Option<i64>,
}

/// One operation inside a batch push. `body` is absent for deletes.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub method: String,
    pub relative_url: String,
    pub guid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Wrapper the server expects around a pushed entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct TimeEntryBody {
    pub time_entry: TimeEntryData,
}

/// Per-operation outcome, returned as an array parallel to the request.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchUpdateResult {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl BatchUpdateResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Servers wrap the entity either as `{"data": {...}}` or send it
    /// bare; error outcomes carry a plain string body.
    pub fn time_entry(&self) -> Option<TimeEntryData> {
        let body = self.body.as_ref()?;
        let inner = body.get("data").unwrap_or(body);
        serde_json::from_value(inner.clone()).ok()
    }

    pub fn error_message(&self) -> String {
        match &self.body {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other
                .get("error")
                .and_then(|e| e.as_str())
                .map(str::to_owned)
                .unwrap_or_else(|| other.to_string()),
            None => format!("request failed with status {}", self.status),
        }
    }
}

/// Frames exchanged with the streaming endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Authenticate { api_token: String },
    Ping,
    Pong,
    Update,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateCheckResponse {
    pub version: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub topic: String,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_encoded_image: Option<String>,
}

fn default_true() -> bool {
    true
}
