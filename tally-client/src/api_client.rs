use crate::error::EngineError;
use crate::settings::Proxy;
use reqwest::{Response, StatusCode};
use std::time::Duration;
use tally_common::api::{
    BatchUpdate, BatchUpdateResult, FeedbackRequest, MeResponse, SessionResponse,
    UpdateCheckResponse,
};
use tally_common::domain::UpdateChannel;
use tracing::debug;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Typed surface over the remote HTTP API. The base URL is injected so
/// tests can point the whole engine at a mock server.
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, app_name: &str, app_version: &str) -> Result<Self, EngineError> {
        Self::build(base_url, app_name, app_version, None)
    }

    /// Same client, but routed through the user's proxy.
    pub fn with_proxy(
        base_url: &str,
        app_name: &str,
        app_version: &str,
        proxy: &Proxy,
    ) -> Result<Self, EngineError> {
        Self::build(base_url, app_name, app_version, Some(proxy))
    }

    fn build(
        base_url: &str,
        app_name: &str,
        app_version: &str,
        proxy: Option<&Proxy>,
    ) -> Result<Self, EngineError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(format!("{app_name}/{app_version}"))
            .timeout(HTTP_TIMEOUT);
        if let Some(proxy) = proxy {
            let url = format!("http://{}:{}", proxy.host, proxy.port);
            let mut p = reqwest::Proxy::all(&url)
                .map_err(|e| EngineError::Network(e.to_string()))?;
            if !proxy.username.is_empty() {
                p = p.basic_auth(&proxy.username, &proxy.password);
            }
            builder = builder.proxy(p);
        }
        let client = builder.build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
        })
    }

    async fn handle_response_error(res: Response) -> Result<Response, EngineError> {
        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(EngineError::Unauthorized);
        }
        if status.is_server_error() {
            return Err(EngineError::Network(format!(
                "service unavailable: status {status}"
            )));
        }
        if !status.is_success() {
            return Err(EngineError::Internal(format!(
                "unexpected status {status}"
            )));
        }
        Ok(res)
    }

    /// `POST /api/v8/sessions`, basic auth with the user's email and
    /// password. The response payload carries the api token.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionResponse, EngineError> {
        debug!(email, "logging in");
        let url = format!("{}/api/v8/sessions", self.base_url);
        let res = self
            .client
            .post(&url)
            .basic_auth(email, Some(password))
            .send()
            .await?;
        let res = Self::handle_response_error(res).await?;
        Ok(res.json::<SessionResponse>().await?)
    }

    /// `GET /api/v8/me`. `since = 0` asks for everything; anything
    /// else is an incremental pull from that cursor.
    pub async fn me(
        &self,
        api_token: &str,
        since: u64,
        with_related_data: bool,
    ) -> Result<MeResponse, EngineError> {
        debug!(since, "pulling user data");
        let url = format!("{}/api/v8/me", self.base_url);
        let mut req = self
            .client
            .get(&url)
            .basic_auth(api_token, Some("api_token"))
            .query(&[("with_related_data", with_related_data)]);
        if since > 0 {
            req = req.query(&[("since", since)]);
        }
        let res = req.send().await?;
        let res = Self::handle_response_error(res).await?;
        Ok(res.json::<MeResponse>().await?)
    }

    /// `POST /api/v8/batch_updates`: an ordered array of operations,
    /// answered by an ordered array of outcomes.
    pub async fn batch_update(
        &self,
        api_token: &str,
        updates: &[BatchUpdate],
    ) -> Result<Vec<BatchUpdateResult>, EngineError> {
        debug!(count = updates.len(), "pushing batch");
        let url = format!("{}/api/v8/batch_updates", self.base_url);
        let res = self
            .client
            .post(&url)
            .basic_auth(api_token, Some("api_token"))
            .json(updates)
            .send()
            .await?;
        let res = Self::handle_response_error(res).await?;
        Ok(res.json::<Vec<BatchUpdateResult>>().await?)
    }

    /// Ask the update server whether the channel carries something
    /// newer. `None` means we are current.
    pub async fn check_updates(
        &self,
        app_name: &str,
        app_version: &str,
        channel: UpdateChannel,
    ) -> Result<Option<UpdateCheckResponse>, EngineError> {
        let url = format!("{}/api/v8/updates/{}", self.base_url, channel.as_str());
        let res = self
            .client
            .get(&url)
            .query(&[("app", app_name), ("version", app_version)])
            .send()
            .await?;
        if res.status() == StatusCode::NO_CONTENT || res.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let res = Self::handle_response_error(res).await?;
        Ok(Some(res.json::<UpdateCheckResponse>().await?))
    }

    /// `POST /api/v8/feedback`.
    pub async fn send_feedback(
        &self,
        api_token: &str,
        feedback: &FeedbackRequest,
    ) -> Result<(), EngineError> {
        let url = format!("{}/api/v8/feedback", self.base_url);
        let res = self
            .client
            .post(&url)
            .basic_auth(api_token, Some("api_token"))
            .json(feedback)
            .send()
            .await?;
        Self::handle_response_error(res).await?;
        Ok(())
    }
}
