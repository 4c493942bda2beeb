use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::SessionId,
    error::{ApiErrorBody, ApiRejection},
    protocol::{
        ActionRequest, ActionRequestBody, BriefingRequest, RatingRequest, RatingResponse,
        StartSessionRequest, StartSessionResponse,
    },
};

use crate::error::DispatchError;

const ERROR_BODY_SNIPPET_LEN: usize = 200;

/// Command path of the simulation backend. Every player-initiated request
/// goes out through here; the stream carries the consequences back.
#[async_trait]
pub trait CommandApi: Send + Sync {
    async fn start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, DispatchError>;
    async fn submit_action(&self, session: &SessionId, action: &str)
        -> Result<(), DispatchError>;
    async fn submit_briefing(
        &self,
        session: &SessionId,
        talking_points: &str,
    ) -> Result<(), DispatchError>;
    async fn submit_rating(
        &self,
        request: &RatingRequest,
    ) -> Result<RatingResponse, DispatchError>;
}

pub struct HttpCommandApi {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpCommandApi {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http: Client::new(),
            base_url,
            auth_token,
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut request = self.http.post(format!("{}{path}", self.base_url));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        request
    }
}

#[async_trait]
impl CommandApi for HttpCommandApi {
    async fn start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, DispatchError> {
        // Guests start through a separate endpoint with the same body.
        let path = if self.auth_token.is_some() {
            "/api/sim/start"
        } else {
            "/api/sim/start_guest"
        };
        let response = self.post(path).json(request).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn submit_action(
        &self,
        session: &SessionId,
        action: &str,
    ) -> Result<(), DispatchError> {
        let body = ActionRequestBody {
            action_request: ActionRequest {
                action: action.to_string(),
            },
        };
        let response = self
            .post(&format!("/api/sim/{session}/action"))
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn submit_briefing(
        &self,
        session: &SessionId,
        talking_points: &str,
    ) -> Result<(), DispatchError> {
        let body = BriefingRequest {
            talking_points: talking_points.to_string(),
        };
        let response = self
            .post(&format!("/api/sim/{session}/briefing"))
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn submit_rating(
        &self,
        request: &RatingRequest,
    ) -> Result<RatingResponse, DispatchError> {
        let response = self.post("/api/sim/rate").json(request).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

/// Maps non-success responses to [`DispatchError::Rejected`], pulling the
/// human-readable detail out of the backend's error envelope when present.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, DispatchError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let detail = match response.text().await {
        Ok(body) => match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(parsed) => parsed.detail,
            Err(_) if body.trim().is_empty() => "no error detail provided".to_string(),
            Err(_) => snippet(&body),
        },
        Err(err) => format!("unreadable error body: {err}"),
    };
    Err(ApiRejection { status, detail }.into())
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= ERROR_BODY_SNIPPET_LEN {
        return trimmed.to_string();
    }
    let cut = trimmed
        .char_indices()
        .take_while(|(index, _)| *index < ERROR_BODY_SNIPPET_LEN)
        .last()
        .map(|(index, ch)| index + ch.len_utf8())
        .unwrap_or(0);
    format!("{}...", &trimmed[..cut])
}
