use std::path::Path;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use reqwest::{multipart, Client, Method, RequestBuilder, StatusCode};
use study_shared::{
    api::{
        AuthResponse, CreateCommentRequest, CreateTopicRequest, LoginRequest, RefreshRequest,
        TopicListParams, UpdateCommentRequest, UpdateProfileRequest, UpdateStatusRequest,
        UpdateTopicRequest,
    },
    Attachment, Comment, Profile, Topic, TopicStatus, TopicWithSchedules,
};

use super::auth::AuthTokens;

/// JWT payload claims we need for expiry checking
#[derive(serde::Deserialize)]
struct JwtClaims {
    exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not authenticated")]
    Unauthorized,
    #[error("Access forbidden")]
    Forbidden,
    #[error("Resource not found")]
    NotFound,
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("File too large: {0}")]
    TooLarge(String),
    #[error("Server error: {0}")]
    Server(String),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Pull the `error` field out of a JSON error body, or fall back to the raw text.
fn error_message(text: String) -> String {
    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(text)
}

/// MIME type for an upload, from its extension.
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Option<AuthTokens>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens: None,
        }
    }

    /// Load tokens from disk
    pub fn load_tokens(&mut self) -> Result<bool> {
        self.tokens = AuthTokens::load()?;
        Ok(self.tokens.is_some())
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.user_id.as_str())
    }

    /// Build URL for endpoint
    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Decode JWT payload and extract expiration time
    fn decode_token_exp(token: &str) -> Option<i64> {
        // JWT format: header.payload.signature
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return None;
        }

        let payload = URL_SAFE_NO_PAD.decode(parts[1]).ok()?;
        let claims: JwtClaims = serde_json::from_slice(&payload).ok()?;

        Some(claims.exp)
    }

    /// Check if the access token is expiring soon (within 60 seconds)
    fn is_token_expiring_soon(&self) -> bool {
        let Some(tokens) = &self.tokens else {
            return true; // No token = treat as expired
        };

        let Some(exp) = Self::decode_token_exp(&tokens.access_token) else {
            return false; // Opaque token, let the server decide
        };

        let now = chrono::Utc::now().timestamp();
        exp < now + 60
    }

    /// Ensure we have a valid token, refreshing if needed
    /// Returns true if we have a valid token, false if refresh failed
    pub async fn ensure_valid_token(&mut self) -> bool {
        if !self.is_authenticated() {
            return false;
        }

        if self.is_token_expiring_soon() {
            if let Err(e) = self.refresh().await {
                tracing::warn!("Token refresh failed: {}", e);
                return false;
            }
        }

        true
    }

    // ============ Authenticated Request Helpers ============

    /// Start an authenticated request, refreshing the token first if needed.
    async fn authed(&mut self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        if !self.ensure_valid_token().await {
            return Err(ApiError::Unauthorized);
        }
        let token = self
            .tokens
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(ApiError::Unauthorized)?;

        Ok(self.client.request(method, self.url(path)).bearer_auth(token))
    }

    async fn authed_get(&mut self, path: &str) -> Result<reqwest::Response, ApiError> {
        Ok(self.authed(Method::GET, path).await?.send().await?)
    }

    async fn authed_post<T: serde::Serialize>(
        &mut self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ApiError> {
        Ok(self.authed(Method::POST, path).await?.json(body).send().await?)
    }

    async fn authed_patch<T: serde::Serialize>(
        &mut self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, ApiError> {
        Ok(self.authed(Method::PATCH, path).await?.json(body).send().await?)
    }

    async fn authed_delete(&mut self, path: &str) -> Result<reqwest::Response, ApiError> {
        Ok(self.authed(Method::DELETE, path).await?.send().await?)
    }

    async fn error_for(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::FORBIDDEN => ApiError::Forbidden,
            StatusCode::NOT_FOUND => ApiError::NotFound,
            StatusCode::PAYLOAD_TOO_LARGE => ApiError::TooLarge(error_message(text)),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                ApiError::Validation(error_message(text))
            }
            _ => ApiError::Server(format!("{}: {}", status, error_message(text))),
        }
    }

    /// Handle API response
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => {
                response.json().await.map_err(ApiError::Network)
            }
            _ => Err(Self::error_for(response).await),
        }
    }

    /// Handle empty response
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<(), ApiError> {
        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            _ => Err(Self::error_for(response).await),
        }
    }

    fn store_session(&mut self, auth: AuthResponse) -> Result<(), ApiError> {
        let tokens = AuthTokens {
            access_token: auth.access_token,
            refresh_token: auth.refresh_token,
            user_id: auth.user_id,
        };
        tokens.save().map_err(ApiError::Other)?;
        self.tokens = Some(tokens);
        Ok(())
    }

    // ============ Auth ============

    pub async fn login(&mut self, email: &str, password: &str) -> Result<Profile, ApiError> {
        let req = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };

        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(&req)
            .send()
            .await?;

        let auth: AuthResponse = self.handle_response(response).await?;
        self.store_session(auth)?;

        self.me().await
    }

    /// Forget the session locally; tokens expire on their own.
    pub fn logout(&mut self) -> Result<(), ApiError> {
        self.tokens = None;
        AuthTokens::delete().map_err(ApiError::Other)?;
        Ok(())
    }

    pub async fn refresh(&mut self) -> Result<(), ApiError> {
        let refresh_token = self
            .tokens
            .as_ref()
            .map(|t| t.refresh_token.clone())
            .ok_or(ApiError::Unauthorized)?;

        let req = RefreshRequest { refresh_token };

        let response = self
            .client
            .post(self.url("/auth/refresh"))
            .json(&req)
            .send()
            .await?;

        let auth: AuthResponse = self.handle_response(response).await?;
        self.store_session(auth)
    }

    pub async fn me(&mut self) -> Result<Profile, ApiError> {
        let response = self.authed_get("/auth/me").await?;
        self.handle_response(response).await
    }

    pub async fn update_profile(&mut self, req: &UpdateProfileRequest) -> Result<Profile, ApiError> {
        let response = self.authed_patch("/auth/me", req).await?;
        self.handle_response(response).await
    }

    // ============ Topics ============

    pub async fn list_topics(
        &mut self,
        params: &TopicListParams,
    ) -> Result<Vec<TopicWithSchedules>, ApiError> {
        let response = self
            .authed(Method::GET, "/topics")
            .await?
            .query(params)
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn get_topic(&mut self, topic_id: &str) -> Result<TopicWithSchedules, ApiError> {
        let response = self.authed_get(&format!("/topics/{}", topic_id)).await?;
        self.handle_response(response).await
    }

    pub async fn create_topic(
        &mut self,
        req: &CreateTopicRequest,
    ) -> Result<TopicWithSchedules, ApiError> {
        let response = self.authed_post("/topics", req).await?;
        self.handle_response(response).await
    }

    pub async fn update_topic(
        &mut self,
        topic_id: &str,
        req: &UpdateTopicRequest,
    ) -> Result<TopicWithSchedules, ApiError> {
        let response = self
            .authed_patch(&format!("/topics/{}", topic_id), req)
            .await?;
        self.handle_response(response).await
    }

    pub async fn set_status(&mut self, topic_id: &str, status: TopicStatus) -> Result<Topic, ApiError> {
        let req = UpdateStatusRequest { status };
        let response = self
            .authed_patch(&format!("/topics/{}/status", topic_id), &req)
            .await?;
        self.handle_response(response).await
    }

    pub async fn delete_topic(&mut self, topic_id: &str) -> Result<(), ApiError> {
        let response = self.authed_delete(&format!("/topics/{}", topic_id)).await?;
        self.handle_empty_response(response).await
    }

    // ============ Comments ============

    /// Flat comment list in creation order; callers assemble the reply forest.
    pub async fn list_comments(&mut self, topic_id: &str) -> Result<Vec<Comment>, ApiError> {
        let response = self
            .authed_get(&format!("/topics/{}/comments", topic_id))
            .await?;
        self.handle_response(response).await
    }

    pub async fn create_comment(
        &mut self,
        topic_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<Comment, ApiError> {
        let req = CreateCommentRequest {
            content: content.to_string(),
            parent_id: parent_id.map(str::to_string),
            attachment: None,
        };
        let response = self
            .authed_post(&format!("/topics/{}/comments", topic_id), &req)
            .await?;
        self.handle_response(response).await
    }

    pub async fn update_comment(&mut self, comment_id: &str, content: &str) -> Result<Comment, ApiError> {
        let req = UpdateCommentRequest {
            content: content.to_string(),
        };
        let response = self
            .authed_patch(&format!("/comments/{}", comment_id), &req)
            .await?;
        self.handle_response(response).await
    }

    pub async fn delete_comment(&mut self, comment_id: &str) -> Result<(), ApiError> {
        let response = self
            .authed_delete(&format!("/comments/{}", comment_id))
            .await?;
        self.handle_empty_response(response).await
    }

    // ============ Attachments ============

    pub async fn list_attachments(&mut self, topic_id: &str) -> Result<Vec<Attachment>, ApiError> {
        let response = self
            .authed_get(&format!("/topics/{}/attachments", topic_id))
            .await?;
        self.handle_response(response).await
    }

    /// Upload a local file to a topic, optionally attaching it to one of its comments.
    pub async fn upload_attachment(
        &mut self,
        topic_id: &str,
        path: &Path,
        comment_id: Option<&str>,
    ) -> Result<Attachment, ApiError> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Could not read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(guess_mime(path))?;
        let mut form = multipart::Form::new().part("file", part);
        if let Some(comment_id) = comment_id {
            form = form.text("comment_id", comment_id.to_string());
        }

        let response = self
            .authed(Method::POST, &format!("/topics/{}/attachments", topic_id))
            .await?
            .multipart(form)
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn delete_attachment(&mut self, attachment_id: &str) -> Result<(), ApiError> {
        let response = self
            .authed_delete(&format!("/attachments/{}", attachment_id))
            .await?;
        self.handle_empty_response(response).await
    }

    // ============ Changes ============

    /// Open the server-sent change stream. The caller drives the body.
    pub async fn open_change_stream(&mut self) -> Result<reqwest::Response, ApiError> {
        let response = self
            .authed(Method::GET, "/changes")
            .await?
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(Self::error_for(response).await);
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_exp(exp: i64) -> String {
        let payload = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp}}}"));
        format!("header.{payload}.signature")
    }

    #[test]
    fn reads_expiry_from_jwt_payload() {
        assert_eq!(ApiClient::decode_token_exp(&jwt_with_exp(1_700_000_000)), Some(1_700_000_000));
        assert_eq!(ApiClient::decode_token_exp("opaque-token"), None);
    }

    #[test]
    fn opaque_tokens_are_not_refreshed_early() {
        let mut client = ApiClient::new("http://localhost:3000/");
        client.tokens = Some(AuthTokens {
            access_token: "user-id".into(),
            refresh_token: "refresh-user-id".into(),
            user_id: "user-id".into(),
        });
        assert!(!client.is_token_expiring_soon());

        client.tokens = Some(AuthTokens {
            access_token: jwt_with_exp(chrono::Utc::now().timestamp() + 10),
            refresh_token: String::new(),
            user_id: "u".into(),
        });
        assert!(client.is_token_expiring_soon());
        assert_eq!(client.url("/topics"), "http://localhost:3000/api/v1/topics");
    }

    #[test]
    fn error_bodies_are_unwrapped() {
        assert_eq!(error_message(r#"{"error":"Topic title is required"}"#.into()), "Topic title is required");
        assert_eq!(error_message("plain".into()), "plain");
    }

    #[test]
    fn guesses_upload_mime_types() {
        assert_eq!(guess_mime(Path::new("/tmp/photo.JPG")), "image/jpeg");
        assert_eq!(guess_mime(Path::new("notes")), "application/octet-stream");
    }
}
