use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use study_shared::api::AuthResponse;

use super::{
    BackendError, DataStore, Filter, Identity, IdentityProvider, ObjectStore, Order, Query, Table,
};

/// Client for a hosted backend exposing row (`/rest/v1`), object
/// (`/storage/v1`) and auth (`/auth/v1`) endpoints under one base URL.
pub struct RestBackend {
    client: Client,
    base_url: String,
    anon_key: String,
}

#[derive(Deserialize)]
struct TokenGrant {
    access_token: String,
    refresh_token: String,
    user: GrantUser,
}

#[derive(Deserialize)]
struct GrantUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        })
    }

    fn rows_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.name())
    }

    /// Attach the project key and the caller's bearer token, or the key
    /// itself for anonymous calls.
    fn authed(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        let bearer = if token.is_empty() { &self.anon_key } else { token };
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(BackendError::Unauthorized);
        }
        let message = response.text().await.unwrap_or_default();
        Err(BackendError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<AuthResponse, BackendError> {
        let response = self
            .client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", grant_type)])
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;

        let grant: TokenGrant = Self::check(response).await?.json().await?;
        Ok(AuthResponse {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            user_id: grant.user.id,
        })
    }
}

/// Render a filter value as the backend expects it in query strings.
fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Query string pairs for a row selector.
pub(crate) fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = Vec::new();

    for filter in &query.filters {
        match filter {
            Filter::Eq(column, Value::Null) => params.push((column.clone(), "is.null".to_string())),
            Filter::Eq(column, value) => params.push((column.clone(), format!("eq.{}", literal(value)))),
            Filter::In(column, values) => {
                let list: Vec<String> = values
                    .iter()
                    .map(|v| format!("\"{}\"", literal(v).replace('"', "\\\"")))
                    .collect();
                params.push((column.clone(), format!("in.({})", list.join(","))));
            }
        }
    }

    if !query.order.is_empty() {
        let order: Vec<String> = query
            .order
            .iter()
            .map(|(column, dir)| match dir {
                Order::Asc => format!("{column}.asc"),
                Order::Desc => format!("{column}.desc"),
            })
            .collect();
        params.push(("order".to_string(), order.join(",")));
    }

    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }

    params
}

#[async_trait]
impl DataStore for RestBackend {
    async fn select(&self, token: &str, query: &Query) -> Result<Vec<Value>, BackendError> {
        let mut params = query_params(query);
        params.insert(0, ("select".to_string(), "*".to_string()));

        let request = self.client.get(self.rows_url(query.table)).query(&params);
        let response = self.authed(request, token).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn insert(
        &self,
        token: &str,
        table: Table,
        rows: Vec<Value>,
    ) -> Result<Vec<Value>, BackendError> {
        let request = self
            .client
            .post(self.rows_url(table))
            .header("Prefer", "return=representation")
            .json(&rows);
        let response = self.authed(request, token).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn update(
        &self,
        token: &str,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, BackendError> {
        let request = self
            .client
            .patch(self.rows_url(query.table))
            .query(&query_params(query))
            .header("Prefer", "return=representation")
            .json(&patch);
        let response = self.authed(request, token).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete(&self, token: &str, query: &Query) -> Result<u64, BackendError> {
        let request = self
            .client
            .delete(self.rows_url(query.table))
            .query(&query_params(query))
            .header("Prefer", "return=representation");
        let response = self.authed(request, token).send().await?;
        let removed: Vec<Value> = Self::check(response).await?.json().await?;
        Ok(removed.len() as u64)
    }
}

#[async_trait]
impl ObjectStore for RestBackend {
    async fn upload(
        &self,
        token: &str,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BackendError> {
        let request = self
            .client
            .post(format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes);
        let response = self.authed(request, token).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path)
    }
}

#[async_trait]
impl IdentityProvider for RestBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError> {
        let body = serde_json::json!({ "email": email, "password": password });
        self.token_grant("password", body).await.map_err(|e| match e {
            // Wrong credentials come back as 400.
            BackendError::Rejected { status: 400, .. } => BackendError::Unauthorized,
            other => other,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, BackendError> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        self.token_grant("refresh_token", body).await.map_err(|e| match e {
            BackendError::Rejected { status: 400, .. } => BackendError::Unauthorized,
            other => other,
        })
    }

    async fn user(&self, access_token: &str) -> Result<Identity, BackendError> {
        let request = self.client.get(format!("{}/auth/v1/user", self.base_url));
        let response = self.authed(request, access_token).send().await?;
        let user: GrantUser = Self::check(response).await?.json().await?;
        Ok(Identity {
            id: user.id,
            email: user.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_selector_as_query_string() {
        let query = Query::table(Table::Comments)
            .eq("topic_id", "t-1")
            .eq("parent_id", Value::Null)
            .any_of("id", ["a", "b"])
            .order("created_at", Order::Asc)
            .limit(10);

        let params = query_params(&query);
        assert_eq!(
            params,
            vec![
                ("topic_id".to_string(), "eq.t-1".to_string()),
                ("parent_id".to_string(), "is.null".to_string()),
                ("id".to_string(), "in.(\"a\",\"b\")".to_string()),
                ("order".to_string(), "created_at.asc".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn public_url_points_at_bucket() {
        let backend = RestBackend::new("https://example.test/", "key").unwrap();
        assert_eq!(
            backend.public_url("project_files", "0.5.png"),
            "https://example.test/storage/v1/object/public/project_files/0.5.png"
        );
    }
}
