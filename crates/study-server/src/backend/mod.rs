//! Contracts for the external backend-as-a-service: row store, object
//! storage and identity provider. Handlers only ever talk to these traits.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use study_shared::api::AuthResponse;

mod memory;
mod rest;

pub use memory::MemoryBackend;
pub use rest::RestBackend;

use crate::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Topics,
    TopicSchedules,
    Comments,
    Attachments,
    Profiles,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Topics => "topics",
            Self::TopicSchedules => "topic_schedules",
            Self::Comments => "comments",
            Self::Attachments => "attachments",
            Self::Profiles => "profiles",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

/// Table read/update/delete selector: equality filters, ordering, limit.
#[derive(Debug, Clone)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Vec<(String, Order)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn any_of<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.filters.push(Filter::In(column.to_string(), values));
        self
    }

    pub fn order(mut self, column: &str, order: Order) -> Self {
        self.order.push((column.to_string(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Not authenticated")]
    Unauthorized,

    #[error("Backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Backend returned no row for {0}")]
    Empty(&'static str),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected payload: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Row storage. `token` is the caller's access token; an empty token means
/// the anonymous role.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn select(&self, token: &str, query: &Query) -> Result<Vec<Value>, BackendError>;

    async fn insert(
        &self,
        token: &str,
        table: Table,
        rows: Vec<Value>,
    ) -> Result<Vec<Value>, BackendError>;

    async fn update(
        &self,
        token: &str,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, BackendError>;

    async fn delete(&self, token: &str, query: &Query) -> Result<u64, BackendError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        token: &str,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BackendError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError>;

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, BackendError>;

    async fn user(&self, access_token: &str) -> Result<Identity, BackendError>;
}

/// The three collaborators, usually backed by one service.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn DataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub identity: Arc<dyn IdentityProvider>,
}

impl Backend {
    pub fn memory() -> Self {
        let backend = Arc::new(MemoryBackend::default());
        Self {
            store: backend.clone(),
            objects: backend.clone(),
            identity: backend,
        }
    }

    pub fn rest(base_url: &str, anon_key: &str) -> Result<Self, BackendError> {
        let backend = Arc::new(RestBackend::new(base_url, anon_key)?);
        Ok(Self {
            store: backend.clone(),
            objects: backend.clone(),
            identity: backend,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        match config.backend_url.as_deref() {
            Some(url) => {
                tracing::info!("Using backend at {}", url);
                Self::rest(url, &config.backend_anon_key)
            }
            None => {
                tracing::warn!("BACKEND_URL not set, using in-memory backend");
                Ok(Self::memory())
            }
        }
    }
}

/// Row store bound to one caller, with typed decoding.
pub struct Db<'a> {
    store: &'a dyn DataStore,
    token: &'a str,
}

impl<'a> Db<'a> {
    pub fn new(store: &'a dyn DataStore, token: &'a str) -> Self {
        Self { store, token }
    }

    pub async fn fetch<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>, BackendError> {
        let rows = self.store.select(self.token, query).await?;
        decode_rows(rows)
    }

    pub async fn fetch_one<T: DeserializeOwned>(&self, query: Query) -> Result<Option<T>, BackendError> {
        let rows = self.fetch(&query.limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn insert<T: DeserializeOwned>(
        &self,
        table: Table,
        rows: Vec<Value>,
    ) -> Result<Vec<T>, BackendError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.store.insert(self.token, table, rows).await?;
        decode_rows(rows)
    }

    pub async fn insert_one<T: DeserializeOwned>(&self, table: Table, row: Value) -> Result<T, BackendError> {
        self.insert(table, vec![row])
            .await?
            .into_iter()
            .next()
            .ok_or(BackendError::Empty(table.name()))
    }

    pub async fn update<T: DeserializeOwned>(&self, query: &Query, patch: Value) -> Result<Vec<T>, BackendError> {
        let rows = self.store.update(self.token, query, patch).await?;
        decode_rows(rows)
    }

    pub async fn delete(&self, query: &Query) -> Result<u64, BackendError> {
        self.store.delete(self.token, query).await
    }
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, BackendError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(BackendError::from))
        .collect()
}
