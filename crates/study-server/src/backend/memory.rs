use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use study_shared::api::AuthResponse;
use uuid::Uuid;

use super::{
    BackendError, DataStore, Filter, Identity, IdentityProvider, ObjectStore, Order, Query, Table,
};

/// In-process stand-in for the hosted backend. Used when no backend URL is
/// configured and by the API tests. Access tokens are the user id itself.
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<Table, Vec<Value>>>,
    users: Mutex<HashMap<String, String>>,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn matches(row: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| match filter {
        Filter::Eq(column, value) => row.get(column).unwrap_or(&Value::Null) == value,
        Filter::In(column, values) => row.get(column).is_some_and(|v| values.contains(v)),
    })
}

/// Orders JSON scalars the way the row store would for the columns we sort
/// on: strings (including RFC 3339 timestamps) lexically, numbers numerically.
fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(std::cmp::Ordering::Equal),
        (Value::Null, Value::Null) => std::cmp::Ordering::Equal,
        (Value::Null, _) => std::cmp::Ordering::Greater,
        (_, Value::Null) => std::cmp::Ordering::Less,
        _ => std::cmp::Ordering::Equal,
    }
}

impl MemoryBackend {
    fn require_user(&self, token: &str) -> Result<(), BackendError> {
        if token.is_empty() || !lock(&self.users).values().any(|id| id == token) {
            return Err(BackendError::Unauthorized);
        }
        Ok(())
    }

    fn auth_response(user_id: &str) -> AuthResponse {
        AuthResponse {
            access_token: user_id.to_string(),
            refresh_token: format!("refresh-{user_id}"),
            user_id: user_id.to_string(),
        }
    }
}

#[async_trait]
impl DataStore for MemoryBackend {
    async fn select(&self, _token: &str, query: &Query) -> Result<Vec<Value>, BackendError> {
        let tables = lock(&self.tables);
        let mut rows: Vec<Value> = tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|r| matches(r, &query.filters)).cloned().collect())
            .unwrap_or_default();

        if !query.order.is_empty() {
            rows.sort_by(|a, b| {
                query
                    .order
                    .iter()
                    .map(|(column, dir)| {
                        let ord = compare(
                            a.get(column).unwrap_or(&Value::Null),
                            b.get(column).unwrap_or(&Value::Null),
                        );
                        match dir {
                            Order::Asc => ord,
                            Order::Desc => ord.reverse(),
                        }
                    })
                    .find(|o| o.is_ne())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(
        &self,
        token: &str,
        table: Table,
        rows: Vec<Value>,
    ) -> Result<Vec<Value>, BackendError> {
        self.require_user(token)?;

        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let Value::Object(mut fields) = row else {
                return Err(BackendError::Rejected {
                    status: 400,
                    message: "row must be an object".to_string(),
                });
            };
            let stamp = now();
            fields
                .entry("id")
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            fields.entry("created_at").or_insert_with(|| stamp.clone());
            if table != Table::Attachments {
                fields.entry("updated_at").or_insert(stamp);
            }
            stored.push(Value::Object(fields));
        }

        lock(&self.tables)
            .entry(table)
            .or_default()
            .extend(stored.iter().cloned());
        Ok(stored)
    }

    async fn update(
        &self,
        token: &str,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, BackendError> {
        self.require_user(token)?;
        let Value::Object(patch) = patch else {
            return Err(BackendError::Rejected {
                status: 400,
                message: "patch must be an object".to_string(),
            });
        };

        let mut tables = lock(&self.tables);
        let mut updated = Vec::new();
        for row in tables.entry(query.table).or_default().iter_mut() {
            if !matches(row, &query.filters) {
                continue;
            }
            if let Value::Object(fields) = row {
                for (key, value) in &patch {
                    fields.insert(key.clone(), value.clone());
                }
                if query.table != Table::Attachments && !patch.contains_key("updated_at") {
                    fields.insert("updated_at".to_string(), now());
                }
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, token: &str, query: &Query) -> Result<u64, BackendError> {
        self.require_user(token)?;
        let mut tables = lock(&self.tables);
        let rows = tables.entry(query.table).or_default();
        let before = rows.len();
        rows.retain(|row| !matches(row, &query.filters));
        Ok((before - rows.len()) as u64)
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn upload(
        &self,
        token: &str,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), BackendError> {
        self.require_user(token)?;
        let key = format!("{bucket}/{path}");
        let mut objects = lock(&self.objects);
        if objects.contains_key(&key) {
            return Err(BackendError::Rejected {
                status: 409,
                message: format!("object {key} already exists"),
            });
        }
        objects.insert(key, bytes);
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{bucket}/{path}")
    }
}

#[async_trait]
impl IdentityProvider for MemoryBackend {
    /// Any non-empty password signs in; the first sign-in for an email
    /// registers the user and creates their profile row.
    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, BackendError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(BackendError::Unauthorized);
        }

        let (user_id, created) = {
            let mut users = lock(&self.users);
            match users.get(email) {
                Some(id) => (id.clone(), false),
                None => {
                    let id = Uuid::new_v4().to_string();
                    users.insert(email.to_string(), id.clone());
                    (id, true)
                }
            }
        };

        if created {
            let username = email.split('@').next().unwrap_or(email).to_string();
            let mut profile = Map::new();
            profile.insert("id".to_string(), Value::String(user_id.clone()));
            profile.insert("username".to_string(), Value::String(username));
            profile.insert("avatar_url".to_string(), Value::Null);
            self.insert(&user_id, Table::Profiles, vec![Value::Object(profile)])
                .await?;
        }

        Ok(Self::auth_response(&user_id))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<AuthResponse, BackendError> {
        let user_id = refresh_token
            .strip_prefix("refresh-")
            .ok_or(BackendError::Unauthorized)?;
        self.require_user(user_id)?;
        Ok(Self::auth_response(user_id))
    }

    async fn user(&self, access_token: &str) -> Result<Identity, BackendError> {
        let users = lock(&self.users);
        users
            .iter()
            .find(|(_, id)| id.as_str() == access_token)
            .map(|(email, id)| Identity {
                id: id.clone(),
                email: Some(email.clone()),
            })
            .ok_or(BackendError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn sign_in_registers_once() {
        let backend = MemoryBackend::default();
        let first = backend.sign_in("ada@example.com", "pw").await.unwrap();
        let second = backend.sign_in("ada@example.com", "pw").await.unwrap();
        assert_eq!(first.user_id, second.user_id);

        let profiles = backend
            .select("", &Query::table(Table::Profiles))
            .await
            .unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["username"], "ada");
    }

    #[tokio::test]
    async fn writes_require_a_known_token() {
        let backend = MemoryBackend::default();
        let err = backend
            .insert("nobody", Table::Topics, vec![json!({ "title": "x" })])
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unauthorized));
    }

    #[tokio::test]
    async fn filters_orders_and_limits() {
        let backend = MemoryBackend::default();
        let auth = backend.sign_in("a@b.c", "pw").await.unwrap();
        let token = auth.access_token.as_str();

        backend
            .insert(
                token,
                Table::Comments,
                vec![
                    json!({ "topic_id": "t1", "content": "b", "created_at": "2024-01-02T00:00:00Z" }),
                    json!({ "topic_id": "t1", "content": "a", "created_at": "2024-01-01T00:00:00Z" }),
                    json!({ "topic_id": "t2", "content": "c", "created_at": "2024-01-03T00:00:00Z" }),
                ],
            )
            .await
            .unwrap();

        let query = Query::table(Table::Comments)
            .eq("topic_id", "t1")
            .order("created_at", Order::Asc);
        let rows = backend.select(token, &query).await.unwrap();
        let contents: Vec<&str> = rows.iter().filter_map(|r| r["content"].as_str()).collect();
        assert_eq!(contents, ["a", "b"]);

        let newest = Query::table(Table::Comments)
            .order("created_at", Order::Desc)
            .limit(1);
        let rows = backend.select(token, &newest).await.unwrap();
        assert_eq!(rows[0]["content"], "c");

        let removed = backend
            .delete(token, &Query::table(Table::Comments).eq("topic_id", "t1"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
    }
}
