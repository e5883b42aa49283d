use axum::{
    extract::{Path, Query as QueryParams, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Map, Value};
use study_shared::api::{
    ChangeKind, ChangedTable, CreateTopicRequest, ScheduleRange, TopicListParams,
    UpdateStatusRequest, UpdateTopicRequest,
};
use study_shared::projection::TopicQuery;
use study_shared::{Topic, TopicSchedule, TopicStatus, TopicWithSchedules};

use crate::auth::AuthUser;
use crate::backend::{Db, Order, Query, Table};
use crate::error::AppError;
use crate::routes::AppState;

use super::timestamp;

/// Every topic with its schedules, newest first.
pub(crate) async fn fetch_all(db: &Db<'_>) -> Result<Vec<TopicWithSchedules>, AppError> {
    let topics: Vec<Topic> = db
        .fetch(&Query::table(Table::Topics).order("created_at", Order::Desc))
        .await?;
    let schedules: Vec<TopicSchedule> = db
        .fetch(&Query::table(Table::TopicSchedules).order("start_date", Order::Asc))
        .await?;

    Ok(TopicWithSchedules::join(topics, schedules))
}

async fn fetch_one(db: &Db<'_>, topic_id: &str) -> Result<TopicWithSchedules, AppError> {
    let topic: Topic = db
        .fetch_one(Query::table(Table::Topics).eq("id", topic_id))
        .await?
        .ok_or(AppError::NotFound)?;
    let topic_schedules = fetch_schedules(db, topic_id).await?;

    Ok(TopicWithSchedules {
        topic,
        topic_schedules,
    })
}

async fn fetch_schedules(db: &Db<'_>, topic_id: &str) -> Result<Vec<TopicSchedule>, AppError> {
    Ok(db
        .fetch(
            &Query::table(Table::TopicSchedules)
                .eq("topic_id", topic_id)
                .order("start_date", Order::Asc),
        )
        .await?)
}

/// Fails with `NotFound` unless the topic exists.
pub(crate) async fn ensure_exists(db: &Db<'_>, topic_id: &str) -> Result<Topic, AppError> {
    db.fetch_one(Query::table(Table::Topics).eq("id", topic_id))
        .await?
        .ok_or(AppError::NotFound)
}

async fn require_owner(db: &Db<'_>, topic_id: &str, user: &AuthUser) -> Result<Topic, AppError> {
    let topic = ensure_exists(db, topic_id).await?;
    if topic.created_by != user.id {
        return Err(AppError::Forbidden);
    }
    Ok(topic)
}

/// Insert the complete ranges; ranges missing either end are dropped.
async fn insert_schedules(
    db: &Db<'_>,
    topic_id: &str,
    ranges: &[ScheduleRange],
) -> Result<Vec<TopicSchedule>, AppError> {
    let rows: Vec<Value> = ranges
        .iter()
        .filter_map(ScheduleRange::complete)
        .map(|(start, end)| {
            json!({
                "topic_id": topic_id,
                "start_date": start,
                "end_date": end,
            })
        })
        .collect();

    Ok(db.insert(Table::TopicSchedules, rows).await?)
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn clean_description(description: Option<String>) -> Value {
    match description.as_deref().map(str::trim) {
        Some(d) if !d.is_empty() => Value::String(d.to_string()),
        _ => Value::Null,
    }
}

/// GET /api/v1/topics
pub async fn list_topics(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(params): QueryParams<TopicListParams>,
) -> Result<Json<Vec<TopicWithSchedules>>, AppError> {
    let all = fetch_all(&state.db(&user)).await?;

    let query = TopicQuery {
        category: params.category.unwrap_or_default(),
        search: params.q.unwrap_or_default(),
        sort: params.sort.unwrap_or_default(),
    };
    let visible = query.apply(&all).into_iter().cloned().collect();

    Ok(Json(visible))
}

/// POST /api/v1/topics
pub async fn create_topic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateTopicRequest>,
) -> Result<(StatusCode, Json<TopicWithSchedules>), AppError> {
    let title = req.title.trim();
    if title.is_empty() {
        return Err(AppError::Validation("Topic title is required".to_string()));
    }

    let db = state.db(&user);
    let topic: Topic = db
        .insert_one(
            Table::Topics,
            json!({
                "title": title,
                "description": clean_description(req.description),
                "category": req.category,
                "tags": clean_tags(req.tags),
                "status": TopicStatus::NotStarted,
                "created_by": user.id,
            }),
        )
        .await?;

    let topic_schedules = insert_schedules(&db, &topic.id, &req.schedules).await?;

    tracing::info!(topic_id = %topic.id, schedules = topic_schedules.len(), "Created topic");
    state
        .changes
        .publish(ChangedTable::Topics, ChangeKind::Insert, &topic.id, None);

    Ok((
        StatusCode::CREATED,
        Json(TopicWithSchedules {
            topic,
            topic_schedules,
        }),
    ))
}

/// GET /api/v1/topics/:id
pub async fn get_topic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
) -> Result<Json<TopicWithSchedules>, AppError> {
    Ok(Json(fetch_one(&state.db(&user), &topic_id).await?))
}

/// PATCH /api/v1/topics/:id
pub async fn update_topic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
    Json(req): Json<UpdateTopicRequest>,
) -> Result<Json<TopicWithSchedules>, AppError> {
    let db = state.db(&user);
    require_owner(&db, &topic_id, &user).await?;

    let mut patch = Map::new();
    if let Some(title) = req.title {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Topic title is required".to_string()));
        }
        patch.insert("title".to_string(), Value::String(title.to_string()));
    }
    if req.description.is_some() {
        patch.insert("description".to_string(), clean_description(req.description));
    }
    if let Some(category) = req.category {
        patch.insert("category".to_string(), json!(category));
    }
    if let Some(tags) = req.tags {
        patch.insert("tags".to_string(), json!(clean_tags(tags)));
    }
    patch.insert("updated_at".to_string(), timestamp());

    let selector = Query::table(Table::Topics).eq("id", topic_id.as_str());
    let updated: Vec<Topic> = db.update(&selector, Value::Object(patch)).await?;
    let topic = updated.into_iter().next().ok_or(AppError::NotFound)?;

    // Schedules are replaced wholesale, never diffed.
    let topic_schedules = match req.schedules {
        Some(ranges) => {
            db.delete(&Query::table(Table::TopicSchedules).eq("topic_id", topic_id.as_str()))
                .await?;
            insert_schedules(&db, &topic_id, &ranges).await?
        }
        None => fetch_schedules(&db, &topic_id).await?,
    };

    state
        .changes
        .publish(ChangedTable::Topics, ChangeKind::Update, &topic_id, None);

    Ok(Json(TopicWithSchedules {
        topic,
        topic_schedules,
    }))
}

/// PATCH /api/v1/topics/:id/status
pub async fn update_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Topic>, AppError> {
    let selector = Query::table(Table::Topics).eq("id", topic_id.as_str());
    let patch = json!({
        "status": req.status,
        "updated_at": timestamp(),
    });

    let updated: Vec<Topic> = state.db(&user).update(&selector, patch).await?;
    let topic = updated.into_iter().next().ok_or(AppError::NotFound)?;

    state
        .changes
        .publish(ChangedTable::Topics, ChangeKind::Update, &topic_id, None);

    Ok(Json(topic))
}

/// DELETE /api/v1/topics/:id
pub async fn delete_topic(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let db = state.db(&user);
    require_owner(&db, &topic_id, &user).await?;

    db.delete(&Query::table(Table::TopicSchedules).eq("topic_id", topic_id.as_str()))
        .await?;
    db.delete(&Query::table(Table::Topics).eq("id", topic_id.as_str()))
        .await?;

    tracing::info!(topic_id = %topic_id, "Deleted topic");
    state
        .changes
        .publish(ChangedTable::Topics, ChangeKind::Delete, &topic_id, None);

    Ok(StatusCode::NO_CONTENT)
}
