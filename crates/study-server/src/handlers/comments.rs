use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::json;
use study_shared::api::{
    ChangeKind, ChangedTable, CreateCommentRequest, UpdateCommentRequest,
};
use study_shared::{Attachment, AuthorProfile, Comment, Profile};

use crate::auth::AuthUser;
use crate::backend::{Db, Order, Query, Table};
use crate::error::AppError;
use crate::routes::AppState;

use super::timestamp;
use super::topics::ensure_exists;

/// Fill in `profiles` on each comment from the author's profile row.
async fn attach_profiles(db: &Db<'_>, comments: &mut [Comment]) -> Result<(), AppError> {
    let author_ids: HashSet<&str> = comments.iter().map(|c| c.user_id.as_str()).collect();
    if author_ids.is_empty() {
        return Ok(());
    }

    let profiles: Vec<Profile> = db
        .fetch(&Query::table(Table::Profiles).any_of("id", author_ids))
        .await?;
    let by_id: HashMap<String, AuthorProfile> = profiles
        .into_iter()
        .map(|p| {
            (
                p.id,
                AuthorProfile {
                    username: p.username,
                    avatar_url: p.avatar_url,
                },
            )
        })
        .collect();

    for comment in comments.iter_mut() {
        comment.profiles = by_id.get(&comment.user_id).cloned();
    }
    Ok(())
}

async fn require_author(db: &Db<'_>, comment_id: &str, user: &AuthUser) -> Result<Comment, AppError> {
    let comment: Comment = db
        .fetch_one(Query::table(Table::Comments).eq("id", comment_id))
        .await?
        .ok_or(AppError::NotFound)?;

    if comment.user_id != user.id {
        return Err(AppError::Forbidden);
    }
    Ok(comment)
}

/// GET /api/v1/topics/:id/comments
///
/// Flat and oldest first; clients rebuild the reply forest with
/// `study_shared::thread::build_forest`.
pub async fn list_comments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
) -> Result<Json<Vec<Comment>>, AppError> {
    let db = state.db(&user);
    ensure_exists(&db, &topic_id).await?;

    let mut comments: Vec<Comment> = db
        .fetch(
            &Query::table(Table::Comments)
                .eq("topic_id", topic_id.as_str())
                .order("created_at", Order::Asc),
        )
        .await?;
    attach_profiles(&db, &mut comments).await?;

    Ok(Json(comments))
}

/// POST /api/v1/topics/:id/comments
pub async fn create_comment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Comment>), AppError> {
    let content = req.content.trim();
    if content.is_empty() && req.attachment.is_none() {
        return Err(AppError::Validation("Comment content is required".to_string()));
    }

    let db = state.db(&user);
    ensure_exists(&db, &topic_id).await?;

    if let Some(parent_id) = req.parent_id.as_deref() {
        let parent: Option<Comment> = db
            .fetch_one(Query::table(Table::Comments).eq("id", parent_id))
            .await?;
        match parent {
            Some(parent) if parent.topic_id == topic_id => {}
            Some(_) => {
                return Err(AppError::Validation(
                    "Parent comment belongs to another topic".to_string(),
                ))
            }
            None => return Err(AppError::Validation("Parent comment not found".to_string())),
        }
    }

    let comment: Comment = db
        .insert_one(
            Table::Comments,
            json!({
                "topic_id": topic_id,
                "user_id": user.id,
                "parent_id": req.parent_id,
                "content": content,
            }),
        )
        .await?;

    if let Some(attachment) = req.attachment {
        let stored: Attachment = db
            .insert_one(
                Table::Attachments,
                json!({
                    "topic_id": topic_id,
                    "comment_id": comment.id,
                    "file_url": attachment.file_url,
                    "file_type": attachment.file_type,
                    "uploaded_by": user.id,
                }),
            )
            .await?;
        state.changes.publish(
            ChangedTable::Attachments,
            ChangeKind::Insert,
            &stored.id,
            Some(&topic_id),
        );
    }

    let mut created = [comment];
    attach_profiles(&db, &mut created).await?;
    let [comment] = created;

    tracing::debug!(comment_id = %comment.id, topic_id = %topic_id, "Created comment");
    state.changes.publish(
        ChangedTable::Comments,
        ChangeKind::Insert,
        &comment.id,
        Some(&topic_id),
    );

    Ok((StatusCode::CREATED, Json(comment)))
}

/// PATCH /api/v1/comments/:id
pub async fn update_comment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(comment_id): Path<String>,
    Json(req): Json<UpdateCommentRequest>,
) -> Result<Json<Comment>, AppError> {
    let content = req.content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Comment content is required".to_string()));
    }

    let db = state.db(&user);
    require_author(&db, &comment_id, &user).await?;

    let mut updated: Vec<Comment> = db
        .update(
            &Query::table(Table::Comments).eq("id", comment_id.as_str()),
            json!({
                "content": content,
                "updated_at": timestamp(),
            }),
        )
        .await?;
    attach_profiles(&db, &mut updated).await?;
    let comment = updated.into_iter().next().ok_or(AppError::NotFound)?;

    state.changes.publish(
        ChangedTable::Comments,
        ChangeKind::Update,
        &comment.id,
        Some(&comment.topic_id),
    );

    Ok(Json(comment))
}

/// DELETE /api/v1/comments/:id
///
/// Replies are kept; with their parent gone they surface as top-level comments.
pub async fn delete_comment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(comment_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let db = state.db(&user);
    let comment = require_author(&db, &comment_id, &user).await?;

    db.delete(&Query::table(Table::Comments).eq("id", comment_id.as_str()))
        .await?;

    state.changes.publish(
        ChangedTable::Comments,
        ChangeKind::Delete,
        &comment_id,
        Some(&comment.topic_id),
    );

    Ok(StatusCode::NO_CONTENT)
}
