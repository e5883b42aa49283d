use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::json;
use study_shared::api::{ChangeKind, ChangedTable};
use study_shared::{Attachment, Comment};

use crate::auth::AuthUser;
use crate::backend::{Order, Query, Table};
use crate::error::AppError;
use crate::routes::AppState;
use crate::upload;

use super::topics::ensure_exists;

struct UploadForm {
    file_name: String,
    content_type: String,
    bytes: Vec<u8>,
    comment_id: Option<String>,
}

fn multipart_error(err: MultipartError, limit: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(limit)
    } else {
        AppError::Validation(err.body_text())
    }
}

async fn read_form(mut multipart: Multipart, limit: usize) -> Result<UploadForm, AppError> {
    let mut file = None;
    let mut comment_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        match field.name() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                file = Some((file_name, content_type, bytes.to_vec()));
            }
            Some("comment_id") => {
                let value = field.text().await.map_err(|e| multipart_error(e, limit))?;
                let value = value.trim();
                if !value.is_empty() {
                    comment_id = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    let (file_name, content_type, bytes) =
        file.ok_or_else(|| AppError::Validation("Missing file field".to_string()))?;

    Ok(UploadForm {
        file_name,
        content_type,
        bytes,
        comment_id,
    })
}

/// POST /api/v1/topics/:id/attachments
pub async fn upload_attachment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Attachment>), AppError> {
    let limit = state.config.max_upload_bytes;
    let form = read_form(multipart, limit).await?;

    let db = state.db(&user);
    ensure_exists(&db, &topic_id).await?;

    if let Some(comment_id) = form.comment_id.as_deref() {
        let comment: Comment = db
            .fetch_one(Query::table(Table::Comments).eq("id", comment_id))
            .await?
            .ok_or_else(|| AppError::Validation("Comment not found".to_string()))?;
        if comment.topic_id != topic_id {
            return Err(AppError::Validation(
                "Comment belongs to another topic".to_string(),
            ));
        }
    }

    let prepared = upload::prepare(
        &form.file_name,
        &form.content_type,
        form.bytes,
        limit,
        state.config.image_max_dimension,
    )?;

    let bucket = state.config.storage_bucket.as_str();
    state
        .objects
        .upload(
            &user.token,
            bucket,
            &prepared.path,
            prepared.bytes,
            &prepared.content_type,
        )
        .await?;
    let file_url = state.objects.public_url(bucket, &prepared.path);

    let inserted: Result<Attachment, _> = db
        .insert_one(
            Table::Attachments,
            json!({
                "topic_id": topic_id,
                "comment_id": form.comment_id,
                "file_url": file_url,
                "file_type": prepared.content_type,
                "uploaded_by": user.id,
            }),
        )
        .await;
    let attachment = match inserted {
        Ok(attachment) => attachment,
        Err(e) => {
            // The object is already stored and nothing references it.
            tracing::warn!(
                bucket,
                path = %prepared.path,
                %topic_id,
                error = %e,
                "Orphaned upload: attachment row insert failed"
            );
            return Err(e.into());
        }
    };

    tracing::info!(attachment_id = %attachment.id, path = %prepared.path, "Stored attachment");
    state.changes.publish(
        ChangedTable::Attachments,
        ChangeKind::Insert,
        &attachment.id,
        Some(&topic_id),
    );

    Ok((StatusCode::CREATED, Json(attachment)))
}

/// GET /api/v1/topics/:id/attachments
pub async fn list_topic_attachments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(topic_id): Path<String>,
) -> Result<Json<Vec<Attachment>>, AppError> {
    let attachments = state
        .db(&user)
        .fetch(
            &Query::table(Table::Attachments)
                .eq("topic_id", topic_id.as_str())
                .order("created_at", Order::Desc),
        )
        .await?;

    Ok(Json(attachments))
}

/// GET /api/v1/comments/:id/attachments
pub async fn list_comment_attachments(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(comment_id): Path<String>,
) -> Result<Json<Vec<Attachment>>, AppError> {
    let attachments = state
        .db(&user)
        .fetch(
            &Query::table(Table::Attachments)
                .eq("comment_id", comment_id.as_str())
                .order("created_at", Order::Asc),
        )
        .await?;

    Ok(Json(attachments))
}

/// DELETE /api/v1/attachments/:id
pub async fn delete_attachment(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(attachment_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let db = state.db(&user);
    let attachment: Attachment = db
        .fetch_one(Query::table(Table::Attachments).eq("id", attachment_id.as_str()))
        .await?
        .ok_or(AppError::NotFound)?;

    if attachment.uploaded_by != user.id {
        return Err(AppError::Forbidden);
    }

    db.delete(&Query::table(Table::Attachments).eq("id", attachment_id.as_str()))
        .await?;

    state.changes.publish(
        ChangedTable::Attachments,
        ChangeKind::Delete,
        &attachment_id,
        attachment.topic_id.as_deref(),
    );

    Ok(StatusCode::NO_CONTENT)
}
