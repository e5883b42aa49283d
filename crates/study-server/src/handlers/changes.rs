use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;

use crate::auth::AuthUser;
use crate::routes::AppState;

/// GET /api/v1/changes
///
/// Server-sent `change` events carrying a `ChangeNotice`. A `resync` event
/// means notices were dropped and the client should refetch everything.
pub async fn stream_changes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(user_id = %user.id, "Change stream opened");
    let receiver = state.changes.subscribe();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(notice) => match serde_json::to_string(&notice) {
                    Ok(json) => {
                        let event = Event::default().event("change").data(json);
                        return Some((Ok(event), receiver));
                    }
                    Err(e) => tracing::warn!("Failed to encode change notice: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Change stream lagged");
                    let event = Event::default().event("resync").data(skipped.to_string());
                    return Some((Ok(event), receiver));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
