use axum::{
    extract::{Query as QueryParams, State},
    Extension, Json,
};
use chrono::Utc;
use study_shared::api::{CalendarDayResponse, CalendarParams, CalendarResponse, CalendarTopic};
use study_shared::calendar::{assign_topics, MonthGrid, YearMonth};
use study_shared::projection::TopicQuery;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::routes::AppState;

use super::topics::fetch_all;

/// GET /api/v1/calendar
///
/// Whole-week grid for `month` (default: the current UTC month) with the
/// projected topics active on each day. Days are taken in UTC.
pub async fn month_view(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    QueryParams(params): QueryParams<CalendarParams>,
) -> Result<Json<CalendarResponse>, AppError> {
    let month = params
        .month
        .unwrap_or_else(|| YearMonth::containing(Utc::now().date_naive()));

    let all = fetch_all(&state.db(&user)).await?;
    let query = TopicQuery {
        category: params.category.unwrap_or_default(),
        search: params.q.unwrap_or_default(),
        sort: params.sort.unwrap_or_default(),
    };
    let visible = query.apply(&all);

    let grid = MonthGrid::new(month);
    let days = assign_topics(&grid, &visible, &Utc)
        .into_iter()
        .map(|day| CalendarDayResponse {
            date: day.date,
            in_month: day.in_month,
            topics: day
                .topics
                .iter()
                .map(|t| CalendarTopic {
                    id: t.topic.id.clone(),
                    title: t.topic.title.clone(),
                    status: t.topic.status,
                })
                .collect(),
        })
        .collect();

    Ok(Json(CalendarResponse { month, days }))
}
