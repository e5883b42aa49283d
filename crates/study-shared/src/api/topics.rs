use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Category, TopicStatus};
use crate::projection::{CategoryFilter, SortOrder};

/// A schedule as entered in a form. Ranges missing either end are dropped
/// before anything is stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl ScheduleRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start_date: Some(start),
            end_date: Some(end),
        }
    }

    pub fn complete(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.start_date?, self.end_date?))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateTopicRequest {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub schedules: Vec<ScheduleRange>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UpdateTopicRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// When present, replaces every schedule of the topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedules: Option<Vec<ScheduleRange>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: TopicStatus,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TopicListParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,
}
