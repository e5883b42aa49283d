use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::YearMonth;
use crate::models::TopicStatus;
use crate::projection::{CategoryFilter, SortOrder};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CalendarParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<YearMonth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<CategoryFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarTopic {
    pub id: String,
    pub title: String,
    pub status: TopicStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarDayResponse {
    pub date: NaiveDate,
    pub in_month: bool,
    pub topics: Vec<CalendarTopic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarResponse {
    pub month: YearMonth,
    pub days: Vec<CalendarDayResponse>,
}
