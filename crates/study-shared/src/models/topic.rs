use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Study subject category. Anything the backend sends that is not one of the
/// known names lands in `Unknown`, which serializes back as `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Category {
    VibeCoding,
    GameEngine,
    ThreeDModeling,
    #[default]
    Unknown,
}

impl Category {
    pub const ALL: [Category; 3] = [
        Category::VibeCoding,
        Category::GameEngine,
        Category::ThreeDModeling,
    ];

    pub fn parse(value: &str) -> Self {
        match value {
            "Vibe Coding" => Self::VibeCoding,
            "Game Engine" => Self::GameEngine,
            "3D Modeling" => Self::ThreeDModeling,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            Self::VibeCoding => Some("Vibe Coding"),
            Self::GameEngine => Some("Game Engine"),
            Self::ThreeDModeling => Some("3D Modeling"),
            Self::Unknown => None,
        }
    }

    pub fn label(&self) -> &'static str {
        self.as_str().unwrap_or("Uncategorized")
    }
}

impl Serialize for Category {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_str() {
            Some(name) => serializer.serialize_str(name),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().map(Category::parse).unwrap_or_default())
    }
}

/// Progress of a topic. Unrecognized values fall back to `NotStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TopicStatus {
    #[default]
    NotStarted,
    InProgress,
    Done,
}

impl TopicStatus {
    pub const ALL: [TopicStatus; 3] = [Self::NotStarted, Self::InProgress, Self::Done];

    pub fn parse(value: &str) -> Self {
        match value {
            "In Progress" => Self::InProgress,
            "Done" => Self::Done,
            _ => Self::NotStarted,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "Not Started",
            Self::InProgress => "In Progress",
            Self::Done => "Done",
        }
    }

    pub fn next(&self) -> Self {
        match self {
            Self::NotStarted => Self::InProgress,
            Self::InProgress => Self::Done,
            Self::Done => Self::NotStarted,
        }
    }
}

impl Serialize for TopicStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TopicStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().map(TopicStatus::parse).unwrap_or_default())
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Category,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: TopicStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSchedule {
    pub id: String,
    pub topic_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicWithSchedules {
    #[serde(flatten)]
    pub topic: Topic,
    #[serde(default)]
    pub topic_schedules: Vec<TopicSchedule>,
}

impl TopicWithSchedules {
    /// Join schedules fetched separately onto their topics, keeping the topic order.
    pub fn join(topics: Vec<Topic>, schedules: Vec<TopicSchedule>) -> Vec<Self> {
        let mut by_topic: HashMap<String, Vec<TopicSchedule>> = HashMap::new();
        for schedule in schedules {
            by_topic
                .entry(schedule.topic_id.clone())
                .or_default()
                .push(schedule);
        }

        topics
            .into_iter()
            .map(|topic| {
                let topic_schedules = by_topic.remove(&topic.id).unwrap_or_default();
                Self {
                    topic,
                    topic_schedules,
                }
            })
            .collect()
    }
}
