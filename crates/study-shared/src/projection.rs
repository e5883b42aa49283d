//! Dashboard projection: category filter, free-text search and sort over a
//! snapshot of topics. Never mutates its input and never fails.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::models::{Category, Topic, TopicWithSchedules};
use crate::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl CategoryFilter {
    /// "All" followed by every known category, in dashboard order.
    pub fn choices() -> Vec<CategoryFilter> {
        std::iter::once(Self::All)
            .chain(Category::ALL.into_iter().map(Self::Only))
            .collect()
    }

    pub fn matches(&self, topic: &Topic) -> bool {
        match self {
            Self::All => true,
            Self::Only(Category::Unknown) => false,
            Self::Only(category) => topic.category == *category,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::All => "All",
            Self::Only(category) => category.label(),
        }
    }

    /// Next choice in dashboard order, wrapping around.
    pub fn cycle(&self) -> Self {
        let choices = Self::choices();
        let pos = choices.iter().position(|c| c == self).unwrap_or(0);
        choices[(pos + 1) % choices.len()]
    }
}

impl FromStr for CategoryFilter {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "All" {
            return Ok(Self::All);
        }
        match Category::parse(s) {
            Category::Unknown => Err(ParseError::Category(s.to_string())),
            category => Ok(Self::Only(category)),
        }
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for CategoryFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for CategoryFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    #[serde(rename = "newest")]
    Newest,
    #[serde(rename = "oldest")]
    Oldest,
    #[serde(rename = "az")]
    TitleAsc,
    #[serde(rename = "za")]
    TitleDesc,
}

impl SortOrder {
    pub const ALL: [SortOrder; 4] = [Self::Newest, Self::Oldest, Self::TitleAsc, Self::TitleDesc];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Newest => "Newest",
            Self::Oldest => "Oldest",
            Self::TitleAsc => "A-Z",
            Self::TitleDesc => "Z-A",
        }
    }

    pub fn cycle(&self) -> Self {
        let pos = Self::ALL.iter().position(|s| s == self).unwrap_or(0);
        Self::ALL[(pos + 1) % Self::ALL.len()]
    }

    fn compare(&self, a: &Topic, b: &Topic) -> Ordering {
        match self {
            Self::Newest => b.created_at.cmp(&a.created_at),
            Self::Oldest => a.created_at.cmp(&b.created_at),
            Self::TitleAsc => compare_titles(&a.title, &b.title),
            Self::TitleDesc => compare_titles(&b.title, &a.title),
        }
    }
}

impl FromStr for SortOrder {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            "az" => Ok(Self::TitleAsc),
            "za" => Ok(Self::TitleDesc),
            other => Err(ParseError::SortOrder(other.to_string())),
        }
    }
}

/// Case-folded comparison with the raw strings as a tiebreak, so "alpha"
/// and "Alpha" sit together the way a locale collation puts them.
fn compare_titles(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Case-insensitive substring search over title, description and tags.
/// Blank queries match everything.
pub fn matches_search(topic: &Topic, query: &str) -> bool {
    if query.trim().is_empty() {
        return true;
    }
    let needle = query.to_lowercase();

    topic.title.to_lowercase().contains(&needle)
        || topic
            .description
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(&needle))
        || topic
            .tags
            .iter()
            .any(|tag| tag.to_lowercase().contains(&needle))
}

/// Dashboard state that selects and orders the visible topics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicQuery {
    #[serde(default)]
    pub category: CategoryFilter,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub sort: SortOrder,
}

impl TopicQuery {
    /// Filter by category, then search, then sort (stable).
    pub fn apply<'a>(&self, topics: &'a [TopicWithSchedules]) -> Vec<&'a TopicWithSchedules> {
        let mut visible: Vec<&TopicWithSchedules> = topics
            .iter()
            .filter(|t| self.category.matches(&t.topic))
            .filter(|t| matches_search(&t.topic, &self.search))
            .collect();

        visible.sort_by(|a, b| self.sort.compare(&a.topic, &b.topic));
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TopicStatus;
    use chrono::{TimeZone, Utc};

    fn topic(id: &str, title: &str, category: Category, day: u32) -> TopicWithSchedules {
        let at = Utc.with_ymd_and_hms(2024, 1, day, 9, 0, 0).unwrap();
        TopicWithSchedules {
            topic: Topic {
                id: id.to_string(),
                title: title.to_string(),
                description: None,
                category,
                tags: Vec::new(),
                status: TopicStatus::NotStarted,
                created_by: "u1".to_string(),
                created_at: at,
                updated_at: at,
            },
            topic_schedules: Vec::new(),
        }
    }

    fn titles(topics: &[&TopicWithSchedules]) -> Vec<String> {
        topics.iter().map(|t| t.topic.title.clone()).collect()
    }

    #[test]
    fn category_filter_keeps_exact_matches() {
        let topics = vec![
            topic("1", "Bevy ECS", Category::GameEngine, 1),
            topic("2", "Blender rigging", Category::ThreeDModeling, 2),
            topic("3", "Mystery", Category::Unknown, 3),
        ];
        let query = TopicQuery {
            category: CategoryFilter::Only(Category::GameEngine),
            ..Default::default()
        };
        assert_eq!(titles(&query.apply(&topics)), ["Bevy ECS"]);

        let all = TopicQuery::default();
        assert_eq!(all.apply(&topics).len(), 3);
    }

    #[test]
    fn unknown_category_never_matches_a_selection() {
        let topics = vec![topic("1", "Mystery", Category::Unknown, 1)];
        let query = TopicQuery {
            category: CategoryFilter::Only(Category::Unknown),
            ..Default::default()
        };
        assert!(query.apply(&topics).is_empty());
    }

    #[test]
    fn search_covers_description_and_tags() {
        let mut with_desc = topic("1", "Week one", Category::VibeCoding, 1);
        with_desc.topic.description = Some("Intro to RUST lifetimes".into());
        let mut with_tag = topic("2", "Week two", Category::VibeCoding, 2);
        with_tag.topic.tags = vec!["Rustacean".into()];
        let other = topic("3", "Week three", Category::VibeCoding, 3);

        let topics = vec![with_desc, with_tag, other];
        let query = TopicQuery {
            search: "rust".into(),
            sort: SortOrder::Oldest,
            ..Default::default()
        };
        assert_eq!(titles(&query.apply(&topics)), ["Week one", "Week two"]);
    }

    #[test]
    fn whitespace_query_is_ignored() {
        let topics = vec![topic("1", "Alpha", Category::VibeCoding, 1)];
        let query = TopicQuery {
            search: "   ".into(),
            ..Default::default()
        };
        assert_eq!(query.apply(&topics).len(), 1);
    }

    #[test]
    fn title_sort_is_case_insensitive() {
        let topics = vec![
            topic("1", "beta", Category::VibeCoding, 1),
            topic("2", "Alpha", Category::VibeCoding, 2),
            topic("3", "Gamma", Category::VibeCoding, 3),
        ];
        let asc = TopicQuery {
            sort: SortOrder::TitleAsc,
            ..Default::default()
        };
        assert_eq!(titles(&asc.apply(&topics)), ["Alpha", "beta", "Gamma"]);

        let desc = TopicQuery {
            sort: SortOrder::TitleDesc,
            ..Default::default()
        };
        assert_eq!(titles(&desc.apply(&topics)), ["Gamma", "beta", "Alpha"]);
    }

    #[test]
    fn parses_wire_names() {
        assert_eq!("za".parse::<SortOrder>().unwrap(), SortOrder::TitleDesc);
        assert!("random".parse::<SortOrder>().is_err());
        assert_eq!(
            "Game Engine".parse::<CategoryFilter>().unwrap(),
            CategoryFilter::Only(Category::GameEngine)
        );
        assert_eq!("All".parse::<CategoryFilter>().unwrap(), CategoryFilter::All);
        assert!("Cooking".parse::<CategoryFilter>().is_err());
    }

    #[test]
    fn cycling_visits_every_choice() {
        let mut filter = CategoryFilter::All;
        let mut seen = vec![filter];
        for _ in 0..3 {
            filter = filter.cycle();
            seen.push(filter);
        }
        assert_eq!(seen, CategoryFilter::choices());
        assert_eq!(filter.cycle(), CategoryFilter::All);
        assert_eq!(SortOrder::TitleDesc.cycle(), SortOrder::Newest);
    }
}
