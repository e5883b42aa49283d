use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use study_shared::calendar::{assign_topics, MonthGrid, YearMonth};
use study_shared::projection::{CategoryFilter, SortOrder, TopicQuery};
use study_shared::thread::build_forest;
use study_shared::{
    flatten_forest, Category, Comment, CommentNode, Topic, TopicSchedule, TopicStatus,
    TopicWithSchedules,
};

fn at(ts: &str) -> DateTime<Utc> {
    ts.parse().unwrap()
}

fn day(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn comment(id: &str, parent: Option<&str>) -> Comment {
    Comment {
        id: id.into(),
        topic_id: "topic-1".into(),
        user_id: "user-1".into(),
        parent_id: parent.map(Into::into),
        content: "hello".into(),
        created_at: at("2024-03-01T10:00:00Z"),
        updated_at: at("2024-03-01T10:00:00Z"),
        profiles: None,
    }
}

fn topic(id: &str, title: &str, created: &str) -> TopicWithSchedules {
    TopicWithSchedules {
        topic: Topic {
            id: id.into(),
            title: title.into(),
            description: None,
            category: Category::VibeCoding,
            tags: Vec::new(),
            status: TopicStatus::NotStarted,
            created_by: "user-1".into(),
            created_at: at(created),
            updated_at: at(created),
        },
        topic_schedules: Vec::new(),
    }
}

fn shape(node: &CommentNode) -> String {
    if node.children.is_empty() {
        return node.comment.id.clone();
    }
    let kids: Vec<String> = node.children.iter().map(shape).collect();
    format!("{}[{}]", node.comment.id, kids.join(","))
}

#[test]
fn comment_forest_matches_reply_structure() {
    let forest = build_forest(vec![
        comment("A", None),
        comment("B", Some("A")),
        comment("C", None),
        comment("D", Some("B")),
    ]);
    let shapes: Vec<String> = forest.iter().map(shape).collect();
    assert_eq!(shapes, ["A[B[D]]", "C"]);
}

#[test]
fn every_comment_appears_exactly_once() {
    let input = vec![
        comment("1", None),
        comment("2", Some("1")),
        comment("3", Some("missing")),
        comment("4", Some("2")),
        comment("5", Some("6")),
        comment("6", Some("5")),
        comment("7", Some("3")),
    ];
    let expected: HashSet<String> = input.iter().map(|c| c.id.clone()).collect();

    let forest = build_forest(input);
    let seen: Vec<String> = flatten_forest(&forest).iter().map(|(_, c)| c.id.clone()).collect();

    assert_eq!(seen.len(), expected.len());
    assert_eq!(seen.into_iter().collect::<HashSet<_>>(), expected);
}

#[test]
fn matched_parents_are_never_roots() {
    let forest = build_forest(vec![
        comment("1", None),
        comment("2", Some("1")),
        comment("3", Some("nowhere")),
    ]);
    let roots: Vec<&str> = forest.iter().map(|n| n.comment.id.as_str()).collect();
    assert_eq!(roots, ["1", "3"]);
}

#[test]
fn title_and_newest_sorts() {
    let topics = vec![
        topic("z", "Zeta", "2024-01-01T00:00:00Z"),
        topic("a", "Alpha", "2024-02-01T00:00:00Z"),
    ];

    let by_title = TopicQuery {
        sort: SortOrder::TitleAsc,
        ..Default::default()
    };
    let titles: Vec<&str> = by_title.apply(&topics).iter().map(|t| t.topic.title.as_str()).collect();
    assert_eq!(titles, ["Alpha", "Zeta"]);

    let newest = TopicQuery::default();
    let titles: Vec<&str> = newest.apply(&topics).iter().map(|t| t.topic.title.as_str()).collect();
    assert_eq!(titles, ["Alpha", "Zeta"]);
}

#[test]
fn date_sorts_are_stable_on_ties() {
    let topics = vec![
        topic("1", "First", "2024-01-01T00:00:00Z"),
        topic("2", "Second", "2024-01-01T00:00:00Z"),
        topic("3", "Third", "2024-01-01T00:00:00Z"),
    ];
    for sort in [SortOrder::Newest, SortOrder::Oldest] {
        let query = TopicQuery {
            sort,
            ..Default::default()
        };
        let ids: Vec<&str> = query.apply(&topics).iter().map(|t| t.topic.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }
}

#[test]
fn category_filter_is_idempotent() {
    let mut engine = topic("2", "Godot signals", "2024-01-02T00:00:00Z");
    engine.topic.category = Category::GameEngine;
    let topics = vec![topic("1", "Prompting", "2024-01-01T00:00:00Z"), engine];

    let query = TopicQuery {
        category: CategoryFilter::Only(Category::GameEngine),
        ..Default::default()
    };
    let once: Vec<TopicWithSchedules> = query.apply(&topics).into_iter().cloned().collect();
    let twice: Vec<&str> = query.apply(&once).iter().map(|t| t.topic.id.as_str()).collect();
    let once_ids: Vec<&str> = once.iter().map(|t| t.topic.id.as_str()).collect();
    assert_eq!(twice, once_ids);
}

#[test]
fn blank_search_returns_everything() {
    let topics = vec![
        topic("1", "One", "2024-01-01T00:00:00Z"),
        topic("2", "Two", "2024-01-02T00:00:00Z"),
    ];
    let query = TopicQuery {
        search: " \t ".into(),
        sort: SortOrder::Oldest,
        ..Default::default()
    };
    assert_eq!(query.apply(&topics).len(), 2);
}

#[test]
fn search_ignores_category() {
    let mut night = topic("1", "Game Night", "2024-01-01T00:00:00Z");
    night.topic.category = Category::VibeCoding;
    let mut engine_only = topic("2", "Scene graphs", "2024-01-02T00:00:00Z");
    engine_only.topic.category = Category::GameEngine;
    engine_only.topic.tags = vec!["rendering".into()];

    let topics = vec![night, engine_only];
    let query = TopicQuery {
        search: "game".into(),
        ..Default::default()
    };
    let ids: Vec<&str> = query.apply(&topics).iter().map(|t| t.topic.id.as_str()).collect();
    assert_eq!(ids, ["1"]);
}

#[test]
fn calendar_membership_is_inclusive() {
    let mut scheduled = topic("1", "Rigging", "2024-03-01T00:00:00Z");
    scheduled.topic_schedules.push(TopicSchedule {
        id: "s1".into(),
        topic_id: "1".into(),
        start_date: at("2024-03-10T00:00:00Z"),
        end_date: at("2024-03-12T00:00:00Z"),
    });

    assert!(scheduled.is_on(day("2024-03-11"), &Utc));
    assert!(!scheduled.is_on(day("2024-03-13"), &Utc));
    assert!(scheduled.is_on(day("2024-03-10"), &Utc));
    assert!(scheduled.is_on(day("2024-03-12"), &Utc));
}

#[test]
fn single_day_schedule_shows_on_that_day() {
    let mut scheduled = topic("1", "Sprint", "2024-03-01T00:00:00Z");
    scheduled.topic_schedules.push(TopicSchedule {
        id: "s1".into(),
        topic_id: "1".into(),
        start_date: at("2024-03-15T00:00:00Z"),
        end_date: at("2024-03-15T00:00:00Z"),
    });

    let grid = MonthGrid::new(YearMonth::new(2024, 3).unwrap());
    let days = assign_topics(&grid, &[&scheduled], &Utc);
    let hits: Vec<NaiveDate> = days
        .iter()
        .filter(|d| !d.topics.is_empty())
        .map(|d| d.date)
        .collect();
    assert_eq!(hits, [day("2024-03-15")]);
}
