//! Month calendar widget for the dashboard.
//! Days with scheduled topics are highlighted; the cursor day is reversed.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};
use study_shared::calendar::{CalendarDay, MonthGrid};

const WEEKDAYS: [&str; 7] = ["Su", "Mo", "Tu", "We", "Th", "Fr", "Sa"];

/// Number of topics active on each day of the grid.
pub fn topic_counts(days: &[CalendarDay<'_>]) -> HashMap<NaiveDate, usize> {
    days.iter()
        .filter(|d| !d.topics.is_empty())
        .map(|d| (d.date, d.topics.len()))
        .collect()
}

fn day_style(in_month: bool, is_today: bool, count: usize) -> Style {
    if is_today {
        Style::default()
            .bg(Color::Blue)
            .fg(Color::White)
            .add_modifier(Modifier::BOLD)
    } else if !in_month {
        Style::default().fg(Color::DarkGray)
    } else if count > 0 {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::White)
    }
}

/// Render a month grid as lines: a weekday header, then one line per week.
/// Each cell is five columns wide; a dot marks days with topics.
pub fn render_calendar(
    grid: &MonthGrid,
    counts: &HashMap<NaiveDate, usize>,
    today: NaiveDate,
    selected: NaiveDate,
) -> Vec<Line<'static>> {
    let header_style = Style::default().fg(Color::DarkGray);
    let mut lines = vec![Line::from(
        WEEKDAYS
            .iter()
            .map(|d| Span::styled(format!("  {} ", d), header_style))
            .collect::<Vec<_>>(),
    )];

    for week in grid.weeks() {
        let spans = week
            .into_iter()
            .map(|date| {
                let count = counts.get(&date).copied().unwrap_or(0);
                let mut style = day_style(grid.contains_in_month(date), date == today, count);
                if date == selected {
                    style = style.add_modifier(Modifier::REVERSED);
                }
                let marker = if count > 0 { '•' } else { ' ' };
                Span::styled(format!(" {:2}{} ", date.day(), marker), style)
            })
            .collect::<Vec<_>>();
        lines.push(Line::from(spans));
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use study_shared::calendar::YearMonth;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn line_text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn renders_header_and_whole_weeks() {
        let grid = MonthGrid::new(YearMonth::new(2024, 3).unwrap());
        let lines = render_calendar(&grid, &HashMap::new(), date(2024, 3, 10), date(2024, 3, 1));

        assert_eq!(lines.len(), 1 + grid.weeks().len());
        assert!(line_text(&lines[0]).starts_with("  Su "));
        // Leading days come from February.
        assert!(line_text(&lines[1]).starts_with(" 25  "));
        assert!(lines.iter().all(|l| l.spans.len() == 7));
    }

    #[test]
    fn marks_busy_and_selected_days() {
        let grid = MonthGrid::new(YearMonth::new(2024, 3).unwrap());
        let mut counts = HashMap::new();
        counts.insert(date(2024, 3, 5), 2);

        let lines = render_calendar(&grid, &counts, date(2000, 1, 1), date(2024, 3, 5));
        let busy = lines
            .iter()
            .flat_map(|l| l.spans.iter())
            .find(|s| s.content.as_ref() == "  5• ")
            .unwrap();

        assert_eq!(busy.style.fg, Some(Color::Yellow));
        assert!(busy.style.add_modifier.contains(Modifier::REVERSED));
    }

    #[test]
    fn out_of_month_days_are_dimmed() {
        let grid = MonthGrid::new(YearMonth::new(2024, 3).unwrap());
        let lines = render_calendar(&grid, &HashMap::new(), date(2000, 1, 1), date(2024, 3, 1));
        let feb = &lines[1].spans[0];
        assert_eq!(feb.style.fg, Some(Color::DarkGray));
    }
}
