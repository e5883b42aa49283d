//! Markdown to ratatui lines, for topic descriptions and comment bodies.

use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use ratatui::{
    style::{Color, Modifier, Style},
    text::{Line, Span},
};

/// Render markdown content to ratatui Lines, wrapped to `width` columns.
pub fn render_markdown(content: &str, width: usize) -> Vec<Line<'static>> {
    let mut renderer = MarkdownRenderer::new(width.max(10));
    renderer.render(content)
}

struct MarkdownRenderer {
    width: usize,
    lines: Vec<Line<'static>>,
    current_spans: Vec<Span<'static>>,
    style_stack: Vec<Style>,
    list_stack: Vec<Option<u64>>,
    in_code_block: bool,
    code_block: String,
    quote_depth: usize,
}

impl MarkdownRenderer {
    fn new(width: usize) -> Self {
        Self {
            width,
            lines: Vec::new(),
            current_spans: Vec::new(),
            style_stack: vec![Style::default().fg(Color::White)],
            list_stack: Vec::new(),
            in_code_block: false,
            code_block: String::new(),
            quote_depth: 0,
        }
    }

    fn current_style(&self) -> Style {
        self.style_stack.last().copied().unwrap_or_default()
    }

    fn push_style(&mut self, style: Style) {
        let current = self.current_style();
        self.style_stack.push(current.patch(style));
    }

    fn pop_style(&mut self) {
        if self.style_stack.len() > 1 {
            self.style_stack.pop();
        }
    }

    fn line_len(&self) -> usize {
        self.current_spans.iter().map(|s| s.content.chars().count()).sum()
    }

    fn available_width(&self) -> usize {
        self.width.saturating_sub(self.quote_depth * 2).max(1)
    }

    fn flush_line(&mut self) {
        if self.current_spans.is_empty() {
            return;
        }
        let mut spans = Vec::with_capacity(self.current_spans.len() + 1);
        if self.quote_depth > 0 {
            spans.push(Span::styled(
                "│ ".repeat(self.quote_depth),
                Style::default().fg(Color::DarkGray),
            ));
        }
        spans.append(&mut self.current_spans);
        self.lines.push(Line::from(spans));
    }

    fn blank_line(&mut self) {
        if self.lines.last().is_some_and(|l| !l.spans.is_empty()) {
            self.lines.push(Line::from(""));
        }
    }

    fn add_text(&mut self, text: &str) {
        if self.in_code_block {
            self.code_block.push_str(text);
            return;
        }

        let style = self.current_style();
        let width = self.available_width();

        // Keep the space between adjacent spans, e.g. "**bold** text".
        if text.starts_with(char::is_whitespace) && !self.current_spans.is_empty() {
            self.current_spans.push(Span::styled(" ", style));
        }

        let mut words = text.split_whitespace().peekable();
        while let Some(word) = words.next() {
            let word_len = word.chars().count();
            if self.line_len() + word_len > width && self.line_len() > 0 {
                self.flush_line();
            }

            let mut chunk = word.to_string();
            if words.peek().is_some() || text.ends_with(char::is_whitespace) {
                chunk.push(' ');
            }
            self.current_spans.push(Span::styled(chunk, style));
        }
    }

    fn render_code_block(&mut self) {
        let content = std::mem::take(&mut self.code_block);
        let style = Style::default().fg(Color::Gray).bg(Color::Rgb(43, 48, 59));

        for line in content.lines() {
            let len = line.chars().count();
            let mut spans = vec![Span::styled(format!(" {}", line), style)];
            // Pad to width for a solid background block
            if len + 1 < self.width {
                spans.push(Span::styled(" ".repeat(self.width - len - 1), style));
            }
            self.lines.push(Line::from(spans));
        }

        self.lines.push(Line::from(""));
    }

    fn render(&mut self, content: &str) -> Vec<Line<'static>> {
        let parser = Parser::new_ext(content, Options::ENABLE_STRIKETHROUGH);

        for event in parser {
            match event {
                Event::Start(tag) => self.handle_start_tag(tag),
                Event::End(tag) => self.handle_end_tag(tag),
                Event::Text(text) => self.add_text(&text),
                Event::Code(code) => {
                    let style = Style::default().fg(Color::Yellow).bg(Color::Rgb(50, 50, 50));
                    self.current_spans.push(Span::styled(code.to_string(), style));
                }
                Event::SoftBreak => self.add_text(" "),
                Event::HardBreak => self.flush_line(),
                Event::Rule => {
                    self.flush_line();
                    self.lines.push(Line::from(Span::styled(
                        "─".repeat(self.width.min(60)),
                        Style::default().fg(Color::DarkGray),
                    )));
                }
                _ => {}
            }
        }

        self.flush_line();
        while self.lines.last().is_some_and(|l| l.spans.is_empty()) {
            self.lines.pop();
        }
        std::mem::take(&mut self.lines)
    }

    fn handle_start_tag(&mut self, tag: Tag) {
        match tag {
            Tag::Heading { level, .. } => {
                self.flush_line();
                let style = match level {
                    HeadingLevel::H1 => Style::default()
                        .fg(Color::Magenta)
                        .add_modifier(Modifier::BOLD | Modifier::UNDERLINED),
                    HeadingLevel::H2 => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                    _ => Style::default().add_modifier(Modifier::BOLD),
                };
                self.push_style(style);
            }
            Tag::Paragraph => self.flush_line(),
            Tag::BlockQuote => {
                self.flush_line();
                self.quote_depth += 1;
                self.push_style(Style::default().fg(Color::Gray));
            }
            Tag::CodeBlock(_) => {
                self.flush_line();
                self.in_code_block = true;
            }
            Tag::List(start) => {
                self.flush_line();
                self.list_stack.push(start);
            }
            Tag::Item => {
                self.flush_line();
                let indent = "  ".repeat(self.list_stack.len().saturating_sub(1));
                let marker = match self.list_stack.last_mut() {
                    Some(Some(n)) => {
                        let m = format!("{}{}. ", indent, n);
                        *n += 1;
                        m
                    }
                    _ => format!("{}• ", indent),
                };
                self.current_spans
                    .push(Span::styled(marker, Style::default().fg(Color::Cyan)));
            }
            Tag::Emphasis => self.push_style(Style::default().add_modifier(Modifier::ITALIC)),
            Tag::Strong => self.push_style(Style::default().add_modifier(Modifier::BOLD)),
            Tag::Strikethrough => {
                self.push_style(Style::default().add_modifier(Modifier::CROSSED_OUT))
            }
            Tag::Link { .. } => self.push_style(
                Style::default()
                    .fg(Color::Blue)
                    .add_modifier(Modifier::UNDERLINED),
            ),
            _ => {}
        }
    }

    fn handle_end_tag(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Heading(_) => {
                self.flush_line();
                self.pop_style();
                self.blank_line();
            }
            TagEnd::Paragraph => {
                self.flush_line();
                if self.list_stack.is_empty() {
                    self.blank_line();
                }
            }
            TagEnd::BlockQuote => {
                self.flush_line();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.pop_style();
                self.blank_line();
            }
            TagEnd::CodeBlock => {
                self.in_code_block = false;
                self.render_code_block();
            }
            TagEnd::List(_) => {
                self.flush_line();
                self.list_stack.pop();
                if self.list_stack.is_empty() {
                    self.blank_line();
                }
            }
            TagEnd::Item => self.flush_line(),
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough | TagEnd::Link => {
                self.pop_style()
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(lines: &[Line]) -> Vec<String> {
        lines
            .iter()
            .map(|l| l.spans.iter().map(|s| s.content.as_ref()).collect::<String>())
            .collect()
    }

    #[test]
    fn wraps_paragraphs_to_width() {
        let lines = render_markdown("one two three four five six", 12);
        let rendered = text(&lines);
        assert!(rendered.len() > 1);
        assert!(rendered.iter().all(|l| l.trim_end().chars().count() <= 12));
        assert_eq!(rendered.join("").split_whitespace().count(), 6);
    }

    #[test]
    fn renders_lists_and_quotes() {
        let rendered = text(&render_markdown("- alpha\n- beta\n\n> quoted", 40));
        assert!(rendered.iter().any(|l| l.starts_with("• alpha")));
        assert!(rendered.iter().any(|l| l.starts_with("• beta")));
        assert!(rendered.iter().any(|l| l.starts_with("│ quoted")));
    }

    #[test]
    fn ordered_lists_count_from_their_start() {
        let rendered = text(&render_markdown("3. c\n4. d", 40));
        assert!(rendered[0].starts_with("3. c"));
        assert!(rendered[1].starts_with("4. d"));
    }

    #[test]
    fn code_blocks_keep_their_lines() {
        let rendered = text(&render_markdown("```rust\nfn main() {}\nlet x = 1;\n```", 30));
        assert!(rendered[0].starts_with(" fn main() {}"));
        assert!(rendered[1].starts_with(" let x = 1;"));
    }
}
