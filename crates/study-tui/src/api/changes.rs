//! Client side of the server's change stream (server-sent events).

use futures::StreamExt;
use study_shared::api::ChangeNotice;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Change(ChangeNotice),
    /// Notices were dropped; everything should be refetched.
    Resync,
}

/// Incremental SSE decoder. Feed it raw chunks, get complete events back.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &str) -> Vec<StreamEvent> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    out.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue; // keep-alive comment
            }

            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        out
    }

    fn dispatch(&mut self) -> Option<StreamEvent> {
        let event = self.event.take();
        let data = std::mem::take(&mut self.data).join("\n");

        match event.as_deref() {
            Some("resync") => Some(StreamEvent::Resync),
            Some("change") | None if !data.is_empty() => match serde_json::from_str(&data) {
                Ok(notice) => Some(StreamEvent::Change(notice)),
                Err(e) => {
                    tracing::warn!("Ignoring malformed change notice: {}", e);
                    None
                }
            },
            _ => None,
        }
    }
}

/// Forward events from an open change stream until it ends or the receiver
/// goes away.
pub async fn pump_changes(response: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    let mut parser = SseParser::default();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!("Change stream interrupted: {}", e);
                return;
            }
        };

        for event in parser.feed(&String::from_utf8_lossy(&chunk)) {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
    tracing::debug!("Change stream closed by server");
}

#[cfg(test)]
mod tests {
    use super::*;
    use study_shared::api::{ChangeKind, ChangedTable};

    #[test]
    fn decodes_events_split_across_chunks() {
        let mut parser = SseParser::default();
        let first = parser.feed("event: change\ndata: {\"table\":\"comments\",");
        assert!(first.is_empty());

        let events = parser.feed("\"kind\":\"insert\",\"id\":\"c1\",\"topic_id\":\"t1\"}\n\n");
        assert_eq!(
            events,
            vec![StreamEvent::Change(ChangeNotice {
                table: ChangedTable::Comments,
                kind: ChangeKind::Insert,
                id: "c1".into(),
                topic_id: Some("t1".into()),
            })]
        );
    }

    #[test]
    fn skips_keep_alives_and_reports_resync() {
        let mut parser = SseParser::default();
        let events = parser.feed(":\n\nevent: resync\r\ndata: 12\r\n\r\n");
        assert_eq!(events, vec![StreamEvent::Resync]);
    }

    #[test]
    fn malformed_payloads_are_dropped() {
        let mut parser = SseParser::default();
        assert!(parser.feed("event: change\ndata: nope\n\n").is_empty());
    }
}
