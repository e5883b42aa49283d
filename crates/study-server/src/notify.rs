use study_shared::api::{ChangeKind, ChangeNotice, ChangedTable};
use tokio::sync::broadcast;

/// Fan-out of row change notices to connected clients.
#[derive(Clone)]
pub struct ChangeFeed {
    sender: broadcast::Sender<ChangeNotice>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, table: ChangedTable, kind: ChangeKind, id: &str, topic_id: Option<&str>) {
        let notice = ChangeNotice {
            table,
            kind,
            id: id.to_string(),
            topic_id: topic_id.map(str::to_string),
        };
        // No subscribers is fine.
        let receivers = self.sender.send(notice).unwrap_or(0);
        tracing::debug!(?table, ?kind, id, receivers, "Published change");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.sender.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_notices() {
        let feed = ChangeFeed::default();
        let mut rx = feed.subscribe();
        feed.publish(ChangedTable::Comments, ChangeKind::Insert, "c1", Some("t1"));

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.table, ChangedTable::Comments);
        assert_eq!(notice.topic_id.as_deref(), Some("t1"));
    }

    #[test]
    fn publishing_without_subscribers_is_silent() {
        ChangeFeed::default().publish(ChangedTable::Topics, ChangeKind::Delete, "t1", None);
    }
}
