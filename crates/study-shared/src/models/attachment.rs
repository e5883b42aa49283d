use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,
    pub file_url: String,
    pub file_type: String,
    pub uploaded_by: String,
    pub created_at: DateTime<Utc>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.file_type.starts_with("image/")
    }

    /// Last path segment of the public URL.
    pub fn file_name(&self) -> &str {
        self.file_url
            .rsplit('/')
            .next()
            .unwrap_or(self.file_url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_last_url_segment() {
        let attachment = Attachment {
            id: "a1".into(),
            topic_id: Some("t1".into()),
            comment_id: None,
            file_url: "https://cdn.example.com/storage/v1/object/public/project_files/0.42.png".into(),
            file_type: "image/png".into(),
            uploaded_by: "u1".into(),
            created_at: Utc::now(),
        };
        assert_eq!(attachment.file_name(), "0.42.png");
        assert!(attachment.is_image());
    }
}
