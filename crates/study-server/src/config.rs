use std::env;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the hosted backend. `None` runs against the in-memory store.
    pub backend_url: Option<String>,
    pub backend_anon_key: String,
    pub storage_bucket: String,
    pub max_upload_bytes: usize,
    pub image_max_dimension: u32,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend_url = env::var("BACKEND_URL").ok().filter(|url| !url.trim().is_empty());

        let backend_anon_key = match &backend_url {
            Some(_) => env::var("BACKEND_ANON_KEY")
                .context("BACKEND_ANON_KEY must be set when BACKEND_URL is")?,
            None => String::new(),
        };

        Ok(Self {
            backend_url,
            backend_anon_key,
            storage_bucket: env::var("STORAGE_BUCKET")
                .unwrap_or_else(|_| "project_files".to_string()),
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .unwrap_or_else(|_| "5242880".to_string()) // 5 MiB
                .parse()
                .context("MAX_UPLOAD_BYTES must be a byte count")?,
            image_max_dimension: env::var("IMAGE_MAX_DIMENSION")
                .unwrap_or_else(|_| "1920".to_string())
                .parse()
                .context("IMAGE_MAX_DIMENSION must be a pixel count")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .context("PORT must be a port number")?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: None,
            backend_anon_key: String::new(),
            storage_bucket: "project_files".to_string(),
            max_upload_bytes: 5 * 1024 * 1024,
            image_max_dimension: 1920,
            port: 3000,
        }
    }
}
