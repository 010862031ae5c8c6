//! Best-effort attachment uploads to S3-compatible object storage.
//!
//! Bytes are PUT to `{endpoint}/{key}` (optionally with a bearer token) and
//! referenced as `{public_url_base}/{key}`. Used only to upgrade attachment
//! URLs before relaying; any failure falls back to the original URL, so
//! nothing here is required for correctness.

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    secrecy::ExposeSecret,
    tracing::{debug, info, warn},
    trestle_bridge::client::{AttachmentUpgrader, ObjectStore},
    trestle_common::now_ms,
    trestle_config::MediaConfig,
};

/// Extensions worth mirroring; everything else keeps its original URL.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "svg", "mp4", "webm", "mov", "mp3", "ogg", "wav",
    "flac", "pdf", "txt", "md", "log", "zip", "gz", "tar",
];

pub struct HttpObjectStore {
    client: reqwest::Client,
    config: MediaConfig,
}

impl HttpObjectStore {
    #[must_use]
    pub fn new(config: MediaConfig) -> Self {
        info!(endpoint = %config.endpoint, "object storage uploader enabled");
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn key_for(&self, name: &str) -> String {
        let safe: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let stamped = format!("{}-{safe}", now_ms());
        match &self.config.key_prefix {
            Some(prefix) => format!("{prefix}/{stamped}"),
            None => stamped,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        name: &str,
        content_type: Option<&str>,
    ) -> Result<String> {
        let key = self.key_for(name);
        let url = format!("{}/{key}", self.config.endpoint.trim_end_matches('/'));

        let mut request = self
            .client
            .put(&url)
            .header(
                reqwest::header::CONTENT_TYPE,
                content_type.unwrap_or("application/octet-stream"),
            )
            .body(bytes);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.context("object storage PUT failed")?;
        if !response.status().is_success() {
            anyhow::bail!("object storage PUT returned {}", response.status());
        }

        let public = format!(
            "{}/{key}",
            self.config.public_url_base.trim_end_matches('/')
        );
        info!(name, url = %public, "attachment uploaded");
        Ok(public)
    }
}

/// Downloads an attachment and re-uploads it through an [`ObjectStore`].
pub struct MediaUpgrader {
    client: reqwest::Client,
    store: HttpObjectStore,
}

impl MediaUpgrader {
    #[must_use]
    pub fn new(config: MediaConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            store: HttpObjectStore::new(config),
        }
    }
}

#[async_trait]
impl AttachmentUpgrader for MediaUpgrader {
    async fn upgrade(&self, url: &str, name: &str, content_type: Option<&str>) -> Option<String> {
        if !is_supported_file_type(name) {
            debug!(name, "unsupported file type, keeping original url");
            return None;
        }

        let bytes = match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => match response.bytes().await {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => {
                    warn!(name, error = %e, "failed to read attachment body");
                    return None;
                },
            },
            Ok(response) => {
                warn!(name, status = %response.status(), "failed to fetch attachment");
                return None;
            },
            Err(e) => {
                warn!(name, error = %e, "failed to fetch attachment");
                return None;
            },
        };

        match self.store.upload_file(bytes, name, content_type).await {
            Ok(public) => Some(public),
            Err(e) => {
                warn!(name, error = %e, "upload failed, keeping original url");
                None
            },
        }
    }
}

/// Whether a filename's extension is on the mirror allowlist.
#[must_use]
pub fn is_supported_file_type(name: &str) -> bool {
    name.rsplit('.')
        .next()
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_extensions_are_case_insensitive() {
        assert!(is_supported_file_type("photo.PNG"));
        assert!(is_supported_file_type("clip.webm"));
        assert!(!is_supported_file_type("payload.exe"));
        assert!(!is_supported_file_type("no_extension"));
    }

    #[test]
    fn keys_are_sanitized_and_prefixed() {
        let store = HttpObjectStore::new(MediaConfig {
            endpoint: "https://storage.example".into(),
            public_url_base: "https://cdn.example".into(),
            key_prefix: Some("bridge".into()),
            auth_token: None,
        });
        let key = store.key_for("my file (1).png");
        assert!(key.starts_with("bridge/"));
        assert!(key.ends_with("my_file__1_.png"));
        assert!(!key.contains(' '));
    }
}
