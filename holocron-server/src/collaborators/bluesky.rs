//! Bluesky client over the AT Protocol XRPC endpoints.
//!
//! Creates an app-password session on first use and reuses its access
//! token until the server rejects it.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{check_status, transport_error, SocialClient};
use crate::error::CollaboratorError;

const DEFAULT_SERVICE: &str = "https://bsky.social";
/// Posts are limited to 300 graphemes; counting chars keeps us under it.
const MAX_POST_LENGTH: usize = 300;

pub struct BlueskyClient {
    client: Client,
    service: String,
    handle: String,
    app_password: String,
    session: Mutex<Option<Session>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
    did: String,
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    uri: String,
}

impl BlueskyClient {
    pub fn new(
        handle: impl Into<String>,
        app_password: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| transport_error("build social client", e))?;
        Ok(Self {
            client,
            service: DEFAULT_SERVICE.to_string(),
            handle: handle.into(),
            app_password: app_password.into(),
            session: Mutex::new(None),
        })
    }

    async fn session(&self) -> Result<Session, CollaboratorError> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_ref() {
            return Ok(existing.clone());
        }

        info!("Creating Bluesky session for {}", self.handle);
        let response = self
            .client
            .post(format!("{}/xrpc/com.atproto.server.createSession", self.service))
            .json(&CreateSessionRequest {
                identifier: &self.handle,
                password: &self.app_password,
            })
            .send()
            .await
            .map_err(|e| transport_error("create session", e))?;
        let fresh: Session = check_status("create session", response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error("create session", e))?;
        *session = Some(fresh.clone());
        Ok(fresh)
    }

    async fn create_post(&self, session: &Session, record: &serde_json::Value) -> Result<String, CollaboratorError> {
        let response = self
            .client
            .post(format!("{}/xrpc/com.atproto.repo.createRecord", self.service))
            .bearer_auth(&session.access_jwt)
            .json(&json!({
                "repo": session.did,
                "collection": "app.bsky.feed.post",
                "record": record,
            }))
            .send()
            .await
            .map_err(|e| transport_error("create post", e))?;
        let created: CreateRecordResponse = check_status("create post", response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error("create post", e))?;
        Ok(created.uri)
    }
}

/// Build the post record: text trimmed to fit, with the link appended and
/// marked up as a link facet over its UTF-8 byte range.
pub fn post_record(text: &str, link: Option<&str>) -> serde_json::Value {
    let reserved = link.map_or(0, |l| l.chars().count() + 1);
    let budget = MAX_POST_LENGTH.saturating_sub(reserved);
    let mut body: String = text.chars().take(budget).collect();

    let mut record = json!({
        "$type": "app.bsky.feed.post",
        "createdAt": Utc::now().to_rfc3339(),
    });

    if let Some(link) = link {
        if !body.is_empty() {
            body.push('\n');
        }
        let start = body.len();
        body.push_str(link);
        record["facets"] = json!([{
            "index": { "byteStart": start, "byteEnd": body.len() },
            "features": [{ "$type": "app.bsky.richtext.facet#link", "uri": link }],
        }]);
    }
    record["text"] = json!(body);
    record
}

#[async_trait]
impl SocialClient for BlueskyClient {
    async fn post_update(&self, text: &str, link: Option<&str>) -> Result<String, CollaboratorError> {
        let record = post_record(text, link);
        let session = self.session().await?;
        match self.create_post(&session, &record).await {
            Err(CollaboratorError::Auth { .. }) => {
                warn!("Bluesky session rejected; creating a new one");
                *self.session.lock().await = None;
                let session = self.session().await?;
                self.create_post(&session, &record).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_facet_covers_link_bytes() {
        let record = post_record("Our newest Featured Article: Ahsoka Tano", Some("https://x.test/a"));
        let text = record["text"].as_str().unwrap();
        let start = record["facets"][0]["index"]["byteStart"].as_u64().unwrap() as usize;
        let end = record["facets"][0]["index"]["byteEnd"].as_u64().unwrap() as usize;
        assert_eq!(&text[start..end], "https://x.test/a");
    }

    #[test]
    fn test_long_text_is_trimmed_to_fit_link() {
        let long = "word ".repeat(200);
        let record = post_record(&long, Some("https://x.test/a"));
        assert!(record["text"].as_str().unwrap().chars().count() <= MAX_POST_LENGTH);
    }
}
