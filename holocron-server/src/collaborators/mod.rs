//! Contracts for the external systems the engine drives.
//!
//! The engine only ever holds `Arc<dyn ...>` of these traits. The HTTP
//! implementations live in the submodules; in-memory fakes for tests live
//! in `crate::testing`.

pub mod bluesky;
pub mod discord;
pub mod mediawiki;
pub mod project_data;

pub use bluesky::BlueskyClient;
pub use discord::DiscordClient;
pub use mediawiki::MediaWikiClient;
pub use project_data::{ProjectData, ProjectDataSource, ProjectInfo, ProjectRegistry, WikiProjectData};

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};

use holocron_core::UserName;

use crate::error::CollaboratorError;

/// A pure rewrite of a page's wikitext. Must be idempotent.
pub type PageTransform<'a> = &'a (dyn Fn(&str) -> String + Send + Sync);

/// Author and time of a page's first revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub user: UserName,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Saved,
    /// The transform left the text as it was; nothing was written.
    Unchanged,
}

#[async_trait]
pub trait WikiClient: Send + Sync {
    async fn list_category_members(&self, category: &str) -> Result<Vec<String>, CollaboratorError>;

    /// Current wikitext. `NotFound` when the page does not exist.
    async fn get_page_content(&self, title: &str) -> Result<String, CollaboratorError>;

    /// Apply `transform` to the current text (empty for a missing page) and
    /// save the result if it differs.
    async fn edit_page(
        &self,
        title: &str,
        transform: PageTransform<'_>,
        summary: &str,
    ) -> Result<EditOutcome, CollaboratorError>;

    async fn page_exists(&self, title: &str) -> Result<bool, CollaboratorError>;

    async fn first_revision(&self, title: &str) -> Result<Revision, CollaboratorError>;
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Returns the platform's message id.
    async fn post_message(&self, channel: &str, text: &str) -> Result<String, CollaboratorError>;

    async fn react_to_message(
        &self,
        channel: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait SocialClient: Send + Sync {
    /// Returns the platform's post id.
    async fn post_update(&self, text: &str, link: Option<&str>) -> Result<String, CollaboratorError>;
}

/// Run `call` with a deadline; a miss becomes `CollaboratorError::Timeout`.
pub async fn bounded<T, F>(timeout: Duration, operation: &str, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            operation: operation.to_string(),
        }),
    }
}

/// Map a transport failure onto the taxonomy.
pub(crate) fn transport_error(operation: &str, e: reqwest::Error) -> CollaboratorError {
    if e.is_timeout() {
        CollaboratorError::Timeout {
            operation: operation.to_string(),
        }
    } else {
        CollaboratorError::http(operation, e.status().map(|s| s.as_u16()), e.to_string())
    }
}

/// Pass a successful response through; turn anything else into an error
/// carrying the body text.
pub(crate) async fn check_status(
    operation: &str,
    response: Response,
) -> Result<Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();

    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => CollaboratorError::RateLimited {
            operation: operation.to_string(),
            retry_after,
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CollaboratorError::Auth {
            operation: operation.to_string(),
            message: body,
        },
        StatusCode::NOT_FOUND => CollaboratorError::not_found(operation),
        _ => CollaboratorError::http(operation, Some(status.as_u16()), body),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_maps_deadline_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, CollaboratorError>(())
        };
        let result = bounded(Duration::from_millis(10), "slow call", slow).await;
        assert!(matches!(result, Err(CollaboratorError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let fast = async { Ok::<_, CollaboratorError>(7) };
        assert_eq!(bounded(Duration::from_secs(1), "fast", fast).await, Ok(7));
    }
}
