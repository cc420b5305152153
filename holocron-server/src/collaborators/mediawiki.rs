//! MediaWiki action API client.
//!
//! Logs in with a bot password on first use and keeps the session cookie.
//! Edits fetch the current text, apply the transform locally and only
//! write when the text changed, so replaying an edit is a read.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use holocron_core::UserName;

use super::{check_status, transport_error, EditOutcome, PageTransform, Revision, WikiClient};
use crate::error::CollaboratorError;

pub struct MediaWikiClient {
    client: Client,
    api_url: String,
    username: String,
    password: String,
    /// CSRF token for the current session; `None` until logged in.
    csrf_token: Mutex<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    info: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    query: TokenQuery,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    tokens: Tokens,
}

#[derive(Debug, Deserialize)]
struct Tokens {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    login: LoginResult,
}

#[derive(Debug, Deserialize)]
struct LoginResult {
    result: String,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryResponse {
    query: Option<CategoryQuery>,
    #[serde(rename = "continue")]
    cont: Option<CategoryContinue>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct CategoryQuery {
    categorymembers: Vec<CategoryMember>,
}

#[derive(Debug, Deserialize)]
struct CategoryMember {
    title: String,
}

#[derive(Debug, Deserialize)]
struct CategoryContinue {
    cmcontinue: String,
}

#[derive(Debug, Deserialize)]
struct PagesResponse {
    query: Option<PagesQuery>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct PagesQuery {
    pages: Vec<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct PageInfo {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    revisions: Vec<RevisionInfo>,
}

#[derive(Debug, Deserialize)]
struct RevisionInfo {
    user: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    slots: Option<Slots>,
}

#[derive(Debug, Deserialize)]
struct Slots {
    main: MainSlot,
}

#[derive(Debug, Deserialize)]
struct MainSlot {
    content: String,
}

#[derive(Debug, Deserialize)]
struct EditResponse {
    edit: Option<EditResult>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct EditResult {
    result: String,
}

impl MediaWikiClient {
    pub fn new(
        api_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        user_agent: &str,
        request_timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let client = Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(request_timeout)
            .build()
            .map_err(|e| transport_error("build wiki client", e))?;
        Ok(Self {
            client,
            api_url: api_url.into(),
            username: username.into(),
            password: password.into(),
            csrf_token: Mutex::new(None),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &str,
        params: &[(&str, &str)],
    ) -> Result<T, CollaboratorError> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[("format", "json"), ("formatversion", "2")])
            .query(params)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        check_status(operation, response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(operation, e))
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &str,
        form: &[(&str, &str)],
    ) -> Result<T, CollaboratorError> {
        let response = self
            .client
            .post(&self.api_url)
            .query(&[("format", "json"), ("formatversion", "2")])
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(operation, e))?;
        check_status(operation, response)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(operation, e))
    }

    async fn login(&self) -> Result<String, CollaboratorError> {
        info!("Logging in to {} as {}", self.api_url, self.username);

        let tokens: TokenResponse = self
            .get_json("fetch login token", &[("action", "query"), ("meta", "tokens"), ("type", "login")])
            .await?;
        let login_token = tokens
            .query
            .tokens
            .logintoken
            .ok_or_else(|| CollaboratorError::http("fetch login token", None, "no login token returned"))?;

        let login: LoginResponse = self
            .post_json(
                "login",
                &[
                    ("action", "login"),
                    ("lgname", self.username.as_str()),
                    ("lgpassword", self.password.as_str()),
                    ("lgtoken", login_token.as_str()),
                ],
            )
            .await?;
        if login.login.result != "Success" {
            return Err(CollaboratorError::Auth {
                operation: "login".to_string(),
                message: login.login.reason.unwrap_or(login.login.result),
            });
        }

        let tokens: TokenResponse = self
            .get_json("fetch csrf token", &[("action", "query"), ("meta", "tokens")])
            .await?;
        tokens
            .query
            .tokens
            .csrftoken
            .ok_or_else(|| CollaboratorError::http("fetch csrf token", None, "no csrf token returned"))
    }

    async fn csrf_token(&self) -> Result<String, CollaboratorError> {
        let mut token = self.csrf_token.lock().await;
        if let Some(existing) = token.as_ref() {
            return Ok(existing.clone());
        }
        let fresh = self.login().await?;
        *token = Some(fresh.clone());
        Ok(fresh)
    }

    async fn save(&self, title: &str, text: &str, summary: &str) -> Result<(), CollaboratorError> {
        // A session can expire between edits; log in again once
        for attempt in 0..2 {
            let token = self.csrf_token().await?;
            let response: EditResponse = self
                .post_json(
                    "edit",
                    &[
                        ("action", "edit"),
                        ("title", title),
                        ("text", text),
                        ("summary", summary),
                        ("bot", "1"),
                        ("token", token.as_str()),
                    ],
                )
                .await?;

            match (response.edit, response.error) {
                (Some(edit), _) if edit.result == "Success" => return Ok(()),
                (_, Some(error)) if error.code == "badtoken" && attempt == 0 => {
                    warn!("Wiki session expired during edit of {}; logging in again", title);
                    *self.csrf_token.lock().await = None;
                }
                (_, Some(error)) => return Err(api_error("edit", error)),
                (Some(edit), None) => {
                    return Err(CollaboratorError::http("edit", None, edit.result));
                }
                (None, None) => {
                    return Err(CollaboratorError::http("edit", None, "empty edit response"));
                }
            }
        }
        Err(CollaboratorError::Auth {
            operation: "edit".to_string(),
            message: "session could not be renewed".to_string(),
        })
    }

    async fn page(&self, operation: &str, title: &str, params: &[(&str, &str)]) -> Result<PageInfo, CollaboratorError> {
        let mut all = vec![("action", "query"), ("prop", "revisions"), ("titles", title)];
        all.extend_from_slice(params);
        let response: PagesResponse = self.get_json(operation, &all).await?;
        if let Some(error) = response.error {
            return Err(api_error(operation, error));
        }
        response
            .query
            .and_then(|q| q.pages.into_iter().next())
            .ok_or_else(|| CollaboratorError::http(operation, None, "no page in response"))
    }
}

fn api_error(operation: &str, error: ApiError) -> CollaboratorError {
    match error.code.as_str() {
        "ratelimited" => CollaboratorError::RateLimited {
            operation: operation.to_string(),
            retry_after: None,
        },
        "permissiondenied" | "protectedpage" | "assertbotfailed" | "assertuserfailed" => {
            CollaboratorError::Auth {
                operation: operation.to_string(),
                message: error.info,
            }
        }
        "missingtitle" => CollaboratorError::not_found(operation),
        _ => CollaboratorError::http(operation, None, format!("{}: {}", error.code, error.info)),
    }
}

#[async_trait]
impl WikiClient for MediaWikiClient {
    async fn list_category_members(&self, category: &str) -> Result<Vec<String>, CollaboratorError> {
        let title = if category.starts_with("Category:") {
            category.to_string()
        } else {
            format!("Category:{}", category)
        };

        let mut members = Vec::new();
        let mut cont: Option<String> = None;
        loop {
            let mut params = vec![
                ("action", "query"),
                ("list", "categorymembers"),
                ("cmtitle", title.as_str()),
                ("cmlimit", "max"),
            ];
            if let Some(c) = cont.as_deref() {
                params.push(("cmcontinue", c));
            }
            let response: CategoryResponse = self.get_json("list category", &params).await?;
            if let Some(error) = response.error {
                return Err(api_error("list category", error));
            }
            if let Some(query) = response.query {
                members.extend(query.categorymembers.into_iter().map(|m| m.title));
            }
            match response.cont {
                Some(next) => cont = Some(next.cmcontinue),
                None => break,
            }
        }
        debug!("{} has {} members", title, members.len());
        Ok(members)
    }

    async fn get_page_content(&self, title: &str) -> Result<String, CollaboratorError> {
        let page = self
            .page(
                "get page",
                title,
                &[("rvprop", "content"), ("rvslots", "main")],
            )
            .await?;
        if page.missing {
            return Err(CollaboratorError::not_found(title));
        }
        page.revisions
            .into_iter()
            .next()
            .and_then(|r| r.slots)
            .map(|s| s.main.content)
            .ok_or_else(|| CollaboratorError::http("get page", None, "revision has no content"))
    }

    async fn edit_page(
        &self,
        title: &str,
        transform: PageTransform<'_>,
        summary: &str,
    ) -> Result<EditOutcome, CollaboratorError> {
        let current = match self.get_page_content(title).await {
            Ok(text) => text,
            Err(CollaboratorError::NotFound { .. }) => String::new(),
            Err(e) => return Err(e),
        };
        let updated = transform(&current);
        if updated == current {
            debug!("No change needed on {}", title);
            return Ok(EditOutcome::Unchanged);
        }
        self.save(title, &updated, summary).await?;
        info!("Edited {}: {}", title, summary);
        Ok(EditOutcome::Saved)
    }

    async fn page_exists(&self, title: &str) -> Result<bool, CollaboratorError> {
        let page = self.page("page exists", title, &[("rvprop", "ids")]).await?;
        Ok(!page.missing)
    }

    async fn first_revision(&self, title: &str) -> Result<Revision, CollaboratorError> {
        let page = self
            .page(
                "first revision",
                title,
                &[("rvprop", "user|timestamp"), ("rvdir", "newer"), ("rvlimit", "1")],
            )
            .await?;
        if page.missing {
            return Err(CollaboratorError::not_found(title));
        }
        let revision = page
            .revisions
            .into_iter()
            .next()
            .ok_or_else(|| CollaboratorError::not_found(format!("first revision of {}", title)))?;
        match (revision.user, revision.timestamp) {
            (Some(user), Some(timestamp)) => Ok(Revision {
                user: UserName::from(user),
                timestamp,
            }),
            _ => Err(CollaboratorError::http(
                "first revision",
                None,
                "revision is missing its user or timestamp",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_payload_parses() {
        let json = r#"{"query":{"pages":[{"title":"X","revisions":[
            {"user":"Ayy","timestamp":"2024-03-01T12:00:00Z"}]}]}}"#;
        let parsed: PagesResponse = serde_json::from_str(json).unwrap();
        let page = parsed.query.unwrap().pages.into_iter().next().unwrap();
        assert!(!page.missing);
        assert_eq!(page.revisions[0].user.as_deref(), Some("Ayy"));
    }

    #[test]
    fn test_missing_page_payload_parses() {
        let json = r#"{"query":{"pages":[{"title":"X","missing":true}]}}"#;
        let parsed: PagesResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.query.unwrap().pages[0].missing);
    }

    #[test]
    fn test_api_error_mapping() {
        let e = api_error(
            "edit",
            ApiError {
                code: "protectedpage".into(),
                info: "locked".into(),
            },
        );
        assert!(matches!(e, CollaboratorError::Auth { .. }));
        let e = api_error(
            "edit",
            ApiError {
                code: "ratelimited".into(),
                info: "slow down".into(),
            },
        );
        assert!(e.is_retryable());
    }
}
