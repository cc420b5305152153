//! WookieeProject data: which projects exist, how nominations name them,
//! where their portfolios live and which chat channel they follow.
//!
//! The data is a JSON object kept on a wiki page. `reload data` replaces the
//! whole snapshot in one swap; readers holding the previous `Arc` finish
//! with it undisturbed.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use holocron_core::wikitext::project_links;
use holocron_core::{NominationType, ProjectId};

use super::WikiClient;
use crate::error::CollaboratorError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Alternative names accepted on nomination pages and in commands.
    #[serde(default)]
    pub shortcuts: Vec<String>,
    pub channel: Option<String>,
    pub emoji: Option<String>,
    /// Portfolio page per type abbreviation (`FA`, `GA`, `CA`).
    #[serde(default)]
    pub portfolios: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectData {
    pub projects: BTreeMap<ProjectId, ProjectInfo>,
}

impl ProjectData {
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn get(&self, id: &ProjectId) -> Option<&ProjectInfo> {
        self.projects.get(id)
    }

    /// Find a project by name or shortcut, ignoring case.
    pub fn resolve(&self, name: &str) -> Option<ProjectId> {
        let lower = name.trim().to_lowercase();
        let wanted = lower.strip_prefix("wookieeproject ").unwrap_or(&lower).trim();
        self.projects
            .iter()
            .find(|(id, info)| {
                id.0.to_lowercase() == wanted
                    || info.shortcuts.iter().any(|s| s.to_lowercase() == wanted)
            })
            .map(|(id, _)| id.clone())
    }

    /// Projects a nomination page names on its WookieeProject line, either
    /// by link or by name or shortcut.
    pub fn identify(&self, text: &str) -> Vec<ProjectId> {
        let mut found: Vec<ProjectId> = project_links(text)
            .iter()
            .filter_map(|name| self.resolve(name))
            .collect();

        if let Some(line) = text.lines().find(|l| l.contains("WookieeProject")) {
            let upper = line.to_uppercase();
            for (id, info) in &self.projects {
                let named = upper.contains(&id.0.to_uppercase())
                    || info
                        .shortcuts
                        .iter()
                        .any(|s| upper.contains(&s.to_uppercase()));
                if named && !found.contains(id) {
                    found.push(id.clone());
                }
            }
        }
        found
    }

    pub fn portfolio_page(&self, id: &ProjectId, kind: NominationType) -> Option<&str> {
        self.get(id)?
            .portfolios
            .get(kind.abbreviation())
            .map(String::as_str)
    }

    pub fn channel_for(&self, id: &ProjectId) -> Option<&str> {
        self.get(id)?.channel.as_deref()
    }

    pub fn emoji_for(&self, id: &ProjectId) -> Option<&str> {
        self.get(id)?.emoji.as_deref()
    }
}

#[async_trait]
pub trait ProjectDataSource: Send + Sync {
    async fn load_project_data(&self) -> Result<ProjectData, CollaboratorError>;
}

/// Reads the project data JSON from a wiki page.
pub struct WikiProjectData {
    wiki: Arc<dyn WikiClient>,
    page: String,
}

impl WikiProjectData {
    pub fn new(wiki: Arc<dyn WikiClient>, page: impl Into<String>) -> Self {
        Self {
            wiki,
            page: page.into(),
        }
    }
}

#[async_trait]
impl ProjectDataSource for WikiProjectData {
    async fn load_project_data(&self) -> Result<ProjectData, CollaboratorError> {
        let text = self.wiki.get_page_content(&self.page).await?;
        let json = text
            .trim()
            .trim_start_matches("<pre>")
            .trim_end_matches("</pre>");
        serde_json::from_str(json).map_err(|e| {
            CollaboratorError::http("parse project data", None, format!("{}: {}", self.page, e))
        })
    }
}

/// The currently loaded project data.
pub struct ProjectRegistry {
    source: Arc<dyn ProjectDataSource>,
    current: RwLock<Arc<ProjectData>>,
}

impl ProjectRegistry {
    pub fn new(source: Arc<dyn ProjectDataSource>) -> Self {
        Self {
            source,
            current: RwLock::new(Arc::new(ProjectData::default())),
        }
    }

    pub async fn snapshot(&self) -> Arc<ProjectData> {
        self.current.read().await.clone()
    }

    /// Load fresh data and swap it in. On failure the old snapshot stays.
    pub async fn reload(&self) -> Result<usize, CollaboratorError> {
        let fresh = self.source.load_project_data().await?;
        let count = fresh.len();
        *self.current.write().await = Arc::new(fresh);
        info!("Loaded data for {} WookieeProjects", count);
        Ok(count)
    }
}
