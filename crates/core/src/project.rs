//! Authoritative records returned by the pull-based project fetch.
//!
//! These mirror the JSON served by `GET /project`. Field names follow the
//! server's wire format; unknown fields are ignored and most optional
//! fields default so that older servers still deserialize.

use serde::{Deserialize, Serialize};

use crate::models::SelectedModel;

/// Repository a project is attached to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub private: bool,
    pub owner: RepoOwner,
    pub html_url: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoOwner {
    pub login: String,
    pub id: i64,
}

/// One fulfilled agent request. Doubles as the result payload of a
/// completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub user_email: String,
    pub message: String,
    /// Link to the pull request the agent opened, empty when none was opened.
    #[serde(default)]
    pub pull_request_url: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub chat_url: String,
    #[serde(default)]
    pub seen: bool,
}

/// A project visible to the signed-in identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub email: String,
    pub repo: Option<Repo>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub chats: Vec<Chat>,
    /// Remaining agent requests (server-side quota).
    #[serde(default)]
    pub requests_available: i64,
    /// Target model pinned by the project owner, if any.
    #[serde(default)]
    pub selected_model: Option<SelectedModel>,
}

impl Project {
    /// Whether the server-side quota still allows another request.
    pub fn has_requests_left(&self) -> bool {
        self.requests_available > 0
    }

    /// Chats that produced a pull request, newest first.
    pub fn fulfilled_chats(&self) -> Vec<&Chat> {
        let mut chats: Vec<&Chat> = self
            .chats
            .iter()
            .filter(|c| !c.pull_request_url.is_empty())
            .collect();
        // RFC 3339 timestamps sort lexicographically.
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        chats
    }
}

/// Response envelope of `GET /project`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectList {
    #[serde(default)]
    pub projects: Vec<Project>,
}

/// Look up a project by id.
pub fn find_project<'a>(projects: &'a [Project], id: &str) -> Option<&'a Project> {
    projects.iter().find(|p| p.id == id)
}
