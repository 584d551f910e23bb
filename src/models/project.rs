//! Project model
//!
//! This module provides:
//! - `Project` entity owned by an account
//! - `Visibility` and `ProjectStatus`, the two fields anonymous access depends on
//! - Input types for creating and updating projects
//! - `ProjectFilter` and `ReadScope` used by list queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Project entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Unique identifier
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Owning account. Never changes after creation.
    pub owner_id: i64,
    pub visibility: Visibility,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Readable by anyone, including anonymous requesters
    pub fn is_public_and_published(&self) -> bool {
        self.visibility == Visibility::Public && self.status == ProjectStatus::Published
    }
}

/// Whether non-owners may see the project at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    Public,
    Private,
}

impl Default for Visibility {
    fn default() -> Self {
        Self::Private
    }
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "PUBLIC",
            Visibility::Private => "PRIVATE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PUBLIC" => Some(Visibility::Public),
            "PRIVATE" => Some(Visibility::Private),
            _ => None,
        }
    }
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Project lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    /// Draft - visible to owner and admins only
    Draft,
    /// Published - visible to everyone when also public
    Published,
    /// Archived - hidden but not deleted
    Archived,
}

impl Default for ProjectStatus {
    fn default() -> Self {
        Self::Draft
    }
}

impl ProjectStatus {
    /// Convert status to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Draft => "DRAFT",
            ProjectStatus::Published => "PUBLISHED",
            ProjectStatus::Archived => "ARCHIVED",
        }
    }

    /// Parse status from its string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DRAFT" => Some(ProjectStatus::Draft),
            "PUBLISHED" => Some(ProjectStatus::Published),
            "ARCHIVED" => Some(ProjectStatus::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for creating a new project
#[derive(Debug, Clone)]
pub struct CreateProjectInput {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    /// Set from the authenticated subject, never from the request body
    pub owner_id: i64,
    /// Defaults to Private
    pub visibility: Option<Visibility>,
    /// Defaults to Draft
    pub status: Option<ProjectStatus>,
}

impl CreateProjectInput {
    pub fn new(title: impl Into<String>, owner_id: i64) -> Self {
        Self {
            title: title.into(),
            description: None,
            category: None,
            owner_id,
            visibility: None,
            status: None,
        }
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn with_status(mut self, status: ProjectStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Input for updating an existing project.
///
/// There is deliberately no owner field.
#[derive(Debug, Clone, Default)]
pub struct UpdateProjectInput {
    pub title: Option<String>,
    /// `Some("")` clears the description
    pub description: Option<String>,
    /// `Some("")` clears the category
    pub category: Option<String>,
    pub visibility: Option<Visibility>,
    pub status: Option<ProjectStatus>,
}

impl UpdateProjectInput {
    /// Check if any field is set
    pub fn has_changes(&self) -> bool {
        self.title.is_some()
            || self.description.is_some()
            || self.category.is_some()
            || self.visibility.is_some()
            || self.status.is_some()
    }

    /// Apply the set fields to a project
    pub fn apply_to(&self, project: &mut Project) {
        if let Some(title) = &self.title {
            project.title = title.clone();
        }
        if let Some(description) = &self.description {
            project.description = non_empty(description);
        }
        if let Some(category) = &self.category {
            project.category = non_empty(category);
        }
        if let Some(visibility) = self.visibility {
            project.visibility = visibility;
        }
        if let Some(status) = self.status {
            project.status = status;
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Explicit list filters. All set fields combine with AND.
#[derive(Debug, Clone, Default)]
pub struct ProjectFilter {
    /// Case-insensitive substring over title or description
    pub search: Option<String>,
    pub status: Option<ProjectStatus>,
    pub visibility: Option<Visibility>,
    pub category: Option<String>,
    pub owner_id: Option<i64>,
}

/// Row-level restriction a requester's read permission imposes on a list.
///
/// Always ANDed with `ProjectFilter`, never replaced by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadScope {
    /// No rows at all
    Nothing,
    /// `visibility = PUBLIC AND status = PUBLISHED`
    PublicOnly,
    /// Public and published, or owned by the given account
    PublicOrOwnedBy(i64),
    /// Every row
    Everything,
}

impl ReadScope {
    /// In-memory equivalent of the SQL predicate
    pub fn admits(&self, project: &Project) -> bool {
        match self {
            ReadScope::Nothing => false,
            ReadScope::PublicOnly => project.is_public_and_published(),
            ReadScope::PublicOrOwnedBy(id) => {
                project.is_public_and_published() || project.owner_id == *id
            }
            ReadScope::Everything => true,
        }
    }
}
