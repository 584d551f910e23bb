//! Data models
//!
//! This module contains the data structures used throughout projecthub:
//! - Database entities (Account, Project)
//! - Service input types
//! - Pagination and list filter types

mod account;
mod pagination;
mod project;

pub use account::{Account, AccountFilter, AccountRole, AccountStatus};
pub use pagination::{ListParams, PagedResult, MAX_LIMIT};
pub use project::{
    CreateProjectInput, Project, ProjectFilter, ProjectStatus, ReadScope, UpdateProjectInput,
    Visibility,
};
