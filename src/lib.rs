//! projecthub - Project management API
//!
//! Account authentication with separate user and admin logins, project
//! CRUD guarded by a single access-control model, and an admin dashboard.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
