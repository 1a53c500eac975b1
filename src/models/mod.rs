//! Core data models for the drive store.
//!
//! These entities represent users, their node trees and share grants.
//! They map to database tables via `sqlx::FromRow` and serialize as JSON
//! via `serde`.

pub mod node;
pub mod share;
pub mod user;
