//! Storage services: blob store, lock registry, tree repository and engine,
//! thumbnails, shares, accounts and upload intake.

pub mod account_service;
pub mod blob_store;
pub mod error;
pub mod frame_extractor;
pub mod lock_registry;
pub mod progress;
pub mod share_service;
pub mod thumbnail_cache;
pub mod tree_repository;
pub mod tree_service;
pub mod upload;
