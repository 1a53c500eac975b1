//! Defines routes for the file store.
//!
//! ## Structure
//! - **Accounts**
//!   - `POST   /users`: create a user and their root directory
//!   - `GET    /me`: the calling user
//!
//! - **Tree**
//!   - `GET    /node`: root directory with children
//!   - `GET    /node/{id}`: one node with children
//!   - `GET    /file/{id}`: stream file content (`?inline=1`)
//!   - `GET    /thumbnail/{id}`: JPEG preview of an image or video
//!   - `POST   /upload`: create or replace (multipart or JSON)
//!   - `GET    /upload/progress`: server-sent upload percentages
//!   - `POST   /copy`, `/move`, `/rename`, `/delete`
//!
//! - **Shares**
//!   - `POST   /share`: create (or return) a public link
//!   - `DELETE /share/{node_id}`: revoke
//!   - `GET    /s/{token}`: anonymous download

use crate::{
    handlers::{
        account_handlers::{create_account, me},
        health_handlers::{healthz, readyz},
        node_handlers::{
            copy_node, delete_node, get_file, get_node, get_root_node, get_thumbnail, move_node,
            rename_node,
        },
        share_handlers::{create_share, delete_share, get_shared_file},
        upload_handlers::{upload, upload_progress},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Build the router. Handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // accounts
        .route("/users", post(create_account))
        .route("/me", get(me))
        // tree reads
        .route("/node", get(get_root_node))
        .route("/node/{id}", get(get_node))
        .route("/file/{id}", get(get_file))
        .route("/thumbnail/{id}", get(get_thumbnail))
        // uploads enforce their own size limit while streaming
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::disable()),
        )
        .route("/upload/progress", get(upload_progress))
        // tree mutations
        .route("/copy", post(copy_node))
        .route("/move", post(move_node))
        .route("/rename", post(rename_node))
        .route("/delete", post(delete_node))
        // shares
        .route("/share", post(create_share))
        .route("/share/{node_id}", delete(delete_share))
        .route("/s/{token}", get(get_shared_file))
}
