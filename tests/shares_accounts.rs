mod common;

use chrono::{Duration, Utc};
use common::{TestApp, owner};
use drive_store::services::error::{ErrorCode, StorageError};

#[tokio::test]
async fn accounts_get_a_root_and_unique_names() {
    let app = TestApp::new().await;
    let account = app.account("alice").await;

    let root = app
        .state
        .tree
        .describe(owner(&account), None)
        .await
        .unwrap();
    assert_eq!(root.entry.node.id, account.root_id);
    assert_eq!(root.entry.node.name, "/");
    assert!(root.children.is_empty());

    let err = app
        .state
        .accounts
        .create_account("  alice ")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::UsernameTaken(_)));
    assert_eq!(err.code(), ErrorCode::Conflict);

    assert!(app.state.accounts.create_account("").await.is_err());
    let me = app.state.accounts.get(owner(&account)).await.unwrap();
    assert_eq!(me.unwrap().username, "alice");
}

#[tokio::test]
async fn share_tokens_are_reused_and_resolve() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let file = app
        .state
        .tree
        .upload(alice, None, "a.txt", false, b"hi")
        .await
        .unwrap();

    let share = app.state.shares.create_share(alice, file.id, None).await.unwrap();
    assert_eq!(share.token.len(), 24);
    let again = app.state.shares.create_share(alice, file.id, None).await.unwrap();
    assert_eq!(share.token, again.token);

    let resolved = app.state.shares.resolve(&share.token).await.unwrap();
    assert_eq!(resolved.id, file.id);

    let view = app.state.tree.describe(alice, Some(file.id)).await.unwrap();
    assert_eq!(view.entry.share_token.as_deref(), Some(share.token.as_str()));

    assert!(app.state.shares.delete_share(alice, file.id).await.unwrap());
    assert!(!app.state.shares.delete_share(alice, file.id).await.unwrap());
    assert!(matches!(
        app.state.shares.resolve(&share.token).await.unwrap_err(),
        StorageError::ShareNotFound
    ));
}

#[tokio::test]
async fn expired_and_foreign_shares() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let bob = owner(&app.account("bob").await);
    let file = app
        .state
        .tree
        .upload(alice, None, "a.txt", false, b"hi")
        .await
        .unwrap();

    let err = app
        .state
        .shares
        .create_share(bob, file.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    let share = app
        .state
        .shares
        .create_share(alice, file.id, Some(Utc::now() - Duration::seconds(5)))
        .await
        .unwrap();
    let err = app.state.shares.resolve(&share.token).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Gone);
}

#[tokio::test]
async fn deleting_node_drops_its_share() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let file = app
        .state
        .tree
        .upload(alice, None, "a.txt", false, b"hi")
        .await
        .unwrap();
    let share = app.state.shares.create_share(alice, file.id, None).await.unwrap();

    app.state.tree.delete(alice, file.id).await.unwrap();
    assert_eq!(
        app.state.shares.resolve(&share.token).await.unwrap_err().code(),
        ErrorCode::NotFound
    );
}

#[tokio::test]
async fn expired_share_is_replaced_on_create() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let file = app
        .state
        .tree
        .upload(alice, None, "a.txt", false, b"hi")
        .await
        .unwrap();

    let stale = app
        .state
        .shares
        .create_share(alice, file.id, Some(Utc::now() - Duration::seconds(5)))
        .await
        .unwrap();
    let fresh = app.state.shares.create_share(alice, file.id, None).await.unwrap();

    assert_ne!(stale.token, fresh.token);
    assert!(fresh.expires_at.is_none());
    assert_eq!(
        app.state.shares.resolve(&fresh.token).await.unwrap().id,
        file.id
    );
    assert!(matches!(
        app.state.shares.resolve(&stale.token).await.unwrap_err(),
        StorageError::ShareNotFound
    ));
}
