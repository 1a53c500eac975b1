mod common;

use common::{TestApp, owner, png};
use drive_store::services::error::ErrorCode;

#[tokio::test]
async fn concurrent_video_thumbnails_generate_once() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let clip = app
        .state
        .tree
        .upload(alice, None, "clip.mp4", false, b"not really a video")
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tree = app.state.tree.clone();
            tokio::spawn(async move { tree.thumbnail(alice, clip.id).await })
        })
        .collect();
    let mut previews = Vec::new();
    for handle in handles {
        previews.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(app.extractor.calls(), 1);
    assert_eq!(app.state.tree.thumbnails().generations(), 1);
    assert!(previews.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(&previews[0][..2], &[0xFF, 0xD8]);
    assert_eq!(
        app.state.tree.blobs().locks().thumbnail_locks_in_flight(),
        0
    );

    // Served from disk afterwards.
    app.state.tree.thumbnail(alice, clip.id).await.unwrap();
    assert_eq!(app.extractor.calls(), 1);
}

#[tokio::test]
async fn image_thumbnail_fits_bounding_box() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let photo = app
        .state
        .tree
        .upload(alice, None, "wide.png", false, &png(400, 200))
        .await
        .unwrap();

    let preview = app.state.tree.thumbnail(alice, photo.id).await.unwrap();
    let decoded = image::load_from_memory(&preview).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (200, 100));
    assert_eq!(app.extractor.calls(), 0);
}

#[tokio::test]
async fn replacing_content_invalidates_thumbnail() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let tree = &app.state.tree;

    let photo = tree
        .upload(alice, None, "pic.png", false, &png(400, 200))
        .await
        .unwrap();
    let first = tree.thumbnail(alice, photo.id).await.unwrap();
    let blob_id = photo.blob_id.unwrap();
    assert!(tree.thumbnails().thumbnail_path(blob_id).exists());

    tree.upload(alice, None, "pic.png", false, &png(100, 300))
        .await
        .unwrap();
    assert!(!tree.thumbnails().thumbnail_path(blob_id).exists());

    let second = tree.thumbnail(alice, photo.id).await.unwrap();
    assert_ne!(first, second);
    let decoded = image::load_from_memory(&second).unwrap();
    assert_eq!(decoded.height(), 200);
    assert_eq!(tree.thumbnails().generations(), 2);

    tree.delete(alice, photo.id).await.unwrap();
    assert!(!tree.thumbnails().thumbnail_path(blob_id).exists());
}

#[tokio::test]
async fn unsupported_or_directory_nodes_have_no_thumbnail() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let tree = &app.state.tree;

    let notes = tree.upload(alice, None, "notes.txt", false, b"x").await.unwrap();
    let dir = tree.upload(alice, None, "pics.png", true, &[]).await.unwrap();

    for id in [notes.id, dir.id] {
        let err = tree.thumbnail(alice, id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }
}

#[tokio::test]
async fn corrupt_image_is_a_storage_failure() {
    let app = TestApp::new().await;
    let alice = owner(&app.account("alice").await);
    let bad = app
        .state
        .tree
        .upload(alice, None, "broken.jpg", false, b"definitely not a jpeg")
        .await
        .unwrap();

    let err = app.state.tree.thumbnail(alice, bad.id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::StorageFailure);
    assert!(!app
        .state
        .tree
        .thumbnails()
        .thumbnail_path(bad.blob_id.unwrap())
        .exists());
}
