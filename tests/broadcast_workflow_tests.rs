use bidwire::backbone::Backbone;

mod utils;

use utils::setup::connect_viewer;
use utils::*;

#[tokio::test]
async fn test_sold_reaches_every_viewer_in_room_and_no_other() {
    let mut setup = TestSetupBuilder::new()
        .with_viewers("auction-42", vec!["alice", "bob"])
        .with_viewers("auction-7", vec!["carol"])
        .build()
        .await;

    setup.broadcast("auction-42", "SOLD").await;

    ViewerAssertion::for_room(&mut setup, "auction-42")
        .received("SOLD")
        .await;
    ViewerAssertion::for_room(&mut setup, "auction-7")
        .received_nothing()
        .await;
}

#[tokio::test]
async fn test_messages_arrive_in_publish_order() {
    let mut setup = TestSetupBuilder::new()
        .with_viewers("auction-1", vec!["alice", "bob"])
        .build()
        .await;

    let messages: Vec<String> = (1..=20).map(|n| format!("bid {}", n)).collect();
    for message in &messages {
        setup.broadcast("auction-1", message).await;
    }

    let expected: Vec<&str> = messages.iter().map(String::as_str).collect();
    ViewerAssertion::for_room(&mut setup, "auction-1")
        .received_in_order(&expected)
        .await;
}

#[tokio::test]
async fn test_broadcast_reaches_viewers_on_other_replica() {
    let setup = TestSetupBuilder::new().build().await;
    let (_replica_backbone, replica) = setup.replica();

    let mut remote = connect_viewer(&replica, "auction-42").await;

    setup.broadcast("auction-42", "SOLD").await;

    let message = tokio::time::timeout(std::time::Duration::from_secs(1), remote.receiver.recv())
        .await
        .unwrap();
    assert_eq!(message.as_deref(), Some("SOLD"));
}

#[tokio::test]
async fn test_room_subscribes_only_while_it_has_viewers() {
    let mut setup = TestSetupBuilder::new()
        .with_viewers("auction-42", vec!["alice", "bob"])
        .build()
        .await;

    assert!(setup.backbone.is_subscribed("auction-42").await);
    assert_eq!(setup.broadcaster.connection_count("auction-42").await, 2);

    setup.leave("alice").await;
    assert!(setup.backbone.is_subscribed("auction-42").await);
    assert!(setup.broadcaster.has_active_connection("auction-42").await);

    setup.leave("bob").await;
    assert!(!setup.backbone.is_subscribed("auction-42").await);
    assert!(!setup.broadcaster.has_active_connection("auction-42").await);
    assert!(setup.broadcaster.active_rooms().await.is_empty());
}

#[tokio::test]
async fn test_departed_viewer_stops_receiving() {
    let mut setup = TestSetupBuilder::new()
        .with_viewers("auction-42", vec!["alice", "bob"])
        .build()
        .await;

    setup.leave("alice").await;
    setup.broadcast("auction-42", "outbid").await;

    ViewerAssertion::for_viewers(&mut setup, &["bob"])
        .received("outbid")
        .await;
    ViewerAssertion::for_viewers(&mut setup, &["alice"])
        .received_nothing()
        .await;
}

#[tokio::test]
async fn test_room_reopens_after_teardown() {
    let mut setup = TestSetupBuilder::new()
        .with_viewers("auction-42", vec!["alice"])
        .build()
        .await;

    setup.leave("alice").await;
    assert!(!setup.backbone.is_subscribed("auction-42").await);

    setup.join("dave", "auction-42").await;
    assert!(setup.backbone.is_subscribed("auction-42").await);

    setup.broadcast("auction-42", "auction_started").await;
    ViewerAssertion::for_viewers(&mut setup, &["dave"])
        .received("auction_started")
        .await;
}

#[tokio::test]
async fn test_dead_viewer_does_not_block_the_room() {
    let mut setup = TestSetupBuilder::new()
        .with_viewers("auction-42", vec!["alice", "bob", "carol"])
        .build()
        .await;

    setup.abandon("bob");
    setup.broadcast("auction-42", "SOLD").await;

    ViewerAssertion::for_viewers(&mut setup, &["alice", "carol"])
        .received("SOLD")
        .await;
}

#[tokio::test]
async fn test_shutdown_releases_every_room() {
    let setup = TestSetupBuilder::new()
        .with_viewers("auction-1", vec!["alice"])
        .with_viewers("auction-2", vec!["bob"])
        .build()
        .await;

    assert_eq!(
        setup.backbone.subscribed_channels().await,
        vec!["auction-1", "auction-2"]
    );

    setup.broadcaster.shutdown().await;

    assert!(setup.backbone.subscribed_channels().await.is_empty());
    assert!(setup.broadcaster.active_rooms().await.is_empty());
}

#[tokio::test]
async fn test_publish_without_viewers_is_harmless() {
    let setup = TestSetupBuilder::new().build().await;

    // No room, no subscription: the message simply has no receivers
    assert!(setup.backbone.publish("auction-9", "SOLD").await.is_ok());
    setup.broadcast("auction-9", "SOLD").await;
    assert!(!setup.broadcaster.has_active_connection("auction-9").await);
}
