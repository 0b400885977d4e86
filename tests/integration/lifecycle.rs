use std::time::{SystemTime, UNIX_EPOCH};

use crate::*;
use talkgroup_core::crypto::activation_code;
use talkgroup_core::LicensingStatus;
use talkgroup_engine::license::{issue_key, ACTIVATION_HORIZON_SECS};

#[tokio::test]
async fn test_stop_leaves_groups_and_peers_notice() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &group("ops"), 2).await;

    assert_eq!(nodes[1].engine.stop(), EngineResult::Ok);
    nodes[1]
        .expect("left", |e| *e == Event::GroupLeft { id: "ops".into() })
        .await;
    nodes[1].expect("stopped", |e| *e == Event::EngineStopped).await;
    assert_eq!(nodes[1].engine.join_group("ops"), EngineResult::GeneralFailure);

    nodes[0]
        .expect("peer undiscovered", |e| {
            matches!(e, Event::GroupNodeUndiscovered { .. })
        })
        .await;

    // The group survives a stop and can be joined after a restart.
    assert_eq!(nodes[1].engine.start(), EngineResult::Ok);
    assert_eq!(nodes[1].engine.join_group("ops"), EngineResult::Ok);
    nodes[1]
        .expect("rejoined", |e| *e == Event::GroupJoined { id: "ops".into() })
        .await;
}

#[tokio::test]
async fn test_shutdown_deletes_groups_and_allows_reinitialize() {
    let hub = LoopbackHub::new();
    let mut a = Node::start(&hub, 1).await;
    a.join(group("one")).await;
    a.join(group("two")).await;

    assert_eq!(a.engine.shutdown().await, EngineResult::Ok);
    a.expect("one deleted", |e| *e == Event::GroupDeleted { id: "one".into() })
        .await;
    a.expect("two deleted", |e| *e == Event::GroupDeleted { id: "two".into() })
        .await;
    assert!(!a.engine.is_initialized());
    assert_eq!(hub.members("one"), 0);

    let identity = Identity {
        node_id: a.id.clone(),
        ..Identity::default()
    };
    assert_eq!(
        a.engine.initialize(EnginePolicy::default(), identity, None),
        EngineResult::Ok
    );
    assert_eq!(a.engine.node_id(), Some(a.id.clone()));
    assert!(a.engine.groups().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_create_and_delete() {
    let hub = LoopbackHub::new();
    let mut a = Node::start(&hub, 1).await;
    a.join(group("ops")).await;

    assert_eq!(a.engine.create_group(group("ops")), EngineResult::Ok);
    a.expect("create failed", |e| *e == Event::GroupCreateFailed { id: "ops".into() })
        .await;

    assert_eq!(a.engine.delete_group("ops"), EngineResult::Ok);
    a.expect("deleted", |e| *e == Event::GroupDeleted { id: "ops".into() })
        .await;
    assert_eq!(a.engine.join_group("ops"), EngineResult::InvalidParameters);
    assert!(a.engine.group_status("ops").await.is_none());
}

#[tokio::test]
async fn test_group_from_json_config() {
    let hub = LoopbackHub::new();
    let mut a = Node::start(&hub, 1).await;
    let json = serde_json::json!({
        "id": "json-group",
        "name": "From JSON",
        "type": "presence",
        "alias": "relay",
    })
    .to_string();

    assert_eq!(a.engine.create_group_json(&json), EngineResult::Ok);
    a.expect("created", |e| *e == Event::GroupCreated { id: "json-group".into() })
        .await;
    let status = a.engine.group_status("json-group").await.unwrap();
    assert_eq!(status.descriptor.name, "From JSON");
}

#[tokio::test]
async fn test_connect_failure_and_link_loss() {
    let hub = LoopbackHub::new();
    let mut a = Node::start(&hub, 1).await;

    hub.refuse("blocked");
    assert_eq!(a.engine.create_group(group("blocked")), EngineResult::Ok);
    a.engine.join_group("blocked");
    a.expect("connect failed", |e| {
        *e == Event::GroupConnectFailed { id: "blocked".into() }
    })
    .await;

    a.join(group("ops")).await;
    hub.sever("ops");
    a.expect("disconnected", |e| *e == Event::GroupDisconnected { id: "ops".into() })
        .await;
    let status = a.engine.group_status("ops").await.unwrap();
    assert_eq!(status.state, talkgroup_engine::GroupState::Disconnected);
}

#[tokio::test]
async fn test_license_update_posts_changed() {
    let hub = LoopbackHub::new();
    let mut a = Node::start(&hub, 1).await;

    assert_eq!(
        a.engine.update_license("", "", ""),
        LicensingStatus::NullEntitlementKey
    );
    assert!(a.engine.license().is_none());

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    let expiry = now + 3600;
    let key = issue_key("ent-1", expiry);
    assert_eq!(a.engine.update_license("ent-1", &key, ""), LicensingStatus::Ok);
    a.expect("license changed", |e| *e == Event::LicenseChanged).await;

    let license = a.engine.license().unwrap();
    assert_eq!(license.entitlement, "ent-1");
    assert_eq!(license.expires, expiry);
    assert!(!license.activated);

    // Beyond the activation horizon the key needs its activation code.
    let distant = issue_key("ent-2", now + 2 * ACTIVATION_HORIZON_SECS);
    assert_eq!(
        a.engine.update_license("ent-2", &distant, ""),
        LicensingStatus::RequiresActivation
    );
    assert_eq!(a.engine.license().unwrap().entitlement, "ent-1");
    assert_eq!(
        a.engine.update_license("ent-2", &distant, &activation_code(&distant)),
        LicensingStatus::Ok
    );
    a.expect("license changed", |e| *e == Event::LicenseChanged).await;
    assert!(a.engine.license().unwrap().activated);
}
