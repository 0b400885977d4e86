use crate::*;
use bytes::Bytes;

fn secured(id: &str, password: &str) -> GroupConfig {
    GroupConfig {
        crypto_password: password.into(),
        ..group(id)
    }
}

#[tokio::test]
async fn test_encrypted_group_delivers_between_members() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &secured("sec", "s3cret"), 2).await;

    nodes[0]
        .engine
        .send_raw("sec", Bytes::from_static(b"classified"));
    let got = nodes[1]
        .expect("raw", |e| matches!(e, Event::GroupRawReceived { .. }))
        .await;
    if let Event::GroupRawReceived { raw, .. } = got {
        assert_eq!(raw.as_ref(), b"classified");
    }
}

#[tokio::test]
async fn test_wrong_password_hears_nothing() {
    let hub = LoopbackHub::new();
    let mut a = Node::start(&hub, 1).await;
    let mut b = Node::start(&hub, 2).await;
    a.join(secured("sec", "right")).await;
    b.join(secured("sec", "wrong")).await;

    a.engine.send_raw("sec", Bytes::from_static(b"classified"));
    b.expect_none("raw under the wrong key", |e| {
        matches!(e, Event::GroupRawReceived { .. })
    })
    .await;
    a.expect_none("discovery under the wrong key", |e| {
        matches!(e, Event::GroupNodeDiscovered { .. })
    })
    .await;
}

#[tokio::test]
async fn test_plaintext_member_is_ignored_by_encrypted_member() {
    let hub = LoopbackHub::new();
    let mut a = Node::start(&hub, 1).await;
    let mut b = Node::start(&hub, 2).await;
    a.join(group("sec")).await;
    b.join(secured("sec", "s3cret")).await;

    a.engine.send_raw("sec", Bytes::from_static(b"in the clear"));
    b.expect_none("plaintext raw", |e| matches!(e, Event::GroupRawReceived { .. }))
        .await;

    // The plaintext side cannot read sealed frames either.
    b.engine.send_raw("sec", Bytes::from_static(b"sealed"));
    a.expect_none("sealed raw", |e| matches!(e, Event::GroupRawReceived { .. }))
        .await;
}
