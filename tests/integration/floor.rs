use crate::*;
use talkgroup_core::TxParams;

fn rx_aliases(event: &Event) -> Option<Vec<String>> {
    match event {
        Event::GroupRxSpeakersChanged { talkers, .. } => {
            Some(talkers.list.iter().map(|t| t.alias.clone()).collect())
        }
        _ => None,
    }
}

#[tokio::test]
async fn test_talker_is_heard_by_other_members() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &group("ops"), 2).await;

    let params = TxParams {
        alias: "alpha-1".into(),
        ..TxParams::new(1, 0)
    };
    assert_eq!(nodes[0].engine.begin_tx_advanced("ops", params), EngineResult::Ok);
    nodes[0]
        .expect("tx started", |e| *e == Event::GroupTxStarted { id: "ops".into() })
        .await;

    let b = &mut nodes[1];
    b.expect("rx started", |e| *e == Event::GroupRxStarted { id: "ops".into() })
        .await;
    let speakers = b.expect("speakers", |e| rx_aliases(e).is_some()).await;
    assert_eq!(rx_aliases(&speakers), Some(vec!["alpha-1".to_string()]));

    assert_eq!(nodes[0].engine.end_tx("ops"), EngineResult::Ok);
    nodes[0]
        .expect("tx ended", |e| *e == Event::GroupTxEnded { id: "ops".into() })
        .await;
    nodes[1]
        .expect("rx ended", |e| *e == Event::GroupRxEnded { id: "ops".into() })
        .await;
}

#[tokio::test]
async fn test_higher_priority_preempts_and_equal_is_refused() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &group("ops"), 2).await;

    nodes[0].engine.begin_tx("ops", 1, 0);
    nodes[0]
        .expect("a tx", |e| *e == Event::GroupTxStarted { id: "ops".into() })
        .await;
    nodes[1]
        .expect("b hears a", |e| *e == Event::GroupRxStarted { id: "ops".into() })
        .await;

    nodes[1].engine.begin_tx("ops", 1, 0);
    nodes[1]
        .expect("equal priority refused", |e| *e == Event::GroupTxFailed { id: "ops".into() })
        .await;

    nodes[1].engine.begin_tx("ops", 5, 0);
    nodes[1]
        .expect("b tx", |e| *e == Event::GroupTxStarted { id: "ops".into() })
        .await;
    nodes[0]
        .expect("a usurped", |e| {
            *e == Event::GroupTxUsurpedByPriority { id: "ops".into() }
        })
        .await;

    let a = nodes[0].engine.group_status("ops").await.unwrap();
    assert!(!a.transmitting);
    let b = nodes[1].engine.group_status("ops").await.unwrap();
    assert!(b.transmitting);
}

#[tokio::test]
async fn test_simultaneous_equal_priority_begin_leaves_one_talker() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &group("ops"), 2).await;

    assert_eq!(nodes[0].engine.begin_tx("ops", 1, 0), EngineResult::Ok);
    assert_eq!(nodes[1].engine.begin_tx("ops", 1, 0), EngineResult::Ok);

    nodes[0]
        .expect("a tx", |e| *e == Event::GroupTxStarted { id: "ops".into() })
        .await;
    // B either hears A first and is refused, or starts and loses the tie.
    nodes[1]
        .expect("b refused or usurped", |e| {
            *e == Event::GroupTxFailed { id: "ops".into() }
                || *e == Event::GroupTxUsurpedByPriority { id: "ops".into() }
        })
        .await;
    nodes[0]
        .expect_none("a usurped", |e| {
            *e == Event::GroupTxUsurpedByPriority { id: "ops".into() }
        })
        .await;

    let a = nodes[0].engine.group_status("ops").await.unwrap();
    assert!(a.transmitting);
    let b = nodes[1].engine.group_status("ops").await.unwrap();
    assert!(!b.transmitting);
    assert_eq!(b.talkers.len(), 1);
}

#[tokio::test]
async fn test_full_duplex_group_allows_simultaneous_talkers() {
    let hub = LoopbackHub::new();
    let mut config = group("fdx");
    config.tx_options.fdx = true;
    let mut nodes = joined_nodes(&hub, &config, 2).await;

    nodes[0].engine.begin_tx("fdx", 1, 0);
    nodes[1]
        .expect("b hears a", |e| *e == Event::GroupRxStarted { id: "fdx".into() })
        .await;
    nodes[1].engine.begin_tx("fdx", 1, 0);
    nodes[1]
        .expect("b tx", |e| *e == Event::GroupTxStarted { id: "fdx".into() })
        .await;
    nodes[0]
        .expect_none("usurp on a full duplex group", |e| {
            matches!(e, Event::GroupTxUsurpedByPriority { .. })
        })
        .await;
}

#[tokio::test]
async fn test_max_tx_time_ends_transmit() {
    let hub = LoopbackHub::new();
    let mut config = group("ops");
    config.tx_options.max_tx_secs = 1;
    let mut a = Node::start(&hub, 1).await;
    a.join(config).await;

    a.engine.begin_tx("ops", 1, 0);
    a.expect("tx", |e| *e == Event::GroupTxStarted { id: "ops".into() })
        .await;
    a.expect("max tx exceeded", |e| {
        *e == Event::GroupMaxTxTimeExceeded { id: "ops".into() }
    })
    .await;
    assert!(!a.engine.group_status("ops").await.unwrap().transmitting);
}

#[tokio::test]
async fn test_mute_suppresses_media_not_floor() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &group("ops"), 2).await;

    nodes[1].engine.mute_rx("ops");
    nodes[1]
        .expect("muted", |e| *e == Event::GroupRxMuted { id: "ops".into() })
        .await;

    nodes[0].engine.begin_tx("ops", 1, 0);
    nodes[1]
        .expect("floor still tracked", |e| *e == Event::GroupRxStarted { id: "ops".into() })
        .await;
    nodes[0].engine.send_rtp(
        "ops",
        talkgroup_core::RtpHeader::default(),
        bytes::Bytes::from_static(b"media"),
    );
    nodes[1]
        .expect_none("media while muted", |e| matches!(e, Event::GroupRtpReceived { .. }))
        .await;
}
