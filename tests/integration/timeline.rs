use crate::*;
use bytes::Bytes;
use talkgroup_core::group::Direction;
use talkgroup_core::{RtpHeader, TimelineQuery};

async fn talk(nodes: &mut [Node], media: &'static [u8]) {
    nodes[0].engine.begin_tx("ops", 1, 0);
    nodes[0]
        .expect("tx", |e| *e == Event::GroupTxStarted { id: "ops".into() })
        .await;
    nodes[0]
        .engine
        .send_rtp("ops", RtpHeader::default(), Bytes::from_static(media));
    nodes[1]
        .expect("media", |e| matches!(e, Event::GroupRtpReceived { .. }))
        .await;
    nodes[0].engine.end_tx("ops");
    nodes[1]
        .expect("rx ended", |e| *e == Event::GroupRxEnded { id: "ops".into() })
        .await;
}

fn report(event: Event) -> talkgroup_core::group::TimelineReport {
    match event {
        Event::GroupTimelineReport { report, .. } => report,
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_spurts_are_recorded_both_ways() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &group("ops"), 2).await;
    talk(&mut nodes, b"0123456789").await;

    for (node, direction) in [(0, Direction::Outbound), (1, Direction::Inbound)] {
        let query = TimelineQuery {
            only_direction: Some(direction),
            ..TimelineQuery::default()
        };
        assert_eq!(nodes[node].engine.query_timeline("ops", query), EngineResult::Ok);
        let got = nodes[node]
            .expect("report", |e| matches!(e, Event::GroupTimelineReport { .. }))
            .await;
        let report = report(got);
        assert_eq!(report.group_id, "ops");
        assert_eq!(report.total_matched, 1);
        assert_eq!(report.events[0].direction, direction);
        assert_eq!(report.events[0].node_id, nodes[0].id);
        assert_eq!(report.events[0].attachment_bytes, 10);
        assert!(!report.events[0].in_progress());
    }
}

#[tokio::test]
async fn test_query_filters_and_limits() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &group("ops"), 2).await;
    talk(&mut nodes, b"first").await;
    talk(&mut nodes, b"second").await;

    let query = TimelineQuery {
        max_count: 1,
        most_recent_first: true,
        ..TimelineQuery::default()
    };
    nodes[1].engine.query_timeline("ops", query);
    let got = report(
        nodes[1]
            .expect("report", |e| matches!(e, Event::GroupTimelineReport { .. }))
            .await,
    );
    assert_eq!(got.total_matched, 2);
    assert_eq!(got.events.len(), 1);
    assert_eq!(got.events[0].attachment_bytes, 6);

    let query = TimelineQuery {
        only_node_id: Some("ffffffffffffffff".into()),
        ..TimelineQuery::default()
    };
    nodes[1].engine.query_timeline("ops", query);
    let got = report(
        nodes[1]
            .expect("empty report", |e| matches!(e, Event::GroupTimelineReport { .. }))
            .await,
    );
    assert_eq!(got.total_matched, 0);
    assert!(got.events.is_empty());
}

#[tokio::test]
async fn test_query_on_unknown_group_fails_by_event() {
    let hub = LoopbackHub::new();
    let mut a = Node::start(&hub, 1).await;
    assert_eq!(
        a.engine.query_timeline("nope", TimelineQuery::default()),
        EngineResult::Ok
    );
    a.expect("report failed", |e| {
        *e == Event::GroupTimelineReportFailed { id: "nope".into() }
    })
    .await;
}
