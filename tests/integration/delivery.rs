use crate::*;
use bytes::Bytes;
use talkgroup_core::biometrics::{BiometricType, SeriesBuilder, ValueType};
use talkgroup_core::{BlobInfo, BlobPayloadType, RtpHeader};

#[tokio::test]
async fn test_blob_reaches_every_member() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &group("ops"), 3).await;

    let info = BlobInfo::new(BlobPayloadType::AppTextUtf8);
    let result = nodes[0]
        .engine
        .send_blob("ops", info, Bytes::from_static(b"status: green"));
    assert_eq!(result, EngineResult::Ok);
    nodes[0]
        .expect("blob sent", |e| *e == Event::GroupBlobSent { id: "ops".into() })
        .await;

    let sender = nodes[0].id.clone();
    for node in nodes.iter_mut().skip(1) {
        let got = node
            .expect("blob", |e| matches!(e, Event::GroupBlobReceived { .. }))
            .await;
        match got {
            Event::GroupBlobReceived { info, blob, .. } => {
                assert_eq!(blob.as_ref(), b"status: green");
                assert_eq!(info.source, sender);
                assert_eq!(info.size, 13);
                assert_eq!(info.payload_type, BlobPayloadType::AppTextUtf8);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_targeted_blob_skips_other_members() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &group("ops"), 3).await;

    let info = BlobInfo {
        target: nodes[1].id.to_uppercase(),
        ..BlobInfo::new(BlobPayloadType::AppBinary)
    };
    nodes[0]
        .engine
        .send_blob("ops", info, Bytes::from_static(&[1, 2, 3]));

    let got = nodes[1]
        .expect("targeted blob", |e| matches!(e, Event::GroupBlobReceived { .. }))
        .await;
    if let Event::GroupBlobReceived { blob, .. } = got {
        assert_eq!(blob.as_ref(), [1, 2, 3]);
    }
    nodes[2]
        .expect_none("blob for someone else", |e| {
            matches!(e, Event::GroupBlobReceived { .. })
        })
        .await;
}

#[tokio::test]
async fn test_biometrics_blob_is_decoded() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &group("ops"), 2).await;

    let mut heart = SeriesBuilder::new(BiometricType::HeartRate, ValueType::U8).with_interval(1, 5);
    heart.restart(1_700_000_000);
    assert!(heart.push(0, 72));
    assert!(heart.push(5, 75));
    let series = vec![heart.snapshot()];

    assert_eq!(
        nodes[0].engine.send_biometrics("ops", "", &series),
        EngineResult::Ok
    );

    nodes[1]
        .expect("raw blob first", |e| matches!(e, Event::GroupBlobReceived { .. }))
        .await;
    let got = nodes[1]
        .expect("biometrics", |e| matches!(e, Event::BiometricsReceived { .. }))
        .await;
    match got {
        Event::BiometricsReceived { sender, series: decoded, .. } => {
            assert_eq!(sender, nodes[0].id);
            assert_eq!(decoded, series);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_rtp_and_raw_delivery() {
    let hub = LoopbackHub::new();
    let mut nodes = joined_nodes(&hub, &group("ops"), 2).await;

    let header = RtpHeader {
        pt: 96,
        marker: true,
        seq: 7,
        ssrc: 0xfeed,
        ts: 160,
    };
    nodes[0].engine.begin_tx("ops", 1, 0);
    nodes[0]
        .engine
        .send_rtp("ops", header, Bytes::from_static(b"opus-frame"));
    let got = nodes[1]
        .expect("rtp", |e| matches!(e, Event::GroupRtpReceived { .. }))
        .await;
    match got {
        Event::GroupRtpReceived { sender, header: h, payload, .. } => {
            assert_eq!(sender, nodes[0].id);
            assert_eq!(h, header);
            assert_eq!(payload.as_ref(), b"opus-frame");
        }
        other => panic!("unexpected {other:?}"),
    }

    nodes[1].engine.send_raw("ops", Bytes::from_static(b"\x00\xff"));
    nodes[1]
        .expect("raw sent", |e| *e == Event::GroupRawSent { id: "ops".into() })
        .await;
    let got = nodes[0]
        .expect("raw", |e| matches!(e, Event::GroupRawReceived { .. }))
        .await;
    if let Event::GroupRawReceived { raw, sender, .. } = got {
        assert_eq!(raw.as_ref(), [0x00, 0xff]);
        assert_eq!(sender, nodes[1].id);
    }
}

#[tokio::test]
async fn test_send_failure_is_reported_by_event() {
    let hub = LoopbackHub::new();
    let mut a = Node::start(&hub, 1).await;
    a.join(group("ops")).await;
    hub.silence("ops");

    assert_eq!(
        a.engine.send_raw("ops", Bytes::from_static(b"x")),
        EngineResult::Ok
    );
    a.expect("raw failed", |e| *e == Event::GroupRawSendFailed { id: "ops".into() })
        .await;
    a.engine.send_blob("ops", BlobInfo::default(), Bytes::new());
    a.expect("blob failed", |e| *e == Event::GroupBlobSendFailed { id: "ops".into() })
        .await;
}
