//! Delivery channels — blob, RTP and raw payloads in and out of a group.
//!
//! Inbound frames are routed here first: sealed payloads are opened, then the
//! frame kind picks the handler. Blobs whose payload type is biometrics are
//! decoded and posted a second time as `BiometricsReceived`.

use bytes::Bytes;

use talkgroup_core::biometrics;
use talkgroup_core::group::{BlobInfo, BlobPayloadType, Direction, RtpHeader};
use talkgroup_core::wire::{self, Frame, FrameKind};
use talkgroup_core::Event;

use crate::arbitration::Talker;
use crate::session::{spurt, Ctx, GroupSession};

impl GroupSession {
    pub fn send_blob(&mut self, ctx: &Ctx, mut info: BlobInfo, blob: Bytes, out: &mut Vec<Event>) {
        let id = self.config.id.clone();
        if !self.is_joined() {
            out.push(Event::GroupBlobSendFailed { id });
            return;
        }
        info.size = blob.len();
        info.source = ctx.local.hex_id();

        let result = wire::encode_blob(&info, &blob)
            .map_err(Into::into)
            .and_then(|payload| self.send(ctx, FrameKind::Blob, payload, 0));
        match result {
            Ok(()) => {
                tracing::debug!(group = %id, bytes = blob.len(), payload_type = ?info.payload_type, "blob sent");
                out.push(Event::GroupBlobSent { id });
            }
            Err(e) => {
                tracing::warn!(group = %id, error = %e, "blob send failed");
                out.push(Event::GroupBlobSendFailed { id });
            }
        }
    }

    pub fn send_rtp(&mut self, ctx: &Ctx, header: &RtpHeader, media: &[u8], out: &mut Vec<Event>) {
        let id = self.config.id.clone();
        if !self.is_joined() {
            out.push(Event::GroupRtpSendFailed { id });
            return;
        }
        let payload = wire::encode_rtp(header, media);
        match self.send(ctx, FrameKind::Rtp, payload, 0) {
            Ok(()) => {
                out.push(Event::GroupRtpSent { id });
                // Media counts against the first local spurt.
                let key = self
                    .floor
                    .local_claims()
                    .next()
                    .map(|c| spurt(&c.talker, Direction::Outbound));
                if let Some(key) = key {
                    self.timeline_record(ctx, &key, media.len(), out);
                }
            }
            Err(e) => {
                tracing::warn!(group = %id, error = %e, "rtp send failed");
                out.push(Event::GroupRtpSendFailed { id });
            }
        }
    }

    pub fn send_raw(&mut self, ctx: &Ctx, raw: &[u8], out: &mut Vec<Event>) {
        let id = self.config.id.clone();
        if !self.is_joined() {
            out.push(Event::GroupRawSendFailed { id });
            return;
        }
        match self.send(ctx, FrameKind::Raw, raw.to_vec(), 0) {
            Ok(()) => out.push(Event::GroupRawSent { id }),
            Err(e) => {
                tracing::warn!(group = %id, error = %e, "raw send failed");
                out.push(Event::GroupRawSendFailed { id });
            }
        }
    }

    /// Handle one frame received on this group's link.
    pub fn on_frame(&mut self, ctx: &Ctx, mut frame: Frame, out: &mut Vec<Event>) {
        if frame.sender == ctx.local.node_id {
            return;
        }
        if frame.group_hash != self.hash {
            tracing::warn!(group = %self.config.id, "frame for another group dropped");
            return;
        }
        if !self.is_joined() {
            tracing::trace!(group = %self.config.id, "frame dropped: not joined");
            return;
        }

        match (&self.cipher, frame.is_sealed()) {
            (Some(cipher), true) => {
                if let Err(e) = cipher.open(&mut frame) {
                    tracing::warn!(
                        group = %self.config.id,
                        sender = hex::encode(frame.sender),
                        error = %e,
                        "sealed frame failed to open"
                    );
                    return;
                }
            }
            (Some(_), false) => {
                tracing::warn!(group = %self.config.id, "plaintext frame on encrypted group dropped");
                return;
            }
            (None, true) => {
                tracing::warn!(group = %self.config.id, "sealed frame on plaintext group dropped");
                return;
            }
            (None, false) => {}
        }

        self.presence.touch(&frame.sender, ctx.now);

        let kind = frame.kind;
        match kind {
            FrameKind::Presence => self.on_presence(ctx, frame.sender, &frame.payload, out),
            FrameKind::Depart => self.on_depart(ctx, frame.sender, out),
            FrameKind::FloorClaim | FrameKind::FloorRelease => {
                self.on_floor(ctx, kind, frame.sender, frame.priority, &frame.payload, out)
            }
            FrameKind::Blob => self.on_blob(ctx, frame, out),
            FrameKind::Rtp => self.on_rtp(ctx, frame, out),
            FrameKind::Raw => out.push(Event::GroupRawReceived {
                id: self.config.id.clone(),
                sender: hex::encode(frame.sender),
                raw: Bytes::from(frame.payload),
            }),
            FrameKind::Ping | FrameKind::Pong => {
                tracing::trace!(group = %self.config.id, "keepalive frame ignored");
            }
        }
    }

    fn on_blob(&mut self, ctx: &Ctx, frame: Frame, out: &mut Vec<Event>) {
        let id = self.config.id.clone();
        let (mut info, blob) = match wire::decode_blob(&frame.payload) {
            Ok((info, blob)) => (info, Bytes::copy_from_slice(blob)),
            Err(e) => {
                tracing::warn!(group = %id, error = %e, "bad blob frame");
                return;
            }
        };
        if !info.target.is_empty() && !info.target.eq_ignore_ascii_case(&ctx.local.hex_id()) {
            tracing::trace!(group = %id, target = %info.target, "blob for another node");
            return;
        }
        let sender = hex::encode(frame.sender);
        info.source = sender.clone();
        info.size = blob.len();

        out.push(Event::GroupBlobReceived {
            id: id.clone(),
            info: info.clone(),
            blob: blob.clone(),
        });

        if info.payload_type == BlobPayloadType::Biometrics {
            match biometrics::decode(&blob) {
                Ok(series) => out.push(Event::BiometricsReceived { id, sender, series }),
                Err(e) => {
                    tracing::warn!(group = %id, sender = %sender, error = %e, "biometrics blob failed to decode");
                }
            }
        }
    }

    fn on_rtp(&mut self, ctx: &Ctx, frame: Frame, out: &mut Vec<Event>) {
        let id = self.config.id.clone();
        let (header, media) = match wire::decode_rtp(&frame.payload) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(group = %id, error = %e, "bad rtp frame");
                return;
            }
        };

        let talker: Option<Talker> = self
            .floor
            .remote_claim_of(&frame.sender)
            .map(|c| c.talker.clone());
        if let Some(talker) = &talker {
            self.floor.refresh(talker, ctx.now);
            self.timeline_record(ctx, &spurt(talker, Direction::Inbound), media.len(), out);
        }

        if self.rx_muted {
            tracing::trace!(group = %id, "rtp dropped: rx muted");
            return;
        }
        out.push(Event::GroupRtpReceived {
            id,
            sender: hex::encode(frame.sender),
            header,
            payload: Bytes::copy_from_slice(media),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{config, Member};
    use crate::transport::LoopbackHub;
    use talkgroup_core::biometrics::{BiometricType, Sample, Series, ValueType};
    use talkgroup_core::group::{GroupConfig, TxParams};
    use tokio::time::Instant;

    fn joined_pair(a_cfg: GroupConfig, b_cfg: GroupConfig) -> (Member, Member) {
        let hub = LoopbackHub::new();
        let mut a = Member::new(&hub, a_cfg, 1);
        let mut b = Member::new(&hub, b_cfg, 2);
        a.join();
        b.join();
        a.pump();
        b.pump();
        (a, b)
    }

    fn send_blob(m: &mut Member, info: BlobInfo, blob: &[u8]) -> Vec<Event> {
        let mut out = Vec::new();
        let blob = Bytes::copy_from_slice(blob);
        m.with(Instant::now(), |s, ctx| s.send_blob(ctx, info, blob, &mut out));
        out
    }

    #[test]
    fn blob_round_trip() {
        let (mut a, mut b) = joined_pair(config("g"), config("g"));
        let out = send_blob(&mut a, BlobInfo::new(BlobPayloadType::AppTextUtf8), b"hello");
        assert_eq!(out, vec![Event::GroupBlobSent { id: "g".into() }]);

        let got = b.pump();
        assert_eq!(got.len(), 1);
        match &got[0] {
            Event::GroupBlobReceived { info, blob, .. } => {
                assert_eq!(blob.as_ref(), b"hello");
                assert_eq!(info.size, 5);
                assert_eq!(info.source, hex::encode([1u8; 8]));
                assert_eq!(info.payload_type, BlobPayloadType::AppTextUtf8);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn targeted_blob_reaches_only_its_target() {
        let hub = LoopbackHub::new();
        let mut a = Member::new(&hub, config("g"), 1);
        let mut b = Member::new(&hub, config("g"), 2);
        let mut c = Member::new(&hub, config("g"), 3);
        a.join();
        b.join();
        c.join();
        b.pump();
        c.pump();

        let info = BlobInfo {
            target: hex::encode([3u8; 8]),
            ..BlobInfo::new(BlobPayloadType::AppBinary)
        };
        send_blob(&mut a, info, &[9, 9]);
        assert!(b.pump().is_empty());
        assert_eq!(c.pump().len(), 1);
    }

    #[test]
    fn biometrics_blob_is_decoded() {
        let (mut a, mut b) = joined_pair(config("g"), config("g"));
        let series = Series {
            kind: BiometricType::HeartRate,
            timestamp: 1,
            interval_type: 0,
            interval_multiplier: 1,
            value_type: ValueType::U8,
            samples: vec![Sample { offset: 0, value: 72 }],
        };
        let blob = biometrics::encode(std::slice::from_ref(&series)).unwrap();
        send_blob(&mut a, BlobInfo::new(BlobPayloadType::Biometrics), &blob);

        let got = b.pump();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].name(), "group_blob_received");
        match &got[1] {
            Event::BiometricsReceived { series: decoded, sender, .. } => {
                assert_eq!(decoded, &vec![series]);
                assert_eq!(sender, &hex::encode([1u8; 8]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn corrupt_biometrics_blob_still_delivers_blob() {
        let (mut a, mut b) = joined_pair(config("g"), config("g"));
        // Header claims one u8 sample but the element is missing.
        let corrupt = [0x01, 0, 0, 0, 1, 0, 1, 1, 1];
        send_blob(&mut a, BlobInfo::new(BlobPayloadType::Biometrics), &corrupt);
        let got = b.pump();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name(), "group_blob_received");
    }

    #[test]
    fn send_requires_join() {
        let hub = LoopbackHub::new();
        let mut a = Member::new(&hub, config("g"), 1);
        let out = send_blob(&mut a, BlobInfo::default(), b"x");
        assert_eq!(out, vec![Event::GroupBlobSendFailed { id: "g".into() }]);

        let mut out = Vec::new();
        a.with(Instant::now(), |s, ctx| {
            s.send_raw(ctx, b"x", &mut out);
            s.send_rtp(ctx, &RtpHeader::default(), b"x", &mut out);
        });
        assert_eq!(
            out,
            vec![
                Event::GroupRawSendFailed { id: "g".into() },
                Event::GroupRtpSendFailed { id: "g".into() },
            ]
        );
    }

    #[test]
    fn rtp_dropped_while_muted() {
        let (mut a, mut b) = joined_pair(config("g"), config("g"));
        let header = RtpHeader { pt: 96, marker: true, seq: 7, ssrc: 42, ts: 160 };

        let mut out = Vec::new();
        a.with(Instant::now(), |s, ctx| s.send_rtp(ctx, &header, b"media", &mut out));
        assert_eq!(out, vec![Event::GroupRtpSent { id: "g".into() }]);
        match &b.pump()[..] {
            [Event::GroupRtpReceived { header: h, payload, .. }] => {
                assert_eq!(h, &header);
                assert_eq!(payload.as_ref(), b"media");
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut muted = Vec::new();
        b.session.mute_rx(&mut muted);
        let mut out = Vec::new();
        a.with(Instant::now(), |s, ctx| s.send_rtp(ctx, &header, b"media", &mut out));
        assert!(b.pump().is_empty());
    }

    #[test]
    fn raw_round_trip_and_outbound_timeline() {
        let (mut a, mut b) = joined_pair(config("g"), config("g"));
        let mut out = Vec::new();
        a.with(Instant::now(), |s, ctx| {
            s.begin_tx(ctx, &TxParams::default(), &mut out);
            s.send_raw(ctx, &[1, 2, 3], &mut out);
            s.send_rtp(ctx, &RtpHeader::default(), &[0u8; 40], &mut out);
        });
        assert!(out.contains(&Event::GroupRawSent { id: "g".into() }));

        let got = b.pump();
        assert!(got.iter().any(|e| matches!(
            e,
            Event::GroupRawReceived { raw, .. } if raw.as_ref() == [1, 2, 3]
        )));

        let mut out = Vec::new();
        a.with(Instant::now(), |s, ctx| s.end_tx(ctx, &mut out));
        let ended = out.iter().find_map(|e| match e {
            Event::GroupTimelineEventEnded { timeline_event, .. } => Some(timeline_event.clone()),
            _ => None,
        });
        assert_eq!(ended.map(|e| e.attachment_bytes), Some(40));
    }

    #[test]
    fn encrypted_group_round_trip_and_wrong_password() {
        let secure = |pw: &str| GroupConfig {
            crypto_password: pw.into(),
            ..config("g")
        };

        let (mut a, mut b) = joined_pair(secure("pw"), secure("pw"));
        assert_eq!(a.session.status().members, 2);
        let mut out = Vec::new();
        a.with(Instant::now(), |s, ctx| s.send_raw(ctx, b"secret", &mut out));
        assert!(matches!(&b.pump()[..], [Event::GroupRawReceived { .. }]));

        let (mut c, mut d) = joined_pair(secure("pw"), secure("other"));
        // Neither side could read the other's presence.
        assert_eq!(c.session.status().members, 1);
        let mut out = Vec::new();
        c.with(Instant::now(), |s, ctx| s.send_raw(ctx, b"secret", &mut out));
        assert!(d.pump().is_empty());
    }

    #[test]
    fn plaintext_frames_dropped_on_encrypted_group() {
        let secure = GroupConfig {
            crypto_password: "pw".into(),
            ..config("g")
        };
        let (mut a, mut b) = joined_pair(config("g"), secure);
        let mut out = Vec::new();
        a.with(Instant::now(), |s, ctx| s.send_raw(ctx, b"clear", &mut out));
        assert!(b.pump().is_empty());
    }
}
