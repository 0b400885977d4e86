//! talkgroup-core — shared types, wire format, biometrics codec, and crypto.
//! All other talkgroup crates depend on this one.

pub mod biometrics;
pub mod config;
pub mod crypto;
pub mod event;
pub mod group;
pub mod result;
pub mod wire;

pub use event::{Event, Topic};
pub use group::{BlobInfo, BlobPayloadType, GroupConfig, RtpHeader, TimelineQuery, TxParams};
pub use result::{EngineResult, LicensingStatus};
