//! talkgroup-engine — group sessions, transmit arbitration, discovery,
//! timelines and the event bus, driven through a pluggable [`Transport`].

pub mod arbitration;
pub mod bus;
pub mod delivery;
pub mod discovery;
pub mod engine;
pub mod license;
pub mod session;
pub mod timeline;
pub mod transport;

pub use bus::{EventBus, Handler, SubscriptionHandle, TopicFilter};
pub use engine::Engine;
pub use license::{License, LicenseMonitor};
pub use session::{GroupState, GroupStatus};
pub use transport::{
    LoopbackHub, LoopbackTransport, RallypointStatus, Transport, TransportError, TransportEvent,
    TransportSink,
};
