//! Notification relay core
//!
//! A single [`TransportSession`] carries notifications to the desktop peer and
//! replies back. Events seen before the peer connects wait in the
//! [`PendingQueue`]; unchanged re-posts are filtered by the [`DedupTracker`];
//! replies reach the notifying app through the [`ReplyRouter`]. The
//! [`RelayManager`] ties them together and is shared by every producer.

pub mod codec;
pub mod dedup;
pub mod error;
pub mod event;
pub mod manager;
pub mod queue;
pub mod reply;
pub mod session;

pub use codec::{DecodeOutcome, FrameDecoder, NotificationCodec, WireFraming, WireNotification};
pub use dedup::DedupTracker;
pub use error::{RelayError, Result};
pub use event::{NotificationEvent, ReplyMessage};
pub use manager::{PermissionGate, RelayManager, StaticGate};
pub use queue::{EventSink, PendingQueue};
pub use reply::{HandlePolicy, HandleResolver, ReplyHandle, ReplyRouter, ReplySink, RouteOutcome};
pub use session::{ActivateOutcome, SendOutcome, SessionState, TransportSession};
