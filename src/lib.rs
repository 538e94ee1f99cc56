//! Kameo-based websocket debugging console.
//!
//! One upstream connection is owned by the [`ws::ConnectionManager`] actor,
//! which handles reconnect backoff, keep-alive probing and the inactivity
//! watchdog. The [`session::SessionCoordinator`] journals its events and
//! exposes the operator operations that [`http`] serves.

pub mod codec;
pub mod core;
pub mod http;
pub mod journal;
pub mod session;
pub mod testing;
pub mod transport;
pub mod ws;

pub use codec::{Codec, CodecError, MessageFormat, MessageValue, WirePayload};
pub use journal::{EntryKind, Journal, JournalEntry, JournalQuery};
pub use session::{Outcome, SessionArgs, SessionCoordinator};
pub use ws::{ConnectionManager, ConnectionManagerArgs};
