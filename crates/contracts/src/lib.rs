//! # Contracts
//!
//! Frozen interface contracts shared by every relay crate: the relayed
//! `Record`, the inbound queue handle, the Frame Streams codec, the dnstap
//! envelope view, address masking, configuration types and the `DataSink`
//! trait. Business crates depend on this crate only, never on each other's
//! internals.
//!
//! ## Time Model
//! - `Record::received_at` is wall-clock arrival time (UTC)
//! - `Record::seq` is the global arrival sequence assigned by the inbound queue

mod config;
mod dnstap;
mod error;
mod frame_stream;
mod net;
mod ownership;
mod queue;
mod record;
mod sink;

pub use config::*;
pub use dnstap::{Dnstap, DnstapEnvelope, DnstapType, Message, MessageType, SocketFamily, SocketProtocol};
pub use error::*;
pub use frame_stream::{
    ControlFrame, ControlKind, Frame, FrameError, FrameStreamCodec, DNSTAP_CONTENT_TYPE,
    MAX_CONTROL_FRAME_LEN, MAX_DATA_FRAME_LEN,
};
pub use net::{mask_addr, AddressMasker, Net, NetError};
pub use ownership::{chown_to_user, lookup_user};
pub use queue::{inbound_queue, QueueClosed, RecordReceiver, RecordSender};
pub use record::Record;
pub use sink::*;
