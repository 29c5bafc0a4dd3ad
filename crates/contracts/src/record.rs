//! Record - the relayed unit
//!
//! One dnstap payload as it arrived on an input, plus the envelope decoded
//! from it when the payload is a valid dnstap protobuf.

use std::net::IpAddr;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::DnstapEnvelope;

/// Relayed telemetry record
///
/// Cloning is cheap: the payload and envelope are reference counted, so
/// every sink gets its own handle to the same immutable bytes.
#[derive(Debug, Clone)]
pub struct Record {
    /// Global arrival sequence (assigned by the inbound queue)
    pub seq: u64,

    /// Raw frame payload, relayed byte-for-byte
    pub payload: Bytes,

    /// Wall-clock arrival time
    pub received_at: DateTime<Utc>,

    /// Structured view of the payload; `None` when it does not decode
    envelope: Option<Arc<DnstapEnvelope>>,
}

impl Record {
    pub fn new(seq: u64, payload: Bytes) -> Self {
        Self::received(seq, payload, Utc::now())
    }

    /// Build a record with an explicit arrival time
    pub fn received(seq: u64, payload: Bytes, received_at: DateTime<Utc>) -> Self {
        let envelope = DnstapEnvelope::decode(&payload).ok().map(Arc::new);
        Self {
            seq,
            payload,
            received_at,
            envelope,
        }
    }

    pub fn envelope(&self) -> Option<&DnstapEnvelope> {
        self.envelope.as_deref()
    }

    /// Source address of the observed transaction
    pub fn query_address(&self) -> Option<IpAddr> {
        self.envelope().and_then(|e| e.query_address)
    }

    /// Destination address of the observed transaction
    pub fn response_address(&self) -> Option<IpAddr> {
        self.envelope().and_then(|e| e.response_address)
    }

    /// Event time, falling back to arrival time
    pub fn event_time(&self) -> DateTime<Utc> {
        self.envelope()
            .and_then(DnstapEnvelope::event_time)
            .unwrap_or(self.received_at)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
