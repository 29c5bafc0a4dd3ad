//! ForwardSink - Fluent forward protocol output
//!
//! Every record becomes one MessagePack event `[tag, time, fields]` written
//! over a persistent TCP connection. Query and response addresses are
//! prefix-masked before they leave the process.

use chrono::{DateTime, SecondsFormat, Utc};
use contracts::{validate_tag, AddressMasker, ContractError, DataSink, OutputFluentConfig, Record};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::DispatcherError;
use crate::link::{Endpoint, Link};

/// `[tag, time, fields]`
#[derive(Debug, Serialize)]
struct Event<'a>(&'a str, i64, EventFields<'a>);

#[derive(Debug, Default, Serialize)]
struct EventFields<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    identity: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    message_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    socket_family: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    socket_protocol: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_time: Option<String>,
    #[serde(with = "serde_bytes", skip_serializing_if = "Option::is_none")]
    query_message: Option<&'a [u8]>,
    #[serde(with = "serde_bytes", skip_serializing_if = "Option::is_none")]
    response_message: Option<&'a [u8]>,
    /// Raw payload, only for records that are not dnstap
    #[serde(with = "serde_bytes", skip_serializing_if = "Option::is_none")]
    payload: Option<&'a [u8]>,
    received_at: String,
}

fn rfc3339(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub struct ForwardSink {
    name: String,
    tag: String,
    masker: AddressMasker,
    link: Link,
    buf: Vec<u8>,
}

impl ForwardSink {
    pub fn new(name: &str, config: &OutputFluentConfig) -> Result<Self, DispatcherError> {
        validate_tag(&config.tag)
            .map_err(|e| DispatcherError::sink_creation(name, format!("invalid tag: {e}")))?;
        let masker = AddressMasker::new(config.ipv4_mask(), config.ipv6_mask())
            .map_err(|e| DispatcherError::sink_creation(name, e.to_string()))?;
        let endpoint = Endpoint::Tcp(config.address());
        debug!(sink = %name, endpoint = %endpoint, tag = %config.tag, "forward sink created");

        Ok(Self {
            name: name.to_string(),
            tag: config.tag.clone(),
            masker,
            link: Link::new(name, endpoint),
            buf: Vec::new(),
        })
    }

    pub fn masker(&self) -> &AddressMasker {
        &self.masker
    }

    /// Serialize one record as a forward event
    pub fn encode_event(&self, record: &Record) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        let mut fields = EventFields {
            received_at: rfc3339(record.received_at),
            ..Default::default()
        };

        match record.envelope() {
            Some(envelope) => {
                fields.identity = envelope.identity.as_deref();
                fields.version = envelope.version.as_deref();
                fields.message_type = envelope.message_type.map(|t| t.name());
                fields.socket_family = envelope.socket_family.map(|f| f.name());
                fields.socket_protocol = envelope.socket_protocol.map(|p| p.name());
                fields.query_address = self.masker.mask(envelope.query_address).map(|ip| ip.to_string());
                fields.response_address = self
                    .masker
                    .mask(envelope.response_address)
                    .map(|ip| ip.to_string());
                fields.query_port = envelope.query_port;
                fields.response_port = envelope.response_port;
                fields.query_time = envelope.query_time.map(rfc3339);
                fields.response_time = envelope.response_time.map(rfc3339);
                fields.query_message = envelope.query_message.as_deref();
                fields.response_message = envelope.response_message.as_deref();
            }
            None => fields.payload = Some(record.payload.as_ref()),
        }

        let event = Event(&self.tag, record.event_time().timestamp(), fields);
        rmp_serde::to_vec_named(&event)
    }
}

impl DataSink for ForwardSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&mut self, record: &Record) -> Result<(), ContractError> {
        self.buf = self
            .encode_event(record)
            .map_err(|e| ContractError::sink_write(&self.name, e.to_string()))?;
        self.link.send(&self.buf).await;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        self.link.flush().await;
        Ok(())
    }

    #[instrument(name = "forward_sink_close", skip(self), fields(sink = %self.name))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.link.close(None).await;
        Ok(())
    }
}
