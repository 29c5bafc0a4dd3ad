//! Relay configuration types
//!
//! Operator-facing key names (`InputMsgBuffer`, `[[OutputFluent]]`, ...) are
//! kept as-is. Zero-valued ports, buffer sizes and masks mean "use the
//! default"; the loader resolves them once after validation.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Default inbound queue capacity
pub const DEFAULT_INPUT_MSG_BUFFER: usize = 10_000;
/// Smallest accepted inbound queue capacity
pub const MIN_INPUT_MSG_BUFFER: usize = 128;
/// Shared per-sink queue capacity
pub const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 10_000;
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_TAIL_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_TCP_PORT: u16 = 10053;
pub const DEFAULT_TCP_OUTPUT_HOST: &str = "localhost";
pub const DEFAULT_FORWARD_PORT: u16 = 24224;
pub const DEFAULT_IPV4_MASK: u8 = 24;
pub const DEFAULT_IPV6_MASK: u8 = 48;

/// Forward tag grammar: dot separated lowercase labels
pub const TAG_PATTERN: &str = r"^[a-z0-9_]+(\.[a-z0-9_]+)*$";

// TAG_PATTERN is a literal, so compilation cannot fail at runtime
static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(TAG_PATTERN).expect("TAG_PATTERN is a valid regex"));

/// Whole relay configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct RelayConfig {
    /// Inbound queue capacity
    #[serde(default = "default_input_msg_buffer")]
    #[validate(range(
        min = 128,
        message = "InputMsgBuffer must not be smaller than 128"
    ))]
    pub input_msg_buffer: usize,

    /// Queue capacity for sinks that leave `BufferSize` at 0
    #[serde(default)]
    pub output_buffer_size: usize,

    /// How long the dispatcher keeps draining after a stop request
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    #[serde(default)]
    pub input_unix: Vec<InputUnixConfig>,

    #[serde(default)]
    pub input_file: Vec<InputFileConfig>,

    #[serde(default)]
    pub input_tail: Vec<InputTailConfig>,

    #[serde(default, rename = "InputTCP")]
    pub input_tcp: Vec<InputTcpConfig>,

    #[serde(default)]
    pub output_unix: Vec<OutputUnixConfig>,

    #[serde(default)]
    pub output_file: Vec<OutputFileConfig>,

    #[serde(default, rename = "OutputTCP")]
    pub output_tcp: Vec<OutputTcpConfig>,

    #[serde(default)]
    pub output_fluent: Vec<OutputFluentConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            input_msg_buffer: DEFAULT_INPUT_MSG_BUFFER,
            output_buffer_size: 0,
            drain_timeout_secs: DEFAULT_DRAIN_TIMEOUT_SECS,
            input_unix: Vec::new(),
            input_file: Vec::new(),
            input_tail: Vec::new(),
            input_tcp: Vec::new(),
            output_unix: Vec::new(),
            output_file: Vec::new(),
            output_tcp: Vec::new(),
            output_fluent: Vec::new(),
        }
    }
}

fn default_input_msg_buffer() -> usize {
    DEFAULT_INPUT_MSG_BUFFER
}

fn default_drain_timeout_secs() -> u64 {
    DEFAULT_DRAIN_TIMEOUT_SECS
}

impl RelayConfig {
    /// Every input entry in declaration order, named `Kind[index]`
    pub fn inputs(&self) -> Vec<ConfigEntry<InputConfig>> {
        let mut entries = Vec::new();
        entries.extend(named(&self.input_unix, |c| InputConfig::UnixSocket(c.clone())));
        entries.extend(named(&self.input_tcp, |c| InputConfig::TcpSocket(c.clone())));
        entries.extend(named(&self.input_file, |c| InputConfig::File(c.clone())));
        entries.extend(named(&self.input_tail, |c| InputConfig::TailedFile(c.clone())));
        entries
    }

    /// Every output entry in declaration order, named `Kind[index]`
    pub fn outputs(&self) -> Vec<ConfigEntry<OutputConfig>> {
        let mut entries = Vec::new();
        entries.extend(named(&self.output_unix, |c| OutputConfig::UnixSocket(c.clone())));
        entries.extend(named(&self.output_tcp, |c| OutputConfig::TcpSocket(c.clone())));
        entries.extend(named(&self.output_file, |c| OutputConfig::File(c.clone())));
        entries.extend(named(&self.output_fluent, |c| OutputConfig::Forward(c.clone())));
        entries
    }

    /// Effective shared sink queue capacity
    pub fn default_buffer_size(&self) -> usize {
        or_default(self.output_buffer_size, DEFAULT_OUTPUT_BUFFER_SIZE)
    }
}

fn named<C, T: ConfigKind>(items: &[C], wrap: impl Fn(&C) -> T) -> Vec<ConfigEntry<T>> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let config = wrap(item);
            ConfigEntry {
                name: format!("{}[{}]", config.kind(), index),
                config,
            }
        })
        .collect()
}

fn or_default<T: PartialEq + Default>(value: T, default: T) -> T {
    if value == T::default() {
        default
    } else {
        value
    }
}

/// Config kinds that know their operator-facing key
pub trait ConfigKind {
    fn kind(&self) -> &'static str;
}

/// A config entry with its stable display name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigEntry<T> {
    pub name: String,
    pub config: T,
}

// ===== Inputs =====

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct InputUnixConfig {
    #[validate(length(min = 1, message = "Path must not be empty"))]
    #[serde(default)]
    pub path: String,

    /// Owner of the listening socket (name or numeric uid)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct InputFileConfig {
    #[validate(length(min = 1, message = "Path must not be empty"))]
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct InputTailConfig {
    #[validate(length(min = 1, message = "Path must not be empty"))]
    #[serde(default)]
    pub path: String,

    /// Poll interval for appended data and rotation checks
    #[serde(default)]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct InputTcpConfig {
    #[validate(length(min = 1, message = "Address must not be empty"))]
    #[serde(default)]
    pub address: String,

    #[serde(default)]
    pub port: u16,
}

impl InputTcpConfig {
    /// `address:port`, bracketing IPv6 literals
    pub fn listen_addr(&self) -> String {
        let port = or_default(self.port, DEFAULT_TCP_PORT);
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, port)
        } else {
            format!("{}:{}", self.address, port)
        }
    }
}

// ===== Outputs =====

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct OutputUnixConfig {
    #[validate(length(min = 1, message = "Path must not be empty"))]
    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct OutputFileConfig {
    #[validate(length(min = 1, message = "Path must not be empty"))]
    #[serde(default)]
    pub path: String,

    /// Owner of the output file (name or numeric uid)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default)]
    pub buffer_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct OutputTcpConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub buffer_size: usize,
}

impl OutputTcpConfig {
    pub fn address(&self) -> String {
        let host = if self.host.is_empty() {
            DEFAULT_TCP_OUTPUT_HOST
        } else {
            &self.host
        };
        join_host_port(host, or_default(self.port, DEFAULT_TCP_PORT))
    }
}

/// Forward-protocol (Fluent) output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "PascalCase")]
pub struct OutputFluentConfig {
    #[validate(length(min = 1, message = "Host must not be empty"))]
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub port: u16,

    #[validate(
        length(min = 1, message = "Tag must not be empty"),
        custom(function = validate_tag)
    )]
    #[serde(default)]
    pub tag: String,

    #[validate(range(max = 32, message = "IPv4Mask must include range 0 to 32"))]
    #[serde(default, rename = "IPv4Mask")]
    pub ipv4_mask: u8,

    #[validate(range(max = 128, message = "IPv6Mask must include range 0 to 128"))]
    #[serde(default, rename = "IPv6Mask")]
    pub ipv6_mask: u8,

    #[serde(default)]
    pub buffer_size: usize,
}

impl OutputFluentConfig {
    pub fn address(&self) -> String {
        join_host_port(&self.host, or_default(self.port, DEFAULT_FORWARD_PORT))
    }

    pub fn ipv4_mask(&self) -> u8 {
        or_default(self.ipv4_mask, DEFAULT_IPV4_MASK)
    }

    pub fn ipv6_mask(&self) -> u8 {
        or_default(self.ipv6_mask, DEFAULT_IPV6_MASK)
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn tag_error(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

/// Check a forward tag against [`TAG_PATTERN`]
///
/// Empty tags are reported by the length rule.
pub fn validate_tag(tag: &str) -> Result<(), ValidationError> {
    if tag.is_empty() {
        return Ok(());
    }
    if tag.starts_with('.') {
        return Err(tag_error("tag_first_label", "First part of a tag is empty"));
    }
    if tag.ends_with('.') {
        return Err(tag_error("tag_last_label", "Last part of a tag is empty"));
    }
    if tag.split('.').any(str::is_empty) {
        return Err(tag_error("tag_empty_label", "Tag must not contain an empty part"));
    }
    if !TAG_RE.is_match(tag) {
        return Err(tag_error(
            "tag_characters",
            "Tag characters must only include lower-case alphabets, digits underscore and dot",
        ));
    }
    Ok(())
}

// ===== Closed variant sets =====

/// One configured input
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InputConfig {
    UnixSocket(InputUnixConfig),
    TcpSocket(InputTcpConfig),
    File(InputFileConfig),
    TailedFile(InputTailConfig),
}

impl ConfigKind for InputConfig {
    fn kind(&self) -> &'static str {
        match self {
            Self::UnixSocket(_) => "InputUnix",
            Self::TcpSocket(_) => "InputTCP",
            Self::File(_) => "InputFile",
            Self::TailedFile(_) => "InputTail",
        }
    }
}

impl InputConfig {
    /// Source location for logs and `info`
    pub fn source(&self) -> String {
        match self {
            Self::UnixSocket(c) => c.path.clone(),
            Self::TcpSocket(c) => c.listen_addr(),
            Self::File(c) => c.path.clone(),
            Self::TailedFile(c) => c.path.clone(),
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        match self {
            Self::UnixSocket(c) => Some(PathBuf::from(&c.path)),
            Self::File(c) => Some(PathBuf::from(&c.path)),
            Self::TailedFile(c) => Some(PathBuf::from(&c.path)),
            Self::TcpSocket(_) => None,
        }
    }
}

impl fmt::Display for InputConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.source())
    }
}

/// One configured output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutputConfig {
    UnixSocket(OutputUnixConfig),
    TcpSocket(OutputTcpConfig),
    File(OutputFileConfig),
    Forward(OutputFluentConfig),
}

impl ConfigKind for OutputConfig {
    fn kind(&self) -> &'static str {
        match self {
            Self::UnixSocket(_) => "OutputUnix",
            Self::TcpSocket(_) => "OutputTCP",
            Self::File(_) => "OutputFile",
            Self::Forward(_) => "OutputFluent",
        }
    }
}

impl OutputConfig {
    /// Destination for logs and `info`
    pub fn destination(&self) -> String {
        match self {
            Self::UnixSocket(c) => c.path.clone(),
            Self::TcpSocket(c) => c.address(),
            Self::File(c) => c.path.clone(),
            Self::Forward(c) => format!("{} tag={}", c.address(), c.tag),
        }
    }

    /// Configured queue capacity; 0 means the shared default
    pub fn buffer_size(&self) -> usize {
        match self {
            Self::UnixSocket(c) => c.buffer_size,
            Self::TcpSocket(c) => c.buffer_size,
            Self::File(c) => c.buffer_size,
            Self::Forward(c) => c.buffer_size,
        }
    }

    /// Queue capacity with `shared_default` standing in for 0
    pub fn buffer_size_or(&self, shared_default: usize) -> usize {
        or_default(self.buffer_size(), shared_default)
    }
}

impl fmt::Display for OutputConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.destination())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_keys() {
        let config: RelayConfig = toml::from_str(
            r#"
            InputMsgBuffer = 256

            [[InputUnix]]
            Path = "/var/run/dnstap.sock"
            User = "unbound"

            [[InputTCP]]
            Address = "::1"

            [[OutputFluent]]
            Host = "collector"
            Tag = "dnstap.raw"
            IPv4Mask = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.input_msg_buffer, 256);
        assert_eq!(config.drain_timeout_secs, DEFAULT_DRAIN_TIMEOUT_SECS);
        assert_eq!(config.input_unix[0].user.as_deref(), Some("unbound"));
        assert_eq!(config.input_tcp[0].listen_addr(), "[::1]:10053");
        let fluent = &config.output_fluent[0];
        assert_eq!(fluent.ipv4_mask(), 16);
        assert_eq!(fluent.ipv6_mask(), DEFAULT_IPV6_MASK);
        assert_eq!(fluent.address(), "collector:24224");
    }

    #[test]
    fn test_input_msg_buffer_default() {
        let config: RelayConfig = toml::from_str("").unwrap();
        assert_eq!(config.input_msg_buffer, DEFAULT_INPUT_MSG_BUFFER);
        assert_eq!(config.default_buffer_size(), DEFAULT_OUTPUT_BUFFER_SIZE);
    }

    #[test]
    fn test_masks_default_independently() {
        let fluent = OutputFluentConfig {
            ipv4_mask: 20,
            ..Default::default()
        };
        assert_eq!(fluent.ipv4_mask(), 20);
        assert_eq!(fluent.ipv6_mask(), 48);

        let fluent = OutputFluentConfig {
            ipv6_mask: 64,
            ..Default::default()
        };
        assert_eq!(fluent.ipv4_mask(), 24);
        assert_eq!(fluent.ipv6_mask(), 64);
    }

    #[test]
    fn test_tcp_output_defaults() {
        let tcp = OutputTcpConfig::default();
        assert_eq!(tcp.address(), "localhost:10053");
    }

    #[test]
    fn test_tag_rules() {
        assert!(validate_tag("a.b_c").is_ok());
        assert!(validate_tag("dnstap").is_ok());
        assert_eq!(validate_tag(".a.b").unwrap_err().code, "tag_first_label");
        assert_eq!(validate_tag("a.b.").unwrap_err().code, "tag_last_label");
        assert_eq!(validate_tag("a..b").unwrap_err().code, "tag_empty_label");
        assert_eq!(validate_tag("A.b").unwrap_err().code, "tag_characters");
        assert_eq!(validate_tag("a-b").unwrap_err().code, "tag_characters");
    }

    #[test]
    fn test_tag_regex_is_shared_across_threads() {
        assert_eq!(TAG_RE.as_str(), TAG_PATTERN);
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| validate_tag("dnstap.query_log").is_ok()))
            .collect();
        assert!(handles.into_iter().all(|h| h.join().unwrap()));
    }

    #[test]
    fn test_fluent_derive_rules() {
        let fluent = OutputFluentConfig {
            host: "h".into(),
            tag: String::new(),
            ipv4_mask: 33,
            ..Default::default()
        };
        let errors = fluent.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("tag"));
        assert!(fields.contains_key("ipv4_mask"));
        assert!(!fields.contains_key("host"));
    }

    #[test]
    fn test_entries_are_named_by_kind_and_index() {
        let config = RelayConfig {
            input_file: vec![
                InputFileConfig { path: "a".into() },
                InputFileConfig { path: "b".into() },
            ],
            output_tcp: vec![OutputTcpConfig::default()],
            ..Default::default()
        };

        let inputs = config.inputs();
        assert_eq!(inputs[1].name, "InputFile[1]");
        assert_eq!(inputs[1].config.source(), "b");

        let outputs = config.outputs();
        assert_eq!(outputs[0].name, "OutputTCP[0]");
        assert_eq!(outputs[0].config.buffer_size_or(42), 42);
    }
}
