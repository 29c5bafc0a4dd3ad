//! Default resolution
//!
//! Runs once after validation. Every zero-valued port, buffer size, mask and
//! poll interval is replaced by its default so runtime code reads concrete
//! values only.

use contracts::{
    RelayConfig, DEFAULT_FORWARD_PORT, DEFAULT_IPV4_MASK, DEFAULT_IPV6_MASK,
    DEFAULT_OUTPUT_BUFFER_SIZE, DEFAULT_TAIL_POLL_INTERVAL_MS, DEFAULT_TCP_OUTPUT_HOST,
    DEFAULT_TCP_PORT,
};

pub fn resolve(mut config: RelayConfig) -> RelayConfig {
    fill(&mut config.output_buffer_size, DEFAULT_OUTPUT_BUFFER_SIZE);
    let shared = config.output_buffer_size;

    for input in &mut config.input_unix {
        clear_blank(&mut input.user);
    }
    for input in &mut config.input_tail {
        fill(&mut input.poll_interval_ms, DEFAULT_TAIL_POLL_INTERVAL_MS);
    }
    for input in &mut config.input_tcp {
        fill(&mut input.port, DEFAULT_TCP_PORT);
    }

    for output in &mut config.output_unix {
        fill(&mut output.buffer_size, shared);
    }
    for output in &mut config.output_file {
        fill(&mut output.buffer_size, shared);
        clear_blank(&mut output.user);
    }
    for output in &mut config.output_tcp {
        if output.host.is_empty() {
            output.host = DEFAULT_TCP_OUTPUT_HOST.to_string();
        }
        fill(&mut output.port, DEFAULT_TCP_PORT);
        fill(&mut output.buffer_size, shared);
    }
    for output in &mut config.output_fluent {
        fill(&mut output.port, DEFAULT_FORWARD_PORT);
        fill(&mut output.ipv4_mask, DEFAULT_IPV4_MASK);
        fill(&mut output.ipv6_mask, DEFAULT_IPV6_MASK);
        fill(&mut output.buffer_size, shared);
    }

    config
}

fn fill<T: PartialEq + Default>(value: &mut T, default: T) {
    if *value == T::default() {
        *value = default;
    }
}

fn clear_blank(user: &mut Option<String>) {
    if user.as_deref().is_some_and(|u| u.trim().is_empty()) {
        *user = None;
    }
}
