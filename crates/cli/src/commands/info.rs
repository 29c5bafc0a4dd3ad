//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{ConfigKind, InputConfig, OutputConfig, RelayConfig};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Resolved configuration for JSON output
#[derive(Debug, Serialize)]
struct ConfigInfo {
    input_msg_buffer: usize,
    output_buffer_size: usize,
    drain_timeout_secs: u64,
    inputs: Vec<InputInfo>,
    outputs: Vec<OutputInfo>,
}

#[derive(Debug, Serialize)]
struct InputInfo {
    name: String,
    kind: &'static str,
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

#[derive(Debug, Serialize)]
struct OutputInfo {
    name: String,
    kind: &'static str,
    destination: String,
    buffer_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    masks: Option<MaskInfo>,
}

#[derive(Debug, Serialize)]
struct MaskInfo {
    ipv4: u8,
    ipv6: u8,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let info = build_config_info(&config);

    if args.json {
        let json = serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{json}");
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn build_config_info(config: &RelayConfig) -> ConfigInfo {
    let shared = config.default_buffer_size();

    let inputs = config
        .inputs()
        .into_iter()
        .map(|entry| InputInfo {
            kind: entry.config.kind(),
            source: entry.config.source(),
            user: match &entry.config {
                InputConfig::UnixSocket(c) => c.user.clone(),
                _ => None,
            },
            name: entry.name,
        })
        .collect();

    let outputs = config
        .outputs()
        .into_iter()
        .map(|entry| OutputInfo {
            kind: entry.config.kind(),
            destination: entry.config.destination(),
            buffer_size: entry.config.buffer_size_or(shared),
            masks: match &entry.config {
                OutputConfig::Forward(c) => Some(MaskInfo {
                    ipv4: c.ipv4_mask(),
                    ipv6: c.ipv6_mask(),
                }),
                _ => None,
            },
            name: entry.name,
        })
        .collect();

    ConfigInfo {
        input_msg_buffer: config.input_msg_buffer,
        output_buffer_size: shared,
        drain_timeout_secs: config.drain_timeout_secs,
        inputs,
        outputs,
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("\n=== Relay Configuration ===\n");
    println!("InputMsgBuffer: {}", info.input_msg_buffer);
    println!("OutputBufferSize: {}", info.output_buffer_size);
    println!("DrainTimeoutSecs: {}", info.drain_timeout_secs);

    println!("\nInputs ({}):", info.inputs.len());
    for input in &info.inputs {
        match &input.user {
            Some(user) => println!("  - {} {} (user {})", input.name, input.source, user),
            None => println!("  - {} {}", input.name, input.source),
        }
    }

    println!("\nOutputs ({}):", info.outputs.len());
    for output in &info.outputs {
        print!(
            "  - {} {} buffer={}",
            output.name, output.destination, output.buffer_size
        );
        if let Some(ref masks) = output.masks {
            print!(" mask=/{} /{}", masks.ipv4, masks.ipv6);
        }
        println!();
    }

    println!();
}
