//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{ConfigKind, RelayConfig};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::cli::ValidateArgs;
use crate::error::CliError;

/// Validation result for JSON output
#[derive(Debug, Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Debug, Serialize)]
struct ConfigSummary {
    input_msg_buffer: usize,
    input_count: usize,
    output_count: usize,
    forward_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(&args.config);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{json}");
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        Err(CliError::config_validation(result.errors.join("\n")).into())
    }
}

fn validate_config(path: &Path) -> ValidationResult {
    let config_path = path.display().to_string();

    if !path.exists() {
        return invalid(config_path, format!("File not found: {}", path.display()));
    }

    let config = match config_loader::ConfigLoader::parse_path(path) {
        Ok(config) => config,
        Err(e) => return invalid(config_path, e.to_string()),
    };

    let failures = config_loader::collect_failures(&config);
    if !failures.is_empty() {
        return ValidationResult {
            valid: false,
            config_path,
            errors: failures.lines(),
            warnings: Vec::new(),
            summary: None,
        };
    }

    let config = config_loader::resolve(config);
    ValidationResult {
        valid: true,
        config_path,
        errors: Vec::new(),
        warnings: collect_warnings(&config),
        summary: Some(ConfigSummary {
            input_msg_buffer: config.input_msg_buffer,
            input_count: config.inputs().len(),
            output_count: config.outputs().len(),
            forward_count: config.output_fluent.len(),
        }),
    }
}

fn invalid(config_path: String, error: String) -> ValidationResult {
    ValidationResult {
        valid: false,
        config_path,
        errors: vec![error],
        warnings: Vec::new(),
        summary: None,
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &RelayConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let inputs = config.inputs();

    if inputs.is_empty() {
        warnings.push("No inputs configured - the relay will stop immediately".to_string());
    }
    if config.outputs().is_empty() {
        warnings.push("No outputs configured - every record will be discarded".to_string());
    }

    // an output file that is also an input would feed the relay its own output
    for (index, output) in config.output_file.iter().enumerate() {
        for input in &inputs {
            if input.config.path().is_some_and(|p| p == Path::new(&output.path)) {
                warnings.push(format!(
                    "OutputFile[{index}] writes to {} which {} reads",
                    output.path, input.name
                ));
            }
        }
    }

    for entry in config.outputs() {
        if entry.config.buffer_size() != 0 && entry.config.buffer_size() < 16 {
            warnings.push(format!(
                "{} ({}) has a very small BufferSize and will drop under load",
                entry.name,
                entry.config.kind()
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  InputMsgBuffer: {}", summary.input_msg_buffer);
            println!("  Inputs: {}", summary.input_count);
            println!("  Outputs: {}", summary.output_count);
            println!("  Forward outputs: {}", summary.forward_count);
        }

        if !result.warnings.is_empty() {
            println!("\n⚠ Warnings:");
            for warning in &result.warnings {
                println!("  - {warning}");
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        for error in &result.errors {
            println!("  {error}");
        }
    }
}
