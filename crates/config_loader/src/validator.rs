//! Config validation
//!
//! Every entry is checked and every failure is kept; nothing short-circuits.
//! Failures are reported as `Kind[index]: message`.
//!
//! Rules:
//! - `InputMsgBuffer` >= 128
//! - every path / forward host non-empty, TCP input address non-empty
//! - forward tag non-empty and dotted lowercase labels
//! - IPv4Mask <= 32, IPv6Mask <= 128

use contracts::{ContractError, EntryError, RelayConfig, ValidationFailures};
use validator::{Validate, ValidationErrors};

/// Validate the whole document, aggregating every failure
pub fn validate(config: &RelayConfig) -> Result<(), ContractError> {
    collect_failures(config).into_result()
}

/// All validation failures of `config`, in document order
pub fn collect_failures(config: &RelayConfig) -> ValidationFailures {
    let mut failures = ValidationFailures::new();

    if let Err(errors) = config.validate() {
        failures.push(EntryError {
            kind: "InputMsgBuffer".into(),
            index: None,
            messages: messages(&errors),
        });
    }

    check_entries(&mut failures, "InputUnix", &config.input_unix);
    check_entries(&mut failures, "InputFile", &config.input_file);
    check_entries(&mut failures, "InputTail", &config.input_tail);
    check_entries(&mut failures, "InputTCP", &config.input_tcp);
    check_entries(&mut failures, "OutputUnix", &config.output_unix);
    check_entries(&mut failures, "OutputFile", &config.output_file);
    check_entries(&mut failures, "OutputTCP", &config.output_tcp);
    check_entries(&mut failures, "OutputFluent", &config.output_fluent);

    failures
}

fn check_entries<T: Validate>(failures: &mut ValidationFailures, kind: &str, entries: &[T]) {
    for (index, entry) in entries.iter().enumerate() {
        if let Err(errors) = entry.validate() {
            failures.push(EntryError {
                kind: kind.to_string(),
                index: Some(index),
                messages: messages(&errors),
            });
        }
    }
}

/// Flatten field errors into messages, ordered by field name
fn messages(errors: &ValidationErrors) -> Vec<String> {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(message) => message.to_string(),
                None => format!("{field}: {}", e.code),
            })
        })
        .collect()
}
