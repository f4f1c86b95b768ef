//! Parse command implementation.

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;
use icr_core::{parse_label, ExtractedFields, PsaLabelParser};
use tracing::debug;

use crate::utils::read_text;
use crate::OutputFormat;

/// Execute the parse command.
pub fn execute(file: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let text = read_text(file.as_deref())?;
    let lines: Vec<&str> = text.lines().collect();
    debug!(lines = lines.len(), "Parsing label text");

    let fields = parse_label(&PsaLabelParser::default(), &lines);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&fields)?),
        OutputFormat::Text => print_fields(&fields),
    }

    Ok(())
}

fn print_fields(fields: &ExtractedFields) {
    let row = |name: &str, value: Option<String>| {
        let value = value.unwrap_or_else(|| "-".dimmed().to_string());
        println!("{:>12} {}", format!("{name}:").dimmed(), value);
    };

    row("Year", fields.year.map(|y| y.to_string()));
    row("Cert", fields.cert_number.clone());
    row("Grade", fields.grade.clone());
    row("Grade label", fields.grade_label.clone());
    row("Card name", fields.card_name.clone());
    row("Set", fields.set_name.clone());
    row("Language", Some(format!("{:?}", fields.language)));
    row("Numbers", joined(&fields.card_numbers));
    row("Modifiers", joined(&fields.modifiers));
}

fn joined(values: &[String]) -> Option<String> {
    (!values.is_empty()).then(|| values.join(", "))
}
