//! Exit codes following sysexits.h conventions.
//!
//! These codes give scripts a stable way to tell bad input apart from an
//! unavailable OCR provider or an unwritable output.

use icr_core::IcrError;

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Data format error (undecodable image, invalid catalog or OCR fixture).
/// Maps to EX_DATAERR from sysexits.h.
pub const DATA_ERROR: i32 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// OCR provider unavailable or failing.
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const UNAVAILABLE: i32 = 69;

/// I/O error (cannot write output file).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Represents an exit code with its error message.
pub struct ExitCode {
    pub code: i32,
    pub message: String,
}

impl ExitCode {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        let code = match err.chain().find_map(|e| e.downcast_ref::<IcrError>()) {
            Some(IcrError::ExternalProvider(_)) => UNAVAILABLE,
            Some(IcrError::ImageDecode { .. } | IcrError::Validation(_)) => DATA_ERROR,
            _ => classify_message(&message),
        };

        Self { code, message }
    }
}

fn classify_message(message: &str) -> i32 {
    if message.contains("Failed to read") {
        INPUT_ERROR
    } else if message.contains("Failed to write") {
        IO_ERROR
    } else if message.contains("No OCR provider") {
        UNAVAILABLE
    } else if message.contains("Failed to parse") {
        DATA_ERROR
    } else {
        GENERAL_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_read_failure_is_input_error() {
        let err = std::fs::read("/nonexistent/slab.jpg")
            .context("Failed to read file: /nonexistent/slab.jpg")
            .unwrap_err();
        assert_eq!(ExitCode::from_anyhow(&err).code, INPUT_ERROR);
    }

    #[test]
    fn test_core_errors_are_classified_through_context() {
        let err = anyhow::Error::new(IcrError::ExternalProvider("quota".into()))
            .context("OCR failed");
        let exit = ExitCode::from_anyhow(&err);
        assert_eq!(exit.code, UNAVAILABLE);
        assert!(exit.message.contains("quota"));

        let err = anyhow::Error::new(IcrError::ImageDecode {
            index: 0,
            reason: "bad header".into(),
        });
        assert_eq!(ExitCode::from_anyhow(&err).code, DATA_ERROR);
    }

    #[test]
    fn test_unknown_error_is_general() {
        let err = anyhow::anyhow!("something odd");
        assert_eq!(ExitCode::from_anyhow(&err).code, GENERAL_ERROR);
    }
}
