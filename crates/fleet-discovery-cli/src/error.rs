//! CLI exit code handling.
//!
//! Exit codes:
//! - 0: Success (JSON on stdout)
//! - 1: Recoverable error (unreadable file, bad configuration, store failure)
//! - 2: Invalid input data (malformed scene file, bad vectors, too few scenes)

use std::process::ExitCode;

use fleet_discovery_core::{DiscoveryError, ErrorCategory};

/// Exit codes for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CliExitCode {
    /// Success - result on stdout
    Success = 0,
    /// Recoverable error - diagnostic on stderr
    Warning = 1,
    /// Input data is unusable - diagnostic on stderr
    Blocking = 2,
}

impl From<CliExitCode> for ExitCode {
    fn from(code: CliExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

impl From<CliExitCode> for i32 {
    fn from(code: CliExitCode) -> Self {
        code as i32
    }
}

impl From<ErrorCategory> for CliExitCode {
    fn from(category: ErrorCategory) -> Self {
        match category {
            ErrorCategory::InvalidValue
            | ErrorCategory::DimensionalMismatch
            | ErrorCategory::InsufficientData => CliExitCode::Blocking,

            ErrorCategory::RankDeficiency
            | ErrorCategory::Memory
            | ErrorCategory::AlgorithmFailure
            | ErrorCategory::Configuration => CliExitCode::Warning,
        }
    }
}

impl From<&DiscoveryError> for CliExitCode {
    fn from(err: &DiscoveryError) -> Self {
        CliExitCode::from(err.category())
    }
}

/// Determine exit code for any error raised by a command.
///
/// Discovery errors map through their category, JSON errors are invalid
/// input, everything else is recoverable.
pub fn exit_code_for_error(e: &anyhow::Error) -> CliExitCode {
    if let Some(discovery_err) = e.downcast_ref::<DiscoveryError>() {
        return CliExitCode::from(discovery_err);
    }
    if e.downcast_ref::<serde_json::Error>().is_some() {
        return CliExitCode::Blocking;
    }
    CliExitCode::Warning
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(CliExitCode::Success as u8, 0);
        assert_eq!(CliExitCode::Warning as u8, 1);
        assert_eq!(CliExitCode::Blocking as u8, 2);
        assert_eq!(i32::from(CliExitCode::Blocking), 2);

        println!("[PASS] test_exit_code_values");
    }

    #[test]
    fn test_discovery_errors_map_by_category() {
        let bad_input = DiscoveryError::insufficient_data(5, 2);
        assert_eq!(CliExitCode::from(&bad_input), CliExitCode::Blocking);

        let mismatch = DiscoveryError::dimension_mismatch(4, 3, "behavioral vector of scene s1");
        assert_eq!(CliExitCode::from(&mismatch), CliExitCode::Blocking);

        let memory = DiscoveryError::MemoryLimit {
            scenes: 20_000,
            limit: 10_000,
        };
        assert_eq!(CliExitCode::from(&memory), CliExitCode::Warning);

        let config = DiscoveryError::Config("bad".into());
        assert_eq!(CliExitCode::from(&config), CliExitCode::Warning);
    }

    #[test]
    fn test_exit_code_survives_context() {
        let err = Err::<(), _>(DiscoveryError::invalid_value("NaN threshold"))
            .context("discover failed")
            .expect_err("error");
        assert_eq!(exit_code_for_error(&err), CliExitCode::Blocking);

        let json_err = serde_json::from_str::<Vec<u32>>("[1,").expect_err("truncated");
        let err = anyhow::Error::new(json_err).context("parsing scenes.json");
        assert_eq!(exit_code_for_error(&err), CliExitCode::Blocking);

        let io = anyhow::anyhow!("No such file or directory");
        assert_eq!(exit_code_for_error(&io), CliExitCode::Warning);

        println!("[PASS] test_exit_code_survives_context");
    }
}
