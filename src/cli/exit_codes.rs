//! CLI Exit Codes
//!
//! Standard exit codes for CLI operations and automation.

use crate::core::transport::TransportError;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Invalid arguments
    pub const INVALID_ARGS: u8 = 2;

    /// Opening the port failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Permission denied
    pub const PERMISSION_DENIED: u8 = 7;

    /// Configuration error
    pub const CONFIG_ERROR: u8 = 8;

    /// Port opened then dropped during the settle period
    pub const IMMEDIATE_CLOSE: u8 = 12;

    /// Port not found
    pub const PORT_NOT_FOUND: u8 = 14;

    /// No open session
    pub const NOT_CONNECTED: u8 = 18;

    /// Write or drain failed
    pub const WRITE_FAILED: u8 = 19;

    /// Internal error
    pub const INTERNAL_ERROR: u8 = 127;
}

/// CLI operation result
#[derive(Debug)]
pub enum CliResult {
    /// Success with optional message
    Success(Option<String>),

    /// Error with code and message
    Error(u8, String),
}

impl CliResult {
    /// Plain success
    pub fn success() -> Self {
        Self::Success(None)
    }

    /// Error with an explicit code
    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Get exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    /// Get message
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(Some(msg)) | Self::Error(_, msg) => Some(msg),
            Self::Success(None) => None,
        }
    }

    /// Convert to `ExitCode`
    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Is success?
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

impl From<&TransportError> for CliResult {
    fn from(err: &TransportError) -> Self {
        use std::io::ErrorKind;

        let code = match err {
            TransportError::InvalidArgument(_) | TransportError::InvalidHex(_) => {
                ExitCodes::INVALID_ARGS
            }
            TransportError::NotConnected => ExitCodes::NOT_CONNECTED,
            TransportError::OpenFailed { source, .. } => match source.kind() {
                ErrorKind::NotFound => ExitCodes::PORT_NOT_FOUND,
                ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
                _ => ExitCodes::CONNECTION_FAILED,
            },
            TransportError::ImmediateClose { .. } => ExitCodes::IMMEDIATE_CLOSE,
            TransportError::WriteFailed(_) | TransportError::DrainFailed(_) => {
                ExitCodes::WRITE_FAILED
            }
            TransportError::ListFailed(_) => ExitCodes::ERROR,
        };

        Self::Error(code, err.to_string())
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        0 => "Success",
        1 => "General error",
        2 => "Invalid arguments",
        3 => "Connection failed",
        7 => "Permission denied",
        8 => "Configuration error",
        12 => "Port closed immediately after opening",
        14 => "Port not found",
        18 => "Not connected",
        19 => "Write failed",
        127 => "Internal error",
        _ => "Unknown error",
    }
}

/// Print exit code table
pub fn print_exit_codes() {
    println!("Exit Codes:");
    for code in [0, 1, 2, 3, 7, 8, 12, 14, 18, 19, 127] {
        println!("  {:>3}  {}", code, exit_code_description(code));
    }
}
