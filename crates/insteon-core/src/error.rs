//! Error types for the Insteon PLM engine.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Framing errors, command-level errors,
//! and transport errors are all captured here.

/// The error type for all PLM engine operations.
///
/// Parse-level variants are recovered locally by the engine (logged and
/// dropped); command-level variants reach the caller through the result
/// handle of the submitted command; [`Error::TransportOpen`] is the only
/// start-up fatal condition.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A frame, payload, or address could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// The command name is not present in the command table.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A serializer produced a payload whose length differs from the
    /// descriptor's declared write size.
    #[error("serialized {command} is {actual} bytes, expected {expected}")]
    SerializationSizeMismatch {
        command: &'static str,
        expected: usize,
        actual: usize,
    },

    /// An expectation deadline fired, or the job sat in the queue too long.
    #[error("timeout waiting for response")]
    Timeout,

    /// Every attempt of a retried command failed.
    #[error("max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        /// The error reported by the final attempt.
        last: Box<Error>,
    },

    /// The serial port could not be opened.
    #[error("failed to open transport: {0}")]
    TransportOpen(String),

    /// The device directory has no device at this address.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// A device's database changed since the copy being written was loaded.
    #[error("database of {0} is out of sync, load it again")]
    DatabaseOutOfSync(String),

    /// A link session is already running.
    #[error("linking already in progress")]
    AlreadyLinking,

    /// A live expectation already owns this key.
    #[error("expectation already registered for {0}")]
    ExpectationConflict(String),

    /// The modem answered a command with NAK.
    #[error("modem returned NAK for {0}")]
    Nak(&'static str),

    /// An invalid parameter was passed to a command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A transport-level error after the port was opened.
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine task is gone, or the transport was closed.
    #[error("not connected")]
    NotConnected,

    /// The connection to the modem was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a retry of the same command could plausibly succeed.
    ///
    /// Programmer errors (unknown command, size mismatch, bad parameter)
    /// and a dead engine are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout | Error::Nak(_) | Error::Transport(_) | Error::Io(_)
        )
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
