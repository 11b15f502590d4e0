//! Error types shared by the lexing, parsing and execution stages.

use std::io;
use thiserror::Error;

/// Errors raised while turning physical lines into tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexingError {
    /// Input ended while a `(` block was still open.
    #[error("The syntax of the command is incorrect.")]
    UnbalancedParenthesis,
    /// A token appeared where the grammar does not allow it (e.g. `for` without `in`).
    #[error("{0} was unexpected at this time.")]
    Unexpected(String),
    /// A construct ended before it was complete, e.g. a redirection without a target.
    #[error("The syntax of the command is incorrect.")]
    Incomplete,
}

impl From<ParsingError> for LexingError {
    fn from(e: ParsingError) -> Self {
        match e {
            ParsingError::UnexpectedToken(token) => LexingError::Unexpected(token),
            ParsingError::UnexpectedEnd => LexingError::Incomplete,
        }
    }
}

/// Errors raised while building the command tree from tokens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsingError {
    /// Encountered a token that the grammar does not allow at this position.
    #[error("{0} was unexpected at this time.")]
    UnexpectedToken(String),
    /// The token stream ended in the middle of a statement.
    #[error("The syntax of the command is incorrect.")]
    UnexpectedEnd,
}

/// Runtime failures that are reported to the user and mapped to an errorlevel.
#[derive(Debug, Error)]
pub enum CmdError {
    #[error(transparent)]
    Lexing(#[from] LexingError),
    #[error(transparent)]
    Parsing(#[from] ParsingError),
    #[error("The system cannot find the file specified - {path}")]
    FileNotFound { path: String },
    #[error("The system cannot find the path specified.")]
    PathNotFound,
    #[error("The system cannot find the drive specified.")]
    DriveNotFound,
    #[error("The process cannot access the file {path}: {source}")]
    Redirect { path: String, source: io::Error },
    #[error("The system cannot find the batch label specified - {0}")]
    LabelNotFound(String),
    #[error("Invalid attempt to call batch label outside of batch script.")]
    LabelOutsideBatch,
    #[error("'{0}' is not recognized as an internal or external command,\noperable program or batch file.")]
    NotRecognized(String),
    #[error("Environment variable {0} not defined")]
    VariableNotDefined(String),
    #[error("{0} is not supported.")]
    Unsupported(String),
    #[error("^C")]
    Interrupted,
    #[error(transparent)]
    Io(#[from] io::Error),
}
