/// Exit status of a command, as stored in `ERRORLEVEL`.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

pub const NO_ERROR: ExitCode = 0;
pub const ERROR_INVALID_FUNCTION: ExitCode = 1;
/// Errorlevel after a line that failed to parse.
pub const SYNTAX_ERROR: ExitCode = 255;
/// Errorlevel after a command that could not be found or started.
pub const CANT_LAUNCH: ExitCode = 9009;

/// Narrows a parsed status to an [`ExitCode`], keeping only its low 32 bits.
pub fn wrap_exit_code(value: i64) -> ExitCode {
    value as u32 as ExitCode
}

/// How the execution of a node ended.
///
/// Everything except [`Completion::Code`] stops the remaining commands of the
/// enclosing sequence, loop or pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The command ran and returned this code.
    Code(ExitCode),
    /// GOTO moved the batch read position.
    Goto,
    /// `EXIT /B` left the current batch file.
    Exited,
    /// The interpreter is stopping (`EXIT`, or a fatal launch failure inside a pipe).
    Aborted,
    /// Ctrl-C.
    Interrupted,
}

impl Completion {
    pub fn is_break(self) -> bool {
        !matches!(self, Completion::Code(_))
    }
}

impl Default for Completion {
    fn default() -> Self {
        Completion::Code(NO_ERROR)
    }
}
