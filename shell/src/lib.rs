//! An embeddable interpreter for the Windows batch command language.
//!
//! A command line goes through three stages. The [`lexer`] joins physical lines
//! into one logical line and splits it into tokens, the [`parser`] builds a
//! command tree from the tokens, and the [`Interpreter`] walks the tree:
//! sequencing and conditional operators, pipes, blocks, IF, FOR and
//! redirections, expanding variables right before each simple command runs and
//! dispatching it to a builtin, a batch file or an external program.
//!
//! The interpreter keeps its own variable table and logical current directory
//! and never changes those of the hosting process, so several interpreters can
//! live side by side. Standard handles may be memory buffers:
//!
//! ```no_run
//! use cmd_shell::{Environment, Interpreter, OutputHandle, StdHandles};
//!
//! let (stdout, buffer) = OutputHandle::with_handle();
//! let handles = StdHandles { stdout, ..StdHandles::inherited() };
//! let mut cmd = Interpreter::with_handles(Environment::new(), handles);
//! cmd.execute_line("for /l %i in (1,1,3) do echo %i").unwrap();
//! assert_eq!(String::from_utf8_lossy(&buffer.borrow()), "1\n2\n3\n");
//! ```

mod builtin;
pub mod command;
pub mod condition;
mod context;
pub mod env;
pub mod error;
mod executor;
pub mod expansion;
mod external;
pub mod for_control;
mod interpreter;
pub mod io_adapters;
pub mod lexer;
pub mod params;
pub mod parser;
pub mod signal;
mod tilde;
mod walker;

pub use command::{Completion, ExitCode};
pub use env::Environment;
pub use interpreter::Interpreter;
pub use io_adapters::{InputHandle, OutputHandle, StdHandles};
pub use signal::BreakSignal;
