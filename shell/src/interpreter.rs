use crate::builtin::VERSION_TEXT;
use crate::command::{Completion, ERROR_INVALID_FUNCTION, ExitCode, NO_ERROR, SYNTAX_ERROR};
use crate::condition::ConditionScope;
use crate::context::{BatchContext, ForStack};
use crate::env::Environment;
use crate::error::CmdError;
use crate::expansion::{self, ExpansionScope};
use crate::external::{self, PathExtCache};
use crate::io_adapters::StdHandles;
use crate::lexer::{Lexer, LineStatus};
use crate::params;
use crate::parser::{self, Node};
use crate::signal::BreakSignal;
use crate::tilde::PathPieces;
use crate::walker;
use chrono::{DateTime, Local, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::collections::VecDeque;
use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Saved state of one SETLOCAL.
#[derive(Debug)]
pub(crate) struct LocalScope {
    /// Batch instance that issued the SETLOCAL; only it may ENDLOCAL.
    pub(crate) batch_id: u64,
    pub(crate) env: Environment,
    pub(crate) delayed_expansion: bool,
    pub(crate) extensions: bool,
}

/// A batch-language command interpreter.
///
/// The interpreter owns every piece of mutable state a command can observe:
/// variables and the logical current directory, the standard handles, the
/// errorlevel, the FOR variable stack, the batch call stack and SETLOCAL snapshots.
///
/// Example
/// ```no_run
/// use cmd_shell::{Environment, Interpreter};
/// let mut cmd = Interpreter::new(Environment::new());
/// cmd.execute_line("echo hello & set GREETING=hi").unwrap();
/// assert_eq!(cmd.env().get_var("greeting").as_deref(), Some("hi"));
/// ```
pub struct Interpreter {
    pub(crate) env: Environment,
    pub(crate) handles: StdHandles,
    pub(crate) errorlevel: ExitCode,
    pub(crate) echo_mode: bool,
    pub(crate) delayed_expansion: bool,
    pub(crate) extensions: bool,
    pub(crate) for_stack: ForStack,
    pub(crate) batch_stack: Vec<BatchContext>,
    pub(crate) locals: Vec<LocalScope>,
    pub(crate) pathext: PathExtCache,
    pub(crate) interrupt: BreakSignal,
    pub(crate) exit_code: Option<ExitCode>,
    next_batch_id: u64,
    rng: StdRng,
}

/// Where physical lines come from.
pub(crate) enum LineSource<'a> {
    /// The batch file on top of the batch stack.
    Batch,
    /// Lines of a command string.
    Text(&'a mut VecDeque<String>),
    Console(&'a mut DefaultEditor),
}

/// Result of reading one logical line.
pub(crate) enum Fetched {
    Eof,
    /// An empty line, a comment-only line or a line that failed to parse.
    Nothing,
    Tree(Node),
}

impl Interpreter {
    /// Creates an interpreter writing to the inherited console handles.
    pub fn new(env: Environment) -> Self {
        Self::with_handles(env, StdHandles::inherited())
    }

    pub fn with_handles(env: Environment, handles: StdHandles) -> Self {
        Self {
            env,
            handles,
            errorlevel: NO_ERROR,
            echo_mode: true,
            delayed_expansion: false,
            extensions: true,
            for_stack: ForStack::new(),
            batch_stack: Vec::new(),
            locals: Vec::new(),
            pathext: PathExtCache::default(),
            interrupt: BreakSignal::new(),
            exit_code: None,
            next_batch_id: 1,
            rng: StdRng::from_entropy(),
        }
    }

    /// Uses `signal` to observe Ctrl-C.
    pub fn with_interrupt(mut self, signal: BreakSignal) -> Self {
        self.interrupt = signal;
        self
    }

    pub fn errorlevel(&self) -> ExitCode {
        self.errorlevel
    }

    /// The code requested by `EXIT`, once the interpreter has been asked to stop.
    pub fn exit_code(&self) -> Option<ExitCode> {
        self.exit_code
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    pub fn handles_mut(&mut self) -> &mut StdHandles {
        &mut self.handles
    }

    pub fn set_echo_mode(&mut self, on: bool) {
        self.echo_mode = on;
    }

    pub fn set_delayed_expansion(&mut self, on: bool) {
        self.delayed_expansion = on;
    }

    pub fn set_extensions(&mut self, on: bool) {
        self.extensions = on;
    }

    /// Runs every logical line of `text`, as `/C` does.
    pub fn execute_line(&mut self, text: &str) -> anyhow::Result<Completion> {
        let mut lines: VecDeque<String> = text.lines().map(str::to_string).collect();
        let mut last = Completion::Code(NO_ERROR);
        while self.exit_code.is_none() {
            let node = match self.fetch(&mut LineSource::Text(&mut lines))? {
                Fetched::Eof => break,
                Fetched::Nothing => continue,
                Fetched::Tree(node) => node,
            };
            last = self.execute_node(&node)?;
            if matches!(last, Completion::Aborted | Completion::Interrupted) {
                break;
            }
        }
        Ok(last)
    }

    /// Interactive loop: prompt, read, execute, until end of input or `EXIT`.
    pub fn repl(&mut self) -> anyhow::Result<()> {
        let mut editor = DefaultEditor::new()?;
        while self.exit_code.is_none() {
            let fetched = match self.fetch(&mut LineSource::Console(&mut editor)) {
                Ok(fetched) => fetched,
                Err(e) if matches!(e.downcast_ref::<CmdError>(), Some(CmdError::Interrupted)) => {
                    self.interrupt.clear();
                    continue;
                }
                Err(e) => return Err(e),
            };
            match fetched {
                Fetched::Eof => break,
                Fetched::Nothing => {}
                Fetched::Tree(node) => {
                    if let Err(e) = self.execute_node(&node) {
                        self.report(&format_args!("{e:#}"));
                    }
                    if self.echo_mode {
                        let _ = writeln!(self.handles.stdout);
                    }
                }
            }
            self.handles.flush();
            self.interrupt.clear();
        }
        Ok(())
    }

    fn read_physical(&mut self, source: &mut LineSource<'_>, continuation: bool) -> anyhow::Result<Option<String>> {
        match source {
            LineSource::Batch => match self.batch_stack.last_mut() {
                Some(batch) if !batch.skip_rest => Ok(batch.read_line()?),
                _ => Ok(None),
            },
            LineSource::Text(lines) => Ok(lines.pop_front()),
            LineSource::Console(editor) => {
                let prompt = match (continuation, self.echo_mode) {
                    (true, _) => "More? ".to_string(),
                    (false, true) => self.expand_prompt(),
                    (false, false) => String::new(),
                };
                match editor.readline(&prompt) {
                    Ok(line) => {
                        let _ = editor.add_history_entry(line.as_str());
                        Ok(Some(line))
                    }
                    Err(ReadlineError::Interrupted) => Err(CmdError::Interrupted.into()),
                    Err(ReadlineError::Eof) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    /// Reads physical lines until they form a complete logical line and parses it.
    pub(crate) fn fetch(&mut self, source: &mut LineSource<'_>) -> anyhow::Result<Fetched> {
        let in_batch = matches!(source, LineSource::Batch);
        let mut lexer = Lexer::new();
        let mut echo = None;
        loop {
            let Some(raw) = self.read_physical(source, echo.is_some())? else {
                if echo.is_none() {
                    return Ok(Fetched::Eof);
                }
                break;
            };
            let line = expansion::expand_at_parse(&raw, self);
            trace!(%line, "read line");
            let echo_line = *echo.get_or_insert_with(|| {
                let start = line.trim_start();
                in_batch && self.echo_mode && !start.starts_with('@') && !start.starts_with(':')
            });
            if echo_line && !line.trim().is_empty() {
                let prompt = self.expand_prompt();
                writeln!(self.handles.stdout, "{prompt}{line}")?;
            }
            match lexer.push_line(&line) {
                Ok(LineStatus::Complete) => break,
                Ok(LineStatus::NeedMore) => {}
                Err(e) => return Ok(self.syntax_error(e.into())),
            }
        }
        let tokens = match lexer.finish() {
            Ok(tokens) => tokens,
            Err(e) => return Ok(self.syntax_error(e.into())),
        };
        trace!(?tokens, "lexed");
        match parser::construct_tree(tokens) {
            Ok(Some(node)) => {
                debug!(?node, "parsed");
                Ok(Fetched::Tree(node))
            }
            Ok(None) => Ok(Fetched::Nothing),
            Err(e) => Ok(self.syntax_error(e.into())),
        }
    }

    fn syntax_error(&mut self, error: CmdError) -> Fetched {
        self.report(&error);
        self.errorlevel = SYNTAX_ERROR;
        Fetched::Nothing
    }

    /// Writes an error message to the current stderr handle.
    pub(crate) fn report(&mut self, error: &dyn Display) {
        let _ = writeln!(self.handles.stderr, "{error}");
    }

    /// Reports `error`, sets the errorlevel to `code` and returns it.
    pub(crate) fn fail(&mut self, error: &dyn Display, code: ExitCode) -> Completion {
        self.report(error);
        self.errorlevel = code;
        Completion::Code(code)
    }

    pub(crate) fn current_batch_id(&self) -> Option<u64> {
        self.batch_stack.last().map(|b| b.id)
    }

    /// Runs a batch file, or a label inside one, until it ends.
    ///
    /// `label` names the label to start at and the position to search from.
    pub(crate) fn run_batch(
        &mut self,
        path: &Path,
        command: &str,
        called: bool,
        label: Option<(&str, u64)>,
    ) -> anyhow::Result<Completion> {
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        let mut context = match BatchContext::open(path, command, called, id) {
            Ok(context) => context,
            Err(_) => {
                let error = CmdError::FileNotFound {
                    path: path.display().to_string(),
                };
                return Ok(self.fail(&error, ERROR_INVALID_FUNCTION));
            }
        };
        if let Some((name, position)) = label {
            context.position = position;
            if !context.find_label(name)? {
                return Ok(self.fail(&CmdError::LabelNotFound(name.to_string()), ERROR_INVALID_FUNCTION));
            }
        }
        debug!(path = %path.display(), called, id, "entering batch");

        if called {
            self.for_stack.push_empty();
        }
        self.batch_stack.push(context);
        let result = self.batch_loop();
        self.batch_stack.pop();
        self.restore_locals(id);
        if called {
            self.for_stack.pop();
        } else if let Some(parent) = self.batch_stack.last_mut() {
            // A batch started without CALL replaces its parent.
            parent.skip_rest = true;
        }
        debug!(id, errorlevel = self.errorlevel, "leaving batch");

        Ok(match result? {
            c @ (Completion::Aborted | Completion::Interrupted) => c,
            _ => Completion::Code(self.errorlevel),
        })
    }

    fn batch_loop(&mut self) -> anyhow::Result<Completion> {
        loop {
            if self.interrupt.is_raised() {
                self.interrupt.clear();
                self.report(&CmdError::Interrupted);
                return Ok(Completion::Interrupted);
            }
            let node = match self.fetch(&mut LineSource::Batch)? {
                Fetched::Eof => return Ok(Completion::Code(self.errorlevel)),
                Fetched::Nothing => continue,
                Fetched::Tree(node) => node,
            };
            match self.execute_node(&node)? {
                c @ (Completion::Exited | Completion::Aborted | Completion::Interrupted) => return Ok(c),
                Completion::Code(_) | Completion::Goto => {}
            }
        }
    }

    /// Undoes the SETLOCALs a finished batch instance left open.
    fn restore_locals(&mut self, batch_id: u64) {
        while self.locals.last().is_some_and(|scope| scope.batch_id == batch_id) {
            if let Some(scope) = self.locals.pop() {
                self.restore_local(scope);
            }
        }
    }

    pub(crate) fn restore_local(&mut self, scope: LocalScope) {
        self.env = scope.env;
        self.delayed_expansion = scope.delayed_expansion;
        self.extensions = scope.extensions;
    }

    /// Directory for pipe and FOR /F temporary files.
    pub(crate) fn temp_dir(&self) -> PathBuf {
        ["TEMP", "TMP"]
            .iter()
            .filter_map(|name| self.env.get_var(name))
            .map(|dir| self.env.resolve(&dir))
            .find(|dir| dir.is_dir())
            .unwrap_or_else(std::env::temp_dir)
    }

    /// The `PROMPT` variable with its `$` codes replaced.
    pub fn expand_prompt(&self) -> String {
        let template = self.env.get_var("PROMPT").unwrap_or_else(|| "$P$G".to_string());
        let now = Local::now();
        let mut out = String::new();
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }
            let Some(code) = chars.next() else { break };
            match code.to_ascii_uppercase() {
                'A' => out.push('&'),
                'B' => out.push('|'),
                'C' => out.push('('),
                'D' => out.push_str(&format_date(&now)),
                'E' => out.push('\x1b'),
                'F' => out.push(')'),
                'G' => out.push('>'),
                'H' => {
                    out.pop();
                }
                'L' => out.push('<'),
                'N' => out.push_str(PathPieces::split(&self.env.current_dir).drive.trim_end_matches(':')),
                'P' => out.push_str(&self.env.current_dir.to_string_lossy()),
                'Q' => out.push('='),
                'S' => out.push(' '),
                'T' => out.push_str(&format_time(&now)),
                'V' => out.push_str(VERSION_TEXT),
                '_' => out.push('\n'),
                '$' => out.push('$'),
                _ => {}
            }
        }
        out
    }

    /// Applies the quote rule to a `/C` or `/K` command string.
    ///
    /// The first and last quotes are removed unless `strip` is off and the string
    /// has exactly two quotes enclosing whitespace, no special characters, and the
    /// name of an existing program.
    pub fn prepare_command_string(&mut self, command: &str, strip: bool) -> String {
        let (Some(first), Some(last)) = (command.find('"'), command.rfind('"')) else {
            return command.to_string();
        };
        if first == last && !strip {
            return command.to_string();
        }
        let keep = !strip && command.matches('"').count() == 2 && {
            let inner = &command[first + 1..last];
            !inner.contains(['&', '<', '>', '(', ')', '@', '^', '|'])
                && inner.contains([' ', '\t'])
                && self.resolve_program(inner).is_some()
        };
        if keep {
            return command.to_string();
        }
        let mut out = String::with_capacity(command.len());
        out.push_str(&command[..first]);
        if first == last {
            out.push_str(&command[first + 1..]);
        } else {
            out.push_str(&command[first + 1..last]);
            out.push_str(&command[last + 1..]);
        }
        out
    }

    /// Resolves a program name through the current directory, PATH and PATHEXT.
    pub(crate) fn resolve_program(&mut self, name: &str) -> Option<PathBuf> {
        let pathext = self.env.get_var("PATHEXT");
        let search = self.env.get_var("PATH");
        let extensions = self.pathext.extensions(pathext.as_deref());
        let found = external::find_command_path(name, &self.env.current_dir, search.as_deref(), extensions);
        debug!(name, found = ?found, "resolved program");
        found
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Environment::new())
    }
}

fn format_date(now: &DateTime<Local>) -> String {
    now.format("%m/%d/%Y").to_string()
}

fn format_time(now: &DateTime<Local>) -> String {
    format!(
        "{:>2}:{:02}:{:02}.{:02}",
        now.hour(),
        now.minute(),
        now.second(),
        now.timestamp_subsec_millis() / 10
    )
}

impl ExpansionScope for Interpreter {
    fn in_batch(&self) -> bool {
        !self.batch_stack.is_empty()
    }

    fn batch_param(&self, n: usize) -> Option<String> {
        self.batch_stack.last()?.param(n)
    }

    fn batch_params_tail(&self) -> Option<String> {
        self.batch_stack.last().map(BatchContext::params_tail)
    }

    fn for_variable(&self, index: usize) -> Option<String> {
        self.for_stack.current().get(index).map(str::to_string)
    }

    fn variable(&mut self, name: &str) -> Option<String> {
        if let Some(value) = self.env.get_var(name) {
            return Some(value);
        }
        let now = Local::now();
        match name.to_ascii_uppercase().as_str() {
            "ERRORLEVEL" => Some(self.errorlevel.to_string()),
            "DATE" => Some(format_date(&now)),
            "TIME" => Some(format_time(&now)),
            "CD" => Some(self.env.current_dir.to_string_lossy().into_owned()),
            "RANDOM" => Some(self.rng.gen_range(0..=32767).to_string()),
            _ => None,
        }
    }

    fn delayed_expansion(&self) -> bool {
        self.delayed_expansion
    }

    fn current_dir(&self) -> PathBuf {
        self.env.current_dir.clone()
    }
}

impl ConditionScope for Interpreter {
    fn expand(&mut self, text: &str) -> String {
        expansion::expand_at_execute(text, self)
    }

    fn errorlevel(&self) -> i32 {
        self.errorlevel
    }

    fn is_defined(&self, name: &str) -> bool {
        self.env.get_var(name).is_some()
    }

    fn exists(&self, path: &str) -> bool {
        let path = params::unquote(path);
        if path.is_empty() {
            return false;
        }
        if walker::has_wildcard(path) {
            let (prefix, pattern) = walker::split_pattern(path);
            let dir = self.env.resolve(prefix);
            return !walker::matching_names(&dir, pattern, true, true).is_empty();
        }
        self.env.resolve(path).exists()
    }
}
