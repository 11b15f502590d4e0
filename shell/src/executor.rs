//! Execution of command trees: redirection scopes, operators, pipes, FOR loops
//! and dispatch of simple commands.

use crate::builtin;
use crate::command::{CANT_LAUNCH, Completion, ERROR_INVALID_FUNCTION, NO_ERROR, SYNTAX_ERROR};
use crate::error::CmdError;
use crate::expansion;
use crate::external::{self, ExternalCommand, Outcome};
use crate::for_control::{self, FileSetOptions, ForControl, ForFlags, ForKind, NumberRange};
use crate::interpreter::Interpreter;
use crate::io_adapters::{self, InputHandle, OutputHandle};
use crate::params::{self, PARAM_DELIMS, WHITESPACE};
use crate::parser::{BinaryOp, Node, NodeKind, RedirectKind, Redirection};
use crate::walker::{self, DirectoryStack};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, warn};

impl Interpreter {
    /// Executes `node` with its redirections in effect.
    ///
    /// The standard handles are restored on every exit path.
    pub(crate) fn execute_node(&mut self, node: &Node) -> anyhow::Result<Completion> {
        if node.redirects.is_empty() {
            return self.execute_kind(&node.kind);
        }
        let saved = self.handles.clone();
        let result = match self.apply_redirects(&node.redirects) {
            Ok(()) => Ok(self.execute_kind(&node.kind)),
            Err(e) => Err(e),
        };
        self.handles.flush();
        self.handles = saved;
        match result {
            Ok(completion) => completion,
            Err(e) => Ok(self.fail(&e, ERROR_INVALID_FUNCTION)),
        }
    }

    fn apply_redirects(&mut self, redirects: &[Redirection]) -> Result<(), CmdError> {
        for (i, redirect) in redirects.iter().enumerate() {
            // The last redirection of a handle wins; earlier ones are never opened.
            if redirects[i + 1..].iter().any(|later| later.fd == redirect.fd) {
                continue;
            }
            match (redirect.fd, &redirect.kind) {
                (0, RedirectKind::Input(target)) => self.handles.stdin = self.open_input(target)?,
                (1 | 2, RedirectKind::Output(target)) => {
                    let handle = self.open_output(target, false)?;
                    self.set_output(redirect.fd, handle);
                }
                (1 | 2, RedirectKind::Append(target)) => {
                    let handle = self.open_output(target, true)?;
                    self.set_output(redirect.fd, handle);
                }
                (1 | 2, RedirectKind::Clone(source)) => match self.handles.output(*source).cloned() {
                    Some(handle) => self.set_output(redirect.fd, handle),
                    None => warn!(%redirect, "cannot duplicate handle"),
                },
                (0, RedirectKind::Clone(0)) => {}
                _ => warn!(%redirect, "redirection ignored"),
            }
        }
        Ok(())
    }

    fn set_output(&mut self, fd: u32, handle: OutputHandle) {
        if fd == 1 {
            self.handles.stdout = handle;
        } else {
            self.handles.stderr = handle;
        }
    }

    fn redirect_target(&mut self, target: &str) -> String {
        let expanded = expansion::expand_at_execute(target, self);
        params::unquote(&expanded).to_string()
    }

    fn open_input(&mut self, target: &str) -> Result<InputHandle, CmdError> {
        let name = self.redirect_target(target);
        if io_adapters::is_null_device(&name) {
            return Ok(InputHandle::Null);
        }
        let path = self.env.resolve(&name);
        File::open(&path)
            .map(|file| InputHandle::File(Rc::new(file)))
            .map_err(|source| CmdError::Redirect { path: name, source })
    }

    fn open_output(&mut self, target: &str, append: bool) -> Result<OutputHandle, CmdError> {
        let name = self.redirect_target(target);
        if io_adapters::is_null_device(&name) {
            return Ok(OutputHandle::Null);
        }
        let path = self.env.resolve(&name);
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        options
            .open(&path)
            .map(|file| OutputHandle::File(Rc::new(file)))
            .map_err(|source| CmdError::Redirect { path: name, source })
    }

    fn execute_kind(&mut self, kind: &NodeKind) -> anyhow::Result<Completion> {
        match kind {
            NodeKind::Single(text) => self.execute_single(text),
            NodeKind::Binary { op, left, right } => self.execute_binary(*op, left, right),
            NodeKind::If {
                condition,
                then_block,
                else_block,
            } => {
                if condition.evaluate(self) {
                    self.execute_node(then_block)
                } else if let Some(block) = else_block {
                    self.execute_node(block)
                } else {
                    Ok(Completion::Code(NO_ERROR))
                }
            }
            NodeKind::For { control, do_block } => self.execute_for(control, do_block),
            NodeKind::Block(inner) => self.execute_node(inner),
        }
    }

    fn execute_binary(&mut self, op: BinaryOp, left: &Node, right: &Node) -> anyhow::Result<Completion> {
        if op == BinaryOp::Pipe {
            return self.execute_pipe(left, right);
        }
        let first = self.execute_node(left)?;
        match (op, first) {
            (_, c) if c.is_break() => Ok(c),
            (BinaryOp::Concat, _) => self.execute_node(right),
            (BinaryOp::OnSuccess, Completion::Code(NO_ERROR)) => self.execute_node(right),
            (BinaryOp::OnFailure, Completion::Code(code)) if code != NO_ERROR => {
                self.errorlevel = code;
                self.execute_node(right)
            }
            _ => Ok(first),
        }
    }

    /// `left | right`: the output of `left` goes to a temporary file that then
    /// feeds `right`. Both sides run outside any batch file.
    fn execute_pipe(&mut self, left: &Node, right: &Node) -> anyhow::Result<Completion> {
        let (path, file) = io_adapters::create_temp_file(&self.temp_dir())?;
        debug!(path = %path.display(), "pipe through temporary file");
        let result = self.run_pipe_stages(&path, file, left, right);
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "cannot remove pipe file");
        }
        result
    }

    fn run_pipe_stages(&mut self, path: &Path, file: File, left: &Node, right: &Node) -> anyhow::Result<Completion> {
        let saved_stdout = std::mem::replace(&mut self.handles.stdout, OutputHandle::File(Rc::new(file)));
        let batches = std::mem::take(&mut self.batch_stack);
        let first = self.execute_node(left);
        self.batch_stack = batches;
        self.handles.flush();
        self.handles.stdout = saved_stdout;
        let first = first?;
        if let Some(stop) = self.pipe_stage_ended(first) {
            return Ok(stop);
        }

        let input = File::open(path)?;
        let saved_stdin = std::mem::replace(&mut self.handles.stdin, InputHandle::File(Rc::new(input)));
        let batches = std::mem::take(&mut self.batch_stack);
        let second = self.execute_node(right);
        self.batch_stack = batches;
        self.handles.stdin = saved_stdin;
        let second = second?;
        Ok(self.pipe_stage_ended(second).unwrap_or(second))
    }

    /// Records the code of a finished pipe stage; returns a completion that stops the pipe.
    ///
    /// A stage that could not be launched stops the pipe, and ends the interpreter
    /// while a batch file runs.
    fn pipe_stage_ended(&mut self, completion: Completion) -> Option<Completion> {
        match completion {
            Completion::Code(CANT_LAUNCH) => {
                self.errorlevel = CANT_LAUNCH;
                if self.batch_stack.is_empty() {
                    return Some(completion);
                }
                self.exit_code = Some(SYNTAX_ERROR);
                Some(Completion::Aborted)
            }
            Completion::Code(code) => {
                self.errorlevel = code;
                None
            }
            other => Some(other),
        }
    }

    fn execute_for(&mut self, control: &ForControl, body: &Node) -> anyhow::Result<Completion> {
        self.for_stack.push_copy();
        let result = match &control.kind {
            ForKind::FileTree { root } => self.for_file_tree(control, root.as_deref(), body),
            ForKind::FileSet(options) => self.for_file_set(control, options, body),
            ForKind::Numbers => self.for_numbers(control, body),
        };
        self.for_stack.pop();
        result
    }

    /// Binds `values` to consecutive variables from `first_slot` and runs the body once.
    fn run_iteration(&mut self, first_slot: usize, values: &[Option<String>], body: &Node) -> anyhow::Result<Completion> {
        if self.interrupt.is_raised() {
            self.interrupt.clear();
            self.report(&CmdError::Interrupted);
            return Ok(Completion::Interrupted);
        }
        let context = self.for_stack.current_mut();
        for (offset, value) in values.iter().enumerate() {
            context.set(first_slot + offset, value.as_deref());
        }
        self.execute_node(body)
    }

    fn for_numbers(&mut self, control: &ForControl, body: &Node) -> anyhow::Result<Completion> {
        let set = expansion::expand_at_execute(&control.set, self);
        let mut last = Completion::Code(NO_ERROR);
        for value in NumberRange::parse(&set) {
            last = self.run_iteration(control.variable_index, &[Some(value.to_string())], body)?;
            if last.is_break() {
                break;
            }
        }
        Ok(last)
    }

    fn for_file_tree(&mut self, control: &ForControl, root: Option<&str>, body: &Node) -> anyhow::Result<Completion> {
        let set = expansion::expand_at_execute(&control.set, self);
        let items: Vec<String> = params::split(&set, PARAM_DELIMS)
            .into_iter()
            .map(|p| p.text.to_string())
            .collect();
        let dirs: Vec<Option<PathBuf>> = if control.flags.recurse {
            let root = match root {
                Some(root) => {
                    let root = expansion::expand_at_execute(root, self);
                    self.env.resolve(params::unquote(&root))
                }
                None => self.env.current_dir.clone(),
            };
            DirectoryStack::new(root).map(Some).collect()
        } else {
            vec![None]
        };

        let mut last = Completion::Code(NO_ERROR);
        for dir in &dirs {
            for item in &items {
                for value in self.file_tree_values(dir.as_deref(), item, control.flags) {
                    last = self.run_iteration(control.variable_index, &[Some(value)], body)?;
                    if last.is_break() {
                        return Ok(last);
                    }
                }
            }
        }
        Ok(last)
    }

    fn file_tree_values(&self, dir: Option<&Path>, item: &str, flags: ForFlags) -> Vec<String> {
        let bare = params::unquote(item);
        if !walker::has_wildcard(bare) {
            return vec![match dir {
                Some(dir) => dir.join(bare).to_string_lossy().into_owned(),
                None => item.to_string(),
            }];
        }
        let (prefix, pattern) = walker::split_pattern(bare);
        let search = match dir {
            Some(dir) => dir.join(prefix),
            None => self.env.resolve(prefix),
        };
        walker::matching_names(&search, pattern, flags.include_files, flags.include_dirs)
            .into_iter()
            .map(|name| match dir {
                Some(_) => search.join(&name).to_string_lossy().into_owned(),
                None => format!("{prefix}{name}"),
            })
            .collect()
    }

    fn for_file_set(&mut self, control: &ForControl, options: &FileSetOptions, body: &Node) -> anyhow::Result<Completion> {
        let expanded = expansion::expand_at_execute(&control.set, self);
        let set = expanded.trim();
        let (literal_quote, command_quote) = if options.use_backq { ('\'', '`') } else { ('"', '\'') };
        if let Some(text) = strip_pair(set, literal_quote) {
            return self.iterate_lines(control, options, vec![text.to_string()], body);
        }
        if let Some(command) = strip_pair(set, command_quote) {
            let lines = self.capture_command(command)?;
            return self.iterate_lines(control, options, lines, body);
        }

        let mut last = Completion::Code(NO_ERROR);
        for item in params::split(set, WHITESPACE) {
            let name = params::unquote(item.text);
            let bytes = match fs::read(self.env.resolve(name)) {
                Ok(bytes) => bytes,
                Err(_) => {
                    let error = CmdError::FileNotFound { path: name.to_string() };
                    return Ok(self.fail(&error, ERROR_INVALID_FUNCTION));
                }
            };
            last = self.iterate_lines(control, options, split_lines(&bytes), body)?;
            if last.is_break() {
                break;
            }
        }
        Ok(last)
    }

    fn iterate_lines(
        &mut self,
        control: &ForControl,
        options: &FileSetOptions,
        lines: Vec<String>,
        body: &Node,
    ) -> anyhow::Result<Completion> {
        let mut last = Completion::Code(NO_ERROR);
        for line in lines.iter().skip(options.skip) {
            let Some(values) = for_control::split_line(line, options) else {
                continue;
            };
            last = self.run_iteration(control.variable_index, &values, body)?;
            if last.is_break() {
                break;
            }
        }
        Ok(last)
    }

    /// Runs `command` the way a child interpreter would and returns its output lines.
    ///
    /// Variables, the current directory and the errorlevel are restored afterwards.
    fn capture_command(&mut self, command: &str) -> anyhow::Result<Vec<String>> {
        let (path, file) = io_adapters::create_temp_file(&self.temp_dir())?;
        debug!(command, path = %path.display(), "capturing command output");
        let saved_env = self.env.clone();
        let saved_errorlevel = self.errorlevel;
        let saved_exit = self.exit_code.take();
        let batches = std::mem::take(&mut self.batch_stack);
        let saved_stdout = std::mem::replace(&mut self.handles.stdout, OutputHandle::File(Rc::new(file)));
        self.for_stack.push_empty();

        let result = self.execute_line(command);

        self.for_stack.pop();
        self.handles.flush();
        self.handles.stdout = saved_stdout;
        self.batch_stack = batches;
        self.exit_code = saved_exit;
        self.errorlevel = saved_errorlevel;
        self.env = saved_env;

        let output = fs::read(&path);
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "cannot remove capture file");
        }
        match result {
            // Leave the break pending for the loop that asked for the output.
            Ok(Completion::Interrupted) => self.interrupt.raise(),
            Ok(_) => {}
            Err(e) => self.report(&format_args!("{e:#}")),
        }
        Ok(split_lines(&output?))
    }

    fn execute_single(&mut self, text: &str) -> anyhow::Result<Completion> {
        if self.interrupt.is_raised() {
            self.interrupt.clear();
            self.report(&CmdError::Interrupted);
            return Ok(Completion::Interrupted);
        }
        // Labels are GOTO targets, not commands.
        if text.trim_start().starts_with(':') {
            return Ok(Completion::Code(NO_ERROR));
        }
        let line = expansion::expand_at_execute(text, self);
        debug!(command = %line, "execute");
        self.dispatch(&line)
    }

    /// Runs one expanded command line: a builtin, a batch file or a program.
    pub(crate) fn dispatch(&mut self, line: &str) -> anyhow::Result<Completion> {
        let line = line.trim_start_matches([' ', '\t', '@']);
        if line.trim().is_empty() {
            return Ok(Completion::Code(NO_ERROR));
        }
        if let Some(drive) = builtin::drive_change(line) {
            return self.change_drive(drive);
        }
        match builtin::lookup(line) {
            // `name.ext` prefers a program of that name over the builtin.
            Some((_, args)) if args.starts_with('.') && self.resolve_program(params::split_first(line).0).is_some() => {
                self.run_program(line, false)
            }
            Some((command, args)) => self.run_builtin(command, args),
            None => self.run_program(line, false),
        }
    }

    /// Runs a batch file or launches a program.
    pub(crate) fn run_program(&mut self, line: &str, called: bool) -> anyhow::Result<Completion> {
        let (word, args) = params::split_first(line);
        let name = params::remove_quotes(word);
        let Some(path) = self.resolve_program(&name) else {
            return Ok(self.fail(&CmdError::NotRecognized(name), CANT_LAUNCH));
        };
        if external::is_batch_file(&path) {
            return self.run_batch(&path, line, called, None);
        }

        let wait = called || !self.batch_stack.is_empty() || !external::is_gui_program(&path);
        debug!(program = %path.display(), wait, "launching");
        let outcome = ExternalCommand::new(path, args).execute(&mut self.handles, &self.env, wait, &self.interrupt);
        match outcome {
            Ok(Outcome::Exited(code)) => {
                self.errorlevel = code;
                Ok(Completion::Code(code))
            }
            Ok(Outcome::Detached) => {
                self.errorlevel = NO_ERROR;
                Ok(Completion::Code(NO_ERROR))
            }
            Ok(Outcome::Interrupted) => {
                self.interrupt.clear();
                self.report(&CmdError::Interrupted);
                Ok(Completion::Interrupted)
            }
            Err(e) => Ok(self.fail(&format_args!("{name}: {e}"), CANT_LAUNCH)),
        }
    }
}

fn strip_pair(text: &str, quote: char) -> Option<&str> {
    text.strip_prefix(quote)?.strip_suffix(quote)
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes).lines().map(str::to_string).collect()
}
