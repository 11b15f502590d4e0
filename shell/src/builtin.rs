//! Commands implemented inside the interpreter.
//!
//! Names are matched through a closed table; `name /?` prints the command's help
//! before the command itself sees its arguments.

use crate::command::{Completion, ERROR_INVALID_FUNCTION, ExitCode, NO_ERROR, wrap_exit_code};
use crate::env::Environment;
use crate::error::{CmdError, ParsingError};
use crate::expansion;
use crate::interpreter::{Interpreter, LocalScope};
use crate::io_adapters::LineWait;
use crate::params::{self, PARAM_DELIMS, WHITESPACE};
use crate::tilde::PathPieces;
use anyhow::Result;
use argh::{EarlyExit, FromArgs};
use regex::{Regex, RegexBuilder};
use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use tracing::debug;

pub const VERSION_TEXT: &str = concat!("cmd-shell [Version ", env!("CARGO_PKG_VERSION"), "]");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Call,
    Cd,
    Echo,
    EndLocal,
    Exit,
    Find,
    Goto,
    Help,
    Path,
    Pause,
    Rem,
    Set,
    SetLocal,
    Shift,
    Type,
    Ver,
}

const NAMES: &[(&str, Builtin)] = &[
    ("CALL", Builtin::Call),
    ("CD", Builtin::Cd),
    ("CHDIR", Builtin::Cd),
    ("ECHO", Builtin::Echo),
    ("ENDLOCAL", Builtin::EndLocal),
    ("EXIT", Builtin::Exit),
    ("FIND", Builtin::Find),
    ("GOTO", Builtin::Goto),
    ("HELP", Builtin::Help),
    ("PATH", Builtin::Path),
    ("PAUSE", Builtin::Pause),
    ("REM", Builtin::Rem),
    ("SET", Builtin::Set),
    ("SETLOCAL", Builtin::SetLocal),
    ("SHIFT", Builtin::Shift),
    ("TYPE", Builtin::Type),
    ("VER", Builtin::Ver),
];

/// Help topics: name, one-line summary, usage.
const HELP: &[(&str, &str, &str)] = &[
    ("CALL", "Calls one batch program from another.", "CALL [drive:][path]filename [batch-parameters]\nCALL :label arguments"),
    ("CD", "Displays the name of or changes the current directory.", "CHDIR [/D] [drive:][path]\nCD [/D] [drive:][path]"),
    ("CHDIR", "Displays the name of or changes the current directory.", "CHDIR [/D] [drive:][path]"),
    ("ECHO", "Displays messages, or turns command echoing on or off.", "ECHO [ON | OFF]\nECHO [message]\nECHO."),
    ("ENDLOCAL", "Ends localization of environment changes in a batch file.", "ENDLOCAL"),
    ("EXIT", "Quits the command interpreter or the current batch script.", "EXIT [/B] [exitCode]"),
    ("FIND", "Searches for a text string in a file or files.", "FIND [/V] [/C] [/N] [/I] \"string\" [[drive:][path]filename[ ...]]"),
    ("FOR", "Runs a specified command for each item in a set.", "FOR %variable IN (set) DO command [command-parameters]\nFOR /D %variable IN (set) DO command\nFOR /R [[drive:]path] %variable IN (set) DO command\nFOR /L %variable IN (start,step,end) DO command\nFOR /F [\"options\"] %variable IN (file-set | \"string\" | 'command') DO command"),
    ("GOTO", "Directs the command interpreter to a labeled line in a batch program.", "GOTO label\nGOTO :EOF"),
    ("HELP", "Provides Help information for builtin commands.", "HELP [command]"),
    ("IF", "Performs conditional processing in batch programs.", "IF [NOT] ERRORLEVEL number command\nIF [/I] [NOT] string1==string2 command\nIF [/I] string1 compare-op string2 command\nIF [NOT] EXIST filename command\nIF [NOT] DEFINED variable command\n\nwhere compare-op is one of EQU NEQ LSS LEQ GTR GEQ"),
    ("PATH", "Displays or sets a search path for executable files.", "PATH [[drive:]path[;...][;%PATH%]]\nPATH ;"),
    ("PAUSE", "Suspends processing of a batch file and displays a message.", "PAUSE"),
    ("REM", "Records comments (remarks) in batch files.", "REM [comment]"),
    ("SET", "Displays, sets, or removes environment variables.", "SET [variable=[string]]\nSET \"variable=string\"\nSET /P variable=[promptString]"),
    ("SETLOCAL", "Begins localization of environment changes in a batch file.", "SETLOCAL [ENABLEDELAYEDEXPANSION | DISABLEDELAYEDEXPANSION] [ENABLEEXTENSIONS | DISABLEEXTENSIONS]"),
    ("SHIFT", "Shifts the position of replaceable parameters in batch files.", "SHIFT [/n]"),
    ("TYPE", "Displays the contents of a text file.", "TYPE [drive:][path]filename"),
    ("VER", "Displays the interpreter version.", "VER"),
];

impl Builtin {
    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(_, builtin)| *builtin == self)
            .map(|(name, _)| *name)
            .unwrap_or("")
    }
}

/// Matches the first word of `line` against the builtin table.
///
/// Returns the builtin and the text after its name, starting at the terminator.
pub fn lookup(line: &str) -> Option<(Builtin, &str)> {
    let end = line
        .find(|c: char| c.is_whitespace() || "+./(;=:,".contains(c))
        .unwrap_or(line.len());
    let word = &line[..end];
    NAMES
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(word))
        .map(|&(_, builtin)| (builtin, &line[end..]))
}

/// `X:` on its own switches drives.
pub fn drive_change(line: &str) -> Option<char> {
    match line.trim().as_bytes() {
        [letter, b':'] if letter.is_ascii_alphabetic() => Some(letter.to_ascii_uppercase() as char),
        _ => None,
    }
}

/// Help for a builtin or for IF/FOR, `None` for anything else.
pub fn help_text(topic: &str) -> Option<String> {
    HELP.iter()
        .find(|(name, _, _)| name.eq_ignore_ascii_case(topic))
        .map(|(_, summary, usage)| format!("{summary}\n\n{usage}"))
}

/// Strips the qualifier `switch` (e.g. `/B`) from the start of `args`.
fn strip_switch<'a>(args: &'a str, switch: &str) -> Option<&'a str> {
    let head = args.get(..switch.len())?;
    let rest = &args[switch.len()..];
    (head.eq_ignore_ascii_case(switch) && (rest.is_empty() || rest.starts_with([' ', '\t'])))
        .then_some(rest)
}

/// Builtins whose arguments are parsed with [`argh`] once `/X` switches are
/// translated to `-x` flags.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    fn name() -> &'static str;

    /// Runs the command; 0 is success.
    fn execute(self, stdin: &mut dyn Read, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode>;
}

/// Converts a batch-style argument string into argh arguments.
///
/// Single-letter qualifiers become lowercase short flags, everything else is a
/// positional with its quotes removed.
fn argh_args(args: &str) -> Vec<String> {
    let mut flags = Vec::new();
    let mut positionals = Vec::new();
    for param in params::split(args, WHITESPACE) {
        let mut chars = param.text.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some('/'), Some(c), None) if c.is_ascii_alphabetic() => flags.push(format!("-{}", c.to_ascii_lowercase())),
            _ => positionals.push(params::remove_quotes(param.text)),
        }
    }
    flags.push("--".to_string());
    flags.extend(positionals);
    flags
}

#[derive(FromArgs)]
/// Display the contents of text files.
pub struct Type {
    #[argh(positional, greedy)]
    /// files to display.
    pub files: Vec<String>,
}

impl BuiltinCommand for Type {
    fn name() -> &'static str {
        "type"
    }

    fn execute(self, _stdin: &mut dyn Read, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        if self.files.is_empty() {
            return Err(ParsingError::UnexpectedEnd.into());
        }
        for name in self.files {
            let mut file =
                fs::File::open(env.resolve(&name)).map_err(|_| CmdError::FileNotFound { path: name.clone() })?;
            std::io::copy(&mut file, stdout)?;
        }
        Ok(NO_ERROR)
    }
}

#[derive(FromArgs)]
/// Search for a text string in files or standard input.
pub struct Find {
    #[argh(switch, short = 'v')]
    /// display the lines that do not contain the string.
    pub invert: bool,

    #[argh(switch, short = 'c')]
    /// display only the number of matching lines.
    pub count: bool,

    #[argh(switch, short = 'n')]
    /// prefix each line with its line number.
    pub line_numbers: bool,

    #[argh(switch, short = 'i')]
    /// ignore case distinctions.
    pub ignore_case: bool,

    #[argh(positional)]
    /// the text to search for, matched literally.
    pub pattern: String,

    #[argh(positional, greedy)]
    /// files to search. If none provided, reads from stdin.
    pub files: Vec<String>,
}

impl Find {
    /// Writes the selected lines of `reader`; returns how many were selected.
    fn search(&self, reader: &mut dyn Read, stdout: &mut dyn Write, file_name: Option<&str>, re: &Regex) -> Result<usize> {
        if let Some(name) = file_name.filter(|_| !self.count) {
            write!(stdout, "\n---------- {}\n", name.to_uppercase())?;
        }
        let reader = BufReader::new(reader);
        let mut selected = 0;
        for (index, line) in reader.split(b'\n').enumerate() {
            let bytes = line?;
            let line = String::from_utf8_lossy(&bytes);
            let line = line.trim_end_matches('\r');
            if re.is_match(line) == self.invert {
                continue;
            }
            selected += 1;
            if self.count {
                continue;
            }
            if self.line_numbers {
                writeln!(stdout, "[{}]{line}", index + 1)?;
            } else {
                writeln!(stdout, "{line}")?;
            }
        }
        if self.count {
            match file_name {
                Some(name) => writeln!(stdout, "---------- {}: {selected}", name.to_uppercase())?,
                None => writeln!(stdout, "{selected}")?,
            }
        }
        Ok(selected)
    }
}

impl BuiltinCommand for Find {
    fn name() -> &'static str {
        "find"
    }

    fn execute(self, stdin: &mut dyn Read, stdout: &mut dyn Write, env: &mut Environment) -> Result<ExitCode> {
        let re = RegexBuilder::new(&regex::escape(&self.pattern))
            .case_insensitive(self.ignore_case)
            .build()?;

        let mut selected = 0;
        if self.files.is_empty() {
            selected = self.search(stdin, stdout, None, &re)?;
        } else {
            let mut missing = None;
            for name in &self.files {
                match fs::File::open(env.resolve(name)) {
                    Ok(mut file) => selected += self.search(&mut file, stdout, Some(name), &re)?,
                    Err(_) => missing = Some(name.clone()),
                }
            }
            if let Some(path) = missing {
                return Err(CmdError::FileNotFound { path }.into());
            }
        }
        Ok(if selected > 0 { NO_ERROR } else { ERROR_INVALID_FUNCTION })
    }
}

impl Interpreter {
    /// Runs a builtin with the text that followed its name.
    pub(crate) fn run_builtin(&mut self, builtin: Builtin, args: &str) -> Result<Completion> {
        if params::nth(args, 0, WHITESPACE) == Some("/?") {
            if let Some(text) = help_text(builtin.name()) {
                writeln!(self.handles.stdout, "{text}")?;
            }
            return Ok(Completion::Code(NO_ERROR));
        }
        debug!(builtin = builtin.name(), args, "builtin");
        match builtin {
            Builtin::Call => self.call(args),
            Builtin::Cd => self.change_dir(args),
            Builtin::Echo => self.echo(args),
            Builtin::EndLocal => Ok(self.end_local()),
            Builtin::Exit => Ok(self.exit(args)),
            Builtin::Find => Ok(self.run_argh::<Find>(args)),
            Builtin::Goto => self.goto(args),
            Builtin::Help => self.help(args),
            Builtin::Path => self.path(args),
            Builtin::Pause => self.pause(),
            Builtin::Rem => Ok(Completion::Code(NO_ERROR)),
            Builtin::Set => self.set(args),
            Builtin::SetLocal => Ok(self.set_local(args)),
            Builtin::Shift => Ok(self.shift(args)),
            Builtin::Type => Ok(self.run_argh::<Type>(args)),
            Builtin::Ver => {
                writeln!(self.handles.stdout)?;
                writeln!(self.handles.stdout, "{VERSION_TEXT}")?;
                Ok(Completion::Code(NO_ERROR))
            }
        }
    }

    fn run_argh<T: BuiltinCommand>(&mut self, args: &str) -> Completion {
        let argv = argh_args(args);
        let argv: Vec<&str> = argv.iter().map(String::as_str).collect();
        let code = match T::from_args(&[T::name()], &argv) {
            Ok(command) => {
                let handles = &mut self.handles;
                match command.execute(&mut handles.stdin, &mut handles.stdout, &mut self.env) {
                    Ok(code) => code,
                    Err(e) => {
                        let _ = writeln!(handles.stderr, "{e:#}");
                        ERROR_INVALID_FUNCTION
                    }
                }
            }
            Err(EarlyExit { output, status }) => {
                let _ = writeln!(self.handles.stderr, "{}", output.trim_end());
                if status.is_err() { ERROR_INVALID_FUNCTION } else { NO_ERROR }
            }
        };
        self.errorlevel = code;
        Completion::Code(code)
    }

    fn call(&mut self, args: &str) -> Result<Completion> {
        let args = args.trim_start_matches([' ', '\t']);
        if let Some(label) = args.strip_prefix(':').filter(|_| self.extensions) {
            let Some(top) = self.batch_stack.last() else {
                return Ok(self.fail(&CmdError::LabelOutsideBatch, ERROR_INVALID_FUNCTION));
            };
            let (path, position) = (top.path.clone(), top.position);
            let name = params::nth(label, 0, PARAM_DELIMS).unwrap_or_default();
            return self.run_batch(&path, args, true, Some((name, position)));
        }
        let line = expansion::expand_at_execute(args, self);
        let line = line.trim_start();
        if line.is_empty() {
            return Ok(Completion::Code(NO_ERROR));
        }
        if lookup(line).is_some() || drive_change(line).is_some() {
            return self.dispatch(line);
        }
        self.run_program(line, true)
    }

    fn change_dir(&mut self, args: &str) -> Result<Completion> {
        let args = args.trim_start_matches([' ', '\t']);
        let args = strip_switch(args, "/D").unwrap_or(args);
        let target = params::remove_quotes(args);
        let target = target.trim();
        if target.is_empty() {
            writeln!(self.handles.stdout, "{}", self.env.current_dir.display())?;
            return Ok(Completion::Code(NO_ERROR));
        }
        let path = self.env.resolve(target);
        if !path.is_dir() {
            return Ok(self.fail(&CmdError::PathNotFound, ERROR_INVALID_FUNCTION));
        }
        let drive = PathPieces::split(&path).drive;
        if !drive.is_empty() {
            self.env
                .set_var(format!("={}", drive.to_ascii_uppercase()), path.to_string_lossy());
        }
        debug!(dir = %path.display(), "changed directory");
        self.env.current_dir = path;
        Ok(Completion::Code(NO_ERROR))
    }

    /// Switches to the last directory visited on `drive`.
    pub(crate) fn change_drive(&mut self, drive: char) -> Result<Completion> {
        let current = PathPieces::split(&self.env.current_dir).drive;
        if current.eq_ignore_ascii_case(&format!("{drive}:")) {
            return Ok(Completion::Code(NO_ERROR));
        }
        let target = self
            .env
            .get_var(&format!("={drive}:"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(format!("{drive}:\\")));
        if !target.is_dir() {
            return Ok(self.fail(&CmdError::DriveNotFound, ERROR_INVALID_FUNCTION));
        }
        self.env.current_dir = target;
        Ok(Completion::Code(NO_ERROR))
    }

    fn echo(&mut self, args: &str) -> Result<Completion> {
        let mut chars = args.chars();
        let text = match chars.next() {
            None => None,
            Some(' ' | '\t') => {
                let text = chars.as_str();
                match text.trim() {
                    "" => None,
                    word if word.eq_ignore_ascii_case("on") => {
                        self.echo_mode = true;
                        return Ok(Completion::Code(NO_ERROR));
                    }
                    word if word.eq_ignore_ascii_case("off") => {
                        self.echo_mode = false;
                        return Ok(Completion::Code(NO_ERROR));
                    }
                    _ => Some(text),
                }
            }
            // `ECHO.`, `ECHO(` and friends: the separator is dropped.
            Some(_) => Some(chars.as_str()),
        };
        match text {
            Some(text) => writeln!(self.handles.stdout, "{text}")?,
            None => {
                let state = if self.echo_mode { "on" } else { "off" };
                writeln!(self.handles.stdout, "ECHO is {state}.")?;
            }
        }
        Ok(Completion::Code(NO_ERROR))
    }

    fn end_local(&mut self) -> Completion {
        let owned = match (self.current_batch_id(), self.locals.last()) {
            (Some(id), Some(scope)) => scope.batch_id == id,
            _ => false,
        };
        if owned {
            if let Some(scope) = self.locals.pop() {
                self.restore_local(scope);
            }
        }
        Completion::Code(NO_ERROR)
    }

    fn exit(&mut self, args: &str) -> Completion {
        let args = args.trim();
        let (batch_only, rest) = match strip_switch(args, "/B") {
            Some(rest) => (true, rest),
            None => (false, args),
        };
        let code = match params::nth(rest, 0, WHITESPACE) {
            Some(text) => expansion::parse_integer(text).map(wrap_exit_code).unwrap_or(NO_ERROR),
            None => self.errorlevel,
        };
        self.errorlevel = code;
        if batch_only {
            if let Some(top) = self.batch_stack.last_mut() {
                top.skip_rest = true;
                return Completion::Exited;
            }
        }
        self.exit_code = Some(code);
        Completion::Aborted
    }

    fn goto(&mut self, args: &str) -> Result<Completion> {
        let Some(batch) = self.batch_stack.last_mut() else {
            return Ok(Completion::Code(NO_ERROR));
        };
        let target = params::nth(args, 0, PARAM_DELIMS).unwrap_or_default();
        // Without extensions `:eof` is an ordinary label.
        if self.extensions && target.eq_ignore_ascii_case(":eof") {
            batch.skip_rest = true;
            return Ok(Completion::Goto);
        }
        let label = target.trim_start_matches(':');
        if !label.is_empty() && batch.find_label(label)? {
            debug!(label, position = batch.position, "goto");
            return Ok(Completion::Goto);
        }
        batch.skip_rest = true;
        self.fail(&CmdError::LabelNotFound(label.to_string()), ERROR_INVALID_FUNCTION);
        Ok(Completion::Goto)
    }

    fn help(&mut self, args: &str) -> Result<Completion> {
        match params::nth(args, 0, WHITESPACE) {
            None => {
                writeln!(self.handles.stdout, "For more information on a specific command, type HELP command-name")?;
                for (name, summary, _) in HELP {
                    writeln!(self.handles.stdout, "{name:<12}{summary}")?;
                }
            }
            Some(topic) => match help_text(topic) {
                Some(text) => writeln!(self.handles.stdout, "{text}")?,
                None => writeln!(
                    self.handles.stdout,
                    "This command is not supported by the help utility.  Try \"{topic} /?\"."
                )?,
            },
        }
        Ok(Completion::Code(NO_ERROR))
    }

    fn path(&mut self, args: &str) -> Result<Completion> {
        let value = args.trim_start_matches([' ', '\t', '=']).trim_end();
        match value {
            "" => match self.env.get_var("PATH") {
                Some(path) => writeln!(self.handles.stdout, "PATH={path}")?,
                None => writeln!(self.handles.stdout, "No Path")?,
            },
            ";" => {
                self.env.remove_var("PATH");
            }
            _ => self.env.set_var("PATH", value),
        }
        Ok(Completion::Code(NO_ERROR))
    }

    fn pause(&mut self) -> Result<Completion> {
        write!(self.handles.stdout, "Press any key to continue . . . ")?;
        self.handles.stdout.flush()?;
        let line = self.handles.stdin.read_line_or_break(&self.interrupt);
        writeln!(self.handles.stdout)?;
        if line? == LineWait::Interrupted {
            return Ok(self.interrupted());
        }
        Ok(Completion::Code(NO_ERROR))
    }

    fn interrupted(&mut self) -> Completion {
        self.interrupt.clear();
        self.report(&CmdError::Interrupted);
        Completion::Interrupted
    }

    fn set(&mut self, args: &str) -> Result<Completion> {
        let args = args.trim_start_matches([' ', '\t']);
        if args.is_empty() {
            return self.list_variables("");
        }
        if self.extensions {
            if strip_switch(args, "/A").is_some() {
                return Ok(self.fail(&CmdError::Unsupported("SET /A".to_string()), ERROR_INVALID_FUNCTION));
            }
            if let Some(rest) = strip_switch(args, "/P") {
                return self.set_from_input(rest.trim_start());
            }
        }
        let assignment = quoted_assignment(args);
        let Some((name, value)) = assignment.split_once('=') else {
            return self.list_variables(assignment.trim());
        };
        if name.is_empty() {
            return Ok(self.fail(&ParsingError::UnexpectedEnd, ERROR_INVALID_FUNCTION));
        }
        if value.is_empty() {
            self.env.remove_var(name);
        } else {
            self.env.set_var(name, value);
        }
        Ok(Completion::Code(NO_ERROR))
    }

    /// Prints `name=value` for every variable whose name starts with `prefix`.
    fn list_variables(&mut self, prefix: &str) -> Result<Completion> {
        let prefix = prefix.to_lowercase();
        let lines: Vec<String> = self
            .env
            .sorted_vars()
            .into_iter()
            .filter(|(name, _)| !name.starts_with('=') && name.to_lowercase().starts_with(&prefix))
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        if lines.is_empty() {
            return Ok(self.fail(&CmdError::VariableNotDefined(prefix), ERROR_INVALID_FUNCTION));
        }
        for line in lines {
            writeln!(self.handles.stdout, "{line}")?;
        }
        Ok(Completion::Code(NO_ERROR))
    }

    /// `SET /P name=prompt`: assigns a line read from standard input.
    fn set_from_input(&mut self, args: &str) -> Result<Completion> {
        let Some((name, prompt)) = quoted_assignment(args).split_once('=') else {
            return Ok(self.fail(&ParsingError::UnexpectedEnd, ERROR_INVALID_FUNCTION));
        };
        write!(self.handles.stdout, "{}", params::unquote(prompt))?;
        self.handles.stdout.flush()?;
        match self.handles.stdin.read_line_or_break(&self.interrupt)? {
            LineWait::Interrupted => {
                writeln!(self.handles.stdout)?;
                Ok(self.interrupted())
            }
            LineWait::Line(line) if !line.is_empty() => {
                self.env.set_var(name, line);
                Ok(Completion::Code(NO_ERROR))
            }
            _ => {
                self.errorlevel = ERROR_INVALID_FUNCTION;
                Ok(Completion::Code(ERROR_INVALID_FUNCTION))
            }
        }
    }

    fn set_local(&mut self, args: &str) -> Completion {
        let Some(batch_id) = self.current_batch_id() else {
            return Completion::Code(NO_ERROR);
        };
        self.locals.push(LocalScope {
            batch_id,
            env: self.env.clone(),
            delayed_expansion: self.delayed_expansion,
            extensions: self.extensions,
        });
        for word in params::split(args, PARAM_DELIMS) {
            match word.text.to_ascii_uppercase().as_str() {
                "ENABLEDELAYEDEXPANSION" => self.delayed_expansion = true,
                "DISABLEDELAYEDEXPANSION" => self.delayed_expansion = false,
                "ENABLEEXTENSIONS" => self.extensions = true,
                "DISABLEEXTENSIONS" => self.extensions = false,
                _ => {}
            }
        }
        Completion::Code(NO_ERROR)
    }

    fn shift(&mut self, args: &str) -> Completion {
        let from = params::nth(args, 0, WHITESPACE)
            .and_then(|word| word.strip_prefix('/'))
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n < 9)
            .unwrap_or(0);
        if let Some(batch) = self.batch_stack.last_mut() {
            batch.shift(from);
        }
        Completion::Code(NO_ERROR)
    }
}

/// `"name=value" trailing` names the text between the outer quotes.
fn quoted_assignment(args: &str) -> &str {
    match (args.strip_prefix('"'), args.rfind('"')) {
        (Some(_), Some(last)) if last > 0 => &args[1..last],
        _ => args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::{InputHandle, MemBuffer, OutputHandle, StdHandles};
    use std::io::Cursor;
    use std::path::Path;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn make_unique_temp_dir(tag: &str) -> std::io::Result<PathBuf> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let p = std::env::temp_dir().join(format!("builtin_{tag}_{}_{}", std::process::id(), nanos));
        fs::create_dir_all(&p)?;
        Ok(p)
    }

    fn interpreter(dir: &Path, input: &str) -> (Interpreter, MemBuffer, MemBuffer) {
        let (stdout, out) = OutputHandle::with_handle();
        let (stderr, err) = OutputHandle::with_handle();
        let handles = StdHandles {
            stdin: InputHandle::from_bytes(input),
            stdout,
            stderr,
        };
        let mut env = Environment::empty(dir);
        env.set_var("PATH", "");
        (Interpreter::with_handles(env, handles), out, err)
    }

    fn text(buf: &MemBuffer) -> String {
        String::from_utf8_lossy(&buf.borrow()).into_owned()
    }

    #[test]
    fn test_lookup_matches_whole_names() {
        assert_eq!(lookup("echo."), Some((Builtin::Echo, ".")));
        assert_eq!(lookup("cd.."), Some((Builtin::Cd, "..")));
        assert_eq!(lookup("ChDir /d x"), Some((Builtin::Cd, " /d x")));
        assert_eq!(lookup("ECHO"), Some((Builtin::Echo, "")));
        assert_eq!(lookup("goto:eof"), Some((Builtin::Goto, ":eof")));
        assert_eq!(lookup("echoes hi"), None);
        assert_eq!(lookup("notepad.exe"), None);
        assert_eq!(drive_change(" c: "), Some('C'));
        assert_eq!(drive_change("cd:"), None);
    }

    #[test]
    fn test_switches_translate_to_flags() {
        assert_eq!(argh_args(" /I /c \"a b\" file.txt"), vec!["-i", "-c", "--", "a b", "file.txt"]);
        assert_eq!(argh_args("-x"), vec!["--", "-x"]);
    }

    #[test]
    fn test_echo_forms() -> Result<(), anyhow::Error> {
        let dir = make_unique_temp_dir("echo")?;
        let (mut cmd, out, _) = interpreter(&dir, "");
        cmd.execute_line("echo hello  world")?;
        cmd.execute_line("echo.")?;
        cmd.execute_line("echo(on")?;
        cmd.execute_line("echo off")?;
        cmd.execute_line("echo")?;
        assert_eq!(text(&out), "hello  world\n\non\nECHO is off.\n");
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_type_reads_file() -> Result<(), anyhow::Error> {
        let dir = make_unique_temp_dir("type")?;
        fs::write(dir.join("data.txt"), "hello\nworld\n")?;
        let mut env = Environment::empty(&dir);

        let mut out = Vec::new();
        let command = Type {
            files: vec!["data.txt".to_string()],
        };
        assert_eq!(command.execute(&mut Cursor::new(Vec::new()), &mut out, &mut env)?, 0);
        assert_eq!(String::from_utf8(out)?, "hello\nworld\n");

        let missing = Type {
            files: vec!["nope.txt".to_string()],
        };
        assert!(missing.execute(&mut Cursor::new(Vec::new()), &mut Vec::new(), &mut env).is_err());
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_find_ignore_case_in_file() -> Result<(), anyhow::Error> {
        let dir = make_unique_temp_dir("find")?;
        fs::write(dir.join("data.txt"), "Target 1\r\nTaRgEt 2\nNo match\n")?;
        let mut env = Environment::empty(&dir);

        let mut out = Vec::new();
        let find = Find {
            invert: false,
            count: false,
            line_numbers: true,
            ignore_case: true,
            pattern: "target".to_string(),
            files: vec!["data.txt".to_string()],
        };
        assert_eq!(find.execute(&mut Cursor::new(Vec::new()), &mut out, &mut env)?, 0);
        assert_eq!(String::from_utf8(out)?, "\n---------- DATA.TXT\n[1]Target 1\n[2]TaRgEt 2\n");
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_find_stdin_count_and_invert() -> Result<(), anyhow::Error> {
        let mut env = Environment::empty("/");
        let input = b"a.b\naxb\nnothing\n".to_vec();

        let mut out = Vec::new();
        let find = Find {
            invert: true,
            count: true,
            line_numbers: false,
            ignore_case: false,
            pattern: "a.b".to_string(),
            files: Vec::new(),
        };
        assert_eq!(find.execute(&mut Cursor::new(input), &mut out, &mut env)?, 0);
        // The pattern is literal: only "a.b" matches, so two lines are inverted in.
        assert_eq!(String::from_utf8(out)?, "2\n");
        Ok(())
    }

    #[test]
    fn test_find_through_dispatch_sets_errorlevel() -> Result<(), anyhow::Error> {
        let dir = make_unique_temp_dir("find_dispatch")?;
        let (mut cmd, out, err) = interpreter(&dir, "alpha\nbeta\n");
        cmd.execute_line("find /i \"BETA\"")?;
        assert_eq!(text(&out), "beta\n");
        assert_eq!(cmd.errorlevel(), 0);
        cmd.execute_line("find \"gamma\" missing.txt")?;
        assert!(text(&err).contains("missing.txt"));
        assert_eq!(cmd.errorlevel(), 1);
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_set_forms() -> Result<(), anyhow::Error> {
        let dir = make_unique_temp_dir("set")?;
        let (mut cmd, out, err) = interpreter(&dir, "typed\n");
        cmd.execute_line("set ALPHA=1")?;
        cmd.execute_line("set \"ALPHABET=a b\" ignored")?;
        cmd.execute_line("set alp")?;
        assert_eq!(text(&out), "ALPHA=1\nALPHABET=a b\n");

        cmd.execute_line("set ALPHA=")?;
        assert_eq!(cmd.env().get_var("ALPHA"), None);

        cmd.execute_line("set zzz")?;
        assert!(text(&err).contains("Environment variable zzz not defined"));
        assert_eq!(cmd.errorlevel(), 1);

        cmd.execute_line("set /a X=1+1")?;
        assert!(text(&err).contains("SET /A is not supported."));

        out.borrow_mut().clear();
        cmd.execute_line("set /p ANSWER=Name? ")?;
        assert_eq!(text(&out), "Name? ");
        assert_eq!(cmd.env().get_var("answer").as_deref(), Some("typed"));
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_cd_changes_logical_directory() -> Result<(), anyhow::Error> {
        let dir = make_unique_temp_dir("cd")?;
        fs::create_dir(dir.join("sub dir"))?;
        let (mut cmd, out, err) = interpreter(&dir, "");
        cmd.execute_line("cd sub dir")?;
        assert_eq!(cmd.env().current_dir, dir.join("sub dir"));
        cmd.execute_line("cd..")?;
        assert_eq!(cmd.env().current_dir, dir);
        cmd.execute_line("cd /d \"sub dir\"")?;
        cmd.execute_line("cd")?;
        assert_eq!(text(&out), format!("{}\n", dir.join("sub dir").display()));

        cmd.execute_line("cd nowhere")?;
        assert!(text(&err).contains("The system cannot find the path specified."));
        assert_eq!(cmd.errorlevel(), 1);
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_help_and_question_mark() -> Result<(), anyhow::Error> {
        let dir = make_unique_temp_dir("help")?;
        let (mut cmd, out, _) = interpreter(&dir, "");
        cmd.execute_line("type /?")?;
        assert!(text(&out).starts_with("Displays the contents of a text file."));

        out.borrow_mut().clear();
        cmd.execute_line("if /?")?;
        assert!(text(&out).contains("IF [NOT] EXIST filename command"));

        out.borrow_mut().clear();
        cmd.execute_line("help")?;
        assert!(text(&out).contains("SETLOCAL"));
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_exit_and_path() -> Result<(), anyhow::Error> {
        let dir = make_unique_temp_dir("exit")?;
        let (mut cmd, out, _) = interpreter(&dir, "");
        cmd.execute_line("path ;")?;
        cmd.execute_line("path")?;
        cmd.execute_line("path=/bin")?;
        assert_eq!(cmd.env().get_var("PATH").as_deref(), Some("/bin"));
        let completion = cmd.execute_line("exit /b 3 & echo unreachable")?;
        assert_eq!(completion, Completion::Aborted);
        assert_eq!(cmd.exit_code(), Some(3));
        assert_eq!(text(&out), "No Path\n");
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_pause_reads_a_line() -> Result<(), anyhow::Error> {
        let dir = make_unique_temp_dir("pause")?;
        let (mut cmd, out, _) = interpreter(&dir, "\n");
        assert_eq!(cmd.execute_line("pause")?, Completion::Code(0));
        assert_eq!(text(&out), "Press any key to continue . . . \n");
        fs::remove_dir_all(dir)?;
        Ok(())
    }

    #[test]
    fn test_pause_and_set_prompt_end_on_break() -> Result<(), anyhow::Error> {
        let dir = make_unique_temp_dir("pause_break")?;
        let (mut cmd, _, err) = interpreter(&dir, "never read\n");
        cmd.interrupt.raise();
        assert_eq!(cmd.pause()?, Completion::Interrupted);
        assert!(!cmd.interrupt.is_raised());
        assert!(text(&err).contains("^C"));

        cmd.interrupt.raise();
        assert_eq!(cmd.set_from_input("ANSWER=Name? ")?, Completion::Interrupted);
        assert_eq!(cmd.env().get_var("ANSWER"), None);
        assert_eq!(cmd.handles.stdin.read_line()?.as_deref(), Some("never read"));
        fs::remove_dir_all(dir)?;
        Ok(())
    }
}
