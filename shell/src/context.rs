//! Runtime contexts: FOR-variable scopes and the batch-file call stack.

use crate::params::{self, PARAM_DELIMS};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Number of FOR variable slots: `a`-`z` then `A`-`Z`.
pub const FOR_VARIABLE_SLOTS: usize = 52;

/// Maps a FOR variable letter to its slot.
pub fn for_var_index(c: char) -> Option<usize> {
    match c {
        'a'..='z' => Some(c as usize - 'a' as usize),
        'A'..='Z' => Some(26 + c as usize - 'A' as usize),
        _ => None,
    }
}

/// Values of the FOR variables visible at one nesting level.
#[derive(Debug, Clone)]
pub struct ForContext {
    slots: [Option<Rc<str>>; FOR_VARIABLE_SLOTS],
}

impl ForContext {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.slots.get(index)?.as_deref()
    }

    pub fn set(&mut self, index: usize, value: Option<&str>) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = value.map(Rc::from);
        }
    }
}

impl Default for ForContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Stack of FOR contexts; the top one is current and the bottom one is never popped.
///
/// A FOR loop pushes a copy of the current context so that inner loops see the
/// outer variables, while CALL pushes an empty context so the callee sees none.
#[derive(Debug, Clone)]
pub struct ForStack {
    contexts: Vec<ForContext>,
}

impl ForStack {
    pub fn new() -> Self {
        Self {
            contexts: vec![ForContext::new()],
        }
    }

    pub fn push_copy(&mut self) {
        let top = self.current().clone();
        self.contexts.push(top);
    }

    pub fn push_empty(&mut self) {
        self.contexts.push(ForContext::new());
    }

    pub fn pop(&mut self) {
        if self.contexts.len() > 1 {
            self.contexts.pop();
        }
    }

    pub fn current(&self) -> &ForContext {
        &self.contexts[self.contexts.len() - 1]
    }

    pub fn current_mut(&mut self) -> &mut ForContext {
        let last = self.contexts.len() - 1;
        &mut self.contexts[last]
    }
}

impl Default for ForStack {
    fn default() -> Self {
        Self::new()
    }
}

/// One running batch file (or a `CALL :label` into one).
#[derive(Debug)]
pub struct BatchContext {
    /// The command line that started this context; parameter 0 is the batch name or label.
    pub command: String,
    pub path: PathBuf,
    file: File,
    /// Byte offset of the next line to read.
    pub position: u64,
    shift: [usize; 10],
    /// Set by `GOTO :EOF`, `EXIT /B` and a missing label: stop reading this file.
    pub skip_rest: bool,
    /// Started through CALL (and therefore returns to its caller).
    pub called: bool,
    /// Identifies SETLOCAL scopes owned by this context.
    pub id: u64,
}

impl BatchContext {
    pub fn open(path: &Path, command: &str, called: bool, id: u64) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            command: command.to_string(),
            path: path.to_path_buf(),
            file,
            position: 0,
            shift: [0; 10],
            skip_rest: false,
            called,
            id,
        })
    }

    /// Reads the physical line at the current position, without its line terminator.
    pub fn read_line(&mut self) -> io::Result<Option<String>> {
        self.file.seek(SeekFrom::Start(self.position))?;
        let mut reader = BufReader::new(&self.file);
        let mut buf = Vec::new();
        let read = reader.read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        self.position += read as u64;
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Parameter `n` (0-9) after applying SHIFT, with quotes kept.
    pub fn param(&self, n: usize) -> Option<String> {
        let index = n + self.shift.get(n).copied().unwrap_or(0);
        params::nth(&self.command, index, PARAM_DELIMS).map(str::to_string)
    }

    /// Everything after parameter 0, ignoring SHIFT.
    pub fn params_tail(&self) -> String {
        params::rest_after(&self.command, 0, PARAM_DELIMS).to_string()
    }

    /// Shifts parameters `from..=9` down by one.
    pub fn shift(&mut self, from: usize) {
        for offset in self.shift.iter_mut().skip(from) {
            *offset += 1;
        }
    }

    /// Moves to the line following `:label`, searching forward and wrapping once.
    pub fn find_label(&mut self, label: &str) -> io::Result<bool> {
        let origin = self.position;
        for (from, limit) in [(origin, None), (0, Some(origin))] {
            self.position = from;
            while limit.is_none_or(|end| self.position < end) {
                let Some(line) = self.read_line()? else { break };
                if label_name(&line).is_some_and(|name| name.eq_ignore_ascii_case(label)) {
                    return Ok(true);
                }
            }
        }
        self.position = origin;
        Ok(false)
    }
}

/// The label declared by a `:label` line, if it is one.
pub fn label_name(line: &str) -> Option<&str> {
    let rest = line.trim_start_matches([' ', '\t', '@']).strip_prefix(':')?;
    let rest = rest.trim_start_matches([':', ' ', '\t']);
    let end = rest
        .find(|c: char| c.is_whitespace() || "+&|<>".contains(c))
        .unwrap_or(rest.len());
    Some(&rest[..end])
}
