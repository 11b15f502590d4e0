//! Standard handles as seen by commands: the inherited console streams, files
//! opened by redirection, the null device, or in-memory buffers used by tests
//! and output capture.
//!
//! Handles are cheap to clone; clones share the underlying file or buffer, which
//! is what `2>&1` style duplication needs.

use rand::Rng;
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Result as IoResult, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::rc::Rc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::signal::BreakSignal;

const LINE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Shared in-memory output buffer.
pub type MemBuffer = Rc<RefCell<Vec<u8>>>;

#[derive(Debug, Clone)]
pub enum OutputHandle {
    Stdout,
    Stderr,
    Null,
    File(Rc<File>),
    Memory(MemBuffer),
}

impl OutputHandle {
    /// Convenience: create a memory handle and return (handle, buffer).
    pub fn with_handle() -> (Self, MemBuffer) {
        let buf: MemBuffer = Rc::new(RefCell::new(Vec::new()));
        (OutputHandle::Memory(buf.clone()), buf)
    }

    /// The [`Stdio`] to hand to a child process, and whether its output must be
    /// captured and copied back into this handle.
    pub fn stdio(&self) -> IoResult<(Stdio, bool)> {
        Ok(match self {
            OutputHandle::Stdout => (Stdio::inherit(), false),
            OutputHandle::Stderr => (io::stderr().into(), false),
            OutputHandle::Null => (Stdio::null(), false),
            OutputHandle::File(f) => (f.try_clone()?.into(), false),
            OutputHandle::Memory(_) => (Stdio::piped(), true),
        })
    }
}

impl Write for OutputHandle {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        match self {
            OutputHandle::Stdout => io::stdout().write(data),
            OutputHandle::Stderr => io::stderr().write(data),
            OutputHandle::Null => Ok(data.len()),
            OutputHandle::File(f) => (&**f).write(data),
            OutputHandle::Memory(buf) => {
                buf.borrow_mut().extend_from_slice(data);
                Ok(data.len())
            }
        }
    }

    fn flush(&mut self) -> IoResult<()> {
        match self {
            OutputHandle::Stdout => io::stdout().flush(),
            OutputHandle::Stderr => io::stderr().flush(),
            OutputHandle::File(f) => (&**f).flush(),
            OutputHandle::Null | OutputHandle::Memory(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum InputHandle {
    Stdin,
    Null,
    File(Rc<File>),
    Memory(Rc<RefCell<Cursor<Vec<u8>>>>),
}

impl InputHandle {
    /// Memory-backed reader holding `data`.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        InputHandle::Memory(Rc::new(RefCell::new(Cursor::new(data.into()))))
    }

    /// The [`Stdio`] for a child process, and the bytes that must be written to its
    /// piped stdin when the handle is memory-backed.
    pub fn stdio(&self) -> IoResult<(Stdio, Option<Vec<u8>>)> {
        Ok(match self {
            InputHandle::Stdin => (Stdio::inherit(), None),
            InputHandle::Null => (Stdio::null(), None),
            InputHandle::File(f) => (f.try_clone()?.into(), None),
            InputHandle::Memory(cursor) => {
                let mut rest = Vec::new();
                cursor.borrow_mut().read_to_end(&mut rest)?;
                (Stdio::piped(), Some(rest))
            }
        })
    }

    /// Reads one line without its terminator; `None` at end of input.
    pub fn read_line(&mut self) -> IoResult<Option<String>> {
        read_line_from(self)
    }

    /// Like [`InputHandle::read_line`], but gives up when `signal` is raised.
    ///
    /// Console reads happen on a helper thread so a Ctrl-C can end the wait even
    /// though the read itself cannot be cancelled.
    pub fn read_line_or_break(&mut self, signal: &BreakSignal) -> IoResult<LineWait> {
        if signal.is_raised() {
            return Ok(LineWait::Interrupted);
        }
        match self {
            InputHandle::Stdin => wait_for_line(signal, || read_line_from(&mut io::stdin())),
            _ => Ok(self.read_line()?.map_or(LineWait::Eof, LineWait::Line)),
        }
    }
}

/// Outcome of a line read that may be cut short by Ctrl-C.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineWait {
    Line(String),
    Eof,
    Interrupted,
}

fn read_line_from(reader: &mut impl Read) -> IoResult<Option<String>> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte)? {
            0 if bytes.is_empty() => return Ok(None),
            0 => break,
            _ if byte[0] == b'\n' => break,
            _ => bytes.push(byte[0]),
        }
    }
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Runs the blocking `read` on its own thread and polls `signal` until it delivers.
///
/// An interrupted read is left running; its line, if one ever arrives, is dropped.
pub fn wait_for_line<F>(signal: &BreakSignal, read: F) -> IoResult<LineWait>
where
    F: FnOnce() -> IoResult<Option<String>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(read());
    });
    loop {
        match rx.recv_timeout(LINE_POLL_INTERVAL) {
            Ok(result) => return Ok(result?.map_or(LineWait::Eof, LineWait::Line)),
            Err(RecvTimeoutError::Disconnected) => return Ok(LineWait::Eof),
            Err(RecvTimeoutError::Timeout) if signal.is_raised() => return Ok(LineWait::Interrupted),
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

impl Read for InputHandle {
    fn read(&mut self, out: &mut [u8]) -> IoResult<usize> {
        match self {
            InputHandle::Stdin => io::stdin().read(out),
            InputHandle::Null => Ok(0),
            InputHandle::File(f) => (&**f).read(out),
            InputHandle::Memory(cursor) => cursor.borrow_mut().read(out),
        }
    }
}

/// The three standard handles of the command being executed.
#[derive(Debug, Clone)]
pub struct StdHandles {
    pub stdin: InputHandle,
    pub stdout: OutputHandle,
    pub stderr: OutputHandle,
}

impl StdHandles {
    pub fn inherited() -> Self {
        Self {
            stdin: InputHandle::Stdin,
            stdout: OutputHandle::Stdout,
            stderr: OutputHandle::Stderr,
        }
    }

    /// Output handle for descriptor 1 or 2.
    pub fn output(&self, fd: u32) -> Option<&OutputHandle> {
        match fd {
            1 => Some(&self.stdout),
            2 => Some(&self.stderr),
            _ => None,
        }
    }

    pub fn flush(&mut self) {
        let _ = self.stdout.flush();
        let _ = self.stderr.flush();
    }
}

impl Default for StdHandles {
    fn default() -> Self {
        Self::inherited()
    }
}

/// Name of the null device as written in redirections.
pub fn is_null_device(name: &str) -> bool {
    name.eq_ignore_ascii_case("nul") || name.eq_ignore_ascii_case("nul:")
}

/// Creates a fresh `CMDxxxx.tmp` file in `dir`, open for reading and writing.
pub fn create_temp_file(dir: &Path) -> IoResult<(PathBuf, File)> {
    let mut rng = rand::thread_rng();
    for _ in 0..0x1000 {
        let path = dir.join(format!("CMD{:04X}.tmp", rng.gen_range(0..=0xFFFFu32)));
        match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "no unused temporary file name",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloned_memory_handles_share_buffer() {
        let (mut out, buf) = OutputHandle::with_handle();
        let mut dup = out.clone();
        write!(out, "a").unwrap();
        write!(dup, "b").unwrap();
        assert_eq!(&*buf.borrow(), b"ab");
    }

    #[test]
    fn input_reads_lines() {
        let mut input = InputHandle::from_bytes("one\r\ntwo");
        assert_eq!(input.read_line().unwrap().as_deref(), Some("one"));
        assert_eq!(input.read_line().unwrap().as_deref(), Some("two"));
        assert_eq!(input.read_line().unwrap(), None);
    }

    #[test]
    fn memory_input_reports_eof_and_break() {
        let signal = BreakSignal::new();
        let mut input = InputHandle::from_bytes("answer\n");
        assert_eq!(input.read_line_or_break(&signal).unwrap(), LineWait::Line("answer".into()));
        assert_eq!(input.read_line_or_break(&signal).unwrap(), LineWait::Eof);
        signal.raise();
        assert_eq!(input.read_line_or_break(&signal).unwrap(), LineWait::Interrupted);
    }

    #[test]
    fn stalled_read_ends_on_break() {
        let signal = BreakSignal::new();
        let raiser = signal.clone();
        let ticker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            raiser.raise();
        });
        let waited = wait_for_line(&signal, || {
            std::thread::sleep(Duration::from_secs(3600));
            Ok(None)
        });
        ticker.join().unwrap();
        assert_eq!(waited.unwrap(), LineWait::Interrupted);
    }

    #[test]
    fn delivered_line_wins_over_polling() {
        let signal = BreakSignal::new();
        let waited = wait_for_line(&signal, || Ok(Some("typed".to_string())));
        assert_eq!(waited.unwrap(), LineWait::Line("typed".into()));
    }

    #[test]
    fn temp_files_are_unique() {
        let dir = std::env::temp_dir();
        let (a, _fa) = create_temp_file(&dir).unwrap();
        let (b, _fb) = create_temp_file(&dir).unwrap();
        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("CMD") && name.ends_with(".tmp"));
        std::fs::remove_file(a).unwrap();
        std::fs::remove_file(b).unwrap();
    }
}
