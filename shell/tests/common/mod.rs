#![allow(dead_code)]

use cmd_shell::io_adapters::MemBuffer;
use cmd_shell::{Environment, InputHandle, Interpreter, OutputHandle, StdHandles};
use std::fs;
use std::path::PathBuf;

/// An interpreter rooted in a scratch directory, writing to memory buffers.
pub struct Workspace {
    pub dir: PathBuf,
    pub cmd: Interpreter,
    out: MemBuffer,
    err: MemBuffer,
}

impl Workspace {
    pub fn new(tag: &str) -> Self {
        let dir = make_unique_temp_dir(tag);
        let (stdout, out) = OutputHandle::with_handle();
        let (stderr, err) = OutputHandle::with_handle();
        let handles = StdHandles {
            stdin: InputHandle::Null,
            stdout,
            stderr,
        };
        let mut env = Environment::empty(&dir);
        env.set_var("PATH", "");
        env.set_var("TEMP", dir.to_string_lossy());
        Self {
            cmd: Interpreter::with_handles(env, handles),
            dir,
            out,
            err,
        }
    }

    pub fn write(&self, name: &str, contents: &str) {
        fs::write(self.dir.join(name), contents).unwrap();
    }

    pub fn run(&mut self, text: &str) -> String {
        self.out.borrow_mut().clear();
        self.cmd.execute_line(text).unwrap();
        String::from_utf8_lossy(&self.out.borrow()).into_owned()
    }

    /// Output of `text` with trailing blanks removed from every line.
    pub fn run_trimmed(&mut self, text: &str) -> Vec<String> {
        self.run(text).lines().map(|l| l.trim_end().to_string()).collect()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.err.borrow()).into_owned()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn make_unique_temp_dir(tag: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!("cmd_shell_{tag}_{}_{nanos}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}
