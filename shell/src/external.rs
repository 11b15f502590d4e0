use crate::command::ExitCode;
use crate::env::Environment;
use crate::io_adapters::{OutputHandle, StdHandles};
use crate::params::{self, WHITESPACE};
use crate::signal::BreakSignal;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Output};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Extensions tried when PATHEXT is not set.
pub const DEFAULT_PATHEXT: &str = ".COM;.EXE;.BAT;.CMD";

/// PATHEXT split into extensions, re-parsed only when the variable's text changes.
#[derive(Debug, Default)]
pub struct PathExtCache {
    source: Option<String>,
    extensions: Vec<String>,
}

impl PathExtCache {
    pub fn extensions(&mut self, pathext: Option<&str>) -> &[String] {
        let text = pathext.unwrap_or(DEFAULT_PATHEXT);
        if self.source.as_deref() != Some(text) {
            self.extensions = text
                .split(';')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(|e| {
                    if e.starts_with('.') {
                        e.to_string()
                    } else {
                        format!(".{e}")
                    }
                })
                .collect();
            self.source = Some(text.to_string());
        }
        &self.extensions
    }
}

/// Resolve a command name the way the interpreter does.
///
/// Behavior:
/// - A name containing a path separator or drive is resolved against `cwd` only.
/// - A bare name is looked up in `cwd` first, then in each directory of `search_paths`.
/// - In each directory the name itself is tried first when it already has an
///   extension, then the name with each extension from `extensions` appended.
/// - Names compare case-insensitively.
pub fn find_command_path(
    name: &str,
    cwd: &Path,
    search_paths: Option<&str>,
    extensions: &[String],
) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let explicit = name.contains(['/', '\\']) || name.as_bytes().get(1) == Some(&b':');
    if explicit {
        let full = crate::env::resolve_path(cwd, name);
        let dir = full.parent()?;
        let file = full.file_name()?.to_string_lossy().into_owned();
        return find_in_dir(dir, &file, extensions);
    }
    if let Some(found) = find_in_dir(cwd, name, extensions) {
        return Some(found);
    }
    find_in_path(search_paths.unwrap_or_default(), name, cwd, extensions)
}

fn find_in_path(search_paths: &str, name: &str, cwd: &Path, extensions: &[String]) -> Option<PathBuf> {
    let separator = if cfg!(windows) { ';' } else { ':' };
    search_paths
        .split([';', separator])
        .filter(|dir| !dir.trim().is_empty())
        .map(|dir| crate::env::resolve_path(cwd, params::unquote(dir.trim())))
        .find_map(|dir| find_in_dir(&dir, name, extensions))
}

fn find_in_dir(dir: &Path, name: &str, extensions: &[String]) -> Option<PathBuf> {
    let has_extension = name.rfind('.').is_some_and(|dot| dot > 0);
    if has_extension {
        if let Some(found) = find_by_path(dir, name) {
            return Some(found);
        }
    }
    for ext in extensions {
        if let Some(found) = find_by_path(dir, &format!("{name}{ext}")) {
            return Some(found);
        }
    }
    // Executables without a registered extension are the norm outside Windows.
    if cfg!(not(windows)) && !has_extension {
        return find_by_path(dir, name).filter(|p| is_executable(p));
    }
    None
}

fn find_by_path(dir: &Path, file: &str) -> Option<PathBuf> {
    let exact = dir.join(file);
    if exact.is_file() {
        return Some(exact);
    }
    fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .find(|entry| {
            entry.file_name().to_string_lossy().eq_ignore_ascii_case(file)
                && entry.file_type().is_ok_and(|t| !t.is_dir())
        })
        .map(|entry| entry.path())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

pub fn is_batch_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| e == "bat" || e == "cmd")
}

/// Whether the file is a PE image for the GUI subsystem.
pub fn is_gui_program(path: &Path) -> bool {
    fn subsystem(path: &Path) -> io::Result<u16> {
        let mut file = File::open(path)?;
        let mut mz = [0u8; 64];
        file.read_exact(&mut mz)?;
        if &mz[..2] != b"MZ" {
            return Ok(0);
        }
        let pe_offset = u32::from_le_bytes([mz[60], mz[61], mz[62], mz[63]]) as u64;
        file.seek(SeekFrom::Start(pe_offset))?;
        let mut header = [0u8; 24 + 70];
        file.read_exact(&mut header)?;
        if &header[..4] != b"PE\0\0" {
            return Ok(0);
        }
        Ok(u16::from_le_bytes([header[24 + 68], header[24 + 69]]))
    }
    const IMAGE_SUBSYSTEM_WINDOWS_GUI: u16 = 2;
    subsystem(path).is_ok_and(|s| s == IMAGE_SUBSYSTEM_WINDOWS_GUI)
}

/// How a launched program finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Exited(ExitCode),
    /// Started without waiting.
    Detached,
    /// Killed after Ctrl-C.
    Interrupted,
}

/// Command that is not a builtin.
pub struct ExternalCommand {
    program: PathBuf,
    args: String,
}

impl ExternalCommand {
    pub fn new(program: PathBuf, args: impl Into<String>) -> Self {
        Self {
            program,
            args: args.into(),
        }
    }

    fn command(&self, env: &Environment) -> std::process::Command {
        let mut cmd = std::process::Command::new(&self.program);
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.raw_arg(self.args.trim_start());
        }
        #[cfg(not(windows))]
        cmd.args(
            params::split(&self.args, WHITESPACE)
                .into_iter()
                .map(|p| params::remove_quotes(p.text)),
        );
        cmd.env_clear()
            .envs(env.exported())
            .current_dir(&env.current_dir);
        cmd
    }

    /// Runs the program with the given handles.
    pub fn execute(
        &self,
        handles: &mut StdHandles,
        env: &Environment,
        wait: bool,
        signal: &BreakSignal,
    ) -> io::Result<Outcome> {
        handles.flush();
        let (stdin, feed) = handles.stdin.stdio()?;
        let (stdout, capture_out) = handles.stdout.stdio()?;
        let (stderr, capture_err) = handles.stderr.stdio()?;
        let mut cmd = self.command(env);
        cmd.stdin(stdin).stdout(stdout).stderr(stderr);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if needs_association(&e) => {
                info!(program = %self.program.display(), "not executable, opening with association");
                let child = open_with_association(&self.program, env)?;
                return wait_or_detach(child, wait, signal);
            }
            Err(e) => return Err(e),
        };
        debug!(program = %self.program.display(), pid = child.id(), "spawned");

        if let (Some(bytes), Some(mut pipe)) = (feed, child.stdin.take()) {
            // A child that exits without reading its input is not an error.
            thread::spawn(move || {
                let _ = pipe.write_all(&bytes);
            });
        }

        if capture_out || capture_err {
            let Output {
                status,
                stdout,
                stderr,
            } = child.wait_with_output()?;
            copy_captured(&mut handles.stdout, capture_out, &stdout)?;
            copy_captured(&mut handles.stderr, capture_err, &stderr)?;
            return Ok(Outcome::Exited(exit_code(status)));
        }
        wait_or_detach(child, wait, signal)
    }
}

fn copy_captured(handle: &mut OutputHandle, captured: bool, bytes: &[u8]) -> io::Result<()> {
    if captured {
        handle.write_all(bytes)?;
    }
    Ok(())
}

fn wait_or_detach(mut child: Child, wait: bool, signal: &BreakSignal) -> io::Result<Outcome> {
    if !wait {
        return Ok(Outcome::Detached);
    }
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Outcome::Exited(exit_code(status)));
        }
        if signal.is_raised() {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(Outcome::Interrupted);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn exit_code(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(x) => x,
        None => terminated_by_signal(status),
    }
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: ExitStatus) -> i32 {
    -1
}

fn needs_association(e: &io::Error) -> bool {
    const ENOEXEC: i32 = 8;
    const ERROR_BAD_EXE_FORMAT: i32 = 193;
    e.kind() == io::ErrorKind::PermissionDenied
        || e.raw_os_error() == Some(if cfg!(windows) { ERROR_BAD_EXE_FORMAT } else { ENOEXEC })
}

/// Hands a document to the desktop's default application.
pub fn open_with_association(path: &Path, env: &Environment) -> io::Result<Child> {
    let mut opener = if cfg!(windows) {
        let mut cmd = std::process::Command::new("cmd");
        cmd.args(["/c", "start", ""]);
        cmd
    } else if cfg!(target_os = "macos") {
        std::process::Command::new("open")
    } else {
        std::process::Command::new("xdg-open")
    };
    opener
        .arg(path)
        .env_clear()
        .envs(env.exported())
        .current_dir(&env.current_dir)
        .spawn()
}
