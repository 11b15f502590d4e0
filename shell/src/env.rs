use std::collections::HashMap;
use std::env as stdenv;
use std::path::{Component, Path, PathBuf};

/// A variable as it was last set: the name keeps the caller's spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Variable {
    name: String,
    value: String,
}

/// Interpreter-level view of the environment: variables plus the logical current directory.
///
/// Variable names are case-insensitive. The process working directory is never
/// changed; `current_dir` is passed to children and used to resolve relative paths.
#[derive(Debug, Clone)]
pub struct Environment {
    vars: HashMap<String, Variable>,
    /// The current working directory for command execution.
    pub current_dir: PathBuf,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    pub fn new() -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let mut env = Self::empty(current_dir);
        for (k, v) in stdenv::vars() {
            env.set_var(k, v);
        }
        env
    }

    /// An environment with no variables.
    pub fn empty(current_dir: impl Into<PathBuf>) -> Self {
        Self {
            vars: HashMap::new(),
            current_dir: current_dir.into(),
        }
    }

    /// Get the value of an environment variable, ignoring case.
    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars
            .get(&key.to_ascii_uppercase())
            .map(|v| v.value.clone())
    }

    /// Set or override an environment variable.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        let name = key.into();
        self.vars.insert(
            name.to_ascii_uppercase(),
            Variable {
                name,
                value: val.into(),
            },
        );
    }

    /// Returns whether the variable existed.
    pub fn remove_var(&mut self, key: &str) -> bool {
        self.vars.remove(&key.to_ascii_uppercase()).is_some()
    }

    /// All variables sorted by name, as listed by `SET`.
    pub fn sorted_vars(&self) -> Vec<(&str, &str)> {
        let mut vars: Vec<(&str, &str)> = self
            .vars
            .values()
            .map(|v| (v.name.as_str(), v.value.as_str()))
            .collect();
        vars.sort_by_key(|(name, _)| name.to_ascii_uppercase());
        vars
    }

    /// Variables handed to child processes; per-drive `=X:` entries stay private.
    pub fn exported(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .values()
            .filter(|v| !v.name.starts_with('='))
            .map(|v| (v.name.as_str(), v.value.as_str()))
    }

    /// Resolves `path` against the current directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        resolve_path(&self.current_dir, path)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// Joins `path` onto `base` (unless absolute) and removes `.` and `..` lexically.
pub fn resolve_path(base: &Path, path: &str) -> PathBuf {
    let joined = if path.is_empty() {
        base.to_path_buf()
    } else {
        base.join(path)
    };
    normalize(&joined)
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
