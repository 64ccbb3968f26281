//! External command execution.
//!
//! Commands are built as argument vectors and spawned directly; nothing is
//! ever passed through a shell. The `Display` rendering of an [`Invocation`]
//! is shell-quoted for logs and dry-run output only.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::error::TemplateError;

/// A program plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }

    /// First argument, i.e. the `qm` subcommand.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

fn shell_quote(s: &str) -> Cow<'_, str> {
    let safe = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c));
    if safe {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("'{}'", s.replace('\'', r"'\''")))
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Captured output of one finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
}

impl CommandResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status: Some(0),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status: Some(status),
        }
    }

    /// Exit status 0 but something on stderr.
    pub fn with_stderr(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            status: Some(0),
        }
    }
}

/// Classify a finished command.
///
/// A non-zero exit status is always fatal. Any stderr output is fatal too,
/// except lines starting with one of the `tolerated` prefixes, which are
/// logged and dropped. On success returns stdout with trailing whitespace
/// trimmed.
pub fn check(
    invocation: &Invocation,
    result: CommandResult,
    tolerated: &[&str],
) -> Result<String, TemplateError> {
    if result.status != Some(0) {
        return Err(TemplateError::CommandFailed {
            command: invocation.to_string(),
            status: result.status,
            stderr: result.stderr.trim().to_string(),
        });
    }

    let mut unexpected = Vec::new();
    for line in result.stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if tolerated.iter().any(|prefix| line.starts_with(prefix)) {
            tracing::warn!(command = %invocation, "ignoring known warning: {line}");
        } else {
            unexpected.push(line);
        }
    }
    if !unexpected.is_empty() {
        return Err(TemplateError::CommandStderr {
            command: invocation.to_string(),
            stderr: unexpected.join("\n"),
        });
    }

    Ok(result.stdout.trim_end().to_string())
}

// ── Host ──────────────────────────────────────────────────

/// Side effects against the hypervisor host.
///
/// The provisioning sequence performs every external action through this
/// trait, so it can be replaced by a dry-run planner or a test spy.
pub trait Host {
    /// Run one command to completion. `Err` only when it could not be run
    /// at all; exit status and stderr are judged by [`check`].
    fn run(&mut self, invocation: &Invocation) -> Result<CommandResult, TemplateError>;

    /// Copy `source` into the snippet directory `dir`, creating the
    /// directory if needed. Returns the destination path.
    fn install_snippet(&mut self, source: &Path, dir: &Path) -> Result<PathBuf, TemplateError>;
}

impl<H: Host + ?Sized> Host for &mut H {
    fn run(&mut self, invocation: &Invocation) -> Result<CommandResult, TemplateError> {
        (**self).run(invocation)
    }

    fn install_snippet(&mut self, source: &Path, dir: &Path) -> Result<PathBuf, TemplateError> {
        (**self).install_snippet(source, dir)
    }
}

fn snippet_destination(source: &Path, dir: &Path) -> Result<PathBuf, TemplateError> {
    let name = source.file_name().ok_or_else(|| TemplateError::Validation {
        message: format!("{} does not name a file", source.display()),
    })?;
    Ok(dir.join(name))
}

/// Runs commands on the local machine.
pub struct SystemHost;

impl Host for SystemHost {
    fn run(&mut self, invocation: &Invocation) -> Result<CommandResult, TemplateError> {
        let output = std::process::Command::new(invocation.program())
            .args(invocation.argv())
            .stdin(Stdio::null())
            .output()
            .map_err(|source| TemplateError::Spawn {
                program: invocation.program().to_string(),
                source,
            })?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code(),
        })
    }

    fn install_snippet(&mut self, source: &Path, dir: &Path) -> Result<PathBuf, TemplateError> {
        if !dir.is_dir() {
            std::fs::create_dir_all(dir).map_err(|source| TemplateError::Io {
                context: format!("creating snippet directory {}", dir.display()),
                source,
            })?;
            tracing::info!(path = %dir.display(), "created snippet directory");
        }

        let dest = snippet_destination(source, dir)?;
        std::fs::copy(source, &dest).map_err(|e| TemplateError::Io {
            context: format!("copying {} to {}", source.display(), dest.display()),
            source: e,
        })?;
        tracing::info!(from = %source.display(), to = %dest.display(), "installed cloud-init snippet");
        Ok(dest)
    }
}

/// Records what would be done without touching the host.
///
/// Every command succeeds with empty output, so the VM id always looks free
/// and the plan never contains a destroy.
#[derive(Debug, Default)]
pub struct DryRunHost {
    pub commands: Vec<Invocation>,
    pub snippets: Vec<(PathBuf, PathBuf)>,
}

impl Host for DryRunHost {
    fn run(&mut self, invocation: &Invocation) -> Result<CommandResult, TemplateError> {
        self.commands.push(invocation.clone());
        Ok(CommandResult::success(""))
    }

    fn install_snippet(&mut self, source: &Path, dir: &Path) -> Result<PathBuf, TemplateError> {
        let dest = snippet_destination(source, dir)?;
        self.snippets.push((source.to_path_buf(), dest.clone()));
        Ok(dest)
    }
}
