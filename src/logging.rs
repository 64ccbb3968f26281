use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::progress::OutputMode;

/// Run logs kept per VM id.
pub const KEEP_RUN_LOGS: usize = 20;

/// Install the global subscriber: a stderr layer that follows the output
/// mode and a file layer that stays silent until a [`RunLog`] attaches.
///
/// `verbose` raises plain output to debug level; the spinner modes carry
/// verbosity in the mode itself.
pub fn init(mode: OutputMode, verbose: bool) -> LogFileHandle {
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(mode != OutputMode::Plain)
        .with_filter(terminal_filter(mode, verbose));

    let (file_writer, handle) = LogFile::new();
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("ptemplate=debug"));

    tracing_subscriber::registry()
        .with(terminal_layer)
        .with(file_layer)
        .init();

    handle
}

fn terminal_filter(mode: OutputMode, verbose: bool) -> EnvFilter {
    // Spinners own the terminal in Normal/Quiet; tracing lines on stderr
    // would break indicatif's redraws.
    match mode {
        OutputMode::Verbose => EnvFilter::new("ptemplate=debug"),
        OutputMode::Plain if verbose => EnvFilter::new("ptemplate=debug"),
        OutputMode::Plain => EnvFilter::from_default_env()
            .add_directive("ptemplate=info".parse().expect("valid log directive")),
        OutputMode::Normal | OutputMode::Quiet | OutputMode::Silent => EnvFilter::new("off"),
    }
}

// ── LogFile ──────────────────────────────────────────────

/// `MakeWriter` that discards output until a file is attached.
#[derive(Clone)]
pub struct LogFile {
    target: Arc<Mutex<Option<File>>>,
}

/// Attaches a file to the [`LogFile`] it was created with.
#[derive(Clone)]
pub struct LogFileHandle {
    target: Arc<Mutex<Option<File>>>,
}

impl LogFile {
    pub fn new() -> (Self, LogFileHandle) {
        let target = Arc::new(Mutex::new(None));
        (
            Self {
                target: target.clone(),
            },
            LogFileHandle { target },
        )
    }
}

impl LogFileHandle {
    fn attach(&self, file: File) {
        *self.target.lock().unwrap_or_else(|e| e.into_inner()) = Some(file);
    }

    fn detach(&self) {
        self.target.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

pub struct LogFileWriter {
    target: Arc<Mutex<Option<File>>>,
}

impl std::io::Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.target.lock().unwrap_or_else(|e| e.into_inner()).as_mut() {
            Some(f) => f.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.target.lock().unwrap_or_else(|e| e.into_inner()).as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileWriter {
            target: self.target.clone(),
        }
    }
}

// ── RunLog ───────────────────────────────────────────────

/// Log file for one provisioning run.
///
/// Created as `<timestamp>_<vmid>_running.log`; [`RunLog::finish`] renames it
/// to `_ok.log` or `_failed.log`.
pub struct RunLog {
    handle: LogFileHandle,
    path: PathBuf,
}

impl RunLog {
    pub fn start(handle: &LogFileHandle, logs_dir: &Path, vm_id: u32) -> std::io::Result<Self> {
        fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(format!("{}_{vm_id}_running.log", utc_timestamp()));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        handle.attach(file);
        Ok(Self {
            handle: handle.clone(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the file and rename it after the outcome. Returns the final path.
    pub fn finish(self, success: bool) -> PathBuf {
        self.handle.detach();
        let suffix = if success { "_ok.log" } else { "_failed.log" };
        let renamed = self
            .path
            .file_name()
            .and_then(|f| f.to_str())
            .map(|f| self.path.with_file_name(f.replace("_running.log", suffix)));
        match renamed {
            Some(new_path) if fs::rename(&self.path, &new_path).is_ok() => new_path,
            _ => self.path,
        }
    }
}

/// Delete the oldest finished run logs for `vm_id`, keeping at most `keep`.
pub fn rotate_run_logs(logs_dir: &Path, vm_id: u32, keep: usize) {
    let Ok(entries) = fs::read_dir(logs_dir) else {
        return;
    };

    let marker = format!("_{vm_id}_");
    let mut finished: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name().and_then(|f| f.to_str()).is_some_and(|f| {
                f.contains(&marker) && (f.ends_with("_ok.log") || f.ends_with("_failed.log"))
            })
        })
        .collect();

    // timestamp prefix sorts chronologically
    finished.sort();

    if finished.len() > keep {
        for old in &finished[..finished.len() - keep] {
            let _ = fs::remove_file(old);
        }
    }
}

/// Current UTC time as `YYYY-MM-DDTHH-MM-SS`.
pub fn utc_timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_timestamp(secs)
}

fn format_timestamp(secs: u64) -> String {
    let (hh, mm, ss) = ((secs % 86400) / 3600, (secs % 3600) / 60, secs % 60);

    // days since epoch to civil date (Hinnant)
    let z = (secs / 86400) as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!("{year:04}-{month:02}-{day:02}T{hh:02}-{mm:02}-{ss:02}")
}
