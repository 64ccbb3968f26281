use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Controls how step output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinners + ring-buffer logs, cleared when a step completes.
    Normal,
    /// Like Normal but keeps log lines and enables debug tracing.
    Verbose,
    /// Spinners only, no log lines, no banner.
    Quiet,
    /// No ANSI, plain println output (piped/non-TTY).
    Plain,
    /// Nothing at all. Used for dry runs and tests.
    Silent,
}

impl OutputMode {
    pub fn shows_banner(self) -> bool {
        matches!(self, OutputMode::Normal | OutputMode::Verbose)
    }
}

/// Numbered provisioning steps with spinners, checkmarks and crosses.
pub struct StepProgress {
    multi: MultiProgress,
    total_steps: usize,
    current_step: usize,
    mode: OutputMode,
}

/// Handle passed into a step closure for logging while it runs.
pub struct Step {
    bar: ProgressBar,
    state: Arc<Mutex<StepState>>,
    label: String,
    mode: OutputMode,
}

struct StepState {
    log_lines: VecDeque<String>,
    done_label: Option<String>,
}

const MAX_LOG_LINES: usize = 8;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] {spinner:.cyan} {msg}")
        .expect("valid spinner template")
}

fn done_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] \u{2713} {msg:.green}")
        .expect("valid done template")
}

fn failed_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] \u{2717} {msg:.red}")
        .expect("valid failed template")
}

impl StepProgress {
    pub fn new(total_steps: usize, mode: OutputMode) -> Self {
        let multi = match mode {
            OutputMode::Plain | OutputMode::Silent => {
                MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
            }
            _ => MultiProgress::new(),
        };
        Self {
            multi,
            total_steps,
            current_step: 0,
            mode,
        }
    }

    fn next_prefix(&mut self) -> String {
        self.current_step += 1;
        format!("{}/{}", self.current_step, self.total_steps)
    }

    /// Run `f` as the next numbered step.
    ///
    /// Shows a spinner while it runs, then a checkmark on `Ok` or a cross on
    /// `Err`. The step blocks until `f` returns.
    pub fn run<T, E>(
        &mut self,
        label: &str,
        f: impl FnOnce(&Step) -> Result<T, E>,
    ) -> Result<T, E> {
        let prefix = self.next_prefix();

        if self.mode == OutputMode::Plain {
            println!("[{prefix}] {label}");
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(prefix.clone());
        bar.set_message(label.to_string());
        if !matches!(self.mode, OutputMode::Plain | OutputMode::Silent) {
            bar.enable_steady_tick(Duration::from_millis(80));
        }

        let state = Arc::new(Mutex::new(StepState {
            log_lines: VecDeque::new(),
            done_label: None,
        }));
        let step = Step {
            bar: bar.clone(),
            state: state.clone(),
            label: label.to_string(),
            mode: self.mode,
        };

        let result = f(&step);

        let st = state.lock().unwrap_or_else(|e| e.into_inner());
        if self.mode == OutputMode::Verbose {
            for line in &st.log_lines {
                self.multi.println(format!("        {line}")).ok();
            }
        }
        let done_label = st.done_label.clone().unwrap_or_else(|| label.to_string());
        drop(st);

        match &result {
            Ok(_) => {
                if self.mode == OutputMode::Plain {
                    println!("[{prefix}] \u{2713} {done_label}");
                }
                bar.set_style(done_style());
                bar.finish_with_message(done_label);
            }
            Err(_) => {
                if self.mode == OutputMode::Plain {
                    println!("[{prefix}] \u{2717} {label}");
                }
                bar.set_style(failed_style());
                bar.finish_with_message(label.to_string());
            }
        }

        result
    }

    /// Count a step as done without running anything.
    pub fn skip(&mut self, label: &str) {
        let prefix = self.next_prefix();

        match self.mode {
            OutputMode::Silent => {}
            OutputMode::Plain => println!("[{prefix}] \u{2713} {label}"),
            _ => {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(done_style());
                bar.set_prefix(prefix);
                bar.finish_with_message(label.to_string());
            }
        }
    }

    /// Print a line outside the step area (final messages).
    pub fn println(&self, text: &str) {
        match self.mode {
            OutputMode::Silent => {}
            OutputMode::Plain => println!("{text}"),
            _ => {
                self.multi.println(text).ok();
            }
        }
    }

    pub fn steps_started(&self) -> usize {
        self.current_step
    }
}

impl Step {
    /// Add a log line under this step, keeping the last few.
    pub fn log(&self, line: &str) {
        match self.mode {
            OutputMode::Quiet | OutputMode::Silent => return,
            OutputMode::Plain => {
                for sub in line.lines() {
                    println!("        {sub}");
                }
                return;
            }
            OutputMode::Normal | OutputMode::Verbose => {}
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for sub in line.lines() {
            if state.log_lines.len() >= MAX_LOG_LINES {
                state.log_lines.pop_front();
            }
            state.log_lines.push_back(sub.to_string());
        }

        // Label on the first line, log lines indented below it. indicatif
        // tracks the multi-line message height itself.
        let mut msg = self.label.clone();
        for log_line in &state.log_lines {
            msg.push_str("\n        ");
            msg.push_str(log_line);
        }
        self.bar.set_message(msg);
    }

    /// Override the label shown with the checkmark.
    pub fn set_done_label(&self, label: impl Into<String>) {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .done_label = Some(label.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_numbered_in_order() {
        let mut progress = StepProgress::new(3, OutputMode::Silent);
        let a: Result<u32, ()> = progress.run("first", |_| Ok(1));
        progress.skip("second");
        let c: Result<u32, ()> = progress.run("third", |step| {
            step.log("hello");
            step.set_done_label("third done");
            Ok(3)
        });
        assert_eq!(a, Ok(1));
        assert_eq!(c, Ok(3));
        assert_eq!(progress.steps_started(), 3);
    }

    #[test]
    fn failed_step_returns_error() {
        let mut progress = StepProgress::new(1, OutputMode::Silent);
        let r: Result<(), &str> = progress.run("boom", |_| Err("nope"));
        assert_eq!(r, Err("nope"));
    }

    #[test]
    fn step_log_keeps_last_lines() {
        let mut progress = StepProgress::new(1, OutputMode::Normal);
        progress
            .run("logging", |step| {
                for i in 0..20 {
                    step.log(&format!("line {i}"));
                }
                let st = step.state.lock().unwrap();
                assert_eq!(st.log_lines.len(), MAX_LOG_LINES);
                assert_eq!(st.log_lines.back().unwrap(), "line 19");
                Ok::<_, ()>(())
            })
            .unwrap();
    }

    #[test]
    fn banner_only_in_interactive_modes() {
        assert!(OutputMode::Normal.shows_banner());
        assert!(OutputMode::Verbose.shows_banner());
        assert!(!OutputMode::Quiet.shows_banner());
        assert!(!OutputMode::Plain.shows_banner());
        assert!(!OutputMode::Silent.shows_banner());
    }
}
