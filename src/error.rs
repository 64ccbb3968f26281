use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TemplateError {
    #[error("failed to load config from {path}")]
    #[diagnostic(code(ptemplate::config::load))]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    #[diagnostic(code(ptemplate::config::parse))]
    ConfigParse { path: String, message: String },

    #[error("missing required settings in {path}: {}", .keys.join(", "))]
    #[diagnostic(
        code(ptemplate::config::missing),
        help("set the keys in the config file or pass --override key=value")
    )]
    MissingSettings { path: String, keys: Vec<String> },

    #[error("invalid override '{entry}': {message}")]
    #[diagnostic(code(ptemplate::config::bad_override))]
    InvalidOverride { entry: String, message: String },

    #[error("validation error: {message}")]
    #[diagnostic(code(ptemplate::config::validation))]
    Validation { message: String },

    #[error("required files not found: {}", .missing.join(", "))]
    #[diagnostic(
        code(ptemplate::prereq::missing_file),
        help("paths relative to the config file are resolved against its directory")
    )]
    MissingFiles { missing: Vec<String> },

    #[error("failed to run {program}")]
    #[diagnostic(code(ptemplate::command::spawn), help("check the tool path in global_settings"))]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", status_label(.status))]
    #[diagnostic(code(ptemplate::command::failed))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` wrote to stderr: {stderr}")]
    #[diagnostic(code(ptemplate::command::stderr))]
    CommandStderr { command: String, stderr: String },

    #[error("{context}")]
    #[diagnostic(code(ptemplate::io))]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl TemplateError {
    /// Process exit status for this error.
    ///
    /// A failing external command hands its own status through; everything
    /// else (including stderr noise on a zero exit, or a signal) exits 1.
    pub fn exit_code(&self) -> u8 {
        match self {
            TemplateError::CommandFailed {
                status: Some(code), ..
            } => u8::try_from(*code).ok().filter(|c| *c != 0).unwrap_or(1),
            _ => 1,
        }
    }
}

fn status_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(status: Option<i32>) -> TemplateError {
        TemplateError::CommandFailed {
            command: "qm template 9001".into(),
            status,
            stderr: "boom".into(),
        }
    }

    #[test]
    fn command_status_is_propagated() {
        assert_eq!(failed(Some(2)).exit_code(), 2);
        assert_eq!(failed(Some(255)).exit_code(), 255);
    }

    #[test]
    fn signal_and_out_of_range_statuses_exit_one() {
        assert_eq!(failed(None).exit_code(), 1);
        assert_eq!(failed(Some(-1)).exit_code(), 1);
        assert_eq!(failed(Some(0)).exit_code(), 1);
    }

    #[test]
    fn stderr_on_success_exits_one() {
        let err = TemplateError::CommandStderr {
            command: "qm set 9001 --ciuser root".into(),
            stderr: "warning".into(),
        };
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn failure_message_names_command_and_status() {
        let msg = failed(Some(5)).to_string();
        assert!(msg.contains("qm template 9001"));
        assert!(msg.contains("status 5"));
        assert!(msg.contains("boom"));
    }
}
