use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;

use ptemplate::banner::Banner;
use ptemplate::cli::{Cli, OutputFormat};
use ptemplate::command::{DryRunHost, SystemHost};
use ptemplate::config::{self, ProvisioningRequest};
use ptemplate::error::TemplateError;
use ptemplate::logging::{self, LogFileHandle, RunLog};
use ptemplate::prereq;
use ptemplate::progress::{OutputMode, StepProgress};
use ptemplate::provision::{self, Provisioner};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}

fn run(cli: &Cli) -> Result<(), TemplateError> {
    let mut loaded = config::load_config(&cli.config)?;
    loaded.apply_overrides(&cli.overrides)?;
    let request = loaded.resolve()?;

    // an explicit -q wins over `debug: true` in the config
    let verbose = cli.verbose || (request.debug && !cli.quiet);
    let mode = if cli.dry_run {
        OutputMode::Silent
    } else {
        resolve_output_mode(cli.output, verbose, cli.quiet)
    };
    let log_handle = logging::init(mode, verbose);
    tracing::debug!(config = %loaded.path.display(), ?request, "resolved configuration");

    prereq::check_prerequisites(&request)?;

    if cli.dry_run {
        return print_plan(request);
    }

    let run_log = start_run_log(&log_handle, request.vm_id);

    if mode.shows_banner() {
        Banner::for_request(&request).print();
    }

    let mut progress = StepProgress::new(provision::STEPS, mode);
    let result = Provisioner::new(request, SystemHost).run(&mut progress);
    if let Err(e) = &result {
        tracing::error!(step = progress.steps_started(), "run failed: {e}");
    }

    if let Some(run_log) = run_log {
        let path = run_log.finish(result.is_ok());
        if result.is_err() {
            eprintln!("Run log: {}", path.display());
        }
    }

    let report = result?;
    let replaced = if report.replaced_existing {
        " (replaced existing VM)"
    } else {
        ""
    };
    progress.println(&format!(
        "Template '{}' created as VM {}{replaced}",
        report.name, report.vm_id
    ));
    Ok(())
}

/// Run the sequence against a recording host and print what it issued.
fn print_plan(request: ProvisioningRequest) -> Result<(), TemplateError> {
    let mut progress = StepProgress::new(provision::STEPS, OutputMode::Silent);
    let mut provisioner = Provisioner::new(request, DryRunHost::default());
    provisioner.run(&mut progress)?;
    let host = provisioner.into_host();

    for (from, to) in &host.snippets {
        println!("# copy {} -> {}", from.display(), to.display());
    }
    for command in &host.commands {
        println!("{command}");
    }
    Ok(())
}

fn start_run_log(handle: &LogFileHandle, vm_id: u32) -> Option<RunLog> {
    let dir = ptemplate::paths::logs_dir();
    logging::rotate_run_logs(&dir, vm_id, logging::KEEP_RUN_LOGS);
    match RunLog::start(handle, &dir, vm_id) {
        Ok(log) => {
            tracing::debug!(path = %log.path().display(), "writing run log");
            Some(log)
        }
        Err(e) => {
            tracing::warn!(dir = %dir.display(), "run log disabled: {e}");
            None
        }
    }
}

fn resolve_output_mode(format: OutputFormat, verbose: bool, quiet: bool) -> OutputMode {
    let plain = match format {
        OutputFormat::Plain => true,
        OutputFormat::Fancy => false,
        OutputFormat::Auto => !std::io::stdout().is_terminal(),
    };
    if plain {
        OutputMode::Plain
    } else if quiet {
        OutputMode::Quiet
    } else if verbose {
        OutputMode::Verbose
    } else {
        OutputMode::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_beats_verbose() {
        assert_eq!(resolve_output_mode(OutputFormat::Fancy, true, true), OutputMode::Quiet);
        assert_eq!(resolve_output_mode(OutputFormat::Fancy, true, false), OutputMode::Verbose);
        assert_eq!(resolve_output_mode(OutputFormat::Fancy, false, false), OutputMode::Normal);
    }

    #[test]
    fn plain_format_stays_plain() {
        assert_eq!(resolve_output_mode(OutputFormat::Plain, true, false), OutputMode::Plain);
        assert_eq!(resolve_output_mode(OutputFormat::Plain, false, true), OutputMode::Plain);
    }
}
