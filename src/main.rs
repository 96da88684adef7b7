//! Termrunner - remote command runner
//!
//! Runs a command batch on a headless Linux device over SSH, falling back to
//! its serial console when the network is down.

use clap::Parser;
use std::io::{self, Write};
use std::process::ExitCode;
use termrunner_core::cli::args::{ProbeArgs, RunArgs};
use termrunner_core::cli::report::{self, PortEntry, ReportStyle};
use termrunner_core::cli::{exit_code_description, print_exit_codes, Cli, Commands, OutputFormat};
use termrunner_core::config::{self, TransportMode};
use termrunner_core::core::discovery::{candidate_devices, PortProbeResult, ProbeState};
use termrunner_core::core::transport::{list_ports, probe_device, SystemTransports};
use termrunner_core::utils::logging;
use termrunner_core::{Deadline, ExitCodes, FailureKind, Orchestrator, TransportFactory};
use tracing::{debug, info, warn};

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn run(cli: &Cli, args: &RunArgs) -> anyhow::Result<u8> {
    let specs = match args.command_specs() {
        Ok(specs) => specs,
        Err(e) => {
            eprintln!("ERROR: invalid arguments: {e:#}");
            return Ok(ExitCodes::INVALID_ARGS);
        }
    };

    let defaults = args.target.load_defaults()?;
    let config = args.to_config(&defaults, &env_lookup)?;
    info!(
        transport = %config.transport,
        target = %config.ssh_target(),
        commands = specs.len(),
        "starting run"
    );

    let streamed = cli.format == OutputFormat::Text && !cli.quiet;
    let result = Orchestrator::new(config).live(streamed).run(&specs);

    let mut out = io::stdout().lock();
    let mut err = io::stderr().lock();
    if let Some(ref path) = args.transcript_file {
        report::save_transcript(path, &result, &mut err);
    }
    let style = ReportStyle {
        format: cli.format,
        quiet: cli.quiet,
        streamed,
    };
    report::print_run(&result, style, &mut out, &mut err)?;
    out.flush()?;
    Ok(result.exit_code)
}

fn probe(cli: &Cli, args: &ProbeArgs) -> anyhow::Result<u8> {
    let defaults = args.target.load_defaults()?;
    let config = args
        .target
        .to_config(&defaults, &env_lookup)?
        .transport(TransportMode::Serial);
    config.validate()?;

    if args.release_holders {
        let note = SystemTransports.release_serial_devices(&config);
        debug!("{note}");
        if !cli.quiet && cli.format == OutputFormat::Text {
            eprintln!("{note}");
        }
    }

    let devices = match config.serial.device {
        Some(ref device) => vec![device.clone()],
        None => candidate_devices(&config.serial.scan_globs),
    };
    let results: Vec<PortProbeResult> = devices
        .iter()
        .map(|device| probe_device(&config, device, Deadline::never()))
        .collect();

    report::print_probes(&results, cli.format, cli.verbose, &mut io::stdout().lock())?;
    Ok(match report::best_state(&results) {
        Some(ProbeState::Shell | ProbeState::Unknown) => ExitCodes::SUCCESS,
        Some(ProbeState::AliveNoShell) => ExitCodes::ALIVE_NO_SHELL,
        Some(ProbeState::NoTerminal) | None => ExitCodes::NO_TERMINAL,
    })
}

fn list_devices(cli: &Cli, scan_globs: &[String]) -> anyhow::Result<u8> {
    let mut globs: Vec<String> = config::DEFAULT_SCAN_GLOBS
        .iter()
        .map(ToString::to_string)
        .collect();
    globs.extend(scan_globs.iter().cloned());

    let candidates = candidate_devices(&globs);
    let ports: Vec<PortEntry> = match list_ports() {
        Ok(ports) => ports.iter().map(PortEntry::from).collect(),
        Err(e) => {
            warn!("failed to enumerate serial ports: {e}");
            Vec::new()
        }
    };

    report::print_devices(&candidates, &ports, cli.format, &mut io::stdout().lock())?;
    Ok(ExitCodes::SUCCESS)
}

fn exit_codes(cli: &Cli) -> anyhow::Result<u8> {
    if cli.format == OutputFormat::Json {
        let table: Vec<serde_json::Value> = ExitCodes::ALL
            .iter()
            .map(|code| {
                serde_json::json!({
                    "code": code,
                    "description": exit_code_description(*code),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else {
        print_exit_codes();
    }
    Ok(ExitCodes::SUCCESS)
}

fn dispatch(cli: &Cli) -> anyhow::Result<u8> {
    match cli.command {
        Commands::Run(ref args) => run(cli, args),
        Commands::Probe(ref args) => probe(cli, args),
        Commands::ListDevices { ref scan_globs } => list_devices(cli, scan_globs),
        Commands::ExitCodes => exit_codes(cli),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = match cli.log_dir {
        Some(Some(ref dir)) => Some(dir.clone()),
        Some(None) => config::log_dir(),
        None => None,
    };
    let _guard = match logging::init(cli.verbose, cli.quiet, log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("WARNING: logging disabled: {e:#}");
            None
        }
    };
    debug!("termrunner v{}", termrunner_core::VERSION);

    match dispatch(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("ERROR: {}: {e:#}", FailureKind::Config.tag());
            ExitCode::from(ExitCodes::CONFIG_ERROR)
        }
    }
}
