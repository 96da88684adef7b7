use std::cell::RefCell;
use std::rc::Rc;
use termrunner_core::{
    CommandOutput, CommandSpec, CommandStatus, CommandTransport, Deadline, ExitCodes, FailureKind,
    Orchestrator, RunError, RunnerConfig, Transcript, TransportFactory, TransportKind,
    TransportMode,
};

/// Scripted transport: echoes commands, `fail N` exits with N, `hang` times out
struct FakeTransport {
    kind: TransportKind,
    open_error: Option<RunError>,
    log: Rc<RefCell<Vec<String>>>,
}

impl CommandTransport for FakeTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn open(&mut self, _deadline: Deadline, transcript: &mut Transcript) -> Result<(), RunError> {
        self.log.borrow_mut().push(format!("open {}", self.kind));
        match self.open_error.take() {
            Some(e) => Err(e),
            None => {
                transcript.note(&format!("connected via {}", self.kind));
                Ok(())
            }
        }
    }

    fn run_command(
        &mut self,
        command: &str,
        _deadline: Deadline,
    ) -> Result<CommandOutput, RunError> {
        self.log.borrow_mut().push(format!("run {command}"));
        if command == "hang" {
            return Ok(CommandOutput::timed_out(""));
        }
        match command.strip_prefix("fail ") {
            Some(code) => Ok(CommandOutput::completed("", code.parse().ok())),
            None => Ok(CommandOutput::completed(format!("out: {command}"), Some(0))),
        }
    }

    fn close(&mut self) {
        self.log.borrow_mut().push(format!("close {}", self.kind));
    }
}

#[derive(Default)]
struct FakeFactory {
    ssh_error: RefCell<Option<RunError>>,
    log: Rc<RefCell<Vec<String>>>,
}

impl FakeFactory {
    fn transport(
        &self,
        kind: TransportKind,
        open_error: Option<RunError>,
    ) -> Box<dyn CommandTransport> {
        Box::new(FakeTransport {
            kind,
            open_error,
            log: Rc::clone(&self.log),
        })
    }
}

impl TransportFactory for FakeFactory {
    fn ssh(&self, _config: &RunnerConfig) -> Box<dyn CommandTransport> {
        let error = self.ssh_error.borrow_mut().take();
        self.transport(TransportKind::Ssh, error)
    }

    fn serial(&self, _config: &RunnerConfig) -> Box<dyn CommandTransport> {
        self.transport(TransportKind::Serial, None)
    }

    fn release_serial_devices(&self, _config: &RunnerConfig) -> String {
        self.log.borrow_mut().push("release".into());
        "no processes were holding the serial device".into()
    }
}

fn config() -> RunnerConfig {
    RunnerConfig::new("192.168.55.1", "nvidia", "hunter2")
}

fn specs(commands: &[&str]) -> Vec<CommandSpec> {
    commands.iter().map(|c| CommandSpec::new(*c)).collect()
}

#[test]
fn ssh_batch_produces_sections_and_summary() {
    let factory = FakeFactory::default();
    let orchestrator = Orchestrator::with_factory(config(), factory);
    let result = orchestrator.run(&specs(&["uname -a", "uptime"]));

    assert!(result.is_success());
    assert_eq!(result.transport, "auto(ssh)");
    assert!(result.output.contains("===== COMMAND 1/2 =====\n$ uname -a\nout: uname -a\n"));
    assert!(result.output.contains("===== COMMAND 2/2 =====\n$ uptime\n"));
    assert!(!result.output.contains("hunter2"));

    let summary = result.summary();
    assert!(summary.contains("transport: auto(ssh)"));
    assert!(summary.contains("commands: 2/2"));
    assert!(summary.contains("rc: 0"));
}

#[test]
fn unreachable_ssh_falls_back_to_serial() {
    let factory = FakeFactory::default();
    *factory.ssh_error.borrow_mut() = Some(RunError::SshUnreachable {
        target: "nvidia@192.168.55.1:22".into(),
        reason: "timed out".into(),
        timed_out: true,
    });
    let orchestrator = Orchestrator::with_factory(config(), factory);
    let result = orchestrator.run(&specs(&["fail 3", "echo after"]));

    assert_eq!(result.transport, "auto(serial-fallback)");
    assert_eq!(result.exit_code, 3);
    assert_eq!(result.commands[0].status, CommandStatus::Failed);
    assert_eq!(result.commands[1].status, CommandStatus::Ok);
}

#[test]
fn auth_failure_never_touches_serial() {
    let factory = FakeFactory::default();
    *factory.ssh_error.borrow_mut() = Some(RunError::AuthFailure {
        target: "nvidia@192.168.55.1:22".into(),
        reason: "Authentication failed (username/password)".into(),
    });
    let log = Rc::clone(&factory.log);
    let orchestrator = Orchestrator::with_factory(config(), factory);
    let result = orchestrator.run(&specs(&["true"]));

    assert_eq!(result.exit_code, ExitCodes::SSH_FAILED);
    assert_eq!(result.failure, Some(FailureKind::AuthFailure));
    assert!(log.borrow().iter().all(|e| !e.contains("serial") && e != "release"));
}

#[test]
fn serial_mode_releases_holders_first() {
    let factory = FakeFactory::default();
    let log = Rc::clone(&factory.log);
    let orchestrator =
        Orchestrator::with_factory(config().transport(TransportMode::Serial), factory);
    let result = orchestrator.run(&specs(&["hang", "never"]));

    assert_eq!(result.exit_code, ExitCodes::COMMAND_TIMEOUT);
    assert_eq!(result.commands[1].status, CommandStatus::Skipped);
    let events = log.borrow().clone();
    assert_eq!(events.first().map(String::as_str), Some("release"));
    assert!(!events.contains(&"run never".to_string()));
}

#[test]
fn json_result_is_serialisable() {
    let factory = FakeFactory::default();
    let result = Orchestrator::with_factory(config().transport(TransportMode::Ssh), factory)
        .run(&specs(&["id"]));
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["transport"], "ssh");
    assert_eq!(value["commands"][0]["command"], "id");
    assert!(value["duration"].is_number());
}

#[test]
fn transport_opened_used_and_closed_in_order() {
    let factory = FakeFactory::default();
    let log = Rc::clone(&factory.log);
    Orchestrator::with_factory(config().transport(TransportMode::Ssh), factory)
        .run(&specs(&["a", "b"]));

    assert_eq!(*log.borrow(), ["open ssh", "run a", "run b", "close ssh"]);
}
