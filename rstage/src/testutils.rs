use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use common::exec::{ExecError, ExecOutput, Executor};

/// Executor replaying canned responses in order and recording what it was asked to run
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    responses: Mutex<VecDeque<Result<ExecOutput, ExecError>>>,
    calls: Mutex<Vec<(String, Option<Duration>)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, response: Result<ExecOutput, ExecError>) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn respond(self, status: i32, stdout: &str, stderr: &str) -> Self {
        self.push(Ok(ExecOutput {
            status,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }))
    }

    /// Version and help probes advertising `--cksum`
    pub fn with_cksum_probes(self) -> Self {
        self.respond(0, "v5.5.4\n", "")
            .respond(0, "usage: xrdcp\n  --cksum <type>[:print]\n", "")
    }

    /// Version and help probes advertising no checksum option
    pub fn with_plain_probes(self) -> Self {
        self.respond(0, "v5.5.4\n", "")
            .respond(0, "usage: xrdcp [-f] [-np]\n", "")
    }

    pub fn time_out(self) -> Self {
        self.push(Err(ExecError::TimedOut {
            command: "scripted".to_string(),
            timeout: Duration::from_secs(300),
        }))
    }

    pub fn fail_to_spawn(self) -> Self {
        self.push(Err(ExecError::Spawn {
            command: "scripted".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "bash: not found"),
        }))
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(command, _)| command.clone())
            .collect()
    }

    pub fn timeouts(&self) -> Vec<Option<Duration>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, timeout)| *timeout)
            .collect()
    }
}

impl Executor for ScriptedExecutor {
    async fn execute(
        &self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput, ExecError> {
        self.calls
            .lock()
            .unwrap()
            .push((command.to_string(), timeout));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("no scripted response left for {command:?}"))
    }
}
