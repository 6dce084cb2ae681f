//! Single-file staging through the external copy tool
//!
//! [`Engine`] owns the configuration, the command executor and the error
//! classifier for one batch run. [`Engine::stage_file`] runs one copy command
//! and turns its result into either a [`TransferOutcome`] or a [`TypedError`];
//! the batch drivers live in [`crate::driver`].

use common::exec::{ExecError, Executor, ShellExecutor, shell_quote};
use tracing::instrument;

use crate::checksum::{self, ChecksumOption};
use crate::config::Config;
use crate::errors::{Classifier, ErrorKind, TypedError};
use crate::file::Direction;
use crate::output::{self, FileInfo};

/// Size and checksum reported by the copy tool for a finished transfer.
///
/// All fields are `None` when no checksum was requested or the output could
/// not be parsed; that alone is not a failure.
pub type TransferOutcome = FileInfo;

/// One copy to perform
#[derive(Clone, Debug)]
pub struct StageRequest<'a> {
    pub source: &'a str,
    pub destination: &'a str,
    /// Expected size in bytes, used for logging and the deadline
    pub filesize: u64,
    pub direction: Direction,
    /// Hard deadline for the copy command, `None` to let it run
    pub timeout: Option<std::time::Duration>,
}

#[derive(Debug)]
pub struct Engine<E = ShellExecutor> {
    pub(crate) config: Config,
    executor: E,
    classifier: Classifier,
}

impl Engine {
    /// Engine running the copy tool through the local shell
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_executor(config, ShellExecutor::default())
    }
}

impl<E: Executor> Engine<E> {
    pub fn with_executor(config: Config, executor: E) -> Self {
        Self {
            config,
            executor,
            classifier: Classifier::default(),
        }
    }

    /// Replace the default error classification rules
    #[must_use]
    pub fn with_classifier(self, classifier: Classifier) -> Self {
        Self { classifier, ..self }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Probe the copy tool for its checksum option; do this once per batch
    pub async fn resolve_checksum_option(&self) -> ChecksumOption {
        checksum::resolve(&self.executor, &self.config).await
    }

    /// Copy command line, without the setup prefix
    #[must_use]
    pub fn copy_command(&self, option: &ChecksumOption, source: &str, destination: &str) -> String {
        let mut words = vec![
            shell_quote(&self.config.copy_tool),
            "-np".to_string(),
            "-f".to_string(),
        ];
        if option.is_requested() {
            words.push(option.fragment().to_string());
        }
        words.push(shell_quote(source));
        words.push(shell_quote(destination));
        words.join(" ")
    }

    /// Copy one file.
    ///
    /// A non-zero exit is classified from the combined output. On success the
    /// output is parsed for size and checksum only if a checksum was requested;
    /// comparing them with expected values is up to the caller.
    #[instrument(skip(self, option), fields(checksum = option.fragment()))]
    pub async fn stage_file(
        &self,
        option: &ChecksumOption,
        request: &StageRequest<'_>,
    ) -> Result<TransferOutcome, TypedError> {
        let command = self.config.command_line(&self.copy_command(
            option,
            request.source,
            request.destination,
        ));
        tracing::info!(
            "executing command: {command}, timeout={:?}",
            request.timeout
        );
        let output = match self.executor.execute(&command, request.timeout).await {
            Ok(output) => output,
            Err(ExecError::TimedOut { timeout, .. }) => {
                tracing::error!("copy command killed after {timeout:?}");
                return Err(TypedError::new(
                    ErrorKind::Timeout,
                    request.direction,
                    format!(
                        "copy command timed out after {}s: {command}",
                        timeout.as_secs()
                    ),
                ));
            }
            Err(error) => {
                tracing::error!("{error:#}");
                return Err(TypedError::fallback(
                    request.direction,
                    &format!("{error:#}"),
                ));
            }
        };
        tracing::info!(
            "rcode={}, stdout={}, stderr={}",
            output.status,
            output.stdout,
            output.stderr
        );
        if !output.success() {
            let error = self
                .classifier
                .classify(&output.combined(), request.direction);
            tracing::warn!(
                "copy command failed with {}: {} ({})",
                output.status,
                error.kind(),
                error.diagnostic()
            );
            return Err(error);
        }
        if !option.is_requested() {
            return Ok(TransferOutcome::default());
        }
        Ok(output::parse(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumType;
    use crate::testutils::ScriptedExecutor;
    use std::time::Duration;

    fn request(direction: Direction) -> StageRequest<'static> {
        StageRequest {
            source: "root://eos.example//atlas/a.root",
            destination: "/work dir/a.root",
            filesize: 1_000_000,
            direction,
            timeout: Some(Duration::from_secs(302)),
        }
    }

    fn adler32() -> ChecksumOption {
        ChecksumOption::new("--cksum adler32:print", ChecksumType::Adler32)
    }

    #[test]
    fn command_embeds_checksum_flag_and_quotes_paths() {
        let engine = Engine::with_executor(Config::default(), ScriptedExecutor::new());
        assert_eq!(
            engine.copy_command(&adler32(), "root://h//a.root", "/work dir/a.root"),
            "xrdcp -np -f --cksum adler32:print root://h//a.root '/work dir/a.root'"
        );
        assert_eq!(
            engine.copy_command(&ChecksumOption::none(), "/data/a.root", "root://h//a.root"),
            "xrdcp -np -f /data/a.root root://h//a.root"
        );
    }

    #[test]
    fn tool_name_is_a_single_shell_word() {
        let config = Config {
            copy_tool: "xrdcp$v".to_string(),
            ..Default::default()
        };
        let engine = Engine::with_executor(config, ScriptedExecutor::new());
        assert_eq!(
            engine.copy_command(&ChecksumOption::none(), "/data/a.root", "root://h//a.root"),
            "'xrdcp$v' -np -f /data/a.root root://h//a.root"
        );
    }

    #[tokio::test]
    async fn success_returns_reported_size_and_checksum() {
        let executor =
            ScriptedExecutor::new().respond(0, "adler32: 1a2b3c 1a2b3c4d 1000000\n", "");
        let config = Config {
            setup: Some("source /opt/setup.sh".to_string()),
            ..Default::default()
        };
        let engine = Engine::with_executor(config, executor);
        let outcome = engine
            .stage_file(&adler32(), &request(Direction::In))
            .await
            .unwrap();
        assert_eq!(outcome.filesize, Some(1_000_000));
        assert_eq!(outcome.checksum.as_deref(), Some("001a2b3c"));
        assert_eq!(outcome.checksum_type, Some(ChecksumType::Adler32));
        assert_eq!(
            engine.executor().commands(),
            vec![
                "source /opt/setup.sh; xrdcp -np -f --cksum adler32:print \
                 root://eos.example//atlas/a.root '/work dir/a.root'"
            ]
        );
        assert_eq!(
            engine.executor().timeouts(),
            vec![Some(Duration::from_secs(302))]
        );
    }

    #[tokio::test]
    async fn output_is_ignored_without_checksum_option() {
        let executor =
            ScriptedExecutor::new().respond(0, "adler32: 1a2b3c 1a2b3c4d 1000000\n", "");
        let engine = Engine::with_executor(Config::default(), executor);
        let outcome = engine
            .stage_file(&ChecksumOption::none(), &request(Direction::In))
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::default());
    }

    #[tokio::test]
    async fn unparseable_output_is_not_a_failure() {
        let executor = ScriptedExecutor::new().respond(0, "[xrootd] done\n", "");
        let engine = Engine::with_executor(Config::default(), executor);
        let outcome = engine
            .stage_file(&adler32(), &request(Direction::Out))
            .await
            .unwrap();
        assert_eq!(outcome, TransferOutcome::default());
    }

    #[tokio::test]
    async fn failure_is_classified_from_combined_output() {
        let executor = ScriptedExecutor::new().respond(
            54,
            "[0B/0B][100%][==================================================][0B/s]\n",
            "Run: [ERROR] Server responded with an error: [3011] No such file or directory\n",
        );
        let engine = Engine::with_executor(Config::default(), executor);
        let error = engine
            .stage_file(&adler32(), &request(Direction::In))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::MissingInput);
        assert!(error.diagnostic().contains("[3011]"));
    }

    #[tokio::test]
    async fn killed_command_is_a_retriable_timeout() {
        let executor = ScriptedExecutor::new().time_out();
        let engine = Engine::with_executor(Config::default(), executor);
        let error = engine
            .stage_file(&adler32(), &request(Direction::Out))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert_eq!(error.code(), 1152);
        assert!(error.is_retriable());
    }

    #[tokio::test]
    async fn command_that_cannot_start_uses_direction_default() {
        let executor = ScriptedExecutor::new().fail_to_spawn();
        let engine = Engine::with_executor(Config::default(), executor);
        let error = engine
            .stage_file(&adler32(), &request(Direction::In))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::StageinFailed);
        assert!(error.diagnostic().contains("bash: not found"));
    }

    #[tokio::test]
    async fn custom_classifier_is_used() {
        let executor = ScriptedExecutor::new().respond(1, "", "[3010] auth failed");
        let classifier = Classifier::default().prepend(crate::errors::Rule::new(
            ErrorKind::NoProxy,
            &["auth failed"],
        ));
        let engine =
            Engine::with_executor(Config::default(), executor).with_classifier(classifier);
        let error = engine
            .stage_file(&adler32(), &request(Direction::In))
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::NoProxy);
    }
}
