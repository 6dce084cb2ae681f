//! Checksum option discovery
//!
//! Different releases of the copy tool spell the "compute a checksum while
//! copying" flag differently. The tool is probed once per batch (`--version`,
//! then `-h`) and the help text decides which flag to append to every copy
//! command. Probing is best-effort: any failure means "no checksum".

use common::exec::{Executor, shell_quote};
use serde::{Deserialize, Serialize};

use crate::config::Config;

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChecksumType {
    #[default]
    Adler32,
    Md5,
}

/// Command-line fragment requesting an on-the-fly checksum, possibly empty
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChecksumOption {
    fragment: String,
    checksum_type: Option<ChecksumType>,
}

impl ChecksumOption {
    /// No checksum requested
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(fragment: impl Into<String>, checksum_type: ChecksumType) -> Self {
        Self {
            fragment: fragment.into(),
            checksum_type: Some(checksum_type),
        }
    }

    #[must_use]
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    #[must_use]
    pub fn checksum_type(&self) -> Option<ChecksumType> {
        self.checksum_type
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        !self.fragment.is_empty()
    }

    /// Pick the flag advertised in the copy tool's `help` output
    #[must_use]
    pub fn from_help(help: &str, preferred: ChecksumType) -> Self {
        if help.contains("--cksum") {
            Self::new(format!("--cksum {preferred}:print"), preferred)
        } else if help.contains("-adler") && preferred == ChecksumType::Adler32 {
            Self::new("-adler", preferred)
        } else if help.contains("-md5") && preferred == ChecksumType::Md5 {
            Self::new("-md5", preferred)
        } else {
            Self::none()
        }
    }
}

/// Probe the copy tool and build the checksum option for this batch
pub async fn resolve<E: Executor>(executor: &E, config: &Config) -> ChecksumOption {
    let tool = shell_quote(&config.copy_tool);
    let version_cmd = config.command_line(&format!("{tool} --version"));
    tracing::info!("checking copy tool version: {version_cmd}");
    if probe(executor, &version_cmd).await.is_none() {
        return ChecksumOption::none();
    }
    let help_cmd = config.command_line(&format!("{tool} -h"));
    tracing::info!("checking which option computes the file checksum: {help_cmd}");
    let Some(help) = probe(executor, &help_cmd).await else {
        return ChecksumOption::none();
    };
    let option = ChecksumOption::from_help(&help, config.checksum_type);
    if option.is_requested() {
        tracing::info!(
            "using {:?} to get the checksum from {}",
            option.fragment(),
            config.copy_tool
        );
    } else {
        tracing::info!(
            "{} does not advertise a {} checksum option",
            config.copy_tool,
            config.checksum_type
        );
    }
    option
}

/// Combined output of a successful probe, `None` (logged) otherwise
async fn probe<E: Executor>(executor: &E, command: &str) -> Option<String> {
    match executor.execute(command, None).await {
        Ok(output) => {
            let combined = output.combined();
            tracing::debug!("probe returned {}: {combined}", output.status);
            if output.success() {
                Some(combined)
            } else {
                tracing::error!(
                    "failed to execute {command:?} (exit code {}): {combined}",
                    output.status
                );
                None
            }
        }
        Err(error) => {
            tracing::error!("failed to execute {command:?}: {error:#}");
            None
        }
    }
}
