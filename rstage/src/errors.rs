//! Typed transfer errors and the rule table that classifies copy tool output
//!
//! Classification is an ordered list of substring rules evaluated top to
//! bottom; the first matching rule decides the [`ErrorKind`]. When nothing
//! matches the direction's generic kind is used. Classification never fails.

use serde::Serialize;

use crate::file::Direction;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    StageinFailed,
    StageoutFailed,
    /// adler32 of the copy differs from the expected one
    AdMismatch,
    Md5Mismatch,
    Timeout,
    GlobusFailure,
    FileExists,
    MissingInput,
    ChecksumNotSupported,
    NoProxy,
    NoSpace,
    QuotaExceeded,
    NoSuchFile,
    ServiceUnavailable,
    NetworkUnreachable,
    ConnectionRefused,
    PermissionDenied,
}

impl ErrorKind {
    /// Generic kind used when nothing more specific is known
    #[must_use]
    pub fn default_for(direction: Direction) -> Self {
        match direction {
            Direction::In => ErrorKind::StageinFailed,
            Direction::Out => ErrorKind::StageoutFailed,
        }
    }

    /// Stable numeric code reported to the batch system
    #[must_use]
    pub fn code(self, direction: Direction) -> u32 {
        // (stage-in, stage-out)
        let (stage_in, stage_out) = match self {
            ErrorKind::StageinFailed => (1099, 1099),
            ErrorKind::StageoutFailed => (1137, 1137),
            ErrorKind::AdMismatch => (1171, 1172),
            ErrorKind::Md5Mismatch => (1145, 1141),
            ErrorKind::Timeout => (1151, 1152),
            ErrorKind::GlobusFailure => (1180, 1181),
            ErrorKind::FileExists => (1221, 1221),
            ErrorKind::MissingInput => (1354, 1354),
            ErrorKind::ChecksumNotSupported => (1356, 1356),
            ErrorKind::NoProxy => (1163, 1163),
            ErrorKind::NoSpace => (1098, 1223),
            ErrorKind::QuotaExceeded => (1224, 1224),
            ErrorKind::NoSuchFile => (1103, 1103),
            ErrorKind::ServiceUnavailable => (1362, 1362),
            ErrorKind::NetworkUnreachable => (1363, 1363),
            ErrorKind::ConnectionRefused => (1364, 1364),
            ErrorKind::PermissionDenied => (1365, 1365),
        };
        match direction {
            Direction::In => stage_in,
            Direction::Out => stage_out,
        }
    }

    /// State label reported in traces
    #[must_use]
    pub fn state(self) -> &'static str {
        match self {
            ErrorKind::StageinFailed | ErrorKind::StageoutFailed => "COPY_ERROR",
            ErrorKind::AdMismatch => "AD_MISMATCH",
            ErrorKind::Md5Mismatch => "MD5_MISMATCH",
            ErrorKind::Timeout => "CP_TIMEOUT",
            ErrorKind::GlobusFailure => "GLOBUS_FAIL",
            ErrorKind::FileExists => "FILE_EXISTS",
            ErrorKind::MissingInput => "MISSING_INPUT",
            ErrorKind::ChecksumNotSupported => "CHKSUM_NOTSUP",
            ErrorKind::NoProxy => "CONTEXT_FAIL",
            ErrorKind::NoSpace => "NO_SPACE",
            ErrorKind::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorKind::NoSuchFile => "NO_FILE",
            ErrorKind::ServiceUnavailable => "SERVICE_ERROR",
            ErrorKind::NetworkUnreachable => "NETWORK_UNREACHABLE",
            ErrorKind::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorKind::PermissionDenied => "PERMISSION_DENIED",
        }
    }

    /// Whether retrying the same transfer later may succeed
    #[must_use]
    pub fn is_retriable(self) -> bool {
        matches!(
            self,
            ErrorKind::StageinFailed
                | ErrorKind::StageoutFailed
                | ErrorKind::Timeout
                | ErrorKind::GlobusFailure
                | ErrorKind::ServiceUnavailable
                | ErrorKind::NetworkUnreachable
                | ErrorKind::ConnectionRefused
        )
    }

    fn describe(self, output: &str, direction: Direction) -> String {
        match self {
            ErrorKind::StageinFailed | ErrorKind::StageoutFailed => {
                if output.is_empty() {
                    format!("{direction} copy command failed (consult log)")
                } else {
                    format!("{direction} copy command failed (consult log): {output}")
                }
            }
            ErrorKind::Timeout => format!("copy command timed out: {output}"),
            ErrorKind::GlobusFailure => format!("Globus system error: {output}"),
            ErrorKind::FileExists => {
                format!("file already exists in the destination: {output}")
            }
            ErrorKind::NoProxy => format!(
                "could not establish context, proxy or its VO extension has probably expired: {output}"
            ),
            ErrorKind::NoSpace => format!("no space left on disk: {output}"),
            ErrorKind::QuotaExceeded => format!("disk quota exceeded: {output}"),
            _ => output.to_string(),
        }
    }
}

/// A classified transfer failure
#[derive(Clone, Debug, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{diagnostic} (code {code}, state {state})")]
pub struct TypedError {
    kind: ErrorKind,
    code: u32,
    state: String,
    diagnostic: String,
}

impl TypedError {
    pub fn new(kind: ErrorKind, direction: Direction, diagnostic: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(direction),
            state: kind.state().to_string(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Generic failure of the direction for an error that was never classified
    #[must_use]
    pub fn fallback(direction: Direction, detail: &str) -> Self {
        let kind = ErrorKind::default_for(direction);
        Self::new(kind, direction, kind.describe(detail.trim(), direction))
    }

    /// Same error reported under a different state label
    #[must_use]
    pub fn with_state(self, state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            ..self
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn code(&self) -> u32 {
        self.code
    }

    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    #[must_use]
    pub fn diagnostic(&self) -> &str {
        &self.diagnostic
    }

    #[must_use]
    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

/// One classification rule: matches when any of the patterns occurs in the output
#[derive(Clone, Debug)]
pub struct Rule {
    kind: ErrorKind,
    any_of: Vec<String>,
    requires: Option<String>,
    excludes: Option<String>,
    direction: Option<Direction>,
}

impl Rule {
    pub fn new(kind: ErrorKind, any_of: &[&str]) -> Self {
        Self {
            kind,
            any_of: any_of.iter().map(|pattern| pattern.to_string()).collect(),
            requires: None,
            excludes: None,
            direction: None,
        }
    }

    /// Additionally require `pattern` to be present
    #[must_use]
    pub fn requires(self, pattern: &str) -> Self {
        Self {
            requires: Some(pattern.to_string()),
            ..self
        }
    }

    /// Do not match when `pattern` is present
    #[must_use]
    pub fn excludes(self, pattern: &str) -> Self {
        Self {
            excludes: Some(pattern.to_string()),
            ..self
        }
    }

    /// Only match transfers in `direction`
    #[must_use]
    pub fn only(self, direction: Direction) -> Self {
        Self {
            direction: Some(direction),
            ..self
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn matches(&self, output: &str, direction: Direction) -> bool {
        self.direction.is_none_or(|only| only == direction)
            && self.any_of.iter().any(|pattern| output.contains(pattern.as_str()))
            && self
                .requires
                .as_deref()
                .is_none_or(|pattern| output.contains(pattern))
            && self
                .excludes
                .as_deref()
                .is_none_or(|pattern| !output.contains(pattern))
    }
}

/// Rules recognizing the common copy tool failures, highest priority first
#[must_use]
pub fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new(ErrorKind::Timeout, &["timed out"]),
        Rule::new(ErrorKind::AdMismatch, &["does not match the checksum"]).requires("adler32"),
        Rule::new(ErrorKind::Md5Mismatch, &["does not match the checksum"]),
        Rule::new(ErrorKind::GlobusFailure, &["globus_xio:"]),
        Rule::new(
            ErrorKind::FileExists,
            &["File exists", "SRM_FILE_BUSY", "file already exists"],
        ),
        Rule::new(ErrorKind::MissingInput, &["No such file or directory"]).only(Direction::In),
        Rule::new(
            ErrorKind::ChecksumNotSupported,
            &["query chksum is not supported", "Unable to checksum"],
        ),
        Rule::new(ErrorKind::NoProxy, &["Could not establish context"]),
        Rule::new(ErrorKind::NoSpace, &["No space left on device"]),
        Rule::new(
            ErrorKind::QuotaExceeded,
            &["Disk quota exceeded", "quota exceeded"],
        ),
        Rule::new(ErrorKind::NoSuchFile, &["No such file or directory"]),
        Rule::new(
            ErrorKind::ServiceUnavailable,
            &["service is not available at the moment"],
        ),
        Rule::new(ErrorKind::NetworkUnreachable, &["Network is unreachable"]),
        Rule::new(ErrorKind::ConnectionRefused, &["Connection refused"]),
        Rule::new(
            ErrorKind::PermissionDenied,
            &["Permission denied", "permission denied"],
        ),
    ]
}

/// Ordered rule table mapping copy tool output to a [`TypedError`]
#[derive(Clone, Debug)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl Classifier {
    #[must_use]
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Add a rule evaluated before all existing ones
    #[must_use]
    pub fn prepend(mut self, rule: Rule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// Add a rule evaluated after all existing ones
    #[must_use]
    pub fn append(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    #[must_use]
    pub fn classify(&self, output: &str, direction: Direction) -> TypedError {
        let output = output.trim();
        match self.rules.iter().find(|rule| rule.matches(output, direction)) {
            Some(rule) => {
                let kind = rule.kind();
                TypedError::new(kind, direction, kind.describe(output, direction))
            }
            None => TypedError::fallback(direction, output),
        }
    }
}
