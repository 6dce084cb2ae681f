//! Engine configuration, one instance per batch run

use crate::checksum::ChecksumType;

#[derive(Debug, Clone)]
pub struct Config {
    /// Copy tool binary (name looked up in PATH, or a path)
    pub copy_tool: String,
    /// Opaque shell prefix run before every command, e.g. `source setup.sh`
    pub setup: Option<String>,
    /// Checksum algorithm to request from the copy tool
    pub checksum_type: ChecksumType,
    /// Leave directly readable input files in place instead of copying them
    pub allow_direct_access: bool,
    /// Stage-in destination directory for files without their own
    pub workdir: std::path::PathBuf,
    /// Local site reported in traces; defaults to the first file's endpoint
    pub local_site: Option<String>,
    /// Kill copy commands exceeding the size-based deadline
    pub enforce_timeout: bool,
    /// Stop the batch at the first failed file
    pub fail_early: bool,
    /// Compare reported checksum and size with the expected ones
    pub verify_checksum: bool,
    /// Stage-out only: accept uploads the copy tool could not checksum
    pub tolerate_unsupported_checksum: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            copy_tool: "xrdcp".to_string(),
            setup: None,
            checksum_type: ChecksumType::Adler32,
            allow_direct_access: false,
            workdir: std::path::PathBuf::from("."),
            local_site: None,
            enforce_timeout: true,
            fail_early: true,
            verify_checksum: true,
            tolerate_unsupported_checksum: false,
        }
    }
}

impl Config {
    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.copy_tool.trim().is_empty() {
            return Err("copy tool must not be empty".to_string());
        }
        if self.copy_tool.chars().any(char::is_whitespace) {
            return Err(format!(
                "copy tool {:?} must be a single word, use setup for environment preparation",
                self.copy_tool
            ));
        }
        if self.workdir.as_os_str().is_empty() {
            return Err("workdir must not be empty".to_string());
        }
        Ok(())
    }

    /// `command` preceded by the setup prefix, if any
    #[must_use]
    pub fn command_line(&self, command: &str) -> String {
        match self.setup.as_deref().map(str::trim) {
            Some(setup) if !setup.is_empty() => {
                format!("{}; {command}", setup.trim_end_matches(';'))
            }
            _ => command.to_string(),
        }
    }
}
