//! Per-file transfer records
//!
//! A [`FileDescriptor`] is owned by the caller; the driver only updates its
//! `status` and `status_code` fields in place. Status moves forward only:
//! `pending` becomes `remote_io`, `transferred` or `failed` and stays there for
//! the rest of the batch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumType;

/// Name patterns of files that are never read in place
const NON_DIRECT_ACCESS_PATTERNS: [&str; 3] = [".tar.gz", ".lib.tgz", ".raw."];

/// Replica schemes the copy tool can read directly
const DIRECT_ACCESS_SCHEMES: [&str; 2] = ["root://", "roots://"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    #[strum(serialize = "stage-in")]
    In,
    #[strum(serialize = "stage-out")]
    Out,
}

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FileStatus {
    #[default]
    Pending,
    /// Left in place, read directly by the payload
    RemoteIo,
    Transferred,
    Failed,
}

impl FileStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != FileStatus::Pending
    }
}

/// One file to stage in or out
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileDescriptor {
    /// Logical file name, also the file name inside the working directory
    pub lfn: String,
    pub scope: String,
    pub dataset: Option<String>,
    pub guid: String,
    /// Storage endpoint holding (or receiving) the file
    pub ddmendpoint: Option<String>,
    /// Remote locator: stage-in source, stage-out destination
    pub turl: Option<String>,
    /// Local locator: stage-out source
    pub surl: Option<String>,
    /// Expected size in bytes, 0 if unknown
    pub filesize: u64,
    /// Expected checksums by algorithm
    pub checksum: BTreeMap<ChecksumType, String>,
    /// Stage-in destination directory overriding the batch default
    pub workdir: Option<std::path::PathBuf>,
    /// Catalog says the file may be read where it is
    pub direct_access: bool,
    pub status: FileStatus,
    pub status_code: u32,
}

impl FileDescriptor {
    pub fn new(scope: impl Into<String>, lfn: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            lfn: lfn.into(),
            ..Default::default()
        }
    }

    /// Whether the file can be read in place instead of being staged.
    ///
    /// With `ensure_replica` a directly readable remote locator is required as well.
    #[must_use]
    pub fn is_direct_access(&self, ensure_replica: bool) -> bool {
        let name = self.lfn.to_lowercase();
        if name.starts_with("raw.")
            || NON_DIRECT_ACCESS_PATTERNS
                .iter()
                .any(|pattern| name.contains(pattern))
        {
            return false;
        }
        if !self.direct_access {
            return false;
        }
        !ensure_replica
            || self.turl.as_deref().is_some_and(|turl| {
                DIRECT_ACCESS_SCHEMES
                    .iter()
                    .any(|scheme| turl.starts_with(scheme))
            })
    }

    #[must_use]
    pub fn expected_checksum(&self, checksum_type: ChecksumType) -> Option<&str> {
        self.checksum.get(&checksum_type).map(String::as_str)
    }

    /// GUID the way trace reports expect it
    #[must_use]
    pub fn guid_without_dashes(&self) -> String {
        self.guid.replace('-', "")
    }

    /// Set a terminal status; a file already in a terminal state is left alone
    pub(crate) fn finish(&mut self, status: FileStatus, status_code: u32) -> bool {
        if self.status.is_terminal() {
            tracing::warn!(
                "{}: refusing to change status from {} to {status}",
                self.lfn,
                self.status
            );
            return false;
        }
        self.status = status;
        self.status_code = status_code;
        true
    }

    /// Put the file back into `pending`, e.g. before retrying a failed batch
    pub fn reset(&mut self) {
        self.status = FileStatus::Pending;
        self.status_code = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(lfn: &str, turl: Option<&str>) -> FileDescriptor {
        FileDescriptor {
            direct_access: true,
            turl: turl.map(str::to_string),
            ..FileDescriptor::new("mc16_13TeV", lfn)
        }
    }

    #[test]
    fn archives_and_raw_files_are_never_read_in_place() {
        for lfn in [
            "DBRelease.tar.gz",
            "user.lib.tgz",
            "data18.00348885.physics_Main.daq.RAW._lb0100._0001",
            "raw.data",
            "RAW.data",
        ] {
            assert!(!direct(lfn, None).is_direct_access(false), "{lfn}");
        }
    }

    #[test]
    fn direct_access_needs_catalog_flag() {
        let mut file = direct("AOD.root", None);
        assert!(file.is_direct_access(false));
        file.direct_access = false;
        assert!(!file.is_direct_access(false));
    }

    #[test]
    fn ensure_replica_needs_readable_locator() {
        assert!(!direct("AOD.root", None).is_direct_access(true));
        assert!(!direct("AOD.root", Some("https://host/AOD.root")).is_direct_access(true));
        assert!(direct("AOD.root", Some("root://host//AOD.root")).is_direct_access(true));
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut file = FileDescriptor::new("scope", "a.root");
        assert!(file.finish(FileStatus::Transferred, 0));
        assert!(!file.finish(FileStatus::Failed, 1099));
        assert_eq!(file.status, FileStatus::Transferred);
        assert_eq!(file.status_code, 0);
        file.reset();
        assert_eq!(file.status, FileStatus::Pending);
    }

    #[test]
    fn manifest_round_trips_through_json() {
        let json = r#"{
            "lfn": "a.root",
            "scope": "mc16_13TeV",
            "guid": "2A4B-11EE",
            "turl": "root://eos.example//a.root",
            "filesize": 1000000,
            "checksum": {"adler32": "001a2b3c"}
        }"#;
        let file: FileDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(file.expected_checksum(ChecksumType::Adler32), Some("001a2b3c"));
        assert_eq!(file.expected_checksum(ChecksumType::Md5), None);
        assert_eq!(file.guid_without_dashes(), "2A4B11EE");
        let value = serde_json::to_value(&file).unwrap();
        assert_eq!(value["status"], "pending");
        assert_eq!(value["status_code"], 0);
    }
}
