//! Size and checksum recovery from the copy tool's output
//!
//! The copy tool prints a line of the shape `<type>: <checksum> <url> <filesize>`
//! when asked to compute a checksum on the fly. Anything unexpected is a soft
//! failure: it is logged and reported as "nothing known".

use std::sync::LazyLock;

use crate::checksum::ChecksumType;

/// At least one of these must appear in output that carries file info
const SUCCESS_MARKERS: [&str; 3] = ["xrootd", "XRootD", "adler32"];

const FILE_INFO_PATTERN: &str =
    r"(?P<type>md5|adler32): (?P<checksum>[a-zA-Z0-9]+) \S+ (?P<filesize>[0-9]+)";

static FILE_INFO: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(FILE_INFO_PATTERN).expect("file info pattern is a valid regex")
});

/// Checksum width; adler32 values are printed without leading zeros
const CHECKSUM_WIDTH: usize = 8;

/// What the copy tool reported about the transferred file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub filesize: Option<u64>,
    pub checksum: Option<String>,
    pub checksum_type: Option<ChecksumType>,
}

/// Left-pad a checksum with zeros to the width the catalog uses
#[must_use]
pub fn pad_checksum(checksum: &str) -> String {
    format!("{checksum:0>width$}", width = CHECKSUM_WIDTH)
}

/// Extract file size and checksum from the copy tool's stdout
#[must_use]
pub fn parse(output: &str) -> FileInfo {
    if output.is_empty() {
        return FileInfo::default();
    }
    if !SUCCESS_MARKERS.iter().any(|marker| output.contains(marker)) {
        tracing::warn!("failed to extract checksum, unexpected output: {output}");
        return FileInfo::default();
    }
    let Some(captures) = FILE_INFO.captures(output) else {
        tracing::warn!(
            "checksum/file size info not found: failed to match pattern {FILE_INFO_PATTERN:?} in output: {output}"
        );
        return FileInfo::default();
    };
    let checksum = pad_checksum(&captures["checksum"]);
    let checksum_type = captures["type"].parse::<ChecksumType>().ok();
    let filesize = match captures["filesize"].parse::<u64>() {
        Ok(filesize) => Some(filesize),
        Err(error) => {
            tracing::warn!(
                "failed to convert filesize {:?} to an integer: {error}",
                &captures["filesize"]
            );
            None
        }
    };
    FileInfo {
        filesize,
        checksum: Some(checksum),
        checksum_type,
    }
}
