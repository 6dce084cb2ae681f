use crate::file::{FileDescriptor, FileStatus};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub bytes_transferred: u64,
    pub files_transferred: usize,
    pub files_remote_io: usize,
    pub files_failed: usize,
    pub files_pending: usize,
}

impl Summary {
    /// Tally the final status of a batch
    #[must_use]
    pub fn from_files(files: &[FileDescriptor]) -> Self {
        files.iter().fold(Self::default(), |mut summary, file| {
            match file.status {
                FileStatus::Transferred => {
                    summary.files_transferred += 1;
                    summary.bytes_transferred += file.filesize;
                }
                FileStatus::RemoteIo => summary.files_remote_io += 1,
                FileStatus::Failed => summary.files_failed += 1,
                FileStatus::Pending => summary.files_pending += 1,
            }
            summary
        })
    }
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_transferred: self.bytes_transferred + other.bytes_transferred,
            files_transferred: self.files_transferred + other.files_transferred,
            files_remote_io: self.files_remote_io + other.files_remote_io,
            files_failed: self.files_failed + other.files_failed,
            files_pending: self.files_pending + other.files_pending,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes transferred: {}\n\
            files transferred: {}\n\
            files read in place: {}\n\
            files failed: {}\n\
            files pending: {}",
            bytesize::ByteSize(self.bytes_transferred),
            self.files_transferred,
            self.files_remote_io,
            self.files_failed,
            self.files_pending,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_status(lfn: &str, status: FileStatus, filesize: u64) -> FileDescriptor {
        FileDescriptor {
            status,
            filesize,
            ..FileDescriptor::new("scope", lfn)
        }
    }

    #[test]
    fn counts_each_status() {
        let files = [
            with_status("a", FileStatus::Transferred, 1000),
            with_status("b", FileStatus::Transferred, 24),
            with_status("c", FileStatus::RemoteIo, 1 << 30),
            with_status("d", FileStatus::Failed, 10),
            with_status("e", FileStatus::Pending, 10),
        ];
        let summary = Summary::from_files(&files);
        assert_eq!(
            summary,
            Summary {
                bytes_transferred: 1024,
                files_transferred: 2,
                files_remote_io: 1,
                files_failed: 1,
                files_pending: 1,
            }
        );
        let total = summary + summary;
        assert_eq!(total.files_transferred, 4);
        assert_eq!(total.bytes_transferred, 2048);
    }

    #[test]
    fn display_lists_every_counter() {
        let summary = Summary {
            files_transferred: 3,
            files_pending: 2,
            ..Default::default()
        };
        let text = summary.to_string();
        assert!(text.contains("files transferred: 3"));
        assert!(text.contains("files pending: 2"));
        assert!(text.starts_with("bytes transferred: 0"));
    }
}
