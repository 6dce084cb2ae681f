//! Batch stage-in and stage-out
//!
//! Files are processed sequentially in input order. The checksum option is
//! resolved once per batch; every file then gets a copy attempt (or, for
//! stage-in, a direct-access short cut) followed by a trace report. Files
//! already in a terminal status are skipped so a batch can be resumed.

use common::exec::Executor;
use common::trace::{TraceEvent, TraceRecord, timestamp};
use tracing::instrument;

use crate::checksum::{ChecksumOption, ChecksumType};
use crate::copytool::{Engine, StageRequest, TransferOutcome};
use crate::errors::{ErrorKind, TypedError};
use crate::file::{Direction, FileDescriptor, FileStatus};
use crate::{output, timeout};

const STAGEIN_ATTEMPT_FAILED: &str = "STAGEIN_ATTEMPT_FAILED";
const STAGEOUT_ATTEMPT_FAILED: &str = "STAGEOUT_ATTEMPT_FAILED";

fn trace_state(state: &str, reason: &str) -> TraceRecord {
    TraceRecord {
        client_state: Some(state.to_string()),
        state_reason: Some(reason.to_string()),
        time_end: Some(timestamp()),
        ..Default::default()
    }
}

/// Per-file trace fields; absent values are reset so nothing leaks from the previous file
fn trace_file(file: &FileDescriptor, url: Option<&str>) -> TraceRecord {
    TraceRecord {
        remote_site: Some(file.ddmendpoint.clone().unwrap_or_default()),
        filename: Some(file.lfn.clone()),
        guid: Some(file.guid_without_dashes()),
        scope: Some(file.scope.clone()),
        dataset: Some(file.dataset.clone().unwrap_or_default()),
        url: Some(url.unwrap_or_default().to_string()),
        filesize: Some(file.filesize),
        cat_start: Some(timestamp()),
        ..Default::default()
    }
}

impl<E: Executor> Engine<E> {
    /// Copy `files` from their remote locators into the working directory.
    ///
    /// Each file ends up `transferred`, `remote_io` (read in place), `failed`
    /// or, when the batch stopped early, still `pending`. The returned error
    /// carries the `STAGEIN_ATTEMPT_FAILED` state and the kind and code of the
    /// first failure.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn copy_in(
        &self,
        files: &mut [FileDescriptor],
        trace: &mut TraceEvent,
    ) -> Result<(), TypedError> {
        let option = self.resolve_checksum_option().await;
        let mut local_site = self.config.local_site.clone();
        let mut first_error = None;
        for file in files.iter_mut() {
            if file.status.is_terminal() {
                tracing::info!("{}: already {}, skipping", file.lfn, file.status);
                continue;
            }
            if local_site.is_none() {
                local_site.clone_from(&file.ddmendpoint);
            }
            trace.update(TraceRecord {
                local_site: local_site.clone(),
                ..trace_file(file, file.turl.as_deref())
            });
            if self.config.allow_direct_access && file.is_direct_access(false) {
                tracing::info!(
                    "{}: direct access allowed, the payload reads {:?} in place",
                    file.lfn,
                    file.turl.as_deref().unwrap_or_default()
                );
                file.finish(FileStatus::RemoteIo, 0);
                trace.update(trace_state("FOUND_ROOT", "direct_access"));
                trace.send();
                continue;
            }
            match self.stage_in_file(&option, file).await {
                Ok(()) => {
                    tracing::info!("{}: staged in", file.lfn);
                    file.finish(FileStatus::Transferred, 0);
                    trace.update(trace_state("DONE", "OK"));
                    trace.send();
                }
                Err(error) => {
                    tracing::error!("{}: stage-in failed: {error}", file.lfn);
                    file.finish(FileStatus::Failed, error.code());
                    let error = error.with_state(STAGEIN_ATTEMPT_FAILED);
                    trace.update(trace_state(error.state(), error.diagnostic()));
                    trace.send();
                    if self.config.fail_early {
                        return Err(error);
                    }
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Copy `files` from their local locators to their remote destinations.
    ///
    /// Errors are returned as classified, with the kind's own trace state.
    #[instrument(skip_all, fields(files = files.len()))]
    pub async fn copy_out(
        &self,
        files: &mut [FileDescriptor],
        trace: &mut TraceEvent,
    ) -> Result<(), TypedError> {
        let option = self.resolve_checksum_option().await;
        if let Some(local_site) = &self.config.local_site {
            trace.update(TraceRecord {
                local_site: Some(local_site.clone()),
                ..Default::default()
            });
        }
        let mut first_error = None;
        for file in files.iter_mut() {
            if file.status.is_terminal() {
                tracing::info!("{}: already {}, skipping", file.lfn, file.status);
                continue;
            }
            trace.update(trace_file(file, file.surl.as_deref()));
            match self.stage_out_file(&option, file).await {
                Ok(()) => {
                    tracing::info!("{}: staged out", file.lfn);
                    file.finish(FileStatus::Transferred, 0);
                    trace.update(trace_state("DONE", "OK"));
                    trace.send();
                }
                Err(error) => {
                    tracing::error!("{}: stage-out failed: {error}", file.lfn);
                    file.finish(FileStatus::Failed, error.code());
                    trace.update(trace_state(error.state(), error.diagnostic()));
                    trace.send();
                    if self.config.fail_early {
                        return Err(error);
                    }
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn stage_in_file(
        &self,
        option: &ChecksumOption,
        file: &FileDescriptor,
    ) -> Result<(), TypedError> {
        let source = file.turl.as_deref().ok_or_else(|| {
            TypedError::fallback(
                Direction::In,
                &format!("{}: no remote locator to copy from", file.lfn),
            )
        })?;
        let destination = file
            .workdir
            .as_deref()
            .unwrap_or(&self.config.workdir)
            .join(&file.lfn);
        let destination = destination.to_str().ok_or_else(|| {
            TypedError::fallback(
                Direction::In,
                &format!("{}: destination {destination:?} is not valid UTF-8", file.lfn),
            )
        })?;
        let request = StageRequest {
            source,
            destination,
            filesize: file.filesize,
            direction: Direction::In,
            timeout: self.deadline(file),
        };
        let outcome = self.stage_file(option, &request).await?;
        self.verify(file, &outcome, Direction::In)
    }

    async fn stage_out_file(
        &self,
        option: &ChecksumOption,
        file: &FileDescriptor,
    ) -> Result<(), TypedError> {
        let missing = |what: &str| {
            TypedError::fallback(
                Direction::Out,
                &format!("{}: no {what} locator", file.lfn),
            )
            .with_state(STAGEOUT_ATTEMPT_FAILED)
        };
        let source = file.surl.as_deref().ok_or_else(|| missing("local"))?;
        let destination = file.turl.as_deref().ok_or_else(|| missing("remote"))?;
        let request = StageRequest {
            source,
            destination,
            filesize: file.filesize,
            direction: Direction::Out,
            timeout: self.deadline(file),
        };
        match self.stage_file(option, &request).await {
            Ok(outcome) => self.verify(file, &outcome, Direction::Out),
            Err(error)
                if error.kind() == ErrorKind::ChecksumNotSupported
                    && self.config.tolerate_unsupported_checksum =>
            {
                tracing::warn!(
                    "{}: uploaded but the destination could not checksum it: {}",
                    file.lfn,
                    error.diagnostic()
                );
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn deadline(&self, file: &FileDescriptor) -> Option<std::time::Duration> {
        let deadline = timeout::estimate_duration(file.filesize);
        if self.config.enforce_timeout {
            tracing::debug!("{}: deadline {deadline:?}", file.lfn);
            Some(deadline)
        } else {
            tracing::debug!("{}: deadline {deadline:?} not enforced", file.lfn);
            None
        }
    }

    /// Compare what the copy tool reported with what the catalog expects
    fn verify(
        &self,
        file: &FileDescriptor,
        outcome: &TransferOutcome,
        direction: Direction,
    ) -> Result<(), TypedError> {
        if !self.config.verify_checksum {
            return Ok(());
        }
        if let Some((checksum, checksum_type)) =
            outcome.checksum.as_deref().zip(outcome.checksum_type)
        {
            // catalogs may drop leading zeros just like the copy tool does
            match file
                .expected_checksum(checksum_type)
                .map(output::pad_checksum)
            {
                Some(expected) if !expected.eq_ignore_ascii_case(checksum) => {
                    let kind = match checksum_type {
                        ChecksumType::Adler32 => ErrorKind::AdMismatch,
                        ChecksumType::Md5 => ErrorKind::Md5Mismatch,
                    };
                    return Err(TypedError::new(
                        kind,
                        direction,
                        format!(
                            "{}: {checksum_type} checksum of the copy {checksum} does not match the expected {expected}",
                            file.lfn
                        ),
                    ));
                }
                Some(_) => tracing::info!("{}: {checksum_type} checksum verified", file.lfn),
                None => tracing::debug!("{}: no expected {checksum_type} checksum", file.lfn),
            }
        }
        if let Some(size) = outcome
            .filesize
            .filter(|size| file.filesize > 0 && *size != file.filesize)
        {
            return Err(TypedError::new(
                ErrorKind::AdMismatch,
                direction,
                format!(
                    "{}: size of the copy {size} does not match the expected {}",
                    file.lfn, file.filesize
                ),
            ));
        }
        Ok(())
    }
}
