//! `rstage` stages job input and output files through an external copy tool
//! (`xrdcp` by default).
//!
//! The building blocks, roughly in the order a batch uses them:
//!
//! - [`checksum`]: probe the copy tool for its checksum flag
//! - [`timeout`]: size-based deadline for one copy
//! - [`copytool`]: run one copy command ([`Engine::stage_file`])
//! - [`output`]: recover size and checksum from the tool's output
//! - [`errors`]: classify failed copies into typed, coded errors
//! - [`driver`]: stage whole batches in or out ([`Engine::copy_in`], [`Engine::copy_out`])
//!   and report each file through a [`common::trace::TraceEvent`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use common::trace::{LogSink, TraceEvent};
//! use rstage::{Config, Engine, FileDescriptor};
//!
//! # async fn stage() -> Result<(), rstage::TypedError> {
//! let engine = Engine::new(Config::default());
//! let mut files = vec![FileDescriptor {
//!     turl: Some("root://eos.example//atlas/AOD.root".to_string()),
//!     ..FileDescriptor::new("mc16_13TeV", "AOD.root")
//! }];
//! let mut trace = TraceEvent::new(Arc::new(LogSink));
//! engine.copy_in(&mut files, &mut trace).await?;
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod config;
pub mod copytool;
pub mod driver;
pub mod errors;
pub mod file;
pub mod output;
pub mod summary;
pub mod timeout;

#[cfg(test)]
mod testutils;

pub use checksum::{ChecksumOption, ChecksumType};
pub use config::Config;
pub use copytool::{Engine, StageRequest, TransferOutcome};
pub use errors::{Classifier, ErrorKind, Rule, TypedError};
pub use file::{Direction, FileDescriptor, FileStatus};
pub use summary::Summary;
