//! The submission pipeline, long-lived batch submitter, log monitor, and
//! DNS-backed submit-token verifier, built on `sigsum-protocol` and
//! `sigsum-api` (spec.md §4.6-§4.8).

#![warn(rust_2018_idioms, unused_lifetimes)]
#![warn(unused_qualifications, missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

mod batch;
mod config;
mod dns;
mod monitor;
mod state;
mod submit;

pub use batch::{Batch, BatchSubmitError, DoneCallback, WaitOutcome};
pub use config::{MonitorConfig, RateLimitConfig, SubmitConfig};
pub use dns::{DnsLookupError, DnsVerifier, DnsVerifyError, HickoryDnsResolver, TxtLookup, MAX_TXT_RECORDS};
pub use monitor::{Alert, Monitor, MonitorBuilder, MonitorCallbacks};
pub use state::{FileStateDirectory, MonitorState, StateDirectory, StateError};
pub use submit::{submit_leaf_request, submit_message, LogTarget, SubmitError};
