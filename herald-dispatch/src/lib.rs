//! The dispatch core: request intake, expansion, SMTP delivery with
//! `(sender, recipient)` coalescing, status reconciliation, and the
//! periodic scheduler hook.
//!
//! This crate wires the seams together: it reads and mutates the queue
//! through [`herald_store::RequestStore`], resolves parties through
//! [`herald_directory::PartyDirectory`], and drives deliveries over one
//! sequential [`herald_smtp::SmtpConnection`] per run.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod scheduler;
pub mod service;

mod deliver;
mod expand;

pub use config::DispatchConfig;
pub use error::{DispatchError, FailedReply, Result};
pub use scheduler::JobScheduler;
pub use service::{DispatchService, RunSummary};
