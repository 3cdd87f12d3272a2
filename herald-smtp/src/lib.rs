//! Typed SMTP client wrapper for notification delivery.
//!
//! Implements exactly the protocol subset the dispatcher uses: greeting +
//! HELO, `MAIL FROM`, `RCPT TO` with 551 forward-chasing, `DATA` with
//! chunked body streaming, `QUIT`. No extensions, no TLS, no AUTH.

#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod client;
pub mod error;
pub mod reply;

pub use client::{SmtpConnection, format_timestamp};
pub use error::{Result, SmtpError};
pub use reply::Reply;
