#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod id;
pub mod logging;

pub use id::{PartyId, RequestId};

pub use tracing;
