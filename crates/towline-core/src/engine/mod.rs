//! Protocol engine
//!
//! This module implements the machinery behind a transfer:
//! - A transport seam producing connections (plain TCP by default)
//! - The per-transfer protocol driver (request writing, header accumulation,
//!   body framing)
//! - The scheduler owning the shared poll loop across all active transfers

pub(crate) mod driver;
pub mod scheduler;
pub mod transport;
