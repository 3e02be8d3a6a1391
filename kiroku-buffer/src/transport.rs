//! Transport boundary for sealed chunks.

use kiroku_core::error::Result;

/// Delivers one sealed chunk's bytes downstream.
///
/// `data` is only valid for the duration of the call; implementations
/// that need it later must copy. An `Err` tells the flush driver to keep
/// the chunk for a later retry.
pub trait Transporter {
    fn transport(&mut self, tag: &str, data: &[u8]) -> Result<()>;
}
