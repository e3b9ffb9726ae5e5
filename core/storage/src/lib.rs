// meridian/core/storage/src/lib.rs

pub mod chain;

pub use chain::{ChainError, ChainStore, STATE_HISTORY};
