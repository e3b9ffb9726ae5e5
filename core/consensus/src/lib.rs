// meridian/core/consensus/src/lib.rs

pub mod crypto;
pub mod engine;
pub mod types;

pub use crypto::{sign_transaction, verify_transaction, CryptoError};
pub use engine::{Engine, EngineError, InstantSeal, MAX_EXTRA_DATA_SIZE};
pub use types::*;
