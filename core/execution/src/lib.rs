// meridian/core/execution/src/lib.rs

pub mod executor;
pub mod payment;
pub mod state;
pub mod types;

pub use executor::{apply_transaction, intrinsic_gas, BlockExecutor, ExecutionOutcome};
pub use payment::{payment_topic, payments_in, PaymentEvent, PAYMENT_CONTRACT_CODE};
pub use state::{Account, StateDB};
pub use types::{BlockEnv, ExecutionError, Log, Receipt};
