// meridian/core/api/src/types/mod.rs

pub mod error;
pub mod request;
pub mod response;

pub use error::ApiError;
pub use request::MegaBundleRequest;
