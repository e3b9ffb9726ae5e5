// meridian/core/api/src/lib.rs

pub mod rpc;
pub mod server;
pub mod subscriptions;
pub mod types;

pub use rpc::{register_methods, RpcContext};
pub use server::{RpcConfig, RpcServer};
pub use subscriptions::HeadSubscriptionServer;
pub use types::{ApiError, MegaBundleRequest};
