// meridian/node/src/lib.rs

pub mod config;
pub mod genesis;
pub mod logging;
pub mod producer;

pub use config::NodeConfig;
pub use producer::BlockProducer;
