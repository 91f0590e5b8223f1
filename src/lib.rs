pub mod bridge;
pub mod config;
pub mod error;

pub use bridge::{Delivery, LifecycleController, Message, MessageId};
pub use config::BridgeSettings;
pub use error::{BridgeError, BridgeResult};
