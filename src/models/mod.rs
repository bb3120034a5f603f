pub mod message;

pub use message::{DeliveryTarget, Message, SendRequest, SendResponse};
