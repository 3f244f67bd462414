//! Progress fan-out bus.

mod bus;
mod messages;

pub use bus::{ProgressBus, Subscription, DEFAULT_SUBSCRIPTION_BUFFER};
pub use messages::{FileProcessedPayload, ProgressEvent};
