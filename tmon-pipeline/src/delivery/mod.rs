//! Delivery discipline shared by every outbound hop

pub mod dispatcher;
pub mod retry;

pub use dispatcher::{BatchDispatcher, BatchOutcome, Destination, DispatchReport};
pub use retry::RetryPolicy;
