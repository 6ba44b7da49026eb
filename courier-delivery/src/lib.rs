pub mod channels;
pub mod worker;

pub use channels::{ChannelSink, TracingSink};
pub use worker::{run, DeliveryWorker};
