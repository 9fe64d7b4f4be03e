// Inter-worker messaging.
// Typed command/response/event enums plus the endpoint roles that move them
// over bounded crossbeam channels with per-sender op id correlation.

pub mod endpoint;
pub mod messages;

pub use endpoint::{
    command_channel, event_channel, EventConsumer, EventProducer, MasterEndpoint, SlaveEndpoint,
};
pub use messages::OpId;
