pub mod events;
pub mod frames;

pub use events::ServerEvent;
pub use frames::InboundFrame;
