//! Data models for channel topics, wire frames, job requests and worker status.

pub mod channel;
pub mod event;
pub mod request;
pub mod status;

pub use channel::*;
pub use event::*;
pub use request::*;
pub use status::*;
