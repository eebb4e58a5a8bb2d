pub mod frame;
pub mod messages;
pub mod session;
pub mod snapshot;
