// Network layer module
// Framed connection to the real-time feed plus wire frame definitions

pub mod connection;
pub mod frames;

pub use connection::Connection;
pub use frames::{ClientFrame, RawLocationUpdate, ServerFrame};
