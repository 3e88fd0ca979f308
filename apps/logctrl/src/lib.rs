pub mod buffer;
pub mod client;
pub mod server;
pub mod session;
pub mod stream;
pub mod telemetry;
pub mod terminal;
