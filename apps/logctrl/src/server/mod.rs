pub mod host;
pub mod lifecycle;
pub mod pty;
pub mod pumps;
