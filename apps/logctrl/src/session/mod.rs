pub mod tty;

pub use tty::{TerminalSession, TtyError, TtyMode};
