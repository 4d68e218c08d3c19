//! Control surfaces.
//!
//! Two built-ins feed commands into a running engine: a newline-delimited
//! protocol on standard input and a GET command endpoint. Both share one
//! command processor: the first token is the command, the rest are
//! arguments, and anything beyond the fixed verbs dispatches to a public
//! engine method by name.

pub mod command;
pub mod http;
pub mod stdin;

pub use command::{CommandProcessor, ControlError};
pub use http::HttpControl;
pub use stdin::StdinControl;
