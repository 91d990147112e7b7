//! IM side of the relay: Slack channel, per-channel send daemon, worker, and reply formatting.
//! Slash commands and help are handled in commands; conversations live in session.
//! Log format: [slack] / [worker] / [daemon] prefixes with channel=... thread=... direction=... content=...

pub mod channels;
pub mod commands;
pub mod daemon;
pub mod formatter;
pub mod log;
pub mod session;
pub mod transport;
pub mod worker;

pub use channels::slack;
