//! Relay core: config, repository routing, headless assistant runner, Slack IM, GitHub PRs, workspace.
//! No CLI and no logging setup; the server binary owns those.

pub mod config;
pub mod error;
pub mod github;
pub mod headless;
pub mod im;
pub mod router;
pub mod workspace;
