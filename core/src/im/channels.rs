//! Channel implementations. Slack is the only one; wire types live apart from the client.

pub mod slack;
pub mod slack_events;
