//! Incremental client-side sync for agent session timelines: ordered merging of pushed and
//! pulled messages, a bounded view cache, unread tracking and reconnect resync.

pub mod app;
pub mod cli;
pub mod domain;
pub mod infra;
pub mod ui;
