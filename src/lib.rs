// feedrelay: republish a live social feed into chat channels
//
// This is the library root. Each module corresponds to a piece of the
// relay: the stream thread feeds the queue, the daemon task drains it
// into the chat and keeps the stream healthy.

pub mod colors;
pub mod commands;
pub mod config;
pub mod event;
pub mod feed;
pub mod history;
pub mod pipeline;
pub mod queue;
pub mod registry;
pub mod remote;
pub mod render;
pub mod status;
pub mod store;
