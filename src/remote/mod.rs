// Remote services: the content API, the chat API and the upstream stream.
//
// `traits` holds the contracts the pipeline depends on; the other modules
// are reqwest-backed implementations of them.

pub mod chat;
pub mod client;
pub mod content;
pub mod rate_limit;
pub mod stream;
pub mod traits;

pub use traits::{ContentApi, HydrateError, PublishError, Publisher};
