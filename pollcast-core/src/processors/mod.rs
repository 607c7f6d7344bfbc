//! Processors of the poll pipeline.
//!
//! - `fetcher`: `EventSource` trait and the `HttpFetcher` implementation
//! - `dedup`: `DedupWindow`, the bounded set of recently seen ids
//! - `filter`: `Filter` predicates and `FilterChain`
//! - `registry`: `HandlerRegistry` of named handlers with their filters
//! - `dispatch`: `DispatchEngine`, receives an `Event` and fans it out
//! - `poll_loop`: `PollClient`, drives fetch → dedup → dispatch

pub mod dedup;
pub mod dispatch;
pub mod fetcher;
pub mod filter;
pub mod poll_loop;
pub mod registry;

pub use dedup::DedupWindow;
pub use dispatch::{DispatchEngine, DispatchFailure, Outcome};
pub use fetcher::{
    BearerToken, BoxError, Credential, EventSource, FetchError, FetchMethod, HttpFetcher,
};
pub use filter::{Filter, FilterChain, FilterError, async_predicate, predicate, try_predicate};
pub use poll_loop::{PollClient, PollError, StopReason};
pub use registry::{
    EventHandler, HandlerError, HandlerName, HandlerRegistry, Registered, Registration, handler_fn,
};
