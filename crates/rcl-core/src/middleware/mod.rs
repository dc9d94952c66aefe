//! In-process middleware.
//!
//! Stands in for the external transport: topics deliver to every
//! subscription of the same [`Context`], services and clients are matched by
//! service name inside a context. Each entity handle owns its registry record
//! and implements [`Waitable`](crate::ports::Waitable) where it can be waited on.

pub mod client;
pub mod context;
pub mod event;
pub mod guard;
mod names;
pub mod node;
pub mod publisher;
pub mod service;
mod state;
pub mod subscription;
pub mod timer;

pub use client::Client;
pub use context::Context;
pub use event::EventHandle;
pub use guard::GuardCondition;
pub use node::Node;
pub use publisher::Publisher;
pub use service::Service;
pub use subscription::Subscription;
pub use timer::Timer;
