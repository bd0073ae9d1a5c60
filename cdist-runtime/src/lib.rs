//! The per-target Runtime (spec §4.2): lifecycle steps plus the per-object
//! primitives the Object Manager composes into prepare/apply.

mod lifecycle;
mod messages;
mod object_ops;
mod runtime;

pub use messages::MessagesScope;
pub use runtime::Runtime;
