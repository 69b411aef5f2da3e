//! C7: Outbox & dispatcher — durable-or-in-memory queueing, backoff,
//! escalation-aware channel fan-out, and crash recovery for evaluated
//! alerts (spec §4.7).

pub mod channel;
pub mod dispatcher;
pub mod entry;
pub mod store;

pub use channel::{AlertChannel, InMemoryChannel, LogChannel};
pub use dispatcher::OutboxDispatcher;
pub use store::{EnqueueOutcome, MemoryOutboxStore, OutboxStore, SqliteOutboxStore};
