//! strato-cluster — the actor substrate the platform runs on.
//!
//! Each actor is a single-threaded consumer of its own FIFO mailbox,
//! running as a tokio task. Actors never share mutable state; everything
//! crosses actor boundaries as a message. The [`Cluster`] names actor
//! kinds and activates fresh instances on demand — activation is
//! constant-time and messages to one address arrive in send order.

pub mod actor;
pub mod cluster;

pub use actor::{Actor, Addr, Context, MailboxClosed, Repeater, TrySendError, spawn};
pub use cluster::{Cluster, ClusterConfig, ClusterError};
