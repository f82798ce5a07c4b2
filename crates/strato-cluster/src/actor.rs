//! Actors, addresses, and repeaters.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Mailbox capacity used when a kind does not pick its own.
pub const DEFAULT_MAILBOX: usize = 64;

/// A message-driven unit of execution.
///
/// `handle` runs for one message at a time; the next message is only
/// picked up after `handle` returns. Calling [`Context::poison`] inside
/// `handle` stops the actor after the current message.
#[async_trait]
pub trait Actor: Send + 'static {
    type Msg: Send + 'static;

    async fn started(&mut self, _ctx: &mut Context<Self::Msg>) {}

    async fn handle(&mut self, ctx: &mut Context<Self::Msg>, msg: Self::Msg);

    async fn stopped(&mut self) {}
}

#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError {
    /// The mailbox is at capacity.
    Full,
    /// The actor is gone.
    Closed,
}

/// The actor behind an address terminated; the message was dropped.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[error("actor mailbox closed")]
pub struct MailboxClosed;

/// The sending half of an actor's mailbox.
pub struct Addr<M> {
    tx: mpsc::Sender<M>,
}

impl<M> Clone for Addr<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<M> std::fmt::Debug for Addr<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Addr").finish_non_exhaustive()
    }
}

impl<M: Send> Addr<M> {
    /// Deliver `msg`, waiting for mailbox space. Errors only when the
    /// actor terminated.
    pub async fn send(&self, msg: M) -> Result<(), MailboxClosed> {
        self.tx.send(msg).await.map_err(|_| MailboxClosed)
    }

    /// Deliver without waiting; a full mailbox rejects the message.
    pub fn try_send(&self, msg: M) -> Result<(), TrySendError> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TrySendError::Full,
            mpsc::error::TrySendError::Closed(_) => TrySendError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle to a periodic self-tick task. Cancel it or let it die with the
/// actor: once the mailbox closes, the ticker stops on its own.
#[derive(Debug)]
pub struct Repeater {
    handle: AbortHandle,
}

impl Repeater {
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

/// Per-actor state handed to every `handle` call.
pub struct Context<M> {
    addr: Addr<M>,
    stopping: bool,
}

impl<M: Send + 'static> Context<M> {
    pub fn addr(&self) -> Addr<M> {
        self.addr.clone()
    }

    /// Stop this actor after the current message.
    pub fn poison(&mut self) {
        self.stopping = true;
    }

    /// Send `msg` to self every `period`, starting one period from now.
    /// Ticks that find the mailbox full are dropped.
    pub fn send_repeat(&self, msg: M, period: Duration) -> Repeater
    where
        M: Clone,
    {
        let addr = self.addr();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first interval tick completes immediately; skip it so
            // the first delivery lands a full period out.
            interval.tick().await;
            loop {
                interval.tick().await;
                match addr.try_send(msg.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full) => {
                        debug!("mailbox full, dropping tick");
                    }
                    Err(TrySendError::Closed) => break,
                }
            }
        });
        Repeater {
            handle: handle.abort_handle(),
        }
    }
}

/// Spawn `actor` onto its own mailbox and return its address.
pub fn spawn<A: Actor>(mut actor: A, mailbox: usize) -> Addr<A::Msg> {
    let (tx, mut rx) = mpsc::channel(mailbox);
    let addr = Addr { tx };
    let mut ctx = Context {
        addr: addr.clone(),
        stopping: false,
    };

    tokio::spawn(async move {
        actor.started(&mut ctx).await;
        while !ctx.stopping {
            let Some(msg) = rx.recv().await else {
                break;
            };
            actor.handle(&mut ctx, msg).await;
        }
        rx.close();
        actor.stopped().await;
    });

    addr
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use tokio::sync::oneshot;

    struct Recorder {
        seen: Vec<u64>,
        done: Option<oneshot::Sender<Vec<u64>>>,
        poison_at: u64,
    }

    #[async_trait]
    impl Actor for Recorder {
        type Msg = u64;

        async fn handle(&mut self, ctx: &mut Context<u64>, msg: u64) {
            self.seen.push(msg);
            if msg == self.poison_at {
                ctx.poison();
            }
        }

        async fn stopped(&mut self) {
            if let Some(done) = self.done.take() {
                let _ = done.send(std::mem::take(&mut self.seen));
            }
        }
    }

    #[tokio::test]
    async fn messages_arrive_in_send_order() {
        let (done_tx, done_rx) = oneshot::channel();
        let addr = spawn(
            Recorder {
                seen: Vec::new(),
                done: Some(done_tx),
                poison_at: 9,
            },
            DEFAULT_MAILBOX,
        );

        for i in 0..10u64 {
            addr.send(i).await.unwrap();
        }

        let seen = done_rx.await.unwrap();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn poison_stops_processing_immediately() {
        let (done_tx, done_rx) = oneshot::channel();
        let addr = spawn(
            Recorder {
                seen: Vec::new(),
                done: Some(done_tx),
                poison_at: 2,
            },
            DEFAULT_MAILBOX,
        );

        for i in 0..100u64 {
            if addr.send(i).await.is_err() {
                break;
            }
        }

        let seen = done_rx.await.unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    struct Ticker {
        ticks: Arc<AtomicU64>,
    }

    #[derive(Clone)]
    struct Tick;

    #[async_trait]
    impl Actor for Ticker {
        type Msg = Tick;

        async fn handle(&mut self, _ctx: &mut Context<Tick>, _msg: Tick) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeater_ticks_periodically() {
        let ticks = Arc::new(AtomicU64::new(0));
        let addr = spawn(
            Ticker {
                ticks: ticks.clone(),
            },
            DEFAULT_MAILBOX,
        );

        // Drive the repeater directly against the ticker's address.
        let ctx = Context {
            addr: addr.clone(),
            stopping: false,
        };
        let repeater = ctx.send_repeat(Tick, Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(5500)).await;
        // Let the mailbox drain.
        tokio::time::resume();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let seen = ticks.load(Ordering::SeqCst);
        assert!((4..=6).contains(&seen), "saw {seen} ticks");

        repeater.cancel();
    }

    #[tokio::test]
    async fn send_to_dead_actor_fails() {
        let (done_tx, done_rx) = oneshot::channel();
        let addr = spawn(
            Recorder {
                seen: Vec::new(),
                done: Some(done_tx),
                poison_at: 0,
            },
            DEFAULT_MAILBOX,
        );

        addr.send(0).await.unwrap();
        done_rx.await.unwrap();

        // The mailbox closes with the actor.
        assert!(addr.send(1).await.is_err());
        assert!(addr.is_closed());
    }
}
