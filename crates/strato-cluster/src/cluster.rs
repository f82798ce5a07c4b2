//! Kind registry and activation.
//!
//! A kind names a producer of actors. `activate` spawns a fresh actor of
//! that kind and hands back its typed address — the caller neither knows
//! nor cares which member the actor landed on. Well-known singletons
//! (like the metric sink) register under a name instead.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info};

use crate::actor::{Actor, Addr, spawn};

/// Identity of this cluster member, straight from config.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub id: String,
    pub region: String,
    pub member_addr: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            id: "wasm_member_1".to_string(),
            region: "eu-west".to_string(),
            member_addr: "127.0.0.1:6666".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("unknown actor kind: {0}")]
    UnknownKind(String),

    #[error("kind {0} does not speak the requested message type")]
    KindTypeMismatch(String),

    #[error("no actor registered under name {0}")]
    UnknownName(String),

    #[error("name {0} does not speak the requested message type")]
    NameTypeMismatch(String),
}

type Producer = Box<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>;

pub struct Cluster {
    config: ClusterConfig,
    kinds: RwLock<HashMap<String, Producer>>,
    named: RwLock<HashMap<String, Box<dyn Any + Send + Sync>>>,
    activations: AtomicU64,
}

impl Cluster {
    pub fn new(config: ClusterConfig) -> Arc<Self> {
        info!(
            id = %config.id,
            region = %config.region,
            member_addr = %config.member_addr,
            "cluster member initialized"
        );
        Arc::new(Self {
            config,
            kinds: RwLock::new(HashMap::new()),
            named: RwLock::new(HashMap::new()),
            activations: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Register a producer for `kind`. Each activation spawns a fresh
    /// actor with its own mailbox of `mailbox` slots.
    pub fn register_kind<A, F>(&self, kind: &str, mailbox: usize, producer: F)
    where
        A: Actor,
        F: Fn() -> A + Send + Sync + 'static,
    {
        let boxed: Producer =
            Box::new(move || Box::new(spawn(producer(), mailbox)) as Box<dyn Any + Send + Sync>);
        self.kinds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.to_string(), boxed);
        debug!(kind, "actor kind registered");
    }

    /// Spawn a fresh actor of `kind` and return its address.
    pub fn activate<M: Send + 'static>(&self, kind: &str) -> Result<Addr<M>, ClusterError> {
        let kinds = self.kinds.read().unwrap_or_else(PoisonError::into_inner);
        let producer = kinds
            .get(kind)
            .ok_or_else(|| ClusterError::UnknownKind(kind.to_string()))?;
        let addr = producer()
            .downcast::<Addr<M>>()
            .map_err(|_| ClusterError::KindTypeMismatch(kind.to_string()))?;
        self.activations.fetch_add(1, Ordering::Relaxed);
        Ok(*addr)
    }

    /// Register a well-known address under `name`, replacing any holder.
    pub fn register_named<M: Send + Sync + 'static>(&self, name: &str, addr: Addr<M>) {
        self.named
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Box::new(addr));
        debug!(name, "named actor registered");
    }

    /// Look up a well-known address.
    pub fn named<M: Send + Sync + 'static>(&self, name: &str) -> Result<Addr<M>, ClusterError> {
        let named = self.named.read().unwrap_or_else(PoisonError::into_inner);
        let any = named
            .get(name)
            .ok_or_else(|| ClusterError::UnknownName(name.to_string()))?;
        any.downcast_ref::<Addr<M>>()
            .cloned()
            .ok_or_else(|| ClusterError::NameTypeMismatch(name.to_string()))
    }

    /// How many actors this member has activated. Test instrumentation.
    pub fn activation_count(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use crate::actor::Context;

    struct Echo;

    enum EchoMsg {
        Ping(oneshot::Sender<&'static str>),
    }

    #[async_trait]
    impl Actor for Echo {
        type Msg = EchoMsg;

        async fn handle(&mut self, _ctx: &mut Context<EchoMsg>, msg: EchoMsg) {
            let EchoMsg::Ping(reply) = msg;
            let _ = reply.send("pong");
        }
    }

    #[tokio::test]
    async fn activate_spawns_fresh_actors() {
        let cluster = Cluster::new(ClusterConfig::default());
        cluster.register_kind("echo", 8, || Echo);

        assert_eq!(cluster.activation_count(), 0);

        for expected in 1..=3u64 {
            let addr: Addr<EchoMsg> = cluster.activate("echo").unwrap();
            let (tx, rx) = oneshot::channel();
            addr.send(EchoMsg::Ping(tx)).await.unwrap();
            assert_eq!(rx.await.unwrap(), "pong");
            assert_eq!(cluster.activation_count(), expected);
        }
    }

    #[tokio::test]
    async fn unknown_kind_is_an_error() {
        let cluster = Cluster::new(ClusterConfig::default());
        let err = cluster.activate::<EchoMsg>("nope").unwrap_err();
        assert!(matches!(err, ClusterError::UnknownKind(_)));
    }

    #[tokio::test]
    async fn wrong_message_type_is_an_error() {
        let cluster = Cluster::new(ClusterConfig::default());
        cluster.register_kind("echo", 8, || Echo);
        let err = cluster.activate::<String>("echo").unwrap_err();
        assert!(matches!(err, ClusterError::KindTypeMismatch(_)));
    }

    #[tokio::test]
    async fn named_lookup_round_trips() {
        let cluster = Cluster::new(ClusterConfig::default());
        let addr = crate::actor::spawn(Echo, 8);
        cluster.register_named("echo/1", addr);

        let found: Addr<EchoMsg> = cluster.named("echo/1").unwrap();
        let (tx, rx) = oneshot::channel();
        found.send(EchoMsg::Ping(tx)).await.unwrap();
        assert_eq!(rx.await.unwrap(), "pong");

        assert!(matches!(
            cluster.named::<EchoMsg>("missing"),
            Err(ClusterError::UnknownName(_))
        ));
        assert!(matches!(
            cluster.named::<String>("echo/1"),
            Err(ClusterError::NameTypeMismatch(_))
        ));
    }
}
