//! Several engines on one runtime.

use tokio::task::JoinSet;
use tracing::{error, info};

use crate::engine::{Engine, EngineError, EngineHandle};

/// Runs independent engines concurrently.
///
/// Engines share nothing but the runtime: each has its own connection,
/// session and reconnect policy.
#[derive(Debug, Default)]
pub struct ClientPool {
    engines: Vec<(String, Engine)>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an engine under `name`, returning its handle.
    pub fn add(&mut self, name: impl Into<String>, engine: Engine) -> EngineHandle {
        let handle = engine.handle();
        self.engines.push((name.into(), engine));
        handle
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Run every engine until it finishes, in completion order.
    ///
    /// A panicking engine is logged and left out of the results.
    pub async fn run(self) -> Vec<(String, Result<(), EngineError>)> {
        let mut set = JoinSet::new();
        for (name, mut engine) in self.engines {
            info!(%name, "starting engine");
            set.spawn(async move {
                let outcome = engine.run().await;
                (name, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(set.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((name, outcome)) => {
                    if let Err(e) = &outcome {
                        error!(%name, "engine stopped: {}", e);
                    }
                    outcomes.push((name, outcome));
                }
                Err(e) => error!("engine task failed: {}", e),
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn unreachable_config(port: u16) -> EngineConfig {
        let mut config = EngineConfig::new("127.0.0.1", "bot");
        config.server.port = port;
        config
    }

    #[tokio::test]
    async fn test_runs_every_engine() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut pool = ClientPool::new();
        assert!(pool.is_empty());
        for name in ["a", "b"] {
            let (engine, _handle) = Engine::new(unreachable_config(port));
            pool.add(name, engine);
        }
        assert_eq!(pool.len(), 2);

        let mut outcomes = pool.run().await;
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].0, "a");
        assert_eq!(outcomes[1].0, "b");
        assert!(outcomes
            .iter()
            .all(|(_, outcome)| matches!(outcome, Err(EngineError::Connect(_)))));
    }

    #[tokio::test]
    async fn test_empty_pool() {
        assert!(ClientPool::new().run().await.is_empty());
    }
}
