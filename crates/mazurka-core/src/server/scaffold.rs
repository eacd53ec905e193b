use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::info;

use super::listener::{Listener, ServerContext};
use crate::config::ServerConfig;
use crate::error::Error;
use crate::router::Router;
use crate::store::TypeStore;

/// A component managed by the [`Server`]: started by `run`, stopped in
/// reverse registration order during shutdown.
pub trait ServerPart: Send + Sync {
    fn run(&self);
    fn stop(&self);
}

/// The process scaffold: a services registry, registered parts, signal
/// handling and the timed graceful shutdown.
///
/// The first SIGINT/SIGTERM flips the stopping flag (sessions answer
/// `503`, connections close after their current response). A second
/// signal, a drained worker pool or the grace timer then stops every
/// part in reverse order.
pub struct Server {
    config: ServerConfig,
    services: TypeStore,
    parts: Vec<Arc<dyn ServerPart>>,
    ctx: ServerContext,
    stopped: AtomicBool,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let mut services = TypeStore::new();
        services.insert(config.parser_config());
        services.insert(config.serializer_config());
        let ctx = ServerContext {
            parser_cfg: config.parser_config(),
            serializer_cfg: config.serializer_config(),
            ..ServerContext::new()
        };
        Self {
            config,
            services,
            parts: Vec::new(),
            ctx,
            stopped: AtomicBool::new(false),
        }
    }

    /// The type-keyed registry of process singletons.
    pub fn services(&mut self) -> &mut TypeStore {
        &mut self.services
    }

    /// Shared state handed to parts built outside [`Server::listen`].
    pub fn context(&self) -> ServerContext {
        self.ctx.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.ctx.stopping.load(Ordering::Acquire)
    }

    /// Register a part. Parts start in registration order and stop in
    /// reverse.
    pub fn add_part(&mut self, part: Arc<dyn ServerPart>) -> &mut Self {
        self.parts.push(part);
        self
    }

    /// Bind `addr` and serve `router` on it through a new listener.
    pub fn listen(mut self, addr: &str, router: Router) -> Result<Self, Error> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| Error::Config(format!("invalid listen address {addr:?}")))?;
        let mut listener = Listener::new(router, &self.config, self.ctx.clone());
        listener.add_endpoint(addr)?;
        self.parts.push(Arc::new(listener));
        Ok(self)
    }

    /// Block until a stop signal arrives and shutdown completes.
    pub async fn run(self) -> Result<(), Error> {
        self.run_until(wait_for_signal()).await
    }

    /// Like [`run`](Server::run), with a caller-supplied shutdown
    /// trigger in place of the first signal.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
        for part in &self.parts {
            part.run();
        }
        info!("server running");

        shutdown.await;
        self.ctx.stopping.store(true, Ordering::Release);
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        info!(
            "shutdown requested; draining for up to {}s",
            grace.as_secs()
        );

        tokio::select! {
            _ = wait_for_signal() => info!("forced stop"),
            _ = self.drain(grace) => {}
        }

        self.stop();
        Ok(())
    }

    /// Wait until every session has finished or the grace period
    /// elapses.
    async fn drain(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.ctx.active_sessions.load(Ordering::Acquire) == 0 {
                info!("all sessions drained");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                info!("grace period elapsed");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Stop every part, once, in reverse registration order.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return; // signal and timer can race
        }
        for part in self.parts.iter().rev() {
            part.stop();
        }
        info!("server stopped");
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("signal handler installation");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        log: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl ServerPart for Recorder {
        fn run(&self) {
            self.log.lock().unwrap().push(format!("run {}", self.name));
        }
        fn stop(&self) {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
        }
    }

    #[tokio::test]
    async fn parts_stop_in_reverse_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut server = Server::new(ServerConfig {
            shutdown_grace_secs: 0,
            ..Default::default()
        });
        server.add_part(Arc::new(Recorder {
            name: "a",
            log: log.clone(),
        }));
        server.add_part(Arc::new(Recorder {
            name: "b",
            log: log.clone(),
        }));

        server.run_until(async {}).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            ["run a", "run b", "stop b", "stop a"]
        );
    }

    #[tokio::test]
    async fn stopping_flag_flips_before_parts_stop() {
        let server = Server::new(ServerConfig {
            shutdown_grace_secs: 0,
            ..Default::default()
        });
        let ctx = server.context();
        assert!(!server.is_stopping());
        server.run_until(async {}).await.unwrap();
        assert!(ctx.stopping.load(Ordering::Acquire));
    }

    #[test]
    fn services_hold_coder_configs() {
        let mut server = Server::new(ServerConfig::default());
        assert!(
            server
                .services()
                .find::<crate::proto::http1::ParserConfig>()
                .is_some()
        );
        assert!(
            server
                .services()
                .find::<crate::proto::http1::SerializerConfig>()
                .is_some()
        );
    }
}
