use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use super::ServerPart;
use crate::config::ServerConfig;
use crate::error::Error;
use crate::io::{CancelToken, ServerStream};
use crate::proto::http1::{ParserConfig, SerializerConfig};
use crate::router::Router;
use crate::session::{AcceptorConfig, HttpSession};

const NONE: usize = usize::MAX;

/// Process-wide state a listener shares with the scaffold.
#[derive(Clone, Default)]
pub struct ServerContext {
    /// Set once the first stop signal arrives; sessions answer 503.
    pub stopping: Arc<AtomicBool>,
    /// Sessions currently running, for drain detection.
    pub active_sessions: Arc<AtomicUsize>,
    /// Source of session ids used in log lines.
    pub next_id: Arc<AtomicU64>,
    pub parser_cfg: ParserConfig,
    pub serializer_cfg: SerializerConfig,
}

impl ServerContext {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("stopping", &self.stopping.load(Ordering::Relaxed))
            .field(
                "active_sessions",
                &self.active_sessions.load(Ordering::Relaxed),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Accepting,
    Running,
}

/// One connection slot. `next_idle` threads the intrusive idle list
/// through the fixed worker array.
struct WorkerSlot {
    state: WorkerState,
    next_idle: usize,
    cancel: Option<CancelToken>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            state: WorkerState::Idle,
            next_idle: NONE,
            cancel: None,
            task: None,
        }
    }
}

struct Endpoint {
    std_listener: Option<std::net::TcpListener>,
    listener: Option<Arc<TcpListener>>,
    addr: SocketAddr,
    /// Accept tokens this endpoint still wants outstanding.
    need: u32,
    config: AcceptorConfig,
    #[cfg(feature = "tls")]
    tls: Option<tokio_rustls::TlsAcceptor>,
}

impl Endpoint {
    fn new(std_listener: std::net::TcpListener, addr: SocketAddr, need: u32, config: AcceptorConfig) -> Self {
        Self {
            std_listener: Some(std_listener),
            listener: None,
            addr,
            need,
            config,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}

enum Event {
    Accepted {
        entry: usize,
        worker: usize,
        result: io::Result<(TcpStream, SocketAddr)>,
    },
    Idle {
        worker: usize,
    },
}

struct Seed {
    endpoints: Vec<Endpoint>,
    rx: mpsc::UnboundedReceiver<Event>,
}

/// A listening-port fan-out: one or more bound endpoints served by a
/// fixed pool of connection workers.
///
/// Workers are pulled from an index-linked idle list; each endpoint
/// keeps its `concurrency` accepts outstanding while idle workers
/// remain. A worker runs one [`HttpSession`] to completion, then
/// returns to the idle list and the accept loop refills. All pool
/// bookkeeping happens on a single listener task.
pub struct Listener {
    router: Router,
    concurrency: u32,
    workers: usize,
    backlog: i32,
    reuse_addr: bool,
    ctx: ServerContext,
    seed: Mutex<Option<Seed>>,
    tx: mpsc::UnboundedSender<Event>,
    stop_tx: watch::Sender<bool>,
    addrs: Mutex<Vec<SocketAddr>>,
}

impl Listener {
    pub fn new(router: Router, cfg: &ServerConfig, ctx: ServerContext) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, _) = watch::channel(false);
        Self {
            router,
            concurrency: cfg.concurrency.max(1),
            workers: cfg.workers.max(1),
            backlog: cfg.backlog,
            reuse_addr: cfg.reuse_addr,
            ctx,
            seed: Mutex::new(Some(Seed {
                endpoints: Vec::new(),
                rx,
            })),
            tx,
            stop_tx,
            addrs: Mutex::new(Vec::new()),
        }
    }

    /// Bind an endpoint. Returns the bound address, which matters when
    /// asking for port 0.
    pub fn add_endpoint(&mut self, addr: SocketAddr) -> Result<SocketAddr, Error> {
        let ep = self.bind(addr, AcceptorConfig::default())?;
        self.push_endpoint(ep)
    }

    /// Bind an endpoint flagged administrative.
    pub fn add_admin_endpoint(&mut self, addr: SocketAddr) -> Result<SocketAddr, Error> {
        let config = AcceptorConfig {
            is_tls: false,
            is_admin: true,
        };
        let ep = self.bind(addr, config)?;
        self.push_endpoint(ep)
    }

    /// Bind a TLS endpoint served through `acceptor`. Loading
    /// certificates into the acceptor is the caller's business.
    #[cfg(feature = "tls")]
    pub fn add_tls_endpoint(
        &mut self,
        addr: SocketAddr,
        acceptor: tokio_rustls::TlsAcceptor,
    ) -> Result<SocketAddr, Error> {
        let config = AcceptorConfig {
            is_tls: true,
            is_admin: false,
        };
        let mut ep = self.bind(addr, config)?;
        ep.tls = Some(acceptor);
        self.push_endpoint(ep)
    }

    fn bind(&self, addr: SocketAddr, config: AcceptorConfig) -> Result<Endpoint, Error> {
        let domain = if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        };
        let socket = socket2::Socket::new(
            domain,
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_reuse_address(self.reuse_addr)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(self.backlog)?;
        let std_listener: std::net::TcpListener = socket.into();
        let bound = std_listener.local_addr()?;
        Ok(Endpoint::new(std_listener, bound, self.concurrency, config))
    }

    fn push_endpoint(&mut self, ep: Endpoint) -> Result<SocketAddr, Error> {
        let addr = ep.addr;
        let mut seed = self.seed.lock().unwrap();
        let seed = seed
            .as_mut()
            .ok_or_else(|| Error::Config("listener is already running".to_owned()))?;
        seed.endpoints.push(ep);
        self.addrs.lock().unwrap().push(addr);
        Ok(addr)
    }

    /// Addresses of every bound endpoint.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.addrs.lock().unwrap().clone()
    }
}

impl ServerPart for Listener {
    fn run(&self) {
        let Some(seed) = self.seed.lock().unwrap().take() else {
            return; // already running
        };
        let actor = Actor {
            router: self.router.clone(),
            ctx: self.ctx.clone(),
            workers: (0..self.workers).map(|_| WorkerSlot::new()).collect(),
            idle_head: NONE,
            n_idle: 0,
            entries: seed.endpoints,
            rx: seed.rx,
            tx: self.tx.clone(),
            accept_tasks: Vec::new(),
            stop_rx: self.stop_tx.subscribe(),
        };
        tokio::spawn(actor.run());
    }

    fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// The listener task. Owns the worker array and the idle list; every
/// `need` counter and idle-list operation happens here.
struct Actor {
    router: Router,
    ctx: ServerContext,
    workers: Vec<WorkerSlot>,
    idle_head: usize,
    n_idle: usize,
    entries: Vec<Endpoint>,
    rx: mpsc::UnboundedReceiver<Event>,
    tx: mpsc::UnboundedSender<Event>,
    accept_tasks: Vec<tokio::task::JoinHandle<()>>,
    stop_rx: watch::Receiver<bool>,
}

impl Actor {
    async fn run(mut self) {
        for i in 0..self.workers.len() {
            self.push_idle(i);
        }
        for e in &mut self.entries {
            let std_listener = e.std_listener.take().expect("endpoint seeded");
            match TcpListener::from_std(std_listener) {
                Ok(l) => e.listener = Some(Arc::new(l)),
                Err(err) => warn!(addr = %e.addr, "cannot register listener: {err}"),
            }
        }
        self.entries.retain(|e| e.listener.is_some());
        info!(
            endpoints = self.entries.len(),
            workers = self.workers.len(),
            "listener running"
        );

        loop {
            self.pump_accepts();
            tokio::select! {
                biased;
                _ = self.stop_rx.changed() => {
                    self.shutdown();
                    return;
                }
                ev = self.rx.recv() => match ev {
                    Some(Event::Accepted { entry, worker, result }) => {
                        self.on_accepted(entry, worker, result);
                    }
                    Some(Event::Idle { worker }) => self.on_idle(worker),
                    None => return,
                },
            }
        }
    }

    fn push_idle(&mut self, i: usize) {
        debug_assert_ne!(self.workers[i].state, WorkerState::Idle);
        self.workers[i].state = WorkerState::Idle;
        self.workers[i].next_idle = self.idle_head;
        self.idle_head = i;
        self.n_idle += 1;
        trace!(n_idle = self.n_idle, "worker idle");
    }

    fn pop_idle(&mut self) -> usize {
        debug_assert_ne!(self.idle_head, NONE);
        let i = self.idle_head;
        self.idle_head = self.workers[i].next_idle;
        self.workers[i].next_idle = NONE;
        self.n_idle -= 1;
        i
    }

    /// Issue accepts while idle workers and unfilled endpoints remain.
    fn pump_accepts(&mut self) {
        self.accept_tasks.retain(|t| !t.is_finished());
        loop {
            if self.idle_head == NONE {
                return;
            }
            let Some(entry) = self.entries.iter().position(|e| e.need > 0) else {
                return;
            };
            self.entries[entry].need -= 1;
            let worker = self.pop_idle();
            self.workers[worker].state = WorkerState::Accepting;
            trace!(
                entry,
                need = self.entries[entry].need,
                n_idle = self.n_idle,
                "accept issued"
            );

            let listener = self.entries[entry].listener.clone().unwrap();
            let tx = self.tx.clone();
            self.accept_tasks.push(tokio::spawn(async move {
                let result = listener.accept().await;
                let _ = tx.send(Event::Accepted {
                    entry,
                    worker,
                    result,
                });
            }));
        }
    }

    fn on_accepted(
        &mut self,
        entry: usize,
        worker: usize,
        result: io::Result<(TcpStream, SocketAddr)>,
    ) {
        self.entries[entry].need += 1;
        match result {
            Err(e) => {
                // happens periodically, usually harmless
                debug!("accept failed: {e}");
                self.push_idle(worker);
            }
            Ok((sock, peer)) => {
                trace!(%peer, worker, "accepted");
                self.start_worker(entry, worker, sock);
            }
        }
    }

    fn on_idle(&mut self, worker: usize) {
        self.workers[worker].cancel = None;
        self.workers[worker].task = None;
        self.push_idle(worker);
    }

    fn start_worker(&mut self, entry: usize, worker: usize, sock: TcpStream) {
        let _ = sock.set_nodelay(true);

        let id = self.ctx.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let router = self.router.clone();
        let config = self.entries[entry].config;
        let parser_cfg = self.ctx.parser_cfg.clone();
        let serializer_cfg = self.ctx.serializer_cfg.clone();
        let stopping = self.ctx.stopping.clone();
        let cancel = CancelToken::new();
        let guard = ActiveGuard::new(self.ctx.active_sessions.clone());
        let tx = self.tx.clone();
        #[cfg(feature = "tls")]
        let tls = self.entries[entry].tls.clone();

        self.workers[worker].state = WorkerState::Running;
        self.workers[worker].cancel = Some(cancel.clone());
        self.workers[worker].task = Some(tokio::spawn(async move {
            let _guard = guard;

            #[cfg(feature = "tls")]
            let stream = match &tls {
                Some(acceptor) => match acceptor.accept(sock).await {
                    Ok(s) => ServerStream::Tls(Box::new(s)),
                    Err(e) => {
                        debug!(id, "tls handshake failed: {e}");
                        let _ = tx.send(Event::Idle { worker });
                        return;
                    }
                },
                None => ServerStream::Plain(sock),
            };
            #[cfg(not(feature = "tls"))]
            let stream = ServerStream::Plain(sock);

            let mut session = HttpSession::new(
                id,
                stream,
                router,
                config,
                parser_cfg,
                serializer_cfg,
                stopping,
            )
            .with_cancel_token(cancel);

            if let Err(e) = session.run().await {
                debug!(id, "session ended: {e}");
            }
            session.stream_mut().shutdown().await;
            let _ = tx.send(Event::Idle { worker });
        }));
    }

    /// Forced stop: cancel every worker's stream, abort pending
    /// accepts. In-flight work observes cancellation and winds down.
    fn shutdown(&mut self) {
        for t in self.accept_tasks.drain(..) {
            t.abort();
        }
        for w in &mut self.workers {
            if let Some(c) = w.cancel.take() {
                c.cancel();
            }
            if let Some(t) = w.task.take() {
                t.abort();
            }
        }
        info!("listener stopped");
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
