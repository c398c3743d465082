//! Startup orchestration.
//!
//! # Responsibilities
//! - Validate configuration and prepare the state directory
//! - Obtain the listener for the configured mode
//! - Start the TCP or HTTP proxy
//! - Block until the process-wide shutdown fires
//!
//! # Design Decisions
//! - Fail fast: configuration and listener errors are fatal and trigger shutdown
//! - Listeners start last (traffic only when ready)
//! - A serve error is logged and triggers shutdown; shutdown is the only way
//!   `run` returns

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::{ConfigError, ProxyConfig};
use crate::error::ProxyError;
use crate::http::HttpProxy;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::listener::{resolve_bind_address, Listener, ListenerMode};
use crate::net::{BufferPool, ConnectionForwarder, ListenerStrategy, UpstreamDialer};
use crate::overlay::{IdentityProvider, OverlayListenerProvider};
use crate::tcp::TcpProxy;

/// Top-level orchestrator: one listener, one upstream, one proxy flavor.
pub struct ProxyCore {
    config: Arc<ProxyConfig>,
    overlay: Arc<dyn OverlayListenerProvider>,
    identity: Arc<dyn IdentityProvider>,
    shutdown: Shutdown,
    pool: Arc<BufferPool>,
}

impl ProxyCore {
    /// Validate `config` and build the core. Nothing is bound yet.
    pub fn new(
        config: ProxyConfig,
        overlay: Arc<dyn OverlayListenerProvider>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self, ProxyError> {
        config.validate()?;
        if let Some(dir) = &config.node.state_dir {
            prepare_state_dir(dir)?;
        }

        Ok(Self {
            config: Arc::new(config),
            overlay,
            identity,
            shutdown: Shutdown::new(),
            pool: Arc::new(BufferPool::default()),
        })
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Bind the listener and start serving in the background.
    ///
    /// Any failure here is logged and triggers shutdown before returning.
    pub async fn start(self) -> Result<RunningProxy, ProxyError> {
        match self.try_start().await {
            Ok(running) => Ok(running),
            Err(e) => {
                tracing::error!(error = %e, "Proxy failed to start");
                self.shutdown.trigger();
                Err(e)
            }
        }
    }

    async fn try_start(&self) -> Result<RunningProxy, ProxyError> {
        let config = &self.config;
        let mode = config.listener_mode();
        let address = resolve_bind_address(
            config.listener.bind_address.as_deref(),
            config.listener.http,
            mode,
        )?;

        let strategy = ListenerStrategy::new(Arc::clone(&self.overlay));
        let inner = strategy
            .obtain(mode, &config.listener.network, &address)
            .await?;
        let listener = Listener::new(inner, config.listener.max_connections);
        let local_addr = listener.local_addr()?;
        let dialer = UpstreamDialer::from_config(&config.upstream);

        tracing::info!(
            mode = %mode,
            address = %local_addr,
            http = config.listener.http,
            upstream = %dialer.address(),
            "Proxy started"
        );

        let shutdown = self.shutdown.clone();
        let forwarder = ConnectionForwarder::new(Arc::clone(&self.pool));
        let task = if config.listener.http {
            let canonical = self
                .overlay
                .canonical_hostnames()
                .into_iter()
                .next()
                .unwrap_or_default();
            let proxy = HttpProxy::new(
                Arc::clone(&self.identity),
                dialer,
                forwarder,
                &canonical,
                listener.is_encrypted(),
                config.timeouts.clone(),
            );
            tokio::spawn(supervise(proxy.serve(listener, shutdown.clone()), shutdown.clone()))
        } else {
            let proxy = TcpProxy::new(dialer, forwarder, config.timeouts.tcp_idle());
            tokio::spawn(supervise(proxy.serve(listener, shutdown.clone()), shutdown.clone()))
        };

        Ok(RunningProxy {
            local_addr,
            mode,
            shutdown,
            task,
        })
    }

    /// Start, then block until shutdown.
    pub async fn run(self) -> Result<(), ProxyError> {
        self.start().await?.wait().await
    }
}

/// A proxy whose listener is bound and serving.
#[derive(Debug)]
pub struct RunningProxy {
    local_addr: SocketAddr,
    mode: ListenerMode,
    shutdown: Shutdown,
    task: JoinHandle<io::Result<()>>,
}

impl RunningProxy {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn mode(&self) -> ListenerMode {
        self.mode
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Wait for shutdown, then for the accept loop to release the listener.
    pub async fn wait(self) -> Result<(), ProxyError> {
        self.shutdown.cancelled().await;
        match self.task.await {
            Ok(result) => result.map_err(ProxyError::from),
            Err(e) => Err(ProxyError::Io(io::Error::other(e))),
        }
    }
}

async fn supervise<F>(serve: F, shutdown: Shutdown) -> io::Result<()>
where
    F: Future<Output = io::Result<()>>,
{
    let result = serve.await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Proxy stopped serving");
        shutdown.trigger();
    }
    result
}

/// Create the node state directory, private to the current user.
fn prepare_state_dir(dir: &Path) -> Result<(), ConfigError> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|source| ConfigError::StateDir {
        path: dir.to_path_buf(),
        source,
    })
}
