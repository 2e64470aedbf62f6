use std::path::PathBuf;
use std::sync::Arc;

use crate::common::http::UpstreamHttpClient;
use crate::server::handler::Dispatcher;
use crate::server::loader;
use crate::server::server::{Error, NgApimockServer};
use crate::server::state::Registry;

/// Builds a configured [`NgApimockServer`].
pub struct NgApimockServerBuilder {
    port: u16,
    expose: bool,
    print_access_log: bool,
    mock_files_dir: Option<PathBuf>,
    upstream: Option<String>,
}

impl NgApimockServerBuilder {
    pub fn new() -> Self {
        Self {
            port: 3000,
            expose: false,
            print_access_log: true,
            mock_files_dir: None,
            upstream: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Bind to all interfaces instead of loopback only.
    pub fn expose(mut self, expose: bool) -> Self {
        self.expose = expose;
        self
    }

    pub fn print_access_log(mut self, print_access_log: bool) -> Self {
        self.print_access_log = print_access_log;
        self
    }

    /// Directory with `.json` mock definition files loaded at build time.
    pub fn static_mock_dir(self, dir: PathBuf) -> Self {
        self.static_mock_dir_option(Some(dir))
    }

    pub fn static_mock_dir_option(mut self, dir: Option<PathBuf>) -> Self {
        self.mock_files_dir = dir;
        self
    }

    /// Base URL requests are forwarded to for passthrough mocks and requests
    /// matching no mock at all.
    pub fn upstream(self, upstream: impl Into<String>) -> Self {
        self.upstream_option(Some(upstream.into()))
    }

    pub fn upstream_option(mut self, upstream: Option<String>) -> Self {
        self.upstream = upstream;
        self
    }

    pub fn build(self) -> Result<NgApimockServer, Error> {
        let registry = Arc::new(Registry::new());

        if let Some(dir) = &self.mock_files_dir {
            let definitions = loader::load_mock_definitions(dir)?;
            tracing::info!(
                "registering {} mock definition(s) from {}",
                definitions.len(),
                dir.display()
            );
            registry.register_mocks(definitions);
        }

        let upstream = self
            .upstream
            .map(|upstream| upstream.trim_end_matches('/').to_string());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            upstream,
            Arc::new(UpstreamHttpClient::new()),
            self.print_access_log,
        ));

        let host = if self.expose { "0.0.0.0" } else { "127.0.0.1" };
        Ok(NgApimockServer::new(registry, dispatcher, host, self.port))
    }
}

impl Default for NgApimockServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
