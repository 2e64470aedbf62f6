use std::path::PathBuf;

use clap::Parser;

use ngapimock::NgApimockServerBuilder;
use tracing_subscriber::EnvFilter;

/// Holds command line parameters provided by the user.
#[derive(Parser, Debug)]
#[clap(version, about = "Scenario-based HTTP API mocking server")]
struct ExecutionParameters {
    #[clap(short, long, env = "NGAPIMOCK_PORT", default_value = "3000")]
    pub port: u16,
    /// Bind to all interfaces instead of loopback only.
    #[clap(short, long, env = "NGAPIMOCK_EXPOSE")]
    pub expose: bool,
    /// Directory with .json mock definition files, loaded at startup.
    #[clap(short, long, env = "NGAPIMOCK_MOCK_FILES_DIR")]
    pub mock_files_dir: Option<PathBuf>,
    /// Base URL for passthrough mocks and requests matching no mock.
    #[clap(short, long, env = "NGAPIMOCK_UPSTREAM")]
    pub upstream: Option<String>,
    #[clap(short, long, env = "NGAPIMOCK_DISABLE_ACCESS_LOG")]
    pub disable_access_log: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ngapimock=info")),
        )
        .init();

    let params: ExecutionParameters = ExecutionParameters::parse();

    tracing::info!(
        "Starting {} server V{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    tracing::info!("{params:?}");

    let server = NgApimockServerBuilder::new()
        .port(params.port)
        .expose(params.expose)
        .print_access_log(!params.disable_access_log)
        .static_mock_dir_option(params.mock_files_dir)
        .upstream_option(params.upstream)
        .build()
        .unwrap_or_else(|err| {
            eprintln!("cannot start server: {err}");
            std::process::exit(1);
        });

    server
        .start_with_signals(None, shutdown_signal())
        .await
        .expect("an error occurred during mock server execution");
}

#[cfg(not(target_os = "windows"))]
async fn shutdown_signal() {
    let mut hangup_stream = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
        .expect("Cannot install SIGHUP signal handler");
    let mut sigint_stream =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Cannot install SIGINT signal handler");
    let mut sigterm_stream =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Cannot install SIGTERM signal handler");

    tokio::select! {
        _val = hangup_stream.recv() => tracing::trace!("Received SIGHUP"),
        _val = sigint_stream.recv() => tracing::trace!("Received SIGINT"),
        _val = sigterm_stream.recv() => tracing::trace!("Received SIGTERM"),
    }
}

#[cfg(target_os = "windows")]
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Cannot install CTRL+C signal handler");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_params_parsing() {
        let params = ExecutionParameters::try_parse_from(["ngapimock"]).unwrap();
        assert_eq!(params.port, 3000);
        assert!(!params.expose);
        assert!(params.mock_files_dir.is_none());

        let params = ExecutionParameters::try_parse_from([
            "ngapimock",
            "-p",
            "4000",
            "-e",
            "-m",
            "mocks",
            "-u",
            "http://localhost:9000",
        ])
        .unwrap();
        assert_eq!(params.port, 4000);
        assert!(params.expose);
        assert_eq!(params.mock_files_dir, Some(PathBuf::from("mocks")));
        assert_eq!(params.upstream.as_deref(), Some("http://localhost:9000"));
        assert!(!params.disable_access_log);
    }
}
