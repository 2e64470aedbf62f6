//! `ngapimock` is a scenario-based HTTP API mocking server.
//!
//! Mocks are URL/method patterns with a set of named response scenarios.
//! Automated UI tests and manual runtime usage can dynamically select,
//! delay, echo, or bypass ("passthrough") a mock's scenarios at runtime
//! through a small management API under `/ngapimock`, and optionally record
//! live responses.
//!
//! The server runs in two modes per request, derived from the `ngapimockid`
//! header or cookie: *protractor* (session-isolated, so parallel test runs
//! never see each other's state) and *runtime* (one shared partition for
//! ordinary traffic). Isolation is achieved purely through scope-partitioned
//! state keys in a single in-memory [`server::state::Registry`].
//!
//! ```no_run
//! use ngapimock::NgApimockServerBuilder;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = NgApimockServerBuilder::new()
//!         .port(3000)
//!         .static_mock_dir("mocks".into())
//!         .build()
//!         .unwrap();
//!
//!     server.start().await.unwrap();
//! }
//! ```

pub mod common;
pub mod server;

pub use common::data::{Mock, MockResponse};
pub use server::{NgApimockServer, NgApimockServerBuilder};
