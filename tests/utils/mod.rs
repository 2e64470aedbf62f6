#![allow(dead_code)]

use std::net::SocketAddr;

use ngapimock::{Mock, NgApimockServerBuilder};
use serde_json::json;
use tokio::sync::oneshot;

/// Starts a mock server on a random port in a background thread and returns
/// its bound address. The server lives for the remainder of the test process.
pub fn start_server(definitions: Vec<Mock>) -> SocketAddr {
    let (tx, rx) = oneshot::channel();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("cannot build runtime");
        rt.block_on(async move {
            let server = NgApimockServerBuilder::new()
                .port(0)
                .print_access_log(false)
                .build()
                .expect("cannot build server");
            server.registry().register_mocks(definitions);
            server
                .start_with_signals(Some(tx), std::future::pending::<()>())
                .await
                .expect("mock server failed");
        });
    });

    rx.blocking_recv().expect("server did not report its address")
}

/// Two mocks: `party` with a default `ok` scenario and an `error` scenario,
/// and `guests` without any default scenario.
pub fn party_definitions() -> Vec<Mock> {
    serde_json::from_value(json!([
        {
            "name": "party",
            "expression": "/api/party$",
            "method": "GET",
            "responses": {
                "ok": { "default": true, "status": 200, "data": { "result": "ok" } },
                "error": { "status": 500, "data": { "result": "error" } }
            }
        },
        {
            "name": "guests",
            "expression": "/api/party/guests",
            "method": "GET",
            "responses": {
                "empty": { "status": 200, "data": [] }
            }
        }
    ]))
    .expect("invalid test definitions")
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}
