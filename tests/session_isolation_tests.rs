use reqwest::blocking::Client;
use serde_json::{json, Value};

mod utils;

fn get_mocks(client: &Client, addr: std::net::SocketAddr, session: Option<&str>) -> Value {
    let mut request = client.get(utils::url(addr, "/ngapimock/mocks"));
    if let Some(session) = session {
        request = request.header("ngapimockid", session);
    }
    request.send().unwrap().json().unwrap()
}

#[test]
fn session_selection_is_invisible_to_other_sessions_and_to_runtime() {
    // Arrange
    let addr = utils::start_server(utils::party_definitions());
    let client = Client::new();

    // Act: S1 selects the error scenario.
    let response = client
        .put(utils::url(addr, "/ngapimock/mocks"))
        .header("ngapimockid", "S1")
        .json(&json!({ "identifier": "party", "scenario": "error" }))
        .send()
        .unwrap();
    assert_eq!(response.status(), 200);

    // Assert: only S1 observes the change.
    assert_eq!(get_mocks(&client, addr, Some("S1"))["selections"]["party"], "error");
    assert_eq!(get_mocks(&client, addr, Some("S2"))["selections"]["party"], "ok");
    assert_eq!(get_mocks(&client, addr, None)["selections"]["party"], "ok");
}

#[test]
fn served_response_is_partitioned_by_session() {
    // Arrange
    let addr = utils::start_server(utils::party_definitions());
    let client = Client::new();
    client
        .put(utils::url(addr, "/ngapimock/mocks"))
        .header("ngapimockid", "S1")
        .json(&json!({ "identifier": "party", "scenario": "error" }))
        .send()
        .unwrap();

    // Act + Assert: S1 gets its scenario, everyone else the default.
    let response = client
        .get(utils::url(addr, "/api/party"))
        .header("ngapimockid", "S1")
        .send()
        .unwrap();
    assert_eq!(response.status(), 500);

    let response = client.get(utils::url(addr, "/api/party")).send().unwrap();
    assert_eq!(response.status(), 200);
}

#[test]
fn session_can_be_supplied_through_a_cookie() {
    // Arrange
    let addr = utils::start_server(utils::party_definitions());
    let client = Client::new();
    client
        .put(utils::url(addr, "/ngapimock/mocks"))
        .header("ngapimockid", "S1")
        .json(&json!({ "identifier": "party", "scenario": "error" }))
        .send()
        .unwrap();

    // Act
    let body: Value = client
        .get(utils::url(addr, "/ngapimock/mocks"))
        .header("cookie", "other=x; ngapimockid=S1")
        .send()
        .unwrap()
        .json()
        .unwrap();

    // Assert
    assert_eq!(body["selections"]["party"], "error");
}

#[test]
fn session_header_takes_precedence_over_the_cookie() {
    // Arrange
    let addr = utils::start_server(utils::party_definitions());
    let client = Client::new();
    client
        .put(utils::url(addr, "/ngapimock/mocks"))
        .header("ngapimockid", "S1")
        .json(&json!({ "identifier": "party", "scenario": "error" }))
        .send()
        .unwrap();

    // Act: header says S2, cookie says S1.
    let body: Value = client
        .get(utils::url(addr, "/ngapimock/mocks"))
        .header("ngapimockid", "S2")
        .header("cookie", "ngapimockid=S1")
        .send()
        .unwrap()
        .json()
        .unwrap();

    // Assert: the untouched S2 partition is served.
    assert_eq!(body["selections"]["party"], "ok");
}

#[test]
fn reset_to_defaults_only_affects_the_requesting_session() {
    // Arrange
    let addr = utils::start_server(utils::party_definitions());
    let client = Client::new();
    for session in ["S1", "S2"] {
        client
            .put(utils::url(addr, "/ngapimock/mocks"))
            .header("ngapimockid", session)
            .json(&json!({ "identifier": "party", "scenario": "error" }))
            .send()
            .unwrap();
    }

    // Act
    client
        .put(utils::url(addr, "/ngapimock/mocks/defaults"))
        .header("ngapimockid", "S1")
        .send()
        .unwrap();

    // Assert
    assert_eq!(get_mocks(&client, addr, Some("S1"))["selections"]["party"], "ok");
    assert_eq!(get_mocks(&client, addr, Some("S2"))["selections"]["party"], "error");
}

#[test]
fn echo_and_delay_overrides_are_partitioned_by_session() {
    // Arrange
    let addr = utils::start_server(utils::party_definitions());
    let client = Client::new();

    // Act
    let response = client
        .put(utils::url(addr, "/ngapimock/mocks"))
        .header("ngapimockid", "S1")
        .json(&json!({ "identifier": "party", "delay": 250, "echo": true }))
        .send()
        .unwrap();
    assert_eq!(response.status(), 200);

    // Assert
    let s1 = get_mocks(&client, addr, Some("S1"));
    assert_eq!(s1["delays"]["party"], 250);
    assert_eq!(s1["echos"]["party"], true);

    let runtime = get_mocks(&client, addr, None);
    assert!(runtime["delays"].as_object().unwrap().is_empty());
    assert!(runtime["echos"].as_object().unwrap().is_empty());
}
