//! Scenario: handshake happy path.
//!
//! A client sends `SUP("VAX")`, the server answers with its supported
//! versions and advertised protocols, the client acks a version, and both
//! sides land in `BOUND`.

mod support;

use rapace::{FrameTransport, Session, SessionState};

#[tokio::test]
async fn handshake_happy_path_lands_both_sides_in_bound() {
    support::init_tracing();

    let (client_t, server_t) = FrameTransport::pair().unwrap();
    let registry = support::demo_registry();

    let mut server = Session::server(server_t, registry.clone(), vec![1]);
    let mut client = Session::client(client_t, registry);

    let server_task = tokio::spawn(async move {
        server.run().await.unwrap();
        server
    });

    client.connect().await.unwrap();
    assert_eq!(client.state(), SessionState::Bound);
    assert_eq!(client.chosen_version(), Some(1));

    drop(client);
    let server = server_task.await.unwrap();
    assert_eq!(server.chosen_version(), Some(1));
}

#[tokio::test]
async fn handshake_picks_highest_mutually_supported_version() {
    support::init_tracing();

    let (client_t, server_t) = FrameTransport::pair().unwrap();
    let registry = support::demo_registry();

    let mut server = Session::server(server_t, registry.clone(), vec![1, 2, 3]);
    let mut client = Session::client(client_t, registry);

    let server_task = tokio::spawn(async move {
        server.run().await.unwrap();
    });

    client.connect().await.unwrap();
    assert_eq!(client.chosen_version(), Some(3));

    drop(client);
    server_task.await.unwrap();
}
