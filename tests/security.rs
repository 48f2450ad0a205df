//! Secure connections: server authentication, mutual TLS and the unverified mode.

use ceptic::config::{ClientConfig, SecurityConfig, ServerConfig};
use ceptic::{command, handler, CepticClient, CepticError, CepticServer, Request, Response, StatusCode};

mod common;

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/tls/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn secure_server_config(require_client_cert: bool) -> ServerConfig {
    ServerConfig {
        security: SecurityConfig {
            secure: true,
            local_cert: Some(fixture("server.pem")),
            local_key: Some(fixture("server.key")),
            remote_cert: require_client_cert.then(|| fixture("ca.pem")),
            verify_remote: true,
        },
        ..common::server_config()
    }
}

fn secure_client_config(security: SecurityConfig) -> ClientConfig {
    ClientConfig {
        security,
        ..common::client_config()
    }
}

fn verifying() -> SecurityConfig {
    SecurityConfig {
        secure: true,
        remote_cert: Some(fixture("ca.pem")),
        verify_remote: true,
        ..Default::default()
    }
}

fn echo_routes(server: &CepticServer) {
    server.add_command(command::POST, None);
    server
        .add_route(
            command::POST,
            "/",
            handler(|request: Request| async move {
                Response::new(StatusCode::OK).with_body(request.body().to_vec())
            }),
        )
        .unwrap();
}

#[tokio::test]
async fn test_secure_request_round_trip() {
    let (server, addr) = common::start_server(secure_server_config(false), echo_routes).await;
    let client = CepticClient::new(secure_client_config(verifying())).unwrap();
    assert!(client.is_secure());

    let body = vec![b's'; 9_000];
    let response = client
        .connect(Request::new(command::POST, common::url(addr, "/")).with_body(body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), body.as_slice());
    assert_eq!(server.manager_count(), 1);

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_unverified_client_accepts_any_server() {
    let (server, addr) = common::start_server(secure_server_config(false), echo_routes).await;
    let client = CepticClient::new(secure_client_config(SecurityConfig {
        secure: true,
        verify_remote: false,
        ..Default::default()
    }))
    .unwrap();

    let response = client
        .connect(Request::new(command::POST, common::url(addr, "/")).with_body(b"hi".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.body(), b"hi");

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_untrusted_server_rejected() {
    let (server, addr) = common::start_server(secure_server_config(false), echo_routes).await;
    // A leaf certificate is not an authority, so nothing chains to it.
    let client = CepticClient::new(secure_client_config(SecurityConfig {
        remote_cert: Some(fixture("client.pem")),
        ..verifying()
    }))
    .unwrap();

    let err = client
        .connect(Request::new(command::POST, common::url(addr, "/")))
        .await
        .unwrap_err();
    assert!(matches!(err, CepticError::Tls(_)), "unexpected error {err:?}");
    assert_eq!(client.manager_count(), 0);

    server.stop();
}

#[tokio::test]
async fn test_client_certificate_checked() {
    let (server, addr) = common::start_server(secure_server_config(true), echo_routes).await;

    let trusted = CepticClient::new(secure_client_config(SecurityConfig {
        local_cert: Some(fixture("client.pem")),
        local_key: Some(fixture("client.key")),
        ..verifying()
    }))
    .unwrap();
    let response = trusted
        .connect(Request::new(command::POST, common::url(addr, "/")).with_body(b"ok".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    trusted.stop();

    for security in [
        SecurityConfig {
            local_cert: Some(fixture("rogue_client.pem")),
            local_key: Some(fixture("rogue_client.key")),
            ..verifying()
        },
        verifying(),
    ] {
        let client = CepticClient::new(secure_client_config(security)).unwrap();
        let result = client
            .connect_standalone(Request::new(command::POST, common::url(addr, "/")))
            .await;
        assert!(result.is_err(), "server accepted a client it should reject");
        assert_eq!(client.manager_count(), 0);
    }

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(server.manager_count(), 0);
    server.stop();
}
