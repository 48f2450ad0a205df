//! End-to-end request/response tests over real sockets.

use std::time::Duration;

use ceptic::routing::CommandSettings;
use ceptic::{command, handler, CepticError, Request, Response, StatusCode};

mod common;

fn ok_server(server: &ceptic::CepticServer) {
    server.add_command(command::GET, None);
    server
        .add_route(command::GET, "/", handler(|_| async { Response::new(StatusCode::OK) }))
        .unwrap();
}

fn echo_server(server: &ceptic::CepticServer) {
    server.add_command(command::POST, None);
    server
        .add_route(
            command::POST,
            "echo",
            handler(|request: Request| async move {
                Response::new(StatusCode::OK).with_body(request.body().to_vec())
            }),
        )
        .unwrap();
}

#[tokio::test]
async fn test_get_root_ok() {
    let (server, addr) = common::start_server(common::server_config(), ok_server).await;
    let client = common::client();

    let response = client.connect(Request::new(command::GET, common::url(addr, "/"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.body().is_empty());
    assert!(!response.exchange());

    let stream = response.stream().expect("response carries its stream");
    assert!(stream.is_stopped());
    let err = stream.receive(Duration::from_millis(200), 200).await.unwrap_err();
    assert!(matches!(err, CepticError::StreamClosed(_)), "unexpected error {err:?}");

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_post_body_echoed_across_frames() {
    let (server, addr) = common::start_server(common::server_config(), echo_server).await;
    let client = common::client();

    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let request = Request::new(command::POST, common::url(addr, "echo")).with_body(body.clone());
    let response = client.connect(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().content_length, Some(body.len() as u64));
    assert_eq!(response.body(), body.as_slice());

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_encoded_body_round_trip() {
    let (server, addr) = common::start_server(common::server_config(), echo_server).await;
    let client = common::client();

    let body = b"compress me ".repeat(500);
    let request = Request::new(command::POST, common::url(addr, "echo"))
        .with_body(body.clone())
        .with_encoding("gzip,base64");
    let response = client.connect(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), body.as_slice());

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_unknown_route_not_found() {
    let (server, addr) = common::start_server(common::server_config(), ok_server).await;
    let client = common::client();

    let response = client
        .connect(Request::new(command::GET, common::url(addr, "missing")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!response.errors().is_empty());
    let stream = response.stream().expect("rejected responses keep their stream");
    assert!(stream.is_stopped());

    let response = client
        .connect(Request::new(command::DELETE, common::url(addr, "/")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_unknown_encoding_bad_request() {
    let (server, addr) = common::start_server(common::server_config(), ok_server).await;
    let client = common::client();

    let request = Request::new(command::GET, common::url(addr, "/")).with_encoding("zip");
    let response = client.connect(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.errors().iter().any(|e| e.contains("zip")));

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_body_over_endpoint_limit_rejected() {
    let (server, addr) = common::start_server(common::server_config(), |server| {
        server.add_command(command::POST, None);
        server
            .add_route_with_settings(
                command::POST,
                "small",
                handler(|_| async { Response::new(StatusCode::OK) }),
                CommandSettings::with_body_max(10),
            )
            .unwrap();
    })
    .await;
    let client = common::client();

    let request = Request::new(command::POST, common::url(addr, "small")).with_body(vec![7; 11]);
    let response = client.connect(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = Request::new(command::POST, common::url(addr, "small")).with_body(vec![7; 10]);
    let response = client.connect(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_variables_and_query_reach_handler() {
    let (server, addr) = common::start_server(common::server_config(), |server| {
        server.add_command(command::GET, None);
        server
            .add_route(
                command::GET,
                "users/<id>/posts/<post>",
                handler(|request: Request| async move {
                    let body = format!(
                        "{}:{}:{}",
                        request.values.get("id").cloned().unwrap_or_default(),
                        request.values.get("post").cloned().unwrap_or_default(),
                        request.query_params.get("sort").cloned().unwrap_or_default(),
                    );
                    Response::new(StatusCode::OK).with_body(body.into_bytes())
                }),
            )
            .unwrap();
    })
    .await;
    let client = common::client();

    let response = client
        .connect(Request::new(command::GET, common::url(addr, "users/42/posts/7?sort=asc")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), b"42:7:asc");

    client.stop();
    server.stop();
}

#[tokio::test]
async fn test_pooled_and_standalone_connections() {
    let (server, addr) = common::start_server(common::server_config(), ok_server).await;
    let client = common::client();

    for _ in 0..3 {
        let response = client.connect(Request::new(command::GET, common::url(addr, "/"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(client.manager_count(), 1);

    let response = client
        .connect_standalone(Request::new(command::GET, common::url(addr, "/")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(client.manager_count(), 2);

    client.stop();
    assert_eq!(client.manager_count(), 0);
    server.stop();
}

#[tokio::test]
async fn test_server_stop_drops_connections() {
    let (server, addr) = common::start_server(common::server_config(), ok_server).await;
    let client = common::client();

    client.connect(Request::new(command::GET, common::url(addr, "/"))).await.unwrap();
    assert_eq!(server.manager_count(), 1);

    server.stop();
    assert_eq!(server.manager_count(), 0);
    assert!(server.is_stopped());
    client.stop();
}

#[tokio::test]
async fn test_invalid_url_rejected_before_connecting() {
    let client = common::client();
    let err = client.connect(Request::new(command::GET, "localhost:notaport/")).await.unwrap_err();
    assert!(matches!(err, CepticError::Request(_)));
    let err = client.connect(Request::new("", "localhost")).await.unwrap_err();
    assert!(matches!(err, CepticError::Request(_)));
    assert_eq!(client.manager_count(), 0);
}
