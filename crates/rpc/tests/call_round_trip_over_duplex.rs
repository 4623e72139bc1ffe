//! A full client/server call exchange over an in-memory duplex
//! connection, including a handler-reported remote error.

use rpc::call::Call;
use rpc::RpcError;
use tokio::io::{duplex, split};

#[tokio::test]
async fn client_and_server_exchange_a_request_and_a_reply() {
    let (client_conn, server_conn) = duplex(4096);
    let (client_reader, client_writer) = split(client_conn);
    let (server_reader, server_writer) = split(server_conn);

    let server = tokio::spawn(async move {
        let (method, mut call) = Call::accept(server_reader, server_writer)
            .await
            .unwrap()
            .expect("client opened a call");
        assert_eq!(method, "Sum");

        let values: Vec<i64> = call.receive().await.unwrap().expect("client sent a request");
        let total: i64 = values.iter().sum();
        call.send(&total).await.unwrap();
    });

    let mut call = Call::open(client_reader, client_writer, "Sum").await.unwrap();
    call.send(&vec![1i64, 2, 3, 4]).await.unwrap();
    let total: i64 = call.receive().await.unwrap().expect("server replied");
    assert_eq!(total, 10);

    server.await.unwrap();
}

#[tokio::test]
async fn remote_error_surfaces_to_the_caller() {
    let (client_conn, server_conn) = duplex(4096);
    let (client_reader, client_writer) = split(client_conn);
    let (server_reader, server_writer) = split(server_conn);

    let server = tokio::spawn(async move {
        let (_, mut call) = Call::accept(server_reader, server_writer)
            .await
            .unwrap()
            .expect("client opened a call");
        let _: Option<String> = call.receive().await.unwrap();
        call.send_error("permission denied".to_string()).await.unwrap();
    });

    let mut call = Call::open(client_reader, client_writer, "Fetch").await.unwrap();
    call.send(&"/etc/shadow".to_string()).await.unwrap();
    let err = call.receive::<String>().await.unwrap_err();
    assert!(matches!(err, RpcError::RemoteError(message) if message == "permission denied"));

    server.await.unwrap();
}

#[tokio::test]
async fn accept_returns_none_on_orderly_close_before_any_method() {
    let (client_conn, server_conn) = duplex(4096);
    let (client_reader, client_writer) = split(client_conn);
    let (server_reader, server_writer) = split(server_conn);

    drop(client_reader);
    drop(client_writer);
    let accepted = Call::accept(server_reader, server_writer).await.unwrap();
    assert!(accepted.is_none());
}
