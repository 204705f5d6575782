use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::Router;
use futures::StreamExt;

/// Serve `app` on an ephemeral local port for the lifetime of the test runtime.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A response body that sends one chunk and then never finishes.
pub fn stalled_body() -> Body {
    let first = futures::stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(
        b"first chunk",
    ))]);
    Body::from_stream(first.chain(futures::stream::pending()))
}
