// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! In-process mock API server for unit tests
//!
//! Builds a `kube::Client` over a `tower::service_fn`, so facets can be
//! constructed and caches synchronized without a live cluster. `serve_http`
//! answers the same handlers over a loopback socket for tests that need
//! kube's own connector stack (timeouts included).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use http::{Method, Request, Response, StatusCode};
use kube::Client;
use kube::client::Body;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::client::Connector;
use crate::error::Facet;

/// How the mock answers a request
pub(crate) enum Reply {
    Json(StatusCode, Value),
    /// Never answer (used for watch requests)
    Hang,
    /// Fail at the transport level
    Refused,
}

/// Build a client whose requests are answered by `handler(method, path, query)`
pub(crate) fn mock_client<F>(handler: F) -> Client
where
    F: Fn(&Method, &str, &str) -> Reply + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let service = tower::service_fn(move |req: Request<Body>| {
        let reply = handler(
            req.method(),
            req.uri().path(),
            req.uri().query().unwrap_or_default(),
        );
        async move {
            match reply {
                Reply::Json(status, body) => Ok(Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap()),
                Reply::Hang => {
                    futures::future::pending::<Result<Response<Body>, std::io::Error>>().await
                }
                Reply::Refused => Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )),
            }
        }
    });
    Client::new(service, "default")
}

/// Serve `handler` as plain HTTP/1.1 on a loopback port.
///
/// `Reply::Hang` sends the response head of a chunked body and then nothing,
/// the way an idle watch looks on the wire.
pub(crate) async fn serve_http<F>(handler: F) -> SocketAddr
where
    F: Fn(&Method, &str, &str) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_connection(stream, Arc::clone(&handler)));
        }
    });
    addr
}

async fn serve_connection<F>(stream: TcpStream, handler: Arc<F>)
where
    F: Fn(&Method, &str, &str) -> Reply + Send + Sync + 'static,
{
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    loop {
        let mut request_line = String::new();
        if !matches!(reader.read_line(&mut request_line).await, Ok(n) if n > 0) {
            return;
        }
        // Headers are ignored; test requests carry no body
        loop {
            let mut header = String::new();
            match reader.read_line(&mut header).await {
                Ok(0) | Err(_) => return,
                Ok(_) if header == "\r\n" => break,
                Ok(_) => {}
            }
        }

        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
            .unwrap_or(Method::GET);
        let target = parts.next().unwrap_or("/");
        let (path, query) = target.split_once('?').unwrap_or((target, ""));

        match handler(&method, path, query) {
            Reply::Json(status, body) => {
                let body = serde_json::to_vec(&body).unwrap();
                let head = format!(
                    "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\n\r\n",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown"),
                    body.len()
                );
                if write.write_all(head.as_bytes()).await.is_err()
                    || write.write_all(&body).await.is_err()
                {
                    return;
                }
            }
            Reply::Hang => {
                let head = "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                            transfer-encoding: chunked\r\n\r\n";
                if write.write_all(head.as_bytes()).await.is_ok() {
                    // Hold the stream until the client hangs up
                    let mut rest = Vec::new();
                    let _ = reader.read_to_end(&mut rest).await;
                }
                return;
            }
            Reply::Refused => return,
        }
    }
}

pub(crate) fn version_info() -> Value {
    json!({
        "major": "1",
        "minor": "31",
        "gitVersion": "v1.31.2",
        "gitCommit": "5864a4677267e6adeae276ad85882a8714d69d9d",
        "gitTreeState": "clean",
        "buildDate": "2024-10-22T20:28:14Z",
        "goVersion": "go1.22.8",
        "compiler": "gc",
        "platform": "linux/amd64"
    })
}

pub(crate) fn pod(namespace: &str, name: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name, "namespace": namespace, "resourceVersion": "7" },
        "spec": { "containers": [{ "name": "app", "image": "nginx:1.27" }] }
    })
}

pub(crate) fn list(kind: &str, items: Vec<Value>) -> Value {
    // List items come back without apiVersion/kind, as from a real API server
    let items: Vec<Value> = items
        .into_iter()
        .map(|mut item| {
            if let Value::Object(ref mut map) = item {
                map.remove("apiVersion");
                map.remove("kind");
            }
            item
        })
        .collect();
    json!({
        "apiVersion": "v1",
        "kind": format!("{kind}List"),
        "metadata": { "resourceVersion": "42" },
        "items": items
    })
}

pub(crate) fn status(code: u16, reason: &str) -> Value {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": format!("mock: {reason}"),
        "reason": reason,
        "code": code
    })
}

/// A small cluster serving /version and two pods in "default"
pub(crate) fn healthy_cluster(method: &Method, path: &str, query: &str) -> Reply {
    if query.contains("watch=true") {
        return Reply::Hang;
    }
    match (method, path) {
        (&Method::GET, "/version") => Reply::Json(StatusCode::OK, version_info()),
        (&Method::GET, "/api/v1/pods") | (&Method::GET, "/api/v1/namespaces/default/pods") => {
            Reply::Json(
                StatusCode::OK,
                list("Pod", vec![pod("default", "web-0"), pod("default", "web-1")]),
            )
        }
        (&Method::GET, "/api/v1/namespaces/default/pods/web-0") => {
            Reply::Json(StatusCode::OK, pod("default", "web-0"))
        }
        _ => Reply::Json(StatusCode::NOT_FOUND, status(404, "NotFound")),
    }
}

type Handler = dyn Fn(Facet, &Method, &str, &str) -> Reply + Send + Sync;

/// Connector that builds a mock client per facet and records the build order
pub(crate) struct MockConnector {
    handler: Arc<Handler>,
    log: Mutex<Vec<Facet>>,
}

impl MockConnector {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: Fn(Facet, &Method, &str, &str) -> Reply + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            log: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn healthy() -> Self {
        Self::new(|_, method, path, query| healthy_cluster(method, path, query))
    }

    pub(crate) fn connected(&self) -> Vec<Facet> {
        self.log.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, facet: Facet) -> Result<Client, kube::Error> {
        self.log.lock().unwrap().push(facet);
        let handler = Arc::clone(&self.handler);
        Ok(mock_client(move |method, path, query| {
            handler(facet, method, path, query)
        }))
    }
}
