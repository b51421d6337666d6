//! Programmable mock ingestion server for pipeline tests.
//!
//! Serves HTTP/1 on a random localhost port, captures every request, and
//! answers according to a switchable behavior: accept, reject with an
//! application error, a fixed status (optionally with `Retry-After`), or a
//! hang that simulates a stalled network.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }
}

#[derive(Clone, Debug)]
pub enum ApiBehavior {
    /// 200 with `{"err":0}`.
    Accept,
    /// 200 with a non-zero `err` and a message.
    Reject { err: i64, message: &'static str },
    /// A fixed status, optionally with a `Retry-After` seconds header.
    Status {
        status: u16,
        retry_after: Option<u64>,
    },
    /// Sleep before answering 200 accept; simulates a stalled server.
    Hang(Duration),
}

#[derive(Clone)]
pub struct MockApi {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
    behavior: Arc<Mutex<ApiBehavior>>,
}

impl MockApi {
    /// Starts the server on a random port.
    pub async fn start() -> Self {
        Self::with_behavior(ApiBehavior::Accept).await
    }

    pub async fn with_behavior(behavior: ApiBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock api");
        let addr = listener.local_addr().expect("failed to get local addr");

        let received = Arc::new(Mutex::new(Vec::new()));
        let behavior = Arc::new(Mutex::new(behavior));
        let received_for_loop = received.clone();
        let behavior_for_loop = behavior.clone();

        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let io = TokioIo::new(stream);
                let received = received_for_loop.clone();
                let behavior = behavior_for_loop.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let received = received.clone();
                        let behavior = behavior.clone();
                        async move { handle(req, &received, &behavior).await }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(io, service)
                        .await;
                });
            }
        });

        MockApi {
            addr,
            received,
            behavior,
        }
    }

    /// Endpoint prefix to put in the agent config; items land on `/item/`.
    pub fn endpoint(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn set_behavior(&self, behavior: ApiBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.received.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }
}

async fn handle(
    req: Request<Incoming>,
    received: &Arc<Mutex<Vec<ReceivedRequest>>>,
    behavior: &Arc<Mutex<ApiBehavior>>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(key, value)| {
            (
                key.to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    let body = req
        .into_body()
        .collect()
        .await
        .map(|collected| collected.to_bytes().to_vec())
        .unwrap_or_default();

    // Record before any hang so tests can observe in-flight requests.
    received.lock().unwrap().push(ReceivedRequest {
        method,
        path,
        headers,
        body,
    });

    let behavior = behavior.lock().unwrap().clone();
    match behavior {
        ApiBehavior::Accept => json_response(200, r#"{"err":0,"result":{"id":"mock"}}"#, None),
        ApiBehavior::Reject { err, message } => json_response(
            200,
            &format!(r#"{{"err":{err},"message":"{message}"}}"#),
            None,
        ),
        ApiBehavior::Status {
            status,
            retry_after,
        } => json_response(status, r#"{"err":1,"message":"unavailable"}"#, retry_after),
        ApiBehavior::Hang(delay) => {
            tokio::time::sleep(delay).await;
            json_response(200, r#"{"err":0,"result":{"id":"mock"}}"#, None)
        }
    }
}

fn json_response(
    status: u16,
    body: &str,
    retry_after: Option<u64>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    let mut builder = Response::builder()
        .status(status)
        .header("Content-Type", "application/json");
    if let Some(seconds) = retry_after {
        builder = builder.header("Retry-After", seconds.to_string());
    }
    builder.body(Full::new(Bytes::from(body.to_string())))
}
