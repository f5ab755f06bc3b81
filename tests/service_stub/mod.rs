use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value;

/// How the stub answers chat completion requests.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Annotations as JSON, rewrites echo their input, summaries are canned.
    Faithful,
    /// Every request gets HTTP 429.
    RateLimited,
    /// Rewrites of input containing `DROPLINKS` come back without placeholder tokens.
    DropLinks,
    /// The intermediate summary comes back empty.
    EmptyIntermediateSummary,
}

pub struct ServiceStub {
    pub base_url: String,
    requests: Arc<AtomicUsize>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl ServiceStub {
    pub fn spawn(behavior: Behavior) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start service stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}/v1");
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&requests);

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                if request.method() != &tiny_http::Method::Post
                    || request.url() != "/v1/chat/completions"
                {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }
                counter.fetch_add(1, Ordering::SeqCst);

                let authorized = request
                    .headers()
                    .iter()
                    .any(|h| h.field.equiv("Authorization") && h.value.as_str() == "Bearer test-key");
                if !authorized {
                    let _ = request.respond(json_response(
                        401,
                        serde_json::json!({ "error": { "message": "bad key" } }),
                    ));
                    continue;
                }

                if matches!(behavior, Behavior::RateLimited) {
                    let _ = request.respond(json_response(
                        429,
                        serde_json::json!({ "error": { "message": "rate limit reached" } }),
                    ));
                    continue;
                }

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }
                let parsed: Value = match serde_json::from_str(&body) {
                    Ok(value) => value,
                    Err(_) => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid json").with_status_code(400),
                        );
                        continue;
                    }
                };

                let system = parsed
                    .pointer("/messages/0/content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                let user = parsed
                    .pointer("/messages/1/content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();

                let Some(content) = reply(behavior, system, user) else {
                    let _ = request.respond(
                        tiny_http::Response::from_string("unknown prompt mode")
                            .with_status_code(400),
                    );
                    continue;
                };

                let _ = request.respond(json_response(
                    200,
                    serde_json::json!({
                        "id": "chatcmpl_stub",
                        "object": "chat.completion",
                        "model": parsed.get("model").cloned().unwrap_or(Value::String("stub-model".to_owned())),
                        "choices": [
                            {
                                "index": 0,
                                "message": { "role": "assistant", "content": content },
                                "finish_reason": "stop"
                            }
                        ]
                    }),
                ));
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Chat completion requests received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for ServiceStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn json_response(status: u16, body: Value) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("build header");
    tiny_http::Response::from_string(body.to_string())
        .with_status_code(status)
        .with_header(header)
}

fn reply(behavior: Behavior, system: &str, user: &str) -> Option<String> {
    if system.starts_with("You annotate") {
        return Some(
            serde_json::json!({
                "topic": "stub topic",
                "purpose_of_document": "Stub purpose.",
                "difficult_terms": ["configuration"],
            })
            .to_string(),
        );
    }
    if system.starts_with("You rewrite") {
        if matches!(behavior, Behavior::DropLinks) && user.contains("DROPLINKS") {
            return Some("A rewrite that forgot its links.".to_owned());
        }
        return Some(user.to_owned());
    }
    if system.starts_with("You summarize") {
        let summary = if system.contains("no background") {
            "Beginner summary."
        } else if system.contains("professionals") {
            if matches!(behavior, Behavior::EmptyIntermediateSummary) {
                ""
            } else {
                "Intermediate summary."
            }
        } else {
            "Advanced summary."
        };
        return Some(summary.to_owned());
    }
    None
}
