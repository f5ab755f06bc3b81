use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Serves fixed HTML pages by path; everything else is 404.
pub struct DocsServer {
    pub base_url: String,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DocsServer {
    pub fn spawn(pages: &[(&'static str, &'static str)]) -> Self {
        let pages: HashMap<&'static str, &'static str> = pages.iter().copied().collect();
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start docs server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().split('?').next().unwrap_or_default().to_owned();
                let response = match pages.get(path.as_str()) {
                    Some(html) => {
                        let header = tiny_http::Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"text/html; charset=utf-8"[..],
                        )
                        .expect("build header");
                        tiny_http::Response::from_string(*html)
                            .with_status_code(200)
                            .with_header(header)
                    }
                    None => tiny_http::Response::from_string("not found").with_status_code(404),
                };
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl Drop for DocsServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub const GUIDE_PAGE: &str = r#"<!doctype html>
<html>
  <head><title>Guide</title></head>
  <body>
    <nav><a href="/">Home</a></nav>
    <main>
      <h1>Getting started</h1>
      <p>Download the tool from the <a href="/downloads">downloads page</a>.</p>
      <h1>Configuration</h1>
      <p>Edit the configuration file before the first run.</p>
      <ul><li>Set the <a href="https://example.com/ref">reference</a> path.</li></ul>
    </main>
  </body>
</html>
"#;

#[allow(dead_code)]
pub const DROPPING_PAGE: &str = r#"<!doctype html>
<html>
  <head><title>Mixed</title></head>
  <body>
    <main>
      <h1>Stable</h1>
      <p>See the <a href="/stable">stable notes</a>.</p>
      <h1>Fragile</h1>
      <p>DROPLINKS see the <a href="/fragile">fragile notes</a>.</p>
    </main>
  </body>
</html>
"#;
