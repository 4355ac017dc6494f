//! In-process fake Electrum server for integration tests.

#![allow(dead_code, reason = "not every test file uses every helper")]

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

enum Control {
    Send(String),
    HangUp,
}

/// Fake server accepting a single client connection on 127.0.0.1.
pub struct FakeElectrum {
    pub port: u16,
    control: mpsc::UnboundedSender<Control>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl FakeElectrum {
    /// Start the server. `respond(method, params)` returns the result to send
    /// back at once, or `None` to hold the request for [`Self::respond`].
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&str, &Value) -> Option<Value> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (control, mut control_rx) = mpsc::unbounded_channel();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();

            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let Ok(Some(line)) = line else { return };
                        let request: Value = serde_json::from_str(&line).unwrap();
                        seen.lock().unwrap().push(request.clone());
                        let method = request["method"].as_str().unwrap_or_default();
                        if let Some(result) = respond(method, &request["params"]) {
                            let reply = json!({"id": request["id"], "result": result});
                            if write.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                    control = control_rx.recv() => match control {
                        Some(Control::Send(line)) => {
                            if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                                return;
                            }
                        }
                        Some(Control::HangUp) | None => return,
                    },
                }
            }
        });

        Self {
            port,
            control,
            requests,
        }
    }

    /// Write a raw line to the client.
    pub fn send_line(&self, line: impl Into<String>) {
        let _ = self.control.send(Control::Send(line.into()));
    }

    /// Answer a held request.
    pub fn respond(&self, id: u64, result: Value) {
        self.send_line(json!({"id": id, "result": result}).to_string());
    }

    /// Push a notification.
    pub fn notify(&self, method: &str, params: Value) {
        self.send_line(json!({"id": null, "method": method, "params": params}).to_string());
    }

    /// Close the connection from the server side.
    pub fn hang_up(&self) {
        let _ = self.control.send(Control::HangUp);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    /// Methods of every request received so far.
    pub fn methods(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r["method"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Wait until at least `n` requests arrived and return them.
    pub async fn wait_for_requests(&self, n: usize) -> Vec<Value> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let requests = self.requests();
                if requests.len() >= n {
                    return requests;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("server did not receive enough requests")
    }
}

/// Fail the test instead of hanging forever.
pub async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
