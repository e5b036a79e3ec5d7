//! Master client
//!
//! Admin-task results are posted to the master as a JSON envelope. Each post
//! tries the known masters in turn, starting from the last one that answered,
//! and stops at the first success. There is no retry beyond that pass: a
//! failed post is returned to the caller, which logs it, and the master
//! re-issues the task.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use strata_common::{Error, Result};
use tracing::{debug, warn};

/// Path on the master accepting admin-task responses
pub const DATA_NODE_RESPONSE_PATH: &str = "/dataNode/response";

#[async_trait]
pub trait MasterClient: Send + Sync {
    /// Post a serialized admin task carrying its response
    async fn post_task_response(&self, body: Vec<u8>) -> Result<()>;

    /// Register a master endpoint; known addresses are ignored
    fn add_node(&self, addr: &str);

    fn nodes(&self) -> Vec<String>;
}

/// HTTP implementation
pub struct HttpMasterClient {
    http: reqwest::Client,
    nodes: RwLock<Vec<String>>,
    /// Index of the master that accepted the last post
    leader: AtomicUsize,
}

impl HttpMasterClient {
    pub fn new(addrs: Vec<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(e.to_string()))?;
        let client = Self {
            http,
            nodes: RwLock::new(Vec::new()),
            leader: AtomicUsize::new(0),
        };
        for addr in &addrs {
            client.add_node(addr);
        }
        Ok(client)
    }

    /// Known masters, starting from the last responsive one
    fn candidates(&self) -> Vec<(usize, String)> {
        let nodes = self.nodes.read();
        let first = self.leader.load(Ordering::Relaxed) % nodes.len().max(1);
        (0..nodes.len())
            .map(|i| (first + i) % nodes.len())
            .map(|i| (i, nodes[i].clone()))
            .collect()
    }

    async fn post_to(&self, addr: &str, body: Vec<u8>) -> Result<()> {
        let url = response_url(addr);
        let len = body.len();
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Transport(format!("POST {url} timed out"))
                } else {
                    Error::Transport(format!("POST {url}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("POST {url} returned {status}")));
        }
        debug!(url = %url, len, "reported task response to master");
        Ok(())
    }
}

fn response_url(addr: &str) -> String {
    if addr.starts_with("http://") || addr.starts_with("https://") {
        format!("{addr}{DATA_NODE_RESPONSE_PATH}")
    } else {
        format!("http://{addr}{DATA_NODE_RESPONSE_PATH}")
    }
}

#[async_trait]
impl MasterClient for HttpMasterClient {
    async fn post_task_response(&self, body: Vec<u8>) -> Result<()> {
        let mut last_err = Error::Transport("no master address known".into());
        for (index, addr) in self.candidates() {
            match self.post_to(&addr, body.clone()).await {
                Ok(()) => {
                    self.leader.store(index, Ordering::Relaxed);
                    return Ok(());
                }
                Err(err) => {
                    warn!(master = %addr, "task response not accepted: {err}");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    fn add_node(&self, addr: &str) {
        let addr = addr.trim();
        if addr.is_empty() {
            return;
        }
        let mut nodes = self.nodes.write();
        if !nodes.iter().any(|n| n == addr) {
            nodes.push(addr.to_string());
        }
    }

    fn nodes(&self) -> Vec<String> {
        self.nodes.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::routing::post;
    use tokio::sync::mpsc;

    #[test]
    fn test_add_node_dedups() {
        let client = HttpMasterClient::new(vec!["m1:17010".into()], Duration::from_secs(1)).unwrap();
        client.add_node("m1:17010");
        client.add_node("");
        client.add_node("m2:17010");
        assert_eq!(client.nodes(), vec!["m1:17010", "m2:17010"]);
    }

    #[tokio::test]
    async fn test_post_without_masters_fails() {
        let client = HttpMasterClient::new(Vec::new(), Duration::from_secs(1)).unwrap();
        let err = client.post_task_response(b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    async fn start_master() -> (String, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let app = Router::new()
            .route(
                DATA_NODE_RESPONSE_PATH,
                post(|State(tx): State<mpsc::UnboundedSender<Vec<u8>>>, body: Bytes| async move {
                    let _ = tx.send(body.to_vec());
                }),
            )
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr.to_string(), rx)
    }

    /// Address with nothing listening on it
    async fn dead_addr() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[tokio::test]
    async fn test_post_fails_over_to_next_master() {
        let (live, mut rx) = start_master().await;
        let dead = dead_addr().await;
        let client = HttpMasterClient::new(vec![dead], Duration::from_secs(5)).unwrap();
        // registered later, as a heartbeat would
        client.add_node(&live);

        client.post_task_response(b"1".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"1".to_vec());
        client.post_task_response(b"2".to_vec()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"2".to_vec());
    }

    #[tokio::test]
    async fn test_post_fails_when_every_master_is_down() {
        let client =
            HttpMasterClient::new(vec![dead_addr().await, dead_addr().await], Duration::from_secs(5))
                .unwrap();
        let err = client.post_task_response(b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn test_post_reaches_master_endpoint() {
        let (addr, mut rx) = start_master().await;
        let client = HttpMasterClient::new(vec![addr], Duration::from_secs(5)).unwrap();
        client
            .post_task_response(br#"{"op_code":99}"#.to_vec())
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), br#"{"op_code":99}"#.to_vec());
    }
}
