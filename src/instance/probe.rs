//! Control-port reachability probing

use std::time::{Duration, Instant};

/// HTTP probe against an instance's debugging endpoint
///
/// A port counts as reachable when anything answers an HTTP request on it,
/// whatever the status code.
#[derive(Debug, Clone)]
pub struct PortProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl PortProbe {
    pub fn new(timeout: Duration) -> Self {
        // Localhost probes must never go through a proxy from the environment
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_default();
        Self { client, timeout }
    }

    /// Probe timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check whether something answers on the port
    pub async fn is_reachable(&self, port: u16) -> bool {
        let url = format!("http://127.0.0.1:{}/json/version", port);
        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(_) => true,
            Err(e) => {
                tracing::trace!("Probe of port {} failed: {}", port, e);
                false
            }
        }
    }

    /// Poll the port until it answers or `max_wait` elapses
    pub async fn wait_ready(&self, port: u16, max_wait: Duration, interval: Duration) -> bool {
        self.wait_ready_while(port, max_wait, interval, || true)
            .await
    }

    /// Like [`wait_ready`](Self::wait_ready), giving up as soon as
    /// `keep_waiting` returns false
    pub async fn wait_ready_while<F>(
        &self,
        port: u16,
        max_wait: Duration,
        interval: Duration,
        keep_waiting: F,
    ) -> bool
    where
        F: Fn() -> bool,
    {
        let deadline = Instant::now() + max_wait;

        loop {
            if !keep_waiting() {
                tracing::debug!("Stopped waiting for port {}", port);
                return false;
            }
            if self.is_reachable(port).await {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Minimal HTTP responder standing in for a foreign instance
    pub async fn spawn_responder(port: u16) -> JoinHandle<()> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("bind responder port");
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}")
                        .await;
                    let _ = stream.shutdown().await;
                });
            }
        })
    }
}
