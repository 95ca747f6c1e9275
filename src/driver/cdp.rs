//! Remote-debugging protocol driver
//!
//! Target discovery goes through the HTTP `/json/list` endpoint; the page
//! itself is driven over its websocket with `Runtime.evaluate` and the
//! `Input.*` domain.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::common::config::Config;
use crate::common::{Error, Result};

use super::{AutomationDriver, Page};

/// Interval between element presence checks
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One entry of the `/json/list` response
#[derive(Debug, Deserialize)]
struct TargetInfo {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: Option<String>,
}

/// Driver connecting to the first matching page target of an instance
pub struct CdpDriver {
    http: reqwest::Client,
    command_timeout: Duration,
    target_url_contains: Option<String>,
}

impl CdpDriver {
    pub fn new(command_timeout: Duration, target_url_contains: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .unwrap_or_default();
        Self {
            http,
            command_timeout,
            target_url_contains,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Duration::from_millis(config.driver.command_timeout_ms),
            config.driver.target_url_contains.clone(),
        )
    }

    async fn list_targets(&self, port: u16) -> Result<Vec<TargetInfo>> {
        let url = format!("http://127.0.0.1:{}/json/list", port);
        let response = self
            .http
            .get(&url)
            .timeout(self.command_timeout)
            .send()
            .await
            .map_err(|e| Error::Driver(format!("failed to list targets on port {}: {}", port, e)))?;
        response
            .json()
            .await
            .map_err(|e| Error::Driver(format!("invalid target list from port {}: {}", port, e)))
    }
}

#[async_trait]
impl AutomationDriver for CdpDriver {
    async fn connect(&self, port: u16) -> Result<Box<dyn Page>> {
        let targets = self.list_targets(port).await?;
        let target = select_target(&targets, self.target_url_contains.as_deref())
            .ok_or_else(|| Error::Driver(format!("no page target on port {}", port)))?;
        let ws_url = target
            .ws_url
            .as_deref()
            .ok_or_else(|| Error::Driver(format!("page target on port {} has no websocket", port)))?;

        let (socket, _) =
            tokio::time::timeout(self.command_timeout, tokio_tungstenite::connect_async(ws_url))
                .await
                .map_err(|_| Error::Driver(format!("timed out connecting to {}", ws_url)))?
                .map_err(|e| Error::Driver(format!("failed to connect to {}: {}", ws_url, e)))?;

        tracing::info!("Connected to page '{}' ({}) on port {}", target.title, target.url, port);

        Ok(Box::new(CdpPage {
            socket,
            next_id: 1,
            command_timeout: self.command_timeout,
        }))
    }
}

fn select_target<'a>(targets: &'a [TargetInfo], url_contains: Option<&str>) -> Option<&'a TargetInfo> {
    targets
        .iter()
        .filter(|t| t.kind == "page" && t.ws_url.is_some())
        .find(|t| url_contains.map_or(true, |needle| t.url.contains(needle)))
}

/// JSON literal for embedding a string into an expression
fn js_string(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// A page target driven over its websocket
pub struct CdpPage {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    command_timeout: Duration,
}

impl CdpPage {
    /// Send a command and wait for its response, skipping events
    async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let request = json!({ "id": id, "method": method, "params": params });
        tracing::trace!("CDP >>> {}", request);

        self.socket
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| Error::Driver(format!("failed to send {}: {}", method, e)))?;

        tokio::time::timeout(self.command_timeout, self.read_response(id))
            .await
            .map_err(|_| Error::Driver(format!("{} timed out", method)))?
            .map_err(|e| match e {
                Error::Driver(msg) => Error::Driver(format!("{}: {}", method, msg)),
                other => other,
            })
    }

    async fn read_response(&mut self, id: u64) -> Result<Value> {
        while let Some(message) = self.socket.next().await {
            let message = message.map_err(|e| Error::Driver(e.to_string()))?;
            let Message::Text(text) = message else {
                continue;
            };
            tracing::trace!("CDP <<< {}", text);

            let value: Value = serde_json::from_str(&text)?;
            if value.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(error) = value.get("error") {
                let msg = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(Error::Driver(msg.to_string()));
            }
            return Ok(value.get("result").cloned().unwrap_or(Value::Null));
        }
        Err(Error::Driver("connection closed".to_string()))
    }

    /// Evaluate an expression and return its value
    async fn eval(&mut self, expression: String) -> Result<Value> {
        let result = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("exception");
            return Err(Error::Driver(format!("evaluation threw: {}", text)));
        }
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }

    /// Scroll the element into view and return its center point
    async fn element_center(&mut self, selector: &str) -> Result<(f64, f64)> {
        let expression = format!(
            "(() => {{ \
                const el = document.querySelector({}); \
                if (!el) return null; \
                el.scrollIntoView({{ block: 'center', inline: 'center' }}); \
                const r = el.getBoundingClientRect(); \
                return {{ x: r.left + r.width / 2, y: r.top + r.height / 2 }}; \
            }})()",
            js_string(selector)
        );
        let value = self.eval(expression).await?;
        let x = value.get("x").and_then(Value::as_f64);
        let y = value.get("y").and_then(Value::as_f64);
        match (x, y) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(Error::Driver(format!("no element matches '{}'", selector))),
        }
    }

    async fn mouse_click(&mut self, selector: &str, clicks: u32) -> Result<()> {
        let (x, y) = self.element_center(selector).await?;
        for click_count in 1..=clicks {
            for kind in ["mousePressed", "mouseReleased"] {
                self.call(
                    "Input.dispatchMouseEvent",
                    json!({
                        "type": kind,
                        "x": x,
                        "y": y,
                        "button": "left",
                        "clickCount": click_count,
                    }),
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Page for CdpPage {
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let expression = format!("document.querySelector({}) !== null", js_string(selector));
        let deadline = Instant::now() + timeout;

        loop {
            if self.eval(expression.clone()).await?.as_bool() == Some(true) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::step_timeout(selector, timeout.as_millis() as u64));
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        self.mouse_click(selector, 1).await
    }

    async fn double_click(&mut self, selector: &str) -> Result<()> {
        self.mouse_click(selector, 2).await
    }

    async fn fill(&mut self, selector: &str, text: &str) -> Result<()> {
        let expression = format!(
            "(() => {{ \
                const el = document.querySelector({}); \
                if (!el) return false; \
                el.focus(); \
                if ('value' in el) {{ \
                    el.value = ''; \
                    el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                }} else if (el.isContentEditable) {{ \
                    document.execCommand('selectAll', false); \
                    document.execCommand('delete', false); \
                }} \
                return true; \
            }})()",
            js_string(selector)
        );
        if self.eval(expression).await?.as_bool() != Some(true) {
            return Err(Error::Driver(format!("no element matches '{}'", selector)));
        }
        self.call("Input.insertText", json!({ "text": text })).await?;
        Ok(())
    }

    async fn evaluate(&mut self, function: &str, args: Vec<Value>) -> Result<Value> {
        let expression = format!("({})(...{})", function, Value::Array(args));
        self.eval(expression).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.socket
            .close(None)
            .await
            .map_err(|e| Error::Driver(format!("failed to close connection: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(kind: &str, url: &str, ws: bool) -> TargetInfo {
        TargetInfo {
            kind: kind.to_string(),
            title: String::new(),
            url: url.to_string(),
            ws_url: ws.then(|| "ws://127.0.0.1:1/devtools/page/1".to_string()),
        }
    }

    #[test]
    fn test_select_target_skips_non_pages() {
        let targets = vec![
            target("service_worker", "app://sw", true),
            target("page", "app://main", true),
        ];
        assert_eq!(select_target(&targets, None).unwrap().url, "app://main");
    }

    #[test]
    fn test_select_target_by_url() {
        let targets = vec![
            target("page", "app://devtools", true),
            target("page", "app://chat/index.html", true),
        ];
        assert_eq!(
            select_target(&targets, Some("chat")).unwrap().url,
            "app://chat/index.html"
        );
        assert!(select_target(&targets, Some("settings")).is_none());
    }

    #[test]
    fn test_select_target_requires_websocket() {
        let targets = vec![target("page", "app://main", false)];
        assert!(select_target(&targets, None).is_none());
    }

    #[test]
    fn test_target_list_parsing() {
        let raw = r#"[{"description":"","id":"A1","title":"Chat","type":"page",
            "url":"app://chat","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/page/A1"}]"#;
        let targets: Vec<TargetInfo> = serde_json::from_str(raw).unwrap();
        assert_eq!(targets[0].kind, "page");
        assert!(targets[0].ws_url.is_some());
    }

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a[title="x"]"#), r#""a[title=\"x\"]""#);
    }
}
