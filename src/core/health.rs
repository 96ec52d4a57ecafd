/// Health-check notifications
///
/// Runs report to an Uptime Kuma compatible push monitor: `up` when a run
/// starts and finishes, `down` when it is aborted. A monitor that cannot be
/// reached never affects the run; failures are only logged.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::utils::NOTIFY_TIMEOUT_SECS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Up,
    Down,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Up => "up",
            MonitorStatus::Down => "down",
        }
    }
}

impl fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Best effort: implementations log failures instead of returning them
    async fn notify(&self, status: MonitorStatus, message: &str);
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed")]
    Transport(#[source] reqwest::Error),

    #[error("could not destructure response")]
    InvalidResponse(#[source] reqwest::Error),

    #[error("received response \"{0}\"")]
    Rejected(serde_json::Value),
}

pub struct UptimeKumaNotifier {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl UptimeKumaNotifier {
    pub fn new(url: reqwest::Url) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("snapshot-manager/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(NOTIFY_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client, url })
    }

    /// Push one status update and check the monitor accepted it
    pub async fn send(&self, status: MonitorStatus, message: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .get(self.url.clone())
            .query(&[("status", status.as_str()), ("msg", message)])
            .send()
            .await
            .map_err(NotifyError::Transport)?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(NotifyError::InvalidResponse)?;

        if body.get("ok").and_then(serde_json::Value::as_bool) == Some(true) {
            Ok(())
        } else {
            Err(NotifyError::Rejected(body))
        }
    }
}

#[async_trait]
impl Notifier for UptimeKumaNotifier {
    async fn notify(&self, status: MonitorStatus, message: &str) {
        tracing::debug!(
            "Sending notification with status \"{}\" and message \"{}\"",
            status,
            message
        );

        if let Err(e) = self.send(status, message).await {
            tracing::error!(
                error = ?e,
                "Failed to send notification with status \"{}\" and message \"{}\", {}",
                status,
                message,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned HTTP response and hand back the request line
    async fn serve_once(body: &'static str) -> (reqwest::Url, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();

            String::from_utf8_lossy(&request)
                .lines()
                .next()
                .unwrap_or_default()
                .to_string()
        });

        let url = reqwest::Url::parse(&format!("http://{}/api/push/token", addr)).unwrap();
        (url, handle)
    }

    #[tokio::test]
    async fn test_push_carries_status_and_message() {
        let (url, server) = serve_once(r#"{"ok":true}"#).await;
        let notifier = UptimeKumaNotifier::new(url).unwrap();

        notifier.send(MonitorStatus::Up, "start").await.unwrap();

        assert_eq!(
            server.await.unwrap(),
            "GET /api/push/token?status=up&msg=start HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_rejected_push_is_reported() {
        let (url, server) =
            serve_once(r#"{"ok":false,"msg":"Monitor not found or not active."}"#).await;
        let notifier = UptimeKumaNotifier::new(url).unwrap();

        let err = notifier.send(MonitorStatus::Down, "exception").await.unwrap_err();

        assert!(matches!(err, NotifyError::Rejected(_)));
        assert!(server.await.unwrap().contains("status=down&msg=exception"));
    }

    #[tokio::test]
    async fn test_non_json_response_is_reported() {
        let (url, server) = serve_once("<html>bad gateway</html>").await;
        let notifier = UptimeKumaNotifier::new(url).unwrap();

        let err = notifier.send(MonitorStatus::Up, "finish").await.unwrap_err();

        assert!(matches!(err, NotifyError::InvalidResponse(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_monitor_never_fails_the_caller() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = reqwest::Url::parse(&format!("http://{}/api/push/token", addr)).unwrap();
        let notifier = UptimeKumaNotifier::new(url).unwrap();

        assert!(matches!(
            notifier.send(MonitorStatus::Up, "start").await,
            Err(NotifyError::Transport(_))
        ));
        notifier.notify(MonitorStatus::Up, "start").await;
    }
}
