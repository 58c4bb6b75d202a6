//! Moonraker HTTP status client
//!
//! Synchronous query of the firmware's own status endpoint. When available
//! this removes the pub/sub round trip entirely.

use super::types::PositionSample;
use crate::error::{Error, Result};
use crate::models::round_to;
use std::time::Duration;

/// Moonraker API client
#[derive(Clone)]
pub struct MoonrakerClient {
    client: reqwest::Client,
    base_url: String,
}

impl MoonrakerClient {
    /// Create a client for `base_url` (e.g. `http://klipperpi:7125`)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query the toolhead position
    pub async fn query_position(&self) -> Result<PositionSample> {
        let url = format!("{}/printer/objects/query?toolhead=position", self.base_url);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Error::Firmware(format!(
                "moonraker returned {} for toolhead query",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        parse_toolhead_position(&body)
    }
}

/// Extract `result.status.toolhead.position` (`[x, y, z, e]`)
pub fn parse_toolhead_position(body: &serde_json::Value) -> Result<PositionSample> {
    let position = body
        .pointer("/result/status/toolhead/position")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::Parse("toolhead position missing from response".to_string()))?;

    let axis = |index: usize, name: &str| -> Result<f64> {
        position
            .get(index)
            .and_then(|v| v.as_f64())
            .filter(|v| v.is_finite())
            .ok_or_else(|| Error::Parse(format!("toolhead position has no numeric {}", name)))
    };

    Ok(PositionSample::new(
        round_to(axis(0, "x")?, 3),
        round_to(axis(1, "y")?, 3),
        round_to(axis(2, "z")?, 3),
    ))
}

#[cfg(test)]
pub(crate) mod testing {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a canned HTTP reply to every connection; returns the base URL
    pub async fn spawn_moonraker(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    let mut seen = Vec::new();
                    while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => seen.extend_from_slice(&buf[..n]),
                        }
                    }
                    let reply = format!(
                        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status_line,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(reply.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_toolhead_position() {
        let body = json!({
            "result": {
                "eventtime": 1234.5,
                "status": {"toolhead": {"position": [120.12345, 80.5, 10.0, 0.0]}}
            }
        });
        let sample = parse_toolhead_position(&body).unwrap();
        assert_eq!((sample.x, sample.y, sample.z), (120.123, 80.5, 10.0));
    }

    #[test]
    fn test_parse_missing_position() {
        let body = json!({"result": {"status": {}}});
        assert!(matches!(parse_toolhead_position(&body), Err(Error::Parse(_))));
    }

    #[test]
    fn test_parse_short_position() {
        let body = json!({"result": {"status": {"toolhead": {"position": [1.0, 2.0]}}}});
        assert!(matches!(parse_toolhead_position(&body), Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn test_query_position_over_http() {
        let body = json!({"result": {"status": {"toolhead": {"position": [10.0, 20.0, 30.0, 0.0]}}}});
        let url = testing::spawn_moonraker("200 OK", body.to_string()).await;
        let client = MoonrakerClient::new(url, Duration::from_secs(2)).unwrap();

        let sample = client.query_position().await.unwrap();
        assert_eq!((sample.x, sample.y, sample.z), (10.0, 20.0, 30.0));
    }

    #[tokio::test]
    async fn test_query_position_http_error_status() {
        let url = testing::spawn_moonraker("503 Service Unavailable", "{}".to_string()).await;
        let client = MoonrakerClient::new(url, Duration::from_secs(2)).unwrap();
        assert!(matches!(client.query_position().await, Err(Error::Firmware(_))));
    }

    #[test]
    fn test_base_url_trimmed() {
        let client = MoonrakerClient::new("http://klipper:7125/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://klipper:7125");
    }
}
