use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use log::{debug, info, error};

use crate::config::DownloadSettings;

/// Source of firmware images
#[async_trait]
pub trait FirmwareDownloader: Send + Sync {
    /// Fetch the image at `url`; `None` on any failure
    async fn download(&self, url: &str) -> Option<Vec<u8>>;
}

/// Downloads firmware images over HTTPS and sanity-checks their size
pub struct ArtifactFetcher {
    client: Client,
    settings: DownloadSettings,
}

/// Why a payload size was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeViolation {
    TooSmall { size: usize, min: usize },
    TooLarge { size: usize, max: usize },
}

/// Check a payload length against the plausible firmware bounds
pub fn check_firmware_size(size: usize, settings: &DownloadSettings) -> Result<(), SizeViolation> {
    if size < settings.min_firmware_size {
        return Err(SizeViolation::TooSmall { size, min: settings.min_firmware_size });
    }
    if size > settings.max_firmware_size {
        return Err(SizeViolation::TooLarge { size, max: settings.max_firmware_size });
    }
    Ok(())
}

fn log_size_violation(violation: SizeViolation) {
    match violation {
        SizeViolation::TooSmall { size, min } => {
            error!("Downloaded firmware too small: {} bytes (minimum {})", size, min)
        }
        SizeViolation::TooLarge { size, max } => {
            error!("Downloaded firmware too large: {} bytes (maximum {})", size, max)
        }
    }
}

/// Only `https://` URLs may be downloaded from
pub fn is_https_url(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.scheme() == "https" && parsed.has_host(),
        Err(_) => false,
    }
}

impl ArtifactFetcher {
    pub fn new(client: Client, settings: DownloadSettings) -> Self {
        Self { client, settings }
    }

    /// GET `url` and bound its size. No scheme check; `download` does that first.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = self.client
            .get(url)
            .timeout(self.settings.timeout())
            .send()
            .await
            .map_err(describe_transport_error)?;

        if response.status() != StatusCode::OK {
            return Err(format!("HTTP {}", response.status()));
        }

        // Reject early when the server already announces an oversized body
        if let Some(length) = response.content_length() {
            if length > self.settings.max_firmware_size as u64 {
                log_size_violation(SizeViolation::TooLarge {
                    size: length as usize,
                    max: self.settings.max_firmware_size,
                });
                return Err("announced content length exceeds maximum".to_string());
            }
        }

        let mut firmware = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(describe_transport_error)?;
            firmware.extend_from_slice(&chunk);
            if firmware.len() > self.settings.max_firmware_size {
                log_size_violation(SizeViolation::TooLarge {
                    size: firmware.len(),
                    max: self.settings.max_firmware_size,
                });
                return Err("body exceeds maximum firmware size".to_string());
            }
        }

        if let Err(violation) = check_firmware_size(firmware.len(), &self.settings) {
            log_size_violation(violation);
            return Err("firmware size out of bounds".to_string());
        }
        Ok(firmware)
    }
}

fn describe_transport_error(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "timeout".to_string()
    } else {
        e.to_string()
    }
}

#[async_trait]
impl FirmwareDownloader for ArtifactFetcher {
    async fn download(&self, url: &str) -> Option<Vec<u8>> {
        if !is_https_url(url) {
            error!(
                "SECURITY: Refusing to download firmware from non-HTTPS URL: {}. \
                 Only HTTPS URLs are allowed.",
                url
            );
            return None;
        }

        debug!("Downloading firmware from: {}", url);

        let firmware = match self.fetch(url).await {
            Ok(firmware) => firmware,
            Err(reason) => {
                error!("Failed to download firmware from {}: {}", url, reason);
                return None;
            }
        };

        info!("Downloaded firmware: {} bytes from {}", firmware.len(), url);
        Some(firmware)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn small_bounds() -> DownloadSettings {
        DownloadSettings {
            min_firmware_size: 16,
            max_firmware_size: 64,
            ..DownloadSettings::default()
        }
    }

    async fn serve(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path("/fw.bin"))
            .respond_with(response)
            .expect(1)
            .mount(server)
            .await;
    }

    /// One-shot server that streams `body` chunked, without a Content-Length
    async fn chunked_server(body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            let mut response = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n".to_vec();
            for chunk in body.chunks(16) {
                response.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                response.extend_from_slice(chunk);
                response.extend_from_slice(b"\r\n");
            }
            response.extend_from_slice(b"0\r\n\r\n");
            let _ = socket.write_all(&response).await;
        });
        format!("http://{}/fw.bin", addr)
    }

    #[tokio::test]
    async fn test_fetch_in_bounds() {
        let server = MockServer::start().await;
        serve(&server, ResponseTemplate::new(200).set_body_bytes(vec![0xAB; 32])).await;

        let fetcher = ArtifactFetcher::new(Client::new(), small_bounds());
        let firmware = fetcher.fetch(&format!("{}/fw.bin", server.uri())).await.unwrap();
        assert_eq!(firmware, vec![0xAB; 32]);
    }

    #[tokio::test]
    async fn test_fetch_rejects_too_small_ok_response() {
        let server = MockServer::start().await;
        serve(&server, ResponseTemplate::new(200).set_body_string("<html>Not Found</html>")
            .insert_header("Content-Type", "text/html")).await;

        let fetcher = ArtifactFetcher::new(Client::new(), DownloadSettings::default());
        assert!(fetcher.fetch(&format!("{}/fw.bin", server.uri())).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_rejects_announced_oversize() {
        let server = MockServer::start().await;
        serve(&server, ResponseTemplate::new(200).set_body_bytes(vec![0u8; 65])).await;

        let fetcher = ArtifactFetcher::new(Client::new(), small_bounds());
        let err = fetcher.fetch(&format!("{}/fw.bin", server.uri())).await.unwrap_err();
        assert_eq!(err, "announced content length exceeds maximum");
    }

    #[tokio::test]
    async fn test_fetch_caps_streamed_body() {
        let url = chunked_server(vec![0u8; 200]).await;

        let fetcher = ArtifactFetcher::new(Client::new(), small_bounds());
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert_eq!(err, "body exceeds maximum firmware size");
    }

    #[tokio::test]
    async fn test_fetch_rejects_server_error() {
        let server = MockServer::start().await;
        serve(&server, ResponseTemplate::new(500).set_body_bytes(vec![0u8; 32])).await;

        let fetcher = ArtifactFetcher::new(Client::new(), small_bounds());
        let err = fetcher.fetch(&format!("{}/fw.bin", server.uri())).await.unwrap_err();
        assert!(err.starts_with("HTTP 500"));
    }

    #[test]
    fn test_size_bounds() {
        let settings = DownloadSettings::default();
        assert_eq!(
            check_firmware_size(1023, &settings),
            Err(SizeViolation::TooSmall { size: 1023, min: 1024 })
        );
        assert!(check_firmware_size(1024, &settings).is_ok());
        assert!(check_firmware_size(512 * 1024, &settings).is_ok());
        assert!(matches!(
            check_firmware_size(512 * 1024 + 1, &settings),
            Err(SizeViolation::TooLarge { .. })
        ));
    }

    #[test]
    fn test_https_detection() {
        assert!(is_https_url("https://github.com/pvvx/ATC_MiThermometer/releases/download/v4.5/ATC_v45.bin"));
        assert!(is_https_url("HTTPS://example.com/fw.bin"));
        assert!(!is_https_url("http://example.com/fw.bin"));
        assert!(!is_https_url("ftp://example.com/fw.bin"));
        assert!(!is_https_url("file:///tmp/fw.bin"));
        assert!(!is_https_url("example.com/fw.bin"));
        assert!(!is_https_url(""));
    }
}
