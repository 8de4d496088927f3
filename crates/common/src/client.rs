//! Reporting service client
//!
//! [`ReportingClient`] is the seam between the engine and the remote service.
//! Identifiers are generated by the caller and travel inside each request, so
//! a child item can be parented on an id whose start call is still in flight.
//!
//! [`HttpReportingClient`] speaks the service's REST API:
//!
//! ```text
//! POST {endpoint}/{project}/launch                 start launch
//! PUT  {endpoint}/{project}/launch/{id}/finish     finish launch
//! POST {endpoint}/{project}/item[/{parent}]        start item
//! PUT  {endpoint}/{project}/item/{id}              finish item
//! POST {endpoint}/{project}/log                    log (json or multipart)
//! ```

use async_trait::async_trait;
use reqwest::{header, multipart, Client, Method, RequestBuilder, Response};
use std::time::Duration;
use tracing::debug;

use crate::config::ReporterConfig;
use crate::error::{Error, Result};
use crate::types::*;

/// Remote reporting operations
#[async_trait]
pub trait ReportingClient: Send + Sync {
    /// Create a launch with the id carried in the request
    async fn start_launch(&self, rq: &StartLaunchRq) -> Result<()>;

    /// Close a launch and return the service's summary of it
    async fn finish_launch(&self, id: &LaunchId, rq: &FinishLaunchRq) -> Result<LaunchFinished>;

    /// Create a suite, test or step; `rq.parent` selects the parent item
    async fn start_item(&self, rq: &StartItemRq) -> Result<()>;

    /// Close an item
    async fn finish_item(&self, id: &ItemId, rq: &FinishItemRq) -> Result<()>;

    /// Send a log entry, optionally carrying a binary attachment
    async fn send_log(&self, rq: &LogRq, attachment: Option<&Attachment>) -> Result<()>;
}

/// HTTP implementation of [`ReportingClient`]
#[derive(Debug, Clone)]
pub struct HttpReportingClient {
    base_url: String,
    http: Client,
    debug: bool,
}

impl HttpReportingClient {
    /// Build a client from validated configuration
    pub fn new(config: &ReporterConfig) -> Result<Self> {
        let mut default_headers = header::HeaderMap::new();
        let (name, value) = match &config.auth_header {
            Some(custom) => (
                header::HeaderName::from_bytes(custom.as_bytes()).map_err(|e| {
                    Error::InvalidConfig(format!("auth_header '{}': {}", custom, e))
                })?,
                config.token.clone(),
            ),
            None => (header::AUTHORIZATION, format!("Bearer {}", config.token)),
        };
        let value = header::HeaderValue::from_str(&value)
            .map_err(|e| Error::InvalidConfig(format!("token: {}", e)))?;
        default_headers.insert(name, value);
        default_headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let http = Client::builder()
            .default_headers(default_headers)
            .user_agent(concat!("stepmirror/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url: format!(
                "{}/{}",
                config.endpoint.trim_end_matches('/'),
                config.project
            ),
            http,
            debug: config.debug,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        if self.debug {
            debug!(%method, %url, "reporting request");
        }
        self.http.request(method, url)
    }

    async fn check(operation: &str, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(Error::Api {
            operation: operation.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ReportingClient for HttpReportingClient {
    async fn start_launch(&self, rq: &StartLaunchRq) -> Result<()> {
        let response = self.request(Method::POST, "launch").json(rq).send().await?;
        Self::check("start launch", response).await?;
        Ok(())
    }

    async fn finish_launch(&self, id: &LaunchId, rq: &FinishLaunchRq) -> Result<LaunchFinished> {
        let path = format!("launch/{}/finish", id);
        let response = self.request(Method::PUT, &path).json(rq).send().await?;
        let response = Self::check("finish launch", response).await?;
        Ok(response.json().await?)
    }

    async fn start_item(&self, rq: &StartItemRq) -> Result<()> {
        let path = match &rq.parent {
            Some(parent) => format!("item/{}", parent),
            None => "item".to_string(),
        };
        let response = self.request(Method::POST, &path).json(rq).send().await?;
        Self::check("start item", response).await?;
        Ok(())
    }

    async fn finish_item(&self, id: &ItemId, rq: &FinishItemRq) -> Result<()> {
        let path = format!("item/{}", id);
        let response = self.request(Method::PUT, &path).json(rq).send().await?;
        Self::check("finish item", response).await?;
        Ok(())
    }

    async fn send_log(&self, rq: &LogRq, attachment: Option<&Attachment>) -> Result<()> {
        let builder = match attachment {
            None => self.request(Method::POST, "log").json(rq),
            Some(file) => {
                let mut entry = rq.clone();
                entry.file = Some(LogFile {
                    name: file.name.clone(),
                });
                let json = serde_json::to_vec(&[entry])?;
                if self.debug {
                    debug!(name = %file.name, bytes = file.content.len(), "attaching file");
                }
                let form = multipart::Form::new()
                    .part(
                        "json_request_part",
                        multipart::Part::bytes(json).mime_str("application/json")?,
                    )
                    .part(
                        "file",
                        multipart::Part::bytes(file.content.clone())
                            .file_name(file.name.clone())
                            .mime_str(&file.mime)?,
                    );
                self.request(Method::POST, "log").multipart(form)
            }
        };
        let response = builder.send().await?;
        Self::check("send log", response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn config() -> ReporterConfig {
        ReporterConfig {
            endpoint: "http://localhost:8080/api/v1/".into(),
            token: "abc".into(),
            project: "demo".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_base_url_joins_endpoint_and_project() {
        let client = HttpReportingClient::new(&config()).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/api/v1/demo");
    }

    #[test]
    fn test_custom_auth_header() {
        let mut config = config();
        config.auth_header = Some("X-Api-Key".into());
        assert!(HttpReportingClient::new(&config).is_ok());

        config.auth_header = Some("bad header".into());
        assert!(matches!(
            HttpReportingClient::new(&config),
            Err(Error::InvalidConfig(_))
        ));
    }

    /// Accept one request, answer it, and hand back the raw request text
    async fn serve_once(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if let Some(end) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&request[..end]).to_lowercase();
                    let len = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + len {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&request).into_owned());
        });

        (format!("http://{}/api/v1", addr), rx)
    }

    fn client_for(endpoint: String) -> HttpReportingClient {
        let mut config = config();
        config.endpoint = endpoint;
        HttpReportingClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_start_item_posts_under_parent() {
        let (endpoint, request) = serve_once("201 Created", "{}").await;
        let client = client_for(endpoint);

        let parent = ItemId::new();
        let rq = StartItemRq {
            uuid: ItemId::new(),
            launch_uuid: LaunchId::new(),
            parent: Some(parent),
            name: "I click Login".into(),
            kind: ItemKind::Step,
            start_time: Utc::now(),
            description: None,
            attributes: Vec::new(),
            retry: false,
        };
        client.start_item(&rq).await.unwrap();

        let request = request.await.unwrap();
        assert!(request.starts_with(&format!("POST /api/v1/demo/item/{} HTTP/1.1", parent)));
        assert!(request.to_lowercase().contains("authorization: bearer abc"));
        assert!(request.contains(r#""type":"STEP""#));
        assert!(request.contains(&format!(r#""uuid":"{}""#, rq.uuid)));
    }

    #[tokio::test]
    async fn test_finish_launch_returns_summary() {
        let (endpoint, request) =
            serve_once("200 OK", r#"{"id":"abc","number":7,"link":"http://rp/launches/7"}"#).await;
        let client = client_for(endpoint);

        let id = LaunchId::new();
        let rq = FinishLaunchRq {
            end_time: Utc::now(),
            status: Some(ItemStatus::Failed),
        };
        let finished = client.finish_launch(&id, &rq).await.unwrap();
        assert_eq!(finished.number, Some(7));
        assert_eq!(finished.link.as_deref(), Some("http://rp/launches/7"));

        let request = request.await.unwrap();
        assert!(request.starts_with(&format!("PUT /api/v1/demo/launch/{}/finish", id)));
        assert!(request.contains(r#""status":"failed""#));
    }

    #[tokio::test]
    async fn test_rejection_maps_to_api_error() {
        let (endpoint, _request) = serve_once("500 Internal Server Error", "boom").await;
        let client = client_for(endpoint);

        let rq = FinishItemRq {
            launch_uuid: LaunchId::new(),
            end_time: Utc::now(),
            status: None,
        };
        match client.finish_item(&ItemId::new(), &rq).await {
            Err(Error::Api {
                operation,
                status,
                message,
            }) => {
                assert_eq!(operation, "finish item");
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[test]
    fn test_token_with_newline_rejected() {
        let mut config = config();
        config.token = "abc\ndef".into();
        assert!(matches!(
            HttpReportingClient::new(&config),
            Err(Error::InvalidConfig(_))
        ));
    }
}
