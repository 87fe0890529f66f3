//! Fetching caller-supplied files and handing them to the assistant service.

use std::sync::Arc;

use reqwest::Url;
use reqwest::redirect::Policy;

use crate::assistant::api::AssistantApi;
use crate::config::IngestConfig;
use crate::error::IngestError;

/// Name used when the URL has no usable last path segment.
const FALLBACK_FILE_NAME: &str = "upload.bin";

/// Downloads a file by URL (size-limited) and uploads it for assistant use.
pub struct FileIngestor {
    http: reqwest::Client,
    api: Arc<dyn AssistantApi>,
    config: IngestConfig,
}

impl FileIngestor {
    pub fn new(api: Arc<dyn AssistantApi>, config: IngestConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(Policy::limited(5))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client for file ingestion: {}", e);
                reqwest::Client::new()
            });
        Self { http, api, config }
    }

    /// Fetch `file_url` and upload its bytes. Returns the service's file id.
    ///
    /// Errors name the file by [`redact_url`], never by the full URL.
    pub async fn ingest(&self, file_url: &str) -> Result<String, IngestError> {
        let url = Url::parse(file_url).map_err(|e| IngestError::InvalidUrl {
            url: UNPARSEABLE_URL.to_string(),
            reason: e.to_string(),
        })?;
        let label = redact_url(&url);
        if !matches!(url.scheme(), "http" | "https") {
            return Err(IngestError::InvalidUrl {
                url: label,
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let bytes = self.fetch(&url, &label).await?;
        let file_name = file_name_from_url(&url);
        tracing::info!(file_name = %file_name, size = bytes.len(), "Uploading file");

        let file = self
            .api
            .upload_file(&file_name, bytes)
            .await
            .map_err(IngestError::Upload)?;
        Ok(file.id)
    }

    async fn fetch(&self, url: &Url, label: &str) -> Result<Vec<u8>, IngestError> {
        let limit = self.config.max_bytes;
        let fetch_err = |e: reqwest::Error| IngestError::Fetch {
            url: label.to_string(),
            reason: e.without_url().to_string(),
        };

        let mut response = self.http.get(url.clone()).send().await.map_err(fetch_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Status {
                url: label.to_string(),
                status: status.as_u16(),
            });
        }

        let too_large = || IngestError::TooLarge {
            url: label.to_string(),
            limit,
        };
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(too_large());
        }

        // Content-Length may be absent or wrong; enforce the limit on the body too.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(fetch_err)? {
            if (body.len() + chunk.len()) as u64 > limit {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// Label used in errors for a URL that does not parse.
const UNPARSEABLE_URL: &str = "<unparseable url>";

/// Origin plus last path segment. Credentials, intermediate path segments
/// (Telegram puts the bot token there), query and fragment are dropped.
pub fn redact_url(url: &Url) -> String {
    let mut origin = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());
    if let Some(port) = url.port() {
        origin.push_str(&format!(":{}", port));
    }
    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    match segments.as_slice() {
        [] => origin,
        [only] => format!("{}/{}", origin, only),
        [.., last] => format!("{}/.../{}", origin, last),
    }
}

/// Last non-empty path segment of `url`, or a fixed fallback.
fn file_name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::assistant::mock::FakeAssistantApi;
    use crate::error::AssistantError;

    fn ingestor(api: Arc<FakeAssistantApi>, max_bytes: u64) -> FileIngestor {
        FileIngestor::new(
            api,
            IngestConfig {
                max_bytes,
                ..IngestConfig::default()
            },
        )
    }

    #[test]
    fn file_name_uses_last_segment() {
        let url = Url::parse("https://files.example.com/docs/report.pdf?token=abc").unwrap();
        assert_eq!(file_name_from_url(&url), "report.pdf");

        let url = Url::parse("https://files.example.com/").unwrap();
        assert_eq!(file_name_from_url(&url), FALLBACK_FILE_NAME);
    }

    #[test]
    fn redacted_url_keeps_origin_and_file_name() {
        let url = Url::parse(
            "https://user:pw@api.telegram.org/file/bot123:SECRET/documents/a.pdf?sig=xyz#top",
        )
        .unwrap();
        assert_eq!(redact_url(&url), "https://api.telegram.org/.../a.pdf");

        let url = Url::parse("http://127.0.0.1:8080/report.pdf").unwrap();
        assert_eq!(redact_url(&url), "http://127.0.0.1:8080/report.pdf");

        let url = Url::parse("https://files.example.com/").unwrap();
        assert_eq!(redact_url(&url), "https://files.example.com");
    }

    #[tokio::test]
    async fn errors_never_carry_the_full_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/botSECRET-TOKEN/documents/a.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/file/botSECRET-TOKEN/documents/big.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let api = Arc::new(FakeAssistantApi::new());
        let ingestor = ingestor(api, 16);

        let missing = format!("{}/file/botSECRET-TOKEN/documents/a.pdf", server.uri());
        let err = ingestor.ingest(&missing).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Fetching {}/.../a.pdf returned HTTP 404", server.uri())
        );

        let big = format!("{}/file/botSECRET-TOKEN/documents/big.pdf", server.uri());
        let err = ingestor.ingest(&big).await.unwrap_err();
        assert!(matches!(err, IngestError::TooLarge { .. }));
        assert!(!err.to_string().contains("SECRET-TOKEN"));

        let err = ingestor
            .ingest("ftp://files.example.com/botSECRET-TOKEN/a.pdf")
            .await
            .unwrap_err();
        assert!(!err.to_string().contains("SECRET-TOKEN"));
    }

    #[tokio::test]
    async fn downloads_and_uploads() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/data.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a,b\n1,2\n".to_vec()))
            .mount(&server)
            .await;

        let api = Arc::new(FakeAssistantApi::new());
        let file_id = ingestor(api.clone(), 1024)
            .ingest(&format!("{}/files/data.csv", server.uri()))
            .await
            .unwrap();

        assert!(file_id.starts_with("file_"));
        assert_eq!(api.uploads(), vec![("data.csv".to_string(), 8)]);
    }

    #[tokio::test]
    async fn not_found_is_reported_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let api = Arc::new(FakeAssistantApi::new());
        let url = format!("{}/missing.pdf", server.uri());
        let err = ingestor(api.clone(), 1024).ingest(&url).await.unwrap_err();

        assert!(matches!(err, IngestError::Status { status: 404, .. }));
        assert_eq!(err.to_string(), format!("Fetching {} returned HTTP 404", url));
        assert_eq!(api.calls("files.upload"), 0);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let api = Arc::new(FakeAssistantApi::new());
        let err = ingestor(api.clone(), 16)
            .ingest(&format!("{}/big.bin", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::TooLarge { limit: 16, .. }));
        assert_eq!(api.calls("files.upload"), 0);
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let api = Arc::new(FakeAssistantApi::new());
        let ingestor = ingestor(api, 1024);

        assert!(matches!(
            ingestor.ingest("file:///etc/passwd").await,
            Err(IngestError::InvalidUrl { .. })
        ));
        assert!(matches!(
            ingestor.ingest("not a url").await,
            Err(IngestError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn upload_rejection_is_wrapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
            .mount(&server)
            .await;

        let api = Arc::new(FakeAssistantApi::new());
        api.fail_next(
            "files.upload",
            AssistantError::Status {
                endpoint: "files.upload".into(),
                status: 400,
                body: "Invalid file format".into(),
            },
        );
        let err = ingestor(api, 1024)
            .ingest(&format!("{}/x.exe", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Upload(_)));
    }
}
