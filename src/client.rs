use crate::config::{GeneratorConfig, RetryConfig, API_TOKEN_ENV};
use crate::error::TextTo3DError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use std::env;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

const REDACTED: &str = "[REDACTED]";

/// The client for the text-to-CAD generation service.
///
/// It holds the shared `reqwest::Client`, the service base URL and the API token.
/// It is designed to be cloneable and safe to share across threads.
#[derive(Clone)]
pub struct CadClient {
    client: reqwest::Client,
    base_url: Url,
    api_token: String,
    retry: RetryConfig,
}

impl CadClient {
    /// Creates a new `CadClient` from the generator settings.
    ///
    /// The token comes from `config.api_token`. If that is `None`, it falls back to the
    /// `TEXT_TO_3D_API_TOKEN` environment variable.
    ///
    /// # Errors
    ///
    /// - `TextTo3DError::MissingApiToken` if the token is not provided in either way.
    /// - `TextTo3DError::RequestFailed` if the internal HTTP client fails to build.
    /// - `TextTo3DError::UrlParseFailed` if the configured base URL is invalid.
    pub fn new(config: &GeneratorConfig) -> Result<Self, TextTo3DError> {
        let api_token = config
            .api_token
            .clone()
            .or_else(|| env::var(API_TOKEN_ENV).ok())
            .filter(|token| !token.is_empty());
        let Some(api_token) = api_token else {
            return Err(TextTo3DError::MissingApiToken);
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .build()?;

        let mut base_url = Url::parse(&config.base_url)?;
        // `Url::join` replaces the last path segment unless the base ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            api_token,
            retry: config.retry.clone(),
        })
    }

    /// Builds the generation request URL with every query parameter URL-encoded.
    pub fn request_url(&self, prompt: &str, output_format: &str) -> Result<Url, TextTo3DError> {
        self.build_url(prompt, &self.api_token, output_format)
    }

    /// The request URL with the token masked, safe to log or store.
    pub fn redacted_url(&self, prompt: &str, output_format: &str) -> Result<Url, TextTo3DError> {
        self.build_url(prompt, REDACTED, output_format)
    }

    fn build_url(&self, prompt: &str, token: &str, output_format: &str) -> Result<Url, TextTo3DError> {
        let mut url = self.base_url.join("text_to_cad")?;
        url.query_pairs_mut()
            .append_pair("prompt", prompt)
            .append_pair("token", token)
            .append_pair("file_export_format", output_format);
        Ok(url)
    }

    /// Asks the service to generate a 3D file for `prompt` in `output_format`.
    ///
    /// Transient failures (timeouts, connection errors, `429` and `5xx`) are retried with
    /// exponential backoff according to the configured [`RetryConfig`].
    ///
    /// # Returns
    ///
    /// The raw response body, which references the generated artifact.
    pub async fn text_to_cad(&self, prompt: &str, output_format: &str) -> Result<String, TextTo3DError> {
        let url = self.request_url(prompt, output_format)?;
        let logged_url = self.redacted_url(prompt, output_format)?;
        let mut attempt = 0;

        loop {
            debug!(url = %logged_url, attempt, "Sending text-to-CAD request");
            match self.send(url.clone()).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(error = %e, attempt, ?delay, "Text-to-CAD request failed, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Sends one request. Errors are stripped of the request URL, which carries the token.
    async fn send(&self, url: Url) -> Result<String, TextTo3DError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = response.status();
        let body = response.text().await.map_err(reqwest::Error::without_url)?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(TextTo3DError::ApiError {
                status,
                message: body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> CadClient {
        CadClient::new(&GeneratorConfig {
            base_url: base_url.to_string(),
            api_token: Some("api-test-token".to_string()),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_request_url_encodes_parameters() {
        let url = client("http://127.0.0.1:5771")
            .request_url("a red cube & co", "stl")
            .unwrap();

        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:5771/text_to_cad?prompt=a+red+cube+%26+co&token=api-test-token&file_export_format=stl"
        );
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("prompt".to_string(), "a red cube & co".to_string()));
    }

    #[test]
    fn test_base_url_path_is_kept() {
        let url = client("http://cad.internal/api/v1")
            .request_url("a red cube", "step")
            .unwrap();

        assert_eq!(url.path(), "/api/v1/text_to_cad");
    }

    #[test]
    fn test_redacted_url_hides_token() {
        let url = client("http://127.0.0.1:5771")
            .redacted_url("a red cube", "stl")
            .unwrap();

        assert!(!url.as_str().contains("api-test-token"));
        assert!(url.query_pairs().any(|(k, v)| k == "token" && v == REDACTED));
    }
}
