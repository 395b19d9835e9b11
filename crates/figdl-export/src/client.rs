//! Figma REST API client.
//!
//! Covers the two endpoints the exporter needs: the document tree
//! (`GET /files/{key}`) and rendered-image URLs (`GET /images/{key}`).

use std::collections::HashMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::ExportConfig;
use crate::document::FileResponse;
use crate::error::ApiError;
use crate::format::ImageFormat;
use crate::http::{HttpRequest, HttpResponse, RetryingClient, Transport};

/// Authentication header carrying the personal access token.
const TOKEN_HEADER: &str = "X-Figma-Token";

/// Response of `GET /images/{key}`.
#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    err: Option<String>,
    #[serde(default)]
    images: HashMap<String, Option<String>>,
}

/// Figma API client borrowing the run's HTTP client and settings.
pub struct FigmaClient<'a, T> {
    http: &'a RetryingClient<T>,
    token: &'a str,
    config: &'a ExportConfig,
}

impl<'a, T: Transport> FigmaClient<'a, T> {
    /// Create a client.
    pub fn new(http: &'a RetryingClient<T>, token: &'a str, config: &'a ExportConfig) -> Self {
        Self {
            http,
            token,
            config,
        }
    }

    /// Fetch the full document tree of a file.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if the request fails, the final response is not a
    /// success or the body is not a valid file response.
    pub fn get_file(&self, file_key: &str) -> Result<FileResponse, ApiError> {
        let request = HttpRequest::get(self.config.api_url(&format!("files/{file_key}")))
            .header(TOKEN_HEADER, self.token)
            .timeout(self.config.document_timeout);

        self.http
            .send_with(&request, &self.config.document_retry, read_json)
    }

    /// Request rendered-image URLs for `node_ids`.
    ///
    /// The result maps node ids to URLs; nodes the service cannot render are
    /// absent or mapped to `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure, non-success status (after
    /// retries) or a malformed body.
    pub fn get_image_urls(
        &self,
        file_key: &str,
        node_ids: &[&str],
        scale: f64,
        format: ImageFormat,
    ) -> Result<HashMap<String, Option<String>>, ApiError> {
        let request = HttpRequest::get(self.config.api_url(&format!("images/{file_key}")))
            .query("ids", node_ids.join(","))
            .query("scale", scale.to_string())
            .query("format", format.as_str())
            .header(TOKEN_HEADER, self.token)
            .timeout(self.config.request_timeout);

        debug!(file_key, count = node_ids.len(), "Requesting render URLs");
        let body: ImagesResponse =
            self.http
                .send_with(&request, &self.config.render_retry, read_json)?;
        if let Some(err) = body.err.filter(|e| !e.is_empty()) {
            debug!(file_key, error = %err, "Render response carried an error message");
        }
        Ok(body.images)
    }
}

/// Decode a success response, or turn an error status into [`ApiError`].
fn read_json<B: DeserializeOwned>(response: HttpResponse) -> Result<B, ApiError> {
    if !response.is_success() {
        return Err(response.into_error());
    }
    response.into_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{MockReply, MockTransport};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> ExportConfig {
        ExportConfig {
            api_base_url: "https://api.test/v1".to_owned(),
            ..ExportConfig::default()
        }
        .without_delays()
    }

    #[test]
    fn test_get_file_sends_token_and_parses_tree() {
        let transport = MockTransport::new().with_reply(
            "/files/KEY",
            MockReply::json(
                200,
                &json!({
                    "name": "App",
                    "document": {"id": "0:0", "type": "DOCUMENT", "children": []}
                }),
            ),
        );
        let http = RetryingClient::new(&transport);
        let config = config();
        let client = FigmaClient::new(&http, "secret", &config);

        let file = client.get_file("KEY").unwrap();
        assert_eq!(file.name.as_deref(), Some("App"));

        let requests = transport.requests();
        assert_eq!(requests[0].url, "https://api.test/v1/files/KEY");
        assert_eq!(requests[0].header_value("X-Figma-Token"), Some("secret"));
        assert_eq!(requests[0].timeout, Some(config.document_timeout));
    }

    #[test]
    fn test_get_file_retries_body_cut_off() {
        let document = json!({"document": {"id": "0:0", "type": "DOCUMENT"}});
        let transport = MockTransport::new().with_replies(
            "/files/KEY",
            vec![
                MockReply::broken_body(r#"{"document": {"#, std::io::ErrorKind::ConnectionReset),
                MockReply::json(200, &document),
            ],
        );
        let http = RetryingClient::new(&transport);
        let config = config();
        let client = FigmaClient::new(&http, "secret", &config);

        client.get_file("KEY").unwrap();
        assert_eq!(transport.request_count("/files/"), 2);
    }

    #[test]
    fn test_get_file_error_message() {
        let transport = MockTransport::new().with_reply(
            "/files/KEY",
            MockReply::json(403, &json!({"status": 403, "err": "Invalid token"})),
        );
        let http = RetryingClient::new(&transport);
        let config = config();
        let client = FigmaClient::new(&http, "bad", &config);

        let err = client.get_file("KEY").unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(err.to_string(), "HTTP 403: Invalid token");
        assert_eq!(transport.request_count("/files/"), 1);
    }

    #[test]
    fn test_get_image_urls_query() {
        let transport = MockTransport::new().with_reply(
            "/images/KEY",
            MockReply::json(
                200,
                &json!({"err": null, "images": {"1:2": "https://cdn.test/1.png", "1:3": null}}),
            ),
        );
        let http = RetryingClient::new(&transport);
        let config = config();
        let client = FigmaClient::new(&http, "secret", &config);

        let urls = client
            .get_image_urls("KEY", &["1:2", "1:3"], 2.0, ImageFormat::Png)
            .unwrap();
        assert_eq!(urls.get("1:2"), Some(&Some("https://cdn.test/1.png".to_owned())));
        assert_eq!(urls.get("1:3"), Some(&None));

        let request = &transport.requests()[0];
        assert_eq!(request.query_param("ids"), Some("1:2,1:3"));
        assert_eq!(request.query_param("scale"), Some("2"));
        assert_eq!(request.query_param("format"), Some("png"));
    }

    #[test]
    fn test_get_image_urls_retries_server_errors() {
        let transport = MockTransport::new().with_replies(
            "/images/KEY",
            vec![
                MockReply::status(500, "boom"),
                MockReply::json(200, &json!({"images": {"1:2": "https://cdn.test/1.png"}})),
            ],
        );
        let http = RetryingClient::new(&transport);
        let config = config();
        let client = FigmaClient::new(&http, "secret", &config);

        let urls = client
            .get_image_urls("KEY", &["1:2"], 1.5, ImageFormat::Jpg)
            .unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(transport.request_count("/images/"), 2);
    }
}
