//! Batched render-URL requests with adaptive batch size.
//!
//! Candidates are requested in chunks of the current batch size. When a
//! multi-node request fails with 400 or 500 the batch size drops to 1 for the
//! rest of the run and the same candidates are requested again one at a time.
//! The batch size never grows back.
//!
//! A single-node request that still fails after retries marks that node as
//! failed and the batcher moves on, whatever the cause. Only a multi-node
//! request failing with a status other than 400/500, a transport error or an
//! unreadable body aborts the run.

use std::time::Duration;

use tracing::{info, warn};

use crate::client::FigmaClient;
use crate::error::{ApiError, ExportError};
use crate::format::ImageFormat;
use crate::http::{Transport, pause};
use crate::selector::ExportCandidate;

/// Statuses that mean the batch itself was the problem.
const DEGRADE_STATUSES: [u16; 2] = [400, 500];

/// Render result for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The service rendered the node at this URL.
    Url(String),
    /// The service answered but has no image for the node.
    NoUrl,
    /// The node's single-node request failed after retries.
    Failed(String),
}

/// Requests render URLs for candidates in batches.
pub struct ExportBatcher<'a, T> {
    client: FigmaClient<'a, T>,
    batch_size: usize,
    delay: Duration,
}

impl<'a, T: Transport> ExportBatcher<'a, T> {
    /// Create a batcher starting at `batch_size` (at least 1) with `delay`
    /// paused after every successful request.
    pub fn new(client: FigmaClient<'a, T>, batch_size: usize, delay: Duration) -> Self {
        Self {
            client,
            batch_size: batch_size.max(1),
            delay,
        }
    }

    /// Current batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Request render URLs for every candidate.
    ///
    /// Returns one outcome per candidate, in candidate order.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Batch`] when a request fails in a way that
    /// reducing the batch size cannot recover.
    pub fn export(
        &mut self,
        file_key: &str,
        candidates: &[ExportCandidate],
        scale: f64,
        format: ImageFormat,
    ) -> Result<Vec<RenderOutcome>, ExportError> {
        let mut outcomes = Vec::with_capacity(candidates.len());
        self.export_with(file_key, candidates, scale, format, |_, outcome| {
            outcomes.push(outcome);
        })?;
        Ok(outcomes)
    }

    /// Like [`export`](Self::export), but hands each outcome to `on_result`
    /// as soon as its batch completes.
    ///
    /// This lets downloads for a batch happen before the next batch is
    /// requested, while the batch's URLs are still fresh.
    ///
    /// # Errors
    ///
    /// Same as [`export`](Self::export). Outcomes delivered before the error
    /// stay delivered.
    pub fn export_with<F>(
        &mut self,
        file_key: &str,
        candidates: &[ExportCandidate],
        scale: f64,
        format: ImageFormat,
        mut on_result: F,
    ) -> Result<(), ExportError>
    where
        F: FnMut(&ExportCandidate, RenderOutcome),
    {
        let total = candidates.len();
        let mut start = 0;

        while start < total {
            let end = (start + self.batch_size).min(total);
            let batch = &candidates[start..end];
            let ids: Vec<&str> = batch.iter().map(|c| c.node_id.as_str()).collect();

            info!(
                file_key,
                nodes = batch.len(),
                from = start + 1,
                to = end,
                total,
                "Requesting render URLs"
            );

            match self.client.get_image_urls(file_key, &ids, scale, format) {
                Ok(urls) => {
                    pause(self.delay);
                    for candidate in batch {
                        let url = urls
                            .get(&candidate.node_id)
                            .cloned()
                            .flatten()
                            .filter(|url| !url.is_empty());
                        let outcome = match url {
                            Some(url) => RenderOutcome::Url(url),
                            None => {
                                warn!(
                                    node_id = %candidate.node_id,
                                    name = %candidate.display_name,
                                    "No render URL returned, skipping"
                                );
                                RenderOutcome::NoUrl
                            }
                        };
                        on_result(candidate, outcome);
                    }
                    start = end;
                }
                Err(err) if self.should_degrade(&err) => {
                    warn!(
                        status = err.status(),
                        from = self.batch_size,
                        "Batch request failed, switching to single-node requests"
                    );
                    self.batch_size = 1;
                }
                Err(err) if self.batch_size == 1 => {
                    let candidate = &batch[0];
                    warn!(
                        node_id = %candidate.node_id,
                        name = %candidate.display_name,
                        error = %err,
                        "Render request failed, skipping node"
                    );
                    on_result(candidate, RenderOutcome::Failed(err.to_string()));
                    start = end;
                }
                Err(source) => {
                    return Err(ExportError::Batch {
                        size: batch.len(),
                        source,
                    });
                }
            }
        }

        Ok(())
    }

    fn should_degrade(&self, err: &ApiError) -> bool {
        self.batch_size > 1 && err.status().is_some_and(|s| DEGRADE_STATUSES.contains(&s))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::ExportConfig;
    use crate::error::TransportErrorKind;
    use crate::http::{HttpRequest, MockReply, MockTransport, RetryingClient};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> ExportConfig {
        ExportConfig {
            api_base_url: "https://api.test/v1".to_owned(),
            ..ExportConfig::default()
        }
        .without_delays()
    }

    fn candidates(n: usize) -> Vec<ExportCandidate> {
        (1..=n)
            .map(|i| ExportCandidate {
                node_id: format!("1:{i}"),
                display_name: format!("Frame {i}"),
                page_name: "Page".to_owned(),
            })
            .collect()
    }

    fn ids_of(request: &HttpRequest) -> Vec<String> {
        request
            .query_param("ids")
            .unwrap_or_default()
            .split(',')
            .map(str::to_owned)
            .collect()
    }

    /// Renders every requested id at `https://cdn.test/<id>.png`.
    fn render_all(request: &HttpRequest) -> MockReply {
        let images: serde_json::Map<String, serde_json::Value> = ids_of(request)
            .into_iter()
            .map(|id| {
                let url = format!("https://cdn.test/{id}.png");
                (id, json!(url))
            })
            .collect();
        MockReply::json(200, &json!({ "images": images }))
    }

    #[test]
    fn test_chunks_by_batch_size() {
        let transport = MockTransport::new().with_handler("/images/", render_all);
        let http = RetryingClient::new(&transport);
        let config = config();
        let mut batcher = ExportBatcher::new(FigmaClient::new(&http, "t", &config), 2, Duration::ZERO);

        let outcomes = batcher
            .export("KEY", &candidates(5), 2.0, ImageFormat::Png)
            .unwrap();

        assert_eq!(outcomes.len(), 5);
        assert_eq!(outcomes[4], RenderOutcome::Url("https://cdn.test/1:5.png".to_owned()));
        let sizes: Vec<usize> = transport.requests().iter().map(|r| ids_of(r).len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_missing_ids_are_no_url() {
        let transport = MockTransport::new().with_reply(
            "/images/",
            MockReply::json(200, &json!({"images": {"1:1": "https://cdn.test/a.png", "1:2": null}})),
        );
        let http = RetryingClient::new(&transport);
        let config = config();
        let mut batcher = ExportBatcher::new(FigmaClient::new(&http, "t", &config), 5, Duration::ZERO);

        let outcomes = batcher
            .export("KEY", &candidates(3), 1.0, ImageFormat::Png)
            .unwrap();

        assert_eq!(
            outcomes,
            vec![
                RenderOutcome::Url("https://cdn.test/a.png".to_owned()),
                RenderOutcome::NoUrl,
                RenderOutcome::NoUrl,
            ]
        );
    }

    #[test]
    fn test_degrades_to_single_node_and_never_grows() {
        // Multi-node requests fail with 500; single-node requests succeed.
        let transport = MockTransport::new().with_handler("/images/", |request| {
            if ids_of(request).len() > 1 {
                MockReply::status(500, "Render timeout")
            } else {
                render_all(request)
            }
        });
        let http = RetryingClient::new(&transport);
        let config = config();
        let mut batcher = ExportBatcher::new(FigmaClient::new(&http, "t", &config), 3, Duration::ZERO);

        let outcomes = batcher
            .export("KEY", &candidates(5), 1.0, ImageFormat::Png)
            .unwrap();

        assert_eq!(batcher.batch_size(), 1);
        assert!(outcomes.iter().all(|o| matches!(o, RenderOutcome::Url(_))));

        let sizes: Vec<usize> = transport.requests().iter().map(|r| ids_of(r).len()).collect();
        // Three retried attempts at size 3, then one request per node.
        assert_eq!(sizes, vec![3, 3, 3, 1, 1, 1, 1, 1]);
        assert!(sizes.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_degrades_on_bad_request() {
        let transport = MockTransport::new().with_replies(
            "/images/",
            vec![
                MockReply::status(400, "Payload too large"),
                MockReply::json(200, &json!({"images": {"1:1": "https://cdn.test/1.png"}})),
                MockReply::json(200, &json!({"images": {"1:2": "https://cdn.test/2.png"}})),
            ],
        );
        let http = RetryingClient::new(&transport);
        let config = config();
        let mut batcher = ExportBatcher::new(FigmaClient::new(&http, "t", &config), 5, Duration::ZERO);

        let outcomes = batcher
            .export("KEY", &candidates(2), 1.0, ImageFormat::Png)
            .unwrap();

        assert_eq!(batcher.batch_size(), 1);
        assert_eq!(outcomes[1], RenderOutcome::Url("https://cdn.test/2.png".to_owned()));
        // 400 is not retried by the render policy.
        assert_eq!(transport.request_count("/images/"), 3);
    }

    #[test]
    fn test_single_node_failure_is_recorded_and_skipped() {
        let transport = MockTransport::new().with_handler("/images/", |request| {
            if ids_of(request) == ["1:2"] {
                MockReply::status(500, "cannot render")
            } else {
                render_all(request)
            }
        });
        let http = RetryingClient::new(&transport);
        let config = config();
        let mut batcher = ExportBatcher::new(FigmaClient::new(&http, "t", &config), 1, Duration::ZERO);

        let outcomes = batcher
            .export("KEY", &candidates(3), 1.0, ImageFormat::Png)
            .unwrap();

        assert!(matches!(outcomes[0], RenderOutcome::Url(_)));
        assert!(matches!(&outcomes[1], RenderOutcome::Failed(reason) if reason.contains("500")));
        assert!(matches!(outcomes[2], RenderOutcome::Url(_)));
    }

    #[test]
    fn test_forbidden_batch_is_fatal() {
        let transport =
            MockTransport::new().with_reply("/images/", MockReply::status(403, "Invalid token"));
        let http = RetryingClient::new(&transport);
        let config = config();
        let mut batcher = ExportBatcher::new(FigmaClient::new(&http, "t", &config), 5, Duration::ZERO);

        let err = batcher
            .export("KEY", &candidates(2), 1.0, ImageFormat::Png)
            .unwrap_err();

        assert!(matches!(err, ExportError::Batch { size: 2, .. }));
        assert_eq!(batcher.batch_size(), 5);
    }

    #[test]
    fn test_single_node_transport_failure_is_recorded() {
        // 1:2 times out on every attempt; its neighbours render.
        let transport = MockTransport::new().with_handler("/images/", |request| {
            if ids_of(request) == ["1:2"] {
                MockReply::error(TransportErrorKind::Timeout, "timed out")
            } else {
                render_all(request)
            }
        });
        let http = RetryingClient::new(&transport);
        let config = config();
        let mut batcher = ExportBatcher::new(FigmaClient::new(&http, "t", &config), 1, Duration::ZERO);

        let outcomes = batcher
            .export("KEY", &candidates(3), 1.0, ImageFormat::Png)
            .unwrap();

        assert!(matches!(outcomes[0], RenderOutcome::Url(_)));
        assert!(matches!(&outcomes[1], RenderOutcome::Failed(reason) if reason.contains("timed out")));
        assert!(matches!(outcomes[2], RenderOutcome::Url(_)));
        // Three attempts for the failing node, one each for the others.
        assert_eq!(transport.request_count("/images/"), 5);
    }

    #[test]
    fn test_single_node_unreadable_body_is_recorded() {
        let transport =
            MockTransport::new().with_reply("/images/", MockReply::ok("<html>gateway</html>"));
        let http = RetryingClient::new(&transport);
        let config = config();
        let mut batcher = ExportBatcher::new(FigmaClient::new(&http, "t", &config), 1, Duration::ZERO);

        let outcomes = batcher
            .export("KEY", &candidates(2), 1.0, ImageFormat::Png)
            .unwrap();

        assert!(outcomes.iter().all(|o| matches!(o, RenderOutcome::Failed(_))));
    }

    #[test]
    fn test_multi_node_transport_failure_is_fatal() {
        let transport = MockTransport::new()
            .with_reply("/images/", MockReply::error(TransportErrorKind::Timeout, "timed out"));
        let http = RetryingClient::new(&transport);
        let config = config();
        let mut batcher = ExportBatcher::new(FigmaClient::new(&http, "t", &config), 2, Duration::ZERO);

        let err = batcher
            .export("KEY", &candidates(2), 1.0, ImageFormat::Png)
            .unwrap_err();

        assert!(matches!(err, ExportError::Batch { size: 2, source: ApiError::Transport(_) }));
        assert_eq!(transport.request_count("/images/"), 3);
    }

    #[test]
    fn test_results_delivered_per_batch() {
        let transport = Arc::new(MockTransport::new().with_handler("/images/", render_all));
        let http = RetryingClient::new(Arc::clone(&transport));
        let config = config();
        let mut batcher = ExportBatcher::new(FigmaClient::new(&http, "t", &config), 2, Duration::ZERO);

        // Record how many render requests had been made when each result arrived.
        let seen = Mutex::new(Vec::new());
        batcher
            .export_with("KEY", &candidates(4), 1.0, ImageFormat::Png, |candidate, _| {
                seen.lock()
                    .unwrap()
                    .push((candidate.node_id.clone(), transport.request_count("/images/")));
            })
            .unwrap();

        assert_eq!(
            seen.into_inner().unwrap(),
            vec![
                ("1:1".to_owned(), 1),
                ("1:2".to_owned(), 1),
                ("1:3".to_owned(), 2),
                ("1:4".to_owned(), 2),
            ]
        );
    }

    #[test]
    fn test_empty_candidates_make_no_requests() {
        let transport = MockTransport::new();
        let http = RetryingClient::new(&transport);
        let config = config();
        let mut batcher = ExportBatcher::new(FigmaClient::new(&http, "t", &config), 5, Duration::ZERO);

        assert!(batcher.export("KEY", &[], 1.0, ImageFormat::Png).unwrap().is_empty());
        assert!(transport.requests().is_empty());
    }
}
