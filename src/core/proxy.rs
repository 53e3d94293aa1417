use crate::config::{PortalConfig, PORTAL_API_HEADER};
use crate::domain::model::{DocumentOutcome, PdfPayload};
use crate::domain::ports::CacheStore;
use crate::utils::validation;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING};
use reqwest::Client;

/// Leading byte sequence identifying a PDF body.
const PDF_MAGIC: &[u8] = b"%PDF";

/// Stray leading bytes are only repaired when the signature starts inside
/// this window; anything deeper is left alone.
const SIGNATURE_SCAN_WINDOW: usize = 20;

/// A nominally successful response below this size is the upstream's
/// empty-file placeholder, not a real document.
const MIN_PLAUSIBLE_SIZE: usize = 100;

/// Codecs the local HTTP stack always decodes. The upstream sometimes
/// advertises exotic encodings that it cannot actually serve intact.
const PRIMARY_ACCEPT_ENCODING: &str = "gzip, deflate";
const FALLBACK_ACCEPT_ENCODING: &str = "identity";

fn document_cache_key(url: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    url.hash(&mut hasher);
    format!("portal:permit:{:016x}", hasher.finish())
}

/// Cached fetch-through for permit PDFs served by the portal.
///
/// Works around three known upstream defects: encodings the local stack
/// cannot decode, stray bytes before the PDF signature, and 200-status
/// placeholder bodies standing in for a missing file. Callers get either
/// valid bytes or `NotAvailable` with the original URL, never a corrupted
/// or truncated success.
pub struct BinaryProxy<C: CacheStore> {
    config: PortalConfig,
    cache: C,
    client: Client,
}

impl<C: CacheStore> BinaryProxy<C> {
    pub fn new(config: PortalConfig, cache: C) -> Self {
        // fires the one-time missing-secret diagnostic at startup
        let _ = config.api_key();
        Self {
            config,
            cache,
            client: Client::new(),
        }
    }

    pub async fn fetch_document(&self, url: &str) -> DocumentOutcome {
        let cache_key = document_cache_key(url);

        if let Err(e) = validation::validate_url("document_url", url) {
            tracing::warn!("❌ permit fetch rejected before network: {}", e);
            self.purge(&cache_key).await;
            return self.not_available(url);
        }
        match self.cache.get(&cache_key).await {
            Ok(Some(bytes)) => return DocumentOutcome::Available(PdfPayload::new(bytes)),
            Ok(None) => {}
            Err(e) => tracing::warn!("❌ permit cache read failed, treating as miss: {}", e),
        }

        let Some(api_key) = self.config.api_key() else {
            return self.not_available(url);
        };

        let Some(body) = self.fetch_with_fallback(url, api_key).await else {
            self.purge(&cache_key).await;
            return self.not_available(url);
        };

        let body = strip_leading_garbage(body);

        if body.len() < MIN_PLAUSIBLE_SIZE {
            tracing::warn!(
                "❌ permit body is {} bytes, treating as the upstream placeholder",
                body.len()
            );
            self.purge(&cache_key).await;
            return self.not_available(url);
        }

        if let Err(e) = self
            .cache
            .set(&cache_key, body.clone(), self.config.cache_ttl())
            .await
        {
            tracing::warn!("❌ permit cache write failed: {}", e);
        }

        DocumentOutcome::Available(PdfPayload::new(body))
    }

    /// Response headers for streaming an available payload back through the
    /// surrounding application.
    pub fn response_headers(&self, payload: &PdfPayload) -> Vec<(&'static str, String)> {
        vec![
            ("Content-Type", "application/pdf".to_string()),
            ("Content-Disposition", "inline".to_string()),
            ("Content-Length", payload.size.to_string()),
            (
                "Cache-Control",
                format!("public, max-age={}", self.config.cache_ttl_seconds),
            ),
            ("X-Content-Type-Options", "nosniff".to_string()),
        ]
    }

    /// Two fetch strategies in strict order, stopping at the first success:
    /// safe compression first, then no compression at all. No third
    /// strategy exists.
    async fn fetch_with_fallback(&self, url: &str, api_key: &str) -> Option<Vec<u8>> {
        for encoding in [PRIMARY_ACCEPT_ENCODING, FALLBACK_ACCEPT_ENCODING] {
            if let Some(body) = self.attempt_fetch(url, api_key, encoding).await {
                return Some(body);
            }
        }
        None
    }

    async fn attempt_fetch(&self, url: &str, api_key: &str, encoding: &str) -> Option<Vec<u8>> {
        let attempts = 1 + self.config.proxy_retry_attempts;
        for attempt in 1..=attempts {
            tracing::debug!(
                "📡 permit fetch ({}): attempt {}/{}",
                encoding,
                attempt,
                attempts
            );

            let request = self
                .client
                .get(url)
                .header(PORTAL_API_HEADER, api_key)
                .header(ACCEPT, "application/pdf, */*")
                .header(ACCEPT_ENCODING, encoding)
                .timeout(self.config.timeout());

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    match response.bytes().await {
                        Ok(bytes) => return Some(bytes.to_vec()),
                        Err(e) => tracing::warn!(
                            "❌ permit fetch ({}): failed to read body: {}",
                            encoding,
                            e
                        ),
                    }
                }
                Ok(response) => tracing::warn!(
                    "❌ permit fetch ({}): upstream responded with status {}",
                    encoding,
                    response.status()
                ),
                Err(e) => tracing::warn!("❌ permit fetch ({}): {}", encoding, e),
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }
        None
    }

    /// Failed attempts must not linger in the cache until natural expiry.
    async fn purge(&self, cache_key: &str) {
        match self.cache.delete(cache_key).await {
            Ok(true) => tracing::debug!("🧹 purged stale permit cache entry"),
            Ok(false) => {}
            Err(e) => tracing::warn!("❌ permit cache purge failed: {}", e),
        }
    }

    fn not_available(&self, url: &str) -> DocumentOutcome {
        DocumentOutcome::NotAvailable {
            url: url.to_string(),
        }
    }
}

/// Repair the one known "stray leading bytes" defect: drop whatever
/// precedes the PDF signature when the signature starts inside the scan
/// window. A signature deeper in, or missing entirely, is left untouched.
fn strip_leading_garbage(body: Vec<u8>) -> Vec<u8> {
    let window = body.len().min(SIGNATURE_SCAN_WINDOW);
    let offset = (0..window).find(|&i| body[i..].starts_with(PDF_MAGIC));

    match offset {
        Some(0) | None => body,
        Some(n) => {
            tracing::debug!("🧹 stripped {} stray bytes before the PDF signature", n);
            body[n..].to_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryCache;
    use httpmock::prelude::*;

    fn pdf_body(padding: usize) -> Vec<u8> {
        let mut body = b"%PDF-1.4\n".to_vec();
        body.extend(std::iter::repeat(b'x').take(padding));
        body
    }

    fn test_config(base_url: &str) -> PortalConfig {
        let mut config = PortalConfig::new(base_url);
        config.api_key = Some("test-key".to_string());
        config.proxy_retry_attempts = 0;
        config.retry_delay_ms = 10;
        config
    }

    fn proxy(server: &MockServer) -> BinaryProxy<MemoryCache> {
        BinaryProxy::new(test_config(&server.url("")), MemoryCache::new())
    }

    #[tokio::test]
    async fn test_valid_document_is_fetched_and_cached() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/permits/123.pdf")
                .header("PORTAL-API", "test-key");
            then.status(200).body(pdf_body(200));
        });

        let proxy = proxy(&server);
        let url = server.url("/permits/123.pdf");

        let first = proxy.fetch_document(&url).await;
        let second = proxy.fetch_document(&url).await;

        mock.assert_hits(1);
        match (first, second) {
            (DocumentOutcome::Available(a), DocumentOutcome::Available(b)) => {
                assert_eq!(a, b);
                assert!(a.bytes.starts_with(b"%PDF"));
                assert_eq!(a.size, a.bytes.len());
            }
            other => panic!("expected two available payloads, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leading_garbage_inside_window_is_stripped() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/permits/dirty.pdf");
            let mut body = vec![0u8, 0u8, 0u8];
            body.extend(pdf_body(200));
            then.status(200).body(body);
        });

        let outcome = proxy(&server)
            .fetch_document(&server.url("/permits/dirty.pdf"))
            .await;

        match outcome {
            DocumentOutcome::Available(payload) => {
                assert!(payload.bytes.starts_with(b"%PDF"));
                assert_eq!(payload.size, pdf_body(200).len());
            }
            other => panic!("expected available payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signature_beyond_window_is_not_repaired() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/permits/deep.pdf");
            let mut body = vec![b'.'; 25];
            body.extend(pdf_body(200));
            then.status(200).body(body);
        });

        let outcome = proxy(&server)
            .fetch_document(&server.url("/permits/deep.pdf"))
            .await;

        match outcome {
            DocumentOutcome::Available(payload) => {
                // offset 25 is outside the 20-byte window; body kept as-is
                assert!(payload.bytes.starts_with(b"."));
                assert_eq!(payload.bytes.len(), 25 + pdf_body(200).len());
            }
            other => panic!("expected available payload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_placeholder_body_yields_not_available_and_purges_cache() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/permits/empty.pdf");
            then.status(200).body("x");
        });

        let cache = MemoryCache::new();
        let url = server.url("/permits/empty.pdf");

        // an already-expired entry from an earlier run must not survive the
        // failed refetch
        cache
            .set(
                &document_cache_key(&url),
                b"stale".to_vec(),
                std::time::Duration::from_millis(10),
            )
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let proxy = BinaryProxy::new(test_config(&server.url("")), cache.clone());
        let outcome = proxy.fetch_document(&url).await;

        assert_eq!(outcome, DocumentOutcome::NotAvailable { url: url.clone() });
        assert_eq!(cache.get(&document_cache_key(&url)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_encoding_fallback_order() {
        let server = MockServer::start();
        let primary = server.mock(|when, then| {
            when.method(GET)
                .path("/permits/456.pdf")
                .header("Accept-Encoding", "gzip, deflate");
            then.status(500);
        });
        let fallback = server.mock(|when, then| {
            when.method(GET)
                .path("/permits/456.pdf")
                .header("Accept-Encoding", "identity");
            then.status(200).body(pdf_body(200));
        });

        let outcome = proxy(&server)
            .fetch_document(&server.url("/permits/456.pdf"))
            .await;

        primary.assert_hits(1);
        fallback.assert_hits(1);
        assert!(outcome.is_available());
    }

    #[tokio::test]
    async fn test_both_strategies_failing_yields_not_available() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/permits/789.pdf");
            then.status(404);
        });

        let url = server.url("/permits/789.pdf");
        let outcome = proxy(&server).fetch_document(&url).await;

        // one attempt per encoding strategy, nothing beyond the second
        mock.assert_hits(2);
        assert_eq!(outcome, DocumentOutcome::NotAvailable { url });
    }

    #[tokio::test]
    async fn test_invalid_url_rejected_before_network() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET);
            then.status(200).body(pdf_body(200));
        });

        let outcome = proxy(&server).fetch_document("not a url at all").await;

        mock.assert_hits(0);
        assert_eq!(
            outcome,
            DocumentOutcome::NotAvailable {
                url: "not a url at all".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_api_key_fails_soft() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET);
            then.status(200).body(pdf_body(200));
        });

        let mut config = test_config(&server.url(""));
        config.api_key = None;
        let proxy = BinaryProxy::new(config, MemoryCache::new());

        let outcome = proxy.fetch_document(&server.url("/permits/1.pdf")).await;
        mock.assert_hits(0);
        assert!(!outcome.is_available());
    }

    #[tokio::test]
    async fn test_response_headers_for_payload() {
        let server = MockServer::start();
        let proxy = proxy(&server);
        let payload = PdfPayload::new(pdf_body(200));

        let headers = proxy.response_headers(&payload);
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.clone())
        };

        assert_eq!(lookup("Content-Type"), Some("application/pdf".to_string()));
        assert_eq!(lookup("Content-Disposition"), Some("inline".to_string()));
        assert_eq!(
            lookup("Content-Length"),
            Some(payload.size.to_string())
        );
        assert_eq!(
            lookup("Cache-Control"),
            Some("public, max-age=600".to_string())
        );
        assert_eq!(
            lookup("X-Content-Type-Options"),
            Some("nosniff".to_string())
        );
    }

    #[test]
    fn test_strip_boundary_at_window_edge() {
        // signature starting at offset 19 is still inside the window
        let mut inside = vec![b'g'; 19];
        inside.extend(b"%PDF-1.4 rest of file");
        assert!(strip_leading_garbage(inside).starts_with(b"%PDF"));

        // offset 20 is out
        let mut outside = vec![b'g'; 20];
        outside.extend(b"%PDF-1.4 rest of file");
        assert!(strip_leading_garbage(outside).starts_with(b"g"));
    }

    #[test]
    fn test_document_cache_key_is_stable_and_bounded() {
        let a = document_cache_key("https://portal.example/permits/1.pdf");
        let b = document_cache_key("https://portal.example/permits/1.pdf");
        let c = document_cache_key("https://portal.example/permits/2.pdf");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.len() <= "portal:permit:".len() + 16);
    }
}
