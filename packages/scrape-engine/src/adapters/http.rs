//! HTTP execution context shared by the site adapters.
//!
//! One `reqwest::Client` per session, optionally routed through an egress
//! identity. Building it is the session's context acquisition step.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use tracing::{debug, warn};

use crate::error::{ExtractionError, ExtractionResult};
use crate::traits::adapter::ContextOptions;
use crate::types::identity::EgressIdentity;

/// HTTP client bound to one session.
#[derive(Debug, Clone)]
pub struct HttpContext {
    client: reqwest::Client,
    egress: Option<String>,
}

impl HttpContext {
    /// Build the client. Any failure is a setup error.
    pub fn build(egress: Option<&EgressIdentity>, options: &ContextOptions) -> ExtractionResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("de-DE,de;q=0.9,en;q=0.5"),
        );

        let mut builder = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .user_agent(options.user_agent.as_str())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(identity) = egress {
            let proxy = reqwest::Proxy::all(identity.proxy_url()).map_err(|e| {
                ExtractionError::Setup(format!("invalid proxy {}: {}", identity.endpoint(), e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ExtractionError::Setup(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            egress: egress.map(|i| i.endpoint()),
        })
    }

    /// Endpoint of the egress identity in use, if any.
    pub fn egress(&self) -> Option<&str> {
        self.egress.as_deref()
    }

    /// GET a page and return its body. Non-2xx responses are errors.
    pub async fn fetch_html(&self, url: &str) -> ExtractionResult<String> {
        debug!(url = %url, proxy = self.egress.as_deref().unwrap_or("direct"), "HTTP fetch starting");

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "HTTP request failed");
            ExtractionError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Http(Box::new(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("HTTP {} for {}", status.as_u16(), url),
            ))));
        }

        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_direct_and_proxied() {
        let options = ContextOptions::default();
        let direct = HttpContext::build(None, &options).unwrap();
        assert!(direct.egress().is_none());

        let identity = EgressIdentity::new(1, "10.0.0.1", 3128).with_credentials("u", "p");
        let proxied = HttpContext::build(Some(&identity), &options).unwrap();
        assert_eq!(proxied.egress(), Some("10.0.0.1:3128"));
    }
}
