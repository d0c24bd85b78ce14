//! REST strategy: one HTTP GET per resolution.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use tracing::{debug, warn};

use crate::{identity_label, KmsError};

/// Default query parameter name carrying the identity.
pub const DEFAULT_ID_QUERY_KEY: &str = "pskId";

/// REST lookup configuration, fixed at startup.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL. May embed one fixed extra query pair as `base?key=value`.
    pub base_url: String,
    /// Query parameter name carrying the identity.
    pub id_query_key: String,
    /// Fixed prefix prepended to the identity in the query value.
    pub id_query_val_prefix: String,
    /// Fixed extra headers sent with every request.
    pub headers: Vec<(String, String)>,
}

impl RestConfig {
    /// Configuration with defaults for a base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            id_query_key: DEFAULT_ID_QUERY_KEY.to_string(),
            id_query_val_prefix: String::new(),
            headers: Vec::new(),
        }
    }
}

/// Resolves keys against a remote HTTP endpoint.
///
/// The request carries the identity as a query parameter; the response body
/// is the hex-encoded key. Everything except the identity is fixed at
/// construction time.
pub struct RestLookup {
    client: reqwest::Client,
    base_url: Url,
    id_query_key: String,
    id_query_val_prefix: String,
    extra_query: Option<(String, String)>,
}

impl RestLookup {
    /// Build a lookup from configuration.
    ///
    /// An unparsable URL, extra query pair, or header is a configuration
    /// error and aborts startup.
    pub fn new(config: RestConfig) -> Result<Self, KmsError> {
        let (base, extra_query) = split_extra_query(&config.base_url)?;

        let base_url = Url::parse(base)
            .map_err(|e| KmsError::Config(format!("invalid lookup URL '{base}': {e}")))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| KmsError::Config(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| KmsError::Config(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| KmsError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            id_query_key: config.id_query_key,
            id_query_val_prefix: config.id_query_val_prefix,
            extra_query,
        })
    }

    /// Resolve an identity against the remote endpoint.
    pub async fn lookup(&self, identity: &[u8]) -> Option<Vec<u8>> {
        // HTTP queries are text; arbitrary identity bytes are rendered
        // lossily and percent-encoded by the query serializer.
        let id_value = format!(
            "{}{}",
            self.id_query_val_prefix,
            String::from_utf8_lossy(identity)
        );

        let mut query: Vec<(&str, &str)> = vec![(self.id_query_key.as_str(), id_value.as_str())];
        if let Some((key, value)) = &self.extra_query {
            query.push((key.as_str(), value.as_str()));
        }

        let response = match self
            .client
            .get(self.base_url.clone())
            .query(&query)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "key lookup request failed");
                return None;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "key lookup returned non-success");
            return None;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "failed to read key lookup response");
                return None;
            }
        };

        match hex::decode(body.trim()) {
            Ok(key) if !key.is_empty() => {
                debug!(identity = %identity_label(identity), "identity resolved");
                Some(key)
            }
            Ok(_) => {
                warn!(identity = %identity_label(identity), "key lookup returned empty key");
                None
            }
            Err(e) => {
                warn!(error = %e, "key lookup returned malformed hex");
                None
            }
        }
    }
}

/// Split a `base?key=value` URL into the base and the fixed extra pair.
fn split_extra_query(url: &str) -> Result<(&str, Option<(String, String)>), KmsError> {
    match url.split_once('?') {
        None => Ok((url, None)),
        Some((base, query)) => {
            let (key, value) = query.split_once('=').ok_or_else(|| {
                KmsError::Config(format!("extra query '{query}' is not key=value"))
            })?;
            Ok((base, Some((key.to_string(), value.to_string()))))
        }
    }
}
