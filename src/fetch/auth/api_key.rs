use crate::error::MonitorError;
use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that sends an API key in an HTTP header.
///
/// Header name and value are validated once at construction so a bad
/// setting fails at startup instead of on every request.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self, MonitorError> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes()).map_err(|e| {
            MonitorError::Configuration(format!("invalid API key header '{header_name}': {e}"))
        })?;
        let mut value = HeaderValue::from_str(key)
            .map_err(|e| MonitorError::Configuration(format!("invalid API key value: {e}")))?;
        value.set_sensitive(true);

        Ok(Self {
            inner,
            header_name,
            value,
        })
    }

    fn authorize(&self, req: &mut reqwest::Request) {
        req.headers_mut()
            .insert(self.header_name.clone(), self.value.clone());
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.authorize(&mut req);
        self.inner.execute(req).await
    }
}
