use async_trait::async_trait;
use reqwest::{Request, Response};

/// Sends a prepared request. Implemented by the plain client and by the
/// credential wrappers layered on top of it.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}

#[async_trait]
impl<C: HttpClient + ?Sized> HttpClient for Box<C> {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        (**self).execute(req).await
    }
}
