use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Method, Request, Response, Url};

/// Transport used to reach the feed provider.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;

    /// Sends a GET that asks for a JSON body.
    async fn get_json(&self, url: Url) -> reqwest::Result<Response> {
        let mut req = Request::new(Method::GET, url);
        req.headers_mut()
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        self.execute(req).await
    }
}
