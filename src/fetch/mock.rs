//! In-process [`HttpClient`] returning canned responses per URL.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, Request, Response};

use super::client::HttpClient;

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Responses are queued per URL; the last one queued for a URL keeps being
/// served once the earlier ones are used up. Unknown URLs get a 404.
#[derive(Default)]
pub(crate) struct MockClient {
    routes: Mutex<HashMap<String, VecDeque<(u16, Vec<u8>)>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, url: &str, status: u16, body: Vec<u8>) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back((status, body));
        self
    }

    pub fn with_json(self, url: &str, status: u16, body: &str) -> Self {
        self.with_response(url, status, body.as_bytes().to_vec())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == url)
            .count()
    }
}

#[async_trait]
impl HttpClient for MockClient {
    async fn execute(&self, req: Request) -> reqwest::Result<Response> {
        let url = req.url().to_string();
        self.requests.lock().unwrap().push(RecordedRequest {
            method: req.method().clone(),
            url: url.clone(),
            headers: req.headers().clone(),
            body: req
                .body()
                .and_then(|b| b.as_bytes())
                .map(<[u8]>::to_vec)
                .unwrap_or_default(),
        });

        let (status, body) = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&url) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) if !queue.is_empty() => queue[0].clone(),
                _ => (404, Vec::new()),
            }
        };

        let response = http::Response::builder().status(status).body(body).unwrap();
        Ok(Response::from(response))
    }
}
