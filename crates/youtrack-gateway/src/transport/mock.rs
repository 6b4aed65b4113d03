//! Scripted transport for tests.
//!
//! Routes are matched on method and exact path (query ignored). Each route
//! replays its replies in order; the last reply repeats once the script runs
//! out. Unrouted requests get a 404.

use super::{ApiRequest, ApiResponse, Method, Transport};
use crate::error::TransportFailure;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// 200 with a JSON body.
    Json(Value),
    /// Non-2xx status with a text body.
    Status(u16, String),
    /// 429 with a `Retry-After` delay.
    RateLimited(Duration),
    /// Network-level failure.
    ConnectionFailed,
}

impl MockReply {
    fn into_result(self) -> Result<ApiResponse, TransportFailure> {
        match self {
            Self::Json(body) => Ok(ApiResponse { status: 200, body }),
            Self::Status(status, body) => Err(TransportFailure::http(status, body)),
            Self::RateLimited(delay) => Err(TransportFailure::HttpError {
                status: 429,
                body: String::new(),
                retry_after: Some(delay),
            }),
            Self::ConnectionFailed => Err(TransportFailure::connection("connection refused")),
        }
    }
}

struct Route {
    method: Method,
    path: String,
    replies: VecDeque<MockReply>,
}

/// A [`Transport`] that replays scripted replies and records requests.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    /// Create an empty transport; every request gets a 404 until routed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reply to the script for `method path`.
    #[must_use]
    pub fn on(self, method: Method, path: &str, reply: MockReply) -> Self {
        {
            let mut routes = self.routes.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            match routes
                .iter_mut()
                .find(|r| r.method == method && r.path == path)
            {
                Some(route) => route.replies.push_back(reply),
                None => routes.push(Route {
                    method,
                    path: path.to_string(),
                    replies: VecDeque::from([reply]),
                }),
            }
        }
        self
    }

    /// Every request received so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Requests with the given method, in order.
    #[must_use]
    pub fn requests_with(&self, method: Method) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    fn next_reply(&self, request: &ApiRequest) -> MockReply {
        let mut routes = self.routes.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == request.method && r.path == request.path)
        else {
            return MockReply::Status(404, r#"{"error":"Not Found"}"#.to_string());
        };

        if route.replies.len() > 1 {
            route.replies.pop_front().unwrap_or(MockReply::ConnectionFailed)
        } else {
            route
                .replies
                .front()
                .cloned()
                .unwrap_or(MockReply::ConnectionFailed)
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportFailure> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request.clone());
        self.next_reply(request).into_result()
    }
}
