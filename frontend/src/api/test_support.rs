#[cfg(test)]
pub mod mock {
    use crate::api::client::{register_mock, MockResponse, TestResponder};
    use crate::api::ApiError;
    use reqwest::Method;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    pub const GET: Method = Method::GET;
    pub const POST: Method = Method::POST;

    #[derive(Clone)]
    pub struct MockServer {
        inner: Arc<Mutex<Inner>>,
        base: String,
    }

    struct Inner {
        routes: Vec<Route>,
    }

    #[derive(Clone)]
    struct Route {
        method: Method,
        path: String,
        headers: Vec<(String, String)>,
        outcome: Outcome,
        hits: Arc<AtomicUsize>,
        last_body: Arc<Mutex<Option<Value>>>,
    }

    #[derive(Clone)]
    enum Outcome {
        Respond(MockResponse),
        NetworkError,
    }

    /// Handle to one registered route, used to assert on traffic.
    #[derive(Clone)]
    pub struct MockHandle {
        hits: Arc<AtomicUsize>,
        last_body: Arc<Mutex<Option<Value>>>,
    }

    impl MockHandle {
        pub fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        pub fn assert_hits(&self, expected: usize) {
            assert_eq!(self.hits(), expected, "unexpected number of hits");
        }

        pub fn last_body(&self) -> Option<Value> {
            self.last_body.lock().ok().and_then(|body| body.clone())
        }
    }

    impl MockServer {
        pub async fn start_async() -> Self {
            Self::start()
        }

        pub fn start() -> Self {
            static NEXT_ID: AtomicUsize = AtomicUsize::new(1);
            let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
            Self {
                inner: Arc::new(Mutex::new(Inner { routes: Vec::new() })),
                base: format!("http://mock-{}", id),
            }
        }

        pub fn url(&self, path: &str) -> String {
            let base_url = format!("{}{}", self.base, path);
            register_mock(base_url.clone(), Arc::new(self.clone()));
            base_url
        }

        /// Later routes win over earlier ones when both match.
        pub fn mock<F>(&self, f: F) -> MockHandle
        where
            F: FnOnce(&mut When, &mut Then),
        {
            let mut when = When::default();
            let mut then = Then::default();
            f(&mut when, &mut then);

            let method = when.method.clone().expect("mock requires method");
            let path = when.path.clone().expect("mock requires path");
            let outcome = if then.network_error {
                Outcome::NetworkError
            } else {
                Outcome::Respond(MockResponse::json(
                    then.status.unwrap_or(200),
                    then.body.unwrap_or_else(|| serde_json::json!({})),
                ))
            };

            let handle = MockHandle {
                hits: Arc::new(AtomicUsize::new(0)),
                last_body: Arc::new(Mutex::new(None)),
            };
            let mut inner = self.inner.lock().expect("mock lock");
            inner.routes.push(Route {
                method,
                path,
                headers: when.headers,
                outcome,
                hits: Arc::clone(&handle.hits),
                last_body: Arc::clone(&handle.last_body),
            });
            handle
        }

        /// Total requests seen for `method` + `path` across all routes.
        pub fn hits(&self, method: Method, path: &str) -> usize {
            let inner = self.inner.lock().expect("mock lock");
            inner
                .routes
                .iter()
                .filter(|route| route.method == method && route.path == path)
                .map(|route| route.hits.load(Ordering::SeqCst))
                .sum()
        }
    }

    impl Route {
        fn matches(&self, request: &reqwest::Request) -> bool {
            if self.method != *request.method() || self.path != request.url().path() {
                return false;
            }
            self.headers.iter().all(|(name, value)| {
                request
                    .headers()
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v == value)
                    .unwrap_or(false)
            })
        }
    }

    impl TestResponder for MockServer {
        fn respond(&self, request: &reqwest::Request) -> Result<MockResponse, ApiError> {
            let method = request.method();
            let path = request.url().path();
            let inner = self
                .inner
                .lock()
                .map_err(|_| ApiError::unknown("mock lock"))?;

            let route = inner
                .routes
                .iter()
                .rev()
                .find(|route| route.matches(request))
                .cloned()
                .ok_or_else(|| {
                    ApiError::request_failed(format!("No mock for {} {}", method, path))
                })?;

            route.hits.fetch_add(1, Ordering::SeqCst);
            let body = request
                .body()
                .and_then(|body| body.as_bytes())
                .and_then(|bytes| serde_json::from_slice::<Value>(bytes).ok());
            if let Ok(mut last) = route.last_body.lock() {
                *last = body;
            }

            match route.outcome {
                Outcome::Respond(response) => Ok(response),
                Outcome::NetworkError => Err(ApiError::request_failed("Unable to reach the server")),
            }
        }
    }

    #[derive(Default)]
    pub struct When {
        method: Option<Method>,
        path: Option<String>,
        headers: Vec<(String, String)>,
    }

    impl When {
        pub fn method(&mut self, method: Method) -> &mut Self {
            self.method = Some(method);
            self
        }

        pub fn path(&mut self, path: &str) -> &mut Self {
            self.path = Some(path.to_string());
            self
        }

        pub fn header(&mut self, name: &str, value: &str) -> &mut Self {
            self.headers.push((name.to_ascii_lowercase(), value.to_string()));
            self
        }

        pub fn bearer(&mut self, token: &str) -> &mut Self {
            self.header("authorization", &format!("Bearer {}", token))
        }
    }

    #[derive(Default)]
    pub struct Then {
        status: Option<u16>,
        body: Option<Value>,
        network_error: bool,
    }

    impl Then {
        pub fn status(&mut self, status: u16) -> &mut Self {
            self.status = Some(status);
            self
        }

        pub fn json_body(&mut self, body: Value) -> &mut Self {
            self.body = Some(body);
            self
        }

        pub fn network_error(&mut self) -> &mut Self {
            self.network_error = true;
            self
        }
    }
}
