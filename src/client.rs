use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::classify::Classifier;
use crate::config::ClientConfig;
use crate::error::{ApiError, Error, ErrorKind};
use crate::notice::{LogNavigator, Navigator};
use crate::refresh::{RefreshCoordinator, RefreshOutcome};
use crate::store::CredentialStore;
use crate::types::{AccessToken, CredentialPair, RefreshToken, TokenGrant};

/// Description of one API call. Pure data, built per call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Option<Value>,
    body: Option<Value>,
    headers: HeaderMap,
    authenticated: bool,
    refresh_on_expiry: bool,
}

impl ApiRequest {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            body: None,
            headers: HeaderMap::new(),
            authenticated: true,
            refresh_on_expiry: true,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Query string parameters (a JSON object of scalars). `null` means none.
    #[must_use]
    pub fn with_query(mut self, query: Value) -> Self {
        self.query = (!query.is_null()).then_some(query);
        self
    }

    /// JSON request body. `null` means none.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = (!body.is_null()).then_some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Send without the bearer token.
    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Do not refresh on an expired access token. The rejection is returned
    /// as a `Validation` error carrying the server message.
    #[must_use]
    pub fn without_refresh(mut self) -> Self {
        self.refresh_on_expiry = false;
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn recovers_expiry(&self) -> bool {
        self.authenticated && self.refresh_on_expiry
    }
}

/// Request pipeline stage.
///
/// Interceptors run in registration order. `before_send` runs for every
/// attempt, including the retry after a refresh; `on_success` and `on_error`
/// run once per [`ApiClient::call`] on its final outcome.
pub trait Interceptor: Send + Sync {
    fn before_send(&self, _request: &ApiRequest, _headers: &mut HeaderMap) {}

    fn on_success(&self, _request: &ApiRequest, _status: StatusCode) {}

    fn on_error(&self, _request: &ApiRequest, _error: &ApiError) {}
}

/// Authenticated JSON API client.
///
/// Attaches the bearer token from the [`CredentialStore`], unwraps the
/// response envelope and recovers expired access tokens through a single
/// shared refresh, retrying the original request once.
///
/// Cheap to clone; clones share the store, the refresh slot and the
/// connection pool.
#[derive(Clone)]
pub struct ApiClient {
    config: Arc<ClientConfig>,
    http: reqwest::Client,
    classifier: Classifier,
    store: Arc<CredentialStore>,
    coordinator: RefreshCoordinator,
    interceptors: Arc<Vec<Arc<dyn Interceptor>>>,
}

impl ApiClient {
    /// Create a client over `store`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP transport cannot be built.
    pub fn new(config: ClientConfig, store: Arc<CredentialStore>) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            classifier: Classifier::new(config.expired_code()),
            coordinator: RefreshCoordinator::new(store.clone(), Arc::new(LogNavigator)),
            config: Arc::new(config),
            http,
            store,
            interceptors: Arc::new(Vec::new()),
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    ///
    /// The configured timeout is not applied to a custom client.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Route "login required" to `navigator` (default: log only).
    #[must_use]
    pub fn with_navigator(mut self, navigator: impl Navigator) -> Self {
        self.coordinator = RefreshCoordinator::new(self.store.clone(), Arc::new(navigator));
        self
    }

    /// Append an interceptor to the pipeline.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        Arc::make_mut(&mut self.interceptors).push(Arc::new(interceptor));
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    #[must_use]
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Issue `request` and decode the envelope's `data` into `T`.
    ///
    /// # Errors
    ///
    /// - `Network` on transport failure (never retried here)
    /// - `AuthInvalid` when the session could not be recovered; the store is
    ///   cleared and the navigator was told
    /// - any other classified error, with the server message intact
    pub async fn call<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        let result = self.execute(request).await;

        match &result {
            Ok((status, _)) => {
                for interceptor in self.interceptors.iter() {
                    interceptor.on_success(request, *status);
                }
            }
            Err(e) => {
                tracing::debug!(
                    method = %request.method,
                    path = %request.path,
                    kind = %e.kind(),
                    "Request failed"
                );
                for interceptor in self.interceptors.iter() {
                    interceptor.on_error(request, e);
                }
            }
        }

        result.map(|(_, data)| data)
    }

    /// `GET path`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.call(&ApiRequest::get(path)).await
    }

    /// `GET path?query`.
    pub async fn get_with<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &impl Serialize,
    ) -> Result<T, ApiError> {
        self.call(&ApiRequest::get(path).with_query(encode(query)?))
            .await
    }

    /// `POST path` with a JSON body.
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        self.call(&ApiRequest::post(path).with_body(encode(body)?))
            .await
    }

    /// `PUT path` with a JSON body.
    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        self.call(&ApiRequest::put(path).with_body(encode(body)?))
            .await
    }

    /// `DELETE path`.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.call(&ApiRequest::delete(path)).await
    }

    /// `DELETE path?query`.
    pub async fn delete_with<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &impl Serialize,
    ) -> Result<T, ApiError> {
        self.call(&ApiRequest::delete(path).with_query(encode(query)?))
            .await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<(StatusCode, T), ApiError> {
        let observed = self.store.snapshot();
        let first = self.attempt(request, &observed.credentials).await;

        let expired = matches!(&first, Err(e) if e.kind() == ErrorKind::AuthExpired);
        if !expired {
            return first;
        }
        if !request.recovers_expiry() {
            // nothing to recover, e.g. a login with a wrong password
            return first.map_err(|e| ApiError::from_kind(ErrorKind::Validation, 401, e.message()));
        }

        let client = self.clone();
        let outcome = self
            .coordinator
            .refresh(observed.generation, move |token| async move {
                client.refresh_tokens(token).await
            })
            .await;

        match outcome {
            RefreshOutcome::Failed(e) => Err(e),
            RefreshOutcome::Refreshed(_) | RefreshOutcome::Stale(_) => {
                let current = self.store.snapshot();
                if current.credentials.is_empty() {
                    // signed out in the meantime; whoever cleared has navigated
                    return Err(ApiError::auth_invalid("login required"));
                }
                match self.attempt(request, &current.credentials).await {
                    Err(e) if e.kind() == ErrorKind::AuthExpired => {
                        let reason = ApiError::auth_invalid(e.message());
                        self.coordinator
                            .invalidate(current.generation, &reason)
                            .await;
                        Err(reason)
                    }
                    other => other,
                }
            }
        }
    }

    /// One HTTP round trip with the given credentials.
    async fn attempt<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        credentials: &CredentialPair,
    ) -> Result<(StatusCode, T), ApiError> {
        let url = self.config.url_for(&request.path).map_err(|e| {
            ApiError::unknown(0, format!("invalid request path '{}': {e}", request.path))
        })?;

        let mut headers = request.headers.clone();
        if request.authenticated {
            if let Some(token) = credentials.access_token() {
                headers.insert(AUTHORIZATION, bearer(token)?);
            }
        }
        for interceptor in self.interceptors.iter() {
            interceptor.before_send(request, &mut headers);
        }

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(headers);
        if let Some(query) = &request.query {
            builder = builder.query(query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(method = %request.method, path = %request.path, "Sending request");

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        tracing::debug!(path = %request.path, status = status.as_u16(), "Response received");

        self.config
            .envelope()
            .unwrap(status.as_u16(), &body, &self.classifier)
            .map(|data| (status, data))
    }

    /// Call the refresh endpoint. Never goes through the coordinator.
    async fn refresh_tokens(&self, token: RefreshToken) -> Result<CredentialPair, ApiError> {
        let mut request = ApiRequest::post(self.config.endpoints().refresh.clone())
            .with_body(json!({ "refreshToken": token.as_str() }))
            .anonymous()
            .without_refresh();

        if let Some(name) = self.config.refresh_header() {
            let mut value = HeaderValue::from_str(token.as_str())
                .map_err(|e| ApiError::unknown(0, format!("refresh token is not a valid header: {e}")))?;
            value.set_sensitive(true);
            request = request.with_header(name.clone(), value);
        }

        let (_, grant): (_, TokenGrant) = self.attempt(&request, &CredentialPair::empty()).await?;
        Ok(grant.into_pair())
    }
}

fn bearer(token: &AccessToken) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
        .map_err(|e| ApiError::unknown(0, format!("access token is not a valid header: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

fn encode(value: &impl Serialize) -> Result<Value, ApiError> {
    serde_json::to_value(value)
        .map_err(|e| ApiError::unknown(0, format!("failed to encode request: {e}")))
}
