//! Tower layer running the [`AuthDispatcher`] in front of every RPC.
//!
//! The check runs on the HTTP request before tonic decodes anything, so
//! streaming calls are authorized once, before the first message flows. On
//! success the [`AuthenticatedUser`] is attached to the request extensions;
//! on failure the call is answered with a trailers-only gRPC error.

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tonic::body::BoxBody;
use tonic::metadata::MetadataMap;
use tonic::transport::server::TcpConnectInfo;
use tower::{Layer, Service};

use super::dispatcher::{AuthDispatcher, AuthenticatedUser};

#[derive(Clone)]
pub struct AuthLayer {
    dispatcher: Arc<AuthDispatcher>,
}

impl AuthLayer {
    pub fn new(dispatcher: AuthDispatcher) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    dispatcher: Arc<AuthDispatcher>,
}

impl<S, B> Service<http::Request<B>> for AuthService<S>
where
    S: Service<http::Request<B>, Response = http::Response<BoxBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: http::Request<B>) -> Self::Future {
        // The readied service goes with this call; keep a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let dispatcher = Arc::clone(&self.dispatcher);

        Box::pin(async move {
            let metadata = MetadataMap::from_headers(request.headers().clone());
            let peer = request
                .extensions()
                .get::<TcpConnectInfo>()
                .and_then(TcpConnectInfo::remote_addr);

            match dispatcher.authorize(&metadata, peer).await {
                Ok(user) => {
                    request.extensions_mut().insert::<AuthenticatedUser>(user);
                    inner.call(request).await
                }
                Err(status) => Ok(status.into_http()),
            }
        })
    }
}
