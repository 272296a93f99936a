use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use http::Request;
use tower::{BoxError, Layer, Service};

use crate::resolver::TrustResolver;

/// Tower layer configuring the trusted proxies of every request before it reaches the inner
/// service
///
/// Requests must carry a [`RemoteAddr`](crate::RemoteAddr) extension, otherwise no proxy is ever
/// trusted for them. When a remote list cannot be fetched, the inner service is not called and the
/// [`Error`](crate::Error) is returned.
///
/// # Example
///
/// ```rust
/// use trust_proxies::{Proxies, TrustConfiguration, TrustProxiesLayer, TrustResolver};
/// use tower::ServiceBuilder;
///
/// let config = TrustConfiguration {
///     proxies: Proxies::parse("192.168.10.10"),
///     ..TrustConfiguration::default()
/// };
/// let resolver = TrustResolver::new(config).unwrap();
///
/// let service = ServiceBuilder::new()
///     .layer(TrustProxiesLayer::new(resolver))
///     .service_fn(|request: http::Request<()>| async move {
///         Ok::<_, std::convert::Infallible>(request)
///     });
/// ```
#[derive(Debug, Clone)]
pub struct TrustProxiesLayer {
    resolver: Arc<TrustResolver>,
}

impl TrustProxiesLayer {
    #[must_use]
    pub fn new(resolver: TrustResolver) -> Self {
        Self::from_shared(Arc::new(resolver))
    }

    #[must_use]
    pub fn from_shared(resolver: Arc<TrustResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &TrustResolver {
        &self.resolver
    }
}

impl<S> Layer<S> for TrustProxiesLayer {
    type Service = TrustProxiesService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TrustProxiesService {
            inner,
            resolver: Arc::clone(&self.resolver),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrustProxiesService<S> {
    inner: S,
    resolver: Arc<TrustResolver>,
}

impl<S> TrustProxiesService<S> {
    pub fn new(inner: S, resolver: Arc<TrustResolver>) -> Self {
        Self { inner, resolver }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, B> Service<Request<B>> for TrustProxiesService<S>
where
    S: Service<Request<B>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError>,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        // the ready service goes with the request, the clone stays for the next call
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let resolver = Arc::clone(&self.resolver);

        Box::pin(async move {
            if let Err(error) = resolver.resolve_request(&mut request).await {
                tracing::warn!(%error, "cannot resolve trusted proxies");

                return Err(error.into());
            }

            inner.call(request).await.map_err(Into::into)
        })
    }
}
