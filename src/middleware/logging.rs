use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue},
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Logs start and end of every request inside a span carrying a request id.
///
/// The id is taken from an incoming `x-request-id` header when the caller
/// (n8n, a proxy) already set one, otherwise generated, and echoed back on
/// the response.
pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let method = req.method().to_string();
        let uri = req.uri().to_string();
        let remote_addr = req.connection_info().realip_remote_addr().unwrap_or("unknown").to_string();

        let span = tracing::info_span!("request", request_id = %request_id, method = %method, uri = %uri);

        span.in_scope(|| info!(remote_addr = %remote_addr, "Request started"));

        let fut = span.in_scope(|| self.service.call(req));

        Box::pin(
            async move {
                let result = fut.await;
                let duration_ms = start_time.elapsed().as_millis() as u64;

                match result {
                    Ok(mut response) => {
                        let status = response.status();
                        if status.is_server_error() {
                            warn!(status = status.as_u16(), duration_ms, "Request completed with server error");
                        } else {
                            info!(status = status.as_u16(), duration_ms, "Request completed");
                        }

                        if let Ok(value) = HeaderValue::from_str(&request_id) {
                            response
                                .headers_mut()
                                .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
                        }
                        Ok(response)
                    }
                    Err(err) => {
                        error!(duration_ms, error = %err, "Request failed");
                        Err(err)
                    }
                }
            }
            .instrument(span),
        )
    }
}
