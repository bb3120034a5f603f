use crate::error::AppError;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::{ready, Ready};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

pub const API_KEY_HEADER: &str = "X-API-Key";

/// Rejects requests whose `X-API-Key` header does not match the configured key.
#[derive(Clone)]
pub struct ApiKeyAuth {
    expected: Arc<str>,
}

impl ApiKeyAuth {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            expected: Arc::from(api_key.into()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = ApiKeyAuthService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyAuthService {
            service: Rc::new(service),
            expected: self.expected.clone(),
        }))
    }
}

pub struct ApiKeyAuthService<S> {
    service: Rc<S>,
    expected: Arc<str>,
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let authorized = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|h| h.to_str().ok())
            .is_some_and(|key| !key.is_empty() && key == &*self.expected);

        Box::pin(async move {
            if !authorized {
                tracing::warn!(path = %req.path(), "Rejected request with invalid API key");
                return Err(AppError::Unauthorized("Invalid API key".into()).into());
            }
            service.call(req).await
        })
    }
}
