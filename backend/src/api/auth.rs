use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use actix_web::{FromRequest, HttpRequest, dev::Payload, web};

use crate::error::GatewayError;
use crate::gateway::{Gateway, RequestContext};
use crate::services::auth::bearer_token;

/// Optional per-request deadline, in milliseconds.
pub const TIMEOUT_HEADER: &str = "X-Request-Timeout-Ms";

/// An authenticated caller with its grant resolved for this request.
pub struct Caller(pub RequestContext);

impl FromRequest for Caller {
    type Error = GatewayError;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let gateway = req.app_data::<web::Data<Gateway>>().cloned();
        let token = read_token(req);
        let timeout = read_timeout(req);

        Box::pin(async move {
            let gateway = gateway
                .ok_or_else(|| GatewayError::Internal("gateway is not configured".to_string()))?;
            let ctx = gateway.authorize(&token?, timeout?).await?;
            Ok(Caller(ctx))
        })
    }
}

fn read_token(req: &HttpRequest) -> Result<String, GatewayError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .ok_or_else(|| GatewayError::Unauthorized("No Auth header".to_string()))?;

    let value = auth_header
        .to_str()
        .map_err(|_| GatewayError::Unauthorized("Invalid Auth header".to_string()))?;

    bearer_token(value).map(str::to_string)
}

fn read_timeout(req: &HttpRequest) -> Result<Option<Duration>, GatewayError> {
    let header = match req.headers().get(TIMEOUT_HEADER) {
        Some(h) => h,
        None => return Ok(None),
    };

    header
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|ms| Some(Duration::from_millis(ms)))
        .ok_or_else(|| GatewayError::invalid(TIMEOUT_HEADER, "must be a whole number of milliseconds"))
}
