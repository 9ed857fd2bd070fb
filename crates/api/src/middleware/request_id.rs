//! Time-ordered request ids for `X-Request-ID`.

use axum::http::{HeaderValue, Request};
use ohq_domain::Tid;
use tower_http::request_id::{MakeRequestId, RequestId};

/// `MakeRequestId` that mints the same time-sortable ids used everywhere
/// else, so request ids in logs sort chronologically.
#[derive(Clone, Copy, Default)]
pub struct MakeRequestTid;

impl MakeRequestId for MakeRequestTid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Tid::new().to_string())
            .ok()
            .map(RequestId::new)
    }
}
