//! Framework-neutral payment gate.
//!
//! [`PaymentInterceptor`] is the seam between HTTP plumbing and payment logic: the
//! tower layer in [`crate::layer`] asks it what to do [`before`](PaymentInterceptor::before)
//! the handler runs and lets it decorate the response [`after`](PaymentInterceptor::after).
//! [`Paygate`] is the stock implementation.
//!
//! ## Responses
//!
//! | Situation | Status | Body |
//! |---|---|---|
//! | Priced route, no `X-Payment` | 402 | fresh [`PaymentRequirement`] |
//! | Unreadable `X-Payment` | 402 | `INVALID_PAYMENT_HEADER` problem |
//! | Verification failed | 402 | problem with the failure code |
//! | Requirement expired | 410 | `PAYMENT_EXPIRED` problem |
//! | Ledger unavailable or full | 503 | problem with the ledger code |
//!
//! 402 responses carry `X-Payment-Required: true` and `Cache-Control: no-cache`.

use async_trait::async_trait;
use axum_core::body::Body;
use axum_core::response::Response;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::request::Parts;
use http::{HeaderMap, HeaderValue, StatusCode};
use percent_encoding::percent_decode_str;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use x402_types::proto::{
    PAYMENT_HEADER, PAYMENT_REQUIRED_HEADER, PAYMENT_RESPONSE_HEADER, PaymentAuthorization,
    PaymentProblem, PaymentRequirement,
};
use x402_types::util::{decode_header, encode_header};

use crate::price::PriceTag;
use crate::requirement::{RequirementBuilder, RequirementError};
use crate::verifier::{PaymentVerifier, VerificationError, VerifiedPayment};

/// What the layer should do with a request.
#[derive(Debug)]
pub enum Interception {
    /// The route is free; call the handler untouched.
    Passthrough,
    /// Payment verified; call the handler with the payment in request extensions.
    Proceed(VerifiedPayment),
    /// Answer without calling the handler.
    Respond(Response),
}

/// Payment logic invoked around a protected handler.
#[async_trait]
pub trait PaymentInterceptor: Send + Sync + 'static {
    async fn before(&self, parts: &Parts) -> Interception;

    /// Runs after a successful handler response for a paid request.
    fn after(&self, payment: &VerifiedPayment, headers: &mut HeaderMap);
}

/// Notified of payment outcomes, for example to record revenue or alert on abuse.
#[async_trait]
pub trait PaymentObserver: Send + Sync {
    async fn on_payment(&self, _payment: &VerifiedPayment) {}

    async fn on_rejection(&self, _path: &str, _problem: &PaymentProblem) {}
}

/// The form of a request path that routes are matched and requirements bound against.
///
/// Percent-escapes are decoded, `.` and `..` segments resolved, and empty segments
/// dropped, so `/api/%77eather/`, `/api//weather` and `/api/x/../weather` all become
/// `/api/weather`.
pub fn normalize_path(path: &str) -> String {
    let decoded = percent_decode_str(path).decode_utf8_lossy();
    let mut segments: Vec<&str> = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Route prices keyed by path.
///
/// Keys are exact paths (`/api/data`) or prefixes ending in `/*` (`/api/premium/*`
/// matches `/api/premium/report` but not `/api/premium`). Exact matches win, then the
/// longest matching prefix. Keys and looked-up paths both go through
/// [`normalize_path`].
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    exact: HashMap<String, PriceTag>,
    prefixes: Vec<(String, PriceTag)>,
    fallback: Option<PriceTag>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that prices every path with `tag`.
    pub fn any(tag: PriceTag) -> Self {
        Self {
            fallback: Some(tag),
            ..Self::default()
        }
    }

    pub fn with_route(mut self, pattern: impl Into<String>, tag: PriceTag) -> Self {
        self.insert(pattern, tag);
        self
    }

    pub fn insert(&mut self, pattern: impl Into<String>, tag: PriceTag) {
        let pattern = pattern.into();
        match pattern.strip_suffix('*') {
            Some(prefix) => {
                let mut prefix = match prefix.strip_suffix('/') {
                    Some(dir) => format!("{}/", normalize_path(dir)),
                    None => normalize_path(prefix),
                };
                if prefix == "//" {
                    prefix.pop();
                }
                self.prefixes.retain(|(p, _)| *p != prefix);
                self.prefixes.push((prefix, tag));
                self.prefixes
                    .sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
            }
            None => {
                self.exact.insert(normalize_path(&pattern), tag);
            }
        }
    }

    pub fn match_path(&self, path: &str) -> Option<&PriceTag> {
        let path = normalize_path(path);
        if let Some(tag) = self.exact.get(&path) {
            return Some(tag);
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, tag)| tag)
            .or(self.fallback.as_ref())
    }

    pub fn tags(&self) -> impl Iterator<Item = &PriceTag> {
        self.exact
            .values()
            .chain(self.prefixes.iter().map(|(_, tag)| tag))
            .chain(self.fallback.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.prefixes.is_empty() && self.fallback.is_none()
    }
}

/// The stock [`PaymentInterceptor`]: prices routes, issues requirements and verifies
/// payments.
#[derive(Clone)]
pub struct Paygate {
    pub builder: RequirementBuilder,
    pub verifier: PaymentVerifier,
    pub routes: Arc<RouteTable>,
    pub observer: Option<Arc<dyn PaymentObserver>>,
}

impl std::fmt::Debug for Paygate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paygate")
            .field("builder", &self.builder)
            .field("verifier", &self.verifier)
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

impl Paygate {
    async fn reject(&self, path: &str, status: StatusCode, problem: PaymentProblem) -> Interception {
        #[cfg(feature = "telemetry")]
        tracing::info!(path, code = %problem.code, status = status.as_u16(), "Payment rejected");
        if let Some(observer) = &self.observer {
            observer.on_rejection(path, &problem).await;
        }
        Interception::Respond(problem_response(status, &problem))
    }

    async fn require_payment(&self, path: &str, tag: &PriceTag) -> Interception {
        match self.builder.build(tag, Some(path)).await {
            Ok(requirement) => {
                #[cfg(feature = "telemetry")]
                tracing::debug!(path, nonce = %requirement.nonce, amount = %requirement.amount, "Issued payment requirement");
                Interception::Respond(payment_required_response(&requirement))
            }
            Err(err) => {
                let problem = requirement_problem(&err);
                self.reject(path, StatusCode::SERVICE_UNAVAILABLE, problem)
                    .await
            }
        }
    }
}

#[async_trait]
impl PaymentInterceptor for Paygate {
    #[cfg_attr(
        feature = "telemetry",
        tracing::instrument(name = "x402.paygate", skip_all, fields(path = %parts.uri.path()))
    )]
    async fn before(&self, parts: &Parts) -> Interception {
        let path = normalize_path(parts.uri.path());
        let path = path.as_str();
        let Some(tag) = self.routes.match_path(path) else {
            return Interception::Passthrough;
        };
        let Some(header) = parts.headers.get(PAYMENT_HEADER) else {
            return self.require_payment(path, tag).await;
        };
        let authorization = match decode_header::<PaymentAuthorization>(header.as_bytes()) {
            Ok(authorization) => authorization,
            Err(err) => {
                let problem = PaymentProblem::new(
                    "INVALID_PAYMENT_HEADER",
                    format!("Invalid {PAYMENT_HEADER} header: {err}"),
                );
                return self
                    .reject(path, StatusCode::PAYMENT_REQUIRED, problem)
                    .await;
            }
        };
        match self.verifier.verify_for_resource(&authorization, path).await {
            Ok(payment) => {
                #[cfg(feature = "telemetry")]
                tracing::info!(payer = %payment.payer, amount = %payment.amount, nonce = %payment.nonce, "Payment accepted");
                if let Some(observer) = &self.observer {
                    observer.on_payment(&payment).await;
                }
                Interception::Proceed(payment)
            }
            Err(err) => {
                self.reject(path, verification_status(&err), err.to_problem())
                    .await
            }
        }
    }

    fn after(&self, payment: &VerifiedPayment, headers: &mut HeaderMap) {
        match encode_header(&payment.receipt())
            .ok()
            .and_then(|receipt| HeaderValue::from_str(&receipt).ok())
        {
            Some(value) => {
                headers.insert(PAYMENT_RESPONSE_HEADER, value);
            }
            None => {
                #[cfg(feature = "telemetry")]
                tracing::warn!(nonce = %payment.nonce, "Could not encode payment receipt");
            }
        }
    }
}

/// HTTP status for a failed verification.
pub fn verification_status(err: &VerificationError) -> StatusCode {
    match err {
        VerificationError::Expired => StatusCode::GONE,
        err if err.is_internal() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::PAYMENT_REQUIRED,
    }
}

fn requirement_problem(err: &RequirementError) -> PaymentProblem {
    match err {
        RequirementError::Ledger(e) => PaymentProblem::new(e.code(), e.to_string()),
        RequirementError::PriceTag(e) => PaymentProblem::new("INVALID_PRICE", e.to_string()),
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    // Serializing these plain structs cannot fail; an empty body is the fallback.
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// `402 Payment Required` carrying `requirement` as its JSON body.
pub fn payment_required_response(requirement: &PaymentRequirement) -> Response {
    let mut response = json_response(StatusCode::PAYMENT_REQUIRED, requirement);
    let headers = response.headers_mut();
    headers.insert(PAYMENT_REQUIRED_HEADER, HeaderValue::from_static("true"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

pub fn problem_response(status: StatusCode, problem: &PaymentProblem) -> Response {
    let mut response = json_response(status, problem);
    if status == StatusCode::PAYMENT_REQUIRED {
        let headers = response.headers_mut();
        headers.insert(PAYMENT_REQUIRED_HEADER, HeaderValue::from_static("true"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    }
    response
}
