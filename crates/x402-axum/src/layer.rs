//! Axum middleware for selling routes for [x402](https://www.x402.org) payments.
//!
//! Unpaid requests to a priced route get `402 Payment Required` with a fresh
//! requirement. Requests carrying a valid `X-Payment` authorization reach the handler
//! with a [`VerifiedPayment`] in their extensions, and the response gets an
//! `X-Payment-Response` receipt.
//!
//! ## Example Usage
//!
//! ```rust
//! use alloy_primitives::address;
//! use axum::{Extension, Router, routing::get};
//! use x402_axum::{PriceTag, RouteTable, VerifiedPayment, X402Middleware};
//!
//! let x402 = X402Middleware::new(address!("0x742d35Cc6634C0532925a3b844Bc9e7595f6E123"), 8453);
//!
//! // One route at a time
//! let app: Router = Router::new().route(
//!     "/api/data",
//!     get(my_handler).layer(x402.with_price_tag("$0.10".parse().unwrap()).unwrap()),
//! );
//!
//! // Or the whole router from a table
//! let routes = RouteTable::new().with_route("/api/premium/*", "$0.50".parse().unwrap());
//! let app: Router = Router::new()
//!     .route("/api/premium/report", get(my_handler))
//!     .layer(x402.with_routes(routes).unwrap());
//!
//! async fn my_handler(Extension(payment): Extension<VerifiedPayment>) -> String {
//!     format!("paid {} by {}", payment.amount, payment.payer)
//! }
//! ```
//!
//! ## Configuration Notes
//!
//! - Without [`X402Middleware::with_accepted_token`], USDC of the configured chain is accepted.
//! - Without [`X402Middleware::with_ledger`], each middleware instance owns an in-memory
//!   ledger; layers built from the same instance (or its clones) share it.
//! - Price tags are validated when the layer is built, so a misconfigured price fails at
//!   startup instead of on the first request.

use alloy_primitives::Address;
use axum_core::extract::Request;
use axum_core::response::Response;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use x402_types::timestamp::{Clock, SystemClock};

use crate::ledger::{InMemoryNonceLedger, NonceLedger};
use crate::paygate::{Interception, Paygate, PaymentInterceptor, PaymentObserver, RouteTable};
use crate::price::{AcceptedToken, PriceTag, PriceTagError};
use crate::requirement::{DEFAULT_REQUIREMENT_TTL, RequirementBuilder};
use crate::verifier::{PaymentValidator, PaymentVerifier};

#[cfg(feature = "telemetry")]
use tracing::Instrument;

/// The main X402 middleware instance for enforcing x402 payments on routes.
///
/// Create a single instance per application and use it to build payment layers
/// for protected routes.
#[derive(Clone)]
pub struct X402Middleware {
    recipient: Address,
    chain_id: u64,
    accepted_tokens: Vec<AcceptedToken>,
    custom_tokens: bool,
    ledger: Arc<dyn NonceLedger>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    validator: Option<Arc<dyn PaymentValidator>>,
    observer: Option<Arc<dyn PaymentObserver>>,
}

impl std::fmt::Debug for X402Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X402Middleware")
            .field("recipient", &self.recipient)
            .field("chain_id", &self.chain_id)
            .field("accepted_tokens", &self.accepted_tokens)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl X402Middleware {
    /// Creates a middleware paying `recipient` on `chain_id`.
    pub fn new(recipient: Address, chain_id: u64) -> Self {
        let accepted_tokens = x402_chain_eip155::usdc_on(chain_id)
            .map(AcceptedToken::from)
            .into_iter()
            .collect();
        Self {
            recipient,
            chain_id,
            accepted_tokens,
            custom_tokens: false,
            ledger: Arc::new(InMemoryNonceLedger::default()),
            clock: Arc::new(SystemClock),
            ttl: DEFAULT_REQUIREMENT_TTL,
            validator: None,
            observer: None,
        }
    }

    pub fn recipient(&self) -> Address {
        self.recipient
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn accepted_tokens(&self) -> &[AcceptedToken] {
        &self.accepted_tokens
    }

    /// Accepts payment in `token`.
    ///
    /// The first call replaces the chain's default USDC; later calls add tokens. A price
    /// tag without an explicit token is paid in the first accepted token.
    pub fn with_accepted_token(&self, token: AcceptedToken) -> Self {
        let mut this = self.clone();
        if !this.custom_tokens {
            this.accepted_tokens.clear();
            this.custom_tokens = true;
        }
        if !this.accepted_tokens.contains(&token) {
            this.accepted_tokens.push(token);
        }
        this
    }

    pub fn with_ledger(&self, ledger: Arc<dyn NonceLedger>) -> Self {
        let mut this = self.clone();
        this.ledger = ledger;
        this
    }

    pub fn with_clock(&self, clock: Arc<dyn Clock>) -> Self {
        let mut this = self.clone();
        this.clock = clock;
        this
    }

    /// How long issued requirements stay payable. Default is 300 seconds.
    pub fn with_ttl(&self, ttl: Duration) -> Self {
        let mut this = self.clone();
        this.ttl = ttl;
        this
    }

    pub fn with_validator(&self, validator: Arc<dyn PaymentValidator>) -> Self {
        let mut this = self.clone();
        this.validator = Some(validator);
        this
    }

    pub fn with_observer(&self, observer: Arc<dyn PaymentObserver>) -> Self {
        let mut this = self.clone();
        this.observer = Some(observer);
        this
    }

    /// Layer pricing every request it wraps with `tag`.
    pub fn with_price_tag(&self, tag: PriceTag) -> Result<X402Layer<Paygate>, PriceTagError> {
        self.with_routes(RouteTable::any(tag))
    }

    /// Layer pricing requests by path. Paths not in `routes` pass through for free.
    pub fn with_routes(&self, routes: RouteTable) -> Result<X402Layer<Paygate>, PriceTagError> {
        let builder = self.requirement_builder();
        builder.check_ttl()?;
        for tag in routes.tags() {
            builder.validate(tag)?;
        }
        Ok(X402Layer::new(self.paygate(builder, routes)))
    }

    fn requirement_builder(&self) -> RequirementBuilder {
        RequirementBuilder::new(
            self.recipient,
            self.chain_id,
            self.accepted_tokens.clone(),
            self.ledger.clone(),
            self.clock.clone(),
        )
        .with_ttl(self.ttl)
    }

    fn paygate(&self, builder: RequirementBuilder, routes: RouteTable) -> Paygate {
        let mut verifier = PaymentVerifier::new(self.ledger.clone(), self.clock.clone());
        if let Some(validator) = &self.validator {
            verifier = verifier.with_validator(validator.clone());
        }
        Paygate {
            builder,
            verifier,
            routes: Arc::new(routes),
            observer: self.observer.clone(),
        }
    }
}

/// Tower layer running a [`PaymentInterceptor`] around the wrapped service.
pub struct X402Layer<I> {
    interceptor: Arc<I>,
}

impl<I> Clone for X402Layer<I> {
    fn clone(&self) -> Self {
        Self {
            interceptor: self.interceptor.clone(),
        }
    }
}

impl<I> X402Layer<I> {
    /// Wraps a custom interceptor; [`X402Middleware`] builds one around [`Paygate`].
    pub fn new(interceptor: I) -> Self {
        Self {
            interceptor: Arc::new(interceptor),
        }
    }

    pub fn interceptor(&self) -> &I {
        &self.interceptor
    }
}

impl<S, I> Layer<S> for X402Layer<I>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    I: PaymentInterceptor,
{
    type Service = X402MiddlewareService<I>;

    fn layer(&self, inner: S) -> Self::Service {
        X402MiddlewareService {
            interceptor: self.interceptor.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// Axum service that enforces x402 payments on incoming requests.
pub struct X402MiddlewareService<I> {
    interceptor: Arc<I>,
    /// The inner Axum service being wrapped
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<I> Clone for X402MiddlewareService<I> {
    fn clone(&self) -> Self {
        Self {
            interceptor: self.interceptor.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<I> Service<Request> for X402MiddlewareService<I>
where
    I: PaymentInterceptor,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    /// Delegates readiness polling to the wrapped inner service.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // Take the service that was polled ready, leave a fresh clone behind.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = self.interceptor.clone();
        Box::pin(async move { Ok(handle_request(interceptor, inner, req).await) })
    }
}

async fn handle_request<I: PaymentInterceptor>(
    interceptor: Arc<I>,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
    req: Request,
) -> Response {
    let (parts, body) = req.into_parts();
    match interceptor.before(&parts).await {
        Interception::Passthrough => call_inner(inner, Request::from_parts(parts, body)).await,
        Interception::Respond(response) => response,
        Interception::Proceed(payment) => {
            let mut req = Request::from_parts(parts, body);
            req.extensions_mut().insert(payment.clone());
            let mut response = call_inner(inner, req).await;
            if response.status().is_success() {
                interceptor.after(&payment, response.headers_mut());
            }
            response
        }
    }
}

/// Calls the inner service with proper telemetry instrumentation.
async fn call_inner(
    mut inner: BoxCloneSyncService<Request, Response, Infallible>,
    req: Request,
) -> Response {
    #[cfg(feature = "telemetry")]
    let result = inner
        .call(req)
        .instrument(tracing::info_span!("inner"))
        .await;
    #[cfg(not(feature = "telemetry"))]
    let result = inner.call(req).await;
    match result {
        Ok(response) => response,
        Err(never) => match never {},
    }
}
