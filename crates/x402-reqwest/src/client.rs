//! Client-side x402 payment handling for reqwest.
//!
//! This module provides the [`X402Client`] middleware, which answers `402 Payment
//! Required` by signing the provider's requirement and retrying the request once.

use alloy_primitives::Address;
use async_trait::async_trait;
use http::{Extensions, HeaderValue, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware as rqm;
use rust_decimal::RoundingStrategy;
use std::sync::Arc;
use url::Url;
use x402_chain_eip155::{SignerLike, SigningError, is_known_chain, sign_typed_data};
use x402_types::proto::{PAYMENT_HEADER, PaymentRequirement, Scheme};
use x402_types::timestamp::Clock;
use x402_types::util::{MoneyAmount, encode_header};

use crate::domains::{DomainError, DomainPolicy};
use crate::guard::{Reservation, SpendingGuard, SpendingLimitError, SpendingLimits, SpendingStatus};

#[cfg(feature = "telemetry")]
use tracing::{debug, info, instrument, trace, warn};

/// Per-request payment ceiling, set as a request extension.
///
/// Overrides [`X402Client::with_max_amount`] for one request:
///
/// ```rust,ignore
/// let response = http_client
///     .get("https://api.example.com/report")
///     .with_extension(MaxPayment("0.25".parse()?))
///     .send()
///     .await?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxPayment(pub MoneyAmount);

/// Last word on a payment that passed every limit.
#[async_trait]
pub trait PaymentApproval: Send + Sync {
    async fn approve(&self, url: &Url, requirement: &PaymentRequirement, amount: MoneyAmount)
    -> bool;
}

/// Approves every payment. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl PaymentApproval for AutoApprove {
    async fn approve(&self, _: &Url, _: &PaymentRequirement, _: MoneyAmount) -> bool {
        true
    }
}

#[async_trait]
impl<F> PaymentApproval for F
where
    F: Fn(&Url, &PaymentRequirement, MoneyAmount) -> bool + Send + Sync,
{
    async fn approve(
        &self,
        url: &Url,
        requirement: &PaymentRequirement,
        amount: MoneyAmount,
    ) -> bool {
        self(url, requirement, amount)
    }
}

/// A signed payment that was sent to a provider.
#[derive(Debug, Clone)]
pub struct PaymentAttempt {
    pub url: Url,
    pub payer: Address,
    pub amount: MoneyAmount,
    pub requirement: PaymentRequirement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The provider answered the paid retry with a 2xx; the spend is recorded.
    Accepted,
    /// The provider answered the paid retry with this status; nothing is recorded.
    Rejected(StatusCode),
    /// The paid retry got no response.
    Failed,
}

/// Notified of payment outcomes, for example to keep an audit log or call a webhook.
#[async_trait]
pub trait PaymentObserver: Send + Sync {
    /// Runs once per signed payment, after the provider answered (or did not).
    async fn on_payment(&self, _attempt: &PaymentAttempt, _outcome: PaymentOutcome) {}

    /// Runs when the client refuses a request or a payment without signing anything.
    async fn on_refusal(&self, _url: &Url, _error: &X402ClientError) {}
}

/// Output of [`X402Client::make_payment`].
#[derive(Debug)]
pub struct PreparedPayment {
    /// The original request with the `X-Payment` header added.
    pub request: Request,
    /// Holds the amount against the spending limits until committed or dropped.
    pub reservation: Reservation,
    pub attempt: PaymentAttempt,
}

/// Errors that stop the client from paying.
///
/// Every variant is raised before the payment header leaves the process, so an error
/// means nothing was paid.
#[derive(Debug, thiserror::Error)]
pub enum X402ClientError {
    #[error("Domain {0} is not in the allowed list")]
    DomainNotAllowed(String),
    #[error("Domain {0} is blocked")]
    DomainBlocked(String),
    /// The 402 body is not a payment requirement this client understands.
    #[error("Invalid payment requirement: {0}")]
    InvalidPaymentRequirement(String),
    #[error("Payments on chain {0} are not allowed")]
    ChainNotAllowed(u64),
    /// The provider asks for more than the caller is willing to pay for this request.
    #[error("Required amount {amount} exceeds the ceiling of {ceiling}")]
    AmountExceedsCeiling {
        amount: MoneyAmount,
        ceiling: MoneyAmount,
    },
    #[error(transparent)]
    SpendingLimitExceeded(#[from] SpendingLimitError),
    #[error("Payment to {0} was denied")]
    PaymentDenied(String),
    #[error(transparent)]
    Signing(#[from] SigningError),
    /// Indicates that the original request could not be cloned for retrying with a payment header.
    /// This typically happens when the request body is a stream or otherwise non-reusable.
    #[error("Request object is not cloneable. Are you passing a streaming body?")]
    RequestNotCloneable,
    #[error("Failed to encode payment header: {0}")]
    HeaderEncode(String),
}

impl From<DomainError> for X402ClientError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::NotAllowed(host) => X402ClientError::DomainNotAllowed(host),
            DomainError::Blocked(host) => X402ClientError::DomainBlocked(host),
        }
    }
}

impl From<X402ClientError> for rqm::Error {
    fn from(error: X402ClientError) -> Self {
        rqm::Error::Middleware(error.into())
    }
}

/// Reqwest middleware that pays x402 requirements on behalf of an agent.
///
/// ## Creating an X402Client
///
/// ```rust,no_run
/// use alloy_signer_local::PrivateKeySigner;
/// use x402_reqwest::{SpendingLimits, X402Client};
///
/// let signer = PrivateKeySigner::random();
/// let client = X402Client::new(signer)
///     .with_limits(SpendingLimits {
///         per_request: "0.50".parse().unwrap(),
///         per_hour: "5".parse().unwrap(),
///         per_day: "50".parse().unwrap(),
///     })
///     .allow_domains(["api.example.com", "*.data.example.com"]);
/// ```
///
/// ## Flow
///
/// 1. The request URL is checked against the domain policy before anything is sent.
/// 2. Responses other than 402 are returned untouched.
/// 3. The requirement's chain, the amount ceiling, the spending limits and the
///    [`PaymentApproval`] hook are consulted, in that order.
/// 4. The requirement is signed and the request is retried once with `X-Payment`.
/// 5. If the provider accepts, the spend is recorded. Otherwise the retry's response is
///    returned as is and nothing counts against the limits.
///
/// See the [`ReqwestWithPayments`](crate::ReqwestWithPayments) trait for integrating with reqwest.
pub struct X402Client<S> {
    signer: S,
    guard: SpendingGuard,
    max_amount: Option<MoneyAmount>,
    domains: DomainPolicy,
    approval: Arc<dyn PaymentApproval>,
    allowed_chains: Option<Vec<u64>>,
    observer: Option<Arc<dyn PaymentObserver>>,
}

impl<S> std::fmt::Debug for X402Client<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X402Client")
            .field("guard", &self.guard)
            .field("max_amount", &self.max_amount)
            .field("domains", &self.domains)
            .field("allowed_chains", &self.allowed_chains)
            .finish_non_exhaustive()
    }
}

impl<S> X402Client<S> {
    /// Creates a client with default [`SpendingLimits`], no domain restrictions, the
    /// chains from [`KNOWN_NETWORKS`](x402_chain_eip155::KNOWN_NETWORKS) and
    /// automatic approval.
    pub fn new(signer: S) -> Self {
        Self {
            signer,
            guard: SpendingGuard::default(),
            max_amount: None,
            domains: DomainPolicy::default(),
            approval: Arc::new(AutoApprove),
            allowed_chains: None,
            observer: None,
        }
    }

    /// Replaces the spending limits. Spend recorded so far is forgotten.
    pub fn with_limits(mut self, limits: SpendingLimits) -> Self {
        self.guard = SpendingGuard::with_clock(limits, self.guard.clock());
        self
    }

    /// Reads time from `clock` for the spending windows. Spend recorded so far is forgotten.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.guard = SpendingGuard::with_clock(*self.guard.limits(), clock);
        self
    }

    /// Shares `guard` with other clients, so they draw from the same budget.
    pub fn with_guard(mut self, guard: SpendingGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Ceiling for requests without a [`MaxPayment`] extension.
    pub fn with_max_amount(mut self, amount: MoneyAmount) -> Self {
        self.max_amount = Some(amount);
        self
    }

    pub fn allow_domains<P: AsRef<str>>(mut self, patterns: impl IntoIterator<Item = P>) -> Self {
        self.domains = self.domains.allow(patterns);
        self
    }

    pub fn block_domains<P: AsRef<str>>(mut self, patterns: impl IntoIterator<Item = P>) -> Self {
        self.domains = self.domains.block(patterns);
        self
    }

    pub fn with_approval<A: PaymentApproval + 'static>(mut self, approval: A) -> Self {
        self.approval = Arc::new(approval);
        self
    }

    /// Pays only on these chains, known or not.
    pub fn with_allowed_chains(mut self, chains: impl IntoIterator<Item = u64>) -> Self {
        self.allowed_chains = Some(chains.into_iter().collect());
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn PaymentObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn guard(&self) -> &SpendingGuard {
        &self.guard
    }

    pub fn spending_status(&self) -> SpendingStatus {
        self.guard.status()
    }

    async fn refused(&self, url: &Url, error: X402ClientError) -> rqm::Error {
        if let Some(observer) = &self.observer {
            observer.on_refusal(url, &error).await;
        }
        error.into()
    }

    async fn settled(&self, attempt: &PaymentAttempt, outcome: PaymentOutcome) {
        if let Some(observer) = &self.observer {
            observer.on_payment(attempt, outcome).await;
        }
    }

    fn chain_allowed(&self, chain_id: u64) -> bool {
        match &self.allowed_chains {
            Some(chains) => chains.contains(&chain_id),
            None => is_known_chain(chain_id),
        }
    }
}

impl<S: SignerLike> X402Client<S> {
    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

impl<S> X402Client<S>
where
    S: SignerLike + Send + Sync,
{
    /// Turns a 402 response into the signed retry request.
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.reqwest.pay", skip_all, err, fields(url = %url)))]
    pub async fn make_payment(
        &self,
        url: &Url,
        response: Response,
        retry: Option<Request>,
        ceiling: Option<MoneyAmount>,
    ) -> Result<PreparedPayment, X402ClientError> {
        let requirement = parse_payment_required(response).await?;
        if !self.chain_allowed(requirement.chain_id) {
            return Err(X402ClientError::ChainNotAllowed(requirement.chain_id));
        }
        let amount = payable_amount(&requirement, ceiling)?;
        let value = amount
            .to_token_units(requirement.extra.decimals.into())
            .map_err(|e| X402ClientError::InvalidPaymentRequirement(e.to_string()))?;
        let mut retry = retry.ok_or(X402ClientError::RequestNotCloneable)?;

        let reservation = self.guard.reserve(amount)?;
        if !self.approval.approve(url, &requirement, amount).await {
            return Err(X402ClientError::PaymentDenied(url.to_string()));
        }

        #[cfg(feature = "telemetry")]
        debug!(amount = %amount, chain_id = requirement.chain_id, nonce = %requirement.nonce, "Signing payment");

        let authorization = sign_typed_data(&self.signer, &requirement, value).await?;
        let header = encode_header(&authorization)
            .map_err(|e| X402ClientError::HeaderEncode(e.to_string()))?;
        let header = HeaderValue::from_str(&header)
            .map_err(|e| X402ClientError::HeaderEncode(e.to_string()))?;
        retry.headers_mut().insert(PAYMENT_HEADER, header);
        Ok(PreparedPayment {
            request: retry,
            reservation,
            attempt: PaymentAttempt {
                url: url.clone(),
                payer: authorization.from,
                amount,
                requirement,
            },
        })
    }
}

#[async_trait]
impl<S> rqm::Middleware for X402Client<S>
where
    S: SignerLike + Send + Sync + 'static,
{
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.reqwest.handle", skip_all, err))]
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: rqm::Next<'_>,
    ) -> rqm::Result<Response> {
        let url = req.url().clone();
        if let Err(err) = self.domains.check(&url) {
            return Err(self.refused(&url, err.into()).await);
        }

        let retry_req = req.try_clone();
        let res = next.clone().run(req, extensions).await?;

        if res.status() != StatusCode::PAYMENT_REQUIRED {
            #[cfg(feature = "telemetry")]
            trace!(status = ?res.status(), "No payment required, returning response");
            return Ok(res);
        }

        #[cfg(feature = "telemetry")]
        info!(url = %url, "Received 402 Payment Required, processing payment");

        let ceiling = extensions
            .get::<MaxPayment>()
            .map(|max| max.0)
            .or(self.max_amount);
        let PreparedPayment {
            request,
            reservation,
            attempt,
        } = match self.make_payment(&url, res, retry_req, ceiling).await {
            Ok(prepared) => prepared,
            Err(err) => return Err(self.refused(&url, err).await),
        };

        let response = match next.run(request, extensions).await {
            Ok(response) => response,
            Err(err) => {
                drop(reservation);
                self.settled(&attempt, PaymentOutcome::Failed).await;
                return Err(err);
            }
        };
        let outcome = if response.status().is_success() {
            #[cfg(feature = "telemetry")]
            info!(amount = %reservation.amount(), "Payment accepted");
            reservation.commit();
            PaymentOutcome::Accepted
        } else {
            #[cfg(feature = "telemetry")]
            warn!(status = %response.status(), "Provider rejected payment");
            drop(reservation);
            PaymentOutcome::Rejected(response.status())
        };
        self.settled(&attempt, outcome).await;
        Ok(response)
    }
}

/// Reads the requirement from a 402 response body.
pub async fn parse_payment_required(
    response: Response,
) -> Result<PaymentRequirement, X402ClientError> {
    let body = response
        .bytes()
        .await
        .map_err(|e| X402ClientError::InvalidPaymentRequirement(e.to_string()))?;
    serde_json::from_slice(&body).map_err(|e| X402ClientError::InvalidPaymentRequirement(e.to_string()))
}

/// What to sign for `requirement` under `ceiling`.
///
/// Exact requirements are paid in full or not at all. Upto requirements above the
/// ceiling are paid at the ceiling, truncated to the token's precision, as long as that
/// still meets `minAmount`.
fn payable_amount(
    requirement: &PaymentRequirement,
    ceiling: Option<MoneyAmount>,
) -> Result<MoneyAmount, X402ClientError> {
    let Some(ceiling) = ceiling else {
        return Ok(requirement.amount);
    };
    if requirement.amount <= ceiling {
        return Ok(requirement.amount);
    }
    if requirement.scheme == Scheme::Upto {
        let capped = MoneyAmount(
            ceiling
                .0
                .round_dp_with_strategy(requirement.extra.decimals.into(), RoundingStrategy::ToZero),
        );
        let floor = requirement.min_amount.unwrap_or(MoneyAmount::ZERO);
        if !capped.is_zero() && capped >= floor {
            return Ok(capped);
        }
    }
    Err(X402ClientError::AmountExceedsCeiling {
        amount: requirement.amount,
        ceiling,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use x402_types::proto::{PaymentNonce, TokenExtra};
    use x402_types::timestamp::UnixTimestamp;

    fn requirement(amount: &str, scheme: Scheme, min_amount: Option<&str>) -> PaymentRequirement {
        PaymentRequirement {
            amount: amount.parse().unwrap(),
            token: address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
            recipient: address!("0x742d35Cc6634C0532925a3b844Bc9e7595f6E123"),
            chain_id: 8453,
            nonce: PaymentNonce::random(),
            expires_at: UnixTimestamp::from_secs(1_704_067_500),
            scheme,
            min_amount: min_amount.map(|m| m.parse().unwrap()),
            resource: None,
            description: None,
            extra: TokenExtra::default(),
        }
    }

    fn money(s: &str) -> MoneyAmount {
        s.parse().unwrap()
    }

    #[test]
    fn test_exact_within_ceiling() {
        let req = requirement("0.10", Scheme::Exact, None);
        assert_eq!(payable_amount(&req, None).unwrap(), money("0.10"));
        assert_eq!(payable_amount(&req, Some(money("0.10"))).unwrap(), money("0.10"));
    }

    #[test]
    fn test_exact_above_ceiling_is_refused() {
        let req = requirement("0.10", Scheme::Exact, None);
        let err = payable_amount(&req, Some(money("0.09"))).unwrap_err();
        assert!(matches!(
            err,
            X402ClientError::AmountExceedsCeiling { amount, ceiling }
                if amount == money("0.10") && ceiling == money("0.09")
        ));
    }

    #[test]
    fn test_upto_is_capped_at_ceiling() {
        let req = requirement("1", Scheme::Upto, Some("0.25"));
        assert_eq!(payable_amount(&req, Some(money("0.5"))).unwrap(), money("0.5"));
        // Truncated to 0.123456, below minAmount.
        assert!(payable_amount(&req, Some(money("0.123456789"))).is_err());
        assert_eq!(
            payable_amount(&req, Some(money("0.300000009"))).unwrap(),
            money("0.3")
        );
    }

    #[test]
    fn test_domain_errors_map_to_client_errors() {
        assert!(matches!(
            X402ClientError::from(DomainError::Blocked("x.io".into())),
            X402ClientError::DomainBlocked(host) if host == "x.io"
        ));
        assert!(matches!(
            X402ClientError::from(DomainError::NotAllowed("y.io".into())),
            X402ClientError::DomainNotAllowed(host) if host == "y.io"
        ));
    }

    #[test]
    fn test_chain_policy() {
        let client = X402Client::new(());
        assert!(client.chain_allowed(8453));
        assert!(!client.chain_allowed(31337));

        let client = client.with_allowed_chains([31337]);
        assert!(client.chain_allowed(31337));
        assert!(!client.chain_allowed(8453));
    }
}
