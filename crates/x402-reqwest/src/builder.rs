//! Attaching [`X402Client`] to a reqwest client.

use reqwest::{Client, ClientBuilder};
use reqwest_middleware as rqm;

use crate::client::X402Client;

/// Adds `.with_payments(..)` to [`Client`] and [`ClientBuilder`].
///
/// ```rust,no_run
/// use alloy_signer_local::PrivateKeySigner;
/// use reqwest::Client;
/// use x402_reqwest::{ReqwestWithPayments, ReqwestWithPaymentsBuild, X402Client};
///
/// let http = Client::new()
///     .with_payments(X402Client::new(PrivateKeySigner::random()))
///     .build();
/// ```
pub trait ReqwestWithPayments<A, S> {
    fn with_payments(self, x402_client: X402Client<S>) -> ReqwestWithPaymentsBuilder<A, S>;
}

impl<S> ReqwestWithPayments<Client, S> for Client {
    fn with_payments(self, x402_client: X402Client<S>) -> ReqwestWithPaymentsBuilder<Client, S> {
        ReqwestWithPaymentsBuilder::new(self, x402_client)
    }
}

impl<S> ReqwestWithPayments<ClientBuilder, S> for ClientBuilder {
    fn with_payments(
        self,
        x402_client: X402Client<S>,
    ) -> ReqwestWithPaymentsBuilder<ClientBuilder, S> {
        ReqwestWithPaymentsBuilder::new(self, x402_client)
    }
}

/// A reqwest client (or its builder) paired with the payment middleware.
#[derive(Debug)]
pub struct ReqwestWithPaymentsBuilder<A, S> {
    inner: A,
    x402_client: X402Client<S>,
}

impl<A, S> ReqwestWithPaymentsBuilder<A, S> {
    fn new(inner: A, x402_client: X402Client<S>) -> Self {
        Self { inner, x402_client }
    }
}

/// Finishes a [`ReqwestWithPaymentsBuilder`].
///
/// `builder()` returns the middleware client builder so more middleware can be stacked
/// after the payment layer; `build()` finishes it directly.
pub trait ReqwestWithPaymentsBuild {
    type BuildResult;
    type BuilderResult;

    fn build(self) -> Self::BuildResult;
    fn builder(self) -> Self::BuilderResult;
}

impl<S> ReqwestWithPaymentsBuild for ReqwestWithPaymentsBuilder<Client, S>
where
    X402Client<S>: rqm::Middleware,
{
    type BuildResult = rqm::ClientWithMiddleware;
    type BuilderResult = rqm::ClientBuilder;

    fn build(self) -> Self::BuildResult {
        self.builder().build()
    }

    fn builder(self) -> Self::BuilderResult {
        rqm::ClientBuilder::new(self.inner).with(self.x402_client)
    }
}

impl<S> ReqwestWithPaymentsBuild for ReqwestWithPaymentsBuilder<ClientBuilder, S>
where
    X402Client<S>: rqm::Middleware,
{
    type BuildResult = Result<rqm::ClientWithMiddleware, reqwest::Error>;
    type BuilderResult = Result<rqm::ClientBuilder, reqwest::Error>;

    fn build(self) -> Self::BuildResult {
        Ok(self.builder()?.build())
    }

    fn builder(self) -> Self::BuilderResult {
        let client = self.inner.build()?;
        Ok(rqm::ClientBuilder::new(client).with(self.x402_client))
    }
}
