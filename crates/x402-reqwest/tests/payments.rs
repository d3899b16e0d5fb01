use alloy_primitives::{Address, U256, address};
use alloy_signer_local::PrivateKeySigner;
use reqwest::{Client, StatusCode};
use reqwest_middleware as rqm;
use serde_json::json;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use url::Url;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use x402_reqwest::{
    MaxPayment, PaymentAttempt, PaymentObserver, PaymentOutcome, ReqwestWithPayments,
    ReqwestWithPaymentsBuild, SpendingLimitError, SpendingLimits, X402Client, X402ClientError,
};
use x402_types::proto::{
    PAYMENT_HEADER, PaymentAuthorization, PaymentNonce, PaymentRequirement, Scheme, TokenExtra,
};
use x402_types::timestamp::{ManualClock, UnixTimestamp};
use x402_types::util::{MoneyAmount, decode_header};

const RECIPIENT: Address = address!("0x742d35Cc6634C0532925a3b844Bc9e7595f6E123");
const BASE_USDC: Address = address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");

fn requirement(amount: &str, chain_id: u64) -> PaymentRequirement {
    PaymentRequirement {
        amount: amount.parse().unwrap(),
        token: BASE_USDC,
        recipient: RECIPIENT,
        chain_id,
        nonce: PaymentNonce::random(),
        expires_at: UnixTimestamp::now() + 300,
        scheme: Scheme::Exact,
        min_amount: None,
        resource: Some("/data".into()),
        description: None,
        extra: TokenExtra::default(),
    }
}

fn money(s: &str) -> MoneyAmount {
    s.parse().unwrap()
}

/// Serves `requirement` to unpaid requests and `paid_status` to paid ones.
async fn provider(requirement: &PaymentRequirement, paid_status: u16, paid_calls: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header_exists(PAYMENT_HEADER))
        .respond_with(ResponseTemplate::new(paid_status).set_body_json(json!({ "data": 42 })))
        .with_priority(1)
        .expect(paid_calls)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(402).set_body_json(requirement))
        .mount(&server)
        .await;
    server
}

fn client_error(err: rqm::Error) -> X402ClientError {
    match err {
        rqm::Error::Middleware(err) => err.downcast::<X402ClientError>().unwrap(),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_free_response_passes_through() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/free"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(1)
        .mount(&server)
        .await;

    let x402 = X402Client::new(PrivateKeySigner::random());
    let http = Client::new().with_payments(x402).build();
    let response = http
        .get(format!("{}/free", server.uri()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "hello");
}

#[tokio::test]
async fn test_pays_and_retries_once() {
    let requirement = requirement("0.10", 8453);
    let server = provider(&requirement, 200, 1).await;
    let signer = PrivateKeySigner::random();
    let payer = signer.address();

    let x402 = X402Client::new(signer);
    let guard = x402.guard().clone();
    let http = Client::new().with_payments(x402).build();

    let response = http
        .get(format!("{}/data", server.uri()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(guard.status().spent_last_hour, money("0.10"));
    assert_eq!(guard.status().in_flight, MoneyAmount::ZERO);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let header = requests[1].headers.get(PAYMENT_HEADER).unwrap();
    let authorization: PaymentAuthorization = decode_header(header.as_bytes()).unwrap();
    assert_eq!(authorization.from, payer);
    assert_eq!(authorization.to, RECIPIENT);
    assert_eq!(authorization.nonce, requirement.nonce);
    assert_eq!(authorization.value.0, U256::from(100_000u64));
    assert_eq!(authorization.valid_before, requirement.expires_at);
}

#[tokio::test]
async fn test_rejected_payment_is_not_counted() {
    let requirement = requirement("0.10", 8453);
    let server = provider(&requirement, 402, 1).await;

    let x402 = X402Client::new(PrivateKeySigner::random());
    let guard = x402.guard().clone();
    let http = Client::new().with_payments(x402).build();

    let response = http
        .get(format!("{}/data", server.uri()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let status = guard.status();
    assert_eq!(status.spent_last_day, MoneyAmount::ZERO);
    assert_eq!(status.in_flight, MoneyAmount::ZERO);
}

#[tokio::test]
async fn test_blocked_domain_sends_nothing() {
    let server = MockServer::start().await;
    let x402 = X402Client::new(PrivateKeySigner::random()).block_domains(["127.0.0.1"]);
    let http = Client::new().with_payments(x402).build();

    let err = http
        .get(format!("{}/data", server.uri()))
        .send()
        .await
        .unwrap_err();
    assert!(matches!(client_error(err), X402ClientError::DomainBlocked(host) if host == "127.0.0.1"));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_domain_outside_allow_list() {
    let server = MockServer::start().await;
    let x402 = X402Client::new(PrivateKeySigner::random()).allow_domains(["*.example.com"]);
    let http = Client::new().with_payments(x402).build();

    let err = http
        .get(format!("{}/data", server.uri()))
        .send()
        .await
        .unwrap_err();
    assert!(matches!(
        client_error(err),
        X402ClientError::DomainNotAllowed(_)
    ));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_request_ceiling_overrides_default() {
    let requirement = requirement("0.10", 8453);
    let server = provider(&requirement, 200, 0).await;

    let x402 = X402Client::new(PrivateKeySigner::random()).with_max_amount(money("1"));
    let http = Client::new().with_payments(x402).build();

    let err = http
        .get(format!("{}/data", server.uri()))
        .with_extension(MaxPayment(money("0.05")))
        .send()
        .await
        .unwrap_err();
    match client_error(err) {
        X402ClientError::AmountExceedsCeiling { amount, ceiling } => {
            assert_eq!(amount, money("0.10"));
            assert_eq!(ceiling, money("0.05"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_spending_limit_stops_payment() {
    let requirement = requirement("0.10", 8453);
    let server = provider(&requirement, 200, 2).await;

    let clock = ManualClock::starting_now();
    let x402 = X402Client::new(PrivateKeySigner::random())
        .with_clock(Arc::new(clock.clone()))
        .with_limits(SpendingLimits {
            per_request: money("1"),
            per_hour: money("0.15"),
            per_day: money("10"),
        });
    let guard = x402.guard().clone();
    let http = Client::new().with_payments(x402).build();
    let url = format!("{}/data", server.uri());

    assert_eq!(http.get(&url).send().await.unwrap().status(), StatusCode::OK);

    let err = http.get(&url).send().await.unwrap_err();
    assert!(matches!(
        client_error(err),
        X402ClientError::SpendingLimitExceeded(SpendingLimitError::Hourly { .. })
    ));
    assert_eq!(guard.status().spent_last_hour, money("0.10"));

    clock.advance(3600);
    assert_eq!(http.get(&url).send().await.unwrap().status(), StatusCode::OK);
    assert_eq!(guard.status().spent_last_day, money("0.20"));
}

#[tokio::test]
async fn test_denied_approval() {
    let requirement = requirement("0.10", 8453);
    let server = provider(&requirement, 200, 0).await;

    let x402 = X402Client::new(PrivateKeySigner::random()).with_approval(
        |_: &Url, _: &PaymentRequirement, amount: MoneyAmount| amount < money("0.05"),
    );
    let guard = x402.guard().clone();
    let http = Client::new().with_payments(x402).build();

    let err = http
        .get(format!("{}/data", server.uri()))
        .send()
        .await
        .unwrap_err();
    assert!(matches!(client_error(err), X402ClientError::PaymentDenied(_)));
    assert_eq!(guard.status().in_flight, MoneyAmount::ZERO);
}

#[tokio::test]
async fn test_unknown_chain_is_refused() {
    let requirement = requirement("0.10", 31337);
    let server = provider(&requirement, 200, 0).await;

    let x402 = X402Client::new(PrivateKeySigner::random());
    let http = Client::new().with_payments(x402).build();
    let err = http
        .get(format!("{}/data", server.uri()))
        .send()
        .await
        .unwrap_err();
    assert!(matches!(
        client_error(err),
        X402ClientError::ChainNotAllowed(31337)
    ));
}

#[tokio::test]
async fn test_garbage_requirement() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(402).set_body_string("pay me"))
        .mount(&server)
        .await;

    let x402 = X402Client::new(PrivateKeySigner::random());
    let http = Client::new().with_payments(x402).build();
    let err = http.get(server.uri()).send().await.unwrap_err();
    assert!(matches!(
        client_error(err),
        X402ClientError::InvalidPaymentRequirement(_)
    ));
}

#[derive(Default)]
struct PaymentLog {
    payments: Mutex<Vec<(String, Address, MoneyAmount, PaymentOutcome)>>,
    refusals: Mutex<Vec<String>>,
}

#[async_trait]
impl PaymentObserver for PaymentLog {
    async fn on_payment(&self, attempt: &PaymentAttempt, outcome: PaymentOutcome) {
        self.payments.lock().unwrap().push((
            attempt.url.path().to_string(),
            attempt.payer,
            attempt.amount,
            outcome,
        ));
    }

    async fn on_refusal(&self, _url: &Url, error: &X402ClientError) {
        self.refusals.lock().unwrap().push(error.to_string());
    }
}

#[tokio::test]
async fn test_observer_sees_every_outcome() {
    let accepting = provider(&requirement("0.10", 8453), 200, 1).await;
    let rejecting = provider(&requirement("0.20", 8453), 402, 1).await;
    let log = Arc::new(PaymentLog::default());
    let signer = PrivateKeySigner::random();
    let payer = signer.address();

    let x402 = X402Client::new(signer).with_observer(log.clone());
    let http = Client::new().with_payments(x402).build();

    let response = http
        .get(format!("{}/data", accepting.uri()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = http
        .get(format!("{}/data", rejecting.uri()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    http.get(format!("{}/data", accepting.uri()))
        .with_extension(MaxPayment(money("0.05")))
        .send()
        .await
        .unwrap_err();

    let payments = log.payments.lock().unwrap().clone();
    assert_eq!(
        payments,
        vec![
            ("/data".to_string(), payer, money("0.10"), PaymentOutcome::Accepted),
            (
                "/data".to_string(),
                payer,
                money("0.20"),
                PaymentOutcome::Rejected(StatusCode::PAYMENT_REQUIRED)
            ),
        ]
    );
    let refusals = log.refusals.lock().unwrap().clone();
    assert_eq!(refusals.len(), 1);
    assert!(refusals[0].contains("0.05"), "{}", refusals[0]);
}

#[tokio::test]
async fn test_observer_sees_blocked_domain() {
    let server = MockServer::start().await;
    let log = Arc::new(PaymentLog::default());
    let x402 = X402Client::new(PrivateKeySigner::random())
        .block_domains(["127.0.0.1"])
        .with_observer(log.clone());
    let http = Client::new().with_payments(x402).build();

    http.get(format!("{}/data", server.uri()))
        .send()
        .await
        .unwrap_err();
    assert!(log.payments.lock().unwrap().is_empty());
    assert_eq!(log.refusals.lock().unwrap().len(), 1);
}
