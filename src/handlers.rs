//! HTTP endpoints of the paywall server.
//!
//! - `GET /health` – liveness check, never priced
//! - `GET /pricing` – the configured price list
//! - `GET|POST /api/{*path}` – sample resource; routes listed in the config require payment
//!
//! Handlers on `/api` see the verified payment as an `Extension<VerifiedPayment>` when the
//! route is priced.

use alloy_primitives::Address;
use axum::extract::Path;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::Serialize;
use serde_json::json;
use tracing::instrument;
use x402_axum::PriceTagError;
use x402_axum::VerifiedPayment;
use x402_types::proto::Scheme;
use x402_types::util::MoneyAmount;

use crate::config::Config;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct PricingEntry {
    route: String,
    amount: MoneyAmount,
    scheme: Scheme,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_amount: Option<MoneyAmount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Pricing {
    recipient: Address,
    chain_id: u64,
    routes: Vec<PricingEntry>,
}

impl From<&Config> for Pricing {
    fn from(config: &Config) -> Self {
        let routes = config
            .routes()
            .iter()
            .map(|(route, price)| {
                let tag = price.price_tag();
                PricingEntry {
                    route: route.clone(),
                    amount: tag.amount,
                    scheme: tag.scheme,
                    min_amount: tag.min_amount,
                    token: tag.token,
                    description: tag.description,
                }
            })
            .collect();
        Pricing {
            recipient: config.recipient(),
            chain_id: config.chain_id(),
            routes,
        }
    }
}

/// All server routes, with the paywall applied to the priced ones.
pub fn routes(config: &Config) -> Result<Router, PriceTagError> {
    let pricing = Json(Pricing::from(config));
    let x402 = config.middleware().with_routes(config.route_table())?;
    let router = Router::new()
        .route("/health", get(get_health))
        .route(
            "/pricing",
            get(move || {
                let pricing = pricing.clone();
                async move { pricing }
            }),
        )
        .route("/api/{*path}", get(get_resource).post(get_resource))
        .layer(x402);
    Ok(router)
}

#[instrument(skip_all)]
async fn get_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Echoes the payment that unlocked the resource, if there was one.
#[instrument(skip_all)]
async fn get_resource(
    Path(path): Path<String>,
    payment: Option<Extension<VerifiedPayment>>,
) -> impl IntoResponse {
    let payment = payment.map(|Extension(payment)| {
        tracing::info!(payer = %payment.payer, amount = %payment.amount, "Serving paid resource");
        json!({
            "payer": payment.payer,
            "amount": payment.amount,
            "value": payment.value,
            "token": payment.token,
            "chainId": payment.chain_id,
            "nonce": payment.nonce,
        })
    });
    Json(json!({
        "resource": format!("/api/{path}"),
        "paid": payment.is_some(),
        "payment": payment,
    }))
}
