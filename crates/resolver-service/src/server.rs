//! Inbound HTTP surface: health probe and the coordinator's
//! order-accepted callback.
//!
//! The callback is a fast path, not a source of truth. A notice for us
//! schedules a settlement attempt after a short confirmation delay;
//! anything else is acknowledged and dropped. The settlement engine
//! re-reads the ledger, so a spoofed or duplicate notice can never
//! move money.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use resolver_settlement::SettlementEngine;
use resolver_types::{Address, CallbackNotice};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
	pub resolver: Address,
	pub settlement: Arc<SettlementEngine>,
	pub confirmation_delay: Duration,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/callback/order-accepted", post(order_accepted))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

pub async fn run(
	state: AppState,
	port: u16,
	mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
	let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
	info!(port, "callback server listening");
	axum::serve(listener, router(state))
		.with_graceful_shutdown(async move {
			let _ = shutdown.changed().await;
		})
		.await?;
	info!("callback server stopped");
	Ok(())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
	Json(json!({
		"status": "ok",
		"resolver": format!("{:#x}", state.resolver),
		"timestamp": chrono::Utc::now().to_rfc3339(),
	}))
}

async fn order_accepted(
	State(state): State<AppState>,
	Json(notice): Json<CallbackNotice>,
) -> (StatusCode, Json<Value>) {
	if notice.kind != CallbackNotice::ORDER_ACCEPTED {
		return acknowledged("ignored");
	}

	let ours = format!("{:#x}", state.resolver);
	if !notice.resolver_address.eq_ignore_ascii_case(&ours) {
		info!(
			order_id = %notice.order_id,
			resolver = %notice.resolver_address,
			"callback for another resolver"
		);
		return acknowledged("not-ours");
	}

	info!(order_id = %notice.order_id, "acceptance callback received, scheduling settlement");
	let settlement = state.settlement.clone();
	let order_id = notice.order_id;
	let delay = state.confirmation_delay;
	tokio::spawn(async move {
		// Let the acceptance transaction confirm before reading it back.
		tokio::time::sleep(delay).await;
		if let Err(err) = settlement.settle(order_id).await {
			error!(order_id = %order_id, error = %err, "callback settlement failed");
		}
	});

	acknowledged("settling")
}

fn acknowledged(action: &str) -> (StatusCode, Json<Value>) {
	(
		StatusCode::OK,
		Json(json!({"received": true, "action": action})),
	)
}
