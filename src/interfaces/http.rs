//! HTTP surface: the push endpoint used by the app, the provider webhook,
//! and the admin console routes.

use crate::application::admin::LedgerAdmin;
use crate::application::initiator::{InitiationRequest, PaymentInitiator, PaymentPurpose};
use crate::application::reconciler::{CallbackPayload, CallbackReconciler};
use crate::domain::account::OwnerId;
use crate::domain::reference::Reference;
use crate::domain::savings::required_savings;
use crate::domain::transaction::SettleOutcome;
use crate::error::PaymentError;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{error, info};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;

const PUSH_SENT_MESSAGE: &str = "STK Push sent successfully. Check your phone for the M-Pesa prompt.";
pub const CALLBACK_PATH: &str = "/functions/v1/lipwa-callback";
const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub initiator: Arc<PaymentInitiator>,
    pub reconciler: Arc<CallbackReconciler>,
    pub admin: Arc<LedgerAdmin>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/functions/v1/mpesa-stk-push", post(stk_push))
        .route(CALLBACK_PATH, post(lipwa_callback))
        .route("/admin/deposits/bulk-verify", post(bulk_verify))
        .route("/admin/deposits/:reference/verify", post(verify_deposit))
        .route("/admin/deposits/:reference/reject", post(reject_deposit))
        .route("/withdrawals", post(request_withdrawal))
        .route("/admin/withdrawals/:id/approve", post(approve_withdrawal))
        .route("/admin/withdrawals/:id/reject", post(reject_withdrawal))
        .route("/savings/:owner_id", get(savings))
        .route("/loans/required-savings/:loan_amount", get(loan_requirement))
        .with_state(state)
}

/// Where the HTTP service listens and the callback URL it advertises.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub callback_url: String,
}

impl ServerConfig {
    /// Uses the webhook path on the bind address when no public URL is given.
    pub fn new(bind: SocketAddr, callback_url: Option<String>) -> Self {
        let callback_url = callback_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| format!("http://{bind}{CALLBACK_PATH}"));
        Self { bind, callback_url }
    }
}

pub async fn serve(config: &ServerConfig, state: AppState) -> crate::error::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(
        "Listening on http://{} (callback {})",
        listener.local_addr()?,
        config.callback_url
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Error body `{success: false, error}` with a status derived from the cause.
pub struct ApiError(PaymentError);

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            PaymentError::ValidationError(_)
            | PaymentError::InvalidReference(_)
            | PaymentError::InsufficientFunds { .. }
            | PaymentError::GatewayError(_)
            | PaymentError::GatewayUnavailable(_)
            | PaymentError::ConfigError(_) => StatusCode::BAD_REQUEST,
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::DuplicateReference(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }
        let body = Json(json!({"success": false, "error": self.0.to_string()}));
        (status, body).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StkPushBody {
    phone_number: Option<String>,
    amount: Option<f64>,
    application_id: Option<Value>,
    deposit_type: Option<String>,
    user_id: Option<String>,
}

impl StkPushBody {
    fn into_request(self, header_user: Option<&str>) -> Result<InitiationRequest, PaymentError> {
        let (Some(phone_number), Some(amount)) = (self.phone_number, self.amount) else {
            return Err(PaymentError::ValidationError(
                "Missing required fields: phoneNumber or amount".to_string(),
            ));
        };
        if !amount.is_finite() || amount < 0.0 {
            return Err(PaymentError::ValidationError(format!(
                "Invalid amount: {amount}"
            )));
        }

        let purpose = if self.deposit_type.as_deref() == Some("savings") {
            let owner = self
                .user_id
                .as_deref()
                .or(header_user)
                .ok_or_else(|| {
                    PaymentError::ValidationError("Savings deposits require a user".to_string())
                })?;
            PaymentPurpose::SavingsDeposit {
                owner_id: OwnerId::new(owner)?,
            }
        } else {
            let application_id = match self.application_id {
                Some(Value::String(s)) => s,
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    return Err(PaymentError::ValidationError(
                        "Missing required field: applicationId".to_string(),
                    ));
                }
            };
            let owner_id = match self.user_id.as_deref().or(header_user) {
                Some(owner) => Some(OwnerId::new(owner)?),
                None => None,
            };
            PaymentPurpose::LoanDisbursement {
                application_id,
                owner_id,
            }
        };

        Ok(InitiationRequest {
            purpose,
            amount: amount.floor() as u64,
            phone_number,
        })
    }
}

fn header_user(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Parses a JSON request body, reporting failures as `{success: false, error}`.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| PaymentError::ValidationError(format!("Invalid request body: {e}")).into())
}

async fn stk_push(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult {
    let body: StkPushBody = parse_body(&body)?;
    let request = body.into_request(header_user(&headers))?;
    let initiation = state.initiator.initiate(request).await?;
    Ok(Json(json!({
        "success": true,
        "message": PUSH_SENT_MESSAGE,
        "reference": initiation.reference.to_string(),
        "displayText": initiation.display_text,
    })))
}

/// Only an unparseable body is refused; everything else is acknowledged.
async fn lipwa_callback(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: CallbackPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Error processing Lipwa callback: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": "Callback processing failed"})),
            )
                .into_response();
        }
    };
    Json(state.reconciler.reconcile(payload).await).into_response()
}

fn settle_response(reference: &Reference, outcome: SettleOutcome) -> ApiResult {
    match outcome {
        SettleOutcome::Applied {
            transaction,
            account,
        } => Ok(Json(json!({
            "success": true,
            "reference": reference.to_string(),
            "verified": transaction.verified.as_flag(),
            "balance": account.map(|a| a.balance),
        }))),
        SettleOutcome::AlreadyTerminal(_) => Err(PaymentError::ValidationError(format!(
            "Deposit {reference} is already final"
        ))
        .into()),
        SettleOutcome::NotFound => Err(PaymentError::NotFound(format!("Deposit {reference}")).into()),
    }
}

async fn verify_deposit(State(state): State<AppState>, Path(reference): Path<String>) -> ApiResult {
    let reference: Reference = reference.parse()?;
    let outcome = state.admin.verify_deposit(&reference).await?;
    settle_response(&reference, outcome)
}

#[derive(Debug, Default, Deserialize)]
struct RejectBody {
    reason: Option<String>,
}

async fn reject_deposit(
    State(state): State<AppState>,
    Path(reference): Path<String>,
    body: Bytes,
) -> ApiResult {
    let reference: Reference = reference.parse()?;
    let body: RejectBody = if body.iter().all(u8::is_ascii_whitespace) {
        RejectBody::default()
    } else {
        parse_body(&body)?
    };
    let outcome = state
        .admin
        .reject_deposit(&reference, body.reason.as_deref())
        .await?;
    settle_response(&reference, outcome)
}

#[derive(Debug, Deserialize)]
struct BulkVerifyBody {
    references: Vec<String>,
}

async fn bulk_verify(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let body: BulkVerifyBody = parse_body(&body)?;
    let results = state.admin.bulk_verify(&body.references).await;
    Ok(Json(json!({"success": true, "results": results})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalBody {
    user_id: Option<String>,
    amount: u64,
    phone_number: String,
}

async fn request_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult {
    let body: WithdrawalBody = parse_body(&body)?;
    let owner = body
        .user_id
        .as_deref()
        .or(header_user(&headers))
        .ok_or_else(|| PaymentError::ValidationError("Withdrawals require a user".to_string()))?;
    let withdrawal = state
        .admin
        .request_withdrawal(OwnerId::new(owner)?, body.amount, &body.phone_number)
        .await?;
    Ok(Json(json!({"success": true, "withdrawal": withdrawal})))
}

async fn approve_withdrawal(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult {
    let withdrawal = state.admin.approve_withdrawal(id).await?;
    Ok(Json(json!({"success": true, "withdrawal": withdrawal})))
}

async fn reject_withdrawal(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult {
    let withdrawal = state.admin.reject_withdrawal(id).await?;
    Ok(Json(json!({"success": true, "withdrawal": withdrawal})))
}

async fn savings(State(state): State<AppState>, Path(owner_id): Path<String>) -> ApiResult {
    let account = state.admin.savings(&OwnerId::new(owner_id)?).await?;
    Ok(Json(json!({
        "owner_id": account.owner_id,
        "balance": account.balance,
    })))
}

async fn loan_requirement(Path(loan_amount): Path<u64>) -> Json<Value> {
    Json(json!({
        "loan_amount": loan_amount,
        "required_savings": required_savings(loan_amount),
    }))
}
