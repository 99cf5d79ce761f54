use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zenka_payments::application::admin::LedgerAdmin;
use zenka_payments::application::initiator::PaymentInitiator;
use zenka_payments::application::reconciler::CallbackReconciler;
use zenka_payments::domain::ports::SharedLedgerStore;
use zenka_payments::infrastructure::in_memory::InMemoryLedgerStore;
use zenka_payments::infrastructure::lipwa::{GatewayConfig, LipwaGateway};
use zenka_payments::interfaces::http::{AppState, router};

const REJECTED_PHONE: &str = "+254700000000";

#[derive(Clone, Default)]
struct FakeLipwa {
    received: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn fake_payments(
    State(fake): State<FakeLipwa>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    fake.received.lock().unwrap().push((auth, body.clone()));

    if body["phone_number"] == REJECTED_PHONE {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "message": "Invalid phone number"})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({"success": true, "checkout_id": "ws_CO_1"})),
    )
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Harness {
    base: String,
    fake: FakeLipwa,
    client: reqwest::Client,
}

async fn harness() -> Harness {
    let fake = FakeLipwa::default();
    let lipwa_addr = spawn(
        Router::new()
            .route("/api/payments", post(fake_payments))
            .with_state(fake.clone()),
    )
    .await;

    let gateway = LipwaGateway::new(GatewayConfig {
        base_url: format!("http://{lipwa_addr}"),
        api_key: " secret-key ".to_string(),
        channel_id: "chan-7".to_string(),
        timeout: Duration::from_secs(5),
    })
    .unwrap();

    let store: SharedLedgerStore = Arc::new(InMemoryLedgerStore::new());
    let state = AppState {
        initiator: Arc::new(PaymentInitiator::new(
            store.clone(),
            Arc::new(gateway),
            "https://zenka.example/functions/v1/lipwa-callback",
        )),
        reconciler: Arc::new(CallbackReconciler::new(store.clone())),
        admin: Arc::new(LedgerAdmin::new(store)),
    };
    let addr = spawn(router(state)).await;

    Harness {
        base: format!("http://{addr}"),
        fake,
        client: reqwest::Client::new(),
    }
}

impl Harness {
    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}{}", self.base, path))
            .header("x-user-id", "user-1")
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn post_raw(&self, path: &str, body: &'static str) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}{}", self.base, path))
            .header("x-user-id", "user-1")
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn push_savings(&self, amount: u64) -> String {
        let (status, body) = self
            .post(
                "/functions/v1/mpesa-stk-push",
                json!({"phoneNumber": "0712345678", "amount": amount, "depositType": "savings"}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["reference"].as_str().unwrap().to_string()
    }

    async fn balance(&self) -> i64 {
        let body: Value = self
            .client
            .get(format!("{}/savings/user-1", self.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["balance"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn test_push_then_callback_credits_savings() {
    let h = harness().await;

    let (status, body) = h
        .post(
            "/functions/v1/mpesa-stk-push",
            json!({"phoneNumber": "0712 345 678", "amount": 1000.7, "depositType": "savings"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["message"],
        "STK Push sent successfully. Check your phone for the M-Pesa prompt."
    );
    assert_eq!(body["displayText"], "Please enter your M-Pesa PIN when prompted");
    let reference = body["reference"].as_str().unwrap().to_string();

    {
        let received = h.fake.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let (auth, push) = &received[0];
        assert_eq!(auth.as_deref(), Some("Bearer secret-key"));
        assert_eq!(push["amount"], 1000);
        assert_eq!(push["phone_number"], "+254712345678");
        assert_eq!(push["channel_id"], "chan-7");
        assert_eq!(push["api_ref"], reference.as_str());
    }
    assert_eq!(h.balance().await, 0);

    let callback = json!({
        "api_ref": reference,
        "status": "payment.success",
        "amount": "1000",
        "mpesa_code": "QAB123XYZ",
        "checkout_id": "ws_CO_1",
    });
    for _ in 0..2 {
        let (status, ack) = h.post("/functions/v1/lipwa-callback", callback.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack, json!({"success": true, "message": "Callback processed"}));
    }
    assert_eq!(h.balance().await, 1000);
}

#[tokio::test]
async fn test_gateway_rejection_is_reported() {
    let h = harness().await;

    let (status, body) = h
        .post(
            "/functions/v1/mpesa-stk-push",
            json!({"phoneNumber": "0700000000", "amount": 500, "depositType": "savings"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("Invalid phone number"));
}

#[tokio::test]
async fn test_validation_errors_skip_the_gateway() {
    let h = harness().await;

    let (status, body) = h
        .post(
            "/functions/v1/mpesa-stk-push",
            json!({"phoneNumber": "0712345678", "amount": 20, "depositType": "savings"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Minimum amount"));
    assert!(h.fake.received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_callback_is_refused() {
    let h = harness().await;

    let response = h
        .client
        .post(format!("{}/functions/v1/lipwa-callback", h.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body,
        json!({"success": false, "error": "Callback processing failed"})
    );

    let (status, ack) = h
        .post(
            "/functions/v1/lipwa-callback",
            json!({"api_ref": "savings_1_missing", "status": "success"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["success"], true);
}

#[tokio::test]
async fn test_admin_verify_and_withdrawal_flow() {
    let h = harness().await;

    let (_, body) = h
        .post(
            "/functions/v1/mpesa-stk-push",
            json!({"phoneNumber": "0712345678", "amount": 2000, "depositType": "savings"}),
        )
        .await;
    let reference = body["reference"].as_str().unwrap().to_string();

    let (status, verified) = h
        .post(&format!("/admin/deposits/{reference}/verify"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["verified"], true);
    assert_eq!(verified["balance"], 2000);

    let (status, _) = h
        .post(&format!("/admin/deposits/{reference}/reject"), json!({"reason": "late"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = h
        .post("/withdrawals", json!({"amount": 5000, "phoneNumber": "0712345678"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = h
        .post("/withdrawals", json!({"amount": 1500, "phoneNumber": "0712345678"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["withdrawal"]["status"], "pending");
    let id = body["withdrawal"]["id"].as_u64().unwrap();

    let (status, body) = h
        .post(&format!("/admin/withdrawals/{id}/approve"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["withdrawal"]["status"], "completed");
    assert_eq!(h.balance().await, 500);

    let (status, _) = h
        .post("/admin/withdrawals/999/reject", json!({}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_verify_reports_each_reference() {
    let h = harness().await;

    let (_, body) = h
        .post(
            "/functions/v1/mpesa-stk-push",
            json!({"phoneNumber": "0712345678", "amount": 300, "depositType": "savings"}),
        )
        .await;
    let reference = body["reference"].as_str().unwrap().to_string();

    let (status, body) = h
        .post(
            "/admin/deposits/bulk-verify",
            json!({"references": [reference, "savings_1_gone", "nonsense"]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results[0]["outcome"]["status"], "verified");
    assert_eq!(results[1]["outcome"]["status"], "not_found");
    assert_eq!(results[2]["outcome"]["status"], "error");
    assert_eq!(h.balance().await, 300);
}

#[tokio::test]
async fn test_required_savings_lookup() {
    let h = harness().await;

    let body: Value = h
        .client
        .get(format!("{}/loans/required-savings/16000", h.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!({"loan_amount": 16000, "required_savings": 800}));
}

#[tokio::test]
async fn test_callback_with_numeric_provider_fields_credits_savings() {
    let h = harness().await;
    let reference = h.push_savings(1200).await;

    let (status, ack) = h
        .post(
            "/functions/v1/lipwa-callback",
            json!({
                "api_ref": reference,
                "status": "payment.success",
                "amount": 1200,
                "transaction_id": 987654,
                "phone_number": 254712345678u64,
                "checkout_id": 42,
                "mpesa_code": "QAB123XYZ",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, json!({"success": true, "message": "Callback processed"}));
    assert_eq!(h.balance().await, 1200);
}

#[tokio::test]
async fn test_callback_with_unreadable_amount_is_not_credited() {
    let h = harness().await;

    for amount in [json!("5.50"), json!(-500), json!("abc"), json!(true)] {
        let reference = h.push_savings(500).await;
        let (status, ack) = h
            .post(
                "/functions/v1/lipwa-callback",
                json!({"api_ref": reference, "status": "success", "amount": amount}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["success"], true);
    }
    assert_eq!(h.balance().await, 0);
}

#[tokio::test]
async fn test_malformed_request_bodies_get_json_errors() {
    let h = harness().await;

    let cases = [
        ("/functions/v1/mpesa-stk-push", "{not json"),
        (
            "/functions/v1/mpesa-stk-push",
            r#"{"phoneNumber": "0712345678", "amount": "500"}"#,
        ),
        ("/withdrawals", "{not json"),
        ("/withdrawals", r#"{"amount": "1500", "phoneNumber": "0712345678"}"#),
        ("/withdrawals", r#"{"phoneNumber": "0712345678"}"#),
        ("/admin/deposits/bulk-verify", r#"{"references": "one"}"#),
    ];
    for (path, body) in cases {
        let (status, error) = h.post_raw(path, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{path} {body}");
        assert_eq!(error["success"], false);
        assert!(error["error"].as_str().unwrap().contains("Invalid request body"));
    }
    assert!(h.fake.received.lock().unwrap().is_empty());
}
