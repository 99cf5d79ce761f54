#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use zenka_payments::application::initiator::{InitiationRequest, PaymentInitiator, PaymentPurpose};
use zenka_payments::application::reconciler::CallbackPayload;
use zenka_payments::domain::account::OwnerId;
use zenka_payments::domain::ports::{PaymentGateway, PushAccepted, PushRequest};
use zenka_payments::error::Result;
use zenka_payments::infrastructure::in_memory::InMemoryLedgerStore;

pub const OWNER: &str = "user-1";

/// Accepts every push and remembers it.
#[derive(Default)]
pub struct AcceptingGateway {
    pub requests: Mutex<Vec<PushRequest>>,
}

#[async_trait]
impl PaymentGateway for AcceptingGateway {
    fn channel_id(&self) -> &str {
        "test-channel"
    }

    async fn push_payment(&self, request: &PushRequest) -> Result<PushAccepted> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(PushAccepted {
            display_text: "Please enter your M-Pesa PIN when prompted".to_string(),
        })
    }
}

pub fn owner() -> OwnerId {
    OwnerId::new(OWNER).unwrap()
}

pub fn ledger() -> (InMemoryLedgerStore, Arc<PaymentInitiator>) {
    let store = InMemoryLedgerStore::new();
    let initiator = PaymentInitiator::new(
        Arc::new(store.clone()),
        Arc::new(AcceptingGateway::default()),
        "http://127.0.0.1:8080/functions/v1/lipwa-callback",
    );
    (store, Arc::new(initiator))
}

pub fn savings_request(amount: u64) -> InitiationRequest {
    InitiationRequest {
        purpose: PaymentPurpose::SavingsDeposit { owner_id: owner() },
        amount,
        phone_number: "0712345678".to_string(),
    }
}

pub fn callback(reference: &str, status: &str, amount: u64) -> CallbackPayload {
    CallbackPayload {
        api_ref: Some(reference.to_string()),
        status: Some(status.to_string()),
        amount: Some(amount.into()),
        mpesa_code: Some("QAB123XYZ".to_string()),
        payment_date: Some("2026-01-05 10:00:00".to_string()),
        ..Default::default()
    }
}
