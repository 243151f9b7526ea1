// src/payment.rs

//! Subscription purchase: checkout, external redirect, payment verification
//! and subscription activation.

use futures::channel::mpsc::UnboundedSender;
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::client::BillingApi;
use crate::config::PollSettings;
use crate::errors::{FlowError, Result};
use crate::models::{Checkout, PaymentReceipt, PendingPayment, SubscriptionSnapshot, TransactionId};
use crate::normalizer;
use crate::pending::PendingPaymentStore;
use crate::poller::{CancelSignal, OperationResult, PollTick, Poller, Submitted};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPhase {
    Idle,
    Submitted,
    VerifyingPayment,
    VerifyingSubscriptionActivation,
    Active,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// `confirmed` is false when the activation check ran out of attempts
    /// and the snapshot is the optimistic one.
    Active {
        subscription: SubscriptionSnapshot,
        receipt: PaymentReceipt,
        confirmed: bool,
    },
    Failed { reason: String },
    /// Send the user to the manual status page instead of retrying.
    TimedOut { transaction_id: TransactionId, status_page_url: String },
    Cancelled,
}

impl PaymentOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            PaymentOutcome::Active { confirmed: true, .. } => "active",
            PaymentOutcome::Active { confirmed: false, .. } => "active_unconfirmed",
            PaymentOutcome::Failed { .. } => "failed",
            PaymentOutcome::TimedOut { .. } => "timeout",
            PaymentOutcome::Cancelled => "cancelled",
        }
    }
}

/// Client-side view of the learner's subscription.
#[derive(Clone, Default)]
pub struct SubscriptionCache {
    inner: Arc<RwLock<Option<SubscriptionSnapshot>>>,
}

impl SubscriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<SubscriptionSnapshot> {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, snapshot: SubscriptionSnapshot) {
        *self.inner.write().await = Some(snapshot);
    }

    pub async fn mark_active(&self, plan: Option<String>) {
        let mut guard = self.inner.write().await;
        let renewal_date = guard.as_ref().and_then(|s| s.renewal_date.clone());
        let plan = plan.or_else(|| guard.as_ref().and_then(|s| s.plan.clone()));
        *guard = Some(SubscriptionSnapshot {
            status: "active".to_string(),
            plan,
            renewal_date,
        });
    }
}

pub struct SubscriptionFlow<B: BillingApi> {
    api: B,
    store: Arc<dyn PendingPaymentStore>,
    subscription: SubscriptionCache,
    settings: PollSettings,
    status_page_url: String,
    phase: PaymentPhase,
    progress: Option<UnboundedSender<PollTick>>,
    cancel: Option<CancelSignal>,
}

impl<B: BillingApi> SubscriptionFlow<B> {
    pub fn new(
        api: B,
        store: Arc<dyn PendingPaymentStore>,
        subscription: SubscriptionCache,
        settings: PollSettings,
        status_page_url: impl Into<String>,
    ) -> Self {
        Self {
            api,
            store,
            subscription,
            settings,
            status_page_url: status_page_url.into(),
            phase: PaymentPhase::Idle,
            progress: None,
            cancel: None,
        }
    }

    pub fn with_progress(mut self, progress: UnboundedSender<PollTick>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn phase(&self) -> PaymentPhase {
        self.phase
    }

    fn poller(&self, poller: Poller) -> Poller {
        let poller = match self.progress.clone() {
            Some(progress) => poller.observe(progress),
            None => poller,
        };
        match self.cancel.clone() {
            Some(cancel) => poller.cancel_on(cancel),
            None => poller,
        }
    }

    /// Starts a purchase and persists the transaction before the caller
    /// redirects to the payment page.
    pub async fn begin_checkout(&mut self, plan_id: &str, coupon_code: Option<&str>) -> Result<Checkout> {
        let response = self.api.subscribe(plan_id, coupon_code).await?;
        let checkout = normalizer::checkout(&response).ok_or_else(|| {
            FlowError::UnexpectedResponse("subscribe response lacks transactionId or redirectUrl".to_string())
        })?;

        self.store.save(&PendingPayment::from_checkout(&checkout)).await?;
        self.phase = PaymentPhase::Submitted;
        info!("💳 Checkout {} started for plan {}", checkout.transaction_id, plan_id);
        Ok(checkout)
    }

    /// Finds the transaction to verify after the redirect. The URL parameter
    /// wins; the stored record is display context and the fallback.
    pub async fn recover(&self, url_transaction_id: Option<&str>) -> Result<(TransactionId, Option<PendingPayment>)> {
        let stored = match self.store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Could not read pending payment record: {}", e);
                None
            }
        };

        let from_url = url_transaction_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(TransactionId::new);

        match (from_url, stored) {
            (Some(id), Some(record)) => {
                if record.transaction_id != id {
                    warn!(
                        "Return URL transaction {} differs from stored {}, verifying the URL one",
                        id, record.transaction_id
                    );
                }
                Ok((id, Some(record)))
            }
            (Some(id), None) => Ok((id, None)),
            (None, Some(record)) => Ok((record.transaction_id.clone(), Some(record))),
            (None, None) => Err(FlowError::NoPendingPayment),
        }
    }

    pub async fn resume(&mut self, url_transaction_id: Option<&str>) -> Result<PaymentOutcome> {
        let (transaction_id, context) = self.recover(url_transaction_id).await?;
        Ok(self.verify(transaction_id, context).await)
    }

    /// Waits for the payment to settle, then for the subscription to turn active.
    pub async fn verify(&mut self, transaction_id: TransactionId, context: Option<PendingPayment>) -> PaymentOutcome {
        self.phase = PaymentPhase::VerifyingPayment;

        let api = &self.api;
        let poller = self.poller(Poller::from_backoff("payment", &self.settings.payment));
        let result = poller
            .run(
                std::future::ready(Ok::<_, FlowError>(Submitted::Handle(transaction_id.clone()))),
                move |id: TransactionId| async move { api.check_payment_status(&id).await },
                normalizer::classify_payment,
            )
            .await;

        match result {
            OperationResult::Succeeded(receipt) => {
                self.clear_pending().await;
                let plan = context.as_ref().and_then(|c| c.plan_name.clone());
                self.subscription.mark_active(plan).await;
                info!("✅ Payment {} settled ({})", transaction_id, receipt.status);
                self.confirm_activation(receipt).await
            }
            OperationResult::Failed(failure) => {
                self.clear_pending().await;
                self.phase = PaymentPhase::Failed;
                info!("❌ Payment {} failed: {}", transaction_id, failure.reason);
                PaymentOutcome::Failed { reason: failure.reason }
            }
            OperationResult::TimedOut { attempts, .. } => {
                self.phase = PaymentPhase::TimedOut;
                warn!("⚠️  Payment {} still unsettled after {} checks", transaction_id, attempts);
                PaymentOutcome::TimedOut {
                    transaction_id,
                    status_page_url: self.status_page_url.clone(),
                }
            }
            OperationResult::Cancelled => PaymentOutcome::Cancelled,
        }
    }

    async fn confirm_activation(&mut self, receipt: PaymentReceipt) -> PaymentOutcome {
        self.phase = PaymentPhase::VerifyingSubscriptionActivation;

        let api = &self.api;
        let poller = self.poller(Poller::from_fixed("activation", &self.settings.activation));
        let result = poller
            .run(
                std::future::ready(Ok::<_, FlowError>(Submitted::Handle(()))),
                move |_: ()| async move { api.get_current_subscription().await },
                normalizer::classify_subscription,
            )
            .await;

        match result {
            OperationResult::Succeeded(subscription) => {
                self.subscription.replace(subscription.clone()).await;
                self.phase = PaymentPhase::Active;
                PaymentOutcome::Active { subscription, receipt, confirmed: true }
            }
            OperationResult::Cancelled => PaymentOutcome::Cancelled,
            _ => {
                // paid but not yet visible; keep the optimistic state
                self.phase = PaymentPhase::Active;
                let subscription = self.subscription.current().await.unwrap_or(SubscriptionSnapshot {
                    status: "active".to_string(),
                    plan: None,
                    renewal_date: None,
                });
                PaymentOutcome::Active { subscription, receipt, confirmed: false }
            }
        }
    }

    /// Reloads the current subscription into the cache.
    pub async fn refresh_subscription(&self) -> Result<SubscriptionSnapshot> {
        let response = self.api.get_current_subscription().await?;
        let snapshot = normalizer::subscription_snapshot(&response);
        self.subscription.replace(snapshot.clone()).await;
        Ok(snapshot)
    }

    async fn clear_pending(&self) {
        if let Err(e) = self.store.clear().await {
            warn!("Could not clear pending payment record: {}", e);
        }
    }
}
