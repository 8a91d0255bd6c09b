use futures_util::stream::{self, Stream};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::Payment;

/// Live change feed for payment records.
///
/// Every committed payment transition is published here. Subscribers hold a
/// [`Subscription`]; dropping it is the unsubscribe.
pub struct PaymentFeed {
    sender: broadcast::Sender<Payment>,
}

impl PaymentFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, payment: &Payment) {
        // No receivers is fine: nobody is watching.
        let _ = self.sender.send(payment.clone());
    }

    /// Every payment change (the admin review queue).
    pub fn subscribe_all(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            payment_id: None,
        }
    }

    /// Changes of one payment document.
    pub fn subscribe_payment(&self, payment_id: Uuid) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            payment_id: Some(payment_id),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PaymentFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct Subscription {
    receiver: broadcast::Receiver<Payment>,
    payment_id: Option<Uuid>,
}

impl Subscription {
    /// Next matching snapshot, or `None` once the feed is gone.
    pub async fn next(&mut self) -> Option<Payment> {
        loop {
            match self.receiver.recv().await {
                Ok(payment) => {
                    if self.payment_id.map_or(true, |id| id == payment.id) {
                        return Some(payment);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    tracing::warn!("Payment subscriber lagged by {} messages", count);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Payment> {
        stream::unfold(self, |mut sub| async move {
            sub.next().await.map(|payment| (payment, sub))
        })
    }
}
