use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's claim of a manual SINPE payment awaiting admin verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: PaymentStatus,
    pub package_id: String,
    pub package_name: String,
    pub price: i64,
    pub duration_minutes: i64,
    pub sinpe_id: String,
    pub receipt_image_url: String,
    pub receipt_sha256: String,
    /// Set only once the payment is approved.
    pub token: Option<String>,
    pub processed_by: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_pending(&self) -> bool {
        self.status == PaymentStatus::Pending
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Approved => "Approved",
            PaymentStatus::Rejected => "Rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(PaymentStatus::Pending),
            "Approved" => Some(PaymentStatus::Approved),
            "Rejected" => Some(PaymentStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub user_id: Uuid,
    pub package_id: String,
    pub package_name: String,
    pub price: i64,
    pub duration_minutes: i64,
    pub sinpe_id: String,
    pub receipt_image_url: String,
    pub receipt_sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Receipt image as received from the client.
#[derive(Debug, Clone)]
pub struct ReceiptUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}
