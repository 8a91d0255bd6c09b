use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub to_user_id: Uuid,
    pub from_user_id: Option<Uuid>,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationKind {
    PaymentApproved,
    PaymentRejected,
    ReferralSuccessful,
    Mention,
    Penalty,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PaymentApproved => "PaymentApproved",
            NotificationKind::PaymentRejected => "PaymentRejected",
            NotificationKind::ReferralSuccessful => "ReferralSuccessful",
            NotificationKind::Mention => "Mention",
            NotificationKind::Penalty => "Penalty",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PaymentApproved" => Some(NotificationKind::PaymentApproved),
            "PaymentRejected" => Some(NotificationKind::PaymentRejected),
            "ReferralSuccessful" => Some(NotificationKind::ReferralSuccessful),
            "Mention" => Some(NotificationKind::Mention),
            "Penalty" => Some(NotificationKind::Penalty),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub to_user_id: Uuid,
    pub from_user_id: Option<Uuid>,
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
