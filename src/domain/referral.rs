use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referral {
    pub id: Uuid,
    pub referrer_id: Uuid,
    pub referred_email: String,
    pub referred_name: String,
    pub relationship: String,
    pub notes: Option<String>,
    pub status: ReferralStatus,
    pub credit_reward: i64,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReferralStatus {
    Pending,
    Successful,
    Expired,
}

impl ReferralStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferralStatus::Pending => "Pending",
            ReferralStatus::Successful => "Successful",
            ReferralStatus::Expired => "Expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(ReferralStatus::Pending),
            "Successful" => Some(ReferralStatus::Successful),
            "Expired" => Some(ReferralStatus::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateReferralRequest {
    #[validate(email)]
    pub referred_email: String,
    #[validate(length(min = 1, max = 100))]
    pub referred_name: String,
    #[validate(length(min = 1, max = 50))]
    pub relationship: String,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewReferral {
    pub referrer_id: Uuid,
    pub referred_email: String,
    pub referred_name: String,
    pub relationship: String,
    pub notes: Option<String>,
    pub credit_reward: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Strike / cooldown engine
// =============================================================================

/// Everything the engine needs to judge a referral attempt.
#[derive(Debug, Clone, Copy)]
pub struct StrikeSnapshot {
    pub strike_count: i32,
    pub last_strike_reset: Option<DateTime<Utc>>,
    /// `created_at` of the referrer's most recent pending or successful referral.
    pub latest_referral_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StrikeState {
    Clear,
    Warned { strikes: i32 },
    Punished { until: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Cooldown { remaining: Duration },
    Punished { remaining: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// The punishment window has elapsed and the persisted strikes must be cleared.
    pub punishment_expired: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Accepted,
    CooldownStrike { remaining: Duration, strike_count: i32 },
    PunishmentStarted { remaining: Duration },
    StillPunished { remaining: Duration },
}

/// New strike state to persist for an attempt, plus whether to insert the referral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptPlan {
    pub strike_count: i32,
    pub last_strike_reset: Option<DateTime<Utc>>,
    pub create_referral: bool,
    pub needs_write: bool,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Copy)]
pub struct StrikePolicy {
    pub cooldown: Duration,
    pub punishment: Duration,
    pub max_strikes: i32,
}

impl Default for StrikePolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::days(3),
            punishment: Duration::days(3),
            max_strikes: 5,
        }
    }
}

impl StrikePolicy {
    pub fn new(cooldown: Duration, punishment: Duration, max_strikes: i32) -> Self {
        Self { cooldown, punishment, max_strikes }
    }

    pub fn state(&self, strike_count: i32, last_strike_reset: Option<DateTime<Utc>>, now: DateTime<Utc>) -> StrikeState {
        match last_strike_reset {
            Some(reset) if now < reset + self.punishment => StrikeState::Punished {
                until: reset + self.punishment,
            },
            Some(_) => StrikeState::Clear,
            None if strike_count == 0 => StrikeState::Clear,
            None => StrikeState::Warned { strikes: strike_count },
        }
    }

    pub fn evaluate(&self, snapshot: &StrikeSnapshot, now: DateTime<Utc>) -> Evaluation {
        let mut punishment_expired = false;

        if let Some(reset) = snapshot.last_strike_reset {
            let until = reset + self.punishment;
            if now < until {
                return Evaluation {
                    verdict: Verdict::Punished { remaining: until - now },
                    punishment_expired: false,
                };
            }
            punishment_expired = true;
        } else if snapshot.strike_count >= self.max_strikes {
            // Max strikes without a start time cannot be timed; release it.
            punishment_expired = true;
        }

        if let Some(latest) = snapshot.latest_referral_at {
            let until = latest + self.cooldown;
            if now < until {
                return Evaluation {
                    verdict: Verdict::Cooldown { remaining: until - now },
                    punishment_expired,
                };
            }
        }

        Evaluation {
            verdict: Verdict::Allowed,
            punishment_expired,
        }
    }

    pub fn plan_attempt(&self, snapshot: &StrikeSnapshot, now: DateTime<Utc>) -> AttemptPlan {
        let evaluation = self.evaluate(snapshot, now);
        let base_strikes = if evaluation.punishment_expired { 0 } else { snapshot.strike_count };

        match evaluation.verdict {
            Verdict::Punished { remaining } => AttemptPlan {
                strike_count: snapshot.strike_count,
                last_strike_reset: snapshot.last_strike_reset,
                create_referral: false,
                needs_write: false,
                outcome: AttemptOutcome::StillPunished { remaining },
            },
            Verdict::Cooldown { remaining } => {
                let strikes = (base_strikes + 1).min(self.max_strikes);
                if strikes >= self.max_strikes {
                    AttemptPlan {
                        strike_count: strikes,
                        last_strike_reset: Some(now),
                        create_referral: false,
                        needs_write: true,
                        outcome: AttemptOutcome::PunishmentStarted { remaining: self.punishment },
                    }
                } else {
                    AttemptPlan {
                        strike_count: strikes,
                        last_strike_reset: None,
                        create_referral: false,
                        needs_write: true,
                        outcome: AttemptOutcome::CooldownStrike { remaining, strike_count: strikes },
                    }
                }
            }
            Verdict::Allowed => AttemptPlan {
                strike_count: 0,
                last_strike_reset: None,
                create_referral: true,
                needs_write: true,
                outcome: AttemptOutcome::Accepted,
            },
        }
    }
}

/// Answer of an eligibility check.
#[derive(Debug, Clone, Serialize)]
pub struct Eligibility {
    pub allowed: bool,
    pub reason: Option<String>,
    pub time_remaining_secs: Option<i64>,
    pub strike_count: i32,
    pub state: StrikeState,
}
