//! Normalized delivery results.

use pushgate_queue::Dispatch;
use serde::Serialize;

/// Result of one delivery to one recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    Sent,
    /// Transient failure. `rate_limited` marks provider throttling signals.
    Retry { reason: String, rate_limited: bool },
    /// The provider refused the message; resending will not help.
    Rejected { reason: String },
    /// The recipient no longer exists and its device record should be deleted.
    Invalid { reason: String },
}

impl Delivery {
    pub fn retry(reason: impl Into<String>) -> Self {
        Delivery::Retry {
            reason: reason.into(),
            rate_limited: false,
        }
    }

    pub fn rate_limited(reason: impl Into<String>) -> Self {
        Delivery::Retry {
            reason: reason.into(),
            rate_limited: true,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Delivery::Rejected {
            reason: reason.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Delivery::Invalid {
            reason: reason.into(),
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Delivery::Sent => None,
            Delivery::Retry { reason, .. }
            | Delivery::Rejected { reason }
            | Delivery::Invalid { reason } => Some(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientResult {
    pub device_id: String,
    pub delivery: Delivery,
}

/// Per-recipient results of one adapter call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Outcome {
    pub results: Vec<RecipientResult>,
}

impl Outcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same delivery for every recipient, used for batch-wide failures.
    pub fn uniform(recipients: &[String], delivery: Delivery) -> Self {
        Self {
            results: recipients
                .iter()
                .map(|id| RecipientResult {
                    device_id: id.clone(),
                    delivery: delivery.clone(),
                })
                .collect(),
        }
    }

    pub fn push(&mut self, device_id: impl Into<String>, delivery: Delivery) {
        self.results.push(RecipientResult {
            device_id: device_id.into(),
            delivery,
        });
    }

    pub fn sent(&self) -> usize {
        self.results.iter().filter(|r| r.delivery.is_sent()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.sent()
    }

    pub fn invalid_recipients(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| matches!(r.delivery, Delivery::Invalid { .. }))
            .map(|r| r.device_id.as_str())
            .collect()
    }

    pub fn retry_recipients(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| matches!(r.delivery, Delivery::Retry { .. }))
            .map(|r| r.device_id.clone())
            .collect()
    }

    pub fn rate_limited(&self) -> usize {
        self.results
            .iter()
            .filter(|r| {
                matches!(
                    r.delivery,
                    Delivery::Retry {
                        rate_limited: true,
                        ..
                    }
                )
            })
            .count()
    }

    fn first_reason(&self, pred: impl Fn(&Delivery) -> bool) -> String {
        self.results
            .iter()
            .find(|r| pred(&r.delivery))
            .and_then(|r| r.delivery.reason())
            .unwrap_or("unknown")
            .to_string()
    }

    /// Queue decision for this outcome.
    ///
    /// Any retryable recipient makes the job retry for exactly those recipients. A
    /// job with no retryable recipient is delivered when at least one recipient got
    /// the message and failed when none did.
    pub fn into_dispatch(self) -> Dispatch {
        let retry = self.retry_recipients();
        if !retry.is_empty() {
            return Dispatch::Retry {
                reason: self.first_reason(|d| matches!(d, Delivery::Retry { .. })),
                recipients: retry,
            };
        }
        if self.results.is_empty() || self.sent() > 0 {
            Dispatch::Delivered
        } else {
            Dispatch::Failed {
                reason: self.first_reason(|d| !d.is_sent()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn retry_wins_and_narrows_recipients() {
        let mut outcome = Outcome::new();
        outcome.push("a", Delivery::Sent);
        outcome.push("b", Delivery::rate_limited("message-rate-exceeded"));
        outcome.push("c", Delivery::invalid("registration-token-not-registered"));

        assert_eq!(outcome.sent(), 1);
        assert_eq!(outcome.failed(), 2);
        assert_eq!(outcome.rate_limited(), 1);
        assert_eq!(outcome.invalid_recipients(), vec!["c"]);
        assert_eq!(
            outcome.into_dispatch(),
            Dispatch::Retry {
                recipients: ids(&["b"]),
                reason: "message-rate-exceeded".to_string()
            }
        );
    }

    #[test]
    fn all_rejected_is_terminal() {
        let outcome = Outcome::uniform(&ids(&["a", "b"]), Delivery::rejected("invalid-argument"));
        assert_eq!(
            outcome.into_dispatch(),
            Dispatch::Failed {
                reason: "invalid-argument".to_string()
            }
        );
    }

    #[test]
    fn partial_delivery_without_retries_completes() {
        let mut outcome = Outcome::new();
        outcome.push("a", Delivery::Sent);
        outcome.push("b", Delivery::invalid("Unregistered"));
        assert_eq!(outcome.into_dispatch(), Dispatch::Delivered);
    }
}
