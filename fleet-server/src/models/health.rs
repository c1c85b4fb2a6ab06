use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub timestamp: DateTime<Utc>,
    pub healthy: bool,
}

/// Per-instance samples, oldest first.
pub type HealthHistory = VecDeque<HealthSample>;

/// The persisted history document: instance name → samples.
pub type HistoryDocument = BTreeMap<String, HealthHistory>;

/// Append a sample and evict the oldest ones beyond `retention`.
pub fn push_bounded(history: &mut HealthHistory, sample: HealthSample, retention: usize) {
    history.push_back(sample);
    while history.len() > retention {
        history.pop_front();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    Down,
    Recovered,
}

impl Transition {
    pub fn severity(&self) -> &'static str {
        match self {
            Transition::Down => "ALERT",
            Transition::Recovered => "INFO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub instance_name: String,
    pub transition: Transition,
    pub message: String,
}

impl NotificationEvent {
    pub fn new(instance_name: &str, transition: Transition) -> Self {
        let message = match transition {
            Transition::Down => format!("Instance **{}** is DOWN!", instance_name),
            Transition::Recovered => format!("Instance **{}** has recovered.", instance_name),
        };
        Self {
            instance_name: instance_name.to_string(),
            transition,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_bounded_keeps_newest() {
        let mut history = HealthHistory::new();
        for i in 0..5 {
            push_bounded(
                &mut history,
                HealthSample { timestamp: Utc::now(), healthy: i % 2 == 0 },
                3,
            );
        }
        assert_eq!(history.len(), 3);
        let flags: Vec<bool> = history.iter().map(|s| s.healthy).collect();
        assert_eq!(flags, vec![true, false, true]);
    }

    #[test]
    fn test_event_messages() {
        let down = NotificationEvent::new("acme", Transition::Down);
        assert!(down.message.contains("acme"));
        assert_eq!(down.transition.severity(), "ALERT");
        let up = NotificationEvent::new("acme", Transition::Recovered);
        assert_eq!(up.transition.severity(), "INFO");
    }
}
