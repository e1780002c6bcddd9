// src/recognition/escalation.rs
//
// When to consult the external vision classifier.
//
// The fallback model is slow and billed per call, so it is reserved for
// frames whose offline score *almost* reached the acceptance threshold:
//
//   score:  ───────────[ threshold - band , threshold )──────────────▶
//             too far      near-miss: escalate         already accepted
//
// All gates must pass: feature enabled + client configured, labels known,
// cooldown elapsed, no call in flight, subject moving, score in band.
// The policy only decides; the call itself is dispatched elsewhere.

use crate::types::EscalationConfig;
use tracing::debug;

/// Sentinels the fallback model uses to say none of the labels apply.
const NO_MATCH_SENTINELS: [&str; 2] = ["NONE", "NO MATCH"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeclineReason {
    Disabled,
    NoClient,
    NoLabels,
    CoolingDown,
    InFlight,
    Idle,
    OutsideBand,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EscalationDecision {
    Escalate,
    Decline(DeclineReason),
}

/// Signals available for one frame.
#[derive(Debug, Clone, Copy)]
pub struct EscalationInput<'a> {
    pub offline_score: f32,
    pub offline_threshold: f32,
    pub labels: &'a [String],
    pub motion_energy: Option<f32>,
    pub now: f64,
}

pub struct EscalationPolicy {
    enabled: bool,
    client_available: bool,
    cooldown_secs: f64,
    trigger_band: f32,
    min_motion_energy: f32,
    last_call: Option<f64>,
    in_flight: bool,
}

impl EscalationPolicy {
    pub fn new(config: &EscalationConfig, client_available: bool) -> Self {
        Self {
            enabled: config.enabled,
            client_available,
            cooldown_secs: config.cooldown_secs,
            trigger_band: config.trigger_band,
            min_motion_energy: config.min_motion_energy,
            last_call: None,
            in_flight: false,
        }
    }

    pub fn evaluate(&self, input: &EscalationInput) -> EscalationDecision {
        use DeclineReason::*;

        let decline = if !self.enabled {
            Some(Disabled)
        } else if !self.client_available {
            Some(NoClient)
        } else if input.labels.is_empty() {
            Some(NoLabels)
        } else if !self.cooldown_elapsed(input.now) {
            Some(CoolingDown)
        } else if self.in_flight {
            Some(InFlight)
        } else if input
            .motion_energy
            .is_some_and(|m| m < self.min_motion_energy)
        {
            Some(Idle)
        } else if !self.in_near_miss_band(input.offline_score, input.offline_threshold) {
            Some(OutsideBand)
        } else {
            None
        };

        match decline {
            Some(reason) => EscalationDecision::Decline(reason),
            None => EscalationDecision::Escalate,
        }
    }

    pub fn should_escalate(&self, input: &EscalationInput) -> bool {
        self.evaluate(input) == EscalationDecision::Escalate
    }

    /// Half-open band `[threshold - band, threshold)`; non-positive scores never qualify.
    pub fn in_near_miss_band(&self, score: f32, threshold: f32) -> bool {
        score > 0.0 && score >= threshold - self.trigger_band && score < threshold
    }

    /// Record that a call was issued at `now`. Starts the cooldown whatever the outcome.
    pub fn mark_attempt(&mut self, now: f64) {
        debug!("Escalation attempt at {:.3}s", now);
        self.last_call = Some(now);
        self.in_flight = true;
    }

    /// The outstanding call finished (with or without a label).
    pub fn complete(&mut self) {
        self.in_flight = false;
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn last_call(&self) -> Option<f64> {
        self.last_call
    }

    fn cooldown_elapsed(&self, now: f64) -> bool {
        match self.last_call {
            Some(t) => now - t >= self.cooldown_secs,
            None => true,
        }
    }
}

/// Map the fallback model's free-text answer onto a known label.
///
/// Case-insensitive exact match after trimming whitespace; the canonical
/// spelling from `labels` is returned. Sentinels and anything else give `None`.
pub fn reconcile_label(response: &str, labels: &[String]) -> Option<String> {
    let answer = response.trim().to_uppercase();
    if answer.is_empty() || NO_MATCH_SENTINELS.contains(&answer.as_str()) {
        return None;
    }
    labels
        .iter()
        .find(|l| l.to_uppercase() == answer)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EscalationConfig {
        EscalationConfig {
            enabled: true,
            cooldown_secs: 2.5,
            trigger_band: 0.02,
            min_motion_energy: 35.0,
            ..Default::default()
        }
    }

    fn labels() -> Vec<String> {
        vec!["Jump".to_string(), "Duck".to_string()]
    }

    fn input(score: f32, labels: &[String], motion: Option<f32>, now: f64) -> EscalationInput<'_> {
        EscalationInput {
            offline_score: score,
            offline_threshold: 0.90,
            labels,
            motion_energy: motion,
            now,
        }
    }

    #[test]
    fn test_near_miss_band() {
        let policy = EscalationPolicy::new(&config(), true);
        let l = labels();

        assert!(policy.should_escalate(&input(0.89, &l, None, 0.0)));
        assert_eq!(
            policy.evaluate(&input(0.80, &l, None, 0.0)),
            EscalationDecision::Decline(DeclineReason::OutsideBand)
        );
        assert_eq!(
            policy.evaluate(&input(0.95, &l, None, 0.0)),
            EscalationDecision::Decline(DeclineReason::OutsideBand)
        );
        // Upper bound is exclusive
        assert!(!policy.should_escalate(&input(0.90, &l, None, 0.0)));
    }

    #[test]
    fn test_cooldown_blocks_second_attempt() {
        let mut policy = EscalationPolicy::new(&config(), true);
        let l = labels();

        assert!(policy.should_escalate(&input(0.89, &l, Some(50.0), 0.0)));
        policy.mark_attempt(0.0);
        assert!(policy.is_in_flight());
        policy.complete();
        assert!(!policy.is_in_flight());
        assert_eq!(policy.last_call(), Some(0.0));

        assert_eq!(
            policy.evaluate(&input(0.89, &l, Some(50.0), 0.5)),
            EscalationDecision::Decline(DeclineReason::CoolingDown)
        );
        assert!(policy.should_escalate(&input(0.89, &l, Some(50.0), 2.5)));
    }

    #[test]
    fn test_in_flight_blocks_until_complete() {
        let mut policy = EscalationPolicy::new(
            &EscalationConfig {
                cooldown_secs: 0.0,
                ..config()
            },
            true,
        );
        let l = labels();
        policy.mark_attempt(0.0);
        assert_eq!(
            policy.evaluate(&input(0.89, &l, None, 10.0)),
            EscalationDecision::Decline(DeclineReason::InFlight)
        );
        policy.complete();
        assert!(policy.should_escalate(&input(0.89, &l, None, 10.0)));
    }

    #[test]
    fn test_static_scene_declines() {
        let policy = EscalationPolicy::new(&config(), true);
        let l = labels();
        assert_eq!(
            policy.evaluate(&input(0.89, &l, Some(10.0), 0.0)),
            EscalationDecision::Decline(DeclineReason::Idle)
        );
        assert!(policy.should_escalate(&input(0.89, &l, Some(35.0), 0.0)));
    }

    #[test]
    fn test_disabled_or_unconfigured_declines_silently() {
        let l = labels();
        let disabled = EscalationPolicy::new(
            &EscalationConfig {
                enabled: false,
                ..config()
            },
            true,
        );
        assert_eq!(
            disabled.evaluate(&input(0.89, &l, None, 0.0)),
            EscalationDecision::Decline(DeclineReason::Disabled)
        );

        let no_client = EscalationPolicy::new(&config(), false);
        assert_eq!(
            no_client.evaluate(&input(0.89, &l, None, 0.0)),
            EscalationDecision::Decline(DeclineReason::NoClient)
        );

        let policy = EscalationPolicy::new(&config(), true);
        assert_eq!(
            policy.evaluate(&input(0.89, &[], None, 0.0)),
            EscalationDecision::Decline(DeclineReason::NoLabels)
        );
    }

    #[test]
    fn test_non_positive_score_never_escalates() {
        let policy = EscalationPolicy {
            trigger_band: 1.0,
            ..EscalationPolicy::new(&config(), true)
        };
        assert!(!policy.in_near_miss_band(0.0, 0.5));
        assert!(policy.in_near_miss_band(0.1, 0.5));
    }

    #[test]
    fn test_reconcile_label() {
        let l = labels();
        assert_eq!(reconcile_label("jump", &l), Some("Jump".to_string()));
        assert_eq!(reconcile_label("  DUCK\n", &l), Some("Duck".to_string()));
        assert_eq!(reconcile_label("NONE", &l), None);
        assert_eq!(reconcile_label("no match", &l), None);
        assert_eq!(reconcile_label("The person is jumping", &l), None);
        assert_eq!(reconcile_label("", &l), None);
    }
}
