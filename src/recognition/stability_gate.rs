// src/recognition/stability_gate.rs
//
// Debounce + cooldown over the per-frame label stream.
//
//   Idle ──label──▶ Accumulating ──confirm_frames hits──▶ Confirmed ──cooldown ok──▶ fire
//     ▲                  │                                                          │
//     └──── other label resets streak to 1 ◀──────────── count reset to 0 ◀────────┘
//
// A fire resets the streak to zero, so a held pose must be re-confirmed
// before it can fire again even after the cooldown elapsed.

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Consecutive identical labels needed before firing
    pub confirm_frames: u32,
    /// Minimum seconds between two fires
    pub cooldown_secs: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            confirm_frames: 4,
            cooldown_secs: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Accumulating,
    Confirmed,
}

/// A label the gate decided to emit.
#[derive(Debug, Clone, PartialEq)]
pub struct GateFire {
    pub label: String,
    pub score: f32,
}

pub struct StabilityGate {
    config: GateConfig,
    candidate: Option<String>,
    consecutive: u32,
    last_fire: Option<f64>,
}

impl StabilityGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            candidate: None,
            consecutive: 0,
            last_fire: None,
        }
    }

    /// Feed one frame's label. Returns the label to fire, if any.
    ///
    /// `detect_enabled` is the external arm switch; the streak keeps
    /// counting while disarmed but nothing fires.
    pub fn update(
        &mut self,
        label: Option<&str>,
        score: f32,
        now: f64,
        detect_enabled: bool,
    ) -> Option<GateFire> {
        if label == self.candidate.as_deref() {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.candidate = label.map(str::to_string);
            self.consecutive = if label.is_some() { 1 } else { 0 };
        }

        if !detect_enabled || self.state() != GateState::Confirmed || !self.cooldown_elapsed(now)
        {
            return None;
        }

        let label = self.candidate.clone()?;
        self.last_fire = Some(now);
        self.consecutive = 0;
        Some(GateFire { label, score })
    }

    pub fn state(&self) -> GateState {
        match self.candidate {
            None => GateState::Idle,
            Some(_) if self.consecutive == 0 => GateState::Idle,
            Some(_) if self.consecutive >= self.config.confirm_frames => GateState::Confirmed,
            Some(_) => GateState::Accumulating,
        }
    }

    pub fn candidate(&self) -> Option<&str> {
        self.candidate.as_deref()
    }

    pub fn consecutive_count(&self) -> u32 {
        self.consecutive
    }

    pub fn last_fire(&self) -> Option<f64> {
        self.last_fire
    }

    /// Seconds until the next fire is allowed (0 when ready).
    pub fn cooldown_left(&self, now: f64) -> f64 {
        match self.last_fire {
            Some(t) => (self.config.cooldown_secs - (now - t)).max(0.0),
            None => 0.0,
        }
    }

    fn cooldown_elapsed(&self, now: f64) -> bool {
        match self.last_fire {
            Some(t) => now - t >= self.config.cooldown_secs,
            None => true,
        }
    }
}
