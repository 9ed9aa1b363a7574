//! HUD (Heads-Up Display) state: the three-resource scoreboard (HP/MP/AP)
//! exposed to observers via `HUD_SYNC`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceBar {
    pub current: f64,
    pub max: f64,
    pub rate: f64,
}

impl ResourceBar {
    pub fn new(max: f64) -> Self {
        Self { current: max, max, rate: 0.0 }
    }

    pub fn decrease(&mut self, amount: f64) {
        self.current = (self.current - amount).max(0.0);
    }

    pub fn increase(&mut self, amount: f64) {
        self.current = (self.current + amount).min(self.max);
    }

    pub fn fraction(&self) -> f64 {
        if self.max <= 0.0 {
            0.0
        } else {
            self.current / self.max
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HudState {
    pub hp: ResourceBar,
    pub mp: ResourceBar,
    pub ap: ResourceBar,
}

impl HudState {
    pub fn new(hp_max: f64, mp_max: f64, ap_max: f64) -> Self {
        Self {
            hp: ResourceBar::new(hp_max),
            mp: ResourceBar::new(mp_max),
            ap: ResourceBar::new(ap_max),
        }
    }
}
