//! Linear ADSR envelope

/// Envelope times in seconds, sustain as a level
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adsr {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Default for Adsr {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone, Default)]
pub struct Envelope {
    stage: Stage,
    level: f32,
    /// Per-sample decrement while releasing, fixed at note-off
    release_step: f32,
}

impl Envelope {
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_active(&self) -> bool {
        self.stage != Stage::Idle
    }

    /// Restart from zero
    pub fn trigger(&mut self) {
        self.stage = Stage::Attack;
        self.level = 0.0;
    }

    pub fn release(&mut self, adsr: &Adsr, sample_rate: f32) {
        if matches!(self.stage, Stage::Idle | Stage::Release) {
            return;
        }
        self.stage = Stage::Release;
        let frames = (adsr.release * sample_rate).max(1.0);
        self.release_step = self.level / frames;
    }

    pub fn kill(&mut self) {
        self.stage = Stage::Idle;
        self.level = 0.0;
    }

    #[inline]
    pub fn next_level(&mut self, adsr: &Adsr, sample_rate: f32) -> f32 {
        match self.stage {
            Stage::Idle => {}
            Stage::Attack => {
                let frames = (adsr.attack * sample_rate).max(1.0);
                self.level += 1.0 / frames;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                }
            }
            Stage::Decay => {
                let sustain = adsr.sustain.clamp(0.0, 1.0);
                let frames = (adsr.decay * sample_rate).max(1.0);
                self.level -= (1.0 - sustain) / frames;
                if self.level <= sustain {
                    self.level = sustain;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Sustain => {
                self.level = adsr.sustain.clamp(0.0, 1.0);
            }
            Stage::Release => {
                self.level -= self.release_step;
                if self.level <= 0.0 || self.release_step <= 0.0 {
                    self.kill();
                }
            }
        }
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 1000.0;

    #[test]
    fn test_full_cycle() {
        let adsr = Adsr::default();
        let mut env = Envelope::default();
        env.trigger();

        // 10 ms attack at 1 kHz (one extra step for rounding)
        for _ in 0..12 {
            env.next_level(&adsr, SR);
        }
        assert_eq!(env.stage(), Stage::Decay);

        for _ in 0..200 {
            env.next_level(&adsr, SR);
        }
        assert_eq!(env.stage(), Stage::Sustain);
        assert!((env.level() - 0.7).abs() < 1e-6);

        env.release(&adsr, SR);
        for _ in 0..199 {
            env.next_level(&adsr, SR);
        }
        assert!(env.is_active());
        for _ in 0..5 {
            env.next_level(&adsr, SR);
        }
        assert!(!env.is_active());
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn test_release_during_attack_fades_from_current_level() {
        let adsr = Adsr::default();
        let mut env = Envelope::default();
        env.trigger();
        for _ in 0..5 {
            env.next_level(&adsr, SR);
        }
        let level = env.level();
        env.release(&adsr, SR);
        let next = env.next_level(&adsr, SR);
        assert!(next < level);
    }

    #[test]
    fn test_idle_is_silent() {
        let mut env = Envelope::default();
        assert_eq!(env.next_level(&Adsr::default(), SR), 0.0);
        env.release(&Adsr::default(), SR);
        assert!(!env.is_active());
    }
}
