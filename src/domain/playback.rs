use serde::{Deserialize, Serialize};

use crate::domain::environment::{EnvironmentProfile, EnvironmentTier};

/// Dynamics compressor parameters, modeled on a Web Audio compressor node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressorSettings {
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_secs: f32,
    pub release_secs: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold_db: -24.0,
            ratio: 12.0,
            attack_secs: 0.003,
            release_secs: 0.25,
        }
    }
}

/// Processing applied to synthesized speech before it reaches the output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputChain {
    pub gain: f32,
    pub compressor: Option<CompressorSettings>,
}

impl OutputChain {
    /// Gain tier for the environment. Embedded hosts on mobile operating
    /// systems attenuate output the most.
    pub fn for_profile(profile: &EnvironmentProfile) -> Self {
        match profile.tier() {
            EnvironmentTier::EmbeddedMobile => Self {
                gain: 3.0,
                compressor: Some(CompressorSettings::default()),
            },
            EnvironmentTier::EmbeddedDesktop => Self {
                gain: 2.0,
                compressor: None,
            },
            EnvironmentTier::MobileBrowser => Self {
                gain: 1.5,
                compressor: None,
            },
            EnvironmentTier::DesktopBrowser => Self {
                gain: 1.0,
                compressor: None,
            },
        }
    }

    /// Scale the gain by a user volume factor.
    #[must_use]
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.gain *= volume.max(0.0);
        self
    }

    /// Run the chain over mono samples in place: compressor, then gain, then
    /// a hard clamp to `[-1, 1]`.
    pub fn process(&self, samples: &mut [f32], sample_rate: u32) {
        if let Some(comp) = self.compressor {
            compress(samples, sample_rate, &comp);
        }
        for s in samples.iter_mut() {
            *s = (*s * self.gain).clamp(-1.0, 1.0);
        }
    }
}

/// Feed-forward peak compressor with a one-pole envelope follower.
fn compress(samples: &mut [f32], sample_rate: u32, settings: &CompressorSettings) {
    let rate = sample_rate.max(1) as f32;
    let attack = (-1.0 / (settings.attack_secs.max(1e-4) * rate)).exp();
    let release = (-1.0 / (settings.release_secs.max(1e-4) * rate)).exp();
    let ratio = settings.ratio.max(1.0);
    let mut envelope = 0.0f32;

    for s in samples.iter_mut() {
        let level = s.abs();
        let coeff = if level > envelope { attack } else { release };
        envelope = coeff * envelope + (1.0 - coeff) * level;

        let level_db = 20.0 * envelope.max(1e-6).log10();
        if level_db > settings.threshold_db {
            let target_db = settings.threshold_db + (level_db - settings.threshold_db) / ratio;
            *s *= 10f32.powf((target_db - level_db) / 20.0);
        }
    }
}
