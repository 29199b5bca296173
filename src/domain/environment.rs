use std::time::Duration;

use serde::{Deserialize, Serialize};

/// User-agent markers of in-app browsers whose media permissions do not
/// reliably persist across sessions.
const EMBEDDED_HOST_MARKERS: &[&str] = &["telegram", "micromessenger", "line/", "fban", "fbav", "instagram", "; wv)"];

const MOBILE_MARKERS: &[&str] = &["android", "iphone", "ipad", "ipod", "mobile"];

const IOS_MARKERS: &[&str] = &["iphone", "ipad", "ipod"];

/// Host environment the subsystem runs in.
///
/// Derived once at startup. Drives constraint selection, retry counts,
/// playback gain and the keep-warm policy for the microphone stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvironmentProfile {
    /// Running inside an embedded host WebView (chat-app in-app browser).
    pub is_embedded_host_webview: bool,
    pub is_mobile: bool,
    pub is_ios: bool,
}

impl EnvironmentProfile {
    /// A plain desktop browser.
    pub fn desktop() -> Self {
        Self::default()
    }

    /// Classify a host-provided user-agent string.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        let is_ios = IOS_MARKERS.iter().any(|m| ua.contains(m));
        Self {
            is_embedded_host_webview: EMBEDDED_HOST_MARKERS.iter().any(|m| ua.contains(m)),
            is_mobile: is_ios || MOBILE_MARKERS.iter().any(|m| ua.contains(m)),
            is_ios,
        }
    }

    /// Profile of the compile target, used when the host reports no user agent.
    pub fn from_target() -> Self {
        Self {
            is_embedded_host_webview: false,
            is_mobile: cfg!(any(target_os = "android", target_os = "ios")),
            is_ios: cfg!(target_os = "ios"),
        }
    }

    /// Resolve the profile from an optional user agent and an optional forced
    /// embedded flag (configuration override).
    pub fn detect(user_agent: Option<&str>, force_embedded: Option<bool>) -> Self {
        let mut profile = match user_agent {
            Some(ua) if !ua.trim().is_empty() => Self::from_user_agent(ua),
            _ => Self::from_target(),
        };
        if let Some(embedded) = force_embedded {
            profile.is_embedded_host_webview = embedded;
        }
        profile
    }

    pub fn tier(&self) -> EnvironmentTier {
        match (self.is_embedded_host_webview, self.is_mobile || self.is_ios) {
            (true, true) => EnvironmentTier::EmbeddedMobile,
            (true, false) => EnvironmentTier::EmbeddedDesktop,
            (false, true) => EnvironmentTier::MobileBrowser,
            (false, false) => EnvironmentTier::DesktopBrowser,
        }
    }

    /// The stream may outlive a session only in a fragile host.
    pub fn keeps_stream_warm(&self) -> bool {
        self.is_embedded_host_webview
    }
}

/// Coarse environment buckets used by the policy tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvironmentTier {
    EmbeddedMobile,
    EmbeddedDesktop,
    MobileBrowser,
    DesktopBrowser,
}

/// Constraints passed to the media device when requesting a stream.
///
/// `None` leaves the choice to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u16>,
    pub echo_cancellation: Option<bool>,
    pub noise_suppression: Option<bool>,
    pub auto_gain_control: Option<bool>,
}

impl MediaConstraints {
    pub fn for_profile(profile: &EnvironmentProfile) -> Self {
        if profile.is_embedded_host_webview {
            // Minimal request keeps permission negotiation simple.
            Self {
                sample_rate: Some(16_000),
                channel_count: Some(1),
                echo_cancellation: None,
                noise_suppression: None,
                auto_gain_control: None,
            }
        } else if profile.is_mobile {
            // Processing stages attenuate raw capture on several mobile stacks.
            Self {
                sample_rate: Some(48_000),
                channel_count: Some(1),
                echo_cancellation: Some(false),
                noise_suppression: Some(false),
                auto_gain_control: Some(false),
            }
        } else {
            Self {
                sample_rate: None,
                channel_count: Some(1),
                echo_cancellation: Some(true),
                noise_suppression: Some(true),
                auto_gain_control: Some(true),
            }
        }
    }
}

/// Bounded retry policy for stream acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn for_profile(profile: &EnvironmentProfile) -> Self {
        if profile.is_embedded_host_webview {
            Self {
                max_attempts: 5,
                backoff: Duration::from_millis(1_000),
            }
        } else {
            Self {
                max_attempts: 3,
                backoff: Duration::from_millis(500),
            }
        }
    }
}
