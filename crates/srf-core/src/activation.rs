//! Activation state, configuration and per-navigation decision
//!
//! The decision is made once per main-frame navigation from an explicit
//! [`ActivationConfig`] and the safe-browsing verdicts collected for the
//! navigation's redirect chain. Subframes inherit the result unchanged.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::url::is_http_or_https;

// =============================================================================
// Activation State
// =============================================================================

/// Per-document enablement level. Ordered, so `max` picks the stronger one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationState {
    #[default]
    Disabled,
    /// Rules are evaluated and counted but never block
    DryRun,
    Enabled,
}

impl ActivationState {
    /// Case-insensitive; anything unrecognized is `Disabled`.
    pub fn from_param(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "dryrun" => Self::DryRun,
            "enabled" => Self::Enabled,
            _ => Self::Disabled,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::DryRun => "dryrun",
            Self::Enabled => "enabled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationScope {
    #[default]
    NoSites,
    AllSites,
    ActivationList,
}

impl ActivationScope {
    pub fn from_param(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "all_sites" => Self::AllSites,
            "activation_list" => Self::ActivationList,
            _ => Self::NoSites,
        }
    }
}

/// Safe-browsing list a navigation can be activated by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationList {
    SocialEngAdsInterstitial,
    PhishingInterstitial,
}

impl ActivationList {
    pub fn from_param(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "social_engineering_ads_interstitial" => Some(Self::SocialEngAdsInterstitial),
            "phishing_interstitial" => Some(Self::PhishingInterstitial),
            _ => None,
        }
    }

    /// Comma-separated list; unknown tokens are ignored and
    /// `phishing_interstitial` wins when both lists are named.
    pub fn from_param_list(value: &str) -> Option<Self> {
        let mut result = None;
        for list in value.split(',').filter_map(Self::from_param) {
            if list == Self::PhishingInterstitial {
                return Some(list);
            }
            result = Some(list);
        }
        result
    }
}

// =============================================================================
// Safe Browsing Verdicts
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreatType {
    Phishing,
    Malware,
    UnwantedSoftware,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreatPatternType {
    #[default]
    None,
    SocialEngineeringAds,
    SocialEngineeringLanding,
    MalwareLanding,
    MalwareDistribution,
}

/// Map one blacklist verdict to the activation list it belongs to.
pub fn activation_list_for_threat(threat: ThreatType, pattern: ThreatPatternType) -> Option<ActivationList> {
    match (threat, pattern) {
        (ThreatType::Phishing, ThreatPatternType::SocialEngineeringAds) => {
            Some(ActivationList::SocialEngAdsInterstitial)
        }
        (ThreatType::Phishing, _) => Some(ActivationList::PhishingInterstitial),
        _ => None,
    }
}

// =============================================================================
// Configuration
// =============================================================================

pub mod params {
    pub const ACTIVATION_STATE: &str = "activation_state";
    pub const ACTIVATION_SCOPE: &str = "activation_scope";
    pub const ACTIVATION_LISTS: &str = "activation_lists";
    pub const PERFORMANCE_MEASUREMENT_RATE: &str = "performance_measurement_rate";
    pub const WHITELIST_SITE_ON_RELOAD: &str = "whitelist_site_on_reload";
}

/// Explicit activation configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActivationConfig {
    pub activation_state: ActivationState,
    pub activation_scope: ActivationScope,
    pub activation_list: Option<ActivationList>,
    /// Probability in [0, 1] that a document load measures performance
    pub performance_measurement_rate: f64,
    pub whitelist_site_on_reload: bool,
}

impl ActivationConfig {
    /// Build from the feature flag state and its string parameters.
    pub fn from_feature_params(feature_enabled: bool, params: &HashMap<String, String>) -> Self {
        if !feature_enabled {
            return Self::default();
        }
        let get = |key: &str| params.get(key).map(String::as_str).unwrap_or("");

        let performance_measurement_rate = get(params::PERFORMANCE_MEASUREMENT_RATE)
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|rate| rate.is_finite())
            .map(|rate| rate.clamp(0.0, 1.0))
            .unwrap_or(0.0);

        Self {
            activation_state: ActivationState::from_param(get(params::ACTIVATION_STATE)),
            activation_scope: ActivationScope::from_param(get(params::ACTIVATION_SCOPE)),
            activation_list: ActivationList::from_param_list(get(params::ACTIVATION_LISTS)),
            performance_measurement_rate,
            whitelist_site_on_reload: get(params::WHITELIST_SITE_ON_RELOAD).trim().eq_ignore_ascii_case("true"),
        }
    }

    /// `sample` is a uniform draw from [0, 1).
    pub fn should_measure_performance(&self, sample: f64) -> bool {
        sample < self.performance_measurement_rate
    }

    /// Decide the activation state of a main-frame navigation.
    ///
    /// `list_hits` are the activation lists matched by the navigation URL or
    /// any of its redirects.
    pub fn compute_activation_state(
        &self,
        url: &Url,
        list_hits: &[ActivationList],
        is_reload: bool,
        whitelist: &mut SiteWhitelist,
    ) -> ActivationState {
        if self.activation_state == ActivationState::Disabled || !is_http_or_https(url) {
            return ActivationState::Disabled;
        }

        if is_reload && self.whitelist_site_on_reload {
            whitelist.add(url);
            log::debug!("Reload whitelisted {}", url.host_str().unwrap_or(""));
            return ActivationState::Disabled;
        }

        if whitelist.contains(url) {
            return ActivationState::Disabled;
        }

        let activated = match self.activation_scope {
            ActivationScope::NoSites => false,
            ActivationScope::AllSites => true,
            ActivationScope::ActivationList => self
                .activation_list
                .is_some_and(|list| list_hits.contains(&list)),
        };

        if activated {
            self.activation_state
        } else {
            ActivationState::Disabled
        }
    }
}

// =============================================================================
// Site Whitelist
// =============================================================================

/// Hosts the user dismissed the filtering prompt for.
#[derive(Debug, Clone, Default)]
pub struct SiteWhitelist {
    hosts: HashSet<String>,
}

impl SiteWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, url: &Url) {
        if let Some(host) = url.host_str() {
            self.hosts.insert(host.to_ascii_lowercase());
        }
    }

    pub fn add_host(&mut self, host: &str) {
        self.hosts.insert(host.to_ascii_lowercase());
    }

    pub fn contains(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| self.hosts.contains(host))
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
