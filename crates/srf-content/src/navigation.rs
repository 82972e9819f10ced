//! Controller-side activation for one navigation
//!
//! Collects the main-frame URL, its redirects and any safe-browsing
//! verdicts, then decides the activation state when the navigation is
//! ready to commit and sends it to the frame ahead of the commit.

use srf_core::activation::{activation_list_for_threat, SiteWhitelist, ThreatPatternType, ThreatType};
use srf_core::{ActivationConfig, ActivationList, ActivationState};
use url::Url;

use crate::protocol::{FrameMessage, FrameSender};

#[derive(Debug, Clone)]
pub struct NavigationActivationDriver {
    url: Url,
    /// URLs redirected away from, oldest first.
    redirect_chain: Vec<Url>,
    list_hits: Vec<ActivationList>,
    is_reload: bool,
}

impl NavigationActivationDriver {
    pub fn new(url: Url, is_reload: bool) -> Self {
        Self {
            url,
            redirect_chain: Vec::new(),
            list_hits: Vec::new(),
            is_reload,
        }
    }

    pub fn did_redirect(&mut self, url: Url) {
        let previous = std::mem::replace(&mut self.url, url);
        self.redirect_chain.push(previous);
    }

    /// Record a safe-browsing verdict for any URL in the redirect chain.
    pub fn on_safe_browsing_verdict(&mut self, url: &Url, threat_type: ThreatType, pattern_type: ThreatPatternType) {
        if self.url != *url && !self.redirect_chain.contains(url) {
            log::debug!("Ignoring verdict for {} outside the redirect chain", url);
            return;
        }
        if let Some(list) = activation_list_for_threat(threat_type, pattern_type) {
            if !self.list_hits.contains(&list) {
                self.list_hits.push(list);
            }
        }
    }

    /// The URL the navigation will commit.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn list_hits(&self) -> &[ActivationList] {
        &self.list_hits
    }

    /// Decide the state and send `ActivateForLoad` to the main frame.
    pub fn ready_to_commit(
        &self,
        config: &ActivationConfig,
        whitelist: &mut SiteWhitelist,
        frame: &FrameSender,
    ) -> ActivationState {
        let url = self.url();
        let state = config.compute_activation_state(url, &self.list_hits, self.is_reload, whitelist);
        log::debug!("Main frame activation for {}: {}", url, state.as_str());
        send_activation(frame, state, url);
        state
    }

    /// Subframes inherit the activation state of their page.
    pub fn ready_to_commit_subframe(page_state: ActivationState, url: &Url, frame: &FrameSender) {
        send_activation(frame, page_state, url);
    }
}

fn send_activation(frame: &FrameSender, state: ActivationState, url: &Url) {
    let message = FrameMessage::ActivateForLoad { state, url: url.clone() };
    if frame.send(message).is_err() {
        log::debug!("Frame went away before activation for {}", url);
    }
}
