//! Messages exchanged between the controller and consumer sides
//!
//! Messages travel over in-order tokio channels. `ActivateForLoad` must be
//! delivered before the frame commits the load it refers to; a frame that
//! never receives it treats the load as disabled.

use std::fs::File;

use srf_core::ActivationState;
use tokio::sync::mpsc;
use url::Url;

/// Process-wide control messages to a consumer.
#[derive(Debug)]
pub enum ControlMessage {
    /// A read-only handle to the newly published indexed ruleset.
    SetRuleset(File),
}

/// Controller to frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameMessage {
    ActivateForLoad { state: ActivationState, url: Url },
}

/// Frame to controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHostMessage {
    /// Sent at most once per committed document.
    FirstLoadDisallowed,
}

pub type ControlSender = mpsc::UnboundedSender<ControlMessage>;
pub type FrameSender = mpsc::UnboundedSender<FrameMessage>;
pub type FrameHostSender = mpsc::UnboundedSender<FrameHostMessage>;
