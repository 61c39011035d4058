//! Offer/answer completion sequencing.
//!
//! Decides what follows a successful create or set call. Engine calls are
//! made by the orchestrator; this type only holds the local description and
//! the remote candidate queue, and answers "what now".

use crate::candidates::CandidateQueue;
use call_core::{IceCandidate, Role, SessionDescription};
use log::{debug, warn};

/// Which descriptions the engine reports as applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptionView {
    pub has_local: bool,
    pub has_remote: bool,
}

/// Follow-up work after a successful set call.
#[derive(Debug, Clone, PartialEq)]
pub enum SdpAction {
    /// The local description can be sent to the peer
    PublishLocal(SessionDescription),
    /// Hand these remote candidates to the engine, in order
    AddCandidates(Vec<IceCandidate>),
    /// Remote offer applied; an answer is needed
    CreateAnswer,
}

#[derive(Debug)]
pub struct SdpExchange {
    role: Role,
    local: Option<SessionDescription>,
    candidates: CandidateQueue,
}

impl SdpExchange {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            local: None,
            candidates: CandidateQueue::new(),
        }
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local.as_ref()
    }

    /// Remember a freshly created local description. The local description
    /// is set once; a second one is refused.
    pub fn on_create_success(&mut self, description: SessionDescription) -> bool {
        if self.local.is_some() {
            warn!("Local description already created, ignoring another");
            return false;
        }
        debug!("Local {:?} created", description.sdp_type);
        self.local = Some(description);
        true
    }

    /// Work to do after the engine applied a description.
    pub fn on_set_success(&mut self, view: DescriptionView) -> Vec<SdpAction> {
        match self.role {
            Role::Offerer => {
                if !view.has_remote {
                    // Local offer set, answer not known yet
                    self.local
                        .clone()
                        .map(SdpAction::PublishLocal)
                        .into_iter()
                        .collect()
                } else {
                    vec![SdpAction::AddCandidates(self.candidates.drain())]
                }
            }
            Role::Answerer => {
                if view.has_local {
                    let mut actions: Vec<SdpAction> = self
                        .local
                        .clone()
                        .map(SdpAction::PublishLocal)
                        .into_iter()
                        .collect();
                    actions.push(SdpAction::AddCandidates(self.candidates.drain()));
                    actions
                } else {
                    vec![SdpAction::CreateAnswer]
                }
            }
        }
    }

    /// Returns the candidate when it may go to the engine right away, or
    /// queues it until the drain.
    pub fn accept_remote_candidate(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.candidates.is_drained() {
            Some(candidate)
        } else {
            self.candidates.push(candidate);
            debug!("Queued remote candidate ({} pending)", self.candidates.len());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u16) -> IceCandidate {
        IceCandidate::new(format!("candidate:{}", n), None, Some(0))
    }

    const LOCAL_ONLY: DescriptionView = DescriptionView {
        has_local: true,
        has_remote: false,
    };
    const BOTH: DescriptionView = DescriptionView {
        has_local: true,
        has_remote: true,
    };

    #[test]
    fn local_description_is_created_once() {
        let mut sdp = SdpExchange::new(Role::Offerer);
        assert!(sdp.on_create_success(SessionDescription::offer("v=0 first")));
        assert!(!sdp.on_create_success(SessionDescription::offer("v=0 second")));
        assert_eq!(sdp.local_description().unwrap().sdp, "v=0 first");
    }

    #[test]
    fn offerer_publishes_then_drains() {
        let mut sdp = SdpExchange::new(Role::Offerer);
        let offer = SessionDescription::offer("v=0");
        sdp.on_create_success(offer.clone());

        assert!(sdp.accept_remote_candidate(candidate(1)).is_none());
        assert_eq!(
            sdp.on_set_success(LOCAL_ONLY),
            vec![SdpAction::PublishLocal(offer)]
        );

        assert!(sdp.accept_remote_candidate(candidate(2)).is_none());
        assert_eq!(
            sdp.on_set_success(BOTH),
            vec![SdpAction::AddCandidates(vec![candidate(1), candidate(2)])]
        );

        // After the drain candidates pass straight through
        assert_eq!(sdp.accept_remote_candidate(candidate(3)), Some(candidate(3)));
    }

    #[test]
    fn offerer_with_remote_first_drains_instead_of_publishing() {
        let mut sdp = SdpExchange::new(Role::Offerer);
        sdp.on_create_success(SessionDescription::offer("v=0"));
        sdp.accept_remote_candidate(candidate(1));

        assert_eq!(
            sdp.on_set_success(BOTH),
            vec![SdpAction::AddCandidates(vec![candidate(1)])]
        );
    }

    #[test]
    fn answerer_waits_for_local_answer() {
        let mut sdp = SdpExchange::new(Role::Answerer);
        sdp.accept_remote_candidate(candidate(1));

        let remote_only = DescriptionView {
            has_local: false,
            has_remote: true,
        };
        assert_eq!(sdp.on_set_success(remote_only), vec![SdpAction::CreateAnswer]);

        let answer = SessionDescription::answer("v=0");
        sdp.on_create_success(answer.clone());
        assert_eq!(
            sdp.on_set_success(BOTH),
            vec![
                SdpAction::PublishLocal(answer),
                SdpAction::AddCandidates(vec![candidate(1)]),
            ]
        );
    }
}
