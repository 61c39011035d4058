use call_core::{NegotiationPhase, PhaseEvent, Rejection, Role};
use log::{debug, warn};

/// Negotiation phase of one session. [`apply`] is the only way to change it.
///
/// [`apply`]: PhaseMachine::apply
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    role: Role,
    phase: NegotiationPhase,
}

impl PhaseMachine {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            phase: NegotiationPhase::Idle,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    /// Phase `event` would lead to, without moving.
    pub fn next(&self, event: PhaseEvent) -> Result<NegotiationPhase, Rejection> {
        use call_core::NegotiationPhase::*;
        use call_core::PhaseEvent::*;

        let next = match (self.role, self.phase, event) {
            (Role::Offerer, Idle, Prepare) => Some(OfferPending),
            (Role::Offerer, OfferPending, CreateOffer) => Some(CreatingOffer),
            (Role::Offerer, CreatingOffer, LocalOfferApplied) => Some(LocalOfferSet),
            (Role::Offerer, LocalOfferSet, RemoteAnswerApplied) => Some(ConnectPending),

            (Role::Answerer, Idle, Prepare) => Some(AnswerPending),
            (Role::Answerer, AnswerPending, RemoteOfferApplied) => Some(RemoteOfferSet),
            (Role::Answerer, RemoteOfferSet, CreateAnswer) => Some(CreatingAnswer),
            (Role::Answerer, CreatingAnswer, LocalAnswerApplied) => Some(ConnectPending),

            (_, Idle | Failed, Fail) => None,
            (_, _, Fail) => Some(Failed),
            (_, Idle, Teardown) => None,
            (_, _, Teardown) => Some(Idle),

            _ => None,
        };

        next.ok_or(Rejection::InvalidStateTransition {
            phase: self.phase,
            event,
        })
    }

    /// Move on `event`, or leave the phase untouched and report why not.
    pub fn apply(&mut self, event: PhaseEvent) -> Result<NegotiationPhase, Rejection> {
        match self.next(event) {
            Ok(next) => {
                debug!("{} phase {:?} -> {:?} on {:?}", self.role, self.phase, next, event);
                self.phase = next;
                Ok(next)
            }
            Err(rejection) => {
                warn!("{} {}", self.role, rejection);
                Err(rejection)
            }
        }
    }
}
