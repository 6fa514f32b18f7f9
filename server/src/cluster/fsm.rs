//! Finite state machine for an application release
//!
//! A release is the Service/Deployment pair owned by one application name.
//! Each redeploy walks `Present -> Deleting -> Absent -> Creating -> Present`.

use serde::{Deserialize, Serialize};

/// Release state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseState {
    /// No objects exist for the application
    Absent,

    /// Service and deployment are being created
    Creating,

    /// At least one object exists
    Present,

    /// Prior objects are being removed
    Deleting,

    /// Last transition failed part-way
    Failed,
}

/// Release event
#[derive(Debug, Clone)]
pub enum ReleaseEvent {
    /// Start removing existing objects
    Delete,

    /// Existing objects are gone
    Deleted,

    /// Start creating objects
    Create,

    /// Both objects created
    Created,

    /// Transition failed
    Failed(String),
}

/// Release FSM
#[derive(Debug, Clone)]
pub struct ReleaseFsm {
    state: ReleaseState,
    error: Option<String>,
    revision: u64,
}

impl ReleaseFsm {
    pub fn new() -> Self {
        Self {
            state: ReleaseState::Absent,
            error: None,
            revision: 0,
        }
    }

    pub fn state(&self) -> &ReleaseState {
        &self.state
    }

    /// Error of the last failed transition
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of successful creates since startup
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Resynchronize with what the cluster actually holds.
    ///
    /// The cluster is the source of truth, so this is accepted from any state,
    /// including one left behind by an interrupted transition.
    pub fn observe(&mut self, objects_present: bool) {
        self.state = if objects_present {
            ReleaseState::Present
        } else {
            ReleaseState::Absent
        };
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: ReleaseEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (ReleaseState::Present, ReleaseEvent::Delete)
            | (ReleaseState::Failed, ReleaseEvent::Delete) => ReleaseState::Deleting,

            (ReleaseState::Deleting, ReleaseEvent::Deleted) => ReleaseState::Absent,

            (ReleaseState::Absent, ReleaseEvent::Create)
            | (ReleaseState::Failed, ReleaseEvent::Create) => {
                self.error = None;
                ReleaseState::Creating
            }

            (ReleaseState::Creating, ReleaseEvent::Created) => {
                self.revision += 1;
                ReleaseState::Present
            }

            (ReleaseState::Deleting, ReleaseEvent::Failed(err))
            | (ReleaseState::Creating, ReleaseEvent::Failed(err)) => {
                self.error = Some(err.clone());
                ReleaseState::Failed
            }

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }

    /// Whether a transition is in flight
    pub fn in_transition(&self) -> bool {
        matches!(self.state, ReleaseState::Creating | ReleaseState::Deleting)
    }
}

impl Default for ReleaseFsm {
    fn default() -> Self {
        Self::new()
    }
}
