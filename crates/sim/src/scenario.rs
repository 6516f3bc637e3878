//! Scenario definitions consumed by the session core.
//!
//! Scenarios are authored, validated and stored elsewhere; the core
//! receives them fully formed, holds them behind `Arc`, and never mutates
//! them. Validation here is limited to referential checks performed by the
//! decision engine (does the submitted decision/option id exist).

use std::sync::Arc;

use crate::DecisionId;

/// An ordered crisis scenario: the timeline participants walk through.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    /// Ordered decision points. `Player::current_step` indexes into this.
    pub timeline: Vec<Decision>,
}

impl Scenario {
    /// Decision point at a given step, if the step is still on the
    /// timeline.
    pub fn decision_at(&self, step: usize) -> Option<&Decision> {
        self.timeline.get(step)
    }

    pub fn len(&self) -> usize {
        self.timeline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }
}

/// One scripted decision point.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub id: DecisionId,
    /// Situation text shown to participants.
    pub prompt: String,
    /// Seconds the participant has to answer. Enforced by the UI, not
    /// by the engine.
    pub time_limit_secs: u32,
    pub options: Vec<DecisionOption>,
    /// Resources the scenario author expects participants to have at hand.
    pub required_resources: Vec<Resource>,
}

impl Decision {
    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

/// One selectable answer on a decision point.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOption {
    pub id: String,
    pub text: String,
}

/// A resource a decision point references (runbook, contact, tool).
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub required: bool,
}

/// Source of immutable scenario definitions. Implemented outside the
/// core (YAML store, bundled fixtures); the core only reads.
pub trait ScenarioProvider {
    fn load(&self) -> Vec<Arc<Scenario>>;
}
