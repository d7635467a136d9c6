//! Ordered list of named steps, driven one step per message.

use super::{Dialogue, Outcome, StepState, TurnInput};
use anyhow::anyhow;
use async_trait::async_trait;

/// What a script step asks the driver to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Wait for the next message, then run the following step. Finishes after the last step.
    Next,
    /// Wait for the next message, then run this step again (e.g. input was invalid).
    Repeat,
    /// Wait for the next message, then run the named step.
    Goto(String),
    /// End the dialogue now.
    Finish,
}

type StepFn = Box<dyn Fn(&mut StepState, &TurnInput<'_>) -> anyhow::Result<StepAction> + Send + Sync>;

/// A [`Dialogue`] built from named steps. The step to run next is kept as the state's stage tag.
#[derive(Default)]
pub struct Script {
    steps: Vec<(String, StepFn)>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. The first step runs on the first message.
    pub fn step<F>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: Fn(&mut StepState, &TurnInput<'_>) -> anyhow::Result<StepAction> + Send + Sync + 'static,
    {
        self.steps.push((name.into(), Box::new(run)));
        self
    }

    pub fn step_names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|(name, _)| name.as_str())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|(n, _)| n == name)
    }
}

#[async_trait]
impl Dialogue for Script {
    async fn advance(&self, state: &mut StepState, turn: &TurnInput<'_>) -> anyhow::Result<Outcome> {
        let index = match state.stage() {
            None => 0,
            Some(stage) => self
                .position(stage)
                .ok_or_else(|| anyhow!("unknown step '{}'", stage))?,
        };
        let Some((name, run)) = self.steps.get(index) else {
            return Ok(Outcome::Finished);
        };
        let name = name.clone();

        match run(state, turn)? {
            StepAction::Next => match self.steps.get(index + 1) {
                Some((next, _)) => {
                    state.set_stage(next.clone());
                    Ok(Outcome::Suspended)
                }
                None => Ok(Outcome::Finished),
            },
            StepAction::Repeat => {
                state.set_stage(name);
                Ok(Outcome::Suspended)
            }
            StepAction::Goto(target) => {
                if self.position(&target).is_none() {
                    anyhow::bail!("step '{}' jumps to unknown step '{}'", name, target);
                }
                state.set_stage(target);
                Ok(Outcome::Suspended)
            }
            StepAction::Finish => Ok(Outcome::Finished),
        }
    }
}
