//! User prompts the interaction flows suspend on.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

/// Asynchronous prompts. `None` / `false` means the user dismissed the
/// prompt.
#[async_trait]
pub trait Dialogs: Send + Sync {
    /// Asks for a feature name.
    async fn request_name(&self, prompt: &str) -> Option<String>;

    /// Asks for a circle radius in meters.
    async fn request_radius(&self) -> Option<f64>;

    /// Asks a yes/no question.
    async fn confirm(&self, message: &str) -> bool;
}

/// Answers prompts from queues filled in advance. Unanswered prompts are
/// treated as dismissed.
#[derive(Debug, Default)]
pub struct ScriptedDialogs {
    names: Mutex<VecDeque<Option<String>>>,
    radii: Mutex<VecDeque<Option<f64>>>,
    confirms: Mutex<VecDeque<bool>>,
}

impl ScriptedDialogs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an answer to the next name prompt.
    #[must_use]
    pub fn name(self, answer: Option<&str>) -> Self {
        push(&self.names, answer.map(str::to_string));
        self
    }

    /// Queues an answer to the next radius prompt.
    #[must_use]
    pub fn radius(self, answer: Option<f64>) -> Self {
        push(&self.radii, answer);
        self
    }

    /// Queues an answer to the next confirmation.
    #[must_use]
    pub fn confirm_with(self, answer: bool) -> Self {
        push(&self.confirms, answer);
        self
    }
}

fn push<T>(queue: &Mutex<VecDeque<T>>, value: T) {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push_back(value);
}

fn pop<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
}

#[async_trait]
impl Dialogs for ScriptedDialogs {
    async fn request_name(&self, prompt: &str) -> Option<String> {
        log::debug!("Prompt: {prompt}");
        pop(&self.names).flatten()
    }

    async fn request_radius(&self) -> Option<f64> {
        pop(&self.radii).flatten()
    }

    async fn confirm(&self, message: &str) -> bool {
        log::debug!("Confirm: {message}");
        pop(&self.confirms).unwrap_or(false)
    }
}
