#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for the city map client.
//!
//! [`init_logger`] sets up `indicatif-log-bridge` so that `log::info!` and
//! friends are suspended while spinners redraw, [`spinner`] wraps a backend
//! call in a spinner, and [`TerminalDialogs`] answers the map's prompts on
//! the terminal.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use citymap_map::Dialogs;
use dialoguer::{Confirm, Input};
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while spinners redraw.
///
/// Returns the [`MultiProgress`] that all spinners must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // Already set in tests

    log::set_max_level(level);

    multi
}

/// Shows a spinner with `message` while `work` runs.
pub async fn spinner<F, T>(multi: &MultiProgress, message: &str, work: F) -> T
where
    F: Future<Output = T>,
{
    let bar = multi.add(ProgressBar::new_spinner());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());

    let result = work.await;
    bar.finish_and_clear();
    result
}

/// Prompts on the terminal. A failed or interrupted prompt counts as
/// dismissed.
pub struct TerminalDialogs {
    multi: MultiProgress,
    max_name_len: usize,
}

impl TerminalDialogs {
    #[must_use]
    pub const fn new(multi: MultiProgress, max_name_len: usize) -> Self {
        Self {
            multi,
            max_name_len,
        }
    }
}

#[async_trait]
impl Dialogs for TerminalDialogs {
    async fn request_name(&self, prompt: &str) -> Option<String> {
        let max = self.max_name_len;
        let answer = self.multi.suspend(|| {
            Input::<String>::new()
                .with_prompt(format!("{prompt} (empty to cancel, max {max} characters)"))
                .allow_empty(true)
                .interact_text()
        });
        match answer {
            Ok(name) if name.trim().is_empty() => None,
            Ok(name) => Some(name),
            Err(e) => {
                log::debug!("Name prompt dismissed: {e}");
                None
            }
        }
    }

    async fn request_radius(&self) -> Option<f64> {
        let answer = self.multi.suspend(|| {
            Input::<String>::new()
                .with_prompt("Radius in meters (empty to cancel)")
                .allow_empty(true)
                .interact_text()
        });
        answer.ok().as_deref().and_then(parse_radius)
    }

    async fn confirm(&self, message: &str) -> bool {
        self.multi
            .suspend(|| Confirm::new().with_prompt(message).default(false).interact())
            .unwrap_or(false)
    }
}

/// Parses a radius answer. Blank, non-numeric and non-positive answers
/// dismiss the prompt.
fn parse_radius(answer: &str) -> Option<f64> {
    let radius = answer.trim().parse::<f64>().ok()?;
    (radius.is_finite() && radius > 0.0).then_some(radius)
}
