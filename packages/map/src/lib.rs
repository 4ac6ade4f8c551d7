#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Client core of the municipal map.
//!
//! A [`MapSession`] owns the feature store, the interaction state machine
//! and the two flows that talk to the backend: [`sync::PersistenceSync`]
//! for plain CRUD and [`reconciler::OptimizationReconciler`] for
//! submitting polygons and merging the optimizer's placements back in.

pub mod config;
pub mod dialogs;
pub mod interaction;
pub mod reconciler;
pub mod session;
pub mod store;
pub mod sync;

use citymap_capacity::CapacityError;

pub use config::{MapConfig, MapOptions};
pub use dialogs::Dialogs;
pub use session::{MapSession, SessionError};
pub use store::{Feature, GeometryStore};

/// Input refused locally, before any backend call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The name is empty after trimming.
    #[error("Name must not be empty")]
    EmptyName,

    /// The name spans several lines.
    #[error("Name must be a single line")]
    MultilineName,

    /// The name is longer than the configured limit.
    #[error("Name is {len} characters long; the limit is {max}")]
    NameTooLong {
        /// Characters in the name.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// A placement count of zero was requested.
    #[error("Placement count must be positive")]
    NonPositiveCount,

    /// Only polygons can be optimized.
    #[error("Only polygons can be submitted for optimization")]
    NotAPolygon,

    /// The capacity parameters were refused.
    #[error(transparent)]
    Capacity(#[from] CapacityError),
}
