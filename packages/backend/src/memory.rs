//! In-process [`GeometryBackend`] that keeps rows in memory.
//!
//! Records every call in order, can be told to fail specific operations,
//! and yields to the scheduler inside each call so concurrent callers
//! interleave the way they would against a real server.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use citymap_geometry_models::{LocationRecord, LocationUpdate, NewLocation, OptimizeParams, OptimizedPoint};

use crate::{BackendError, GeometryBackend};

/// Backend operations, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    /// `list_locations`.
    List,
    /// `create_location`.
    Create,
    /// `update_location`.
    Update,
    /// `delete_location`.
    Delete,
    /// `create_locations`.
    CreateRange,
    /// `optimize`.
    Optimize,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    /// Listed all rows.
    List,
    /// Created a row with this name.
    Create {
        /// Requested name.
        name: String,
    },
    /// Updated a row.
    Update {
        /// Target id.
        id: i64,
        /// New WKT.
        wkt: String,
    },
    /// Deleted a row.
    Delete {
        /// Target id.
        id: i64,
    },
    /// Bulk-created rows with these names.
    CreateRange {
        /// Requested names, in order.
        names: Vec<String>,
    },
    /// Asked for an optimization.
    Optimize {
        /// Polygon WKT sent.
        wkt: String,
        /// Requested placement count.
        new_bin_count: u32,
    },
}

impl BackendCall {
    /// The operation this call belongs to.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::List => Operation::List,
            Self::Create { .. } => Operation::Create,
            Self::Update { .. } => Operation::Update,
            Self::Delete { .. } => Operation::Delete,
            Self::CreateRange { .. } => Operation::CreateRange,
            Self::Optimize { .. } => Operation::Optimize,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    rows: BTreeMap<i64, LocationRecord>,
    next_id: i64,
    calls: Vec<BackendCall>,
    fail_next: Vec<Operation>,
    fail_always: BTreeSet<Operation>,
    optimize_response: Vec<OptimizedPoint>,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-memory [`GeometryBackend`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    /// An empty backend whose ids start at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend pre-populated with `rows`. New ids continue after the
    /// largest given id.
    #[must_use]
    pub fn with_rows(rows: impl IntoIterator<Item = LocationRecord>) -> Self {
        let backend = Self::new();
        {
            let mut state = backend.lock();
            for row in rows {
                state.next_id = state.next_id.max(row.id);
                state.rows.insert(row.id, row);
            }
        }
        backend
    }

    /// Sets the points the next optimize calls return.
    pub fn set_optimize_response(&self, points: Vec<OptimizedPoint>) {
        self.lock().optimize_response = points;
    }

    /// Makes the next call of `operation` fail with HTTP 500.
    pub fn fail_next(&self, operation: Operation) {
        self.lock().fail_next.push(operation);
    }

    /// Makes every call of `operation` fail with HTTP 500 until cleared.
    pub fn fail_always(&self, operation: Operation) {
        self.lock().fail_always.insert(operation);
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_next.clear();
        state.fail_always.clear();
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    /// Number of calls of `operation` so far.
    #[must_use]
    pub fn count(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    /// Current stored rows, ordered by id.
    #[must_use]
    pub fn rows(&self) -> Vec<LocationRecord> {
        self.lock().rows.values().cloned().collect()
    }

    /// Largest number of calls that were in flight at once.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `call`, yields once, then checks injected failures.
    async fn enter(&self, call: BackendCall) -> Result<InFlight<'_>, BackendError> {
        let operation = call.operation();
        {
            let mut state = self.lock();
            state.calls.push(call);
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        let guard = InFlight { backend: self };

        tokio::task::yield_now().await;

        let mut state = self.lock();
        let injected = if let Some(pos) = state.fail_next.iter().position(|o| *o == operation) {
            state.fail_next.remove(pos);
            true
        } else {
            state.fail_always.contains(&operation)
        };
        drop(state);

        if injected {
            return Err(BackendError::Status {
                status: 500,
                message: format!("injected {operation:?} failure"),
            });
        }
        Ok(guard)
    }

    fn insert(state: &mut State, location: &NewLocation) -> i64 {
        state.next_id += 1;
        let id = state.next_id;
        state.rows.insert(
            id,
            LocationRecord {
                id,
                name: Some(location.name.clone()),
                wkt: Some(location.wkt.clone()),
                type_n: location.type_n.clone(),
                metadata: location.metadata.clone(),
            },
        );
        id
    }
}

struct InFlight<'a> {
    backend: &'a MemoryBackend,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.backend.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

fn not_found(id: i64) -> BackendError {
    BackendError::Status {
        status: 404,
        message: format!("no location with id {id}"),
    }
}

#[async_trait]
impl GeometryBackend for MemoryBackend {
    async fn list_locations(&self) -> Result<Vec<LocationRecord>, BackendError> {
        let _guard = self.enter(BackendCall::List).await?;
        Ok(self.rows())
    }

    async fn create_location(&self, location: &NewLocation) -> Result<i64, BackendError> {
        let _guard = self
            .enter(BackendCall::Create {
                name: location.name.clone(),
            })
            .await?;
        Ok(Self::insert(&mut self.lock(), location))
    }

    async fn update_location(&self, update: &LocationUpdate) -> Result<(), BackendError> {
        let _guard = self
            .enter(BackendCall::Update {
                id: update.id,
                wkt: update.wkt.clone(),
            })
            .await?;
        let mut state = self.lock();
        let row = state.rows.get_mut(&update.id).ok_or_else(|| not_found(update.id))?;
        row.wkt = Some(update.wkt.clone());
        if let Some(name) = &update.name {
            row.name = Some(name.clone());
        }
        Ok(())
    }

    async fn delete_location(&self, id: i64) -> Result<(), BackendError> {
        let _guard = self.enter(BackendCall::Delete { id }).await?;
        self.lock()
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found(id))
    }

    async fn create_locations(&self, locations: &[NewLocation]) -> Result<Vec<i64>, BackendError> {
        let _guard = self
            .enter(BackendCall::CreateRange {
                names: locations.iter().map(|l| l.name.clone()).collect(),
            })
            .await?;
        let mut state = self.lock();
        Ok(locations
            .iter()
            .map(|location| Self::insert(&mut state, location))
            .collect())
    }

    async fn optimize(
        &self,
        polygon_wkt: &str,
        params: &OptimizeParams,
    ) -> Result<Vec<OptimizedPoint>, BackendError> {
        let _guard = self
            .enter(BackendCall::Optimize {
                wkt: polygon_wkt.to_string(),
                new_bin_count: params.new_bin_count,
            })
            .await?;
        Ok(self.lock().optimize_response.clone())
    }
}
