#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Largest-overlap crop rotation join.
//!
//! Links each current-year parcel to the historical parcel it overlaps most
//! in every earlier survey year, and collects the matched crop codes into
//! one [`JoinedRecord`] per current parcel.
//!
//! # Usage
//!
//! ```rust,no_run
//! # fn example(
//! #     current: crop_rotation_plots_models::PlotTable,
//! #     historical: std::collections::BTreeMap<i32, crop_rotation_plots_models::PlotTable>,
//! # ) -> Result<(), crop_rotation_join::JoinError> {
//! use crop_rotation_join::{JoinOptions, join_rotations};
//!
//! let records = join_rotations(&current, &historical, &JoinOptions::default(), None)?;
//! for record in &records {
//!     println!("{}: {:?}", record.current_id(), record.years());
//! }
//! # Ok(())
//! # }
//! ```

pub mod joiner;
pub mod overlap;
pub mod progress;
pub mod resolver;

pub use crop_rotation_plots_models::{
    DEFAULT_MIN_OVERLAP_AREA, JoinedRecord, PlotTable, Year, YearMatch,
};
pub use joiner::{YearOutcome, apply_year, historical_years, join_rotations, resolve_year};
pub use overlap::{GeometryFault, Overlap, overlap_area};
pub use progress::{NullProgress, ProgressCallback, null_progress};
pub use resolver::{BestMatch, Resolution, resolve, select_best};

/// Errors from the rotation join.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    /// The overlap threshold is negative, NaN, or infinite.
    #[error("Minimum overlap area must be a finite, non-negative number, got {0}")]
    InvalidMinOverlapArea(f64),

    /// A thread count of zero was requested explicitly.
    #[error("Thread count must be at least 1")]
    InvalidThreadCount,

    /// The worker pool could not be started.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Tuning for [`join_rotations`].
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOptions {
    /// Overlaps at or below this area (square units) never match.
    pub min_overlap_area: f64,
    /// Worker threads; `None` uses one per CPU.
    pub threads: Option<usize>,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            min_overlap_area: DEFAULT_MIN_OVERLAP_AREA,
            threads: None,
        }
    }
}

impl JoinOptions {
    /// Checks the options before any join work starts.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::InvalidMinOverlapArea`] for a negative or
    /// non-finite threshold and [`JoinError::InvalidThreadCount`] for
    /// `threads == Some(0)`.
    pub fn validate(&self) -> Result<(), JoinError> {
        if !self.min_overlap_area.is_finite() || self.min_overlap_area < 0.0 {
            return Err(JoinError::InvalidMinOverlapArea(self.min_overlap_area));
        }
        if self.threads == Some(0) {
            return Err(JoinError::InvalidThreadCount);
        }
        Ok(())
    }
}
