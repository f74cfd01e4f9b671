//! Refresh and cache orchestration for the airfield briefing.
//!
//! `RefreshScheduler::get_current_bundle` is the single entry point: it
//! resolves the current cycle, serves cached bundles and coordinates at
//! most one build per cycle.

pub mod builder;
pub mod cache;
pub mod operations;
pub mod schedule;
pub mod scheduler;
pub mod sources;

pub use builder::{build_bundle, placeholder_bundle, BundleInputs};
pub use cache::{CacheEntry, CacheStore};
pub use operations::{day_window, day_windows, operating_hours};
pub use schedule::Schedule;
pub use scheduler::{BuildOutcome, RefreshEvent, RefreshReport, RefreshScheduler};
pub use sources::{ForecastSource, MetarSource, NarrativeSource, Sources};
