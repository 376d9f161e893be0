//! Store trait definitions

use chrono::DateTime;
use chrono_tz::Tz;
use curfew_api::WindowView;
use curfew_util::{format_clock_time, SubjectId};

use crate::StoreResult;

/// Main store trait
///
/// Every operation is atomic with respect to the database. Absence is an
/// `Ok` value; `Err` always means the operation itself failed.
pub trait RestrictionStore: Send + Sync {
    /// Insert a window, or replace name and interval of the existing one.
    ///
    /// The row keeps its `created_at`. Rejects `start_at >= end_at`.
    fn upsert(
        &self,
        subject_id: SubjectId,
        display_name: &str,
        start_at: DateTime<Tz>,
        end_at: DateTime<Tz>,
    ) -> StoreResult<()>;

    fn get(&self, subject_id: SubjectId) -> StoreResult<Option<RestrictionWindow>>;

    /// Returns true iff a row existed and was deleted
    fn remove(&self, subject_id: SubjectId) -> StoreResult<bool>;

    fn list_all(&self) -> StoreResult<Vec<RestrictionWindow>>;

    fn clear_all(&self) -> StoreResult<()>;

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Where an instant falls relative to a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    Pending,
    Active,
    Expired,
}

/// A persisted restriction window
#[derive(Debug, Clone, PartialEq)]
pub struct RestrictionWindow {
    pub subject_id: SubjectId,
    /// Last observed display name; never used as a key
    pub display_name: String,
    pub start_at: DateTime<Tz>,
    pub end_at: DateTime<Tz>,
    pub created_at: DateTime<Tz>,
}

impl RestrictionWindow {
    /// `[start_at, end_at)` contains `at` => Active
    pub fn phase(&self, at: &DateTime<Tz>) -> WindowPhase {
        if *at >= self.end_at {
            WindowPhase::Expired
        } else if *at >= self.start_at {
            WindowPhase::Active
        } else {
            WindowPhase::Pending
        }
    }

    pub fn to_view(&self) -> WindowView {
        WindowView {
            subject_id: self.subject_id,
            display_name: self.display_name.clone(),
            start_at: self.start_at.fixed_offset(),
            end_at: self.end_at.fixed_offset(),
            start_display: format_clock_time(&self.start_at),
            end_display: format_clock_time(&self.end_at),
        }
    }
}
