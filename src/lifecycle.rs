use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Reservation lifecycle states.
///
/// Only the active subset occupies a resource. `DRAFT` is neither active nor
/// terminal: it reserves nothing until it is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Draft,
    PendingPayment,
    Confirmed,
    PartiallyPaid,
    CheckedIn,
    CheckedOut,
    Completed,
    Cancelled,
    NoShow,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 9] = [
        Self::Draft,
        Self::PendingPayment,
        Self::Confirmed,
        Self::PartiallyPaid,
        Self::CheckedIn,
        Self::CheckedOut,
        Self::Completed,
        Self::Cancelled,
        Self::NoShow,
    ];

    pub const ACTIVE: StatusSet = StatusSet::of(&[
        Self::Confirmed,
        Self::PendingPayment,
        Self::PartiallyPaid,
        Self::CheckedIn,
    ]);

    pub const TERMINAL: StatusSet = StatusSet::of(&[
        Self::CheckedOut,
        Self::Completed,
        Self::Cancelled,
        Self::NoShow,
    ]);

    pub const DELETABLE: StatusSet = StatusSet::of(&[
        Self::Draft,
        Self::Confirmed,
        Self::Cancelled,
        Self::Completed,
        Self::NoShow,
    ]);

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::Confirmed => "CONFIRMED",
            Self::PartiallyPaid => "PARTIALLY_PAID",
            Self::CheckedIn => "CHECKED_IN",
            Self::CheckedOut => "CHECKED_OUT",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::NoShow => "NO_SHOW",
        }
    }

    /// Counts toward resource and pet occupancy.
    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// Finished or abandoned; never conflicts with anything.
    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(self)
    }

    pub fn is_deletable(self) -> bool {
        Self::DELETABLE.contains(self)
    }

    /// Classify a status change by its effect on occupancy.
    ///
    /// Every one of the nine states may move to any other; payment-driven
    /// moves belong to billing. What matters here is whether the change makes
    /// the reservation start occupying its slot, which forces a conflict check.
    pub fn transition_to(self, next: ReservationStatus) -> Transition {
        match (self.is_active(), next.is_active()) {
            _ if self == next => Transition::Unchanged,
            (false, true) => Transition::Activates,
            (true, false) => Transition::Releases,
            _ => Transition::Moves,
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown reservation status: {0}")]
pub struct UnknownStatus(pub String);

/// Effect of a status change on occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    /// Inactive → active: the slot must be free.
    Activates,
    /// Active → inactive: the slot is given back.
    Releases,
    /// Active → active, or inactive → inactive.
    Moves,
}

/// A set of statuses, used by reservation filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusSet(u16);

impl StatusSet {
    pub const ANY: StatusSet = StatusSet::of(&ReservationStatus::ALL);

    pub const fn of(statuses: &[ReservationStatus]) -> Self {
        let mut bits = 0u16;
        let mut i = 0;
        while i < statuses.len() {
            bits |= 1 << (statuses[i] as u16);
            i += 1;
        }
        Self(bits)
    }

    pub fn contains(self, status: ReservationStatus) -> bool {
        self.0 & status.bit() != 0
    }

    pub fn iter(self) -> impl Iterator<Item = ReservationStatus> {
        ReservationStatus::ALL
            .into_iter()
            .filter(move |s| self.contains(*s))
    }
}
