use serde::Serialize;
use ulid::Ulid;

use crate::lifecycle::ReservationStatus;
use crate::model::*;
use crate::suite::SuiteType;

pub struct NewResource {
    pub id: Option<Ulid>,
    pub suite_type: SuiteType,
    pub name: String,
    pub description: Option<String>,
}

/// Partial resource update; `None` keeps the current value.
#[derive(Debug, Default, Clone)]
pub struct ResourcePatch {
    pub suite_type: Option<SuiteType>,
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub is_active: Option<bool>,
}

/// Input of `allocate`: which pet, when, and either a suite token / service
/// category or an explicit resource.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub pet_id: Ulid,
    pub span: Span,
    pub suite: Option<String>,
    pub resource_id: Option<Ulid>,
    pub exclude: Option<Ulid>,
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    /// Caller-chosen id; generated when absent. Reusing an id fails, which
    /// makes a retried create harmless.
    pub id: Option<Ulid>,
    pub customer_id: Ulid,
    pub pet_id: Ulid,
    pub span: Span,
    pub suite: Option<String>,
    pub resource_id: Option<Ulid>,
    pub status: ReservationStatus,
    pub details: ReservationDetails,
    pub add_ons: Vec<AddOn>,
}

/// How an update treats the assigned resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResourceChoice {
    #[default]
    Keep,
    Explicit(Ulid),
    /// Re-run auto-assignment for the (possibly new) suite type.
    Auto,
    Unassign,
}

#[derive(Debug, Clone, Default)]
pub struct ReservationUpdate {
    pub span: Option<Span>,
    pub resource: ResourceChoice,
    pub suite: Option<String>,
    pub status: Option<ReservationStatus>,
    pub details: Option<ReservationDetails>,
    pub add_ons: Option<Vec<AddOn>>,
}

/// A stored reservation plus anything the caller should be told about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Booked {
    pub reservation: Reservation,
    pub warnings: Vec<String>,
}
