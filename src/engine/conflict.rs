use std::fmt;

use serde::Serialize;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::book::{Book, ReservationFilter};
use super::EngineError;

/// What to check: a span, plus the resource and/or pet that would occupy it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictQuery {
    pub span: Span,
    pub resource_id: Option<Ulid>,
    pub pet_id: Option<Ulid>,
    /// The reservation being updated; it never conflicts with itself.
    pub exclude: Option<Ulid>,
}

impl ConflictQuery {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            resource_id: None,
            pet_id: None,
            exclude: None,
        }
    }

    pub fn resource(mut self, id: Option<Ulid>) -> Self {
        self.resource_id = id;
        self
    }

    pub fn pet(mut self, id: Option<Ulid>) -> Self {
        self.pet_id = id;
        self
    }

    pub fn excluding(mut self, id: Option<Ulid>) -> Self {
        self.exclude = id;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictReason {
    /// The resource is already occupied over part of the span.
    ResourceUnavailable {
        resource_id: Ulid,
        reservations: Vec<Ulid>,
    },
    /// The pet already holds an overlapping reservation somewhere.
    PetDoubleBooked {
        pet_id: Ulid,
        reservations: Vec<Ulid>,
    },
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::ResourceUnavailable {
                resource_id,
                reservations,
            } => write!(
                f,
                "resource unavailable: {resource_id} is held by {}",
                join_ids(reservations)
            ),
            ConflictReason::PetDoubleBooked {
                pet_id,
                reservations,
            } => write!(
                f,
                "pet already has an overlapping reservation: {pet_id} is booked in {}",
                join_ids(reservations)
            ),
        }
    }
}

fn join_ids(ids: &[Ulid]) -> String {
    ids.iter().map(Ulid::to_string).collect::<Vec<_>>().join(", ")
}

/// Outcome of a conflict check. Empty means the slot is free.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub reasons: Vec<ConflictReason>,
}

impl ConflictReport {
    pub fn has_conflict(&self) -> bool {
        !self.reasons.is_empty()
    }

    pub fn resource_conflict(&self) -> bool {
        self.reasons
            .iter()
            .any(|r| matches!(r, ConflictReason::ResourceUnavailable { .. }))
    }

    pub fn pet_conflict(&self) -> bool {
        self.reasons
            .iter()
            .any(|r| matches!(r, ConflictReason::PetDoubleBooked { .. }))
    }

    pub fn messages(&self) -> Vec<String> {
        self.reasons.iter().map(ToString::to_string).collect()
    }

    pub fn into_result(self) -> Result<(), EngineError> {
        if self.has_conflict() {
            Err(EngineError::Conflict(self))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reasons.is_empty() {
            return f.write_str("no conflict");
        }
        f.write_str(&self.messages().join("; "))
    }
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::validation(format!(
            "start ({}) must be before end ({})",
            span.start, span.end
        )));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::validation("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

/// Check the requested span against active reservations.
///
/// The resource check and the pet check are independent; both run when both
/// ids are given and both reasons are reported.
pub(crate) fn detect_conflicts(book: &Book, query: &ConflictQuery) -> ConflictReport {
    let mut report = ConflictReport::default();

    if let Some(resource_id) = query.resource_id {
        let holders = holders(
            book,
            ReservationFilter::new().resource(resource_id),
            query,
        );
        if !holders.is_empty() {
            report.reasons.push(ConflictReason::ResourceUnavailable {
                resource_id,
                reservations: holders,
            });
        }
    }

    if let Some(pet_id) = query.pet_id {
        let holders = holders(book, ReservationFilter::new().pet(pet_id), query);
        if !holders.is_empty() {
            report.reasons.push(ConflictReason::PetDoubleBooked {
                pet_id,
                reservations: holders,
            });
        }
    }

    report
}

fn holders(book: &Book, filter: ReservationFilter, query: &ConflictQuery) -> Vec<Ulid> {
    let filter = filter
        .active()
        .overlapping(query.span)
        .excluding(query.exclude);
    book.find_reservations(&filter).iter().map(|r| r.id).collect()
}
