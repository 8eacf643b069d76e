use serde::Serialize;
use tracing::debug;
use ulid::Ulid;

use crate::model::Span;
use crate::suite::{ResolvedSuite, SuiteMatcher, SuiteType};

use super::assign::auto_assign;
use super::book::Book;
use super::conflict::{detect_conflicts, validate_span, ConflictQuery};
use super::EngineError;

/// Result of an allocation attempt. `resource_id` is `None` when nothing was
/// free and the suite type allows an unassigned reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub resource_id: Option<Ulid>,
    /// Requested suite type, or the resource's own type when only a resource
    /// was given.
    pub suite_type: Option<SuiteType>,
    pub warnings: Vec<String>,
}

/// Everything the allocator needs, already resolved against the policy.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Placement {
    pub pet_id: Ulid,
    pub span: Span,
    pub suite: Option<ResolvedSuite>,
    pub resource_id: Option<Ulid>,
    pub exclude: Option<Ulid>,
    /// Conflicts are only raised when the reservation will occupy its slot.
    pub enforce: bool,
}

/// Decide which resource a reservation holds. Pure over the book: the caller
/// holds the guard that makes check-then-write atomic.
pub(crate) fn place(book: &Book, p: &Placement) -> Result<Allocation, EngineError> {
    validate_span(&p.span)?;

    if let Some(resource_id) = p.resource_id {
        return place_explicit(book, p, resource_id);
    }

    let suite = p.suite.ok_or_else(|| {
        EngineError::validation("either a resource id or a suite type / service category is required")
    })?;

    if p.enforce {
        // A pet can never hold two overlapping stays, assigned or not.
        detect_conflicts(book, &ConflictQuery::new(p.span).pet(Some(p.pet_id)).excluding(p.exclude))
            .into_result()?;
    }

    let pet = p.enforce.then_some(p.pet_id);
    match auto_assign(book, SuiteMatcher::new(suite.suite_type), p.span, pet, p.exclude) {
        Some(resource_id) => {
            debug!(%resource_id, suite = %suite.suite_type, "auto-assigned resource");
            Ok(Allocation {
                resource_id: Some(resource_id),
                suite_type: Some(suite.suite_type),
                warnings: Vec::new(),
            })
        }
        None if suite.requires_resource => Err(EngineError::validation(format!(
            "no {} resource available for the requested dates",
            suite.suite_type
        ))),
        None => {
            debug!(suite = %suite.suite_type, "no free resource, leaving unassigned");
            Ok(Allocation {
                resource_id: None,
                suite_type: Some(suite.suite_type),
                warnings: vec![format!(
                    "no {} resource available; reservation left unassigned",
                    suite.suite_type
                )],
            })
        }
    }
}

fn place_explicit(book: &Book, p: &Placement, resource_id: Ulid) -> Result<Allocation, EngineError> {
    let resource = book
        .resource(resource_id)
        .ok_or(EngineError::not_found("resource", resource_id))?;
    if !resource.is_active {
        return Err(EngineError::validation(format!(
            "resource {} ({resource_id}) is inactive",
            resource.name
        )));
    }

    let mut warnings = Vec::new();
    let mut suite_type = p.suite.map_or(resource.suite_type, |s| s.suite_type);
    if let Some(suite) = p.suite
        && !SuiteMatcher::new(suite.suite_type).matches_type(resource)
    {
        warnings.push(format!(
            "resource {} is {}, not the requested {}; the resource type applies",
            resource.name, resource.suite_type, suite.suite_type
        ));
        suite_type = resource.suite_type;
    }

    if p.enforce {
        let query = ConflictQuery::new(p.span)
            .resource(Some(resource_id))
            .pet(Some(p.pet_id))
            .excluding(p.exclude);
        detect_conflicts(book, &query).into_result()?;
    }

    Ok(Allocation {
        resource_id: Some(resource_id),
        suite_type: Some(suite_type),
        warnings,
    })
}
