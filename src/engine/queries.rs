use ulid::Ulid;

use crate::model::*;
use crate::suite::SuiteMatcher;

use super::allocate::{place, Allocation, Placement};
use super::assign::free_resources;
use super::book::{ReservationFilter, ResourceFilter};
use super::conflict::{detect_conflicts, validate_span, ConflictQuery, ConflictReport};
use super::request::AllocationRequest;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_resource(&self, id: Ulid) -> Result<Resource, EngineError> {
        let book = self.book.read().await;
        book.resource(id)
            .cloned()
            .ok_or(EngineError::not_found("resource", id))
    }

    pub async fn list_resources(&self, filter: &ResourceFilter) -> Vec<Resource> {
        let book = self.book.read().await;
        book.find_resources(filter).into_iter().cloned().collect()
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let book = self.book.read().await;
        book.reservation(id)
            .cloned()
            .ok_or(EngineError::not_found("reservation", id))
    }

    pub async fn reservations(&self, filter: &ReservationFilter) -> Vec<Reservation> {
        let book = self.book.read().await;
        book.find_reservations(filter).into_iter().cloned().collect()
    }

    /// Active reservations holding `resource_id` during `span`.
    pub async fn occupancy(&self, resource_id: Ulid, span: Span) -> Result<Vec<Reservation>, EngineError> {
        validate_span(&span)?;
        let book = self.book.read().await;
        if book.resource(resource_id).is_none() {
            return Err(EngineError::not_found("resource", resource_id));
        }
        let filter = ReservationFilter::new()
            .resource(resource_id)
            .active()
            .overlapping(span);
        Ok(book.find_reservations(&filter).into_iter().cloned().collect())
    }

    /// Whether `resource_id` can be booked over `span`, ignoring `exclude`.
    /// Inactive resources are never available. Pure read: asking twice gives
    /// the same answer.
    pub async fn check_availability(
        &self,
        resource_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        validate_span(&span)?;
        let book = self.book.read().await;
        let resource = book
            .resource(resource_id)
            .ok_or(EngineError::not_found("resource", resource_id))?;
        if !resource.is_active {
            return Ok(false);
        }
        let query = ConflictQuery::new(span)
            .resource(Some(resource_id))
            .excluding(exclude);
        Ok(!detect_conflicts(&book, &query).has_conflict())
    }

    pub async fn detect_conflicts(&self, query: &ConflictQuery) -> Result<ConflictReport, EngineError> {
        validate_span(&query.span)?;
        let book = self.book.read().await;
        Ok(detect_conflicts(&book, query))
    }

    /// Preview which resource a new active reservation would get. Nothing is
    /// held: a later create may land elsewhere if the book changes meanwhile.
    /// Previews are not counted as allocations.
    pub async fn allocate(&self, req: &AllocationRequest) -> Result<Allocation, EngineError> {
        let mut warnings = Vec::new();
        let suite = self.resolve_suite(req.suite.as_deref(), req.resource_id.is_some(), &mut warnings)?;
        let placement = Placement {
            pet_id: req.pet_id,
            span: req.span,
            suite,
            resource_id: req.resource_id,
            exclude: req.exclude,
            enforce: true,
        };
        let book = self.book.read().await;
        let mut allocation = place(&book, &placement)?;
        warnings.append(&mut allocation.warnings);
        allocation.warnings = warnings;
        Ok(allocation)
    }

    /// Active resources of the suite's type with no active reservation in `span`.
    pub async fn available_resources(
        &self,
        suite: &str,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Resource>, EngineError> {
        validate_span(&span)?;
        let resolved = self.policy.resolve(suite)?;
        let book = self.book.read().await;
        let ids = free_resources(&book, SuiteMatcher::new(resolved.suite_type), span, exclude);
        Ok(ids
            .into_iter()
            .filter_map(|id| book.resource(id).cloned())
            .collect())
    }
}
