use tracing::{debug, info};
use ulid::Ulid;

use crate::directory::Directory;
use crate::lifecycle::Transition;
use crate::limits::*;
use crate::model::*;
use crate::suite::{ResolvedSuite, SuiteMatcher, SuiteType, UnmappedCategory};

use super::allocate::{place, Allocation, Placement};
use super::conflict::{detect_conflicts, validate_span, ConflictQuery};
use super::request::*;
use super::{Engine, EngineError};

impl Engine {
    // ── Resources ────────────────────────────────────────────

    pub async fn create_resource(&self, new: NewResource) -> Result<Resource, EngineError> {
        validate_resource_text(&new.name, new.description.as_deref())?;
        let mut book = self.book.write().await;
        if book.resource_count() >= MAX_RESOURCES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        let id = new.id.unwrap_or_else(Ulid::new);
        if book.resource(id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let resource = Resource {
            id,
            tenant_id: self.tenant.clone(),
            suite_type: new.suite_type,
            name: new.name,
            description: new.description,
            is_active: true,
        };
        self.persist_and_apply(&mut book, Event::ResourceCreated(resource.clone()))
            .await?;
        info!(tenant = %self.tenant, %id, suite = %resource.suite_type, "resource created");
        Ok(resource)
    }

    pub async fn update_resource(&self, id: Ulid, patch: ResourcePatch) -> Result<Resource, EngineError> {
        let mut book = self.book.write().await;
        let mut resource = book
            .resource(id)
            .cloned()
            .ok_or(EngineError::not_found("resource", id))?;

        if let Some(suite_type) = patch.suite_type {
            resource.suite_type = suite_type;
        }
        if let Some(name) = patch.name {
            resource.name = name;
        }
        if let Some(description) = patch.description {
            resource.description = description;
        }
        if let Some(is_active) = patch.is_active {
            resource.is_active = is_active;
        }
        validate_resource_text(&resource.name, resource.description.as_deref())?;

        self.persist_and_apply(&mut book, Event::ResourceUpdated(resource.clone()))
            .await?;
        debug!(tenant = %self.tenant, %id, active = resource.is_active, "resource updated");
        Ok(resource)
    }

    /// Remove a resource. Refused while any reservation still references it;
    /// deactivate it instead to stop new assignments.
    pub async fn delete_resource(&self, id: Ulid) -> Result<(), EngineError> {
        let mut book = self.book.write().await;
        if book.resource(id).is_none() {
            return Err(EngineError::not_found("resource", id));
        }
        if book.resource_has_reservations(id) {
            return Err(EngineError::validation(format!(
                "resource {id} is referenced by reservations; deactivate it instead"
            )));
        }
        self.persist_and_apply(&mut book, Event::ResourceDeleted { id })
            .await?;
        info!(tenant = %self.tenant, %id, "resource deleted");
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────

    /// Verify identities, allocate a resource and store the reservation.
    ///
    /// Identity and add-on lookups happen before the write guard is taken;
    /// allocation and the write happen under it.
    pub async fn create_reservation(
        &self,
        directory: &dyn Directory,
        new: NewReservation,
    ) -> Result<Booked, EngineError> {
        validate_span(&new.span)?;
        validate_details(&new.details)?;
        let mut warnings = Vec::new();
        let suite = self.resolve_suite(new.suite.as_deref(), new.resource_id.is_some(), &mut warnings)?;

        directory.verify_customer(&self.tenant, new.customer_id).await?;
        directory.verify_pet(&self.tenant, new.pet_id).await?;
        let (add_ons, add_on_warnings) = self.attach_add_ons(directory, new.add_ons).await;
        warnings.extend(add_on_warnings);

        let mut book = self.book.write().await;
        let id = new.id.unwrap_or_else(Ulid::new);
        if book.reservation(id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }

        let placement = Placement {
            pet_id: new.pet_id,
            span: new.span,
            suite,
            resource_id: new.resource_id,
            exclude: None,
            enforce: new.status.is_active(),
        };
        let allocation = record_outcome(place(&book, &placement))?;
        warnings.extend(allocation.warnings);

        let reservation = Reservation {
            id,
            tenant_id: self.tenant.clone(),
            customer_id: new.customer_id,
            pet_id: new.pet_id,
            resource_id: allocation.resource_id,
            suite_type: allocation.suite_type,
            span: new.span,
            status: new.status,
            order_number: order_number(book.last_order_seq() + 1),
            details: new.details,
            add_ons,
        };
        self.persist_and_apply(&mut book, Event::ReservationCreated(reservation.clone()))
            .await?;

        info!(
            tenant = %self.tenant,
            %id,
            order = %reservation.order_number,
            resource = ?reservation.resource_id,
            status = %reservation.status,
            "reservation created"
        );
        Ok(Booked {
            reservation,
            warnings,
        })
    }

    /// Apply an update. Conflict checks re-run, excluding the reservation
    /// itself, whenever dates, resource or status change and the result
    /// occupies its slot.
    pub async fn update_reservation(
        &self,
        directory: &dyn Directory,
        id: Ulid,
        update: ReservationUpdate,
    ) -> Result<Booked, EngineError> {
        if let Some(span) = &update.span {
            validate_span(span)?;
        }
        if let Some(details) = &update.details {
            validate_details(details)?;
        }
        let mut warnings = Vec::new();
        let add_ons = match update.add_ons {
            Some(list) => {
                let (kept, w) = self.attach_add_ons(directory, list).await;
                warnings.extend(w);
                Some(kept)
            }
            None => None,
        };

        let mut book = self.book.write().await;
        let current = book
            .reservation(id)
            .cloned()
            .ok_or(EngineError::not_found("reservation", id))?;

        let has_resource = match update.resource {
            ResourceChoice::Explicit(_) => true,
            ResourceChoice::Keep => current.resource_id.is_some(),
            ResourceChoice::Auto | ResourceChoice::Unassign => false,
        };
        let requested_suite = self.resolve_suite(update.suite.as_deref(), has_resource, &mut warnings)?;

        let span = update.span.unwrap_or(current.span);
        let status = update.status.unwrap_or(current.status);
        let suite = requested_suite.or_else(|| current.suite_type.map(resolved));
        let enforce = status.is_active();

        let reoccupies = span != current.span
            || update.resource != ResourceChoice::Keep
            || current.status.transition_to(status) == Transition::Activates;

        let (resource_id, suite_type) = match update.resource {
            ResourceChoice::Keep => match current.resource_id {
                Some(rid) => {
                    if enforce && reoccupies {
                        let query = ConflictQuery::new(span)
                            .resource(Some(rid))
                            .pet(Some(current.pet_id))
                            .excluding(Some(id));
                        detect_conflicts(&book, &query).into_result()?;
                    }
                    let resource = book
                        .resource(rid)
                        .ok_or(EngineError::not_found("resource", rid))?;
                    let fits = |t: SuiteType| SuiteMatcher::new(t).matches_type(resource);
                    let suite_type = match requested_suite {
                        Some(s) if fits(s.suite_type) => s.suite_type,
                        Some(s) => {
                            warnings.push(format!(
                                "resource {} is {}, not the requested {}; the resource type applies",
                                resource.name, resource.suite_type, s.suite_type
                            ));
                            resource.suite_type
                        }
                        None => current
                            .suite_type
                            .filter(|&t| fits(t))
                            .unwrap_or(resource.suite_type),
                    };
                    (Some(rid), Some(suite_type))
                }
                // An unassigned stay of a mandatory type must find a resource
                // before it can occupy a slot.
                None if enforce && suite.is_some_and(|s| s.requires_resource) => {
                    let placement = Placement {
                        pet_id: current.pet_id,
                        span,
                        suite,
                        resource_id: None,
                        exclude: Some(id),
                        enforce,
                    };
                    let allocation = record_outcome(place(&book, &placement))?;
                    warnings.extend(allocation.warnings);
                    (allocation.resource_id, allocation.suite_type)
                }
                None => {
                    if enforce && reoccupies {
                        let query = ConflictQuery::new(span)
                            .pet(Some(current.pet_id))
                            .excluding(Some(id));
                        detect_conflicts(&book, &query).into_result()?;
                    }
                    (None, suite.map(|s| s.suite_type))
                }
            },
            ResourceChoice::Unassign => {
                if enforce && let Some(s) = suite.filter(|s| s.requires_resource) {
                    return Err(EngineError::validation(format!(
                        "{} reservations must keep a resource",
                        s.suite_type
                    )));
                }
                if enforce {
                    let query = ConflictQuery::new(span)
                        .pet(Some(current.pet_id))
                        .excluding(Some(id));
                    detect_conflicts(&book, &query).into_result()?;
                }
                (None, suite.map(|s| s.suite_type))
            }
            ResourceChoice::Explicit(_) | ResourceChoice::Auto => {
                let explicit = match update.resource {
                    ResourceChoice::Explicit(rid) => Some(rid),
                    _ => None,
                };
                let placement = Placement {
                    pet_id: current.pet_id,
                    span,
                    suite,
                    resource_id: explicit,
                    exclude: Some(id),
                    enforce,
                };
                let allocation = record_outcome(place(&book, &placement))?;
                warnings.extend(allocation.warnings);
                (allocation.resource_id, allocation.suite_type)
            }
        };

        let reservation = Reservation {
            resource_id,
            suite_type,
            span,
            status,
            details: update.details.unwrap_or(current.details),
            add_ons: add_ons.unwrap_or(current.add_ons),
            ..current
        };
        self.persist_and_apply(&mut book, Event::ReservationUpdated(reservation.clone()))
            .await?;

        info!(
            tenant = %self.tenant,
            %id,
            resource = ?reservation.resource_id,
            status = %reservation.status,
            "reservation updated"
        );
        Ok(Booked {
            reservation,
            warnings,
        })
    }

    /// Delete a reservation in a deletable status. A stay in progress at
    /// `now` is still deleted, with a warning.
    pub async fn delete_reservation(&self, id: Ulid, now: Ms) -> Result<Booked, EngineError> {
        let mut book = self.book.write().await;
        let reservation = book
            .reservation(id)
            .cloned()
            .ok_or(EngineError::not_found("reservation", id))?;

        if !reservation.status.is_deletable() {
            return Err(EngineError::validation(format!(
                "reservation {} is {} and cannot be deleted",
                reservation.order_number, reservation.status
            )));
        }

        let mut warnings = Vec::new();
        if reservation.span.contains_instant(now) {
            warnings.push(format!(
                "reservation {} is in progress; deleted anyway",
                reservation.order_number
            ));
        }

        self.persist_and_apply(&mut book, Event::ReservationDeleted { id })
            .await?;
        info!(tenant = %self.tenant, %id, order = %reservation.order_number, "reservation deleted");
        Ok(Booked {
            reservation,
            warnings,
        })
    }

    // ── Helpers ──────────────────────────────────────────────

    /// Resolve a suite token or service category. When the request names a
    /// resource, an unmapped category only earns a warning and the resource's
    /// own type applies.
    pub(super) fn resolve_suite(
        &self,
        token: Option<&str>,
        has_resource: bool,
        warnings: &mut Vec<String>,
    ) -> Result<Option<ResolvedSuite>, EngineError> {
        let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        match self.policy.resolve(token) {
            Ok(suite) => Ok(Some(suite)),
            Err(UnmappedCategory(category)) if has_resource => {
                debug!(tenant = %self.tenant, %category, "unmapped category with explicit resource");
                warnings.push(format!("unmapped category {category}; the resource type applies"));
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Keep the add-ons the directory knows; report the rest as warnings.
    async fn attach_add_ons(&self, directory: &dyn Directory, add_ons: Vec<AddOn>) -> (Vec<AddOn>, Vec<String>) {
        let mut kept = Vec::with_capacity(add_ons.len());
        let mut warnings = Vec::new();
        for (i, add_on) in add_ons.into_iter().enumerate() {
            if i >= MAX_ADD_ONS {
                warnings.push(format!("more than {MAX_ADD_ONS} add-ons; the rest were dropped"));
                break;
            }
            if add_on.quantity == 0 {
                warnings.push(format!("add-on {} has zero quantity; skipped", add_on.service_id));
                continue;
            }
            match directory.verify_add_on(&self.tenant, add_on.service_id).await {
                Ok(()) => kept.push(add_on),
                Err(e) => {
                    debug!(tenant = %self.tenant, service = %add_on.service_id, "add-on rejected: {e}");
                    warnings.push(format!("add-on {} not attached: {e}", add_on.service_id));
                }
            }
        }
        (kept, warnings)
    }
}

fn resolved(suite_type: SuiteType) -> ResolvedSuite {
    ResolvedSuite {
        suite_type,
        requires_resource: suite_type.requires_resource(),
    }
}

/// Count allocation outcomes by kind.
fn record_outcome(result: Result<Allocation, EngineError>) -> Result<Allocation, EngineError> {
    let outcome = match &result {
        Ok(a) if a.resource_id.is_some() => "assigned",
        Ok(_) => "unassigned",
        Err(EngineError::Conflict(_)) => "conflict",
        Err(EngineError::NotFound { .. }) => "not_found",
        Err(_) => "invalid",
    };
    metrics::counter!(crate::observability::ALLOCATIONS_TOTAL, "outcome" => outcome).increment(1);
    result
}

fn validate_resource_text(name: &str, description: Option<&str>) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::validation("resource name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("resource name too long"));
    }
    if description.is_some_and(|d| d.len() > MAX_DESCRIPTION_LEN) {
        return Err(EngineError::LimitExceeded("resource description too long"));
    }
    Ok(())
}

fn validate_details(details: &ReservationDetails) -> Result<(), EngineError> {
    let too_long = |s: &Option<String>| s.as_ref().is_some_and(|s| s.len() > MAX_NOTES_LEN);
    if too_long(&details.notes) || too_long(&details.staff_notes) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    if details.price.is_some_and(|p| p < 0) || details.deposit.is_some_and(|d| d < 0) {
        return Err(EngineError::validation("price and deposit must not be negative"));
    }
    Ok(())
}
