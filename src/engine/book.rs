use std::collections::HashMap;

use tracing::warn;
use ulid::Ulid;

use crate::lifecycle::{ReservationStatus, StatusSet};
use crate::model::*;
use crate::suite::SuiteMatcher;
use crate::tenant::TenantId;

/// Reservation ids on one resource (or for one pet), sorted by `span.start`.
#[derive(Debug, Default, Clone)]
pub struct Timeline {
    entries: Vec<(Span, Ulid)>,
}

impl Timeline {
    pub fn insert(&mut self, span: Span, id: Ulid) {
        let pos = self
            .entries
            .binary_search_by_key(&span.start, |(s, _)| s.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, (span, id));
    }

    pub fn remove(&mut self, id: Ulid) -> bool {
        if let Some(pos) = self.entries.iter().position(|(_, i)| *i == id) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = Ulid> + '_ {
        self.entries.iter().map(|(_, id)| *id)
    }

    /// Ids whose span overlaps `query`.
    /// Uses binary search to skip entries starting at or after `query.end`.
    pub fn overlapping<'a>(&'a self, query: &'a Span) -> impl Iterator<Item = Ulid> + 'a {
        let right_bound = self.entries.partition_point(|(s, _)| s.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |(s, _)| s.overlaps(query))
            .map(|(_, id)| *id)
    }
}

/// Statically typed resource query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceFilter {
    pub suite: Option<SuiteMatcher>,
    pub active_only: bool,
}

impl ResourceFilter {
    pub fn any() -> Self {
        Self::default()
    }

    /// Active resources that can host the matcher's suite type.
    pub fn matching(matcher: SuiteMatcher) -> Self {
        Self {
            suite: Some(matcher),
            active_only: true,
        }
    }

    pub fn active(mut self) -> Self {
        self.active_only = true;
        self
    }

    fn accepts(&self, r: &Resource) -> bool {
        if self.active_only && !r.is_active {
            return false;
        }
        self.suite.is_none_or(|m| m.matches_type(r))
    }
}

/// Statically typed reservation query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationFilter {
    pub resource_id: Option<Ulid>,
    pub pet_id: Option<Ulid>,
    pub customer_id: Option<Ulid>,
    pub statuses: StatusSet,
    pub overlapping: Option<Span>,
    pub exclude: Option<Ulid>,
}

impl Default for ReservationFilter {
    fn default() -> Self {
        Self {
            resource_id: None,
            pet_id: None,
            customer_id: None,
            statuses: StatusSet::ANY,
            overlapping: None,
            exclude: None,
        }
    }
}

impl ReservationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(mut self, id: Ulid) -> Self {
        self.resource_id = Some(id);
        self
    }

    pub fn pet(mut self, id: Ulid) -> Self {
        self.pet_id = Some(id);
        self
    }

    pub fn customer(mut self, id: Ulid) -> Self {
        self.customer_id = Some(id);
        self
    }

    pub fn statuses(mut self, statuses: StatusSet) -> Self {
        self.statuses = statuses;
        self
    }

    /// Only reservations that occupy their slot.
    pub fn active(self) -> Self {
        self.statuses(ReservationStatus::ACTIVE)
    }

    pub fn overlapping(mut self, span: Span) -> Self {
        self.overlapping = Some(span);
        self
    }

    pub fn excluding(mut self, id: Option<Ulid>) -> Self {
        self.exclude = id;
        self
    }

    fn accepts(&self, r: &Reservation) -> bool {
        self.statuses.contains(r.status)
            && self.exclude != Some(r.id)
            && self.resource_id.is_none_or(|id| r.resource_id == Some(id))
            && self.pet_id.is_none_or(|id| r.pet_id == id)
            && self.customer_id.is_none_or(|id| r.customer_id == id)
            && self.overlapping.is_none_or(|s| r.span.overlaps(&s))
    }
}

/// One tenant's resources and reservations.
///
/// Every lookup compares the record's tenant with the book's own; records
/// stamped with another tenant are never returned and never applied.
pub struct Book {
    tenant: TenantId,
    resources: HashMap<Ulid, Resource>,
    /// Creation order, used for deterministic auto-assignment.
    resource_order: Vec<Ulid>,
    reservations: HashMap<Ulid, Reservation>,
    by_resource: HashMap<Ulid, Timeline>,
    by_pet: HashMap<Ulid, Timeline>,
    last_order_seq: u64,
}

impl Book {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            resources: HashMap::new(),
            resource_order: Vec::new(),
            reservations: HashMap::new(),
            by_resource: HashMap::new(),
            by_pet: HashMap::new(),
            last_order_seq: 0,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    // ── Resources ────────────────────────────────────────────

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn resource(&self, id: Ulid) -> Option<&Resource> {
        self.resources.get(&id).filter(|r| r.tenant_id == self.tenant)
    }

    /// Resources accepted by `filter`, in creation order.
    pub fn find_resources(&self, filter: &ResourceFilter) -> Vec<&Resource> {
        self.resource_order
            .iter()
            .filter_map(|id| self.resource(*id))
            .filter(|r| filter.accepts(r))
            .collect()
    }

    pub fn resource_has_reservations(&self, id: Ulid) -> bool {
        self.by_resource.get(&id).is_some_and(|t| !t.is_empty())
    }

    // ── Reservations ─────────────────────────────────────────

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.get(&id).filter(|r| r.tenant_id == self.tenant)
    }

    /// Reservations accepted by `filter`, ordered by start then id.
    pub fn find_reservations(&self, filter: &ReservationFilter) -> Vec<&Reservation> {
        let candidates: Box<dyn Iterator<Item = Ulid> + '_> =
            match (filter.resource_id, filter.pet_id) {
                (Some(rid), _) => self.indexed(self.by_resource.get(&rid), filter),
                (None, Some(pid)) => self.indexed(self.by_pet.get(&pid), filter),
                (None, None) => Box::new(self.reservations.keys().copied()),
            };

        let mut found: Vec<&Reservation> = candidates
            .filter_map(|id| self.reservation(id))
            .filter(|r| filter.accepts(r))
            .collect();
        found.sort_by_key(|r| (r.span.start, r.id));
        found
    }

    fn indexed<'a>(
        &'a self,
        timeline: Option<&'a Timeline>,
        filter: &'a ReservationFilter,
    ) -> Box<dyn Iterator<Item = Ulid> + 'a> {
        match (timeline, &filter.overlapping) {
            (None, _) => Box::new(std::iter::empty()),
            (Some(t), Some(span)) => Box::new(t.overlapping(span)),
            (Some(t), None) => Box::new(t.ids()),
        }
    }

    pub fn last_order_seq(&self) -> u64 {
        self.last_order_seq
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event. The caller holds the write guard.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::ResourceCreated(r) => {
                if !self.owns(&r.tenant_id, r.id) {
                    return;
                }
                if self.resources.insert(r.id, r.clone()).is_none() {
                    self.resource_order.push(r.id);
                }
            }
            Event::ResourceUpdated(r) => {
                if !self.owns(&r.tenant_id, r.id) {
                    return;
                }
                if let Some(existing) = self.resources.get_mut(&r.id) {
                    *existing = r.clone();
                }
            }
            Event::ResourceDeleted { id } => {
                if self.resources.remove(id).is_some() {
                    self.resource_order.retain(|r| r != id);
                    self.by_resource.remove(id);
                }
            }
            Event::ReservationCreated(r) | Event::ReservationUpdated(r) => {
                if !self.owns(&r.tenant_id, r.id) {
                    return;
                }
                self.unindex(r.id);
                if let Some(seq) = order_seq(&r.order_number) {
                    self.last_order_seq = self.last_order_seq.max(seq);
                }
                if let Some(rid) = r.resource_id {
                    self.by_resource.entry(rid).or_default().insert(r.span, r.id);
                }
                self.by_pet.entry(r.pet_id).or_default().insert(r.span, r.id);
                self.reservations.insert(r.id, r.clone());
            }
            Event::ReservationDeleted { id } => {
                self.unindex(*id);
                self.reservations.remove(id);
            }
            Event::OrderSequence { last } => {
                self.last_order_seq = self.last_order_seq.max(*last);
            }
        }
    }

    fn owns(&self, tenant: &TenantId, id: Ulid) -> bool {
        if *tenant == self.tenant {
            return true;
        }
        warn!(book = %self.tenant, record = %tenant, %id, "ignoring record from another tenant");
        false
    }

    fn unindex(&mut self, id: Ulid) {
        let Some(old) = self.reservations.get(&id) else {
            return;
        };
        if let Some(rid) = old.resource_id
            && let Some(t) = self.by_resource.get_mut(&rid)
        {
            t.remove(id);
        }
        if let Some(t) = self.by_pet.get_mut(&old.pet_id) {
            t.remove(id);
            if t.is_empty() {
                self.by_pet.remove(&old.pet_id);
            }
        }
    }

    /// Minimal event list that recreates this book.
    pub fn snapshot(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.resources.len() + self.reservations.len() + 1);
        events.push(Event::OrderSequence {
            last: self.last_order_seq,
        });
        for id in &self.resource_order {
            if let Some(r) = self.resources.get(id) {
                events.push(Event::ResourceCreated(r.clone()));
            }
        }
        let mut reservations: Vec<&Reservation> = self.reservations.values().collect();
        reservations.sort_by_key(|r| r.id);
        events.extend(
            reservations
                .into_iter()
                .map(|r| Event::ReservationCreated(r.clone())),
        );
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::SuiteType;

    fn tenant() -> TenantId {
        TenantId::new("t1").unwrap()
    }

    fn resource(book: &mut Book, suite_type: SuiteType, name: &str) -> Ulid {
        let id = Ulid::new();
        book.apply(&Event::ResourceCreated(Resource {
            id,
            tenant_id: book.tenant().clone(),
            suite_type,
            name: name.into(),
            description: None,
            is_active: true,
        }));
        id
    }

    fn reservation(
        book: &mut Book,
        resource_id: Option<Ulid>,
        pet_id: Ulid,
        span: Span,
        status: ReservationStatus,
    ) -> Ulid {
        let id = Ulid::new();
        let seq = book.last_order_seq() + 1;
        book.apply(&Event::ReservationCreated(Reservation {
            id,
            tenant_id: book.tenant().clone(),
            customer_id: Ulid::new(),
            pet_id,
            resource_id,
            suite_type: None,
            span,
            status,
            order_number: order_number(seq),
            details: ReservationDetails::default(),
            add_ons: Vec::new(),
        }));
        id
    }

    #[test]
    fn timeline_ordering_and_overlap() {
        let mut t = Timeline::default();
        let (a, b, c) = (Ulid::new(), Ulid::new(), Ulid::new());
        t.insert(Span::new(300, 400), c);
        t.insert(Span::new(100, 200), a);
        t.insert(Span::new(200, 300), b);
        assert_eq!(t.ids().collect::<Vec<_>>(), vec![a, b, c]);

        let hits: Vec<_> = t.overlapping(&Span::new(150, 250)).collect();
        assert_eq!(hits, vec![a, b]);

        // adjacent is not overlapping
        let hits: Vec<_> = t.overlapping(&Span::new(400, 500)).collect();
        assert!(hits.is_empty());

        assert!(t.remove(b));
        assert!(!t.remove(b));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn timeline_long_stay_spanning_query() {
        let mut t = Timeline::default();
        let id = Ulid::new();
        t.insert(Span::new(0, 10_000), id);
        t.insert(Span::new(20_000, 30_000), Ulid::new());
        let hits: Vec<_> = t.overlapping(&Span::new(500, 600)).collect();
        assert_eq!(hits, vec![id]);
    }

    #[test]
    fn resources_in_creation_order() {
        let mut book = Book::new(tenant());
        let ids: Vec<Ulid> = (0..5)
            .map(|i| resource(&mut book, SuiteType::Kennel, &format!("Run {i}")))
            .collect();
        let found: Vec<Ulid> = book
            .find_resources(&ResourceFilter::any())
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(found, ids);
    }

    #[test]
    fn resource_filter_by_suite_and_active() {
        let mut book = Book::new(tenant());
        let vip = resource(&mut book, SuiteType::VipSuite, "VIP 1");
        let std = resource(&mut book, SuiteType::StandardSuite, "Suite 1");
        let mut inactive = book.resource(std).unwrap().clone();
        inactive.is_active = false;
        book.apply(&Event::ResourceUpdated(inactive));

        let vip_only = book.find_resources(&ResourceFilter::matching(SuiteMatcher::new(
            SuiteType::VipSuite,
        )));
        assert_eq!(vip_only.len(), 1);
        assert_eq!(vip_only[0].id, vip);

        assert!(book
            .find_resources(&ResourceFilter::matching(SuiteMatcher::new(
                SuiteType::StandardSuite
            )))
            .is_empty());
        assert_eq!(book.find_resources(&ResourceFilter::any()).len(), 2);
        assert_eq!(book.find_resources(&ResourceFilter::any().active()).len(), 1);
    }

    #[test]
    fn foreign_tenant_records_are_ignored() {
        let mut book = Book::new(tenant());
        let id = Ulid::new();
        book.apply(&Event::ResourceCreated(Resource {
            id,
            tenant_id: TenantId::new("intruder").unwrap(),
            suite_type: SuiteType::Kennel,
            name: "Run".into(),
            description: None,
            is_active: true,
        }));
        assert!(book.resource(id).is_none());
        assert_eq!(book.resource_count(), 0);
    }

    #[test]
    fn reservation_filter_combinations() {
        let mut book = Book::new(tenant());
        let k1 = resource(&mut book, SuiteType::Kennel, "K1");
        let k2 = resource(&mut book, SuiteType::Kennel, "K2");
        let pet = Ulid::new();
        let other_pet = Ulid::new();

        let r1 = reservation(&mut book, Some(k1), pet, Span::new(0, 100), ReservationStatus::Confirmed);
        let r2 = reservation(&mut book, Some(k2), pet, Span::new(200, 300), ReservationStatus::Cancelled);
        let r3 = reservation(&mut book, Some(k1), other_pet, Span::new(100, 200), ReservationStatus::CheckedIn);
        let r4 = reservation(&mut book, None, pet, Span::new(50, 150), ReservationStatus::Draft);

        let on_k1: Vec<Ulid> = book
            .find_reservations(&ReservationFilter::new().resource(k1))
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(on_k1, vec![r1, r3]);

        let pet_all: Vec<Ulid> = book
            .find_reservations(&ReservationFilter::new().pet(pet))
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(pet_all, vec![r1, r4, r2]);

        let pet_active: Vec<Ulid> = book
            .find_reservations(&ReservationFilter::new().pet(pet).active())
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(pet_active, vec![r1]);

        let k1_window = book.find_reservations(
            &ReservationFilter::new()
                .resource(k1)
                .active()
                .overlapping(Span::new(90, 110))
                .excluding(Some(r1)),
        );
        assert_eq!(k1_window.len(), 1);
        assert_eq!(k1_window[0].id, r3);

        assert_eq!(book.find_reservations(&ReservationFilter::new()).len(), 4);
    }

    #[test]
    fn update_moves_reservation_between_indexes() {
        let mut book = Book::new(tenant());
        let k1 = resource(&mut book, SuiteType::Kennel, "K1");
        let k2 = resource(&mut book, SuiteType::Kennel, "K2");
        let pet = Ulid::new();
        let id = reservation(&mut book, Some(k1), pet, Span::new(0, 100), ReservationStatus::Confirmed);

        let mut moved = book.reservation(id).unwrap().clone();
        moved.resource_id = Some(k2);
        moved.span = Span::new(500, 600);
        book.apply(&Event::ReservationUpdated(moved));

        assert!(book.find_reservations(&ReservationFilter::new().resource(k1)).is_empty());
        let on_k2 = book.find_reservations(&ReservationFilter::new().resource(k2));
        assert_eq!(on_k2.len(), 1);
        assert_eq!(on_k2[0].span, Span::new(500, 600));
        assert!(!book.resource_has_reservations(k1));
        assert!(book.resource_has_reservations(k2));
    }

    #[test]
    fn delete_unindexes() {
        let mut book = Book::new(tenant());
        let k1 = resource(&mut book, SuiteType::Kennel, "K1");
        let pet = Ulid::new();
        let id = reservation(&mut book, Some(k1), pet, Span::new(0, 100), ReservationStatus::Confirmed);
        book.apply(&Event::ReservationDeleted { id });
        assert!(book.reservation(id).is_none());
        assert!(!book.resource_has_reservations(k1));
        assert!(book.find_reservations(&ReservationFilter::new().pet(pet)).is_empty());
    }

    #[test]
    fn snapshot_rebuilds_same_book() {
        let mut book = Book::new(tenant());
        let k1 = resource(&mut book, SuiteType::Kennel, "K1");
        let k2 = resource(&mut book, SuiteType::VipSuite, "V1");
        let pet = Ulid::new();
        reservation(&mut book, Some(k1), pet, Span::new(0, 100), ReservationStatus::Confirmed);
        let gone = reservation(&mut book, Some(k2), pet, Span::new(100, 200), ReservationStatus::Confirmed);
        book.apply(&Event::ReservationDeleted { id: gone });

        let mut rebuilt = Book::new(tenant());
        for e in book.snapshot() {
            rebuilt.apply(&e);
        }
        assert_eq!(rebuilt.resource_count(), 2);
        assert_eq!(rebuilt.reservation_count(), 1);
        // deleted order numbers are not reused
        assert_eq!(rebuilt.last_order_seq(), 2);
        let order: Vec<Ulid> = rebuilt
            .find_resources(&ResourceFilter::any())
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(order, vec![k1, k2]);
    }
}
