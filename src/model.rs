use chrono::{NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::lifecycle::ReservationStatus;
use crate::suite::SuiteType;
use crate::tenant::TenantId;

/// Unix milliseconds, UTC.
pub type Ms = i64;

pub const DAY_MS: Ms = 86_400_000;

/// The overlap predicate for half-open intervals `[a_start, a_end)` and
/// `[b_start, b_end)`. Touching endpoints do not overlap.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start < b_end && a_end > b_start
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from untrusted input; `None` unless `start < end`.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Whole-day stay: midnight UTC of `first` to midnight UTC of `last`.
    pub fn from_dates(first: NaiveDate, last: NaiveDate) -> Option<Self> {
        Self::checked(date_ms(first), date_ms(last))
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Midnight UTC of `date` in unix milliseconds.
pub fn date_ms(date: NaiveDate) -> Ms {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
        .timestamp_millis()
}

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// A bookable unit: one kennel, suite, play area or room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub tenant_id: TenantId,
    pub suite_type: SuiteType,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
}

/// Fields the allocation core stores but never interprets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationDetails {
    /// Minor currency units.
    pub price: Option<i64>,
    pub deposit: Option<i64>,
    pub notes: Option<String>,
    pub staff_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOn {
    pub service_id: Ulid,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub tenant_id: TenantId,
    pub customer_id: Ulid,
    pub pet_id: Ulid,
    pub resource_id: Option<Ulid>,
    /// Requested category. Once `resource_id` is set the resource's own type wins.
    pub suite_type: Option<SuiteType>,
    pub span: Span,
    pub status: ReservationStatus,
    pub order_number: String,
    pub details: ReservationDetails,
    pub add_ons: Vec<AddOn>,
}

impl Reservation {
    /// Whether this reservation currently counts toward occupancy.
    pub fn occupies(&self) -> bool {
        self.status.is_active()
    }
}

/// One WAL record. Replaying them in order rebuilds a tenant's book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated(Resource),
    ResourceUpdated(Resource),
    ResourceDeleted { id: Ulid },
    ReservationCreated(Reservation),
    ReservationUpdated(Reservation),
    ReservationDeleted { id: Ulid },
    /// Written by compaction so order numbers never repeat after deletes.
    OrderSequence { last: u64 },
}

/// Format a tenant-scoped order number.
pub fn order_number(seq: u64) -> String {
    format!("RES-{seq:06}")
}

/// Parse the sequence back out of an order number produced by [`order_number`].
pub fn order_seq(order_number: &str) -> Option<u64> {
    order_number.strip_prefix("RES-")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn overlap_is_symmetric() {
        let spans = [
            Span::new(0, 10),
            Span::new(5, 15),
            Span::new(10, 20),
            Span::new(-5, 0),
            Span::new(2, 3),
            Span::new(0, 100),
        ];
        for a in &spans {
            for b in &spans {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn back_to_back_never_overlaps() {
        for (start, mid, end) in [(0, 1, 2), (100, 5_000, 9_999), (-50, 0, 50)] {
            let a = Span::new(start, mid);
            let b = Span::new(mid, end);
            assert!(!a.overlaps(&b));
            assert!(!overlaps(a.start, a.end, b.start, b.end));
        }
    }

    #[test]
    fn containing_span_overlaps() {
        assert!(Span::new(0, 1000).overlaps(&Span::new(400, 500)));
        assert!(Span::new(400, 500).overlaps(&Span::new(0, 1000)));
        assert!(Span::new(400, 500).overlaps(&Span::new(400, 500)));
    }

    #[test]
    fn checked_rejects_empty_and_inverted() {
        assert!(Span::checked(10, 10).is_none());
        assert!(Span::checked(10, 5).is_none());
        assert_eq!(Span::checked(5, 10), Some(Span::new(5, 10)));
    }

    #[test]
    fn spans_from_dates() {
        let s = Span::from_dates(d("2024-06-01"), d("2024-06-05")).unwrap();
        assert_eq!(s.duration_ms(), 4 * DAY_MS);
        assert_eq!(s.start, 1_717_200_000_000);
        assert!(Span::from_dates(d("2024-06-05"), d("2024-06-05")).is_none());
    }

    #[test]
    fn order_numbers_round_trip() {
        assert_eq!(order_number(42), "RES-000042");
        assert_eq!(order_seq("RES-000042"), Some(42));
        assert_eq!(order_seq("RES-1234567"), Some(1_234_567));
        assert_eq!(order_seq("ORD-1"), None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ResourceCreated(Resource {
            id: Ulid::new(),
            tenant_id: TenantId::new("acme").unwrap(),
            suite_type: SuiteType::StandardSuite,
            name: "Suite 4".into(),
            description: None,
            is_active: true,
        });
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
