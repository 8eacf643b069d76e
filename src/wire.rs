use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::directory::Directory;
use crate::engine::*;
use crate::lifecycle::{ReservationStatus, StatusSet};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::suite::{SuiteMatcher, SuiteType};
use crate::tenant::{TenantId, TenantManager};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec: {0}")]
    Codec(#[from] LinesCodecError),
}

/// Serve one client: one JSON request per line in, one JSON reply per line out.
/// An oversized line is answered with an error, then the connection closes.
pub async fn process_connection<S>(
    socket: S,
    tenants: Arc<TenantManager>,
    directory: Arc<dyn Directory>,
) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(line) = framed.next().await {
        let reply = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&line, &tenants, directory.as_ref()).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("request line over {MAX_LINE_LEN} bytes rejected, closing");
                let reply = Reply::failure(None, ErrorBody::bad_request("request line too long"));
                framed.send(reply.encode()).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        framed.send(reply.encode()).await?;
    }
    Ok(())
}

/// Parse, route and answer one request line.
pub async fn handle_line(line: &str, tenants: &TenantManager, directory: &dyn Directory) -> Reply {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Reply::failure(None, ErrorBody::bad_request(format!("invalid JSON: {e}"))),
    };
    let request_id = value.get("request_id").cloned();
    let tenant = value.get("tenant").and_then(Value::as_str).map(str::to_owned);

    let request: Request = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => return Reply::failure(request_id, ErrorBody::bad_request(format!("invalid request: {e}"))),
    };
    let op = request.op();
    let started = Instant::now();

    let outcome = match tenant {
        None => Err(EngineError::TenantContext("request has no tenant".into())),
        Some(name) => match TenantId::new(&name).and_then(|t| tenants.get_or_create(&t)) {
            Ok(engine) => dispatch(&engine, directory, request).await,
            Err(e) => Err(e),
        },
    };

    let status = match &outcome {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(result) => Reply::success(request_id, result),
        Err(e) => {
            if e.status_code() >= 500 {
                error!(op, "request failed: {e}");
            } else {
                debug!(op, "request rejected: {e}");
            }
            Reply::failure(request_id, ErrorBody::from(e))
        }
    }
}

// ── Replies ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Reply {
    /// Echo of the caller's `request_id`, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    fn success(request_id: Option<Value>, result: Value) -> Self {
        Self {
            request_id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(request_id: Option<Value>, error: ErrorBody) -> Self {
        Self {
            request_id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            error!("failed to encode reply: {e}");
            r#"{"ok":false,"error":{"kind":"internal","status":500,"message":"unencodable reply"}}"#.into()
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<ConflictReason>,
}

impl ErrorBody {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            kind: "bad_request",
            status: 400,
            message: message.into(),
            reasons: Vec::new(),
        }
    }
}

impl From<EngineError> for ErrorBody {
    fn from(e: EngineError) -> Self {
        let reasons = match &e {
            EngineError::Conflict(report) => report.reasons.clone(),
            _ => Vec::new(),
        };
        Self {
            kind: e.kind(),
            status: e.status_code(),
            message: e.to_string(),
            reasons,
        }
    }
}

fn to_json(value: &impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        error!("failed to serialize result: {e}");
        Value::Null
    })
}

// ── Requests ─────────────────────────────────────────────────

/// Unix milliseconds, a `YYYY-MM-DD` date (midnight UTC) or an RFC 3339
/// timestamp.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TimeArg {
    Millis(Ms),
    Text(String),
}

impl TimeArg {
    fn to_ms(&self) -> Result<Ms, EngineError> {
        match self {
            Self::Millis(ms) => Ok(*ms),
            Self::Text(s) => {
                if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    return Ok(date_ms(date));
                }
                DateTime::parse_from_rfc3339(s)
                    .map(|t| t.timestamp_millis())
                    .map_err(|_| EngineError::validation(format!("unrecognized time {s:?}")))
            }
        }
    }
}

fn span(start: &TimeArg, end: &TimeArg) -> Result<Span, EngineError> {
    let (start, end) = (start.to_ms()?, end.to_ms()?);
    Span::checked(start, end).ok_or_else(|| EngineError::validation("start must be before end"))
}

fn optional_span(start: &Option<TimeArg>, end: &Option<TimeArg>) -> Result<Option<Span>, EngineError> {
    match (start, end) {
        (Some(s), Some(e)) => span(s, e).map(Some),
        (None, None) => Ok(None),
        _ => Err(EngineError::validation("start and end must be given together")),
    }
}

/// Absent → `None`, `null` → `Some(None)`.
fn double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn confirmed() -> ReservationStatus {
    ReservationStatus::Confirmed
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request {
    CreateResource {
        id: Option<Ulid>,
        suite_type: SuiteType,
        name: String,
        description: Option<String>,
    },
    UpdateResource {
        id: Ulid,
        suite_type: Option<SuiteType>,
        name: Option<String>,
        #[serde(default, deserialize_with = "double_option")]
        description: Option<Option<String>>,
        is_active: Option<bool>,
    },
    DeleteResource {
        id: Ulid,
    },
    ListResources {
        suite: Option<String>,
        #[serde(default)]
        active_only: bool,
    },
    Allocate {
        pet_id: Ulid,
        start: TimeArg,
        end: TimeArg,
        suite: Option<String>,
        resource_id: Option<Ulid>,
        exclude: Option<Ulid>,
    },
    CheckAvailability {
        resource_id: Ulid,
        start: TimeArg,
        end: TimeArg,
        exclude: Option<Ulid>,
    },
    DetectConflicts {
        start: TimeArg,
        end: TimeArg,
        resource_id: Option<Ulid>,
        pet_id: Option<Ulid>,
        exclude: Option<Ulid>,
    },
    Occupancy {
        resource_id: Ulid,
        start: TimeArg,
        end: TimeArg,
    },
    AvailableResources {
        suite: String,
        start: TimeArg,
        end: TimeArg,
        exclude: Option<Ulid>,
    },
    CreateReservation {
        id: Option<Ulid>,
        customer_id: Ulid,
        pet_id: Ulid,
        start: TimeArg,
        end: TimeArg,
        suite: Option<String>,
        resource_id: Option<Ulid>,
        #[serde(default = "confirmed")]
        status: ReservationStatus,
        #[serde(default)]
        details: ReservationDetails,
        #[serde(default)]
        add_ons: Vec<AddOn>,
    },
    UpdateReservation {
        id: Ulid,
        start: Option<TimeArg>,
        end: Option<TimeArg>,
        /// A resource id, `"auto"` or `"none"`. Absent keeps the current one.
        resource: Option<String>,
        suite: Option<String>,
        status: Option<ReservationStatus>,
        details: Option<ReservationDetails>,
        add_ons: Option<Vec<AddOn>>,
    },
    DeleteReservation {
        id: Ulid,
    },
    GetReservation {
        id: Ulid,
    },
    ListReservations {
        resource_id: Option<Ulid>,
        pet_id: Option<Ulid>,
        customer_id: Option<Ulid>,
        #[serde(default)]
        statuses: Vec<ReservationStatus>,
        start: Option<TimeArg>,
        end: Option<TimeArg>,
    },
}

impl Request {
    fn op(&self) -> &'static str {
        match self {
            Self::CreateResource { .. } => "create_resource",
            Self::UpdateResource { .. } => "update_resource",
            Self::DeleteResource { .. } => "delete_resource",
            Self::ListResources { .. } => "list_resources",
            Self::Allocate { .. } => "allocate",
            Self::CheckAvailability { .. } => "check_availability",
            Self::DetectConflicts { .. } => "detect_conflicts",
            Self::Occupancy { .. } => "occupancy",
            Self::AvailableResources { .. } => "available_resources",
            Self::CreateReservation { .. } => "create_reservation",
            Self::UpdateReservation { .. } => "update_reservation",
            Self::DeleteReservation { .. } => "delete_reservation",
            Self::GetReservation { .. } => "get_reservation",
            Self::ListReservations { .. } => "list_reservations",
        }
    }
}

fn resource_choice(arg: Option<&str>) -> Result<ResourceChoice, EngineError> {
    match arg.map(str::trim) {
        None | Some("") => Ok(ResourceChoice::Keep),
        Some(s) if s.eq_ignore_ascii_case("auto") => Ok(ResourceChoice::Auto),
        Some(s) if s.eq_ignore_ascii_case("none") => Ok(ResourceChoice::Unassign),
        Some(s) => s
            .parse::<Ulid>()
            .map(ResourceChoice::Explicit)
            .map_err(|_| EngineError::validation(format!("resource must be an id, \"auto\" or \"none\", got {s:?}"))),
    }
}

async fn dispatch(engine: &Engine, directory: &dyn Directory, request: Request) -> Result<Value, EngineError> {
    match request {
        Request::CreateResource {
            id,
            suite_type,
            name,
            description,
        } => {
            let resource = engine
                .create_resource(NewResource {
                    id,
                    suite_type,
                    name,
                    description,
                })
                .await?;
            Ok(to_json(&resource))
        }
        Request::UpdateResource {
            id,
            suite_type,
            name,
            description,
            is_active,
        } => {
            let patch = ResourcePatch {
                suite_type,
                name,
                description,
                is_active,
            };
            Ok(to_json(&engine.update_resource(id, patch).await?))
        }
        Request::DeleteResource { id } => {
            engine.delete_resource(id).await?;
            Ok(json!({ "deleted": id }))
        }
        Request::ListResources { suite, active_only } => {
            let suite = match suite {
                Some(token) => Some(SuiteMatcher::new(engine.policy().resolve(&token)?.suite_type)),
                None => None,
            };
            let filter = ResourceFilter { suite, active_only };
            Ok(to_json(&engine.list_resources(&filter).await))
        }
        Request::Allocate {
            pet_id,
            start,
            end,
            suite,
            resource_id,
            exclude,
        } => {
            let req = AllocationRequest {
                pet_id,
                span: span(&start, &end)?,
                suite,
                resource_id,
                exclude,
            };
            Ok(to_json(&engine.allocate(&req).await?))
        }
        Request::CheckAvailability {
            resource_id,
            start,
            end,
            exclude,
        } => {
            let available = engine
                .check_availability(resource_id, span(&start, &end)?, exclude)
                .await?;
            Ok(json!({ "available": available }))
        }
        Request::DetectConflicts {
            start,
            end,
            resource_id,
            pet_id,
            exclude,
        } => {
            let query = ConflictQuery::new(span(&start, &end)?)
                .resource(resource_id)
                .pet(pet_id)
                .excluding(exclude);
            let report = engine.detect_conflicts(&query).await?;
            Ok(json!({
                "conflict": report.has_conflict(),
                "messages": report.messages(),
                "reasons": report.reasons,
            }))
        }
        Request::Occupancy {
            resource_id,
            start,
            end,
        } => Ok(to_json(&engine.occupancy(resource_id, span(&start, &end)?).await?)),
        Request::AvailableResources {
            suite,
            start,
            end,
            exclude,
        } => {
            let free = engine
                .available_resources(&suite, span(&start, &end)?, exclude)
                .await?;
            Ok(to_json(&free))
        }
        Request::CreateReservation {
            id,
            customer_id,
            pet_id,
            start,
            end,
            suite,
            resource_id,
            status,
            details,
            add_ons,
        } => {
            let new = NewReservation {
                id,
                customer_id,
                pet_id,
                span: span(&start, &end)?,
                suite,
                resource_id,
                status,
                details,
                add_ons,
            };
            Ok(to_json(&engine.create_reservation(directory, new).await?))
        }
        Request::UpdateReservation {
            id,
            start,
            end,
            resource,
            suite,
            status,
            details,
            add_ons,
        } => {
            let update = ReservationUpdate {
                span: optional_span(&start, &end)?,
                resource: resource_choice(resource.as_deref())?,
                suite,
                status,
                details,
                add_ons,
            };
            Ok(to_json(&engine.update_reservation(directory, id, update).await?))
        }
        Request::DeleteReservation { id } => Ok(to_json(&engine.delete_reservation(id, now_ms()).await?)),
        Request::GetReservation { id } => Ok(to_json(&engine.get_reservation(id).await?)),
        Request::ListReservations {
            resource_id,
            pet_id,
            customer_id,
            statuses,
            start,
            end,
        } => {
            let mut filter = ReservationFilter::new();
            if let Some(id) = resource_id {
                filter = filter.resource(id);
            }
            if let Some(id) = pet_id {
                filter = filter.pet(id);
            }
            if let Some(id) = customer_id {
                filter = filter.customer(id);
            }
            if !statuses.is_empty() {
                filter = filter.statuses(StatusSet::of(&statuses));
            }
            if let Some(span) = optional_span(&start, &end)? {
                filter = filter.overlapping(span);
            }
            Ok(to_json(&engine.reservations(&filter).await))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::TrustedDirectory;
    use crate::suite::AllocationPolicy;

    fn manager(name: &str) -> TenantManager {
        let dir = std::env::temp_dir().join("kennel_test_wire").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        TenantManager::new(dir, 0, Arc::new(AllocationPolicy::default()))
    }

    async fn call(tm: &TenantManager, request: Value) -> Value {
        let reply = handle_line(&request.to_string(), tm, &TrustedDirectory).await;
        serde_json::from_str(&reply.encode()).unwrap()
    }

    #[test]
    fn times_accept_millis_dates_and_rfc3339() {
        assert_eq!(TimeArg::Millis(5).to_ms().unwrap(), 5);
        assert_eq!(
            TimeArg::Text("2024-06-01".into()).to_ms().unwrap(),
            1_717_200_000_000
        );
        assert_eq!(
            TimeArg::Text("2024-06-01T02:00:00+02:00".into()).to_ms().unwrap(),
            1_717_200_000_000
        );
        assert!(TimeArg::Text("June 1st".into()).to_ms().is_err());
    }

    #[test]
    fn resource_choice_keywords() {
        assert_eq!(resource_choice(None).unwrap(), ResourceChoice::Keep);
        assert_eq!(resource_choice(Some("AUTO")).unwrap(), ResourceChoice::Auto);
        assert_eq!(resource_choice(Some("none")).unwrap(), ResourceChoice::Unassign);
        let id = Ulid::new();
        assert_eq!(
            resource_choice(Some(&id.to_string())).unwrap(),
            ResourceChoice::Explicit(id)
        );
        assert!(resource_choice(Some("kennel 4")).is_err());
    }

    #[tokio::test]
    async fn missing_tenant_is_rejected() {
        let tm = manager("missing_tenant");
        let reply = call(&tm, json!({ "op": "list_resources" })).await;
        assert_eq!(reply["ok"], false);
        assert_eq!(reply["error"]["kind"], "tenant_context");
        assert_eq!(reply["error"]["status"], 400);
        assert_eq!(tm.tenant_count(), 0);
    }

    #[tokio::test]
    async fn malformed_requests_echo_the_request_id() {
        let tm = manager("malformed");
        let reply = call(&tm, json!({ "request_id": 7, "tenant": "acme", "op": "teleport" })).await;
        assert_eq!(reply["request_id"], 7);
        assert_eq!(reply["error"]["kind"], "bad_request");

        let reply = handle_line("{not json", &tm, &TrustedDirectory).await;
        assert!(!reply.ok);
    }

    #[tokio::test]
    async fn conflict_reply_carries_reasons() {
        let tm = manager("conflict_reasons");
        let created = call(
            &tm,
            json!({ "tenant": "acme", "op": "create_resource", "suite_type": "KENNEL", "name": "Run 1" }),
        )
        .await;
        let rid = created["result"]["id"].as_str().unwrap().to_string();
        let pet = Ulid::new().to_string();

        let book = |customer: String| {
            json!({
                "tenant": "acme",
                "op": "create_reservation",
                "customer_id": customer,
                "pet_id": pet,
                "resource_id": rid,
                "start": "2030-03-01",
                "end": "2030-03-04",
            })
        };
        let first = call(&tm, book(Ulid::new().to_string())).await;
        assert_eq!(first["ok"], true, "{first}");
        assert_eq!(first["result"]["reservation"]["status"], "CONFIRMED");
        assert_eq!(first["result"]["reservation"]["order_number"], "RES-000001");

        let second = call(&tm, book(Ulid::new().to_string())).await;
        assert_eq!(second["error"]["status"], 409);
        let kinds: Vec<&str> = second["error"]["reasons"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["kind"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, ["resource_unavailable", "pet_double_booked"]);
    }

    #[tokio::test]
    async fn oversized_line_is_answered_then_closed() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let tm = Arc::new(manager("oversized"));
        let (client, server) = tokio::io::duplex(256 * 1024);
        let served = tokio::spawn(process_connection(server, tm, Arc::new(TrustedDirectory)));

        let (read, mut write) = tokio::io::split(client);
        let ok_line = json!({ "tenant": "acme", "op": "list_resources" }).to_string();
        write.write_all(format!("{ok_line}\n").as_bytes()).await.unwrap();
        let huge = format!("{{\"pad\": \"{}\"}}\n", "x".repeat(MAX_LINE_LEN + 10));
        write.write_all(huge.as_bytes()).await.unwrap();

        let mut lines = BufReader::new(read).lines();
        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["ok"], true);
        let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second["error"]["message"], "request line too long");

        assert!(served.await.unwrap().is_ok());
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_requires_both_ends() {
        let tm = manager("both_ends");
        let reply = call(
            &tm,
            json!({ "tenant": "acme", "op": "update_reservation", "id": Ulid::new().to_string(), "start": 1 }),
        )
        .await;
        assert_eq!(reply["error"]["kind"], "validation");
    }
}
