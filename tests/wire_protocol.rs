use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

use kennel::directory::{Directory, TrustedDirectory};
use kennel::suite::AllocationPolicy;
use kennel::tenant::TenantManager;
use kennel::wire;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Arc<TenantManager>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("kennel_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let tm = Arc::new(TenantManager::new(dir, 1000, Arc::new(AllocationPolicy::default())));
    let directory: Arc<dyn Directory> = Arc::new(TrustedDirectory);

    let tm2 = tm.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let tm = tm2.clone();
            let directory = directory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, tm, directory).await;
            });
        }
    });

    (addr, tm)
}

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
    tenant: String,
}

impl Client {
    async fn connect(addr: SocketAddr, tenant: &str) -> Self {
        let socket = TcpStream::connect(addr).await.unwrap();
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
            tenant: tenant.to_string(),
        }
    }

    async fn raw(&mut self, line: String) -> Value {
        self.framed.send(line).await.unwrap();
        let reply = self.framed.next().await.unwrap().unwrap();
        serde_json::from_str(&reply).unwrap()
    }

    /// Send `request` stamped with this client's tenant.
    async fn call(&mut self, mut request: Value) -> Value {
        request["tenant"] = json!(self.tenant);
        self.raw(request.to_string()).await
    }

    async fn ok(&mut self, request: Value) -> Value {
        let reply = self.call(request).await;
        assert_eq!(reply["ok"], true, "unexpected failure: {reply}");
        reply["result"].clone()
    }

    async fn kennel(&mut self, name: &str) -> String {
        let r = self
            .ok(json!({ "op": "create_resource", "suite_type": "KENNEL", "name": name }))
            .await;
        r["id"].as_str().unwrap().to_string()
    }
}

fn reservation(pet: &str, start: &str, end: &str) -> Value {
    json!({
        "op": "create_reservation",
        "customer_id": Ulid::new().to_string(),
        "pet_id": pet,
        "suite": "BOARDING",
        "start": start,
        "end": end,
    })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn booking_flow_over_tcp() {
    let (addr, _tm) = start_test_server().await;
    let mut c = Client::connect(addr, "acme").await;

    let k1 = c.kennel("Run 1").await;
    let k2 = c.kennel("Run 2").await;
    let pet = Ulid::new().to_string();

    let preview = c
        .ok(json!({
            "op": "allocate",
            "pet_id": pet,
            "suite": "BOARDING",
            "start": "2030-06-01",
            "end": "2030-06-05",
        }))
        .await;
    assert_eq!(preview["resource_id"], json!(k1));

    let booked = c.ok(reservation(&pet, "2030-06-01", "2030-06-05")).await;
    let id = booked["reservation"]["id"].as_str().unwrap().to_string();
    assert_eq!(booked["reservation"]["resource_id"], json!(k1));
    assert_eq!(booked["reservation"]["order_number"], "RES-000001");

    let avail = c
        .ok(json!({
            "op": "check_availability",
            "resource_id": k1,
            "start": "2030-06-04T00:00:00Z",
            "end": "2030-06-06T00:00:00Z",
        }))
        .await;
    assert_eq!(avail["available"], false);

    let free = c
        .ok(json!({ "op": "available_resources", "suite": "KENNEL", "start": "2030-06-02", "end": "2030-06-03" }))
        .await;
    assert_eq!(free.as_array().unwrap().len(), 1);
    assert_eq!(free[0]["id"], json!(k2));

    let moved = c
        .ok(json!({
            "op": "update_reservation",
            "id": id,
            "start": "2030-06-03",
            "end": "2030-06-09",
            "resource": k2,
            "status": "CHECKED_IN",
        }))
        .await;
    assert_eq!(moved["reservation"]["resource_id"], json!(k2));
    assert_eq!(moved["reservation"]["status"], "CHECKED_IN");

    let refused = c.call(json!({ "op": "delete_reservation", "id": id })).await;
    assert_eq!(refused["error"]["kind"], "validation");

    let listed = c.ok(json!({ "op": "list_reservations", "pet_id": pet })).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let fetched = c.ok(json!({ "op": "get_reservation", "id": id })).await;
    assert_eq!(fetched["span"]["start"], moved["reservation"]["span"]["start"]);
}

#[tokio::test]
async fn conflicts_carry_structured_reasons() {
    let (addr, _tm) = start_test_server().await;
    let mut c = Client::connect(addr, "acme").await;
    let k1 = c.kennel("Run 1").await;
    let pet = Ulid::new().to_string();

    c.ok(reservation(&pet, "2030-07-01", "2030-07-03")).await;

    let report = c
        .ok(json!({
            "op": "detect_conflicts",
            "resource_id": k1,
            "pet_id": pet,
            "start": "2030-07-02",
            "end": "2030-07-04",
        }))
        .await;
    assert_eq!(report["conflict"], true);
    assert_eq!(report["reasons"].as_array().unwrap().len(), 2);

    let second = c.call(reservation(&pet, "2030-07-02", "2030-07-04")).await;
    assert_eq!(second["ok"], false);
    assert_eq!(second["error"]["status"], 409);
    assert_eq!(second["error"]["reasons"][0]["kind"], "pet_double_booked");
}

#[tokio::test]
async fn tenants_cannot_see_each_other() {
    let (addr, tm) = start_test_server().await;
    let mut a = Client::connect(addr, "tenant-a").await;
    let mut b = Client::connect(addr, "tenant-b").await;

    let run = a.kennel("Shared Name").await;
    let booked = a.ok(reservation(&Ulid::new().to_string(), "2030-08-01", "2030-08-03")).await;
    let id = booked["reservation"]["id"].as_str().unwrap().to_string();

    let listed = b.ok(json!({ "op": "list_resources" })).await;
    assert!(listed.as_array().unwrap().is_empty());

    let missing = b.call(json!({ "op": "get_reservation", "id": id })).await;
    assert_eq!(missing["error"]["status"], 404);

    let foreign = b
        .call(json!({
            "op": "check_availability",
            "resource_id": run,
            "start": "2030-08-01",
            "end": "2030-08-02",
        }))
        .await;
    assert_eq!(foreign["error"]["kind"], "not_found");

    // Tenant B has no kennel of its own, so a mandatory category fails there.
    let refused = b.call(reservation(&Ulid::new().to_string(), "2030-08-01", "2030-08-03")).await;
    assert_eq!(refused["error"]["kind"], "validation");

    assert_eq!(tm.tenant_count(), 2);
}

#[tokio::test]
async fn concurrent_clients_get_distinct_kennels() {
    let (addr, _tm) = start_test_server().await;
    let mut admin = Client::connect(addr, "busy").await;
    for i in 0..3 {
        admin.kennel(&format!("Run {i}")).await;
    }

    let mut handles = Vec::new();
    for _ in 0..12 {
        handles.push(tokio::spawn(async move {
            let mut c = Client::connect(addr, "busy").await;
            c.call(reservation(&Ulid::new().to_string(), "2030-12-24", "2030-12-27")).await
        }));
    }

    let mut assigned = Vec::new();
    for h in handles {
        let reply = h.await.unwrap();
        if reply["ok"] == true {
            assigned.push(reply["result"]["reservation"]["resource_id"].as_str().unwrap().to_string());
        } else {
            assert_eq!(reply["error"]["kind"], "validation", "{reply}");
        }
    }
    assigned.sort();
    assigned.dedup();
    assert_eq!(assigned.len(), 3);
}

#[tokio::test]
async fn bad_requests_do_not_close_the_connection() {
    let (addr, _tm) = start_test_server().await;
    let mut c = Client::connect(addr, "acme").await;

    let garbage = c.raw("{\"op\": ".to_string()).await;
    assert_eq!(garbage["error"]["kind"], "bad_request");

    let untenanted = c.raw(json!({ "op": "list_resources", "request_id": "r1" }).to_string()).await;
    assert_eq!(untenanted["request_id"], "r1");
    assert_eq!(untenanted["error"]["kind"], "tenant_context");

    let bad_tenant = c.raw(json!({ "op": "list_resources", "tenant": "../etc" }).to_string()).await;
    assert_eq!(bad_tenant["error"]["kind"], "tenant_context");

    let still_alive = c.ok(json!({ "op": "list_resources" })).await;
    assert!(still_alive.as_array().unwrap().is_empty());
}
