use anyhow::anyhow;
use log::info;
use rouille::{Request, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    io::Read,
    sync::{
        Arc, Mutex,
        mpsc::{self, Receiver, Sender},
    },
    time::Instant,
};

use crate::{
    config::HttpConfig,
    domain::{
        hash::ContentHash,
        identity::Identity,
        nft::{Amount, MintRequest, NftId},
        project::{ProjectId, TrackId},
    },
    http::{error::ApiError, rate_limit::RateLimiter},
    ledger::service::{CallKind, Ledger, Operation},
    pin::ContentPinner,
    storage::operations::{SnapshotInfo, Storage},
};

/// Header carrying the caller identity, set by the authenticating proxy.
pub const CALLER_HEADER: &str = "X-Caller";

/// Upload cap for `/pins`.
const MAX_PIN_BYTES: u64 = 64 * 1024 * 1024;

pub struct HttpServer {
    ledger: Arc<Ledger>,
    storage: Mutex<Storage>,
    pinner: Arc<dyn ContentPinner>,
    limiter: Option<RateLimiter>,
    shutdown_tx: Mutex<Sender<()>>,
    shutdown_rx: Mutex<Option<Receiver<()>>>,
    pub config: HttpConfig,
}

type ApiResult = Result<Response, ApiError>;

#[derive(Serialize, Deserialize)]
struct IdResponse {
    id: u64,
}

#[derive(Deserialize)]
struct ProjectBody {
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct TrackBody {
    name: String,
    content_hash: String,
    timestamp: Option<u64>,
}

#[derive(Deserialize)]
struct CollaboratorBody {
    identity: String,
}

#[derive(Deserialize)]
struct PriceBody {
    price: Amount,
}

#[derive(Deserialize)]
struct ForSaleBody {
    for_sale: bool,
}

#[derive(Deserialize)]
struct TransferBody {
    to: String,
}

#[derive(Serialize, Deserialize)]
struct PinResponse {
    hash: String,
    size: u64,
}

impl HttpServer {
    pub fn new(
        ledger: Arc<Ledger>,
        storage: Storage,
        pinner: Arc<dyn ContentPinner>,
        limiter: Option<RateLimiter>,
        config: HttpConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        Self {
            ledger,
            storage: Mutex::new(storage),
            pinner,
            limiter,
            shutdown_tx: Mutex::new(shutdown_tx),
            shutdown_rx: Mutex::new(Some(shutdown_rx)),
            config,
        }
    }

    /// Serves until `POST /admin/shutdown` stored its final snapshot.
    pub fn run(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.bind_addr, self.config.port);
        let shutdown = self
            .shutdown_rx
            .lock()
            .map_err(|e| anyhow!("shutdown channel poisoned: {e}"))?
            .take()
            .ok_or_else(|| anyhow!("server already running"))?;

        let this = Arc::new(self);
        let handler = {
            let this = Arc::clone(&this);
            move |request: &Request| this.handle_request(request)
        };
        let server = rouille::Server::new(addr, handler)
            .map_err(|e| anyhow!("failed to start http server: {e}"))?;
        let (handle, stop) = server.stoppable();

        // a dropped sender also ends the loop
        let _ = shutdown.recv();
        info!("shutting down http server");
        let _ = stop.send(());
        handle
            .join()
            .map_err(|_| anyhow!("http server thread panicked"))?;
        Ok(())
    }

    fn handle_request(&self, request: &Request) -> Response {
        Self::log_request(request);

        let response = self.route(request).unwrap_or_else(|e| {
            log::debug!("{} {} failed: {:?}", request.method(), request.url(), e);
            e.into_response()
        });
        info!("Response: {} {}", request.method(), response.status_code);
        response
    }

    fn route(&self, request: &Request) -> ApiResult {
        rouille::router!(request,
            (GET) (/projects) => {
                Ok(Response::json(&self.ledger.list_projects()))
            },
            (POST) (/projects) => {
                self.handle_create_project(request)
            },
            (GET) (/projects/{id: ProjectId}) => {
                self.handle_get_project(id)
            },
            (PUT) (/projects/{id: ProjectId}) => {
                self.handle_update_project(request, id)
            },
            (DELETE) (/projects/{id: ProjectId}) => {
                let caller = self.caller(request, Operation::DeleteProject)?;
                Ok(Response::json(&self.ledger.delete_project(&caller, id)?))
            },
            (GET) (/projects/{id: ProjectId}/tracks) => {
                Ok(Response::json(&self.ledger.get_project_tracks(id)))
            },
            (POST) (/projects/{id: ProjectId}/tracks) => {
                self.handle_add_track(request, id)
            },
            (DELETE) (/projects/{id: ProjectId}/tracks/{track: TrackId}) => {
                let caller = self.caller(request, Operation::RemoveTrack)?;
                self.ledger.remove_track(&caller, id, track)?;
                Ok(Response::empty_204())
            },
            (POST) (/projects/{id: ProjectId}/collaborators) => {
                let caller = self.caller(request, Operation::AddCollaborator)?;
                let body: CollaboratorBody = Self::json_body(request)?;
                self.ledger.add_collaborator(&caller, id, body.identity.into())?;
                Ok(Response::empty_204())
            },
            (DELETE) (/projects/{id: ProjectId}/collaborators/{who: String}) => {
                let caller = self.caller(request, Operation::RemoveCollaborator)?;
                self.ledger.remove_collaborator(&caller, id, &who.into())?;
                Ok(Response::empty_204())
            },
            (GET) (/nfts) => {
                Ok(Response::json(&self.ledger.list_nfts()))
            },
            (POST) (/nfts) => {
                let caller = self.caller(request, Operation::MintNft)?;
                let mint: MintRequest = Self::json_body(request)?;
                let id = self.ledger.mint_nft(&caller, mint)?;
                Ok(Response::json(&IdResponse { id }).with_status_code(201))
            },
            (GET) (/nfts/{id: NftId}) => {
                match self.ledger.get_nft(id) {
                    Some(nft) => Ok(Response::json(&nft)),
                    None => Err(ApiError::NotFound(format!("nft {id} not found"))),
                }
            },
            (GET) (/nfts/{id: NftId}/history) => {
                Ok(Response::json(&self.ledger.get_nft_history(id)))
            },
            (PUT) (/nfts/{id: NftId}/price) => {
                let caller = self.caller(request, Operation::UpdateNftPrice)?;
                let body: PriceBody = Self::json_body(request)?;
                self.ledger.update_nft_price(&caller, id, body.price)?;
                Ok(Response::empty_204())
            },
            (PUT) (/nfts/{id: NftId}/for-sale) => {
                let caller = self.caller(request, Operation::SetNftForSale)?;
                let body: ForSaleBody = Self::json_body(request)?;
                self.ledger.set_nft_for_sale(&caller, id, body.for_sale)?;
                Ok(Response::empty_204())
            },
            (POST) (/nfts/{id: NftId}/transfer) => {
                let caller = self.caller(request, Operation::TransferNft)?;
                let body: TransferBody = Self::json_body(request)?;
                self.ledger.transfer_nft(&caller, id, body.to.into())?;
                Ok(Response::empty_204())
            },
            (POST) (/nfts/{id: NftId}/buy) => {
                let caller = self.caller(request, Operation::BuyNft)?;
                Ok(Response::json(&self.ledger.buy_nft(&caller, id)?))
            },
            (POST) (/nfts/{id: NftId}/reconcile) => {
                let caller = self.caller(request, Operation::RetryRoyalty)?;
                Ok(Response::json(&self.ledger.retry_royalty(&caller, id)?))
            },
            (GET) (/users/{who: String}/projects) => {
                Ok(Response::json(&self.ledger.list_user_projects(&who.into())))
            },
            (GET) (/users/{who: String}/nfts) => {
                Ok(Response::json(&self.ledger.list_user_nfts(&who.into())))
            },
            (GET) (/users/{who: String}/created) => {
                Ok(Response::json(&self.ledger.list_created_nfts(&who.into())))
            },
            (GET) (/users/{who: String}/royalties) => {
                Ok(Response::json(&self.ledger.list_royalty_earnings(&who.into())))
            },
            (GET) (/settlements/pending) => {
                Ok(Response::json(&self.ledger.list_pending_settlements()))
            },
            (GET) (/stats) => {
                Ok(Response::json(&self.ledger.marketplace_stats()))
            },
            (POST) (/pins) => {
                self.handle_pin(request)
            },
            (POST) (/admin/checkpoint) => {
                self.require_operator(request)?;
                let info = self.quiesced_checkpoint();
                self.ledger.resume();
                Ok(Response::json(&info?))
            },
            (POST) (/admin/shutdown) => {
                self.handle_shutdown(request)
            },
            _ => Ok(Response::empty_404())
        )
    }

    fn log_request(request: &Request) {
        info!("{} {}", request.method(), request.url());
    }

    /// Resolves the caller of a ledger operation.
    fn caller(&self, request: &Request, op: Operation) -> Result<Identity, ApiError> {
        self.caller_for(request, op.kind())
    }

    /// Resolves the caller from the identity header and applies the rate
    /// limit to mutating calls, ledger operations or not.
    fn caller_for(&self, request: &Request, kind: CallKind) -> Result<Identity, ApiError> {
        let caller = request
            .header(CALLER_HEADER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Identity::from)
            .ok_or_else(|| ApiError::Unauthenticated(format!("missing {CALLER_HEADER} header")))?;

        if kind == CallKind::Mutating {
            if let Some(limiter) = &self.limiter {
                if !limiter.allow(&caller, Instant::now()) {
                    return Err(ApiError::TooManyRequests(format!(
                        "{caller} exceeded the call limit"
                    )));
                }
            }
        }
        Ok(caller)
    }

    fn require_operator(&self, request: &Request) -> Result<Identity, ApiError> {
        let caller = request
            .header(CALLER_HEADER)
            .map(Identity::from)
            .ok_or_else(|| ApiError::Unauthenticated(format!("missing {CALLER_HEADER} header")))?;
        if !self.config.operators.iter().any(|op| op == caller.as_str()) {
            return Err(ApiError::Forbidden(format!("{caller} is not an operator")));
        }
        Ok(caller)
    }

    fn json_body<T: DeserializeOwned>(request: &Request) -> Result<T, ApiError> {
        rouille::input::json_input(request)
            .map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
    }

    fn storage_lock(&self) -> Result<std::sync::MutexGuard<'_, Storage>, ApiError> {
        self.storage
            .lock()
            .map_err(|e| ApiError::Internal(format!("could not access snapshot storage: {e}")))
    }

    fn handle_create_project(&self, request: &Request) -> ApiResult {
        let caller = self.caller(request, Operation::CreateProject)?;
        let body: ProjectBody = Self::json_body(request)?;
        let id = self
            .ledger
            .create_project(&caller, body.title, body.description)?;
        Ok(Response::json(&IdResponse { id }).with_status_code(201))
    }

    fn handle_get_project(&self, id: ProjectId) -> ApiResult {
        match self.ledger.get_project(id) {
            Some(project) => Ok(Response::json(&project)),
            None => Err(ApiError::NotFound(format!("project {id} not found"))),
        }
    }

    fn handle_update_project(&self, request: &Request, id: ProjectId) -> ApiResult {
        let caller = self.caller(request, Operation::UpdateProject)?;
        let body: ProjectBody = Self::json_body(request)?;
        self.ledger
            .update_project(&caller, id, body.title, body.description)?;
        Ok(Response::empty_204())
    }

    fn handle_add_track(&self, request: &Request, project: ProjectId) -> ApiResult {
        let caller = self.caller(request, Operation::AddTrack)?;
        let body: TrackBody = Self::json_body(request)?;
        let timestamp = body
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64);
        let id = self.ledger.add_track(
            &caller,
            project,
            body.name,
            ContentHash::new(body.content_hash),
            timestamp,
        )?;
        Ok(Response::json(&IdResponse { id }).with_status_code(201))
    }

    /// Raw request body in, opaque content hash out. Pinning writes to the
    /// content store, so it counts against the caller's mutation budget.
    fn handle_pin(&self, request: &Request) -> ApiResult {
        self.caller_for(request, CallKind::Mutating)?;
        let name = request.get_param("name").unwrap_or_else(|| "upload".into());
        let mut bytes = Vec::new();
        if let Some(data) = request.data() {
            data.take(MAX_PIN_BYTES + 1)
                .read_to_end(&mut bytes)
                .map_err(|e| ApiError::BadRequest(format!("could not read upload: {e}")))?;
        }
        if bytes.len() as u64 > MAX_PIN_BYTES {
            return Err(ApiError::BadRequest(format!(
                "upload larger than {MAX_PIN_BYTES} bytes"
            )));
        }
        let pinned = self.pinner.pin(&name, &bytes)?;
        Ok(Response::json(&PinResponse {
            hash: pinned.hash.to_string(),
            size: pinned.size,
        })
        .with_status_code(201))
    }

    /// Snapshot taken once every admitted mutating call has returned.
    fn quiesced_checkpoint(&self) -> Result<SnapshotInfo, ApiError> {
        self.ledger.quiesce();
        Ok(self.storage_lock()?.checkpoint(&self.ledger)?)
    }

    fn handle_shutdown(&self, request: &Request) -> ApiResult {
        let operator = self.require_operator(request)?;
        // the gate stays closed on success, nothing may change after the final snapshot
        let info = self.quiesced_checkpoint().inspect_err(|_| self.ledger.resume())?;
        info!("{operator} requested shutdown, final snapshot {}", info.snapshot_id);
        self.shutdown_tx
            .lock()
            .map_err(|e| ApiError::Internal(format!("shutdown channel poisoned: {e}")))?
            .send(())
            .map_err(|e| ApiError::Internal(format!("could not signal shutdown: {e}")))?;
        Ok(Response::json(&info))
    }
}

#[cfg(test)]
pub fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: rouille::Response,
) -> anyhow::Result<T> {
    Ok(serde_json::from_reader(
        response.data.into_reader_and_size().0,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{LedgerConfig, RateLimitConfig},
        domain::{nft::Nft, project::Project},
        ledger::{LedgerState, service::Ledger},
        pin::LocalPinner,
        storage::{operations::Storage, schema},
        transfer::{TransferError, ValueTransfer, testing::ScriptedTransfers},
    };

    use std::{
        sync::{
            Barrier,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
        time::Duration,
    };

    use rouille::Request;
    use rusqlite::Connection;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    struct Fixture<T = ScriptedTransfers> {
        server: HttpServer,
        transfers: Arc<T>,
        _pins: TempDir,
    }

    fn create_server(limiter: Option<RateLimiter>) -> anyhow::Result<Fixture> {
        create_server_with(Arc::new(ScriptedTransfers::new()), limiter)
    }

    fn create_server_with<T: ValueTransfer + 'static>(
        transfers: Arc<T>,
        limiter: Option<RateLimiter>,
    ) -> anyhow::Result<Fixture<T>> {
        let dyn_transfers: Arc<dyn ValueTransfer> = transfers.clone();
        let ledger = Arc::new(Ledger::new(
            LedgerState::default(),
            dyn_transfers,
            LedgerConfig::default(),
        ));

        let conn = Connection::open_in_memory()?;
        schema::init(&conn)?;
        let pins = TempDir::new()?;
        let pinner = Arc::new(LocalPinner::new(pins.path())?);

        let server = HttpServer::new(
            ledger,
            Storage::from_existing_conn(conn),
            pinner,
            limiter,
            HttpConfig {
                bind_addr: "0.0.0.0".to_string(),
                port: 8080,
                operators: vec!["ops".to_string()],
            },
        );
        Ok(Fixture {
            server,
            transfers,
            _pins: pins,
        })
    }

    fn call(server: &HttpServer, method: &str, url: &str, caller: Option<&str>, body: Value) -> Response {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(caller) = caller {
            headers.push((CALLER_HEADER.to_string(), caller.to_string()));
        }
        let data = if body.is_null() {
            vec![]
        } else {
            serde_json::to_vec(&body).unwrap()
        };
        server.handle_request(&Request::fake_http(method, url, headers, data))
    }

    fn error_kind(response: Response) -> anyhow::Result<String> {
        let body: Value = parse_json_response(response)?;
        Ok(body["error"].as_str().unwrap_or_default().to_string())
    }

    /// project 0 by alice, nft 1 listed at 1_000_000 with 10% royalty
    fn seed(server: &HttpServer) -> anyhow::Result<()> {
        let response = call(
            server,
            "POST",
            "/projects",
            Some("alice"),
            json!({"title": "Song A", "description": "desc"}),
        );
        assert_eq!(response.status_code, 201);
        let created: IdResponse = parse_json_response(response)?;
        assert_eq!(created.id, 0);

        let response = call(
            server,
            "POST",
            "/nfts",
            Some("alice"),
            json!({
                "name": "T1",
                "description": "d",
                "image_ref": "img",
                "project_id": 0,
                "price": 1_000_000,
                "royalty_percentage": 10
            }),
        );
        assert_eq!(response.status_code, 201);
        let minted: IdResponse = parse_json_response(response)?;
        assert_eq!(minted.id, 1);
        Ok(())
    }

    #[test]
    fn test_http_create_and_get_project() -> anyhow::Result<()> {
        let fixture = create_server(None)?;
        seed(&fixture.server)?;

        let response = call(&fixture.server, "GET", "/projects/0", None, Value::Null);
        assert_eq!(response.status_code, 200);
        let project: Project = parse_json_response(response)?;
        assert_eq!(project.title, "Song A");
        assert_eq!(project.owner, Identity::from("alice"));

        let response = call(&fixture.server, "GET", "/projects/42", None, Value::Null);
        assert_eq!(response.status_code, 404);
        Ok(())
    }

    #[test]
    fn test_http_mutation_without_caller_is_unauthenticated() -> anyhow::Result<()> {
        let fixture = create_server(None)?;

        let response = call(
            &fixture.server,
            "POST",
            "/projects",
            None,
            json!({"title": "Song A"}),
        );

        assert_eq!(response.status_code, 401);
        assert!(fixture.server.ledger.list_projects().is_empty());
        Ok(())
    }

    #[test]
    fn test_http_buy_flow() -> anyhow::Result<()> {
        let fixture = create_server(None)?;
        seed(&fixture.server)?;

        let response = call(&fixture.server, "POST", "/nfts/1/buy", Some("bob"), Value::Null);
        assert_eq!(response.status_code, 200);
        let settlement: Value = parse_json_response(response)?;
        assert_eq!(settlement["split"]["royalty_amount"], 100_000);
        assert_eq!(settlement["split"]["seller_amount"], 900_000);

        let response = call(&fixture.server, "GET", "/nfts/1", None, Value::Null);
        let nft: Nft = parse_json_response(response)?;
        assert_eq!(nft.owner, Identity::from("bob"));
        assert!(!nft.for_sale);

        let response = call(&fixture.server, "POST", "/nfts/1/buy", Some("carol"), Value::Null);
        assert_eq!(response.status_code, 400);
        assert_eq!(error_kind(response)?, "invalid_input");
        Ok(())
    }

    #[test]
    fn test_http_partial_settlement_is_distinct() -> anyhow::Result<()> {
        let fixture = create_server(None)?;
        seed(&fixture.server)?;
        fixture.transfers.push_outcome(true);
        fixture.transfers.push_outcome(false);

        let response = call(&fixture.server, "POST", "/nfts/1/buy", Some("bob"), Value::Null);
        assert_eq!(response.status_code, 502);
        assert_eq!(error_kind(response)?, "royalty_transfer_failed");

        let response = call(&fixture.server, "GET", "/settlements/pending", None, Value::Null);
        let pending: Value = parse_json_response(response)?;
        assert_eq!(pending.as_array().map(Vec::len), Some(1));

        let response = call(&fixture.server, "POST", "/nfts/1/buy", Some("carol"), Value::Null);
        assert_eq!(response.status_code, 409);

        let response = call(&fixture.server, "POST", "/nfts/1/reconcile", Some("bob"), Value::Null);
        assert_eq!(response.status_code, 200);
        assert_eq!(
            fixture.server.ledger.get_nft(1).unwrap().owner,
            Identity::from("bob")
        );
        Ok(())
    }

    #[test]
    fn test_http_stranger_is_forbidden() -> anyhow::Result<()> {
        let fixture = create_server(None)?;
        seed(&fixture.server)?;

        let response = call(
            &fixture.server,
            "POST",
            "/projects/0/tracks",
            Some("mallory"),
            json!({"name": "x", "content_hash": "h"}),
        );
        assert_eq!(response.status_code, 403);
        assert_eq!(error_kind(response)?, "unauthorized");

        let response = call(
            &fixture.server,
            "PUT",
            "/nfts/1/price",
            Some("mallory"),
            json!({"price": 1}),
        );
        assert_eq!(response.status_code, 403);
        Ok(())
    }

    #[test]
    fn test_http_pin_then_add_track() -> anyhow::Result<()> {
        let fixture = create_server(None)?;
        seed(&fixture.server)?;

        let request = Request::fake_http(
            "POST",
            "/pins?name=take1.wav",
            vec![(CALLER_HEADER.to_string(), "alice".to_string())],
            b"RIFF....WAVE".to_vec(),
        );
        let response = fixture.server.handle_request(&request);
        assert_eq!(response.status_code, 201);
        let pinned: PinResponse = parse_json_response(response)?;
        assert_eq!(pinned.size, 12);

        let response = call(
            &fixture.server,
            "POST",
            "/projects/0/tracks",
            Some("alice"),
            json!({"name": "take 1", "content_hash": &pinned.hash, "timestamp": 5}),
        );
        assert_eq!(response.status_code, 201);

        let tracks = fixture.server.ledger.get_project_tracks(0);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].content_hash.as_str(), pinned.hash);
        Ok(())
    }

    #[test]
    fn test_http_rate_limit_applies_to_mutations_only() -> anyhow::Result<()> {
        let fixture = create_server(Some(RateLimiter::new(&RateLimitConfig {
            max_calls: 1,
            window_secs: 3600,
            max_tracked: 16,
        })))?;

        let first = call(
            &fixture.server,
            "POST",
            "/projects",
            Some("alice"),
            json!({"title": "one"}),
        );
        assert_eq!(first.status_code, 201);

        let second = call(
            &fixture.server,
            "POST",
            "/projects",
            Some("alice"),
            json!({"title": "two"}),
        );
        assert_eq!(second.status_code, 429);

        let read = call(&fixture.server, "GET", "/projects", Some("alice"), Value::Null);
        assert_eq!(read.status_code, 200);
        Ok(())
    }

    #[test]
    fn test_http_checkpoint_requires_operator() -> anyhow::Result<()> {
        let fixture = create_server(None)?;
        seed(&fixture.server)?;

        let response = call(&fixture.server, "POST", "/admin/checkpoint", Some("alice"), Value::Null);
        assert_eq!(response.status_code, 403);

        let response = call(&fixture.server, "POST", "/admin/checkpoint", Some("ops"), Value::Null);
        assert_eq!(response.status_code, 200);

        let storage = fixture.server.storage.lock().unwrap();
        assert_eq!(storage.list_snapshots()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_http_unknown_route() -> anyhow::Result<()> {
        let fixture = create_server(None)?;
        let response = call(&fixture.server, "GET", "/nowhere", None, Value::Null);
        assert_eq!(response.status_code, 404);
        Ok(())
    }

    /// Holds the royalty leg of the first purchase until the test releases it.
    struct PausingTransfers {
        gate: Barrier,
        calls: AtomicUsize,
    }

    impl ValueTransfer for PausingTransfers {
        fn transfer(&self, _to: &Identity, _amount: Amount, _memo: &str) -> Result<(), TransferError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                self.gate.wait();
                self.gate.wait();
            }
            Ok(())
        }
    }

    #[test]
    fn test_http_shutdown_waits_for_suspended_purchase() -> anyhow::Result<()> {
        let fixture = create_server_with(
            Arc::new(PausingTransfers {
                gate: Barrier::new(2),
                calls: AtomicUsize::new(0),
            }),
            None,
        )?;
        seed(&fixture.server)?;
        let server = &fixture.server;

        let (bought, shutdown) = thread::scope(|s| {
            let buy = s.spawn(|| call(server, "POST", "/nfts/1/buy", Some("bob"), Value::Null));
            // seller is paid, the royalty leg is parked
            fixture.transfers.gate.wait();

            let shutdown = s.spawn(|| call(server, "POST", "/admin/shutdown", Some("ops"), Value::Null));
            // until the gate closes an admitted call only hits a 404
            let mut closed = false;
            for _ in 0..500 {
                let attempt = call(server, "PUT", "/nfts/99/price", Some("carol"), json!({"price": 1}));
                if attempt.status_code == 503 {
                    closed = true;
                    break;
                }
                thread::sleep(Duration::from_millis(10));
            }
            assert!(closed);
            assert!(!shutdown.is_finished());

            fixture.transfers.gate.wait();
            (buy.join().unwrap(), shutdown.join().unwrap())
        });
        assert_eq!(bought.status_code, 200);
        assert_eq!(shutdown.status_code, 200);

        let late = call(server, "POST", "/projects", Some("alice"), json!({"title": "late"}));
        assert_eq!(late.status_code, 503);
        assert_eq!(error_kind(late)?, "unavailable");

        let (_, body) = server.storage.lock().unwrap().latest_snapshot()?.unwrap();
        let restored = Ledger::restore(&body, Arc::new(ScriptedTransfers::new()), LedgerConfig::default())?;
        let nft = restored.get_nft(1).unwrap();
        assert_eq!(nft.owner, Identity::from("bob"));
        assert!(!nft.for_sale);
        assert!(restored.list_pending_settlements().is_empty());
        assert_eq!(restored.list_projects().len(), 1);
        assert_eq!(restored.list_royalty_earnings(&"alice".into())[0].amount, 100_000);
        Ok(())
    }

    #[test]
    fn test_http_checkpoint_reopens_for_mutations() -> anyhow::Result<()> {
        let fixture = create_server(None)?;
        seed(&fixture.server)?;

        let response = call(&fixture.server, "POST", "/admin/checkpoint", Some("ops"), Value::Null);
        assert_eq!(response.status_code, 200);

        let response = call(&fixture.server, "POST", "/projects", Some("alice"), json!({"title": "after"}));
        assert_eq!(response.status_code, 201);
        Ok(())
    }

    #[test]
    fn test_http_pins_count_as_mutations() -> anyhow::Result<()> {
        let fixture = create_server(Some(RateLimiter::new(&RateLimitConfig {
            max_calls: 1,
            window_secs: 3600,
            max_tracked: 16,
        })))?;
        let pin = |bytes: &[u8]| {
            fixture.server.handle_request(&Request::fake_http(
                "POST",
                "/pins?name=take.wav",
                vec![(CALLER_HEADER.to_string(), "alice".to_string())],
                bytes.to_vec(),
            ))
        };

        assert_eq!(pin(b"first take").status_code, 201);
        assert_eq!(pin(b"second take").status_code, 429);

        let read = call(&fixture.server, "GET", "/stats", Some("alice"), Value::Null);
        assert_eq!(read.status_code, 200);
        Ok(())
    }
}
