//! # REST API
//!
//! The axum router for the node's HTTP interface. Handlers share
//! [`AppState`] through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                              |
//! |--------|------------------------|------------------------------------------|
//! | GET    | `/health`              | Liveness probe                           |
//! | GET    | `/status`              | Tip, pool, candidates, validators        |
//! | POST   | `/transactions`        | Submit a transaction                     |
//! | GET    | `/transactions/:hash`  | Pending or final transaction             |
//! | GET    | `/blocks/:key`         | Final block by id or by hash             |
//! | GET    | `/blocks/:hash/final`  | Whether a block hash is final            |
//! | GET    | `/candidates`          | Candidates open for attestation          |
//! | GET    | `/candidates/:hash`    | One candidate's attestation progress     |
//! | POST   | `/attestations`        | Submit a CIP attestation                 |
//! | GET    | `/validators`          | Current validator set                    |
//! | POST   | `/seals/verify`        | Check a Neo Seal against a validator     |
//! | GET    | `/metrics`             | Prometheus metrics                       |
//!
//! Digests travel as 64-character lowercase hex everywhere.

use axum::{
    extract::{Path, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use helix_protocol::config::{PROTOCOL_NAME, PROTOCOL_VERSION};
use helix_protocol::consensus::{
    AttestationOutcome, CandidateSnapshot, CipAttestation, CipError, ValidatorSummary,
};
use helix_protocol::crypto::hash::QuadritDigest;
use helix_protocol::crypto::quadrit::QuadritSequence;
use helix_protocol::crypto::seal::NeoSeal;
use helix_protocol::storage::Block;
use helix_protocol::transaction::{Metadata, SubmitOutcome, TransactionBuilder, TransactionStatus};
use helix_protocol::{Ledger, LedgerError};

use crate::metrics::metrics_handler;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let metrics = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state.metrics.clone());

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/transactions", post(submit_transaction_handler))
        .route("/transactions/:hash", get(transaction_handler))
        .route("/blocks/:key", get(block_handler))
        .route("/blocks/:key/final", get(finality_handler))
        .route("/candidates", get(open_candidates_handler))
        .route("/candidates/:hash", get(candidate_handler))
        .route("/attestations", post(attestation_handler))
        .route("/validators", get(validators_handler))
        .route("/seals/verify", post(verify_seal_handler))
        .with_state(state)
        .merge(metrics)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

// ---------------------------------------------------------------------------
// Request & Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /transactions`. `data` is text that the node encodes to
/// quadrits; `payload` is an already-encoded quadrit string. Send at most
/// one of them.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTransactionRequest {
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    /// Unix milliseconds. The node's clock when omitted.
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub payload: Option<QuadritSequence>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTransactionResponse {
    pub hash: QuadritDigest,
    pub outcome: SubmitOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub protocol: String,
    /// Id the next finalized block will get; also the chain height.
    pub next_block_id: u64,
    pub tip_hash: QuadritDigest,
    pub pending_transactions: usize,
    pub open_candidates: usize,
    pub validators: usize,
    pub total_weight: u64,
    pub quorum: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub hash: QuadritDigest,
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub timestamp: u64,
    /// Payload decoded as UTF-8 text, when it is text.
    pub data: Option<String>,
    pub metadata: Metadata,
    pub status: TransactionStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttestationSummary {
    pub validator: QuadritDigest,
    pub counter: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockResponse {
    pub block_id: u64,
    pub block_hash: QuadritDigest,
    pub previous_block_hash: QuadritDigest,
    pub timestamp: u64,
    pub template_id: QuadritDigest,
    pub proposer: String,
    pub transactions: Vec<QuadritDigest>,
    pub attestations: Vec<AttestationSummary>,
}

impl From<&Block> for BlockResponse {
    fn from(block: &Block) -> Self {
        let template = block.rna_template();
        Self {
            block_id: block.block_id(),
            block_hash: block.block_hash(),
            previous_block_hash: block.previous_block_hash(),
            timestamp: block.timestamp(),
            template_id: template.template_id(),
            proposer: template.proposer().to_string(),
            transactions: block.transaction_hashes().to_vec(),
            attestations: block
                .cip()
                .iter()
                .map(|a| AttestationSummary {
                    validator: a.validator,
                    counter: a.seal.counter,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FinalityResponse {
    pub block_hash: QuadritDigest,
    pub is_final: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifySealRequest {
    /// Fingerprint of a registered validator.
    pub validator: QuadritDigest,
    pub message_hash: QuadritDigest,
    pub seal: NeoSeal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifySealResponse {
    pub valid: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A failed request: the status to answer with and a message for the body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.message, "request failed");
        }
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        let status = match &e {
            LedgerError::MalformedSequence(_)
            | LedgerError::MalformedTransaction(_)
            | LedgerError::Template(_)
            | LedgerError::Block(_)
            | LedgerError::Key(_) => StatusCode::BAD_REQUEST,
            LedgerError::Pool(_) => StatusCode::TOO_MANY_REQUESTS,
            LedgerError::Cip(cip) => match cip {
                CipError::UnknownCandidate(_) => StatusCode::NOT_FOUND,
                CipError::NotAValidator(_) => StatusCode::FORBIDDEN,
                CipError::InvalidSeal { .. }
                | CipError::MalformedTransaction(_)
                | CipError::InvalidBlock(_) => StatusCode::BAD_REQUEST,
                CipError::DuplicateCandidate(_)
                | CipError::NotYetOpen(_)
                | CipError::ConflictingAttestation(_)
                | CipError::AlreadyFinal(_)
                | CipError::CandidateRejected { .. }
                | CipError::ChainTipMismatch { .. }
                | CipError::TransactionAlreadyFinal(_) => StatusCode::CONFLICT,
                CipError::NoValidators | CipError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            LedgerError::Seal(_) | LedgerError::Storage(_) | LedgerError::Integrity(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, e.to_string())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_digest(raw: &str) -> Result<QuadritDigest, ApiError> {
    QuadritDigest::from_hex(raw).map_err(|e| ApiError::bad_request(format!("bad hash {raw}: {e}")))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`. Does not look at the ledger; that is what `/status` is for.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let ledger = &state.ledger;
    let tip = ledger.tip();
    let validators = ledger.validator_set();
    Json(StatusResponse {
        version: state.version.clone(),
        protocol: format!("{PROTOCOL_NAME}/{PROTOCOL_VERSION}"),
        next_block_id: tip.next_block_id,
        tip_hash: tip.tip_hash,
        pending_transactions: ledger.pool().size(),
        open_candidates: ledger.engine().open_candidates().len(),
        validators: validators.len(),
        total_weight: validators.total_weight(),
        quorum: ledger.engine().config().threshold.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `POST /transactions`. 202 for a new transaction, 200 when the hash was
/// already known.
async fn submit_transaction_handler(
    State(state): State<AppState>,
    Json(req): Json<SubmitTransactionRequest>,
) -> Result<(StatusCode, Json<SubmitTransactionResponse>), ApiError> {
    let mut builder = TransactionBuilder::new()
        .sender(&req.sender)
        .recipient(&req.recipient)
        .amount(req.amount)
        .metadata(req.metadata);
    if let Some(ts) = req.timestamp {
        builder = builder.timestamp(ts);
    }
    builder = match (req.data, req.payload) {
        (Some(_), Some(_)) => {
            return Err(ApiError::bad_request("send either data or payload, not both"))
        }
        (Some(text), None) => builder.data(&text),
        (None, Some(payload)) => builder.payload(payload),
        (None, None) => builder,
    };
    let tx = builder.build().map_err(LedgerError::from)?;
    let hash = tx.hash();

    let outcome = state.submit_transaction(tx)?;
    let status = match outcome {
        SubmitOutcome::Accepted => StatusCode::ACCEPTED,
        SubmitOutcome::Duplicate | SubmitOutcome::AlreadyFinal => StatusCode::OK,
    };
    Ok((status, Json(SubmitTransactionResponse { hash, outcome })))
}

async fn transaction_handler(
    Path(hash): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<TransactionResponse> {
    let digest = parse_digest(&hash)?;
    let (tx, status) = state
        .ledger
        .get_transaction(&digest)?
        .ok_or_else(|| ApiError::not_found(format!("transaction not found: {hash}")))?;
    Ok(Json(TransactionResponse {
        hash: digest,
        sender: tx.sender().to_string(),
        recipient: tx.recipient().to_string(),
        amount: tx.amount(),
        timestamp: tx.timestamp(),
        data: tx.payload_text(),
        metadata: tx.metadata().clone(),
        status,
    }))
}

/// `GET /blocks/:key`. A key of 64 hex characters is a block hash; anything
/// else must be a decimal block id.
async fn block_handler(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<BlockResponse> {
    let block = lookup_block(&state.ledger, &key)?
        .ok_or_else(|| ApiError::not_found(format!("block not found: {key}")))?;
    Ok(Json(BlockResponse::from(&block)))
}

fn lookup_block(ledger: &Ledger, key: &str) -> Result<Option<Block>, ApiError> {
    if key.len() == 64 {
        let hash = parse_digest(key)?;
        return Ok(ledger.get_block_by_hash(&hash)?);
    }
    let id: u64 = key
        .parse()
        .map_err(|_| ApiError::bad_request(format!("not a block id or hash: {key}")))?;
    Ok(ledger.get_block(id)?)
}

async fn finality_handler(
    Path(key): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<FinalityResponse> {
    let block_hash = parse_digest(&key)?;
    let is_final = state.ledger.is_final(&block_hash)?;
    Ok(Json(FinalityResponse {
        block_hash,
        is_final,
    }))
}

async fn open_candidates_handler(State(state): State<AppState>) -> Json<Vec<CandidateSnapshot>> {
    let ledger = &state.ledger;
    let snapshots = ledger
        .engine()
        .open_candidates()
        .iter()
        .filter_map(|hash| ledger.candidate_snapshot(hash))
        .collect();
    Json(snapshots)
}

async fn candidate_handler(
    Path(hash): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<CandidateSnapshot> {
    let digest = parse_digest(&hash)?;
    state
        .ledger
        .candidate_snapshot(&digest)
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("candidate not found: {hash}")))
}

async fn attestation_handler(
    State(state): State<AppState>,
    Json(att): Json<CipAttestation>,
) -> ApiResult<AttestationOutcome> {
    Ok(Json(state.submit_attestation(att)?))
}

async fn validators_handler(State(state): State<AppState>) -> Json<Vec<ValidatorSummary>> {
    Json(state.ledger.validator_set().summaries())
}

/// `POST /seals/verify`. Only registered validators can be checked; the
/// node has no other source of public systems.
async fn verify_seal_handler(
    State(state): State<AppState>,
    Json(req): Json<VerifySealRequest>,
) -> ApiResult<VerifySealResponse> {
    let validators = state.ledger.validator_set();
    let public_system = validators
        .public_system(&req.validator)
        .ok_or_else(|| ApiError::not_found(format!("unknown validator: {}", req.validator)))?;
    let valid = Ledger::verify_signature(public_system, &req.message_hash, &req.seal);
    Ok(Json(VerifySealResponse { valid }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use helix_protocol::crypto::hash::hash_bytes;
    use helix_protocol::crypto::seal::sign;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::state::test_support::{app_state, make_tx, validators};

    /// Sends a GET request and returns (status, body bytes).
    async fn get(router: &Router, path: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder().uri(path).body(Body::empty()).unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    /// Sends a POST request with a JSON body and returns (status, body bytes).
    async fn post_json<T: Serialize>(router: &Router, path: &str, body: &T) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, body)
    }

    /// Proposes everything pending and has three of four validators attest.
    fn finalize_pending(state: &AppState) -> QuadritDigest {
        let handle = state.propose_next("node", 100).unwrap().unwrap();
        for v in &validators()[..3] {
            let att = CipAttestation::sign(v.keypair(), handle.block_hash).unwrap();
            state.submit_attestation(att).unwrap();
        }
        handle.block_hash
    }

    // -- Health & status -----------------------------------------------------

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let router = create_router(app_state());
        let (status, body) = get(&router, "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn status_reports_genesis_and_validators() {
        let state = app_state();
        state.submit_transaction(make_tx(1)).unwrap();
        let router = create_router(state);
        let (status, body) = get(&router, "/status").await;

        assert_eq!(status, StatusCode::OK);
        let resp: StatusResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(resp.next_block_id, 0);
        assert!(resp.tip_hash.is_zero());
        assert_eq!(resp.pending_transactions, 1);
        assert_eq!(resp.validators, 4);
        assert_eq!(resp.total_weight, 4);
        assert_eq!(resp.quorum, ">2/3");
        assert_eq!(resp.protocol, "helix/0.1.0");
    }

    // -- Transactions --------------------------------------------------------

    #[tokio::test]
    async fn submit_then_fetch_pending_transaction() {
        let router = create_router(app_state());
        let req = SubmitTransactionRequest {
            sender: "alice".into(),
            recipient: "bob".into(),
            amount: 42,
            timestamp: Some(1_700_000_000_000),
            data: Some("coffee".into()),
            payload: None,
            metadata: Metadata::from([("order".to_string(), "17".to_string())]),
        };
        let (status, body) = post_json(&router, "/transactions", &req).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let submitted: SubmitTransactionResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(submitted.outcome, SubmitOutcome::Accepted);

        let (status, _) = post_json(&router, "/transactions", &req).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = get(&router, &format!("/transactions/{}", submitted.hash)).await;
        assert_eq!(status, StatusCode::OK);
        let tx: TransactionResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(tx.amount, 42);
        assert_eq!(tx.data.as_deref(), Some("coffee"));
        assert_eq!(tx.metadata["order"], "17");
        assert_eq!(tx.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn malformed_transaction_is_bad_request() {
        let router = create_router(app_state());
        let req = SubmitTransactionRequest {
            sender: String::new(),
            recipient: "bob".into(),
            amount: 1,
            timestamp: None,
            data: None,
            payload: None,
            metadata: Metadata::new(),
        };
        let (status, body) = post_json(&router, "/transactions", &req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.error.contains("malformed"));
    }

    #[tokio::test]
    async fn invalid_quadrit_payload_is_rejected() {
        let router = create_router(app_state());
        let body = serde_json::json!({
            "sender": "alice",
            "recipient": "bob",
            "amount": 1,
            "payload": "ATCGU"
        });
        let (status, _) = post_json(&router, "/transactions", &body).await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn transaction_lookup_errors() {
        let router = create_router(app_state());
        let (status, _) = get(&router, "/transactions/deadbeef").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let missing = hash_bytes(b"nothing");
        let (status, body) = get(&router, &format!("/transactions/{missing}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert!(err.error.contains("not found"));
    }

    // -- Blocks & finality ---------------------------------------------------

    #[tokio::test]
    async fn finalized_block_by_id_and_hash() {
        let state = app_state();
        let tx = make_tx(1);
        state.submit_transaction(tx.clone()).unwrap();
        let block_hash = finalize_pending(&state);
        let router = create_router(state);

        let (status, body) = get(&router, "/blocks/0").await;
        assert_eq!(status, StatusCode::OK);
        let by_id: BlockResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(by_id.block_hash, block_hash);
        assert!(by_id.previous_block_hash.is_zero());
        assert_eq!(by_id.transactions, vec![tx.hash()]);
        assert_eq!(by_id.attestations.len(), 3);

        let (status, body) = get(&router, &format!("/blocks/{block_hash}")).await;
        assert_eq!(status, StatusCode::OK);
        let by_hash: BlockResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(by_hash.block_id, 0);

        let (_, body) = get(&router, &format!("/blocks/{block_hash}/final")).await;
        let fin: FinalityResponse = serde_json::from_slice(&body).unwrap();
        assert!(fin.is_final);

        let (_, body) = get(&router, &format!("/transactions/{}", tx.hash())).await;
        let fetched: TransactionResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(fetched.status, TransactionStatus::Final);
    }

    #[tokio::test]
    async fn block_lookup_errors() {
        let router = create_router(app_state());
        let (status, _) = get(&router, "/blocks/999").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(&router, "/blocks/latest").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = hash_bytes(b"no block");
        let (status, body) = get(&router, &format!("/blocks/{unknown}/final")).await;
        assert_eq!(status, StatusCode::OK);
        let fin: FinalityResponse = serde_json::from_slice(&body).unwrap();
        assert!(!fin.is_final);
    }

    // -- Candidates & attestations -------------------------------------------

    #[tokio::test]
    async fn attestations_over_http_reach_finality() {
        let state = app_state();
        state.submit_transaction(make_tx(1)).unwrap();
        let handle = state.propose_next("node", 10).unwrap().unwrap();
        let router = create_router(state);

        let (_, body) = get(&router, "/candidates").await;
        let open: Vec<CandidateSnapshot> = serde_json::from_slice(&body).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].block_hash, handle.block_hash);
        assert_eq!(open[0].required_weight, 3);

        let mut last = None;
        for v in &validators()[..3] {
            let att = CipAttestation::sign(v.keypair(), handle.block_hash).unwrap();
            let (status, body) = post_json(&router, "/attestations", &att).await;
            assert_eq!(status, StatusCode::OK);
            last = Some(serde_json::from_slice::<AttestationOutcome>(&body).unwrap());
        }
        assert_eq!(last, Some(AttestationOutcome::Finalized { block_id: 0 }));

        let (_, body) = get(&router, &format!("/candidates/{}", handle.block_hash)).await;
        let snap: CandidateSnapshot = serde_json::from_slice(&body).unwrap();
        assert_eq!(snap.attesters.len(), 3);

        // Late attestation on a final block conflicts.
        let late = CipAttestation::sign(validators()[3].keypair(), handle.block_hash).unwrap();
        let (status, _) = post_json(&router, "/attestations", &late).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn attestation_for_unknown_candidate_is_404() {
        let router = create_router(app_state());
        let att = CipAttestation::sign(validators()[0].keypair(), hash_bytes(b"ghost")).unwrap();
        let (status, _) = post_json(&router, "/attestations", &att).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // -- Validators & seals --------------------------------------------------

    #[tokio::test]
    async fn validators_and_seal_verification() {
        let router = create_router(app_state());
        let (_, body) = get(&router, "/validators").await;
        let set: Vec<ValidatorSummary> = serde_json::from_slice(&body).unwrap();
        assert_eq!(set.len(), 4);
        assert!(set.iter().all(|v| v.weight == 1));

        let v = &validators()[1];
        let message_hash = hash_bytes(b"verify me");
        let seal = sign(v.keypair(), &message_hash).unwrap();

        let good = VerifySealRequest {
            validator: v.id(),
            message_hash,
            seal: seal.clone(),
        };
        let (status, body) = post_json(&router, "/seals/verify", &good).await;
        assert_eq!(status, StatusCode::OK);
        assert!(serde_json::from_slice::<VerifySealResponse>(&body).unwrap().valid);

        let wrong_signer = VerifySealRequest {
            validator: validators()[2].id(),
            message_hash,
            seal: seal.clone(),
        };
        let (_, body) = post_json(&router, "/seals/verify", &wrong_signer).await;
        assert!(!serde_json::from_slice::<VerifySealResponse>(&body).unwrap().valid);

        let stranger = VerifySealRequest {
            validator: hash_bytes(b"stranger"),
            message_hash,
            seal,
        };
        let (status, _) = post_json(&router, "/seals/verify", &stranger).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_text() {
        let state = app_state();
        state.submit_transaction(make_tx(1)).unwrap();
        let router = create_router(state);
        let (status, body) = get(&router, "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("helix_transactions_submitted_total 1"));
    }
}
