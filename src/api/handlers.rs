use std::sync::Mutex;

use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::ledger::registry::{Patient, User};
use crate::ledger::{
    AccessRecord, Block, Ledger, LedgerError, RecordTransaction, RepairReport, Role,
};

/// Data structure for the shared ledger state
///
/// One mutex guards the whole ledger; every handler holds it for the full
/// operation so appends stay serialized.
pub type LedgerData = web::Data<Mutex<Ledger>>;

/// Maps a ledger error onto the HTTP status taxonomy
///
/// Validation problems are the client's fault, consensus preconditions are
/// conflicts, integrity and persistence failures are server-side.
fn error_response(err: &LedgerError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });

    match err {
        LedgerError::Validation(_) => HttpResponse::BadRequest().json(body),
        LedgerError::Consensus(_) => HttpResponse::Conflict().json(body),
        LedgerError::Integrity(_) | LedgerError::Persistence(_) => {
            HttpResponse::InternalServerError().json(body)
        }
    }
}

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Get the full chain
///
/// Returns the entire chain and its validity status
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    let ledger = ledger.lock().unwrap();

    let response = ChainResponse {
        length: ledger.chain().len(),
        chain: ledger.chain().to_vec(),
        is_valid: ledger.is_valid(),
    };

    HttpResponse::Ok().json(response)
}

/// Response carrying a single block
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BlockResponse {
    /// The message
    pub message: String,

    /// The block in question
    pub block: Block,
}

/// Create the genesis block
///
/// Fails with a conflict when the chain already has one
#[utoipa::path(
    post,
    path = "/api/v1/genesis",
    responses(
        (status = 201, description = "Genesis block created", body = BlockResponse),
        (status = 409, description = "Genesis already exists")
    )
)]
pub async fn create_genesis(ledger: LedgerData) -> impl Responder {
    let mut ledger = ledger.lock().unwrap();

    match ledger.create_genesis() {
        Ok(block) => HttpResponse::Created().json(BlockResponse {
            message: "Genesis block created".to_string(),
            block,
        }),
        Err(err) => error_response(&err),
    }
}

/// Request for the block production endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BlockRequest {
    /// The medical record transactions to include
    pub transactions: Vec<RecordTransaction>,
}

/// Produce the next block
///
/// Authorizes every record against the consent registry, selects the
/// producer via round-robin over the current winners, and appends the block
#[utoipa::path(
    post,
    path = "/api/v1/blocks",
    request_body = BlockRequest,
    responses(
        (status = 201, description = "Block produced successfully", body = BlockResponse),
        (status = 400, description = "Invalid transaction data"),
        (status = 409, description = "Consensus preconditions not met"),
        (status = 500, description = "Chain integrity failure")
    )
)]
pub async fn add_block(ledger: LedgerData, block_req: web::Json<BlockRequest>) -> impl Responder {
    let mut ledger = ledger.lock().unwrap();

    for tx in &block_req.transactions {
        if let Err(err) = tx.validate().map_err(LedgerError::from) {
            return error_response(&err);
        }
        if let Err(err) = ledger.authorize_record(tx) {
            return error_response(&err);
        }
    }

    match ledger.add_block(block_req.into_inner().transactions) {
        Ok(block) => HttpResponse::Created().json(BlockResponse {
            message: format!("Block {} added to chain", block.index),
            block,
        }),
        Err(err) => error_response(&err),
    }
}

/// Response for the validation endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ValidationResponse {
    /// Whether the chain passed validation
    pub is_valid: bool,

    /// The first violation found, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Validate the chain
///
/// Walks the whole chain and reports the first violation, if any
#[utoipa::path(
    get,
    path = "/api/v1/validate",
    responses(
        (status = 200, description = "Chain validation status", body = ValidationResponse)
    )
)]
pub async fn validate_chain(ledger: LedgerData) -> impl Responder {
    let ledger = ledger.lock().unwrap();

    let response = match ledger.validate() {
        Ok(()) => ValidationResponse {
            is_valid: true,
            error: None,
        },
        Err(err) => ValidationResponse {
            is_valid: false,
            error: Some(err.to_string()),
        },
    };

    HttpResponse::Ok().json(response)
}

/// Request for the repair endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RepairRequest {
    /// Explicit confirmation; repair rewrites chain linkage
    pub confirm: bool,
}

/// Repair the chain
///
/// Rewrites broken hash linkage and Merkle roots from block 1 upward.
/// Repair masks tampering instead of rejecting it, hence the explicit
/// confirmation
#[utoipa::path(
    post,
    path = "/api/v1/repair",
    request_body = RepairRequest,
    responses(
        (status = 200, description = "Repair report", body = RepairReport),
        (status = 400, description = "Missing confirmation")
    )
)]
pub async fn repair_chain(ledger: LedgerData, repair_req: web::Json<RepairRequest>) -> impl Responder {
    if !repair_req.confirm {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "Repair rewrites chain linkage. Set confirm to true to proceed"
        }));
    }

    let mut ledger = ledger.lock().unwrap();

    match ledger.repair() {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(err) => error_response(&err),
    }
}

/// Get the state root
///
/// Digest over delegates, stakes, and votes
#[utoipa::path(
    get,
    path = "/api/v1/state-root",
    responses(
        (status = 200, description = "State root retrieved successfully")
    )
)]
pub async fn get_state_root(ledger: LedgerData) -> impl Responder {
    let ledger = ledger.lock().unwrap();

    HttpResponse::Ok().json(serde_json::json!({
        "state_root": ledger.state_root()
    }))
}

/// Response for the producer endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ProducerResponse {
    /// The producer the scheduler would pick next, if any
    pub expected: Option<String>,

    /// The current winner set, ascending id order
    pub winners: Vec<String>,
}

/// Peek at the expected producer
///
/// Read-only: the scheduler pointer does not move
#[utoipa::path(
    get,
    path = "/api/v1/producer",
    responses(
        (status = 200, description = "Expected producer retrieved successfully", body = ProducerResponse)
    )
)]
pub async fn get_producer(ledger: LedgerData) -> impl Responder {
    let ledger = ledger.lock().unwrap();
    let (expected, winners) = ledger.expected_producer();

    HttpResponse::Ok().json(ProducerResponse { expected, winners })
}

/// Request for the user registration endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterUserRequest {
    /// The role to register under
    pub role: Role,

    /// Unique user id
    pub id: String,

    /// Display name
    pub name: String,
}

/// Register a user
///
/// Ids are unique across doctors, patients, and admins
#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "User registered successfully"),
        (status = 400, description = "Invalid user data")
    )
)]
pub async fn register_user(
    ledger: LedgerData,
    user_req: web::Json<RegisterUserRequest>,
) -> impl Responder {
    let mut ledger = ledger.lock().unwrap();

    match ledger.register_user(user_req.role, &user_req.id, &user_req.name) {
        Ok(()) => HttpResponse::Created().json(serde_json::json!({
            "message": format!("Registered {}", user_req.id)
        })),
        Err(err) => error_response(&err),
    }
}

/// Response for the user directory endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DirectoryResponse {
    /// Registered doctors
    pub doctors: Vec<User>,

    /// Registered patients, including their consent lists
    pub patients: Vec<Patient>,

    /// Registered admins
    pub admins: Vec<User>,
}

/// Get the user directory
#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses(
        (status = 200, description = "User directory retrieved successfully", body = DirectoryResponse)
    )
)]
pub async fn get_users(ledger: LedgerData) -> impl Responder {
    let ledger = ledger.lock().unwrap();
    let registry = ledger.registry();

    HttpResponse::Ok().json(DirectoryResponse {
        doctors: registry.doctors().to_vec(),
        patients: registry.patients().to_vec(),
        admins: registry.admins().to_vec(),
    })
}

/// Request for the consent endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ConsentRequest {
    /// The patient granting or revoking
    pub patient_id: String,

    /// The doctor the consent targets
    pub doctor_id: String,
}

/// Grant consent
///
/// Records a patient's consent for a doctor to write their records
#[utoipa::path(
    post,
    path = "/api/v1/consent/grant",
    request_body = ConsentRequest,
    responses(
        (status = 200, description = "Consent granted"),
        (status = 400, description = "Invalid consent request")
    )
)]
pub async fn grant_consent(
    ledger: LedgerData,
    consent_req: web::Json<ConsentRequest>,
) -> impl Responder {
    let mut ledger = ledger.lock().unwrap();

    match ledger.grant_consent(&consent_req.patient_id, &consent_req.doctor_id) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "message": format!("Consent granted to {}", consent_req.doctor_id)
        })),
        Err(err) => error_response(&err),
    }
}

/// Revoke consent
#[utoipa::path(
    post,
    path = "/api/v1/consent/revoke",
    request_body = ConsentRequest,
    responses(
        (status = 200, description = "Consent revoked"),
        (status = 400, description = "Invalid consent request")
    )
)]
pub async fn revoke_consent(
    ledger: LedgerData,
    consent_req: web::Json<ConsentRequest>,
) -> impl Responder {
    let mut ledger = ledger.lock().unwrap();

    match ledger.revoke_consent(&consent_req.patient_id, &consent_req.doctor_id) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "message": format!("Consent revoked from {}", consent_req.doctor_id)
        })),
        Err(err) => error_response(&err),
    }
}

/// Request for the vote endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct VoteRequest {
    /// The voting user
    pub voter: String,

    /// The doctor candidate
    pub candidate: String,
}

/// Cast a vote
///
/// One vote per voter; voting again overwrites the previous vote
#[utoipa::path(
    post,
    path = "/api/v1/votes",
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Vote recorded"),
        (status = 400, description = "Invalid vote")
    )
)]
pub async fn cast_vote(ledger: LedgerData, vote_req: web::Json<VoteRequest>) -> impl Responder {
    let mut ledger = ledger.lock().unwrap();

    match ledger.set_vote(&vote_req.voter, &vote_req.candidate) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "message": format!("{} voted for {}", vote_req.voter, vote_req.candidate)
        })),
        Err(err) => error_response(&err),
    }
}

/// Request for the stake endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct StakeRequest {
    /// The user whose stake is set
    pub id: String,

    /// The new stake; an overwrite, not an increment
    pub amount: f64,
}

/// Set a stake
#[utoipa::path(
    post,
    path = "/api/v1/stakes",
    request_body = StakeRequest,
    responses(
        (status = 200, description = "Stake recorded"),
        (status = 400, description = "Invalid stake")
    )
)]
pub async fn set_stake(ledger: LedgerData, stake_req: web::Json<StakeRequest>) -> impl Responder {
    let mut ledger = ledger.lock().unwrap();

    match ledger.set_stake(&stake_req.id, stake_req.amount) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "message": format!("Stake of {} set to {}", stake_req.id, stake_req.amount)
        })),
        Err(err) => error_response(&err),
    }
}

/// Get all stakes
#[utoipa::path(
    get,
    path = "/api/v1/stakes",
    responses(
        (status = 200, description = "Stakes retrieved successfully")
    )
)]
pub async fn get_stakes(ledger: LedgerData) -> impl Responder {
    let ledger = ledger.lock().unwrap();
    HttpResponse::Ok().json(ledger.stakes().balances())
}

/// Request for the delegate selection endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DelegateRequest {
    /// How many delegates to select from the tally
    pub top_n: usize,
}

/// Select delegates
///
/// Picks the top-N doctors by vote weight as the delegate pool and enables
/// DPoS
#[utoipa::path(
    post,
    path = "/api/v1/delegates",
    request_body = DelegateRequest,
    responses(
        (status = 200, description = "Delegates selected"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn select_delegates(
    ledger: LedgerData,
    delegate_req: web::Json<DelegateRequest>,
) -> impl Responder {
    let mut ledger = ledger.lock().unwrap();

    match ledger.select_delegates(delegate_req.top_n) {
        Ok(delegates) => HttpResponse::Ok().json(serde_json::json!({
            "delegates": delegates
        })),
        Err(err) => error_response(&err),
    }
}

/// Request for the consensus configuration endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ConsensusRequest {
    /// The consensus mechanism to enable; only "DPoS" is supported
    pub mode: String,
}

/// Enable consensus
///
/// Required before any block can be produced
#[utoipa::path(
    post,
    path = "/api/v1/consensus",
    request_body = ConsensusRequest,
    responses(
        (status = 200, description = "Consensus mode enabled"),
        (status = 400, description = "Unsupported consensus mode")
    )
)]
pub async fn enable_consensus(
    ledger: LedgerData,
    consensus_req: web::Json<ConsensusRequest>,
) -> impl Responder {
    if consensus_req.mode != "DPoS" {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": format!("Unsupported consensus mode: {}", consensus_req.mode)
        }));
    }

    let mut ledger = ledger.lock().unwrap();
    ledger.enable_dpos();

    HttpResponse::Ok().json(serde_json::json!({ "mode": "DPoS" }))
}

/// Request for the reward configuration endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct RewardConfigRequest {
    /// The per-block reward
    pub block_reward: f64,

    /// The fraction shared with supporters, between 0 and 1
    pub share_ratio: f64,
}

/// Configure rewards
#[utoipa::path(
    post,
    path = "/api/v1/rewards",
    request_body = RewardConfigRequest,
    responses(
        (status = 200, description = "Reward parameters updated"),
        (status = 400, description = "Invalid reward parameters")
    )
)]
pub async fn configure_rewards(
    ledger: LedgerData,
    reward_req: web::Json<RewardConfigRequest>,
) -> impl Responder {
    let mut ledger = ledger.lock().unwrap();

    match ledger.set_reward_params(reward_req.block_reward, reward_req.share_ratio) {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "block_reward": reward_req.block_reward,
            "share_ratio": reward_req.share_ratio
        })),
        Err(err) => error_response(&err),
    }
}

/// Get the audit trail
///
/// Every mutating operation leaves a record here, denials included
#[utoipa::path(
    get,
    path = "/api/v1/logs",
    responses(
        (status = 200, description = "Audit trail retrieved successfully", body = Vec<AccessRecord>)
    )
)]
pub async fn get_logs(ledger: LedgerData) -> impl Responder {
    let ledger = ledger.lock().unwrap();
    HttpResponse::Ok().json(ledger.access_log())
}
