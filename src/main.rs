use std::sync::Mutex;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod ledger;

// Initialize the ledger, preferring persisted state over a fresh chain
fn initialize_ledger() -> ledger::Ledger {
    let data_dir = "data/ledger";

    // Create data directory if it doesn't exist
    std::fs::create_dir_all(data_dir).unwrap_or_else(|e| {
        warn!("Failed to create data directory: {}", e);
    });

    match ledger::Ledger::with_storage(data_dir) {
        Ok(ledger) => {
            info!("Loaded ledger from storage at {}", data_dir);
            ledger
        }
        Err(err) => {
            warn!("Failed to load ledger from storage: {}", err);
            warn!("Creating in-memory ledger instead");
            ledger::Ledger::new()
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::create_genesis,
        api::handlers::add_block,
        api::handlers::validate_chain,
        api::handlers::repair_chain,
        api::handlers::get_state_root,
        api::handlers::get_producer,
        api::handlers::register_user,
        api::handlers::get_users,
        api::handlers::grant_consent,
        api::handlers::revoke_consent,
        api::handlers::cast_vote,
        api::handlers::set_stake,
        api::handlers::get_stakes,
        api::handlers::select_delegates,
        api::handlers::enable_consensus,
        api::handlers::configure_rewards,
        api::handlers::get_logs
    ),
    components(
        schemas(
            ledger::Block,
            ledger::ConsensusData,
            ledger::DposMetadata,
            ledger::RecordTransaction,
            ledger::Role,
            ledger::registry::User,
            ledger::registry::Patient,
            ledger::AccessAction,
            ledger::AccessRecord,
            ledger::RepairReport,
            ledger::chain::RepairFix,
            api::schema::DateTimeUtc,
            api::handlers::ChainResponse,
            api::handlers::BlockResponse,
            api::handlers::BlockRequest,
            api::handlers::ValidationResponse,
            api::handlers::RepairRequest,
            api::handlers::ProducerResponse,
            api::handlers::RegisterUserRequest,
            api::handlers::DirectoryResponse,
            api::handlers::ConsentRequest,
            api::handlers::VoteRequest,
            api::handlers::StakeRequest,
            api::handlers::DelegateRequest,
            api::handlers::ConsensusRequest,
            api::handlers::RewardConfigRequest
        )
    ),
    tags(
        (name = "ledger", description = "Healthcare ledger API endpoints")
    ),
    info(
        title = "Medichain API",
        version = "1.0.0",
        description = "A healthcare record ledger with DPoS block production",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    // Create the shared ledger state
    let ledger = web::Data::new(Mutex::new(initialize_ledger()));

    info!("Starting HTTP server at http://localhost:8080");

    // Start HTTP server
    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(ledger.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind(("127.0.0.1", 8080))?
    .run()
    .await
}
