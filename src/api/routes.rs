use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/genesis", web::post().to(handlers::create_genesis))
            .route("/blocks", web::post().to(handlers::add_block))
            .route("/validate", web::get().to(handlers::validate_chain))
            .route("/repair", web::post().to(handlers::repair_chain))
            .route("/state-root", web::get().to(handlers::get_state_root))
            .route("/producer", web::get().to(handlers::get_producer))
            .route("/users", web::post().to(handlers::register_user))
            .route("/users", web::get().to(handlers::get_users))
            .route("/consent/grant", web::post().to(handlers::grant_consent))
            .route("/consent/revoke", web::post().to(handlers::revoke_consent))
            .route("/votes", web::post().to(handlers::cast_vote))
            .route("/stakes", web::post().to(handlers::set_stake))
            .route("/stakes", web::get().to(handlers::get_stakes))
            .route("/delegates", web::post().to(handlers::select_delegates))
            .route("/consensus", web::post().to(handlers::enable_consensus))
            .route("/rewards", web::post().to(handlers::configure_rewards))
            .route("/logs", web::get().to(handlers::get_logs))
    );
}
