pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod notify;
pub mod reset;
pub mod scheduler;
pub mod waiting_list;

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

use auth::handlers as auth_handlers;
use auth::{AuthGate, AuthService, TokenService};
use db::{DbOperations, Stores};
use notify::{DataWiper, HttpDataWiper, HttpNotifier, LogNotifier, NoopDataWiper, Notifier};
use reset::ResetFlow;
use scheduler::InactiveAccountSweeper;
use waiting_list::handlers as waiting_list_handlers;
use waiting_list::{CapacityGate, WaitingListPromoter, WaitingListService};

/// Health check endpoint handler
/// Returns a JSON response with server status and timestamp
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub stores: Stores,
    pub tokens: TokenService,
    pub capacity: Arc<CapacityGate>,
    pub auth_service: Arc<AuthService>,
    pub reset_flow: Arc<ResetFlow>,
    pub waiting_list: Arc<WaitingListService>,
    pub promoter: Arc<WaitingListPromoter>,
    pub sweeper: Arc<InactiveAccountSweeper>,
}

impl AppState {
    /// Connects the configured store and picks the notifier and data wiper
    /// from configuration.
    pub async fn new(config: Settings) -> Result<Self> {
        let timeout = config.downstream.timeout();

        let stores = if config.database.is_memory() {
            warn!("Using the in-process store, data is lost on restart");
            Stores::memory()
        } else {
            let db = DbOperations::new_with_options(
                &config.database.url,
                config.database.max_connections,
                Duration::from_secs(config.database.acquire_timeout_secs),
            )
            .await?;
            db.migrate().await?;
            info!("Database migrations applied");
            Stores::postgres(db)
        };

        let notifier: Arc<dyn Notifier> = match &config.notifier.api_key {
            Some(key) if !key.is_empty() => {
                Arc::new(HttpNotifier::new(&config.notifier, key.clone(), timeout)?)
            }
            _ => {
                warn!("No mail API key configured, emails are only logged");
                Arc::new(LogNotifier)
            }
        };

        let wiper: Arc<dyn DataWiper> = match &config.subscription.data_service_url {
            Some(url) => Arc::new(HttpDataWiper::new(url, config.auth.internal_token.clone(), timeout)?),
            None => Arc::new(NoopDataWiper),
        };

        Ok(Self::with_collaborators(config, stores, notifier, wiper))
    }

    pub fn with_collaborators(
        config: Settings,
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        wiper: Arc<dyn DataWiper>,
    ) -> Self {
        let config = Arc::new(config);
        let timeout = config.downstream.timeout();
        let tokens = TokenService::new(&config.auth);

        let capacity = Arc::new(CapacityGate::new(
            stores.accounts.clone(),
            stores.waiting_list.clone(),
            config.registration.max_users,
            timeout,
        ));

        let auth_service = Arc::new(AuthService::new(
            stores.clone(),
            tokens.clone(),
            capacity.clone(),
            wiper.clone(),
            config.clone(),
        ));

        let reset_flow = Arc::new(ResetFlow::new(
            stores.accounts.clone(),
            stores.resets.clone(),
            notifier.clone(),
            wiper.clone(),
            config.reset.code_length,
            config.registration.min_password_length,
            timeout,
        ));

        let waiting_list = Arc::new(WaitingListService::new(
            stores.waiting_list.clone(),
            notifier.clone(),
            config.waiting_list.public_url.clone(),
            timeout,
        ));

        let promoter = Arc::new(WaitingListPromoter::new(
            capacity.clone(),
            stores.waiting_list.clone(),
            notifier,
            config.registration.invite_code_length,
            config.waiting_list.public_url.clone(),
            timeout,
        ));

        let sweeper = Arc::new(InactiveAccountSweeper::new(
            stores.accounts.clone(),
            wiper,
            config.subscription.grace_period_days,
            timeout,
        ));

        Self {
            config,
            stores,
            tokens,
            capacity,
            auth_service,
            reset_flow,
            waiting_list,
            promoter,
            sweeper,
        }
    }

    /// Memory store, logging notifier, no data service.
    pub fn for_tests(config: Settings) -> Self {
        Self::with_collaborators(
            config,
            Stores::memory(),
            Arc::new(LogNotifier),
            Arc::new(NoopDataWiper),
        )
    }
}

/// Full route table. `internal_token` guards the service-to-service routes.
pub fn configure(cfg: &mut web::ServiceConfig, internal_token: &str) {
    cfg.route("/health", web::get().to(health_check))
        .service(
            web::resource("/config")
                .wrap(AuthGate::optional())
                .route(web::get().to(auth_handlers::app_config)),
        )
        .service(
            web::scope("/auth")
                .route("/register", web::post().to(auth_handlers::register))
                .route("/login", web::post().to(auth_handlers::login))
                .route("/refresh", web::post().to(auth_handlers::refresh))
                .route("/reset-password", web::post().to(auth_handlers::start_reset))
                .route("/reset-password/backup-key", web::post().to(auth_handlers::backup_key))
                .route("/reset-password/confirm", web::post().to(auth_handlers::confirm_reset))
                .route("/waiting-list", web::post().to(waiting_list_handlers::join))
                .route("/waiting-list/position", web::post().to(waiting_list_handlers::position)),
        )
        .service(
            web::scope("/users")
                .wrap(AuthGate::required())
                .route("/me", web::get().to(auth_handlers::me))
                .route("/me", web::delete().to(auth_handlers::delete_me))
                .route("/profile", web::put().to(auth_handlers::update_profile))
                .route("/password", web::put().to(auth_handlers::change_password)),
        )
        .service(
            web::scope("/admin/roles")
                .wrap(AuthGate::role("admin"))
                .wrap(AuthGate::required())
                .route("", web::get().to(auth_handlers::list_roles))
                .route("", web::post().to(auth_handlers::create_role))
                .route("/{id}", web::get().to(auth_handlers::get_role))
                .route("/{id}", web::put().to(auth_handlers::update_role)),
        )
        .service(
            web::resource("/internal/waiting-list/promote")
                .wrap(AuthGate::static_token(internal_token))
                .route(web::post().to(waiting_list_handlers::promote)),
        );
}
