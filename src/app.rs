use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use crate::{
    broadcast::BroadcastWizard,
    config::{Config, DatabaseConfig},
    domain::events::AppEvent,
    platform::RelayPlatform,
    routes::{
        auth::{authenticate, check_auth},
        event::{deliveries, report_delivery, report_membership, stream},
        health,
        operator::{
            approve_tasks, broadcast_step, clear_proofs, disapprove_tasks, list_proofs,
            post_task, top_referrer, total_users,
        },
        user::{
            answer_booster, claim, get_profile, get_referrals, get_subscription, get_tasks,
            quote_booster, register, request_withdrawal, submit_proof, submit_wallet,
        },
    },
    services::claim::PendingBoosters,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::layer::SubscriberExt;

#[derive(Clone)]
pub struct Db(SqlitePool);

impl Db {
    pub fn inner(&self) -> SqlitePool {
        self.0.clone()
    }

    /// Opens the pool and brings the schema up to date.
    pub async fn connect(db_config: &DatabaseConfig) -> anyhow::Result<Self> {
        // connections live as long as the pool so an in-memory database survives
        let pool = SqlitePoolOptions::new()
            .max_connections(db_config.max_connections)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(db_config.get_connect_options()?)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self(pool))
    }
}

const DELIVERY_QUEUE: usize = 32;

pub struct AppState {
    db_pool: Db,
    tx: broadcast::Sender<AppEvent>,
    platform: Arc<RelayPlatform>,
    pub wizard: BroadcastWizard,
    pub boosters: PendingBoosters,
    pub config: Config,
}

impl AppState {
    pub fn new(db_pool: Db, config: Config) -> Self {
        let (tx, _rx) = broadcast::channel(100);
        let platform = RelayPlatform::new(
            DELIVERY_QUEUE,
            Duration::from_secs(config.bot.delivery_timeout),
        );
        Self {
            db_pool,
            platform: Arc::new(platform),
            tx,
            wizard: BroadcastWizard::default(),
            boosters: PendingBoosters::default(),
            config,
        }
    }

    pub fn get_pool(&self) -> SqlitePool {
        self.db_pool.inner()
    }

    pub fn get_sender(&self) -> broadcast::Sender<AppEvent> {
        self.tx.clone()
    }

    pub fn platform(&self) -> Arc<RelayPlatform> {
        self.platform.clone()
    }

    /// Publishes to the event stream. Nobody listening is not an error.
    pub fn publish(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stream", get(stream))
        .route("/deliveries", get(deliveries))
        .route("/deliveries/:id/result", post(report_delivery))
        .route("/membership", post(report_membership))
        .route("/users", post(register))
        .route("/users/:id", get(get_profile))
        .route("/users/:id/subscription", get(get_subscription))
        .route("/users/:id/wallet", post(submit_wallet))
        .route("/users/:id/claim", post(claim))
        .route("/users/:id/boosters", post(quote_booster))
        .route("/users/:id/boosters/reply", post(answer_booster))
        .route("/users/:id/referrals", get(get_referrals))
        .route("/users/:id/withdrawals", post(request_withdrawal))
        .route("/users/:id/tasks", get(get_tasks))
        .route("/users/:id/tasks/proofs", post(submit_proof))
        .route("/operators/:id/tasks", post(post_task))
        .route(
            "/operators/:id/tasks/proofs",
            get(list_proofs).delete(clear_proofs),
        )
        .route("/operators/:id/tasks/approve", post(approve_tasks))
        .route("/operators/:id/tasks/disapprove", post(disapprove_tasks))
        .route("/operators/:id/stats/total-users", get(total_users))
        .route("/operators/:id/stats/top-referrer", get(top_referrer))
        .route("/operators/:id/broadcast", post(broadcast_step))
        .route_layer(middleware::from_fn_with_state(state.clone(), check_auth))
        .route("/health", get(health))
        .route("/authenticate", post(authenticate))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub struct Application;

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<()> {
        Self::setup_tracing(&config.application.debug_mode)?;

        let db_pool = Db::connect(&config.database).await?;
        let app_state = Arc::new(AppState::new(db_pool, config.clone()));
        let app = router(app_state);

        let ip = config.application.host.parse::<IpAddr>()?;
        let addr = SocketAddr::new(ip, config.application.port);
        tracing::info!("listening on {}", addr.port());
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }

    fn setup_tracing(debug_mode: &str) -> anyhow::Result<()> {
        let subscriber = tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| debug_mode.into()),
            )
            .with(tracing_subscriber::fmt::layer());
        tracing::subscriber::set_global_default(subscriber)?;

        // sqlx reports through `log`
        tracing_log::LogTracer::init()?;
        Ok(())
    }
}
