use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};

use holocron_server::collaborators::{
    BlueskyClient, DiscordClient, MediaWikiClient, ProjectRegistry, WikiProjectData,
};
use holocron_server::commands::CommandDispatcher;
use holocron_server::config::Config;
use holocron_server::cursor::CursorStore;
use holocron_server::detector::ChangeDetector;
use holocron_server::notifications::{Dispatcher, NotificationQueue};
use holocron_server::objections::ObjectionMonitor;
use holocron_server::rankings::RankingAggregator;
use holocron_server::reconciliation::reconcile_on_startup;
use holocron_server::routes::router;
use holocron_server::state_machine::interpreter::InterpreterContext;
use holocron_server::state_machine::repository::{Repository, SqliteRepository};
use holocron_server::{get_bot_version, AppState, LifecycleStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting Holocron {}", get_bot_version());

    let config = Config::from_env().context("Failed to load configuration from environment variables")?;

    let db_path = config.database_path();
    info!("Using state database: {}", db_path.display());
    let repo: Arc<dyn Repository> = Arc::new(
        SqliteRepository::new(&db_path).context("Failed to initialize SQLite database")?,
    );

    let user_agent = format!("Holocron/{} (wiki nomination bot)", get_bot_version());
    let wiki = Arc::new(MediaWikiClient::new(
        &config.wiki_api_url,
        &config.wiki_username,
        &config.wiki_password,
        &user_agent,
        config.call_timeout,
    )?);
    let chat = Arc::new(DiscordClient::new(&config.discord_token, config.call_timeout)?);
    let social = Arc::new(BlueskyClient::new(
        &config.bluesky_handle,
        &config.bluesky_app_password,
        config.call_timeout,
    )?);

    let queue = Arc::new(NotificationQueue::new(repo.clone()));
    let rankings = Arc::new(RankingAggregator::new(
        repo.clone(),
        wiki.clone(),
        &config.rankings_page,
        config.ranking_excluded.clone(),
        config.ranking_threshold,
        config.call_timeout,
    ));
    let projects = Arc::new(ProjectRegistry::new(Arc::new(WikiProjectData::new(
        wiki.clone(),
        &config.project_data_page,
    ))));
    // Commands that name a project fail until this succeeds; `reload data` retries it
    if let Err(e) = projects.reload().await {
        warn!("Could not load project data at startup: {}", e);
    }

    let ctx = Arc::new(InterpreterContext {
        wiki: wiki.clone(),
        queue: queue.clone(),
        rankings,
        projects,
        policy: Arc::new(config.policy.clone()),
        channels: config.channels.clone(),
        talk_opt_out: config.talk_opt_out.clone(),
        article_url: config.wiki_article_url.clone(),
        social_delay: config.social_delay,
        call_timeout: config.call_timeout,
    });
    let store = Arc::new(LifecycleStore::new(repo.clone()));

    // Recover before anything else touches the store
    if let Err(e) = reconcile_on_startup(&store, &ctx, config.queue_grace, Utc::now()).await {
        error!("Startup reconciliation failed: {}", e);
        return Err(e.into());
    }

    let detector = Arc::new(ChangeDetector::new(
        store.clone(),
        ctx.clone(),
        Arc::new(CursorStore::new(repo.clone())),
        config.startup_grace,
    ));
    let monitor = Arc::new(ObjectionMonitor::new(store.clone(), ctx.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        queue,
        chat,
        social,
        wiki,
        config.retry,
        config.channels.operators.clone(),
        config.chat_batch_size,
        config.call_timeout,
    ));
    let commands = Arc::new(CommandDispatcher::new(
        store.clone(),
        ctx.clone(),
        detector.clone(),
        &config.mention,
    ));

    let objection_interval = chrono::Duration::from_std(config.objection_interval)
        .context("HOLOCRON_OBJECTION_INTERVAL_HOURS is out of range")?;
    tokio::spawn(detector.run(config.detector_interval));
    tokio::spawn(monitor.run(
        objection_interval,
        config.objection_pass_hour,
        config.utc_offset_hours,
    ));
    tokio::spawn(dispatcher.run(config.dispatch_poll, config.queue_retention));

    let app_state = Arc::new(AppState {
        store,
        ctx,
        commands,
        command_auth_token: config.command_auth_token.clone(),
        status_auth_token: config.status_auth_token.clone(),
    });
    let app = router(app_state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
            }
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
