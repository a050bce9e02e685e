// storefront/src/main.rs

use katmandu_shop::config::{AppConfig, LogFormat};
use katmandu_shop::pipelines::{OrderWorkflow, WorkflowDeps};
use katmandu_shop::services::{KhaltiClient, LogNotifier, Notifier, PaymentGateway, SmtpNotifier};
use katmandu_shop::state::AppState;
use katmandu_shop::store::{MemoryStore, PgStore};
use katmandu_shop::web::configure_app_routes;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_span_events(FmtSpan::CLOSE);
  match format {
    LogFormat::Json => builder.json().init(),
    LogFormat::Pretty => builder.init(),
  }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
  let config = Arc::new(AppConfig::from_env().context("Failed to load application configuration")?);
  init_tracing(config.log_format);
  tracing::info!("Starting KatmanduShop order service...");

  let gateway: Arc<dyn PaymentGateway> = Arc::new(
    KhaltiClient::new(&config.khalti, &config.client_url).context("Failed to build the Khalti client")?,
  );

  let notifier: Arc<dyn Notifier> = match &config.smtp {
    Some(smtp) => Arc::new(
      SmtpNotifier::new(smtp, &config.shop_name, config.admin_email.clone())
        .context("Failed to build the SMTP transport")?,
    ),
    None => {
      tracing::warn!("SMTP is not configured; order emails will only be logged.");
      Arc::new(LogNotifier)
    }
  };

  let claim_ttl =
    chrono::Duration::from_std(config.capture_claim_ttl).context("CAPTURE_CLAIM_TTL_SECS is out of range")?;

  let deps = match &config.database_url {
    Some(url) => {
      let store = PgStore::connect(url, config.database_max_connections)
        .await
        .context("Failed to connect to the database")?;
      store.migrate().await.context("Failed to apply database migrations")?;
      WorkflowDeps::from_store(Arc::new(store), gateway, notifier, claim_ttl)
    }
    None => {
      tracing::warn!("DATABASE_URL is not set; using the in-memory store. Data is lost on restart.");
      WorkflowDeps::from_store(Arc::new(MemoryStore::new()), gateway, notifier, claim_ttl)
    }
  };

  let app_state = AppState::new(Arc::new(OrderWorkflow::new(deps)));

  let server_address = format!("{}:{}", config.server_host, config.server_port);
  tracing::info!("Binding server to {}...", server_address);

  HttpServer::new(move || {
    App::new()
      .app_data(web::Data::new(app_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(configure_app_routes)
  })
  .bind(&server_address)
  .with_context(|| format!("Failed to bind {server_address}"))?
  .run()
  .await?;

  Ok(())
}
