use std::sync::Arc;

use api::{create_app, AppConfig};
use database::{MemoryStore, Notification, SqliteStore, SubscriptionStore};
use structopt::StructOpt;
use tracing::{info, warn};
use webpush::{Dispatcher, PushError, ReqwestTransport, VapidConfig, VapidKeyPair};

#[derive(StructOpt, Debug)]
#[structopt(name = "kanatae-notify")]
struct Opt {
    #[structopt(subcommand)]
    command: Option<Command>,

    /// SQLite database holding subscriptions.
    #[structopt(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Keep subscriptions in memory instead of `DATABASE_URL`. They are lost on restart.
    #[structopt(long)]
    memory_store: bool,

    #[structopt(long, env = "BIND_ADDR", default_value = "0.0.0.0:1337")]
    bind_addr: String,

    #[structopt(long, env = "VAPID_PUBLIC_KEY", hide_env_values = true)]
    vapid_public_key: Option<String>,

    #[structopt(long, env = "VAPID_PRIVATE_KEY", hide_env_values = true)]
    vapid_private_key: Option<String>,

    /// Contact URI sent to push services, e.g. `mailto:ops@example.com`.
    #[structopt(long, env = "VAPID_SUBJECT")]
    vapid_subject: Option<String>,

    /// Required in `X-Admin-Token` for `/api/send` when set.
    #[structopt(long, env = "ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    #[structopt(long, env = "ALLOWED_ORIGINS", use_delimiter = true)]
    allowed_origins: Vec<String>,

    #[structopt(long, env = "PUSH_TTL", default_value = "60")]
    ttl: u32,

    #[structopt(long, env = "NOTIFICATION_TITLE", default_value = "Kanatae")]
    notification_title: String,

    #[structopt(
        long,
        env = "NOTIFICATION_BODY",
        default_value = "Check today's schedule."
    )]
    notification_body: String,

    #[structopt(long, env = "NOTIFICATION_URL", default_value = "/")]
    notification_url: String,
}

#[derive(StructOpt, Debug)]
enum Command {
    /// Print a new VAPID key pair and exit.
    GenerateVapidKeys,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    dotenv::dotenv().ok();

    let opt = Opt::from_args();

    if let Some(Command::GenerateVapidKeys) = opt.command {
        let keys = VapidKeyPair::generate();
        println!("VAPID_PUBLIC_KEY={}", keys.public_key_base64url());
        println!("VAPID_PRIVATE_KEY={}", keys.private_key_base64url());
        return Ok(());
    }

    let vapid = VapidConfig::from_parts(
        opt.vapid_public_key.as_deref(),
        opt.vapid_private_key.as_deref(),
        opt.vapid_subject.as_deref(),
    )?;
    info!("VAPID_PUBLIC_KEY={}", vapid.public_key_base64url());

    let store = open_store(opt.database_url.as_deref(), opt.memory_store).await?;

    let dispatcher = Dispatcher::new(vapid, Arc::new(ReqwestTransport::new())).with_ttl(opt.ttl);

    let app = create_app(AppConfig {
        store,
        dispatcher: Arc::new(dispatcher),
        admin_token: opt.admin_token,
        allowed_origins: opt.allowed_origins,
        default_notification: Notification::new(
            opt.notification_title,
            opt.notification_body,
            opt.notification_url,
        ),
    })?;

    let listener = tokio::net::TcpListener::bind(&opt.bind_addr).await?;

    info!("Start http server at {}.", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

async fn open_store(
    database_url: Option<&str>,
    memory_store: bool,
) -> anyhow::Result<Arc<dyn SubscriptionStore>> {
    if memory_store {
        warn!("Using the in-memory store, subscriptions will not survive a restart.");
        return Ok(Arc::new(MemoryStore::new()));
    }

    match database_url.filter(|url| !url.trim().is_empty()) {
        Some(database_url) => {
            info!("DATABASE_URL={}", database_url);
            Ok(Arc::new(SqliteStore::connect(database_url).await?))
        }
        None => Err(PushError::MissingConfiguration(vec!["DATABASE_URL"]).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn it_should_require_a_database_url() {
        for database_url in [None, Some(""), Some("  ")] {
            let err = open_store(database_url, false).await.err().unwrap();
            assert!(matches!(
                err.downcast_ref::<PushError>(),
                Some(PushError::MissingConfiguration(names)) if names == &["DATABASE_URL"]
            ));
        }
    }

    #[tokio::test]
    async fn it_should_open_the_memory_store_on_request() -> anyhow::Result<()> {
        let store = open_store(None, true).await?;
        store.put("sub:a", b"{}").await?;
        assert_eq!(store.get("sub:a").await?, Some(b"{}".to_vec()));
        Ok(())
    }
}
