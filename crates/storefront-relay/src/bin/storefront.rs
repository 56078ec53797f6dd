use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{info, warn};

use storefront_relay::{
    App, AppQuery, EventCache, KeysSigner, PaymentHints, StorefrontClient, StorefrontConfig,
    COMMENT_LIMIT,
};

#[derive(Debug, Parser)]
#[command(name = "storefront")]
#[command(about = "Query the app storefront relays and watch for zap receipts")]
struct Args {
    /// Override STOREFRONT_PRIMARY_RELAY.
    #[arg(long, global = true)]
    relay: Option<String>,
    /// Override STOREFRONT_CACHE_PATH.
    #[arg(long, global = true)]
    cache: Option<String>,
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List apps, newest first.
    Apps {
        #[arg(long, default_value_t = 12)]
        limit: usize,
        #[arg(long)]
        author: Vec<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        until: Option<u64>,
    },
    /// Show one app with its latest release and version.
    App {
        #[arg(long)]
        pubkey: Option<String>,
        #[arg(long)]
        d_tag: String,
        #[arg(long)]
        skip_cache: bool,
    },
    Profile {
        pubkey: String,
        #[arg(long)]
        fresh: bool,
    },
    Zaps {
        #[arg(long)]
        pubkey: String,
        #[arg(long)]
        d_tag: String,
    },
    Comments {
        #[arg(long)]
        pubkey: String,
        #[arg(long)]
        d_tag: String,
        #[arg(long, default_value_t = COMMENT_LIMIT)]
        limit: usize,
    },
    /// Publish a comment; the key comes from --secret-key or STOREFRONT_SECRET_KEY.
    Comment {
        #[arg(long)]
        pubkey: String,
        #[arg(long)]
        d_tag: String,
        #[arg(long)]
        version: String,
        #[arg(long)]
        secret_key: Option<String>,
        content: String,
    },
    /// Build a signed zap request and wait for its receipt.
    Zap {
        #[arg(long)]
        pubkey: String,
        #[arg(long)]
        d_tag: String,
        #[arg(long)]
        sats: u64,
        #[arg(long, default_value = "")]
        message: String,
        #[arg(long)]
        invoice: Option<String>,
        #[arg(long)]
        secret_key: Option<String>,
        #[arg(long, default_value_t = 300)]
        wait_secs: u64,
    },
    CacheStats,
    CacheClear,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("storefront_relay=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = StorefrontConfig::from_env()?;
    if let Some(relay) = args.relay {
        config = config.with_primary_relay(relay);
    }
    if let Some(path) = args.cache {
        config = config.with_cache_path(path);
    }
    if let Some(secs) = args.timeout_secs {
        config = config.with_query_timeout(Duration::from_secs(secs));
    }
    config.validate()?;

    match args.command {
        Command::CacheStats => {
            let cache = EventCache::open(&config.cache);
            return print_json(&cache.stats());
        }
        Command::CacheClear => {
            EventCache::open(&config.cache).clear();
            return Ok(());
        }
        _ => {}
    }

    let client = StorefrontClient::connect(config).await?;
    let result = run(&client, args.command).await;
    client.close().await;
    result
}

async fn run(client: &StorefrontClient, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Apps {
            limit,
            author,
            search,
            until,
        } => {
            let query = AppQuery {
                limit,
                authors: (!author.is_empty()).then_some(author),
                d_tags: None,
                until,
                search,
            };
            print_json(&client.fetch_apps(&query).await)
        }
        Command::App {
            pubkey,
            d_tag,
            skip_cache,
        } => {
            let app = find_app(client, pubkey.as_deref(), &d_tag).await?;
            let release = client.fetch_latest_release(&app, skip_cache).await;
            let version = client.fetch_app_version(&app).await;
            print_json(&serde_json::json!({
                "app": app,
                "release": release,
                "version": version,
            }))
        }
        Command::Profile { pubkey, fresh } => {
            let profile = if fresh {
                client.fetch_profile_fresh(&pubkey).await
            } else {
                client.fetch_profile(&pubkey).await
            };
            print_json(&profile)
        }
        Command::Zaps { pubkey, d_tag } => {
            let app = find_app(client, Some(&pubkey), &d_tag).await?;
            let file_ids = client
                .fetch_latest_release(&app, false)
                .await
                .map(|release| release.file_ids)
                .unwrap_or_default();
            print_json(&client.fetch_app_zaps(&app, &file_ids).await)
        }
        Command::Comments {
            pubkey,
            d_tag,
            limit,
        } => print_json(&client.fetch_app_comments(&pubkey, &d_tag, limit).await),
        Command::Comment {
            pubkey,
            d_tag,
            version,
            secret_key,
            content,
        } => {
            let signer = load_signer(secret_key)?;
            let app = find_app(client, Some(&pubkey), &d_tag).await?;
            let event = client
                .publish_app_comment(&app, &content, &version, None, &signer)
                .await?;
            print_json(&event)
        }
        Command::Zap {
            pubkey,
            d_tag,
            sats,
            message,
            invoice,
            secret_key,
            wait_secs,
        } => {
            let signer = load_signer(secret_key)?;
            let app = find_app(client, Some(&pubkey), &d_tag).await?;
            let request = client.create_zap_request(&app, sats, &message, &signer).await?;
            print_json(&request)?;

            let hints = PaymentHints {
                invoice,
                app_address: Some(app.address()),
                event_id: Some(app.id.clone()),
            };
            let (tx, rx) = oneshot::channel();
            let handle = client.subscribe_to_zap_receipt(&app.pubkey, &request.id, hints, move |zap| {
                let _ = tx.send(zap);
            });

            match tokio::time::timeout(Duration::from_secs(wait_secs), rx).await {
                Ok(Ok(zap)) => print_json(&zap)?,
                _ => warn!(request_id = %request.id, "No zap receipt before deadline"),
            }
            handle.dispose();
            Ok(())
        }
        Command::CacheStats | Command::CacheClear => Ok(()),
    }
}

async fn find_app(
    client: &StorefrontClient,
    pubkey: Option<&str>,
    d_tag: &str,
) -> Result<App, Box<dyn std::error::Error>> {
    let app = match pubkey {
        Some(pubkey) => client.fetch_app(pubkey, d_tag).await,
        None => client.fetch_app_by_d_tag(d_tag).await,
    };
    app.ok_or_else(|| format!("app {d_tag} not found").into())
}

fn load_signer(secret_key: Option<String>) -> Result<KeysSigner, Box<dyn std::error::Error>> {
    let secret = secret_key
        .or_else(|| std::env::var("STOREFRONT_SECRET_KEY").ok())
        .ok_or(storefront_relay::Error::MissingEnv("STOREFRONT_SECRET_KEY"))?;
    let signer = KeysSigner::parse(&secret)?;
    info!("Signing with local key");
    Ok(signer)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
