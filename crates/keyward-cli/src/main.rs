//! CLI entry point for keyward.
//!
//! This binary provides the `keyward` command with subcommands for reading,
//! writing and watching entries of a secure store service.

mod cli;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::Parser;
use futures::StreamExt;
use keyward_kernel::{Event, SecureStore, StoreConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, EncodingArgs, Protection};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = load_config(&cli)?;
    let store = SecureStore::open(&config).context("failed to open secure store")?;
    info!(service = %store.identity(), "store ready");

    let outcome = match cli.command {
        Commands::Get {
            key,
            prompt,
            sync,
            encoding,
        } => cmd_get(&store, key, prompt, sync.ignoring_sync(), encoding).await,
        Commands::Set {
            key,
            value,
            protection,
            sync,
            encoding,
        } => {
            cmd_set(
                &store,
                key,
                value,
                protection.protection(),
                sync.ignoring_sync(),
                encoding,
            )
            .await
        }
        Commands::GetOrCreate {
            key,
            fallback,
            protection,
            prompt,
            encoding,
        } => cmd_get_or_create(&store, key, fallback, protection.protection(), prompt, encoding).await,
        Commands::Remove { key, sync } => store
            .remove(key, sync.ignoring_sync())
            .await
            .context("failed to remove entry"),
        Commands::Clear { yes } => cmd_clear(&store, yes).await,
        Commands::Watch { key, json } => cmd_watch(&store, key, json).await,
    };

    store.shutdown().await?;
    outcome
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_get(
    store: &SecureStore,
    key: String,
    prompt: Option<String>,
    ignoring_sync: bool,
    encoding: EncodingArgs,
) -> Result<()> {
    let value = match prompt {
        Some(prompt) => store.get_auth(key.clone(), prompt, ignoring_sync).await,
        None => store.get_no_auth(key.clone(), ignoring_sync).await,
    }
    .with_context(|| format!("failed to read `{key}`"))?;

    match value {
        Some(value) => print_value(&value, encoding),
        None => bail!("no value stored under `{key}`"),
    }
}

async fn cmd_set(
    store: &SecureStore,
    key: String,
    value: String,
    protection: Protection,
    ignoring_sync: bool,
    encoding: EncodingArgs,
) -> Result<()> {
    let data = decode_value(value, encoding)?;
    let written = match protection {
        Protection::WithAuth(attributes) => {
            store
                .set_auth(key.clone(), Some(data), attributes, ignoring_sync)
                .await
        }
        Protection::WithoutAuth(attributes) => {
            store
                .set_no_auth(key.clone(), Some(data), attributes, ignoring_sync)
                .await
        }
    };
    written.with_context(|| format!("failed to store `{key}`"))
}

async fn cmd_get_or_create(
    store: &SecureStore,
    key: String,
    fallback: String,
    protection: Protection,
    prompt: String,
    encoding: EncodingArgs,
) -> Result<()> {
    let fallback = decode_value(fallback, encoding)?;
    let obtained = match protection {
        Protection::WithAuth(attributes) => {
            store
                .get_or_create_auth(key.clone(), attributes, fallback, prompt)
                .await
        }
        Protection::WithoutAuth(attributes) => {
            store
                .get_or_create_no_auth(key.clone(), attributes, fallback)
                .await
        }
    }
    .with_context(|| format!("failed to read or create `{key}`"))?;

    if obtained.created {
        info!(key = %key, "stored fallback value");
    }
    print_value(&obtained.value, encoding)
}

async fn cmd_clear(store: &SecureStore, yes: bool) -> Result<()> {
    if !yes {
        bail!(
            "refusing to remove every entry of {} without --yes",
            store.identity()
        );
    }
    store
        .remove_all()
        .await
        .context("failed to remove all entries")
}

async fn cmd_watch(store: &SecureStore, key: Option<String>, json: bool) -> Result<()> {
    let mut events = store.subscribe(key.as_deref());
    info!(key = ?key, "watching for changes, press Ctrl-C to stop");

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                println!("{}", describe(&event, json));
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Configuration file, then `KEYWARD_*` variables, then command-line flags.
fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let config = match &cli.config {
        Some(path) => StoreConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => StoreConfig::default(),
    };
    let mut config = config.apply_env_overrides()?;

    if let Some(service) = &cli.service {
        config.service = service.clone();
    }
    if let Some(group) = &cli.access_group {
        config.access_group = Some(group.clone());
    }
    config.validate()?;
    Ok(config)
}

fn decode_value(value: String, encoding: EncodingArgs) -> Result<Vec<u8>> {
    if encoding.base64 {
        return STANDARD
            .decode(value.trim())
            .context("value is not valid base64");
    }
    Ok(value.into_bytes())
}

fn print_value(value: &[u8], encoding: EncodingArgs) -> Result<()> {
    if encoding.base64 {
        println!("{}", STANDARD.encode(value));
        return Ok(());
    }
    match std::str::from_utf8(value) {
        Ok(text) => {
            println!("{text}");
            Ok(())
        }
        Err(_) => bail!("stored value is not UTF-8; rerun with --base64"),
    }
}

/// One line per event.  Secret bytes are never printed.
fn describe(event: &Event, json: bool) -> String {
    match (event, json) {
        (Event::Added(added), true) => serde_json::json!({
            "event": "added",
            "key": added.key,
            "len": added.data.len(),
            "requires_auth": added.requires_auth(),
            "ignoring_sync": added.ignoring_sync,
        })
        .to_string(),
        (Event::Removed(removed), true) => serde_json::json!({
            "event": "removed",
            "key": removed.key,
            "ignoring_sync": removed.ignoring_sync,
        })
        .to_string(),
        (Event::Added(added), false) => format!(
            "added    {} ({} bytes, {})",
            added.key,
            added.data.len(),
            added.partition()
        ),
        (Event::Removed(removed), false) => format!("removed  {}", removed.key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyward_kernel::{AddedEvent, RemovedEvent};
    use keyward_vault::AttributesWithoutAuth;

    #[test]
    fn describe_never_prints_data() {
        let event = Event::Added(AddedEvent {
            key: "token".into(),
            data: b"hunter2".to_vec(),
            attributes: AttributesWithoutAuth::new().into(),
            ignoring_sync: true,
        });

        let text = describe(&event, false);
        let json = describe(&event, true);
        assert!(text.contains("7 bytes"));
        assert!(!text.contains("hunter2"));
        assert!(!json.contains("hunter2"));

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["event"], "added");
        assert_eq!(parsed["requires_auth"], false);
    }

    #[test]
    fn describe_bulk_removal_as_json() {
        let event = Event::Removed(RemovedEvent {
            key: "k".into(),
            ignoring_sync: None,
        });
        let parsed: serde_json::Value = serde_json::from_str(&describe(&event, true)).unwrap();
        assert!(parsed["ignoring_sync"].is_null());
    }

    #[test]
    fn base64_values_round_trip_through_the_helpers() {
        let encoding = EncodingArgs { base64: true };
        assert_eq!(decode_value("AAEC".into(), encoding).unwrap(), vec![0, 1, 2]);
        assert!(decode_value("not base64!".into(), encoding).is_err());

        let plain = EncodingArgs { base64: false };
        assert_eq!(decode_value("abc".into(), plain).unwrap(), b"abc".to_vec());
        assert!(print_value(&[0xff, 0xfe], plain).is_err());
    }
}
