//! Subcommand implementations.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tasker_core::{is_pwa, DisplayMode, OfflineConfig, StaticHost};
use tasker_net::{LoaderConfig, ResourceLoader};
use tasker_sw::{
    CacheManifest, CacheStorage, DiskCacheStorage, FetchRequest, OfflineCacheController,
};
use tracing::info;
use url::Url;

/// Controller wired to the on-disk store and the HTTP loader.
async fn build_controller(config: &OfflineConfig) -> anyhow::Result<OfflineCacheController> {
    let manifest = CacheManifest::from_config(config)?;
    let storage = Arc::new(
        DiskCacheStorage::open_dir(&config.cache_dir)
            .await
            .with_context(|| format!("opening cache store {}", config.cache_dir.display()))?,
    );
    let loader = ResourceLoader::new(LoaderConfig::from_offline_config(config))?;

    let (controller, mut events) =
        OfflineCacheController::new(manifest, storage, Arc::new(loader));
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!(?event, "Lifecycle event");
        }
    });
    Ok(controller)
}

pub async fn install(config: &OfflineConfig, activate: bool) -> anyhow::Result<()> {
    let controller = build_controller(config).await?;

    let stored = controller.install().await?;
    println!("Installed {stored} shell assets into {}", config.cache_name);

    if activate {
        report_evicted(&controller.activate().await?);
    }
    Ok(())
}

pub async fn activate(config: &OfflineConfig) -> anyhow::Result<()> {
    let controller = build_controller(config).await?;

    if !controller.resume().await? {
        bail!(
            "cache {} is not installed; run `tasker-offline install` first",
            config.cache_name
        );
    }
    report_evicted(&controller.activate().await?);
    Ok(())
}

fn report_evicted(deleted: &[String]) {
    if deleted.is_empty() {
        println!("No stale caches");
    }
    for name in deleted {
        println!("Deleted stale cache {name}");
    }
}

pub async fn fetch(
    config: &OfflineConfig,
    target: &str,
    method: &str,
    headers: &[String],
    print_body: bool,
) -> anyhow::Result<()> {
    let controller = build_controller(config).await?;
    if !controller.resume().await? {
        info!(cache = %config.cache_name, "Cache not installed, requests go to the network");
    }

    let url = resolve_target(&config.origin_url()?, target)?;
    let mut request = FetchRequest::new(method, url);
    for raw in headers {
        let (name, value) = parse_header(raw)?;
        request = request.header(name, value);
    }

    let response = controller.handle_fetch(request).await?;
    let source = if response.from_cache { "cache" } else { "network" };
    eprintln!(
        "{} {} ({} bytes, from {source})",
        response.status,
        response.status_text,
        response.body.len()
    );

    if print_body {
        std::io::stdout().write_all(&response.body)?;
    }
    Ok(())
}

/// Resolve a command-line target: absolute URLs are used as-is, anything
/// else is joined onto the origin.
fn resolve_target(origin: &Url, target: &str) -> anyhow::Result<Url> {
    match Url::parse(target) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => origin
            .join(target)
            .with_context(|| format!("resolving {target} against {origin}")),
        Err(e) => Err(e).with_context(|| format!("invalid URL {target}")),
    }
}

fn parse_header(raw: &str) -> anyhow::Result<(&str, &str)> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => bail!("header must look like `name: value`, got {raw:?}"),
    }
}

pub async fn caches(config: &OfflineConfig) -> anyhow::Result<()> {
    let storage = DiskCacheStorage::open_dir(&config.cache_dir).await?;

    let names = storage.keys().await?;
    if names.is_empty() {
        println!("No caches in {}", storage.dir().display());
    }
    for name in names {
        let marker = if name == config.cache_name { " (current)" } else { "" };
        let keys = storage.entry_keys(&name).await?;
        println!("{name}{marker}: {} entries", keys.len());
        for key in keys {
            println!("  {key}");
        }
    }
    Ok(())
}

pub fn show_config(config: &OfflineConfig, write_to: Option<PathBuf>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    if let Some(path) = write_to {
        config.save(&path)?;
        eprintln!("Wrote {}", path.display());
    }
    Ok(())
}

pub fn platform(display_mode: DisplayMode, navigator_standalone: Option<bool>) {
    let host = StaticHost {
        display_mode,
        navigator_standalone,
        service_worker: true,
    };
    println!("pwa: {}", is_pwa(&host));
}
