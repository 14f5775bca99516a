use std::sync::Arc;

use sketchlobby::domain::stats::LogStatsSink;
use sketchlobby::imaging::{DirAssetSource, ImageAssetSource, MemoryAssetSource};
use sketchlobby::server;
use sketchlobby::state::server_state::LobbyRegistry;
use sketchlobby::utils::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load immutable config before logging so the level applies
    let (config, warnings) = Config::from_env();
    let config = Arc::new(config);
    setup_logging(&config)?;
    for warning in warnings {
        log::warn!("{}", warning);
    }
    log::info!("Loaded config: {:?}", config);

    // Image assets are read from disk once, here
    let assets = MemoryAssetSource::preload(
        &DirAssetSource,
        &config.drawing_assets_dir,
        &config.background_image,
    )?;
    let drawings = assets.list_candidate_images(&config.drawing_assets_dir)?;
    if drawings.is_empty() {
        log::warn!(
            "No drawings in {}, games cannot start",
            config.drawing_assets_dir.display()
        );
    } else {
        log::info!("Preloaded {} drawings", drawings.len());
    }

    let registry = Arc::new(LobbyRegistry::new(
        config.clone(),
        Arc::new(assets),
        Arc::new(LogStatsSink),
    ));

    server::start_servers(registry, config).await?;

    Ok(())
}

fn setup_logging(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Utc::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(config.log_level)
        .chain(std::io::stdout())
        .chain(fern::log_file(&config.log_file)?)
        .apply()?;
    Ok(())
}
