use clap::Parser;
use equipment_checklist::{setup_logging, validate_config, Cli, CliRunner, Config, SizePreset};
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments
    let args = Cli::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    info!("Starting checklist v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = load_config(&args).await?;

    // Open the equipment store
    let cli_runner = CliRunner::new(config).await?;

    let result = tokio::select! {
        result = cli_runner.run(args.command) => result,
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
            // Interrupted mid-command; make sure the last state reached the snapshot
            if let Err(e) = cli_runner.store.flush().await {
                warn!("Final snapshot write failed: {}", e);
            }
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn load_config(args: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if let Some(config_path) = &args.config {
        // Load from file
        let config_content = tokio::fs::read_to_string(config_path).await?;
        serde_json::from_str(&config_content)?
    } else {
        // Use default configuration
        Config::default()
    };

    // Override with CLI arguments
    if let Some(data_file) = &args.data_file {
        config.data_file = data_file.clone();
    }

    if let Some(photo_size) = &args.photo_size {
        config.default_photo_size = photo_size.parse::<SizePreset>()?;
    }

    if let Some(minutes) = args.utc_offset {
        config.report.utc_offset_minutes = Some(minutes);
    }

    // Validate configuration
    validate_config(&config)?;

    info!("Configuration loaded successfully");
    info!("Data file: {}", config.data_file.display());
    info!("Default photo size: {:?}", config.default_photo_size);
    info!("Concurrent resizes: {}", config.max_concurrent_resizes);

    Ok(config)
}
