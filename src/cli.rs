use crate::camera::{CameraDevice, ImageFolderCamera, SyntheticCamera};
use crate::utils::{format_bytes, format_duration, parse_date, truncate, write_output};
use crate::{
    render_pdf, validate_config, CapturePipeline, Config, EquipmentPatch, EquipmentRecord,
    EquipmentStore, FilterCriteria, JsonFileSnapshot, Metrics, NewEquipment, ReportEngine,
    ReportRequest, Selection, SizePreset, Status,
};
use anyhow::{bail, Context};
use chrono::FixedOffset;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "checklist")]
#[command(about = "Equipment checklist with photo capture and PDF reports")]
#[command(version = "0.1.0")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Equipment data file")]
    pub data_file: Option<PathBuf>,

    #[arg(long, help = "Default photo size (small, medium, large)")]
    pub photo_size: Option<String>,

    #[arg(long, allow_hyphen_values = true, help = "UTC offset for reports, in minutes")]
    pub utc_offset: Option<i32>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register a piece of equipment
    Add {
        #[arg(short, long, help = "Equipment name")]
        name: String,

        #[arg(short = 't', long = "type", help = "Equipment type")]
        kind: Option<String>,

        #[arg(short, long, help = "Location")]
        location: String,

        #[arg(short, long, help = "Status (functioning, maintenance, broken)")]
        status: Option<String>,

        #[arg(long, help = "Free-text notes")]
        notes: Option<String>,

        #[arg(long, help = "Mark as checked")]
        checked: bool,

        #[arg(long, help = "Owner reference")]
        user: Option<String>,
    },

    /// List equipment, most recently checked first
    List {
        #[arg(short, long, help = "Search name, type or location")]
        search: Option<String>,

        #[arg(long, help = "Status filter or 'all'")]
        status: Option<String>,

        #[arg(long = "type", help = "Type filter or 'all'")]
        kind: Option<String>,

        #[arg(long, help = "Location filter or 'all'")]
        location: Option<String>,

        #[arg(long, help = "Print records as JSON")]
        json: bool,
    },

    /// Show status totals
    Stats,

    /// Show known locations and equipment types
    Locations,

    /// Edit fields of a record
    Update {
        id: u64,

        #[arg(long)]
        name: Option<String>,

        #[arg(long = "type")]
        kind: Option<String>,

        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        status: Option<String>,

        #[arg(long, help = "New notes; an empty value clears them")]
        notes: Option<String>,

        #[arg(long)]
        checked: Option<bool>,
    },

    /// Flip the checked flag of a record
    Toggle { id: u64 },

    /// Delete a record
    Delete { id: u64 },

    /// Take photos for a record and attach the selected ones
    Capture {
        id: u64,

        #[arg(long, help = "Replay frames from this folder instead of the synthetic camera")]
        camera_dir: Option<PathBuf>,

        #[arg(long, default_value = "1", help = "Number of frames to capture")]
        take: usize,

        #[arg(long = "use", value_delimiter = ',', help = "Candidate indices to keep (default: all)")]
        use_indices: Vec<usize>,

        #[arg(long, help = "Photo size (small, medium, large)")]
        size: Option<String>,

        #[arg(long, help = "Use the front camera")]
        front: bool,

        #[arg(long, help = "Also save every candidate frame to this directory")]
        export: Option<PathBuf>,
    },

    /// Remove one photo from a record
    RemovePhoto { id: u64, index: usize },

    /// Generate the PDF checklist report
    Report {
        #[arg(long, help = "First day (YYYY-MM-DD or DD/MM/YYYY)")]
        from: Option<String>,

        #[arg(long, help = "Last day (YYYY-MM-DD or DD/MM/YYYY)")]
        to: Option<String>,

        #[arg(long, help = "Location or 'all'")]
        location: Option<String>,

        #[arg(short, long, default_value = ".", help = "Output directory")]
        output: PathBuf,

        #[arg(long, help = "Also write the page layout as JSON")]
        layout: bool,
    },

    /// Validate configuration
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub id: u64,
    pub camera_dir: Option<PathBuf>,
    pub take: usize,
    pub use_indices: Vec<usize>,
    pub size: Option<String>,
    pub front: bool,
    pub export: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub from: Option<String>,
    pub to: Option<String>,
    pub location: Option<String>,
    pub output: PathBuf,
    pub layout: bool,
}

fn selection<T: std::str::FromStr<Err = crate::InventoryError>>(
    value: Option<&str>,
) -> Result<Selection<T>, crate::InventoryError> {
    value.map_or(Ok(Selection::All), str::parse)
}

fn text_selection(value: Option<String>) -> Selection<String> {
    match value {
        Some(location) if !location.eq_ignore_ascii_case("all") => Selection::Only(location),
        _ => Selection::All,
    }
}

pub struct CliRunner {
    pub config: Config,
    pub store: Arc<EquipmentStore>,
    pub metrics: Arc<Metrics>,
}

impl CliRunner {
    pub async fn new(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let metrics = Arc::new(Metrics::new());
        let snapshots = Arc::new(JsonFileSnapshot::new(config.data_file.clone()));
        let store = EquipmentStore::open(snapshots, config.locations.clone())
            .await?
            .with_metrics(metrics.clone());

        Ok(Self {
            config,
            store: Arc::new(store),
            metrics,
        })
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Add {
                name,
                kind,
                location,
                status,
                notes,
                checked,
                user,
            } => {
                let new = NewEquipment {
                    name,
                    kind: kind.unwrap_or_default(),
                    location,
                    status: status.as_deref().map(str::parse).transpose()?.unwrap_or_default(),
                    notes,
                    checked,
                    user_id: user,
                };
                let record = self.store.add(new).await?;
                println!("Added equipment {} ({})", record.id, record.name);
                Ok(())
            }
            Commands::List {
                search,
                status,
                kind,
                location,
                json,
            } => {
                let criteria = FilterCriteria {
                    search: search.unwrap_or_default(),
                    status: selection(status.as_deref())?,
                    kind: text_selection(kind),
                    location: text_selection(location),
                };
                self.run_list(&criteria, json).await
            }
            Commands::Stats => self.run_stats().await,
            Commands::Locations => self.run_locations().await,
            Commands::Update {
                id,
                name,
                kind,
                location,
                status,
                notes,
                checked,
            } => {
                let patch = EquipmentPatch {
                    name,
                    kind,
                    location,
                    status: status.as_deref().map(str::parse::<Status>).transpose()?,
                    notes: notes.map(|n| if n.trim().is_empty() { None } else { Some(n) }),
                    checked,
                };
                if patch.is_empty() {
                    bail!("nothing to update");
                }
                let record = self.store.update(id, patch).await?;
                println!("Updated equipment {} ({})", record.id, record.name);
                Ok(())
            }
            Commands::Toggle { id } => {
                let record = self.store.toggle_checked(id).await?;
                println!(
                    "Equipment {} is now {} (last check {})",
                    record.id,
                    if record.checked { "checked" } else { "unchecked" },
                    record.last_check.as_deref().unwrap_or("-")
                );
                Ok(())
            }
            Commands::Delete { id } => {
                let record = self.store.delete(id).await?;
                println!("Deleted equipment {} ({})", record.id, record.name);
                Ok(())
            }
            Commands::Capture {
                id,
                camera_dir,
                take,
                use_indices,
                size,
                front,
                export,
            } => {
                self.run_capture(CaptureOptions {
                    id,
                    camera_dir,
                    take,
                    use_indices,
                    size,
                    front,
                    export,
                })
                .await
            }
            Commands::RemovePhoto { id, index } => {
                let photo = self.store.remove_photo(id, index).await?;
                println!("Removed photo {} ({}) from equipment {}", index, format_bytes(photo.len()), id);
                Ok(())
            }
            Commands::Report {
                from,
                to,
                location,
                output,
                layout,
            } => {
                self.run_report(ReportOptions {
                    from,
                    to,
                    location,
                    output,
                    layout,
                })
                .await
            }
            Commands::Validate { config } => self.validate_config(config).await,
        }
    }

    pub async fn run_list(&self, criteria: &FilterCriteria, json: bool) -> anyhow::Result<()> {
        let records = self.store.filter(criteria).await;

        if json {
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }

        println!(
            "{:<14} {:<24} {:<12} {:<12} {:<22} {:<17} {:<7} {}",
            "ID", "NAME", "TYPE", "STATUS", "LOCATION", "LAST CHECK", "CHECKED", "PHOTOS"
        );
        let offset = self.config.report.offset();
        for record in &records {
            print_row(record, offset);
        }
        println!("\n{} of {} records", records.len(), self.store.len().await);
        Ok(())
    }

    pub async fn run_stats(&self) -> anyhow::Result<()> {
        let counts = self.store.aggregate().await;
        println!("Equipment Status");
        println!("================");
        println!("  Total:       {}", counts.total);
        println!("  Functioning: {}", counts.functioning);
        println!("  Maintenance: {}", counts.maintenance);
        println!("  Broken:      {}", counts.broken);
        Ok(())
    }

    pub async fn run_locations(&self) -> anyhow::Result<()> {
        println!("Locations:");
        for option in self.store.location_options().await {
            if option.other {
                println!("  {} (other)", option.name);
            } else {
                println!("  {}", option.name);
            }
        }

        println!("\nTypes in use:");
        for kind in self.store.unique_types().await {
            println!("  {kind}");
        }
        Ok(())
    }

    pub async fn run_capture(&self, options: CaptureOptions) -> anyhow::Result<()> {
        if options.take == 0 {
            bail!("--take must be at least 1");
        }
        let preset = match options.size.as_deref() {
            Some(size) => size.parse::<SizePreset>()?,
            None => self.config.default_photo_size,
        };

        let device: Arc<dyn CameraDevice> = match &options.camera_dir {
            Some(dir) => Arc::new(ImageFolderCamera::new(dir)),
            None => Arc::new(SyntheticCamera::new()),
        };
        let pipeline = CapturePipeline::new(device, &self.config).with_metrics(self.metrics.clone());

        if options.front {
            pipeline.switch_camera().await?;
        }
        pipeline.open().await.context("could not open the camera")?;

        for _ in 0..options.take {
            let view = pipeline.capture().await?;
            println!(
                "Captured candidate {}: {}x{} ({})",
                view.index,
                view.width,
                view.height,
                format_bytes(view.bytes)
            );
        }

        if let Some(dir) = &options.export {
            for index in 0..options.take {
                let exported = pipeline.export_candidate(index).await?;
                let name = format!("{index:02}-{}", exported.file_name);
                write_output(dir, &name, exported.photo.as_bytes()).await?;
            }
        }

        let indices: Vec<usize> = if options.use_indices.is_empty() {
            (0..options.take).collect()
        } else {
            options.use_indices.clone()
        };
        for index in indices {
            pipeline.mark_used(index).await?;
        }

        let report = pipeline.commit(&self.store, options.id, preset).await?;
        println!("Attached {} photos to equipment {}", report.appended, report.record_id);
        for failure in &report.failures {
            warn!("Candidate {} was not attached: {}", failure.position, failure.error);
            println!("  Candidate {} failed: {}", failure.position, failure.error);
        }
        Ok(())
    }

    pub async fn run_report(&self, options: ReportOptions) -> anyhow::Result<()> {
        let started = Instant::now();
        let request = ReportRequest {
            start_date: options.from.as_deref().map(parse_date).transpose()?,
            end_date: options.to.as_deref().map(parse_date).transpose()?,
            location: text_selection(options.location),
        };

        let records = self.store.filter(&FilterCriteria::default()).await;
        let engine = ReportEngine::new(self.config.report.clone()).with_metrics(self.metrics.clone());

        let (document, bytes) = tokio::task::spawn_blocking(move || {
            let document = engine.generate(&records, &request)?;
            let bytes = render_pdf(&document)?;
            Ok::<_, crate::InventoryError>((document, bytes))
        })
        .await
        .context("report task failed")??;

        let path = write_output(&options.output, &document.file_name(), &bytes).await?;
        if options.layout {
            let layout = serde_json::to_vec_pretty(&document)?;
            write_output(&options.output, &format!("{}.layout.json", document.name), &layout).await?;
        }

        info!("Report generated in {}", format_duration(started.elapsed()));
        println!("Report written to {}", path.display());
        println!("  Records: {}", document.record_ids.len());
        println!("  Pages:   {}", document.page_count());
        println!("  Size:    {}", format_bytes(bytes.len()));
        Ok(())
    }

    pub async fn validate_config(&self, config_path: PathBuf) -> anyhow::Result<()> {
        println!("Validating configuration: {}", config_path.display());

        let config_content = fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("cannot read {}", config_path.display()))?;
        let config: Config = serde_json::from_str(&config_content)?;
        validate_config(&config)?;

        println!("Configuration is valid:");
        println!("  Data file: {}", config.data_file.display());
        println!("  Locations: {}", config.locations.len());
        println!("  Default photo size: {:?}", config.default_photo_size);
        println!("  Resize quality: {}", config.resize_quality);
        println!("  Concurrent resizes: {}", config.max_concurrent_resizes);
        println!(
            "  Camera: {}x{}, timeout {:?}",
            config.capture.ideal_resolution.width,
            config.capture.ideal_resolution.height,
            config.capture.device_timeout
        );
        println!("  Report title: {}", config.report.title);

        Ok(())
    }
}

fn print_row(record: &EquipmentRecord, offset: FixedOffset) {
    let last_check = record
        .last_check_at()
        .map(|at| at.with_timezone(&offset).format("%d/%m/%Y %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());

    println!(
        "{:<14} {:<24} {:<12} {:<12} {:<22} {:<17} {:<7} {}",
        record.id,
        truncate(&record.name, 24),
        truncate(&record.kind, 12),
        record.status.to_string(),
        truncate(&record.location, 22),
        last_check,
        if record.checked { "yes" } else { "no" },
        record.photos.len()
    );
}

pub fn setup_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    Ok(())
}
