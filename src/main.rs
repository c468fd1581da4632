use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde_json::json;
use simplelog::{Config, LevelFilter, WriteLogger};

use foliocanvas::layout::DisplayMode;
use foliocanvas::panic_handler::initialize_panic_handler;
use foliocanvas::provider::SyntheticProvider;
use foliocanvas::settings::load_settings;
use foliocanvas::{CanvasViewer, ManualScheduler, Size};

/// Open a synthetic document headlessly and report what the viewer renders
#[derive(Debug, Parser)]
#[command(name = "foliocanvas", version, about)]
struct Cli {
    /// Number of pages in the synthetic document
    #[arg(long, default_value_t = 50)]
    pages: usize,

    /// paginated, horizontal-scroll, vertical-scroll, auto-grid or canvas
    #[arg(long)]
    mode: Option<DisplayMode>,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 1280.0)]
    width: f64,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 800.0)]
    height: f64,

    /// Zoom to apply after opening
    #[arg(long)]
    zoom: Option<f64>,

    /// Page to jump to after opening
    #[arg(long)]
    page: Option<usize>,

    /// Settings file; defaults to the user config directory
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "foliocanvas.log")]
    log_file: PathBuf,

    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,

    /// How long to wait for visible pages to render
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    WriteLogger::init(
        cli.log_level,
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("creating log file {}", cli.log_file.display()))?,
    )?;
    initialize_panic_handler();

    info!("Starting foliocanvas headless run");

    let mut settings = load_settings(cli.config.as_deref());
    if let Some(mode) = cli.mode {
        settings.default_mode = mode;
    }
    let page_size = Size::new(settings.base_page_width, settings.base_page_height);
    let provider = Arc::new(SyntheticProvider::new(cli.pages, page_size));

    let mut viewer = CanvasViewer::new(
        settings,
        provider,
        ManualScheduler::new(),
        Size::new(cli.width, cli.height),
    );
    viewer.initialize(cli.pages)?;
    if let Some(zoom) = cli.zoom {
        viewer.set_zoom(zoom);
    }
    if let Some(page) = cli.page {
        viewer.go_to_page(page);
    }

    let idle = viewer.wait_idle(Duration::from_secs(cli.timeout_secs));
    let camera = viewer.camera();
    let summary = json!({
        "mode": viewer.display_mode(),
        "pages": viewer.page_count(),
        "columns": viewer.columns(),
        "current_page": viewer.current_page(),
        "camera": camera.map(|c| json!({ "x": c.x, "y": c.y, "z": c.z })),
        "visible_pages": viewer.visible_pages(),
        "materialized_pages": viewer.materialized_pages(),
        "cached_pages": viewer.cache_len(),
        "idle": idle,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    viewer.destroy();
    info!("Shutting down foliocanvas");
    Ok(())
}
