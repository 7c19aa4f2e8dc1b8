mod wizard;

use std::io::{self, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use mosaic_client::{normalize_base_url, HttpMosaicBackend};
use mosaic_core::panel::NO_LAYOUT_MESSAGE;
use mosaic_core::{
    run_with_telemetry, solve_layouts, v1, BackdropRequest, BackendAction, ControlPanel, CutRequest, ImageDimensions,
    LayoutQuery, MosaicBackend, OverlayRequest,
};
use mosaic_image::{count_supported_images, decode_dimensions, read_dimensions};
use mosaic_settings::{
    load_settings, merge_settings, read_settings, resolve_settings_paths, write_settings,
    PanelSettings, SettingsError, SettingsOverrides, SettingsPaths, BACKEND_URL_ENV,
};
use mosaic_telemetry::sink_from_env;

#[derive(Parser, Debug)]
#[command(name = "mosaic", version, about = "Mosaic control panel tooling")]
struct Cli {
    /// Backend base URL; beats the settings file and MOSAIC_BACKEND_URL.
    #[arg(long, global = true)]
    backend_url: Option<String>,
    /// Directory holding settings.json (defaults to ~/.mosaic).
    #[arg(long, global = true)]
    settings_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: TopLevelCommand,
}

#[derive(Subcommand, Debug)]
enum TopLevelCommand {
    /// List grid layouts whose head count lands near the target.
    Layouts(LayoutsArgs),
    /// Send an image to the backend to be cut into grid cells.
    Cut(CutArgs),
    /// Download the backdrop image for a grid.
    Backdrop(BackdropArgs),
    /// Start the backend overlay service.
    Overlay(OverlayArgs),
    /// Interactive walk through the three panel pages.
    Panel(PanelArgs),
    Settings(SettingsCommand),
}

#[derive(Args, Debug)]
struct SourceArgs {
    #[arg(long, short = 'i', conflicts_with_all = ["width", "height"])]
    image: Option<PathBuf>,
    #[arg(long, requires = "height")]
    width: Option<i64>,
    #[arg(long, requires = "width")]
    height: Option<i64>,
}

#[derive(Args, Debug)]
struct LayoutsArgs {
    #[command(flatten)]
    source: SourceArgs,
    #[arg(long, short = 'p')]
    pax: i64,
    #[arg(long, short = 't')]
    tolerance: Option<i64>,
}

#[derive(Args, Debug)]
struct CutArgs {
    #[arg(long, short = 'i')]
    image: PathBuf,
    /// Folder the backend writes the grid cells into.
    #[arg(long, short = 'o')]
    output: PathBuf,
    #[arg(long, requires = "cols", conflicts_with = "pax")]
    rows: Option<u32>,
    #[arg(long, requires = "rows")]
    cols: Option<u32>,
    /// Pick the grid from the layout solver instead of --rows/--cols.
    #[arg(long, short = 'p')]
    pax: Option<i64>,
    #[arg(long, short = 't')]
    tolerance: Option<i64>,
    /// Zero-based index into the solver's candidate list.
    #[arg(long, default_value_t = 0)]
    pick: usize,
}

#[derive(Args, Debug)]
struct BackdropArgs {
    #[arg(long)]
    rows: u32,
    #[arg(long)]
    cols: u32,
    #[command(flatten)]
    source: SourceArgs,
    /// Destination file (defaults to the configured download folder).
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct OverlayArgs {
    #[arg(long)]
    grid_cell_folder: PathBuf,
    #[arg(long)]
    input_folder: PathBuf,
    #[arg(long)]
    output_folder: PathBuf,
    #[arg(long)]
    opacity: Option<f64>,
}

#[derive(Args, Debug)]
struct PanelArgs {
    /// Use native folder dialogs when built with the `native-dialogs` feature.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    native_dialogs: bool,
}

#[derive(Args, Debug)]
struct SettingsCommand {
    #[command(subcommand)]
    command: SettingsSubcommand,
}

#[derive(Subcommand, Debug)]
enum SettingsSubcommand {
    /// Print the effective settings (file, environment and flags merged).
    Show,
    /// Write a default settings file.
    Init(InitArgs),
    /// Update individual values in the settings file.
    Set(SetArgs),
}

#[derive(Args, Debug)]
struct InitArgs {
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    force: bool,
}

#[derive(Args, Debug)]
struct SetArgs {
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    tolerance: Option<i64>,
    #[arg(long)]
    opacity: Option<f64>,
    #[arg(long)]
    backdrop_file_name: Option<String>,
    #[arg(long)]
    download_dir: Option<PathBuf>,
    #[arg(long)]
    timeout_secs: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let paths = resolve_settings_paths(cli.settings_dir.as_deref())?;
    let settings = merge_settings(
        load_settings(&paths).with_context(|| format!("loading {}", paths.settings_file.display()))?,
        SettingsOverrides {
            backend_url: cli.backend_url.clone(),
            ..SettingsOverrides::default()
        },
    );

    match cli.command {
        TopLevelCommand::Layouts(args) => {
            let (width, height) = resolve_source(&args.source)?;
            let request = v1::ComputeLayoutsRequest {
                width,
                height,
                target_pax: args.pax,
                tolerance: args.tolerance.unwrap_or(settings.default_tolerance),
            };
            let response = v1::compute_layouts(&request)?;
            if response.candidates.is_empty() {
                warn!("{}", NO_LAYOUT_MESSAGE);
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "width": request.width,
                    "height": request.height,
                    "targetPax": request.target_pax,
                    "tolerance": request.tolerance,
                    "secondaryTolerance": response.secondary_tolerance,
                    "candidates": response.candidates,
                }))?
            );
        }
        TopLevelCommand::Cut(args) => {
            let image_bytes =
                std::fs::read(&args.image).with_context(|| format!("reading {}", args.image.display()))?;
            let dimensions = decode_dimensions(&image_bytes)
                .with_context(|| format!("decoding {}", args.image.display()))?;
            let (rows, cols) = resolve_grid(
                dimensions,
                args.rows.zip(args.cols),
                args.pax,
                args.tolerance.unwrap_or(settings.default_tolerance),
                args.pick,
            )?;
            let request = CutRequest {
                rows,
                cols,
                output: args.output.clone(),
                image_name: file_name_of(&args.image),
                image_bytes,
            };
            let backend = HttpMosaicBackend::from_settings(&settings)?;
            let telemetry = sink_from_env();
            let response = run_with_telemetry(BackendAction::Cut, telemetry.as_deref(), || {
                backend.cut_into_grid(&request)
            })?;
            info!("cut {} into {}x{} cells", args.image.display(), rows, cols);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "rows": rows,
                    "cols": cols,
                    "output": args.output,
                    "message": response.message,
                    "outputDirectory": response.output_directory,
                }))?
            );
        }
        TopLevelCommand::Backdrop(args) => {
            let (width, height) = resolve_source(&args.source)?;
            let request = BackdropRequest {
                rows: args.rows,
                cols: args.cols,
                width: to_pixels(width, "width")?,
                height: to_pixels(height, "height")?,
            };
            let destination = args.output.unwrap_or_else(|| settings.backdrop_destination());
            let backend = HttpMosaicBackend::from_settings(&settings)?;
            let telemetry = sink_from_env();
            let saved = run_with_telemetry(BackendAction::Backdrop, telemetry.as_deref(), || {
                backend.download_backdrop(&request, &destination)
            })?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "request": request,
                    "savedTo": saved,
                }))?
            );
        }
        TopLevelCommand::Overlay(args) => {
            let request = OverlayRequest {
                grid_cell_folder: args.grid_cell_folder,
                input_folder: args.input_folder,
                output_folder: args.output_folder,
                opacity: args.opacity.unwrap_or(settings.default_opacity),
            };
            request.validate()?;
            preflight_grid_cells(&request.grid_cell_folder);
            let backend = HttpMosaicBackend::from_settings(&settings)?;
            let telemetry = sink_from_env();
            let response = run_with_telemetry(BackendAction::StartOverlay, telemetry.as_deref(), || {
                backend.start_overlay(&request)
            })?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "message": response.message,
                    "request": request,
                }))?
            );
        }
        TopLevelCommand::Panel(args) => {
            let backend = HttpMosaicBackend::from_settings(&settings)?;
            info!("panel talking to {}", backend.base_url());
            let mut panel = ControlPanel::new().with_telemetry(sink_from_env());
            let stdin = io::stdin();
            let stdout = io::stdout();
            let mut console = wizard::Console::new(stdin.lock(), BufWriter::new(stdout.lock()));
            wizard::run_panel(&mut console, &mut panel, &backend, &settings, args.native_dialogs)?;
        }
        TopLevelCommand::Settings(settings_command) => match settings_command.command {
            SettingsSubcommand::Show => {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            SettingsSubcommand::Init(args) => {
                if paths.settings_file.exists() && !args.force {
                    return Err(anyhow!(
                        "{} already exists; pass --force to overwrite",
                        paths.settings_file.display()
                    ));
                }
                let defaults = merge_settings(
                    PanelSettings::default(),
                    SettingsOverrides {
                        backend_url: cli.backend_url,
                        ..SettingsOverrides::default()
                    },
                );
                write_settings(&paths, &defaults)?;
                println!("{}", serde_json::to_string_pretty(&defaults)?);
            }
            SettingsSubcommand::Set(args) => {
                let updated = update_settings_file(&paths, args)?;
                if std::env::var(BACKEND_URL_ENV).is_ok() {
                    warn!("{} is set and overrides the stored backend url", BACKEND_URL_ENV);
                }
                println!("{}", serde_json::to_string_pretty(&updated)?);
            }
        },
    }

    Ok(())
}

fn resolve_source(source: &SourceArgs) -> Result<(i64, i64)> {
    if let Some(image) = &source.image {
        let dims = read_dimensions(image).with_context(|| format!("reading dimensions of {}", image.display()))?;
        return Ok((i64::from(dims.width), i64::from(dims.height)));
    }
    match (source.width, source.height) {
        (Some(width), Some(height)) => Ok((width, height)),
        _ => Err(anyhow!("either --image or both --width and --height are required")),
    }
}

fn to_pixels(value: i64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{} must be a non-negative pixel count (received: {})", what, value))
}

/// Explicit rows/cols win; otherwise the solver's candidate at `pick` is used.
fn resolve_grid(
    dimensions: ImageDimensions,
    explicit: Option<(u32, u32)>,
    pax: Option<i64>,
    tolerance: i64,
    pick: usize,
) -> Result<(u32, u32)> {
    if let Some(grid) = explicit {
        return Ok(grid);
    }
    let target_pax = pax.ok_or_else(|| anyhow!("pass --rows and --cols, or --pax to pick a layout"))?;
    let query = LayoutQuery { target_pax, tolerance };
    query.validate()?;
    let candidates = solve_layouts(dimensions, &query);
    if candidates.is_empty() {
        return Err(anyhow!("{}", NO_LAYOUT_MESSAGE));
    }
    let chosen = candidates.get(pick).ok_or_else(|| {
        anyhow!(
            "--pick {} is out of range ({} candidates for pax {})",
            pick,
            candidates.len(),
            target_pax
        )
    })?;
    info!(
        "using layout {}x{} ({} pax) for {}x{}",
        chosen.rows, chosen.columns, chosen.pax, dimensions.width, dimensions.height
    );
    Ok((chosen.rows, chosen.columns))
}

/// The overlay service reads cells from this folder; an empty one is almost always a mistake.
fn preflight_grid_cells(folder: &Path) {
    if !folder.is_dir() {
        warn!("grid cell folder {} does not exist locally", folder.display());
        return;
    }
    let count = count_supported_images(folder, false);
    if count == 0 {
        warn!("grid cell folder {} holds no png/jpeg images", folder.display());
    } else {
        info!("{} grid cell images in {}", count, folder.display());
    }
}

/// Applies `set` values to the stored file without baking in environment overrides.
fn update_settings_file(paths: &SettingsPaths, args: SetArgs) -> Result<PanelSettings> {
    let current = match read_settings(paths) {
        Ok(settings) => settings,
        Err(SettingsError::Io(err)) if err.kind() == ErrorKind::NotFound => PanelSettings::default(),
        Err(err) => return Err(err.into()),
    };
    let url = match args.url {
        Some(url) => Some(normalize_base_url(&url)?),
        None => None,
    };
    if let Some(opacity) = args.opacity {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(anyhow!("opacity must be between 0 and 1 (received: {})", opacity));
        }
    }
    if let Some(tolerance) = args.tolerance {
        if tolerance < 0 {
            return Err(anyhow!("tolerance must not be negative (received: {})", tolerance));
        }
    }
    let updated = merge_settings(
        current,
        SettingsOverrides {
            backend_url: url,
            default_tolerance: args.tolerance,
            default_opacity: args.opacity,
            backdrop_file_name: args.backdrop_file_name,
            download_dir: args.download_dir,
            request_timeout_secs: args.timeout_secs,
        },
    );
    write_settings(paths, &updated)?;
    Ok(updated)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(width: u32, height: u32) -> ImageDimensions {
        ImageDimensions::new(width, height).expect("dims")
    }

    #[test]
    fn explicit_grid_skips_the_solver() {
        let grid = resolve_grid(dims(100, 100), Some((3, 4)), Some(999), 0, 7).expect("grid");
        assert_eq!(grid, (3, 4));
    }

    #[test]
    fn pax_picks_from_solver_candidates() {
        let candidates = mosaic_core::solve_grid_layouts(1920, 1080, 50, 5);
        let grid = resolve_grid(dims(1920, 1080), None, Some(50), 5, 0).expect("grid");
        assert_eq!(grid, (candidates[0].rows, candidates[0].columns));
    }

    #[test]
    fn out_of_range_pick_is_an_error() {
        let err = resolve_grid(dims(1920, 1080), None, Some(50), 5, 10_000).expect_err("pick too large");
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn empty_solve_reports_no_layout() {
        let err = resolve_grid(dims(10, 10), None, Some(1_000_000), 0, 0).expect_err("nothing fits");
        assert_eq!(err.to_string(), NO_LAYOUT_MESSAGE);
    }

    #[test]
    fn grid_needs_rows_cols_or_pax() {
        assert!(resolve_grid(dims(10, 10), None, None, 0, 0).is_err());
    }

    #[test]
    fn set_rejects_bad_values_and_keeps_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = resolve_settings_paths(Some(dir.path())).expect("paths");
        let args = SetArgs {
            url: None,
            tolerance: None,
            opacity: Some(1.5),
            backdrop_file_name: None,
            download_dir: None,
            timeout_secs: None,
        };
        assert!(update_settings_file(&paths, args).is_err());
        assert!(!paths.settings_file.exists());
    }

    #[test]
    fn set_normalises_url_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = resolve_settings_paths(Some(dir.path())).expect("paths");
        let args = SetArgs {
            url: Some("http://gpu-box:8000/".to_string()),
            tolerance: Some(3),
            opacity: None,
            backdrop_file_name: None,
            download_dir: None,
            timeout_secs: None,
        };
        update_settings_file(&paths, args).expect("set");
        let stored = read_settings(&paths).expect("read");
        assert_eq!(stored.backend_url, "http://gpu-box:8000");
        assert_eq!(stored.default_tolerance, 3);
    }

    #[test]
    fn width_and_height_must_come_together() {
        let source = SourceArgs {
            image: None,
            width: Some(10),
            height: None,
        };
        assert!(resolve_source(&source).is_err());
        assert!(to_pixels(-1, "width").is_err());
    }
}
