use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::debug;
use mosaic_client::HttpMosaicBackend;
use mosaic_core::{
    run_with_telemetry, v1, BackdropRequest, BackendAction, CoreError, CutRequest, MosaicBackend, OverlayRequest,
};
use mosaic_image::read_dimensions;
use mosaic_settings::{load_settings, merge_settings, resolve_settings_paths, PanelSettings, SettingsOverrides};
use mosaic_telemetry::sink_from_env;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfoRequest {
    pub image_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInfoResponse {
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CutCommandRequest {
    pub rows: u32,
    pub cols: u32,
    pub output: String,
    pub image_path: String,
    pub backend_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CutCommandResponse {
    pub message: String,
    pub output_directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackdropCommandRequest {
    pub rows: u32,
    pub cols: u32,
    pub width: u32,
    pub height: u32,
    pub destination: Option<String>,
    pub backend_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackdropCommandResponse {
    pub saved_to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayCommandRequest {
    pub grid_cell_folder: String,
    pub input_folder: String,
    pub output_folder: String,
    pub opacity: Option<f64>,
    pub backend_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayCommandResponse {
    pub message: String,
}

pub fn image_info_command(request: ImageInfoRequest) -> std::result::Result<ImageInfoResponse, String> {
    let path = PathBuf::from(&request.image_path);
    let dimensions = read_dimensions(&path)
        .map_err(|err| error_message(&CoreError::Decode(format!("{}: {}", path.display(), err))))?;
    Ok(ImageInfoResponse {
        file_name: file_name_of(&path),
        width: dimensions.width,
        height: dimensions.height,
    })
}

pub fn compute_layouts_command(
    request: v1::ComputeLayoutsRequest,
) -> std::result::Result<v1::ComputeLayoutsResponse, String> {
    v1::compute_layouts(&request).map_err(|err| error_message(&err))
}

pub fn cut_image_command(request: CutCommandRequest) -> std::result::Result<CutCommandResponse, String> {
    let settings = settings_with_override(request.backend_url.clone()).map_err(|err| err.to_string())?;
    let backend = HttpMosaicBackend::from_settings(&settings).map_err(|err| err.to_string())?;
    cut_image_with_backend(&backend, request)
}

pub fn cut_image_with_backend(
    backend: &dyn MosaicBackend,
    request: CutCommandRequest,
) -> std::result::Result<CutCommandResponse, String> {
    if request.image_path.trim().is_empty() {
        return Err(error_message(&CoreError::MissingField("image")));
    }
    let image_path = PathBuf::from(&request.image_path);
    let image_bytes = fs::read(&image_path)
        .map_err(|err| error_message(&CoreError::Decode(format!("{}: {}", image_path.display(), err))))?;
    let cut = CutRequest {
        rows: request.rows,
        cols: request.cols,
        output: PathBuf::from(request.output.trim()),
        image_name: file_name_of(&image_path),
        image_bytes,
    };
    cut.validate().map_err(|err| error_message(&err))?;

    let telemetry = sink_from_env();
    let response = run_with_telemetry(BackendAction::Cut, telemetry.as_deref(), || backend.cut_into_grid(&cut))
        .map_err(|err| error_message(&err))?;
    Ok(CutCommandResponse {
        message: response.message,
        output_directory: response.output_directory,
    })
}

pub fn download_backdrop_command(
    request: BackdropCommandRequest,
) -> std::result::Result<BackdropCommandResponse, String> {
    let settings = settings_with_override(request.backend_url.clone()).map_err(|err| err.to_string())?;
    let backend = HttpMosaicBackend::from_settings(&settings).map_err(|err| err.to_string())?;
    download_backdrop_with_backend(&backend, &settings, request)
}

pub fn download_backdrop_with_backend(
    backend: &dyn MosaicBackend,
    settings: &PanelSettings,
    request: BackdropCommandRequest,
) -> std::result::Result<BackdropCommandResponse, String> {
    let backdrop = BackdropRequest {
        rows: request.rows,
        cols: request.cols,
        width: request.width,
        height: request.height,
    };
    backdrop.validate().map_err(|err| error_message(&err))?;
    let destination = request
        .destination
        .filter(|d| !d.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| settings.backdrop_destination());

    let telemetry = sink_from_env();
    let saved = run_with_telemetry(BackendAction::Backdrop, telemetry.as_deref(), || {
        backend.download_backdrop(&backdrop, &destination)
    })
    .map_err(|err| error_message(&err))?;
    Ok(BackdropCommandResponse {
        saved_to: saved.display().to_string(),
    })
}

pub fn start_overlay_command(request: OverlayCommandRequest) -> std::result::Result<OverlayCommandResponse, String> {
    let settings = settings_with_override(request.backend_url.clone()).map_err(|err| err.to_string())?;
    let backend = HttpMosaicBackend::from_settings(&settings).map_err(|err| err.to_string())?;
    start_overlay_with_backend(&backend, &settings, request)
}

pub fn start_overlay_with_backend(
    backend: &dyn MosaicBackend,
    settings: &PanelSettings,
    request: OverlayCommandRequest,
) -> std::result::Result<OverlayCommandResponse, String> {
    let overlay = OverlayRequest {
        grid_cell_folder: PathBuf::from(request.grid_cell_folder.trim()),
        input_folder: PathBuf::from(request.input_folder.trim()),
        output_folder: PathBuf::from(request.output_folder.trim()),
        opacity: request.opacity.unwrap_or(settings.default_opacity),
    };
    overlay.validate().map_err(|err| error_message(&err))?;

    let telemetry = sink_from_env();
    let response = run_with_telemetry(BackendAction::StartOverlay, telemetry.as_deref(), || {
        backend.start_overlay(&overlay)
    })
    .map_err(|err| error_message(&err))?;
    Ok(OverlayCommandResponse {
        message: response.message,
    })
}

#[cfg(feature = "tauri-plugin")]
#[tauri::command]
fn tauri_image_info_command(request: ImageInfoRequest) -> std::result::Result<ImageInfoResponse, String> {
    image_info_command(request)
}

#[cfg(feature = "tauri-plugin")]
#[tauri::command]
fn tauri_compute_layouts_command(
    request: v1::ComputeLayoutsRequest,
) -> std::result::Result<v1::ComputeLayoutsResponse, String> {
    compute_layouts_command(request)
}

#[cfg(feature = "tauri-plugin")]
#[tauri::command]
fn tauri_cut_image_command(request: CutCommandRequest) -> std::result::Result<CutCommandResponse, String> {
    cut_image_command(request)
}

#[cfg(feature = "tauri-plugin")]
#[tauri::command]
fn tauri_download_backdrop_command(
    request: BackdropCommandRequest,
) -> std::result::Result<BackdropCommandResponse, String> {
    download_backdrop_command(request)
}

#[cfg(feature = "tauri-plugin")]
#[tauri::command]
fn tauri_start_overlay_command(request: OverlayCommandRequest) -> std::result::Result<OverlayCommandResponse, String> {
    start_overlay_command(request)
}

#[cfg(feature = "tauri-plugin")]
pub fn init<R: tauri::Runtime>() -> tauri::plugin::TauriPlugin<R> {
    tauri::plugin::Builder::new("mosaic")
        .invoke_handler(tauri::generate_handler![
            tauri_image_info_command,
            tauri_compute_layouts_command,
            tauri_cut_image_command,
            tauri_download_backdrop_command,
            tauri_start_overlay_command
        ])
        .build()
}

fn settings_with_override(backend_url: Option<String>) -> Result<PanelSettings> {
    let paths = resolve_settings_paths(None)?;
    let settings = load_settings(&paths)?;
    debug!("using settings from {}", paths.settings_file.display());
    Ok(merge_settings(
        settings,
        SettingsOverrides {
            backend_url,
            ..SettingsOverrides::default()
        },
    ))
}

/// Serialises the error as `{code, message}` so the frontend can branch on the code.
fn error_message(err: &CoreError) -> String {
    serde_json::to_string(&err.as_error_info()).unwrap_or_else(|_| err.to_string())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string())
}
