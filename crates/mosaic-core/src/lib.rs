use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod layout;
pub mod panel;

pub use layout::{
    solve_grid_layouts, solve_layouts, within_band, LayoutCandidate, LayoutQuery, SECONDARY_PAX_TOLERANCE,
};
pub use panel::{
    ControlPanel, FolderSlot, GridForm, Notification, NotificationKind, PageState, ServerForm, SourceImage,
};

pub const DEFAULT_OPACITY: f64 = 0.6;

pub const MOSAIC_PATH: &str = "/mosaic";
pub const BACKDROP_PATH: &str = "/backdrop";
pub const START_OVERLAY_PATH: &str = "/start-overlay";

/// Pixel size of the source image a layout is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Result<Self, CoreError> {
        if width == 0 || height == 0 {
            return Err(CoreError::InvalidInput(format!(
                "image dimensions must be positive (received {}x{})",
                width, height
            )));
        }
        Ok(Self { width, height })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CutRequest {
    pub rows: u32,
    pub cols: u32,
    pub output: PathBuf,
    pub image_name: String,
    pub image_bytes: Vec<u8>,
}

impl CutRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.rows == 0 {
            return Err(CoreError::InvalidInput("Invalid number of rows".to_string()));
        }
        if self.cols == 0 {
            return Err(CoreError::InvalidInput("Invalid number of columns".to_string()));
        }
        if self.image_bytes.is_empty() {
            return Err(CoreError::MissingField("image"));
        }
        if is_blank_path(&self.output) {
            return Err(CoreError::MissingField("output"));
        }
        Ok(())
    }
}

/// JSON body of the backdrop request. The backend expects `cols`, not `columns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackdropRequest {
    pub rows: u32,
    pub cols: u32,
    pub width: u32,
    pub height: u32,
}

impl BackdropRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.rows == 0 || self.cols == 0 {
            return Err(CoreError::InvalidInput(
                "Rows and Columns must be positive integers".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CoreError::InvalidInput(
                "Width and Height must be positive integers".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayRequest {
    pub grid_cell_folder: PathBuf,
    pub input_folder: PathBuf,
    pub output_folder: PathBuf,
    pub opacity: f64,
}

impl OverlayRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if is_blank_path(&self.grid_cell_folder) {
            return Err(CoreError::MissingField("gridCellFolder"));
        }
        if is_blank_path(&self.input_folder) {
            return Err(CoreError::MissingField("inputFolder"));
        }
        if is_blank_path(&self.output_folder) {
            return Err(CoreError::MissingField("outputFolder"));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(CoreError::InvalidInput(format!(
                "Invalid opacity value {} (expected 0.0 to 1.0)",
                self.opacity
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutResponse {
    pub message: String,
    #[serde(default)]
    pub output_directory: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayResponse {
    pub message: String,
}

/// The remote mosaic service. Implementations own transport and disk writes.
pub trait MosaicBackend: Send + Sync {
    fn cut_into_grid(&self, request: &CutRequest) -> Result<CutResponse, CoreError>;
    /// Fetches the labelled backdrop PNG and stores it at `destination`.
    fn download_backdrop(&self, request: &BackdropRequest, destination: &Path) -> Result<PathBuf, CoreError>;
    fn start_overlay(&self, request: &OverlayRequest) -> Result<OverlayResponse, CoreError>;
}

pub trait DirectoryPicker {
    /// `None` means the user dismissed the dialog.
    fn select_directory(&self) -> Option<PathBuf>;
}

pub trait ImageDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<ImageDimensions, CoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendAction {
    Layouts,
    Cut,
    Backdrop,
    StartOverlay,
}

impl BackendAction {
    /// Backend route the action posts to. Layout solving stays local.
    pub fn endpoint(self) -> Option<&'static str> {
        match self {
            BackendAction::Layouts => None,
            BackendAction::Cut => Some(MOSAIC_PATH),
            BackendAction::Backdrop => Some(BACKDROP_PATH),
            BackendAction::StartOverlay => Some(START_OVERLAY_PATH),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEventType {
    RequestStart,
    RequestSuccess,
    RequestError,
    LayoutsComputed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_type: TelemetryEventType,
    pub action: BackendAction,
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub candidate_count: Option<usize>,
    pub detail: Option<String>,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("action not available on page {0:?}")]
    WrongPage(PageState),
    #[error("a request is already in flight")]
    Busy,
    #[error("could not decode image: {0}")]
    Decode(String),
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InvalidInput,
    MissingField,
    WrongPage,
    Busy,
    DecodeError,
    BackendError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::MissingField(_) => ErrorCode::MissingField,
            Self::WrongPage(_) => ErrorCode::WrongPage,
            Self::Busy => ErrorCode::Busy,
            Self::Decode(_) => ErrorCode::DecodeError,
            Self::Backend(_) => ErrorCode::BackendError,
        }
    }

    pub fn as_error_info(&self) -> ErrorInfo {
        let message = match self {
            Self::Backend(message) => message.clone(),
            other => other.to_string(),
        };
        ErrorInfo {
            code: self.code(),
            message,
        }
    }
}

/// Checks the raw boundary values before anything reaches the solver.
pub fn validate_layout_inputs(width: i64, height: i64, query: &LayoutQuery) -> Result<ImageDimensions, CoreError> {
    let width = u32::try_from(width)
        .map_err(|_| CoreError::InvalidInput(format!("width out of range: {}", width)))?;
    let height = u32::try_from(height)
        .map_err(|_| CoreError::InvalidInput(format!("height out of range: {}", height)))?;
    let dimensions = ImageDimensions::new(width, height)?;
    query.validate()?;
    Ok(dimensions)
}

pub mod v1 {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ComputeLayoutsRequest {
        pub width: i64,
        pub height: i64,
        pub target_pax: i64,
        pub tolerance: i64,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ComputeLayoutsResponse {
        pub candidates: Vec<LayoutCandidate>,
        pub secondary_tolerance: i64,
    }

    pub fn compute_layouts(request: &ComputeLayoutsRequest) -> Result<ComputeLayoutsResponse, CoreError> {
        let query = LayoutQuery {
            target_pax: request.target_pax,
            tolerance: request.tolerance,
        };
        let dimensions = validate_layout_inputs(request.width, request.height, &query)?;
        Ok(ComputeLayoutsResponse {
            candidates: solve_layouts(dimensions, &query),
            secondary_tolerance: SECONDARY_PAX_TOLERANCE,
        })
    }
}

/// Runs one backend call, reporting start / success / error to the sink.
pub fn run_with_telemetry<T>(
    action: BackendAction,
    telemetry: Option<&dyn TelemetrySink>,
    call: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, CoreError> {
    let start = Instant::now();
    if let Some(sink) = telemetry {
        sink.emit(TelemetryEvent {
            event_type: TelemetryEventType::RequestStart,
            action,
            duration_ms: None,
            candidate_count: None,
            detail: None,
        });
    }
    let outcome = call();
    if let Some(sink) = telemetry {
        let (event_type, detail) = match &outcome {
            Ok(_) => (TelemetryEventType::RequestSuccess, None),
            Err(err) => (TelemetryEventType::RequestError, Some(err.to_string())),
        };
        sink.emit(TelemetryEvent {
            event_type,
            action,
            duration_ms: Some(start.elapsed().as_millis() as u64),
            candidate_count: None,
            detail,
        });
    }
    outcome
}

fn is_blank_path(path: &Path) -> bool {
    path.as_os_str().is_empty() || path.to_string_lossy().trim().is_empty()
}
