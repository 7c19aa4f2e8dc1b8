//! Ephemeral view-model behind the control panel.
//!
//! One page is visible at a time. Failed backend calls leave the forms as
//! they were and queue an error notification; successful ones reset the
//! form they consumed.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::layout::{solve_layouts, LayoutCandidate, LayoutQuery};
use crate::{
    run_with_telemetry, BackdropRequest, BackendAction, CoreError, CutRequest, CutResponse, DirectoryPicker,
    ImageDecoder, ImageDimensions, MosaicBackend, OverlayRequest, OverlayResponse, TelemetryEvent,
    TelemetryEventType, TelemetrySink, DEFAULT_OPACITY,
};

pub const CUT_SUCCESS_MESSAGE: &str = "Images Generated Successfully ! Check Your Selected Grid Cell Folder";
pub const CUT_ERROR_MESSAGE: &str = "Error While Cutting the Image. Please try again.";
pub const BACKDROP_SUCCESS_MESSAGE: &str = "Backdrop Image Downloaded successfully!";
pub const BACKDROP_ERROR_MESSAGE: &str = "Error While Downloading Backdrop Image. Please try again.";
pub const SERVER_READY_MESSAGE: &str = "Server Is Ready!";
pub const SERVER_ERROR_MESSAGE: &str = "Error While Starting the Server. Please try again.";
pub const IMAGE_ERROR_MESSAGE: &str = "Error While Reading the Image. Please choose another file.";
pub const NO_LAYOUT_MESSAGE: &str = "No matching grid found - adjust tolerance or pax";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PageState {
    SelectGrid,
    ConfigureServer,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderSlot {
    /// Where the backend writes the cut grid cells.
    GridOutput,
    GridCellFolder,
    InputFolder,
    OutputFolder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub dimensions: ImageDimensions,
}

impl SourceImage {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridForm {
    pub rows: u32,
    pub cols: u32,
    pub width: u32,
    pub height: u32,
    pub output: Option<PathBuf>,
    pub image: Option<SourceImage>,
    pub selected_layout: Option<LayoutCandidate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerForm {
    pub grid_cell_folder: Option<PathBuf>,
    pub input_folder: Option<PathBuf>,
    pub output_folder: Option<PathBuf>,
    pub opacity: f64,
}

impl Default for ServerForm {
    fn default() -> Self {
        Self {
            grid_cell_folder: None,
            input_folder: None,
            output_folder: None,
            opacity: DEFAULT_OPACITY,
        }
    }
}

pub struct ControlPanel {
    page: PageState,
    pub grid: GridForm,
    pub server: ServerForm,
    candidates: Vec<LayoutCandidate>,
    loading: bool,
    downloading: bool,
    notifications: Vec<Notification>,
    telemetry: Option<Box<dyn TelemetrySink>>,
}

impl Default for ControlPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlPanel {
    pub fn new() -> Self {
        Self {
            page: PageState::SelectGrid,
            grid: GridForm::default(),
            server: ServerForm::default(),
            candidates: Vec::new(),
            loading: false,
            downloading: false,
            notifications: Vec::new(),
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, sink: Option<Box<dyn TelemetrySink>>) -> Self {
        self.telemetry = sink;
        self
    }

    pub fn page(&self) -> PageState {
        self.page
    }

    pub fn candidates(&self) -> &[LayoutCandidate] {
        &self.candidates
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_downloading(&self) -> bool {
        self.downloading
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    pub fn set_grid(&mut self, rows: u32, cols: u32) {
        self.grid.rows = rows;
        self.grid.cols = cols;
        self.grid.selected_layout = None;
    }

    pub fn set_opacity(&mut self, opacity: f64) {
        self.server.opacity = opacity;
    }

    pub fn choose_image(
        &mut self,
        path: PathBuf,
        bytes: Vec<u8>,
        decoder: &dyn ImageDecoder,
    ) -> Result<ImageDimensions, CoreError> {
        let dimensions = match decoder.decode(&bytes) {
            Ok(dimensions) => dimensions,
            Err(err) => {
                warn!("failed to decode {}: {}", path.display(), err);
                self.notify(NotificationKind::Error, IMAGE_ERROR_MESSAGE);
                return Err(err);
            }
        };
        debug!(
            "loaded {} ({}x{})",
            path.display(),
            dimensions.width,
            dimensions.height
        );
        self.grid.width = dimensions.width;
        self.grid.height = dimensions.height;
        self.grid.image = Some(SourceImage {
            path,
            bytes,
            dimensions,
        });
        // Candidates computed for a previous image no longer apply.
        self.candidates.clear();
        Ok(dimensions)
    }

    pub fn compute_layouts(&mut self, query: LayoutQuery) -> Result<&[LayoutCandidate], CoreError> {
        self.require_page(PageState::SelectGrid)?;
        let dimensions = ImageDimensions::new(self.grid.width, self.grid.height)
            .map_err(|_| CoreError::MissingField("image"))?;
        query.validate()?;

        self.candidates = solve_layouts(dimensions, &query);
        info!(
            "{} layout candidates for pax {} ±{} on {}x{}",
            self.candidates.len(),
            query.target_pax,
            query.tolerance,
            dimensions.width,
            dimensions.height
        );
        if let Some(sink) = self.telemetry.as_deref() {
            sink.emit(TelemetryEvent {
                event_type: TelemetryEventType::LayoutsComputed,
                action: BackendAction::Layouts,
                duration_ms: None,
                candidate_count: Some(self.candidates.len()),
                detail: Some(format!("pax={} tolerance={}", query.target_pax, query.tolerance)),
            });
        }
        if self.candidates.is_empty() {
            self.notify(NotificationKind::Error, NO_LAYOUT_MESSAGE);
        }
        Ok(&self.candidates)
    }

    /// Copies the chosen candidate into the grid form and discards the list.
    pub fn select_layout(&mut self, index: usize) -> Result<LayoutCandidate, CoreError> {
        self.require_page(PageState::SelectGrid)?;
        let candidate = self.candidates.get(index).cloned().ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "layout {} does not exist ({} candidates)",
                index,
                self.candidates.len()
            ))
        })?;
        self.grid.rows = candidate.rows;
        self.grid.cols = candidate.columns;
        self.grid.selected_layout = Some(candidate.clone());
        self.candidates.clear();
        Ok(candidate)
    }

    pub fn select_folder(&mut self, slot: FolderSlot, picker: &dyn DirectoryPicker) -> Option<PathBuf> {
        let selected = picker.select_directory()?;
        let target = match slot {
            FolderSlot::GridOutput => &mut self.grid.output,
            FolderSlot::GridCellFolder => &mut self.server.grid_cell_folder,
            FolderSlot::InputFolder => &mut self.server.input_folder,
            FolderSlot::OutputFolder => &mut self.server.output_folder,
        };
        *target = Some(selected.clone());
        Some(selected)
    }

    pub fn cut_request(&self) -> Result<CutRequest, CoreError> {
        let image = self.grid.image.as_ref().ok_or(CoreError::MissingField("image"))?;
        let output = self.grid.output.clone().ok_or(CoreError::MissingField("output"))?;
        let request = CutRequest {
            rows: self.grid.rows,
            cols: self.grid.cols,
            output,
            image_name: image.file_name(),
            image_bytes: image.bytes.clone(),
        };
        request.validate()?;
        Ok(request)
    }

    /// Marks the panel loading and hands out the request to send. Until
    /// [`finish_cut`](Self::finish_cut) runs, further cuts and server starts give `Busy`.
    pub fn begin_cut(&mut self) -> Result<CutRequest, CoreError> {
        self.require_page(PageState::SelectGrid)?;
        if self.loading {
            return Err(CoreError::Busy);
        }
        let request = self.cut_request()?;
        self.loading = true;
        Ok(request)
    }

    pub fn finish_cut(
        &mut self,
        request: &CutRequest,
        outcome: Result<CutResponse, CoreError>,
    ) -> Result<CutResponse, CoreError> {
        self.loading = false;
        match outcome {
            Ok(response) => {
                info!("cut {}x{} grid into {}", request.rows, request.cols, request.output.display());
                self.notify(NotificationKind::Success, CUT_SUCCESS_MESSAGE);
                self.grid = GridForm::default();
                Ok(response)
            }
            Err(err) => {
                warn!("cut request failed: {}", err);
                self.notify(NotificationKind::Error, CUT_ERROR_MESSAGE);
                Err(err)
            }
        }
    }

    pub fn cut_image_into_grid(&mut self, backend: &dyn MosaicBackend) -> Result<CutResponse, CoreError> {
        let request = self.begin_cut()?;
        let outcome = run_with_telemetry(BackendAction::Cut, self.telemetry.as_deref(), || {
            backend.cut_into_grid(&request)
        });
        self.finish_cut(&request, outcome)
    }

    pub fn backdrop_request(&self) -> Result<BackdropRequest, CoreError> {
        let request = BackdropRequest {
            rows: self.grid.rows,
            cols: self.grid.cols,
            width: self.grid.width,
            height: self.grid.height,
        };
        request.validate()?;
        Ok(request)
    }

    /// Downloads run independently of cuts; only a second backdrop gives `Busy`.
    pub fn begin_backdrop(&mut self) -> Result<BackdropRequest, CoreError> {
        self.require_page(PageState::SelectGrid)?;
        if self.downloading {
            return Err(CoreError::Busy);
        }
        let request = self.backdrop_request()?;
        self.downloading = true;
        Ok(request)
    }

    pub fn finish_backdrop(&mut self, outcome: Result<PathBuf, CoreError>) -> Result<PathBuf, CoreError> {
        self.downloading = false;
        match outcome {
            Ok(saved) => {
                info!("backdrop saved to {}", saved.display());
                self.notify(NotificationKind::Success, BACKDROP_SUCCESS_MESSAGE);
                Ok(saved)
            }
            Err(err) => {
                warn!("backdrop download failed: {}", err);
                self.notify(NotificationKind::Error, BACKDROP_ERROR_MESSAGE);
                Err(err)
            }
        }
    }

    pub fn download_backdrop(&mut self, backend: &dyn MosaicBackend, destination: &Path) -> Result<PathBuf, CoreError> {
        let request = self.begin_backdrop()?;
        let outcome = run_with_telemetry(BackendAction::Backdrop, self.telemetry.as_deref(), || {
            backend.download_backdrop(&request, destination)
        });
        self.finish_backdrop(outcome)
    }

    pub fn open_server_setup(&mut self) -> Result<(), CoreError> {
        self.require_page(PageState::SelectGrid)?;
        self.page = PageState::ConfigureServer;
        Ok(())
    }

    pub fn go_back(&mut self) -> Result<(), CoreError> {
        self.require_page(PageState::ConfigureServer)?;
        self.page = PageState::SelectGrid;
        Ok(())
    }

    pub fn overlay_request(&self) -> Result<OverlayRequest, CoreError> {
        let request = OverlayRequest {
            grid_cell_folder: self
                .server
                .grid_cell_folder
                .clone()
                .ok_or(CoreError::MissingField("gridCellFolder"))?,
            input_folder: self
                .server
                .input_folder
                .clone()
                .ok_or(CoreError::MissingField("inputFolder"))?,
            output_folder: self
                .server
                .output_folder
                .clone()
                .ok_or(CoreError::MissingField("outputFolder"))?,
            opacity: self.server.opacity,
        };
        request.validate()?;
        Ok(request)
    }

    pub fn begin_start_server(&mut self) -> Result<OverlayRequest, CoreError> {
        self.require_page(PageState::ConfigureServer)?;
        if self.loading {
            return Err(CoreError::Busy);
        }
        let request = self.overlay_request()?;
        self.loading = true;
        Ok(request)
    }

    /// Moves to `Ready` on success. A failure keeps the page and the entered folders.
    pub fn finish_start_server(
        &mut self,
        request: &OverlayRequest,
        outcome: Result<OverlayResponse, CoreError>,
    ) -> Result<OverlayResponse, CoreError> {
        self.loading = false;
        match outcome {
            Ok(response) => {
                info!("overlay watching {}", request.input_folder.display());
                self.notify(NotificationKind::Success, SERVER_READY_MESSAGE);
                self.page = PageState::Ready;
                self.server = ServerForm::default();
                Ok(response)
            }
            Err(err) => {
                warn!("start-overlay failed: {}", err);
                self.notify(NotificationKind::Error, SERVER_ERROR_MESSAGE);
                Err(err)
            }
        }
    }

    pub fn start_server(&mut self, backend: &dyn MosaicBackend) -> Result<OverlayResponse, CoreError> {
        let request = self.begin_start_server()?;
        let outcome = run_with_telemetry(BackendAction::StartOverlay, self.telemetry.as_deref(), || {
            backend.start_overlay(&request)
        });
        self.finish_start_server(&request, outcome)
    }

    /// Starts over from a blank grid page. Telemetry wiring is kept.
    pub fn restart(&mut self) -> Result<(), CoreError> {
        self.require_page(PageState::Ready)?;
        let telemetry = self.telemetry.take();
        *self = Self::new().with_telemetry(telemetry);
        Ok(())
    }

    fn require_page(&self, expected: PageState) -> Result<(), CoreError> {
        if self.page != expected {
            return Err(CoreError::WrongPage(self.page));
        }
        Ok(())
    }

    fn notify(&mut self, kind: NotificationKind, message: &str) {
        self.notifications.push(Notification {
            kind,
            message: message.to_string(),
        });
    }
}
