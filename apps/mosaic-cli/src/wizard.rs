use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::debug;
use mosaic_core::{
    ControlPanel, DirectoryPicker, FolderSlot, GridForm, LayoutQuery, MosaicBackend, NotificationKind, PageState,
};
use mosaic_image::{count_supported_images, ImageCrateDecoder};
use mosaic_settings::PanelSettings;

/// Line-oriented prompt over any reader/writer pair.
pub struct Console<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Console<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// `None` once input is exhausted.
    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{}: ", prompt)?;
        self.output.flush()?;
        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("reading console input")?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    fn say(&mut self, line: impl AsRef<str>) -> Result<()> {
        writeln!(self.output, "{}", line.as_ref())?;
        Ok(())
    }

    #[cfg(test)]
    fn into_output(self) -> W {
        self.output
    }
}

/// A directory the user already typed in.
struct TypedDirectory(Option<PathBuf>);

impl DirectoryPicker for TypedDirectory {
    fn select_directory(&self) -> Option<PathBuf> {
        self.0.clone()
    }
}

#[cfg(feature = "native-dialogs")]
struct NativeDirectory;

#[cfg(feature = "native-dialogs")]
impl DirectoryPicker for NativeDirectory {
    fn select_directory(&self) -> Option<PathBuf> {
        rfd::FileDialog::new().pick_folder()
    }
}

enum FolderAnswer {
    Picked,
    Blank,
    Quit,
}

pub fn run_panel<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    panel: &mut ControlPanel,
    backend: &dyn MosaicBackend,
    settings: &PanelSettings,
    native_dialogs: bool,
) -> Result<()> {
    panel.set_opacity(settings.default_opacity);
    loop {
        let keep_going = match panel.page() {
            PageState::SelectGrid => grid_page(console, panel, backend, settings, native_dialogs)?,
            PageState::ConfigureServer => server_page(console, panel, backend, native_dialogs)?,
            PageState::Ready => ready_page(console, panel, settings)?,
        };
        flush_notifications(console, panel)?;
        if !keep_going {
            return Ok(());
        }
    }
}

fn grid_page<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    panel: &mut ControlPanel,
    backend: &dyn MosaicBackend,
    settings: &PanelSettings,
    native_dialogs: bool,
) -> Result<bool> {
    if panel.grid.image.is_none() {
        let Some(answer) = console.ask("Image path (blank for server setup, q to quit)")? else {
            return Ok(false);
        };
        match answer.as_str() {
            "q" => return Ok(false),
            "" => {
                panel.open_server_setup()?;
                return Ok(true);
            }
            path => match std::fs::read(path) {
                Ok(bytes) => {
                    if let Ok(dims) = panel.choose_image(PathBuf::from(path), bytes, &ImageCrateDecoder) {
                        console.say(format!("Image is {}x{}", dims.width, dims.height))?;
                    }
                }
                Err(err) => console.say(format!("Cannot read {}: {}", path, err))?,
            },
        }
        return Ok(true);
    }

    if panel.grid.rows == 0 || panel.grid.cols == 0 {
        let Some(mode) = console.ask("Grid: [m]anual rows/cols, [p]ax search, [q]uit")? else {
            return Ok(false);
        };
        return match mode.as_str() {
            "m" => manual_grid(console, panel),
            "p" => choose_layout(console, panel, settings),
            "q" => Ok(false),
            other => {
                console.say(format!("Unknown choice '{}'", other))?;
                Ok(true)
            }
        };
    }

    if panel.grid.output.is_none() {
        return match pick_folder(console, panel, FolderSlot::GridOutput, "Folder for grid cells", native_dialogs)? {
            FolderAnswer::Quit => Ok(false),
            _ => Ok(true),
        };
    }

    console.say(format!(
        "Grid {}x{} on {}x{}",
        panel.grid.rows, panel.grid.cols, panel.grid.width, panel.grid.height
    ))?;
    let Some(action) = console.ask("[c]ut image, [b]ackdrop, [n]ext: server setup, [r]eset grid, [q]uit")? else {
        return Ok(false);
    };
    match action.as_str() {
        "c" => {
            if let Err(err) = panel.cut_image_into_grid(backend) {
                debug!("cut failed: {}", err);
            }
        }
        "b" => {
            let destination = settings.backdrop_destination();
            if let Ok(saved) = panel.download_backdrop(backend, &destination) {
                console.say(format!("Saved to {}", saved.display()))?;
            }
        }
        "n" => panel.open_server_setup()?,
        "r" => panel.grid = GridForm::default(),
        "q" => return Ok(false),
        other => console.say(format!("Unknown choice '{}'", other))?,
    }
    Ok(true)
}

fn ask_count<R: BufRead, W: Write>(console: &mut Console<R, W>, prompt: &str) -> Result<Option<Option<u32>>> {
    let Some(answer) = console.ask(prompt)? else {
        return Ok(None);
    };
    match answer.parse::<u32>() {
        Ok(value) if value > 0 => Ok(Some(Some(value))),
        _ => {
            console.say(format!("'{}' is not a positive whole number", answer))?;
            Ok(Some(None))
        }
    }
}

fn manual_grid<R: BufRead, W: Write>(console: &mut Console<R, W>, panel: &mut ControlPanel) -> Result<bool> {
    let Some(rows) = ask_count(console, "Number of rows")? else {
        return Ok(false);
    };
    let Some(rows) = rows else {
        return Ok(true);
    };
    let Some(cols) = ask_count(console, "Number of columns")? else {
        return Ok(false);
    };
    let Some(cols) = cols else {
        return Ok(true);
    };
    panel.set_grid(rows, cols);
    Ok(true)
}

fn choose_layout<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    panel: &mut ControlPanel,
    settings: &PanelSettings,
) -> Result<bool> {
    let Some(pax) = console.ask("Target number of people")? else {
        return Ok(false);
    };
    let Ok(target_pax) = pax.parse::<i64>() else {
        console.say(format!("'{}' is not a whole number", pax))?;
        return Ok(true);
    };
    let Some(tolerance) = console.ask(&format!("Tolerance [{}]", settings.default_tolerance))? else {
        return Ok(false);
    };
    let tolerance = if tolerance.is_empty() {
        settings.default_tolerance
    } else if let Ok(value) = tolerance.parse::<i64>() {
        value
    } else {
        console.say(format!("'{}' is not a whole number", tolerance))?;
        return Ok(true);
    };

    let listing: Vec<String> = match panel.compute_layouts(LayoutQuery { target_pax, tolerance }) {
        Ok(candidates) => candidates
            .iter()
            .enumerate()
            .map(|(index, c)| {
                format!(
                    "  {}) {} x {}  cell {:.1} x {:.1}  ({} pax)",
                    index + 1,
                    c.rows,
                    c.columns,
                    c.cell_width,
                    c.cell_height,
                    c.pax
                )
            })
            .collect(),
        Err(err) => {
            console.say(err.to_string())?;
            return Ok(true);
        }
    };
    if listing.is_empty() {
        return Ok(true);
    }
    for line in &listing {
        console.say(line)?;
    }

    let Some(choice) = console.ask("Pick a layout")? else {
        return Ok(false);
    };
    match choice.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
        Some(index) => match panel.select_layout(index) {
            Ok(layout) => console.say(format!("Using {} rows x {} columns", layout.rows, layout.columns))?,
            Err(err) => console.say(err.to_string())?,
        },
        None => console.say(format!("'{}' is not a layout number", choice))?,
    }
    Ok(true)
}

fn server_page<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    panel: &mut ControlPanel,
    backend: &dyn MosaicBackend,
    native_dialogs: bool,
) -> Result<bool> {
    let missing = [
        (FolderSlot::GridCellFolder, panel.server.grid_cell_folder.is_none(), "Grid cell folder"),
        (FolderSlot::InputFolder, panel.server.input_folder.is_none(), "Input folder"),
        (FolderSlot::OutputFolder, panel.server.output_folder.is_none(), "Output folder"),
    ]
    .into_iter()
    .find(|(_, is_missing, _)| *is_missing);

    if let Some((slot, _, label)) = missing {
        let prompt = format!("{} (blank to go back)", label);
        match pick_folder(console, panel, slot, &prompt, native_dialogs)? {
            FolderAnswer::Quit => return Ok(false),
            FolderAnswer::Blank => panel.go_back()?,
            FolderAnswer::Picked => {
                if let (FolderSlot::GridCellFolder, Some(folder)) = (slot, panel.server.grid_cell_folder.as_ref()) {
                    if folder.is_dir() && count_supported_images(folder, false) == 0 {
                        console.say(format!("Warning: {} holds no png/jpeg images", folder.display()))?;
                    }
                }
            }
        }
        return Ok(true);
    }

    let prompt = format!(
        "Opacity {:.2}. [s]tart overlay, [o]pacity, [b]ack, [q]uit",
        panel.server.opacity
    );
    let Some(action) = console.ask(&prompt)? else {
        return Ok(false);
    };
    match action.as_str() {
        "s" => {
            if let Err(err) = panel.start_server(backend) {
                debug!("start-overlay failed: {}", err);
                if !matches!(err, mosaic_core::CoreError::Backend(_)) {
                    console.say(err.to_string())?;
                }
            }
        }
        "o" => {
            let Some(value) = console.ask("Opacity (0 to 1)")? else {
                return Ok(false);
            };
            match value.parse::<f64>() {
                Ok(opacity) => panel.set_opacity(opacity),
                Err(_) => console.say(format!("'{}' is not a number", value))?,
            }
        }
        "b" => panel.go_back()?,
        "q" => return Ok(false),
        other => console.say(format!("Unknown choice '{}'", other))?,
    }
    Ok(true)
}

fn ready_page<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    panel: &mut ControlPanel,
    settings: &PanelSettings,
) -> Result<bool> {
    console.say("Overlay service is running. Drop photos into the input folder.")?;
    let Some(action) = console.ask("[r]estart, [q]uit")? else {
        return Ok(false);
    };
    match action.as_str() {
        "r" => {
            panel.restart()?;
            panel.set_opacity(settings.default_opacity);
            Ok(true)
        }
        "q" => Ok(false),
        other => {
            console.say(format!("Unknown choice '{}'", other))?;
            Ok(true)
        }
    }
}

fn pick_folder<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    panel: &mut ControlPanel,
    slot: FolderSlot,
    prompt: &str,
    native_dialogs: bool,
) -> Result<FolderAnswer> {
    #[cfg(feature = "native-dialogs")]
    {
        if native_dialogs && panel.select_folder(slot, &NativeDirectory).is_some() {
            return Ok(FolderAnswer::Picked);
        }
    }
    #[cfg(not(feature = "native-dialogs"))]
    {
        if native_dialogs {
            debug!("built without native-dialogs; falling back to typed paths");
        }
    }

    let Some(answer) = console.ask(prompt)? else {
        return Ok(FolderAnswer::Quit);
    };
    if answer.is_empty() {
        return Ok(FolderAnswer::Blank);
    }
    if answer == "q" {
        return Ok(FolderAnswer::Quit);
    }
    let folder = PathBuf::from(answer);
    if !folder.exists() {
        console.say(format!("Note: {} does not exist locally", folder.display()))?;
    }
    panel.select_folder(slot, &TypedDirectory(Some(folder)));
    Ok(FolderAnswer::Picked)
}

fn flush_notifications<R: BufRead, W: Write>(console: &mut Console<R, W>, panel: &mut ControlPanel) -> Result<()> {
    for notification in panel.drain_notifications() {
        let tag = match notification.kind {
            NotificationKind::Success => "ok",
            NotificationKind::Error => "error",
        };
        console.say(format!("[{}] {}", tag, notification.message))?;
    }
    console.output.flush()?;
    Ok(())
}
