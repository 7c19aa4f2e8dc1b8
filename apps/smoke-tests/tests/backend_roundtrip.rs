mod support;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use mosaic_client::{HttpMosaicBackend, BACKDROP_PATH, MOSAIC_PATH, START_OVERLAY_PATH};
use mosaic_core::panel::{
    BACKDROP_ERROR_MESSAGE, BACKDROP_SUCCESS_MESSAGE, CUT_SUCCESS_MESSAGE, SERVER_ERROR_MESSAGE, SERVER_READY_MESSAGE,
};
use mosaic_core::{
    BackdropRequest, ControlPanel, CoreError, CutRequest, DirectoryPicker, FolderSlot, LayoutQuery, MosaicBackend,
    NotificationKind, OverlayRequest, PageState,
};
use mosaic_image::ImageCrateDecoder;
use serde_json::json;
use support::{sample_png, CannedResponse, FakeBackend};
use tauri_plugin_mosaic::{cut_image_with_backend, CutCommandRequest};

struct Fixed(PathBuf);

impl DirectoryPicker for Fixed {
    fn select_directory(&self) -> Option<PathBuf> {
        Some(self.0.clone())
    }
}

fn client(fake: &FakeBackend) -> Result<HttpMosaicBackend> {
    HttpMosaicBackend::new(&fake.base_url, Duration::from_secs(10))
}

#[test]
fn cut_sends_multipart_fields_and_file() -> Result<()> {
    let fake = FakeBackend::spawn(vec![CannedResponse::json(
        200,
        json!({"message": "Image split into 12 cells", "output_directory": "/srv/cells"}),
    )])?;
    let image = sample_png(40, 30)?;

    let response = client(&fake)?.cut_into_grid(&CutRequest {
        rows: 3,
        cols: 4,
        output: PathBuf::from("/srv/cells"),
        image_name: "crowd.png".to_string(),
        image_bytes: image.clone(),
    })?;

    assert_eq!(response.message, "Image split into 12 cells");
    assert_eq!(response.output_directory.as_deref(), Some("/srv/cells"));
    let requests = fake.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.path, MOSAIC_PATH);
    assert!(request
        .content_type
        .as_deref()
        .is_some_and(|v| v.starts_with("multipart/form-data")));
    assert_eq!(request.field("rows"), Some("3"));
    assert_eq!(request.field("cols"), Some("4"));
    assert_eq!(request.field("output"), Some("/srv/cells"));
    let upload = request.part("image").expect("image part");
    assert_eq!(upload.file_name.as_deref(), Some("crowd.png"));
    assert_eq!(upload.content_type.as_deref(), Some("image/png"));
    assert_eq!(upload.data, image);
    Ok(())
}

#[test]
fn plain_text_reply_becomes_the_message() -> Result<()> {
    let fake = FakeBackend::spawn(vec![CannedResponse {
        status: 200,
        content_type: "text/plain",
        body: b"done\n".to_vec(),
    }])?;
    let response = client(&fake)?.cut_into_grid(&CutRequest {
        rows: 1,
        cols: 1,
        output: PathBuf::from("/tmp/out"),
        image_name: "a.jpg".to_string(),
        image_bytes: vec![0xff, 0xd8, 0xff],
    })?;
    assert_eq!(response.message, "done");
    assert_eq!(response.output_directory, None);
    Ok(())
}

#[test]
fn backdrop_is_written_to_destination() -> Result<()> {
    let backdrop = sample_png(64, 36)?;
    let fake = FakeBackend::spawn(vec![CannedResponse::png(backdrop.clone())])?;
    let dir = tempfile::tempdir()?;
    let destination = dir.path().join("exports").join("downloaded_image.png");

    let saved = client(&fake)?.download_backdrop(
        &BackdropRequest {
            rows: 4,
            cols: 8,
            width: 64,
            height: 36,
        },
        &destination,
    )?;

    assert_eq!(saved, destination);
    assert_eq!(std::fs::read(&destination)?, backdrop);
    let requests = fake.requests();
    assert_eq!(requests[0].path, BACKDROP_PATH);
    assert_eq!(
        requests[0].json,
        Some(json!({"rows": 4, "cols": 8, "width": 64, "height": 36}))
    );
    Ok(())
}

#[test]
fn non_image_backdrop_is_not_saved() -> Result<()> {
    let fake = FakeBackend::spawn(vec![
        CannedResponse::json(200, json!({"message": "queued"})),
        CannedResponse {
            status: 200,
            content_type: "image/png",
            body: b"truncated".to_vec(),
        },
    ])?;
    let backend = client(&fake)?;
    let dir = tempfile::tempdir()?;
    let destination = dir.path().join("downloaded_image.png");
    let request = BackdropRequest {
        rows: 2,
        cols: 2,
        width: 20,
        height: 20,
    };

    let err = backend
        .download_backdrop(&request, &destination)
        .expect_err("json body is not a backdrop");
    match err {
        CoreError::Backend(message) => assert!(message.contains("application/json"), "{}", message),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(!destination.exists());

    let mut panel = ControlPanel::new();
    panel.choose_image(dir.path().join("crowd.png"), sample_png(20, 20)?, &ImageCrateDecoder)?;
    panel.set_grid(2, 2);
    assert!(panel.download_backdrop(&backend, &destination).is_err());
    assert!(!destination.exists());
    let notes = panel.drain_notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::Error);
    assert_eq!(notes[0].message, BACKDROP_ERROR_MESSAGE);
    Ok(())
}

#[test]
fn backend_error_text_reaches_the_caller() -> Result<()> {
    let fake = FakeBackend::spawn(vec![CannedResponse::json(
        400,
        json!({"error": "Invalid opacity value"}),
    )])?;

    let err = client(&fake)?
        .start_overlay(&OverlayRequest {
            grid_cell_folder: PathBuf::from("/cells"),
            input_folder: PathBuf::from("/in"),
            output_folder: PathBuf::from("/out"),
            opacity: 0.6,
        })
        .expect_err("400 must fail");

    match err {
        CoreError::Backend(message) => assert!(message.contains("Invalid opacity value"), "{}", message),
        other => panic!("unexpected error: {:?}", other),
    }
    let requests = fake.requests();
    assert_eq!(requests[0].path, START_OVERLAY_PATH);
    assert_eq!(requests[0].field("gridCellFolder"), Some("/cells"));
    assert_eq!(requests[0].field("inputFolder"), Some("/in"));
    assert_eq!(requests[0].field("outputFolder"), Some("/out"));
    assert_eq!(requests[0].field("opacity"), Some("0.6"));
    Ok(())
}

#[test]
fn invalid_requests_never_leave_the_process() -> Result<()> {
    let fake = FakeBackend::spawn(Vec::new())?;
    let backend = client(&fake)?;
    let err = backend
        .start_overlay(&OverlayRequest {
            grid_cell_folder: PathBuf::from("/cells"),
            input_folder: PathBuf::new(),
            output_folder: PathBuf::from("/out"),
            opacity: 0.6,
        })
        .expect_err("missing input folder");
    assert!(matches!(err, CoreError::MissingField("inputFolder")));
    assert!(fake.requests().is_empty());
    Ok(())
}

#[test]
fn tauri_cut_command_reads_file_and_posts_it() -> Result<()> {
    let fake = FakeBackend::spawn(vec![CannedResponse::json(200, json!({"message": "ok"}))])?;
    let dir = tempfile::tempdir()?;
    let image = dir.path().join("wedding.jpg");
    std::fs::write(&image, sample_png(10, 10)?)?;

    let response = cut_image_with_backend(
        &client(&fake)?,
        CutCommandRequest {
            rows: 2,
            cols: 5,
            output: "/srv/cells".to_string(),
            image_path: image.display().to_string(),
            backend_url: None,
        },
    )
    .map_err(anyhow::Error::msg)?;

    assert_eq!(response.message, "ok");
    let requests = fake.requests();
    assert_eq!(requests[0].field("rows"), Some("2"));
    assert_eq!(requests[0].field("cols"), Some("5"));
    let upload = requests[0].part("image").expect("image part");
    assert_eq!(upload.file_name.as_deref(), Some("wedding.jpg"));
    assert_eq!(upload.content_type.as_deref(), Some("image/jpeg"));
    Ok(())
}

#[test]
fn panel_runs_every_page_against_the_backend() -> Result<()> {
    let backdrop = sample_png(60, 40)?;
    let fake = FakeBackend::spawn(vec![
        CannedResponse::png(backdrop),
        CannedResponse::json(200, json!({"message": "cut", "output_directory": "/srv/cells"})),
        CannedResponse::json(500, json!({"error": "watcher failed"})),
        CannedResponse::json(200, json!({"message": "Overlay process started"})),
    ])?;
    let backend = client(&fake)?;
    let dir = tempfile::tempdir()?;
    let mut panel = ControlPanel::new();

    panel.choose_image(dir.path().join("crowd.png"), sample_png(60, 40)?, &ImageCrateDecoder)?;
    let count = panel
        .compute_layouts(LayoutQuery {
            target_pax: 6,
            tolerance: 0,
        })?
        .len();
    assert!(count > 0);
    let layout = panel.select_layout(0)?;
    assert_eq!(u64::from(layout.rows) * u64::from(layout.columns), 6);
    panel.select_folder(FolderSlot::GridOutput, &Fixed(PathBuf::from("/srv/cells")));

    let destination = dir.path().join("downloaded_image.png");
    panel.download_backdrop(&backend, &destination)?;
    assert!(destination.exists());
    panel.cut_image_into_grid(&backend)?;
    assert!(panel.grid.image.is_none());

    panel.open_server_setup()?;
    panel.select_folder(FolderSlot::GridCellFolder, &Fixed(PathBuf::from("/srv/cells")));
    panel.select_folder(FolderSlot::InputFolder, &Fixed(PathBuf::from("/srv/in")));
    panel.select_folder(FolderSlot::OutputFolder, &Fixed(PathBuf::from("/srv/out")));
    assert!(panel.start_server(&backend).is_err());
    assert_eq!(panel.page(), PageState::ConfigureServer);
    assert_eq!(panel.server.input_folder.as_deref(), Some(std::path::Path::new("/srv/in")));
    panel.start_server(&backend)?;
    assert_eq!(panel.page(), PageState::Ready);

    let messages: Vec<(NotificationKind, String)> = panel
        .drain_notifications()
        .into_iter()
        .map(|n| (n.kind, n.message))
        .collect();
    assert_eq!(
        messages,
        vec![
            (NotificationKind::Success, BACKDROP_SUCCESS_MESSAGE.to_string()),
            (NotificationKind::Success, CUT_SUCCESS_MESSAGE.to_string()),
            (NotificationKind::Error, SERVER_ERROR_MESSAGE.to_string()),
            (NotificationKind::Success, SERVER_READY_MESSAGE.to_string()),
        ]
    );
    let paths: Vec<String> = fake.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, [BACKDROP_PATH, MOSAIC_PATH, START_OVERLAY_PATH, START_OVERLAY_PATH]);

    panel.restart()?;
    assert_eq!(panel.page(), PageState::SelectGrid);
    Ok(())
}
