use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use mosaic_core::{
    BackdropRequest, CoreError, CutRequest, CutResponse, MosaicBackend, OverlayRequest, OverlayResponse,
};
use mosaic_image::{decode_dimensions, mime_for_path};
use mosaic_settings::PanelSettings;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde::Deserialize;
use tempfile::NamedTempFile;

pub use mosaic_core::{BACKDROP_PATH, MOSAIC_PATH, START_OVERLAY_PATH};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Blocking client for the mosaic service.
#[derive(Debug, Clone)]
pub struct HttpMosaicBackend {
    base_url: String,
    client: Client,
}

impl HttpMosaicBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("mosaic-panel/0.1"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self { base_url, client })
    }

    pub fn from_settings(settings: &PanelSettings) -> Result<Self> {
        Self::new(&settings.backend_url, Duration::from_secs(settings.request_timeout_secs.max(1)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn post_cut(&self, request: &CutRequest) -> Result<CutResponse> {
        let image = Part::bytes(request.image_bytes.clone())
            .file_name(request.image_name.clone())
            .mime_str(mime_for_path(Path::new(&request.image_name)))?;
        let form = Form::new()
            .text("rows", request.rows.to_string())
            .text("cols", request.cols.to_string())
            .text("output", request.output.display().to_string())
            .part("image", image);

        let url = self.endpoint(MOSAIC_PATH);
        debug!("POST {} rows={} cols={}", url, request.rows, request.cols);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .with_context(|| format!("sending cut request to {}", url))?;
        let body = ensure_success(response, "cut request")?
            .text()
            .context("reading cut response")?;
        Ok(serde_json::from_str(&body).unwrap_or_else(|_| CutResponse {
            message: body.trim().to_string(),
            output_directory: None,
        }))
    }

    pub fn fetch_backdrop(&self, request: &BackdropRequest) -> Result<Vec<u8>> {
        let url = self.endpoint(BACKDROP_PATH);
        debug!("POST {} {:?}", url, request);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .with_context(|| format!("sending backdrop request to {}", url))?;
        let response = ensure_success(response, "backdrop request")?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let bytes = response.bytes().context("reading backdrop body")?.to_vec();
        check_backdrop_payload(&content_type, &bytes, request)?;
        Ok(bytes)
    }

    pub fn post_start_overlay(&self, request: &OverlayRequest) -> Result<OverlayResponse> {
        let form = Form::new()
            .text("gridCellFolder", request.grid_cell_folder.display().to_string())
            .text("inputFolder", request.input_folder.display().to_string())
            .text("outputFolder", request.output_folder.display().to_string())
            .text("opacity", request.opacity.to_string());

        let url = self.endpoint(START_OVERLAY_PATH);
        debug!("POST {} opacity={}", url, request.opacity);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .with_context(|| format!("sending start-overlay request to {}", url))?;
        let body = ensure_success(response, "start-overlay request")?
            .text()
            .context("reading start-overlay response")?;
        Ok(serde_json::from_str(&body).unwrap_or_else(|_| OverlayResponse {
            message: body.trim().to_string(),
        }))
    }
}

impl MosaicBackend for HttpMosaicBackend {
    fn cut_into_grid(&self, request: &CutRequest) -> Result<CutResponse, CoreError> {
        request.validate()?;
        self.post_cut(request).map_err(backend_error)
    }

    fn download_backdrop(&self, request: &BackdropRequest, destination: &Path) -> Result<PathBuf, CoreError> {
        request.validate()?;
        let bytes = self.fetch_backdrop(request).map_err(backend_error)?;
        save_backdrop(&bytes, destination).map_err(backend_error)
    }

    fn start_overlay(&self, request: &OverlayRequest) -> Result<OverlayResponse, CoreError> {
        request.validate()?;
        self.post_start_overlay(request).map_err(backend_error)
    }
}

/// Accepts only a decodable `image/*` body. A size other than the one requested is logged, not rejected.
pub fn check_backdrop_payload(content_type: &str, bytes: &[u8], request: &BackdropRequest) -> Result<()> {
    let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if !essence.starts_with("image/") {
        return Err(anyhow!(
            "backend returned '{}' instead of an image",
            if essence.is_empty() { "no content type" } else { essence.as_str() }
        ));
    }
    if bytes.is_empty() {
        return Err(anyhow!("backend returned an empty backdrop image"));
    }
    let dims = decode_dimensions(bytes).context("backdrop payload is not a readable image")?;
    if dims.width != request.width || dims.height != request.height {
        warn!(
            "backdrop is {}x{}, requested {}x{}",
            dims.width, dims.height, request.width, request.height
        );
    }
    Ok(())
}

/// Writes through a temp file in the destination directory, then renames into place.
pub fn save_backdrop(bytes: &[u8], destination: &Path) -> Result<PathBuf> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).with_context(|| format!("creating {}", parent.display()))?;
    let mut staged = NamedTempFile::new_in(&parent).context("staging backdrop file")?;
    staged.write_all(bytes).context("writing backdrop file")?;
    staged.flush()?;
    staged
        .persist(destination)
        .map_err(|err| anyhow!("saving backdrop to {}: {}", destination.display(), err.error))?;
    info!("wrote {} bytes to {}", bytes.len(), destination.display());
    Ok(destination.to_path_buf())
}

pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(anyhow!(
            "backend url must start with http:// or https:// (received: '{}')",
            raw
        ));
    }
    Ok(trimmed.to_string())
}

fn ensure_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().unwrap_or_default();
    let detail = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(anyhow!("{} failed ({}): {}", what, status, detail.trim()))
}

fn backend_error(err: anyhow::Error) -> CoreError {
    CoreError::Backend(format!("{:#}", err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_trimmed_and_checked() {
        assert_eq!(
            normalize_base_url(" http://127.0.0.1:8000/ ").expect("valid"),
            "http://127.0.0.1:8000"
        );
        assert!(normalize_base_url("127.0.0.1:8000").is_err());
    }

    #[test]
    fn endpoints_join_without_double_slash() {
        let backend = HttpMosaicBackend::new("http://localhost:8000/", Duration::from_secs(5)).expect("client");
        assert_eq!(backend.endpoint(BACKDROP_PATH), "http://localhost:8000/backdrop");
        assert_eq!(backend.base_url(), "http://localhost:8000");
    }

    #[test]
    fn invalid_requests_fail_before_any_network_call() {
        // Port 9 (discard) is never contacted because validation fails first.
        let backend = HttpMosaicBackend::new("http://127.0.0.1:9", Duration::from_secs(1)).expect("client");
        let err = backend
            .download_backdrop(
                &BackdropRequest {
                    rows: 0,
                    cols: 3,
                    width: 10,
                    height: 10,
                },
                Path::new("unused.png"),
            )
            .expect_err("zero rows");
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut out = Vec::new();
        image::DynamicImage::new_rgb8(width, height)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .expect("encode png");
        out
    }

    const REQUEST: BackdropRequest = BackdropRequest {
        rows: 2,
        cols: 3,
        width: 30,
        height: 20,
    };

    #[test]
    fn backdrop_payload_must_be_an_image() {
        let err = check_backdrop_payload("application/json", br#"{"message":"ok"}"#, &REQUEST)
            .expect_err("json is not a backdrop");
        assert!(err.to_string().contains("application/json"), "{}", err);
        assert!(check_backdrop_payload("", &png(30, 20), &REQUEST).is_err());
    }

    #[test]
    fn backdrop_payload_must_decode() {
        let err = check_backdrop_payload("image/png", b"not really a png", &REQUEST).expect_err("garbage bytes");
        assert!(format!("{:#}", err).contains("not a readable image"), "{:#}", err);
        assert!(check_backdrop_payload("image/png", &[], &REQUEST).is_err());
    }

    #[test]
    fn backdrop_payload_size_mismatch_is_tolerated() {
        check_backdrop_payload("image/png; charset=binary", &png(30, 20), &REQUEST).expect("exact size");
        check_backdrop_payload("IMAGE/PNG", &png(8, 8), &REQUEST).expect("other size still saved");
    }

    #[test]
    fn save_backdrop_creates_missing_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let destination = dir.path().join("exports").join("backdrop.png");
        let saved = save_backdrop(&[137, 80, 78, 71], &destination).expect("save");
        assert_eq!(saved, destination);
        assert_eq!(fs::read(&destination).expect("read"), vec![137, 80, 78, 71]);
    }
}
