//! Best-effort model asset provisioning.
//!
//! Each configured asset is looked up in the model directory and fetched
//! from its URL when missing. Failures are reported per asset and never
//! abort startup.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("failed to create model directory {path}: {source}")]
    CacheDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine a home directory for model storage")]
    NoHomeDir,
    #[error("asset {0:?} is missing and has no download URL")]
    NoSource(String),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A named model file and where to fetch it from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAsset {
    pub name: String,
    pub file: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    Present,
    Fetched,
}

/// Asset entries for the supported recognition models, without download URLs.
pub fn default_assets() -> Vec<ModelAsset> {
    [
        ("VGG-Face", "vgg_face.onnx"),
        ("Facenet", "facenet.onnx"),
        ("OpenFace", "openface.onnx"),
    ]
    .into_iter()
    .map(|(name, file)| ModelAsset {
        name: name.to_string(),
        file: file.to_string(),
        url: None,
    })
    .collect()
}

/// `~/.lookout/weights`.
pub fn default_model_dir() -> Result<PathBuf, ProvisionError> {
    dirs::home_dir()
        .map(|h| h.join(".lookout").join("weights"))
        .ok_or(ProvisionError::NoHomeDir)
}

/// Ensure every asset exists under `model_dir`, logging each outcome.
///
/// A missing asset with no URL is only warned about when it is `required`
/// (the configured model); the others are reported at debug.
pub fn ensure_assets(
    model_dir: &Path,
    assets: &[ModelAsset],
    required: &str,
) -> Vec<(String, Result<AssetStatus, ProvisionError>)> {
    assets
        .iter()
        .map(|asset| {
            let result = ensure_asset(model_dir, asset);
            match &result {
                Ok(AssetStatus::Present) => {
                    tracing::debug!(asset = %asset.name, "model asset present")
                }
                Ok(AssetStatus::Fetched) => {
                    tracing::info!(asset = %asset.name, "model asset downloaded")
                }
                Err(ProvisionError::NoSource(_)) if asset.name != required => {
                    tracing::debug!(asset = %asset.name, "unused model asset missing; no URL configured")
                }
                Err(err) => {
                    tracing::warn!(asset = %asset.name, error = %err, "model asset unavailable")
                }
            }
            (asset.name.clone(), result)
        })
        .collect()
}

/// Ensure a single asset exists, downloading it if necessary.
pub fn ensure_asset(model_dir: &Path, asset: &ModelAsset) -> Result<AssetStatus, ProvisionError> {
    let dest = model_dir.join(&asset.file);
    if dest.exists() {
        return Ok(AssetStatus::Present);
    }
    let url = asset
        .url
        .as_deref()
        .ok_or_else(|| ProvisionError::NoSource(asset.name.clone()))?;

    fs::create_dir_all(model_dir).map_err(|source| ProvisionError::CacheDir {
        path: model_dir.to_path_buf(),
        source,
    })?;
    tracing::info!(asset = %asset.name, url, "downloading model asset");
    download(url, &dest)?;
    Ok(AssetStatus::Fetched)
}

/// Path of the asset called `name`, falling back to `<name>.onnx`.
pub fn asset_path(model_dir: &Path, assets: &[ModelAsset], name: &str) -> PathBuf {
    assets
        .iter()
        .find(|a| a.name == name)
        .map(|a| model_dir.join(&a.file))
        .unwrap_or_else(|| model_dir.join(format!("{name}.onnx")))
}

fn download(url: &str, dest: &Path) -> Result<(), ProvisionError> {
    let temp_path = dest.with_extension("part");
    let result = download_inner(url, dest, &temp_path);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn download_inner(url: &str, dest: &Path, temp_path: &Path) -> Result<(), ProvisionError> {
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|source| ProvisionError::Download {
            url: url.to_string(),
            source,
        })?;

    let mut file = fs::File::create(temp_path).map_err(write_err(temp_path))?;

    // Stream in chunks; model files can be hundreds of megabytes.
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = response.read(&mut buf).map_err(write_err(temp_path))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).map_err(write_err(temp_path))?;
    }
    file.flush().map_err(write_err(temp_path))?;
    drop(file);

    fs::rename(temp_path, dest).map_err(write_err(dest))?;
    Ok(())
}

fn write_err(path: &Path) -> impl FnOnce(std::io::Error) -> ProvisionError {
    let path = path.to_path_buf();
    move |source| ProvisionError::Write { path, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use tempfile::TempDir;

    /// Serve one `200 OK` response carrying `body` on a loopback port.
    fn serve_once(body: Vec<u8>) -> (String, std::thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/vgg_face.onnx", listener.local_addr().unwrap());
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            let mut stream = reader.into_inner();
            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
            stream.flush().unwrap();
        });
        (url, handle)
    }

    fn asset(url: Option<&str>) -> ModelAsset {
        ModelAsset {
            name: "VGG-Face".into(),
            file: "vgg_face.onnx".into(),
            url: url.map(str::to_string),
        }
    }

    #[test]
    fn test_present_asset_is_not_fetched() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("vgg_face.onnx"), b"weights").unwrap();
        let status = ensure_asset(tmp.path(), &asset(None)).unwrap();
        assert_eq!(status, AssetStatus::Present);
    }

    #[test]
    fn test_missing_asset_without_url() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            ensure_asset(tmp.path(), &asset(None)),
            Err(ProvisionError::NoSource(name)) if name == "VGG-Face"
        ));
    }

    #[test]
    fn test_failed_download_leaves_no_partial_file() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("weights");
        // Port 9 (discard) is closed on loopback, so the connection is refused.
        let result = ensure_asset(&dir, &asset(Some("http://127.0.0.1:9/vgg_face.onnx")));
        assert!(matches!(result, Err(ProvisionError::Download { .. })));
        assert!(!dir.join("vgg_face.onnx").exists());
        assert!(!dir.join("vgg_face.part").exists());
    }

    #[test]
    fn test_ensure_assets_reports_every_asset() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("facenet.onnx"), b"weights").unwrap();
        let results = ensure_assets(tmp.path(), &default_assets(), "Facenet");
        assert_eq!(results.len(), 3);
        let facenet = results.iter().find(|(n, _)| n == "Facenet").unwrap();
        assert!(matches!(facenet.1, Ok(AssetStatus::Present)));
        let vgg = results.iter().find(|(n, _)| n == "VGG-Face").unwrap();
        assert!(matches!(vgg.1, Err(ProvisionError::NoSource(_))));
    }

    #[test]
    fn test_asset_path_lookup() {
        let dir = Path::new("/models");
        let assets = default_assets();
        assert_eq!(
            asset_path(dir, &assets, "OpenFace"),
            PathBuf::from("/models/openface.onnx")
        );
        assert_eq!(
            asset_path(dir, &assets, "ArcFace"),
            PathBuf::from("/models/ArcFace.onnx")
        );
    }

    #[test]
    fn test_download_writes_asset_and_removes_partial_file() {
        // Larger than one copy buffer so the chunked loop runs more than once.
        let body: Vec<u8> = (0..(1024 * 1024 + 4096)).map(|i| (i % 251) as u8).collect();
        let (url, server) = serve_once(body.clone());

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("weights");
        let status = ensure_asset(&dir, &asset(Some(&url))).unwrap();
        server.join().unwrap();

        assert_eq!(status, AssetStatus::Fetched);
        assert_eq!(fs::read(dir.join("vgg_face.onnx")).unwrap(), body);
        assert!(!dir.join("vgg_face.part").exists());

        // A second pass finds it on disk.
        assert_eq!(ensure_asset(&dir, &asset(Some(&url))).unwrap(), AssetStatus::Present);
    }
}
