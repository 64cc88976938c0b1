//! Mosaic sources
//!
//! A [`MosaicSource`] supplies zoom-level metadata for an image id and the
//! encoded bytes of single tiles. Sources are called from fetch worker
//! threads and must not hold any session state.

use crate::error::SourceError;
use mosaic_render::{CellCoord, MosaicMetadata};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use url::Url;

/// Address of one tile
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileRequest {
    pub image_id: String,
    pub zoom_index: u32,
    pub row: u32,
    pub col: u32,

    /// Tile file extension from the mosaic metadata
    pub extension: String,
}

impl TileRequest {
    pub fn new(
        image_id: impl Into<String>,
        zoom_index: u32,
        cell: CellCoord,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            image_id: image_id.into(),
            zoom_index,
            row: cell.row,
            col: cell.col,
            extension: extension.into(),
        }
    }

    pub fn cell(&self) -> CellCoord {
        CellCoord::new(self.row, self.col)
    }
}

/// Supplier of mosaic metadata and tile bytes
pub trait MosaicSource: Send + Sync {
    fn fetch_metadata(&self, image_id: &str) -> Result<MosaicMetadata, SourceError>;

    fn fetch_tile(&self, request: &TileRequest) -> Result<Vec<u8>, SourceError>;
}

/// Mosaics stored on the local filesystem
///
/// Layout:
///
/// ```text
/// {root}/{image_id}/metadata.json
/// {root}/{image_id}/{zoom_index}/{row}x{col}.{extension}
/// ```
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata_path(&self, image_id: &str) -> PathBuf {
        self.root.join(image_id).join("metadata.json")
    }

    pub fn tile_path(&self, request: &TileRequest) -> PathBuf {
        self.root
            .join(&request.image_id)
            .join(request.zoom_index.to_string())
            .join(format!("{}x{}.{}", request.row, request.col, request.extension))
    }

    /// Write `metadata` to its place under the root, creating directories
    pub fn write_metadata(&self, metadata: &MosaicMetadata) -> Result<PathBuf, SourceError> {
        check_segment("image id", &metadata.image_id)?;
        let path = self.metadata_path(&metadata.image_id);
        write_creating_dirs(&path, metadata.to_json()?.as_bytes())?;
        Ok(path)
    }

    /// Write one encoded tile to its place under the root
    pub fn write_tile(&self, request: &TileRequest, bytes: &[u8]) -> Result<PathBuf, SourceError> {
        check_request(request)?;
        let path = self.tile_path(request);
        write_creating_dirs(&path, bytes)?;
        Ok(path)
    }
}

impl MosaicSource for DirectorySource {
    fn fetch_metadata(&self, image_id: &str) -> Result<MosaicMetadata, SourceError> {
        check_segment("image id", image_id)?;
        let bytes = read_file(&self.metadata_path(image_id))?;
        let metadata = MosaicMetadata::from_json(&bytes)?;
        if metadata.image_id.is_empty() {
            Ok(metadata.with_image_id(image_id))
        } else {
            Ok(metadata)
        }
    }

    fn fetch_tile(&self, request: &TileRequest) -> Result<Vec<u8>, SourceError> {
        check_request(request)?;
        read_file(&self.tile_path(request))
    }
}

/// Reject values that would not stay a single path segment under the root
fn check_segment(kind: &'static str, value: &str) -> Result<(), SourceError> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if invalid {
        return Err(SourceError::InvalidSegment { kind, value: value.to_string() });
    }
    Ok(())
}

fn check_request(request: &TileRequest) -> Result<(), SourceError> {
    check_segment("image id", &request.image_id)?;
    check_segment("tile extension", &request.extension)
}

fn read_file(path: &Path) -> Result<Vec<u8>, SourceError> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => SourceError::NotFound(path.display().to_string()),
        _ => SourceError::Io(e),
    })
}

fn write_creating_dirs(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)
}

/// Mosaics served over HTTP
///
/// ```text
/// GET {base}/mosaics/{image_id}/metadata
/// GET {base}/mosaics/{image_id}/zoom_level/{z}/row/{r}/column/{c}/extension/{ext}
/// ```
pub struct HttpSource {
    base_url: String,
    token: Option<String>,
    agent: ureq::Agent,
}

impl HttpSource {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    /// Send `Authorization: Bearer {token}` with every request
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, url: &str) -> Result<ureq::Response, SourceError> {
        let mut request = self.agent.get(url);
        if let Some(token) = &self.token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }

        request.call().map_err(|e| match e {
            ureq::Error::Status(404, _) => SourceError::NotFound(url.to_string()),
            ureq::Error::Status(status, _) => SourceError::Status { status, url: url.to_string() },
            ureq::Error::Transport(transport) => SourceError::Http(transport.to_string()),
        })
    }
}

impl MosaicSource for HttpSource {
    fn fetch_metadata(&self, image_id: &str) -> Result<MosaicMetadata, SourceError> {
        let body = self.get(&metadata_url(&self.base_url, image_id)?)?.into_string()?;
        let metadata = MosaicMetadata::from_json(body.as_bytes())?;
        if metadata.image_id.is_empty() {
            Ok(metadata.with_image_id(image_id))
        } else {
            Ok(metadata)
        }
    }

    fn fetch_tile(&self, request: &TileRequest) -> Result<Vec<u8>, SourceError> {
        let response = self.get(&tile_url(&self.base_url, request)?)?;
        let mut bytes = Vec::new();
        response.into_reader().read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// URL of the metadata document for `image_id`
///
/// Every path segment is percent-encoded, so an id cannot reach another
/// endpoint.
pub fn metadata_url(base_url: &str, image_id: &str) -> Result<String, SourceError> {
    check_segment("image id", image_id)?;
    endpoint(base_url, &["mosaics", image_id, "metadata"])
}

/// URL of one tile
pub fn tile_url(base_url: &str, request: &TileRequest) -> Result<String, SourceError> {
    check_request(request)?;
    let (zoom, row, col) =
        (request.zoom_index.to_string(), request.row.to_string(), request.col.to_string());
    endpoint(
        base_url,
        &[
            "mosaics",
            &request.image_id,
            "zoom_level",
            &zoom,
            "row",
            &row,
            "column",
            &col,
            "extension",
            &request.extension,
        ],
    )
}

fn endpoint(base_url: &str, segments: &[&str]) -> Result<String, SourceError> {
    let base_error = |reason: String| SourceError::BaseUrl { url: base_url.to_string(), reason };
    let mut url = Url::parse(base_url).map_err(|e| base_error(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| base_error("cannot have a path".to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.into())
}

/// In-process source for tests and demos
///
/// Tiles are keyed by `(image_id, zoom_index, cell)`. Individual cells can
/// be told to fail, and every tile fetch is counted.
#[derive(Default)]
pub struct MemorySource {
    inner: Mutex<MemoryInner>,
    latency: Duration,
}

#[derive(Default)]
struct MemoryInner {
    metadata: HashMap<String, MosaicMetadata>,
    tiles: HashMap<TileKey, Vec<u8>>,
    failing: HashSet<TileKey>,
    fetch_counts: HashMap<TileKey, usize>,
    metadata_fetches: usize,
}

type TileKey = (String, u32, CellCoord);

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long in every fetch, to simulate a slow network
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_metadata(&self, metadata: MosaicMetadata) {
        self.lock().metadata.insert(metadata.image_id.clone(), metadata);
    }

    pub fn insert_tile(&self, image_id: &str, zoom_index: u32, cell: CellCoord, bytes: Vec<u8>) {
        self.lock().tiles.insert((image_id.to_string(), zoom_index, cell), bytes);
    }

    /// Make fetches of this tile fail until [`MemorySource::heal_tile`]
    pub fn fail_tile(&self, image_id: &str, zoom_index: u32, cell: CellCoord) {
        self.lock().failing.insert((image_id.to_string(), zoom_index, cell));
    }

    pub fn heal_tile(&self, image_id: &str, zoom_index: u32, cell: CellCoord) {
        self.lock().failing.remove(&(image_id.to_string(), zoom_index, cell));
    }

    /// Number of fetches issued for one tile so far
    pub fn fetch_count(&self, image_id: &str, zoom_index: u32, cell: CellCoord) -> usize {
        let key = (image_id.to_string(), zoom_index, cell);
        self.lock().fetch_counts.get(&key).copied().unwrap_or(0)
    }

    pub fn total_tile_fetches(&self) -> usize {
        self.lock().fetch_counts.values().sum()
    }

    pub fn metadata_fetches(&self) -> usize {
        self.lock().metadata_fetches
    }

    fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
    }
}

impl MosaicSource for MemorySource {
    fn fetch_metadata(&self, image_id: &str) -> Result<MosaicMetadata, SourceError> {
        self.simulate_latency();
        let mut inner = self.lock();
        inner.metadata_fetches += 1;
        inner
            .metadata
            .get(image_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("metadata for '{}'", image_id)))
    }

    fn fetch_tile(&self, request: &TileRequest) -> Result<Vec<u8>, SourceError> {
        self.simulate_latency();
        let key = (request.image_id.clone(), request.zoom_index, request.cell());
        let mut inner = self.lock();
        *inner.fetch_counts.entry(key.clone()).or_insert(0) += 1;

        if inner.failing.contains(&key) {
            return Err(SourceError::Http(format!(
                "simulated failure for tile {} at zoom {}",
                request.cell(),
                request.zoom_index
            )));
        }
        inner.tiles.get(&key).cloned().ok_or_else(|| {
            SourceError::NotFound(format!("tile {} at zoom {}", request.cell(), request.zoom_index))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_render::ZoomLevel;
    use tempfile::TempDir;

    fn metadata() -> MosaicMetadata {
        MosaicMetadata::new(
            "photo",
            1000.0,
            600.0,
            vec![ZoomLevel::new(0, 100.0, 256.0, 256.0, 3, 4)],
        )
        .unwrap()
    }

    #[test]
    fn test_tile_request_cell() {
        let request = TileRequest::new("photo", 2, CellCoord::new(3, 4), "png");
        assert_eq!(request.row, 3);
        assert_eq!(request.col, 4);
        assert_eq!(request.cell(), CellCoord::new(3, 4));
    }

    #[test]
    fn test_urls() {
        let request = TileRequest::new("abc", 1, CellCoord::new(2, 5), "jpg");
        assert_eq!(
            metadata_url("https://api.example.com/v2/", "abc").unwrap(),
            "https://api.example.com/v2/mosaics/abc/metadata"
        );
        assert_eq!(
            tile_url("https://api.example.com/v2", &request).unwrap(),
            "https://api.example.com/v2/mosaics/abc/zoom_level/1/row/2/column/5/extension/jpg"
        );
    }

    #[test]
    fn test_urls_encode_reserved_characters() {
        assert_eq!(
            metadata_url("http://localhost:8080", "a b?c#d").unwrap(),
            "http://localhost:8080/mosaics/a%20b%3Fc%23d/metadata"
        );
        assert!(matches!(
            metadata_url("http://localhost", "x/../../admin"),
            Err(SourceError::InvalidSegment { kind: "image id", .. })
        ));
        assert!(matches!(metadata_url("not a url", "abc"), Err(SourceError::BaseUrl { .. })));

        let request = TileRequest::new("abc", 0, CellCoord::new(0, 0), "jpg?raw=1");
        assert!(tile_url("http://localhost", &request).unwrap().ends_with("/extension/jpg%3Fraw=1"));
    }

    #[test]
    fn test_directory_rejects_escaping_ids() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySource::new(dir.path().join("root"));

        for id in ["..", "../x", "a/b", "a\\b", ""] {
            assert!(
                matches!(source.fetch_metadata(id), Err(SourceError::InvalidSegment { .. })),
                "id {:?}",
                id
            );
        }

        let escaping = TileRequest::new("../outside", 0, CellCoord::new(0, 0), "jpg");
        assert!(matches!(
            source.write_tile(&escaping, b"x"),
            Err(SourceError::InvalidSegment { .. })
        ));
        assert!(!dir.path().join("outside").exists());

        let bad_extension = TileRequest::new("photo", 0, CellCoord::new(0, 0), "../../jpg");
        assert!(matches!(
            source.fetch_tile(&bad_extension),
            Err(SourceError::InvalidSegment { kind: "tile extension", .. })
        ));
    }

    #[test]
    fn test_directory_paths() {
        let source = DirectorySource::new("/data/mosaics");
        let request = TileRequest::new("photo", 1, CellCoord::new(0, 2), "jpg");
        assert_eq!(
            source.metadata_path("photo"),
            PathBuf::from("/data/mosaics/photo/metadata.json")
        );
        assert_eq!(source.tile_path(&request), PathBuf::from("/data/mosaics/photo/1/0x2.jpg"));
    }

    #[test]
    fn test_directory_round_trip() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySource::new(dir.path());
        source.write_metadata(&metadata()).unwrap();
        let request = TileRequest::new("photo", 0, CellCoord::new(1, 1), "jpg");
        source.write_tile(&request, b"tile-bytes").unwrap();

        let loaded = source.fetch_metadata("photo").unwrap();
        assert_eq!(loaded, metadata());
        assert_eq!(source.fetch_tile(&request).unwrap(), b"tile-bytes");
    }

    #[test]
    fn test_directory_missing_files() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySource::new(dir.path());

        assert!(matches!(source.fetch_metadata("nope"), Err(SourceError::NotFound(_))));
        let request = TileRequest::new("nope", 0, CellCoord::new(0, 0), "jpg");
        assert!(matches!(source.fetch_tile(&request), Err(SourceError::NotFound(_))));
    }

    #[test]
    fn test_directory_invalid_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad").join("metadata.json");
        write_creating_dirs(&path, br#"{"width": 10, "height": 10, "zoomLevels": []}"#).unwrap();

        let source = DirectorySource::new(dir.path());
        assert!(matches!(source.fetch_metadata("bad"), Err(SourceError::Metadata(_))));
    }

    #[test]
    fn test_directory_fills_missing_image_id() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("anon").join("metadata.json");
        let json = r#"{
            "width": 512,
            "height": 512,
            "zoomLevels": [
                {"index": 0, "scaleDownPercentage": 100, "tileWidth": 256, "tileHeight": 256, "rows": 2, "cols": 2}
            ]
        }"#;
        write_creating_dirs(&path, json.as_bytes()).unwrap();

        let metadata = DirectorySource::new(dir.path()).fetch_metadata("anon").unwrap();
        assert_eq!(metadata.image_id, "anon");
        assert_eq!(metadata.extension, "jpg");
    }

    #[test]
    fn test_memory_source() {
        let source = MemorySource::new();
        source.insert_metadata(metadata());
        source.insert_tile("photo", 0, CellCoord::new(0, 0), vec![1, 2, 3]);

        assert_eq!(source.fetch_metadata("photo").unwrap().image_id, "photo");
        assert_eq!(source.metadata_fetches(), 1);

        let request = TileRequest::new("photo", 0, CellCoord::new(0, 0), "jpg");
        assert_eq!(source.fetch_tile(&request).unwrap(), vec![1, 2, 3]);
        assert_eq!(source.fetch_count("photo", 0, CellCoord::new(0, 0)), 1);

        let missing = TileRequest::new("photo", 0, CellCoord::new(2, 3), "jpg");
        assert!(matches!(source.fetch_tile(&missing), Err(SourceError::NotFound(_))));
        assert_eq!(source.total_tile_fetches(), 2);
    }

    #[test]
    fn test_memory_source_failures() {
        let source = MemorySource::new();
        let cell = CellCoord::new(0, 1);
        source.insert_tile("photo", 0, cell, vec![9]);
        source.fail_tile("photo", 0, cell);

        let request = TileRequest::new("photo", 0, cell, "jpg");
        assert!(matches!(source.fetch_tile(&request), Err(SourceError::Http(_))));

        source.heal_tile("photo", 0, cell);
        assert_eq!(source.fetch_tile(&request).unwrap(), vec![9]);
        assert_eq!(source.fetch_count("photo", 0, cell), 2);
    }
}
