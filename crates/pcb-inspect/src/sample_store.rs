//! Directory-backed QA sample repository.
//!
//! Layout: `<root>/<sample_id>/{front.jpg, back.jpg, metadata.json}`.
//! Image paths in new metadata are file names inside the sample directory.

use crate::ports::{QaSample, SampleStore, SampleSummary};
use async_trait::async_trait;
use chrono::Local;
use log::{info, warn};
use pcb_inspect_core::Frame;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

const METADATA_FILE: &str = "metadata.json";
const FRONT_FILE: &str = "front.jpg";
const BACK_FILE: &str = "back.jpg";
const METADATA_VERSION: &str = "1.0";

#[derive(thiserror::Error, Debug)]
pub enum SampleStoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error("`{0}` is not a valid sample id")]
    InvalidId(String),
    #[error("sample `{0}` already exists")]
    AlreadyExists(String),
    #[error("sample store task failed: {0}")]
    Task(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePaths {
    pub front: String,
    pub back: String,
}

/// Contents of `metadata.json`. Field names are part of the on-disk format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub sample_id: String,
    pub board_name: String,
    /// Local ISO-8601 timestamp.
    pub created_date: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub image_paths: ImagePaths,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

fn default_version() -> String {
    METADATA_VERSION.to_string()
}

/// Partial metadata edit; `None` leaves a field alone.
#[derive(Clone, Debug, Default)]
pub struct SampleUpdate {
    pub board_name: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct DirSampleStore {
    root: PathBuf,
}

impl DirSampleStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SampleStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy the two reference images into a new sample directory and write
    /// its metadata. Returns the new sample id,
    /// `sample_<YYYYmmdd_HHMMSS>_<board name with underscores>`.
    pub fn create_sample(
        &self,
        board_name: &str,
        front_image: &Path,
        back_image: &Path,
        notes: &str,
        tags: &[String],
    ) -> Result<String, SampleStoreError> {
        let now = Local::now();
        let sample_id = format!(
            "sample_{}_{}",
            now.format("%Y%m%d_%H%M%S"),
            board_name.replace(' ', "_")
        );
        let dir = self.sample_dir(&sample_id)?;
        if dir.exists() {
            return Err(SampleStoreError::AlreadyExists(sample_id));
        }
        fs::create_dir_all(&dir)?;

        fs::copy(front_image, dir.join(FRONT_FILE))?;
        fs::copy(back_image, dir.join(BACK_FILE))?;

        let metadata = SampleMetadata {
            sample_id: sample_id.clone(),
            board_name: board_name.to_string(),
            created_date: iso_now(),
            notes: notes.to_string(),
            tags: tags.to_vec(),
            image_paths: ImagePaths {
                front: FRONT_FILE.to_string(),
                back: BACK_FILE.to_string(),
            },
            version: default_version(),
            last_modified: None,
        };
        self.write_metadata(&metadata)?;
        info!("created QA sample {sample_id}");
        Ok(sample_id)
    }

    /// Metadata of a sample whose metadata file and both images exist.
    pub fn metadata(&self, sample_id: &str) -> Result<Option<SampleMetadata>, SampleStoreError> {
        let path = self.sample_dir(sample_id)?.join(METADATA_FILE);
        if !path.is_file() {
            warn!("QA sample not found: {sample_id}");
            return Ok(None);
        }
        let metadata: SampleMetadata = serde_json::from_str(&fs::read_to_string(path)?)?;
        let (front, back) = self.image_paths(&metadata);
        if !front.is_file() || !back.is_file() {
            warn!("image files missing for sample {sample_id}");
            return Ok(None);
        }
        Ok(Some(metadata))
    }

    /// Apply `update` and stamp `last_modified`. Returns `false` for unknown
    /// samples.
    pub fn update_sample(
        &self,
        sample_id: &str,
        update: SampleUpdate,
    ) -> Result<bool, SampleStoreError> {
        let Some(mut metadata) = self.metadata(sample_id)? else {
            return Ok(false);
        };
        if let Some(board_name) = update.board_name {
            metadata.board_name = board_name;
        }
        if let Some(notes) = update.notes {
            metadata.notes = notes;
        }
        if let Some(tags) = update.tags {
            metadata.tags = tags;
        }
        metadata.last_modified = Some(iso_now());
        self.write_metadata(&metadata)?;
        info!("updated QA sample {sample_id}");
        Ok(true)
    }

    /// Remove a sample directory. Returns `false` if it did not exist.
    pub fn delete_sample(&self, sample_id: &str) -> Result<bool, SampleStoreError> {
        let dir = self.sample_dir(sample_id)?;
        if !dir.is_dir() {
            warn!("QA sample not found for deletion: {sample_id}");
            return Ok(false);
        }
        fs::remove_dir_all(dir)?;
        info!("deleted QA sample {sample_id}");
        Ok(true)
    }

    /// True when the metadata parses and both images decode.
    pub fn validate_sample(&self, sample_id: &str) -> bool {
        match self.load(sample_id) {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!("QA sample {sample_id} failed validation: {e}");
                false
            }
        }
    }

    /// All readable samples, newest `created_date` first.
    pub fn list(&self) -> Result<Vec<SampleMetadata>, SampleStoreError> {
        let mut samples = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path().join(METADATA_FILE);
            if !path.is_file() {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(SampleStoreError::from)
                .and_then(|raw| Ok(serde_json::from_str::<SampleMetadata>(&raw)?))
            {
                Ok(metadata) => samples.push(metadata),
                Err(e) => warn!("skipping unreadable metadata {}: {e}", path.display()),
            }
        }
        samples.sort_by(|a, b| b.created_date.cmp(&a.created_date));
        Ok(samples)
    }

    /// Metadata plus decoded reference images.
    pub fn load(&self, sample_id: &str) -> Result<Option<QaSample>, SampleStoreError> {
        let Some(metadata) = self.metadata(sample_id)? else {
            return Ok(None);
        };
        let (front, back) = self.image_paths(&metadata);
        let front = Frame::new(read_rgb(&front)?);
        let back = Frame::new(read_rgb(&back)?);
        Ok(Some(QaSample {
            metadata,
            front,
            back,
        }))
    }

    /// Directory of `sample_id`; ids that are not a single plain path
    /// component are rejected so nothing resolves outside the root.
    fn sample_dir(&self, sample_id: &str) -> Result<PathBuf, SampleStoreError> {
        let mut parts = Path::new(sample_id).components();
        match (parts.next(), parts.next()) {
            (Some(Component::Normal(_)), None) if !sample_id.contains(['/', '\\']) => {
                Ok(self.root.join(sample_id))
            }
            _ => Err(SampleStoreError::InvalidId(sample_id.to_string())),
        }
    }

    /// Stored image paths. A relative entry names a file in the sample
    /// directory when one exists there, otherwise it is taken as written
    /// (older stores recorded paths relative to the working directory).
    fn image_paths(&self, metadata: &SampleMetadata) -> (PathBuf, PathBuf) {
        let dir = self.root.join(&metadata.sample_id);
        let resolve = |p: &str| {
            let p = Path::new(p);
            let inside = dir.join(p);
            if p.is_relative() && inside.is_file() {
                inside
            } else {
                p.to_path_buf()
            }
        };
        (
            resolve(&metadata.image_paths.front),
            resolve(&metadata.image_paths.back),
        )
    }

    fn write_metadata(&self, metadata: &SampleMetadata) -> Result<(), SampleStoreError> {
        let path = self.sample_dir(&metadata.sample_id)?.join(METADATA_FILE);
        fs::write(path, serde_json::to_string_pretty(metadata)?)?;
        Ok(())
    }
}

/// Decode by content, not extension: stored files are always named `.jpg`.
fn read_rgb(path: &Path) -> Result<image::RgbImage, SampleStoreError> {
    Ok(image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?
        .to_rgb8())
}

fn iso_now() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

#[async_trait]
impl SampleStore for DirSampleStore {
    async fn get_sample(&self, id: &str) -> Result<Option<QaSample>, SampleStoreError> {
        let store = self.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || store.load(&id))
            .await
            .map_err(|e| SampleStoreError::Task(e.to_string()))?
    }

    async fn list_samples(&self) -> Result<Vec<SampleSummary>, SampleStoreError> {
        let store = self.clone();
        let samples = tokio::task::spawn_blocking(move || store.list())
            .await
            .map_err(|e| SampleStoreError::Task(e.to_string()))??;
        Ok(samples
            .into_iter()
            .map(|m| SampleSummary {
                id: m.sample_id,
                name: m.board_name,
            })
            .collect())
    }
}
