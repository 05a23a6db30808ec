//! Offline enrollment: many face crops per person → one reference embedding.

use crate::face::{crop_face, equalize_luma, largest_face, FaceDetector, FaceEmbedder};
use crate::store::{EmbeddingStore, StoreError};
use crate::types::{Embedding, UNKNOWN};
use image::RgbImage;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("enrollment database not found: {0}")]
    DatabaseNotFound(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Enrollment photos on disk: one sub-directory per person.
///
/// ```text
/// database/
///   Alice/  front.jpg  side.png
///   Bob/    1.JPG
/// ```
#[derive(Debug, Clone, Default)]
pub struct EnrollmentSet {
    pub people: BTreeMap<String, Vec<PathBuf>>,
}

impl EnrollmentSet {
    /// List every person directory under `root` and its image files.
    ///
    /// Loose files in `root` and non-image files are ignored. Directory
    /// names become identity names verbatim.
    pub fn scan(root: &Path) -> Result<Self, EnrollmentError> {
        if !root.is_dir() {
            return Err(EnrollmentError::DatabaseNotFound(root.to_path_buf()));
        }

        let mut people = BTreeMap::new();
        for person_dir in read_dir_sorted(root)? {
            if !person_dir.is_dir() {
                continue;
            }
            let Some(name) = person_dir.file_name().and_then(|n| n.to_str()) else {
                tracing::warn!(path = %person_dir.display(), "skipping non-UTF-8 person directory");
                continue;
            };

            let images: Vec<PathBuf> = read_dir_sorted(&person_dir)?
                .into_iter()
                .filter(|p| p.is_file() && has_image_extension(p))
                .collect();
            people.insert(name.to_owned(), images);
        }

        Ok(Self { people })
    }

    pub fn image_count(&self) -> usize {
        self.people.values().map(Vec::len).sum()
    }

    /// Decode each photo and cut out its enrollment face.
    ///
    /// Unreadable photos and photos without a face are logged and dropped.
    pub fn load_faces<D: FaceDetector>(&self, detector: &mut D) -> BTreeMap<String, Vec<RgbImage>> {
        self.people
            .iter()
            .map(|(name, paths)| {
                tracing::info!(person = %name, images = paths.len(), "processing");
                let faces = paths
                    .iter()
                    .filter_map(|path| {
                        let image = match image::open(path) {
                            Ok(img) => img.to_rgb8(),
                            Err(e) => {
                                tracing::warn!(path = %path.display(), error = %e, "could not read image");
                                return None;
                            }
                        };
                        let face = extract_enrollment_face(detector, &image);
                        if face.is_none() {
                            tracing::warn!(path = %path.display(), "no usable face");
                        }
                        face
                    })
                    .collect();
                (name.clone(), faces)
            })
            .collect()
    }
}

fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, EnrollmentError> {
    let io_err = |source| EnrollmentError::Io { path: dir.to_path_buf(), source };
    let mut entries = fs::read_dir(dir)
        .map_err(io_err)?
        .map(|e| e.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    entries.sort();
    Ok(entries)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|ok| e.eq_ignore_ascii_case(ok)))
        .unwrap_or(false)
}

/// Pick the largest detected face, crop it, and equalize its lighting.
///
/// Detector errors are logged and treated as "no face".
pub fn extract_enrollment_face<D: FaceDetector>(detector: &mut D, image: &RgbImage) -> Option<RgbImage> {
    let faces = match detector.detect(image) {
        Ok(faces) => faces,
        Err(e) => {
            tracing::warn!(error = %e, "face detection failed");
            return None;
        }
    };
    let mut crop = crop_face(image, largest_face(&faces)?)?;
    equalize_luma(&mut crop);
    Some(crop)
}

/// Element-wise arithmetic mean. `None` for an empty slice.
///
/// All inputs must share one dimensionality. Sums are accumulated in f64.
pub fn mean_embedding(embeddings: &[Embedding]) -> Option<Embedding> {
    let first = embeddings.first()?;
    let mut sums = vec![0.0f64; first.dimensions()];
    for embedding in embeddings {
        for (sum, v) in sums.iter_mut().zip(&embedding.values) {
            *sum += *v as f64;
        }
    }
    let n = embeddings.len() as f64;
    Some(Embedding::new(sums.into_iter().map(|s| (s / n) as f32).collect()))
}

/// Aggregates per-person face crops into an [`EmbeddingStore`].
pub struct EnrollmentBuilder<E> {
    model: String,
    embedder: E,
}

impl<E: FaceEmbedder> EnrollmentBuilder<E> {
    /// `model` is the MODEL identifier recorded in the resulting store.
    pub fn new(model: impl Into<String>, embedder: E) -> Self {
        Self {
            model: model.into(),
            embedder,
        }
    }

    /// Embed every crop and average per identity.
    ///
    /// Crops that fail to embed are skipped. An identity with no successful
    /// embedding is left out of the store entirely.
    pub fn build<I>(&mut self, people: I) -> Result<EmbeddingStore, StoreError>
    where
        I: IntoIterator<Item = (String, Vec<RgbImage>)>,
    {
        let mut references = Vec::new();

        for (name, crops) in people {
            if name == UNKNOWN {
                tracing::warn!(person = %name, "name is reserved for unmatched faces; skipping");
                continue;
            }

            let embeddings = self.embed_all(&name, &crops);
            match mean_embedding(&embeddings) {
                Some(reference) => {
                    tracing::info!(person = %name, embeddings = embeddings.len(), "enrolled");
                    references.push((name, reference));
                }
                None => tracing::warn!(person = %name, "no valid embeddings; identity omitted"),
            }
        }

        EmbeddingStore::from_identities(self.model.clone(), references)
    }

    fn embed_all(&mut self, name: &str, crops: &[RgbImage]) -> Vec<Embedding> {
        let mut embeddings: Vec<Embedding> = Vec::with_capacity(crops.len());
        for (i, crop) in crops.iter().enumerate() {
            match self.embedder.embed(crop) {
                Ok(e) if e.dimensions() == 0 => {
                    tracing::warn!(person = name, crop = i, "embedder returned an empty vector");
                }
                Ok(e) => {
                    if let Some(first) = embeddings.first() {
                        if first.dimensions() != e.dimensions() {
                            tracing::warn!(
                                person = name,
                                crop = i,
                                expected = first.dimensions(),
                                actual = e.dimensions(),
                                "embedding dimensionality changed; skipping crop"
                            );
                            continue;
                        }
                    }
                    tracing::debug!(person = name, crop = i, "embedded");
                    embeddings.push(e);
                }
                Err(err) => tracing::warn!(person = name, crop = i, error = %err, "embedding failed"),
            }
        }
        embeddings
    }
}
