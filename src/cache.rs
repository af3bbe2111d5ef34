//! Content-addressed, gzip-compressed JSON artifact cache.
//!
//! Keys hash everything that determines a stage's output, so a changed
//! dataset, model, algorithm or seed lands on a different file instead of
//! reusing a stale one.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::dataset::Dataset;
use crate::reducer::ReductionParams;

const KEY_PREFIX_LEN: usize = 16;

/// Failures while reading or writing artifacts.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure.
    #[error("cache io error at {path:?}: {source}")]
    Io {
        /// Artifact path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The artifact could not be encoded or decoded.
    #[error("cache artifact {path:?} is not valid JSON: {source}")]
    Json {
        /// Artifact path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Hex SHA-256 digest identifying one stage's inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key over the dataset content and the embedding model.
    pub fn for_embeddings(dataset: &Dataset, model: &str) -> Self {
        let mut hasher = KeyHasher::new("embeddings");
        hasher.field(model);
        hasher.count(dataset.len());
        for record in dataset.records() {
            hasher.field(&record.label);
            hasher.field(&record.sentence);
        }
        hasher.finish()
    }

    /// Key over the embedding key and every reduction parameter.
    pub fn for_reduction(embedding_key: &CacheKey, params: &ReductionParams) -> Self {
        let mut hasher = KeyHasher::new("reduction");
        hasher.field(embedding_key.as_str());
        hasher.field(params.algorithm.name());
        hasher.count(params.n_components);
        hasher.field(&params.seed.to_string());
        hasher.field(if params.scaling { "scaled" } else { "raw" });
        hasher.finish()
    }

    /// Full hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digest prefix used in file names.
    pub fn short(&self) -> &str {
        &self.0[..KEY_PREFIX_LEN]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct KeyHasher(Sha256);

impl KeyHasher {
    fn new(domain: &str) -> Self {
        let mut hasher = Self(Sha256::new());
        hasher.field(domain);
        hasher
    }

    // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
    fn field(&mut self, value: &str) {
        self.count(value.len());
        self.0.update(value.as_bytes());
    }

    fn count(&mut self, value: usize) {
        self.0.update((value as u64).to_le_bytes());
    }

    fn finish(self) -> CacheKey {
        CacheKey(format!("{:x}", self.0.finalize()))
    }
}

/// Artifact directory for one output location.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Stores artifacts under `dir`, created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of the stage one artifact for `key`.
    pub fn embeddings_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("embeddings-{}.json.gz", key.short()))
    }

    /// Location of the stage two artifact for `key`.
    pub fn reduced_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("reduced-{}.json.gz", key.short()))
    }

    /// Loads the artifact at `path`, or `None` when the file does not exist.
    pub fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, CacheError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error(path, source)),
        };
        let reader = BufReader::new(GzDecoder::new(file));
        serde_json::from_reader(reader)
            .map(Some)
            .map_err(|source| CacheError::Json {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Writes `artifact` to `path` through a temporary sibling file.
    pub fn store<T: Serialize>(&self, path: &Path, artifact: &T) -> Result<(), CacheError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| io_error(parent, source))?;
        }
        let tmp = path.with_extension("tmp");
        let file = File::create(&tmp).map_err(|source| io_error(&tmp, source))?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer_pretty(&mut encoder, artifact).map_err(|source| {
            CacheError::Json {
                path: tmp.clone(),
                source,
            }
        })?;
        let mut writer = encoder.finish().map_err(|source| io_error(&tmp, source))?;
        writer.flush().map_err(|source| io_error(&tmp, source))?;
        drop(writer);
        fs::rename(&tmp, path).map_err(|source| io_error(path, source))
    }
}

fn io_error(path: &Path, source: io::Error) -> CacheError {
    CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Record;
    use crate::embeddings::EmbeddingArtifact;
    use crate::reducer::Algorithm;
    use pretty_assertions::assert_eq;

    fn dataset(sentence: &str) -> Dataset {
        Dataset::new(vec![Record::new("Web(Patrick)", sentence)])
    }

    #[test]
    fn embedding_key_tracks_content_and_model() {
        let base = CacheKey::for_embeddings(&dataset("open menu"), "m");
        assert_eq!(base, CacheKey::for_embeddings(&dataset("open menu"), "m"));
        assert_ne!(base, CacheKey::for_embeddings(&dataset("open  menu"), "m"));
        assert_ne!(base, CacheKey::for_embeddings(&dataset("open menu"), "other"));
        assert_eq!(base.as_str().len(), 64);
        assert_eq!(base.short().len(), KEY_PREFIX_LEN);
    }

    #[test]
    fn reduction_key_tracks_parameters() {
        let embedding = CacheKey::for_embeddings(&dataset("a"), "m");
        let params = ReductionParams::default();
        let base = CacheKey::for_reduction(&embedding, &params);

        let other_algorithm = ReductionParams {
            algorithm: Algorithm::Pca,
            ..params.clone()
        };
        let other_seed = ReductionParams {
            seed: 7,
            ..params.clone()
        };
        let unscaled = ReductionParams {
            scaling: false,
            ..params.clone()
        };
        assert_ne!(base, CacheKey::for_reduction(&embedding, &other_algorithm));
        assert_ne!(base, CacheKey::for_reduction(&embedding, &other_seed));
        assert_ne!(base, CacheKey::for_reduction(&embedding, &unscaled));
    }

    #[test]
    fn missing_artifact_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let loaded: Option<EmbeddingArtifact> = store
            .load(&dir.path().join("absent.json.gz"))
            .expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn stored_artifact_reloads_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path().join("run/out"));
        let data = dataset("open menu");
        let key = CacheKey::for_embeddings(&data, "m");
        let artifact = EmbeddingArtifact::new(key.as_str(), "m", &data, vec![vec![0.125, -3.5]]);
        let path = store.embeddings_path(&key);

        store.store(&path, &artifact).expect("store");
        let loaded: EmbeddingArtifact = store.load(&path).expect("load").expect("present");
        assert_eq!(loaded, artifact);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn corrupt_artifact_is_a_json_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let path = dir.path().join("bad.json.gz");
        let mut encoder = GzEncoder::new(File::create(&path).expect("create"), Compression::fast());
        encoder.write_all(b"{not json").expect("write");
        encoder.finish().expect("finish");

        let err = store
            .load::<EmbeddingArtifact>(&path)
            .expect_err("corrupt");
        assert!(matches!(err, CacheError::Json { .. }));
    }
}
