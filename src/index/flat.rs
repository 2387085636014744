//! Exact nearest-neighbor index persisted as a flat binary file.
//!
//! File layout, little-endian: 8-byte magic, `u32` format version, `u8`
//! metric, `u64` dimension, `u64` row count, then `count * dims` `f32`s.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use super::{IndexError, SearchHits, VectorIndex};
use crate::ingest::EmbeddingMatrix;

const MAGIC: &[u8; 8] = b"PSFLATIX";
const FORMAT_VERSION: u32 = 1;

/// Distance used for ranking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Metric {
    /// Squared Euclidean distance
    #[default]
    L2,
    /// `1 - cosine similarity`
    Cosine,
}

impl Metric {
    fn code(self) -> u8 {
        match self {
            Metric::L2 => 0,
            Metric::Cosine => 1,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Metric::L2),
            1 => Some(Metric::Cosine),
            _ => None,
        }
    }

    fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            Metric::Cosine => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let na = a.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-12);
                let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-12);
                1.0 - dot / (na * nb)
            }
        }
    }
}

/// Brute-force index over every stored vector
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    metric: Metric,
    vectors: EmbeddingMatrix,
}

impl FlatIndex {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            vectors: EmbeddingMatrix::new(),
        }
    }

    /// Build an index holding `vectors` in row order
    pub fn build(vectors: &EmbeddingMatrix, metric: Metric) -> Self {
        Self {
            metric,
            vectors: vectors.clone(),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Write the index atomically to `path`
    #[instrument(skip(self), fields(rows = self.len()))]
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = path.to_path_buf().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writer.write_all(MAGIC)?;
            writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
            writer.write_all(&[self.metric.code()])?;
            writer.write_all(&(self.dims() as u64).to_le_bytes())?;
            writer.write_all(&(self.len() as u64).to_le_bytes())?;
            for value in self.vectors.as_flat() {
                writer.write_all(&value.to_le_bytes())?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        info!("Saved index with {} vectors to {}", self.len(), path.display());
        Ok(())
    }

    /// Read an index written by [`FlatIndex::save`]
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let unavailable =
            |msg: String| IndexError::Unavailable(format!("{}: {}", path.display(), msg));
        let file = File::open(path).map_err(|e| unavailable(e.to_string()))?;
        let mut reader = BufReader::new(file);

        let mut preamble = [0u8; 8 + 4 + 1 + 8 + 8];
        reader
            .read_exact(&mut preamble)
            .map_err(|_| unavailable("truncated header".to_string()))?;
        if &preamble[..8] != MAGIC {
            return Err(unavailable("not an index file".to_string()));
        }
        let version = u32::from_le_bytes([preamble[8], preamble[9], preamble[10], preamble[11]]);
        if version != FORMAT_VERSION {
            return Err(unavailable(format!("unsupported format version {}", version)));
        }
        let metric = Metric::from_code(preamble[12])
            .ok_or_else(|| unavailable(format!("unknown metric {}", preamble[12])))?;
        let mut word = [0u8; 8];
        word.copy_from_slice(&preamble[13..21]);
        let dims = u64::from_le_bytes(word) as usize;
        word.copy_from_slice(&preamble[21..29]);
        let count = u64::from_le_bytes(word) as usize;

        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let expected = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| unavailable("size overflows".to_string()))?;
        if bytes.len() != expected {
            return Err(unavailable(format!(
                "expected {} bytes of vectors, found {}",
                expected,
                bytes.len()
            )));
        }

        let data: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let dims = if count == 0 { 0 } else { dims };
        let vectors = EmbeddingMatrix::from_flat(dims, data)
            .ok_or_else(|| unavailable("vector data does not match shape".to_string()))?;
        debug!(rows = count, dims, "Loaded index");
        Ok(Self { metric, vectors })
    }

    /// Load the index at `path` when it matches `embeddings`, otherwise
    /// rebuild it from `embeddings` and save it.
    #[instrument(skip(embeddings), fields(rows = embeddings.len()))]
    pub fn load_or_build(
        path: &Path,
        embeddings: &EmbeddingMatrix,
        metric: Metric,
    ) -> Result<Self, IndexError> {
        Self::reuse_or_build(path, Self::load(path), embeddings, metric)
    }

    /// Like [`FlatIndex::load_or_build`], but keeps the metric the stored
    /// index was built with unless `metric` names one. Falls back to the
    /// default metric when nothing usable is stored.
    #[instrument(skip(embeddings), fields(rows = embeddings.len()))]
    pub fn load_for(
        path: &Path,
        embeddings: &EmbeddingMatrix,
        metric: Option<Metric>,
    ) -> Result<Self, IndexError> {
        let loaded = Self::load(path);
        let metric = metric
            .or_else(|| loaded.as_ref().ok().map(FlatIndex::metric))
            .unwrap_or_default();
        Self::reuse_or_build(path, loaded, embeddings, metric)
    }

    fn reuse_or_build(
        path: &Path,
        loaded: Result<Self, IndexError>,
        embeddings: &EmbeddingMatrix,
        metric: Metric,
    ) -> Result<Self, IndexError> {
        match loaded {
            Ok(index)
                if index.len() == embeddings.len()
                    && index.dims() == embeddings.dims()
                    && index.metric == metric =>
            {
                info!("Loaded existing index with {} vectors", index.len());
                return Ok(index);
            }
            Ok(index) => warn!(
                "Index has {} vectors of dimension {} ({:?}), need {} of {} ({:?}); rebuilding",
                index.len(),
                index.dims(),
                index.metric,
                embeddings.len(),
                embeddings.dims(),
                metric
            ),
            Err(e) => info!("Building index: {}", e),
        }

        let index = Self::build(embeddings, metric);
        index.save(path)?;
        Ok(index)
    }
}

impl VectorIndex for FlatIndex {
    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dims(&self) -> usize {
        self.vectors.dims()
    }

    fn add(&mut self, vectors: &EmbeddingMatrix) -> Result<(), IndexError> {
        if !self.vectors.is_empty() && !vectors.is_empty() && vectors.dims() != self.dims() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims(),
                actual: vectors.dims(),
            });
        }
        for row in vectors.rows() {
            self.vectors
                .push_row(row)
                .map_err(IndexError::Unavailable)?;
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<SearchHits, IndexError> {
        if self.is_empty() || k == 0 {
            return Ok(SearchHits::default());
        }
        if query.len() != self.dims() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims(),
                actual: query.len(),
            });
        }

        let mut scored: Vec<(f32, usize)> = self
            .vectors
            .rows()
            .enumerate()
            .map(|(i, row)| (self.metric.distance(query, row), i))
            .collect();
        let by_distance =
            |a: &(f32, usize), b: &(f32, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));

        let k = k.min(scored.len());
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_by(|a, b| by_distance(a, b));

        let (distances, indices) = scored.into_iter().unzip();
        Ok(SearchHits { distances, indices })
    }

    fn vector(&self, index: usize) -> Option<&[f32]> {
        self.vectors.row(index)
    }
}

impl PartialEq for FlatIndex {
    fn eq(&self, other: &Self) -> bool {
        self.metric == other.metric && self.vectors == other.vectors
    }
}
