//! # Embedding Checkpoints
//!
//! Partial ingestion progress persisted as a NumPy `.npy` (format 1.0)
//! array of little-endian `f32` in C order with shape `(rows, dims)`, so the
//! file is also readable by NumPy directly.
//!
//! Writes go to a sibling temporary file that is synced and then renamed over
//! the target, so a reader never observes a torn checkpoint.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use super::{EmbeddingMatrix, IngestError};

const MAGIC: &[u8] = b"\x93NUMPY";

/// Header plus preamble is padded to a multiple of this
const ALIGNMENT: usize = 64;

/// A checkpoint file location
#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the checkpoint; `Ok(None)` when no file exists
    pub fn load(&self) -> Result<Option<EmbeddingMatrix>, IngestError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let file = File::open(&self.path)?;
        read_npy(BufReader::new(file)).map(Some)
    }

    /// Atomically replace the checkpoint with `matrix`
    #[instrument(skip(self, matrix), fields(path = %self.path.display(), rows = matrix.len()))]
    pub fn save(&self, matrix: &EmbeddingMatrix) -> Result<(), IngestError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            write_npy(&mut writer, matrix)?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| IngestError::Io(e.into_error()))?
                .sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        info!("Saved checkpoint with {} vectors", matrix.len());
        Ok(())
    }

    pub fn remove(&self) -> Result<(), IngestError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Serialize a matrix as `.npy` version 1.0
pub fn write_npy<W: Write>(writer: &mut W, matrix: &EmbeddingMatrix) -> Result<(), IngestError> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        matrix.len(),
        matrix.dims()
    );
    let preamble = MAGIC.len() + 2 + 2;
    let padding = ALIGNMENT - (preamble + header.len() + 1) % ALIGNMENT;
    header.push_str(&" ".repeat(padding % ALIGNMENT));
    header.push('\n');
    let header_len = u16::try_from(header.len())
        .map_err(|_| IngestError::Checkpoint("npy header too long".to_string()))?;

    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    for value in matrix.as_flat() {
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

/// Parse a two-dimensional `.npy` array of `<f4` or `<f8`
pub fn read_npy<R: Read>(mut reader: R) -> Result<EmbeddingMatrix, IngestError> {
    let corrupt = |msg: &str| IngestError::Checkpoint(format!("invalid npy file: {}", msg));

    let mut magic = [0u8; 6];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let mut version = [0u8; 2];
    reader.read_exact(&mut version)?;
    let header_len = match version[0] {
        1 => {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len)?;
            u16::from_le_bytes(len) as usize
        }
        2 | 3 => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            u32::from_le_bytes(len) as usize
        }
        v => return Err(corrupt(&format!("unsupported version {}", v))),
    };
    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8(header).map_err(|_| corrupt("header is not UTF-8"))?;

    let descr = header_value(&header, "descr")
        .map(|v| v.trim_matches(|c| c == '\'' || c == '"').to_string())
        .ok_or_else(|| corrupt("missing descr"))?;
    if header_value(&header, "fortran_order").is_some_and(|v| v.starts_with("True")) {
        return Err(corrupt("fortran order is not supported"));
    }
    let shape = parse_shape(&header).ok_or_else(|| corrupt("bad shape"))?;
    let (rows, dims) = match shape.as_slice() {
        [rows, dims] => (*rows, *dims),
        [0] => (0, 0),
        _ => return Err(corrupt("expected a two-dimensional array")),
    };
    debug!(rows, dims, %descr, "Reading npy checkpoint");

    let count = rows
        .checked_mul(dims)
        .ok_or_else(|| corrupt("shape overflows"))?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let data: Vec<f32> = match descr.as_str() {
        "<f4" => {
            if bytes.len() != count * 4 {
                return Err(corrupt("data length does not match shape"));
            }
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        }
        "<f8" => {
            if bytes.len() != count * 8 {
                return Err(corrupt("data length does not match shape"));
            }
            bytes
                .chunks_exact(8)
                .map(|b| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(b);
                    f64::from_le_bytes(raw) as f32
                })
                .collect()
        }
        other => return Err(corrupt(&format!("unsupported dtype {}", other))),
    };

    let dims = if rows == 0 { 0 } else { dims };
    EmbeddingMatrix::from_flat(dims, data).ok_or_else(|| corrupt("data length does not match shape"))
}

/// Literal value of `'key'` in a header dictionary: a quoted string with
/// its quotes, a parenthesized tuple, or a bare token
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let quoted = format!("'{}'", key);
    let start = header.find(&quoted)? + quoted.len();
    let rest = header[start..].trim_start().strip_prefix(':')?.trim_start();
    let end = match rest.chars().next()? {
        quote @ ('\'' | '"') => rest[1..].find(quote)? + 2,
        '(' => rest.find(')')? + 1,
        _ => rest.find([',', '}']).unwrap_or(rest.len()),
    };
    Some(rest[..end].trim_end())
}

fn parse_shape(header: &str) -> Option<Vec<usize>> {
    let value = header_value(header, "shape")?.strip_prefix('(')?;
    let inner = &value[..value.find(')')?];
    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.trim_end_matches('L').parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(&[vec![0.5, -1.0, 2.0], vec![3.25, 0.0, -0.125]]).unwrap()
    }

    #[test]
    fn test_header_layout() {
        let mut bytes = Vec::new();
        write_npy(&mut bytes, &sample()).unwrap();

        assert_eq!(&bytes[..6], MAGIC);
        assert_eq!(&bytes[6..8], &[1, 0]);
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % ALIGNMENT, 0);
        let header = std::str::from_utf8(&bytes[10..10 + header_len]).unwrap();
        assert!(header.contains("'descr': '<f4'"));
        assert!(header.contains("'shape': (2, 3)"));
        assert!(header.ends_with('\n'));
        assert_eq!(bytes.len(), 10 + header_len + 6 * 4);
    }

    #[test]
    fn test_header_values_end_at_their_delimiter() {
        let header = "{'descr': '<f4', 'fortran_order': False, 'shape': (2, 3), }   \n";

        assert_eq!(header_value(header, "descr"), Some("'<f4'"));
        assert_eq!(header_value(header, "fortran_order"), Some("False"));
        assert_eq!(header_value(header, "shape"), Some("(2, 3)"));
        assert_eq!(header_value(header, "missing"), None);
        assert_eq!(parse_shape(header), Some(vec![2, 3]));
        assert_eq!(parse_shape("{'shape': (0,), }"), Some(vec![0]));
    }

    #[test]
    fn test_written_checkpoint_reads_back() {
        let mut bytes = Vec::new();
        write_npy(&mut bytes, &sample()).unwrap();

        assert_eq!(read_npy(bytes.as_slice()).unwrap(), sample());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("nested").join("vectors.npy"));
        assert!(checkpoint.load().unwrap().is_none());

        checkpoint.save(&sample()).unwrap();
        let loaded = checkpoint.load().unwrap().unwrap();

        assert_eq!(loaded, sample());
        assert!(!dir.path().join("nested").join("vectors.npy.tmp").exists());
    }

    #[test]
    fn test_empty_matrix() {
        let dir = tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path().join("empty.npy"));
        checkpoint.save(&EmbeddingMatrix::new()).unwrap();

        let loaded = checkpoint.load().unwrap().unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_reads_float64_arrays() {
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (1, 2), }\n";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&1.5f64.to_le_bytes());
        bytes.extend_from_slice(&(-2.0f64).to_le_bytes());

        let matrix = read_npy(bytes.as_slice()).unwrap();
        assert_eq!(matrix.row(0), Some(&[1.5, -2.0][..]));
    }

    #[test]
    fn test_rejects_truncated_data() {
        let mut bytes = Vec::new();
        write_npy(&mut bytes, &sample()).unwrap();
        bytes.truncate(bytes.len() - 4);

        assert!(matches!(
            read_npy(bytes.as_slice()),
            Err(IngestError::Checkpoint(_))
        ));
        assert!(read_npy(&b"not an npy file"[..]).is_err());
    }
}
