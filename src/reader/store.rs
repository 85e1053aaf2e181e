//! Zarr-v2-style plane store.
//!
//! Layout: a directory holding `.zarray` (array metadata), `.zattrs` (axis names + acquisition
//! metadata) and one chunk file per (Y, X) plane keyed by its dot-separated chunk-grid index,
//! e.g. `0.3.1.7.0.0` for `S=0 T=3 C=1 Z=7`. Chunks are uncompressed, C-order.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use ndarray::Array2;

use crate::foundation::core::AxisTag;
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::reader::source::{AcquisitionMetadata, ChunkSource, Dims, PlaneCoord};

const ZARRAY: &str = ".zarray";
const ZATTRS: &str = ".zattrs";

#[derive(serde::Serialize, serde::Deserialize)]
struct ZarrayMeta {
    zarr_format: u32,
    shape: Vec<usize>,
    chunks: Vec<usize>,
    dtype: String,
    compressor: Option<serde_json::Value>,
    fill_value: Option<serde_json::Value>,
    order: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dimension_separator: Option<String>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Zattrs {
    axis_names: Vec<String>,
    #[serde(flatten)]
    metadata: AcquisitionMetadata,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Dtype {
    U8,
    U16 { big_endian: bool },
    F32 { big_endian: bool },
}

impl Dtype {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "|u1" | "<u1" | ">u1" => Some(Self::U8),
            "<u2" => Some(Self::U16 { big_endian: false }),
            ">u2" => Some(Self::U16 { big_endian: true }),
            "<f4" => Some(Self::F32 { big_endian: false }),
            ">f4" => Some(Self::F32 { big_endian: true }),
            _ => None,
        }
    }

    fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 { .. } => 2,
            Self::F32 { .. } => 4,
        }
    }

    fn decode(self, bytes: &[u8]) -> Vec<f32> {
        match self {
            Self::U8 => bytes.iter().map(|&b| f32::from(b)).collect(),
            Self::U16 { big_endian } => bytes
                .chunks_exact(2)
                .map(|c| {
                    let v = if big_endian {
                        u16::from_be_bytes([c[0], c[1]])
                    } else {
                        u16::from_le_bytes([c[0], c[1]])
                    };
                    f32::from(v)
                })
                .collect(),
            Self::F32 { big_endian } => bytes
                .chunks_exact(4)
                .map(|c| {
                    let b = [c[0], c[1], c[2], c[3]];
                    if big_endian {
                        f32::from_be_bytes(b)
                    } else {
                        f32::from_le_bytes(b)
                    }
                })
                .collect(),
        }
    }
}

/// Read side of a plane store directory.
#[derive(Debug)]
pub struct PlaneStore {
    root: PathBuf,
    dims: Dims,
    dtype: Dtype,
    fill: Option<f32>,
    separator: String,
    metadata: AcquisitionMetadata,
}

impl PlaneStore {
    pub fn open(root: impl AsRef<Path>) -> TimelapseResult<Self> {
        let root = root.as_ref().to_path_buf();
        let meta: ZarrayMeta = read_json(&root.join(ZARRAY))?;
        let attrs: Zattrs = read_json(&root.join(ZATTRS))?;

        if meta.zarr_format != 2 {
            return Err(TimelapseError::unreadable(format!(
                "'{}': unsupported zarr_format {}",
                root.display(),
                meta.zarr_format
            )));
        }
        if meta.order != "C" {
            return Err(TimelapseError::unreadable(format!(
                "'{}': only C-order chunks are supported",
                root.display()
            )));
        }
        if meta.compressor.as_ref().is_some_and(|c| !c.is_null()) {
            return Err(TimelapseError::unreadable(format!(
                "'{}': compressed chunks are not supported",
                root.display()
            )));
        }
        let dtype = Dtype::parse(&meta.dtype).ok_or_else(|| {
            TimelapseError::unreadable(format!(
                "'{}': unsupported dtype '{}'",
                root.display(),
                meta.dtype
            ))
        })?;

        let n = meta.shape.len();
        if attrs.axis_names.len() != n || meta.chunks.len() != n {
            return Err(TimelapseError::unreadable(format!(
                "'{}': shape, chunks and axis_names disagree in length",
                root.display()
            )));
        }
        let axes = attrs
            .axis_names
            .iter()
            .map(|name| AxisTag::parse(name))
            .collect::<TimelapseResult<Vec<_>>>()
            .map_err(|e| TimelapseError::unreadable(format!("'{}': {e}", root.display())))?;
        let dims = Dims::new(axes.iter().copied().zip(meta.shape.iter().copied()))
            .map_err(|e| TimelapseError::unreadable(format!("'{}': {e}", root.display())))?;

        let plane_chunks = meta.chunks[..n - 2].iter().all(|&c| c == 1)
            && meta.chunks[n - 2] == dims.height()
            && meta.chunks[n - 1] == dims.width();
        if !plane_chunks {
            return Err(TimelapseError::unreadable(format!(
                "'{}': chunks {:?} are not single (Y, X) planes",
                root.display(),
                meta.chunks
            )));
        }

        let fill = meta.fill_value.as_ref().and_then(|v| v.as_f64()).map(|v| v as f32);
        tracing::debug!(root = %root.display(), dims = %dims, dtype = %meta.dtype, "opened plane store");

        Ok(Self {
            root,
            dims,
            dtype,
            fill,
            separator: meta.dimension_separator.unwrap_or_else(|| ".".to_string()),
            metadata: attrs.metadata,
        })
    }

    fn chunk_path(&self, coord: &PlaneCoord) -> PathBuf {
        self.root
            .join(chunk_key(&self.dims, coord, &self.separator))
    }
}

impl ChunkSource for PlaneStore {
    fn dims(&self) -> &Dims {
        &self.dims
    }

    fn read_plane(&self, coord: &PlaneCoord) -> TimelapseResult<Array2<f32>> {
        coord.validate(&self.dims)?;
        let (h, w) = (self.dims.height(), self.dims.width());
        let path = self.chunk_path(coord);
        let (scene, time) = (coord.scene(), coord.time());

        // `fs::read` opens a fresh handle per call; concurrent reads share no cursor.
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return match self.fill {
                    Some(v) => Ok(Array2::from_elem((h, w), v)),
                    None => Err(TimelapseError::chunk_read(
                        scene,
                        time,
                        format!("missing chunk '{}' and no fill_value", path.display()),
                    )),
                };
            }
            Err(e) => {
                return Err(TimelapseError::chunk_read(
                    scene,
                    time,
                    format!("read '{}': {e}", path.display()),
                ));
            }
        };

        let expected = h * w * self.dtype.size();
        if bytes.len() != expected {
            return Err(TimelapseError::chunk_read(
                scene,
                time,
                format!(
                    "chunk '{}' has {} bytes, expected {expected}",
                    path.display(),
                    bytes.len()
                ),
            ));
        }

        Array2::from_shape_vec((h, w), self.dtype.decode(&bytes))
            .map_err(|e| TimelapseError::invalid_shape(format!("chunk {coord}: {e}")))
    }

    fn metadata(&self) -> AcquisitionMetadata {
        self.metadata.clone()
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

/// Write side of a plane store directory (16-bit little-endian planes).
#[derive(Debug)]
pub struct PlaneStoreWriter {
    root: PathBuf,
    dims: Dims,
}

impl PlaneStoreWriter {
    /// Create the store directory and its metadata files. Existing chunk files are left alone.
    pub fn create(
        root: impl AsRef<Path>,
        pairs: &[(AxisTag, usize)],
        metadata: &AcquisitionMetadata,
    ) -> TimelapseResult<Self> {
        let root = root.as_ref().to_path_buf();
        let dims = Dims::new(pairs.iter().copied())?;
        fs::create_dir_all(&root)
            .with_context(|| format!("create plane store '{}'", root.display()))?;

        let n = dims.axes().len();
        let mut chunks = vec![1usize; n];
        chunks[n - 2] = dims.height();
        chunks[n - 1] = dims.width();
        let meta = ZarrayMeta {
            zarr_format: 2,
            shape: dims.lens().to_vec(),
            chunks,
            dtype: "<u2".to_string(),
            compressor: None,
            fill_value: None,
            order: "C".to_string(),
            dimension_separator: None,
        };
        let attrs = Zattrs {
            axis_names: dims
                .axes()
                .iter()
                .map(|a| a.as_char().to_ascii_lowercase().to_string())
                .collect(),
            metadata: metadata.clone(),
        };
        write_json(&root.join(ZARRAY), &meta)?;
        write_json(&root.join(ZATTRS), &attrs)?;
        Ok(Self { root, dims })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dims(&self) -> &Dims {
        &self.dims
    }

    /// Path of the chunk file holding `coord`.
    pub fn chunk_path(&self, coord: &PlaneCoord) -> PathBuf {
        self.root.join(chunk_key(&self.dims, coord, "."))
    }

    pub fn write_plane(&self, coord: &PlaneCoord, plane: &Array2<u16>) -> TimelapseResult<()> {
        coord.validate(&self.dims)?;
        if plane.dim() != (self.dims.height(), self.dims.width()) {
            return Err(TimelapseError::invalid_shape(format!(
                "plane shape {:?} does not match store plane ({}, {})",
                plane.dim(),
                self.dims.height(),
                self.dims.width()
            )));
        }
        let bytes: Vec<u8> = plane.iter().flat_map(|v| v.to_le_bytes()).collect();
        let path = self.chunk_path(coord);
        fs::write(&path, bytes).with_context(|| format!("write chunk '{}'", path.display()))?;
        Ok(())
    }
}

fn chunk_key(dims: &Dims, coord: &PlaneCoord, sep: &str) -> String {
    let mut parts: Vec<String> = dims
        .outer_axes()
        .iter()
        .map(|a| coord.get(*a).unwrap_or(0).to_string())
        .collect();
    parts.push("0".to_string());
    parts.push("0".to_string());
    parts.join(sep)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> TimelapseResult<T> {
    let bytes = fs::read(path)
        .map_err(|e| TimelapseError::unreadable(format!("read '{}': {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TimelapseError::unreadable(format!("parse '{}': {e}", path.display())))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> TimelapseResult<()> {
    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serialize '{}'", path.display()))?;
    fs::write(path, json).with_context(|| format!("write '{}'", path.display()))?;
    Ok(())
}
