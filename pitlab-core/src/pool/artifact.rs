//! Pool artifacts on disk.
//!
//! Document shape: `{"success": true, "candidate_pool": [...], "metadata": {...}}`.
//! Writes are atomic (temp file, then rename) and refuse to replace an existing
//! artifact unless [`WriteMode::Overwrite`] is passed. ASCII encoding escapes
//! every non-ASCII character as `\uXXXX` for consumers that cannot read UTF-8.
//!
//! Older files have no `metadata` object, only a top-level `generated_at`
//! beside `rejected_stocks` and `thresholds_used`. They load with default
//! criteria and an as-of equal to the generation date.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, PrettyFormatter};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{
    CandidatePool, CandidateRecord, PoolBuilder, PoolCriteria, PoolError, PoolMetadata, PoolSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonEncoding {
    #[default]
    Utf8,
    Ascii,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail if the artifact already exists.
    CreateNew,
    Overwrite,
}

/// On-disk representation of a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolDocument {
    pub success: bool,
    pub candidate_pool: Vec<CandidateRecord>,
    pub metadata: PoolMetadata,
}

impl From<&CandidatePool> for PoolDocument {
    fn from(pool: &CandidatePool) -> Self {
        Self {
            success: true,
            candidate_pool: pool.records().to_vec(),
            metadata: pool.metadata().clone(),
        }
    }
}

/// Pool file without a `metadata` object.
#[derive(Debug, Deserialize)]
struct LegacyPoolDocument {
    success: bool,
    #[serde(default)]
    candidate_pool: Vec<CandidateRecord>,
    generated_at: NaiveDateTime,
    /// Free-text reasons; counted, not carried over.
    #[serde(default)]
    rejected_stocks: Vec<serde_json::Value>,
}

impl LegacyPoolDocument {
    fn into_document(self, path: &Path) -> PoolDocument {
        debug!(
            path = %path.display(),
            rejected = self.rejected_stocks.len(),
            "loading pool file without metadata"
        );
        let count = self.candidate_pool.len();
        PoolDocument {
            success: self.success,
            candidate_pool: self.candidate_pool,
            metadata: PoolMetadata {
                source: PoolSource::Imported { file: path.display().to_string() },
                as_of: self.generated_at.date(),
                criteria: PoolCriteria::default(),
                generated_at: self.generated_at,
                count,
                kept: None,
                rejected: Vec::new(),
            },
        }
    }
}

/// Pretty printer that escapes non-ASCII characters.
struct AsciiFormatter<'a> {
    inner: PrettyFormatter<'a>,
}

impl<'a> Formatter for AsciiFormatter<'a> {
    fn begin_array<W: ?Sized + io::Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.inner.begin_array(w)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.inner.end_array(w)
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        w: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_array_value(w, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.inner.end_array_value(w)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.inner.begin_object(w)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.inner.end_object(w)
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        w: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_object_key(w, first)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.inner.begin_object_value(w)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, w: &mut W) -> io::Result<()> {
        self.inner.end_object_value(w)
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        w: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if c.is_ascii() {
                w.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut units) {
                    write!(w, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Serialize a pool document in the requested encoding.
pub fn pool_to_json(pool: &CandidatePool, encoding: JsonEncoding) -> Result<String, PoolError> {
    let doc = PoolDocument::from(pool);
    match encoding {
        JsonEncoding::Utf8 => Ok(serde_json::to_string_pretty(&doc)?),
        JsonEncoding::Ascii => {
            let mut buf = Vec::new();
            let formatter = AsciiFormatter { inner: PrettyFormatter::new() };
            let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
            doc.serialize(&mut ser)?;
            // only ASCII bytes were written
            Ok(buf.into_iter().map(char::from).collect())
        }
    }
}

/// Write a pool to `path` atomically.
pub fn write_pool(
    path: &Path,
    pool: &CandidatePool,
    mode: WriteMode,
    encoding: JsonEncoding,
) -> Result<(), PoolError> {
    if mode == WriteMode::CreateNew && path.exists() {
        return Err(PoolError::AlreadyExists { path: path.to_path_buf() });
    }
    let io_err = |source| PoolError::Io { path: path.to_path_buf(), source };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = pool_to_json(pool, encoding)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(e));
    }
    info!(path = %path.display(), members = pool.len(), "wrote candidate pool");
    Ok(())
}

/// Load a pool artifact. A leading UTF-8 byte-order mark is tolerated.
pub fn load_pool(path: &Path) -> Result<CandidatePool, PoolError> {
    let bytes =
        fs::read(path).map_err(|source| PoolError::Io { path: path.to_path_buf(), source })?;
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(&bytes);
    let value: serde_json::Value = serde_json::from_slice(body)?;
    let doc: PoolDocument = if value.get("metadata").is_some() {
        serde_json::from_value(value)?
    } else {
        serde_json::from_value::<LegacyPoolDocument>(value)?.into_document(path)
    };
    if !doc.success {
        return Err(PoolError::UnsuccessfulArtifact { path: path.to_path_buf() });
    }
    if doc.metadata.count != doc.candidate_pool.len() {
        warn!(
            path = %path.display(),
            declared = doc.metadata.count,
            actual = doc.candidate_pool.len(),
            "pool count mismatch; using member list"
        );
    }
    Ok(CandidatePool::new(doc.candidate_pool, doc.metadata))
}

/// Directory of pool artifacts named by as-of date and criteria.
#[derive(Debug, Clone)]
pub struct PoolStore {
    dir: PathBuf,
    encoding: JsonEncoding,
}

impl PoolStore {
    pub fn new(dir: impl Into<PathBuf>, encoding: JsonEncoding) -> Self {
        Self { dir: dir.into(), encoding }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `pool_<as_of>_<criteria hash prefix>.json`
    pub fn artifact_path(&self, as_of: NaiveDate, criteria: &PoolCriteria) -> PathBuf {
        let hash = criteria.hash();
        self.dir.join(format!("pool_{as_of}_{}.json", &hash[..12]))
    }

    pub fn save(&self, pool: &CandidatePool, mode: WriteMode) -> Result<PathBuf, PoolError> {
        let path = self.artifact_path(pool.as_of(), &pool.metadata().criteria);
        write_pool(&path, pool, mode, self.encoding)?;
        Ok(path)
    }

    /// Reuse the artifact for (as-of, criteria) when present, otherwise build
    /// and persist it. `rebuild` forces a fresh build that replaces the file.
    pub fn load_or_build(
        &self,
        builder: &PoolBuilder,
        as_of: NaiveDate,
        criteria: &PoolCriteria,
        rebuild: bool,
    ) -> Result<CandidatePool, PoolError> {
        let path = self.artifact_path(as_of, criteria);
        if !rebuild && path.exists() {
            let pool = load_pool(&path)?;
            if pool.as_of() == as_of && &pool.metadata().criteria == criteria {
                debug!(path = %path.display(), "reusing candidate pool artifact");
                return Ok(pool);
            }
            warn!(path = %path.display(), "artifact does not match its name; rebuilding");
        }
        let pool = builder.build(as_of, criteria)?;
        write_pool(&path, &pool, WriteMode::Overwrite, self.encoding)?;
        Ok(pool)
    }
}
