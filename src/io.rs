//! Session-directory I/O.
//!
//! A session directory holds:
//!
//! ```text
//! <dir>/
//!   metadata.json          SessionMetadata
//!   stim_log.json          StimLog
//!   sync.safetensors       stim_to_twop, twop_to_pupil, twop_to_body (I64)
//!                          pupil_frame_intervals, twop_fps (F64)
//!   traces.safetensors     raw [ROI, T], optional dff [ROI, T] (F32 or F64)
//!                          roi_names (U8, newline-separated, optional)
//!   pupil.safetensors      diameter [N], center [N, 2]   (optional)
//! ```
//!
//! Numeric arrays use safetensors with a hand-parsed header; everything else
//! is JSON.
use anyhow::{bail, ensure, Context, Result};
use ndarray::Array2;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::raw::{PupilStore, SessionInputs, SessionMetadata, StimLog, SyncStore, TraceStore};

pub const METADATA_FILE: &str = "metadata.json";
pub const STIM_LOG_FILE: &str = "stim_log.json";
pub const SYNC_FILE: &str = "sync.safetensors";
pub const TRACES_FILE: &str = "traces.safetensors";
pub const PUPIL_FILE: &str = "pupil.safetensors";

// ── Low-level safetensors parser (raw bytes → Vec / ndarray, no dependency on
//    the `safetensors` crate). ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Entry {
    dtype: String,
    shape: Vec<usize>,
    start: usize,
    end: usize,
}

fn parse_entry(name: &str, value: &serde_json::Value) -> Result<Entry> {
    let dtype = value["dtype"].as_str().with_context(|| format!("tensor '{name}': missing dtype"))?.to_string();
    let shape = value["shape"]
        .as_array()
        .with_context(|| format!("tensor '{name}': missing shape"))?
        .iter()
        .map(|v| v.as_u64().map(|d| d as usize))
        .collect::<Option<Vec<_>>>()
        .with_context(|| format!("tensor '{name}': bad shape"))?;
    let offsets = value["data_offsets"]
        .as_array()
        .with_context(|| format!("tensor '{name}': missing data_offsets"))?;
    ensure!(offsets.len() == 2, "tensor '{name}': data_offsets must have 2 entries");
    let off = |i: usize| {
        offsets[i].as_u64().map(|v| v as usize).with_context(|| format!("tensor '{name}': bad data_offsets"))
    };
    Ok(Entry { dtype, shape, start: off(0)?, end: off(1)? })
}

/// A loaded safetensors file.
pub struct SafeTensors {
    bytes: Vec<u8>,
    data_start: usize,
    entries: HashMap<String, Entry>,
}

impl SafeTensors {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_bytes(bytes).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < 8 {
            bail!("safetensors file too small");
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[..8]);
        let n = u64::from_le_bytes(len) as usize;
        ensure!(bytes.len() >= 8 + n, "safetensors header runs past end of file");
        let header: HashMap<String, serde_json::Value> =
            serde_json::from_slice(&bytes[8..8 + n]).context("failed to parse safetensors header")?;
        let data_start = 8 + n;
        let mut entries = HashMap::new();
        for (name, value) in &header {
            if name == "__metadata__" {
                continue;
            }
            let entry = parse_entry(name, value)?;
            ensure!(
                entry.start <= entry.end && data_start + entry.end <= bytes.len(),
                "tensor '{name}': data offsets outside file"
            );
            entries.insert(name.clone(), entry);
        }
        Ok(Self { bytes, data_start, entries })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn entry(&self, name: &str) -> Result<&Entry> {
        self.entries.get(name).with_context(|| format!("missing '{name}' key"))
    }

    pub fn shape(&self, name: &str) -> Result<&[usize]> {
        Ok(&self.entry(name)?.shape)
    }

    fn raw(&self, e: &Entry) -> &[u8] {
        &self.bytes[self.data_start + e.start..self.data_start + e.end]
    }

    /// Any numeric tensor, converted to `f64`.
    pub fn f64s(&self, name: &str) -> Result<Vec<f64>> {
        let e = self.entry(name)?;
        let raw = self.raw(e);
        let out: Vec<f64> = match e.dtype.as_str() {
            "F64" => raw.chunks_exact(8).map(|b| f64::from_le_bytes(le8(b))).collect(),
            "F32" => raw.chunks_exact(4).map(|b| f32::from_le_bytes(le4(b)) as f64).collect(),
            "I64" => raw.chunks_exact(8).map(|b| i64::from_le_bytes(le8(b)) as f64).collect(),
            "I32" => raw.chunks_exact(4).map(|b| i32::from_le_bytes(le4(b)) as f64).collect(),
            other => bail!("tensor '{name}': unsupported dtype {other}"),
        };
        let expected: usize = e.shape.iter().product();
        ensure!(out.len() == expected, "tensor '{name}': {} values for shape {:?}", out.len(), e.shape);
        Ok(out)
    }

    /// Non-negative integer tensor as indices.
    pub fn indices(&self, name: &str) -> Result<Vec<usize>> {
        let e = self.entry(name)?;
        let raw = self.raw(e);
        let vals: Vec<i64> = match e.dtype.as_str() {
            "I64" => raw.chunks_exact(8).map(|b| i64::from_le_bytes(le8(b))).collect(),
            "I32" => raw.chunks_exact(4).map(|b| i32::from_le_bytes(le4(b)) as i64).collect(),
            other => bail!("tensor '{name}': expected an integer dtype, got {other}"),
        };
        vals.into_iter()
            .map(|v| usize::try_from(v).with_context(|| format!("tensor '{name}': negative index {v}")))
            .collect()
    }

    pub fn scalar(&self, name: &str) -> Result<f64> {
        self.f64s(name)?.first().copied().with_context(|| format!("tensor '{name}' is empty"))
    }

    pub fn array2(&self, name: &str) -> Result<Array2<f64>> {
        let shape = self.shape(name)?.to_vec();
        ensure!(shape.len() == 2, "tensor '{name}': expected 2-d, got shape {shape:?}");
        Ok(Array2::from_shape_vec((shape[0], shape[1]), self.f64s(name)?)?)
    }

    /// Newline-separated UTF-8 strings stored as a U8 tensor.
    pub fn strings(&self, name: &str) -> Result<Vec<String>> {
        let raw = self.raw(self.entry(name)?);
        Ok(std::str::from_utf8(raw)?.split('\n').filter(|s| !s.is_empty()).map(String::from).collect())
    }
}

fn le8(b: &[u8]) -> [u8; 8] {
    let mut a = [0u8; 8];
    a.copy_from_slice(b);
    a
}

fn le4(b: &[u8]) -> [u8; 4] {
    let mut a = [0u8; 4];
    a.copy_from_slice(b);
    a
}

// ── Generic safetensors builder ───────────────────────────────────────────────

/// Simple safetensors file writer for F32, F64, I32, I64 and U8 tensors.
///
/// ```rust,no_run
/// use calcium_quint::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f64("twop_fps", &[30.0], &[1]);
/// w.add_i64("stim_to_twop", &[0, 0, 1, 1], &[4]);
/// w.write(Path::new("/tmp/sync.safetensors")).unwrap();
/// ```
#[derive(Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F32", shape.to_vec()));
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F64", shape.to_vec()));
    }

    pub fn add_f64_arr2(&mut self, name: &str, arr: &Array2<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I32", shape.to_vec()));
    }

    pub fn add_i64(&mut self, name: &str, data: &[i64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I64", shape.to_vec()));
    }

    pub fn add_indices(&mut self, name: &str, data: &[usize]) {
        let vals: Vec<i64> = data.iter().map(|&v| v as i64).collect();
        self.add_i64(name, &vals, &[vals.len()]);
    }

    pub fn add_strings(&mut self, name: &str, strings: &[String]) {
        let bytes = strings.join("\n").into_bytes();
        let n = bytes.len();
        self.entries.push((name.to_string(), bytes, "U8", vec![n]));
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        use std::io::Write;
        let mut header_map = serde_json::Map::new();
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            header_map.insert(
                name.clone(),
                serde_json::json!({
                    "dtype": dtype,
                    "shape": shape,
                    "data_offsets": [offset, offset + data.len()],
                }),
            );
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let padded: Vec<u8> = hdr_bytes.into_iter().chain(std::iter::repeat(b' ').take(pad)).collect();
        let mut f = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        f.write_all(&(padded.len() as u64).to_le_bytes())?;
        f.write_all(&padded)?;
        for (_, data, _, _) in &self.entries {
            f.write_all(data)?;
        }
        Ok(())
    }
}

// ── JSON ──────────────────────────────────────────────────────────────────────

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
}

/// Find one session in a metadata table (a JSON array of rows).
pub fn find_metadata(path: &Path, session_id: u64) -> Result<SessionMetadata> {
    let rows: Vec<SessionMetadata> = read_json(path)?;
    rows.into_iter()
        .find(|r| r.session_id == session_id)
        .with_context(|| format!("session {session_id} not in {}", path.display()))
}

// ── Stores ────────────────────────────────────────────────────────────────────

pub fn load_sync(path: &Path) -> Result<SyncStore> {
    let st = SafeTensors::load(path)?;
    Ok(SyncStore {
        stim_to_twop: st.indices("stim_to_twop")?,
        twop_to_pupil: st.indices("twop_to_pupil")?,
        twop_to_body: st.indices("twop_to_body")?,
        pupil_frame_intervals: st.f64s("pupil_frame_intervals")?,
        twop_fps: st.scalar("twop_fps")?,
    })
}

pub fn write_sync(sync: &SyncStore, path: &Path) -> Result<()> {
    let mut w = StWriter::new();
    w.add_indices("stim_to_twop", &sync.stim_to_twop);
    w.add_indices("twop_to_pupil", &sync.twop_to_pupil);
    w.add_indices("twop_to_body", &sync.twop_to_body);
    w.add_f64("pupil_frame_intervals", &sync.pupil_frame_intervals, &[sync.pupil_frame_intervals.len()]);
    w.add_f64("twop_fps", &[sync.twop_fps], &[1]);
    w.write(path)
}

pub fn load_traces(path: &Path) -> Result<TraceStore> {
    let st = SafeTensors::load(path)?;
    let raw = st.array2("raw")?;
    let dff = if st.contains("dff") { Some(st.array2("dff")?) } else { None };
    let roi_names = if st.contains("roi_names") {
        st.strings("roi_names")?
    } else {
        (0..raw.nrows()).map(|i| format!("roi_{i}")).collect()
    };
    Ok(TraceStore { raw, dff, roi_names })
}

pub fn write_traces(traces: &TraceStore, path: &Path) -> Result<()> {
    let mut w = StWriter::new();
    w.add_f64_arr2("raw", &traces.raw);
    if let Some(dff) = &traces.dff {
        w.add_f64_arr2("dff", dff);
    }
    w.add_strings("roi_names", &traces.roi_names);
    w.write(path)
}

pub fn load_pupil(path: &Path) -> Result<PupilStore> {
    let st = SafeTensors::load(path)?;
    let diameter = st.f64s("diameter")?;
    let center = if st.contains("center") {
        let c = st.array2("center")?;
        ensure!(c.ncols() == 2, "pupil center must be [N, 2], got {:?}", c.dim());
        c.rows().into_iter().map(|r| [r[0], r[1]]).collect()
    } else {
        Vec::new()
    };
    Ok(PupilStore { diameter, center })
}

pub fn write_pupil(pupil: &PupilStore, path: &Path) -> Result<()> {
    let mut w = StWriter::new();
    w.add_f64("diameter", &pupil.diameter, &[pupil.diameter.len()]);
    if !pupil.center.is_empty() {
        let flat: Vec<f64> = pupil.center.iter().flatten().copied().collect();
        w.add_f64("center", &flat, &[pupil.center.len(), 2]);
    }
    w.write(path)
}

/// Read every store of a session directory.
pub fn load_session_dir(dir: &Path) -> Result<SessionInputs> {
    ensure!(dir.is_dir(), "{} is not a directory", dir.display());
    let metadata: SessionMetadata = read_json(&dir.join(METADATA_FILE))?;
    let stim_log: StimLog = read_json(&dir.join(STIM_LOG_FILE))?;
    let sync = load_sync(&dir.join(SYNC_FILE))?;
    let traces = load_traces(&dir.join(TRACES_FILE))?;
    let pupil_path = dir.join(PUPIL_FILE);
    let pupil = if pupil_path.exists() {
        Some(load_pupil(&pupil_path)?)
    } else {
        log::debug!("{}: no pupil data", dir.display());
        None
    };
    log::info!(
        "loaded session {} from {} ({} ROIs, {} stimulus frames)",
        metadata.session_id,
        dir.display(),
        traces.raw.nrows(),
        stim_log.n_stim_frames()
    );
    Ok(SessionInputs { metadata, stim_log, sync, traces, pupil })
}

/// Write a session directory readable by [`load_session_dir`].
pub fn write_session_dir(inputs: &SessionInputs, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    write_json(&inputs.metadata, &dir.join(METADATA_FILE))?;
    write_json(&inputs.stim_log, &dir.join(STIM_LOG_FILE))?;
    write_sync(&inputs.sync, &dir.join(SYNC_FILE))?;
    write_traces(&inputs.traces, &dir.join(TRACES_FILE))?;
    if let Some(p) = &inputs.pupil {
        write_pupil(p, &dir.join(PUPIL_FILE))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_dtypes_round_trip_through_bytes() {
        let dir = std::env::temp_dir().join(format!("cq_io_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("t.safetensors");
        let mut w = StWriter::new();
        w.add_f32("a", &[1.5, 2.5], &[2]);
        w.add_i32("b", &[3, 4, 5], &[3]);
        w.add_strings("names", &["x".to_string(), "y".to_string()]);
        w.write(&path).unwrap();

        let st = SafeTensors::load(&path).unwrap();
        assert_eq!(st.f64s("a").unwrap(), vec![1.5, 2.5]);
        assert_eq!(st.indices("b").unwrap(), vec![3, 4, 5]);
        assert_eq!(st.strings("names").unwrap(), vec!["x", "y"]);
        assert!(st.indices("a").is_err());
        assert!(st.f64s("missing").is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn truncated_header_is_rejected() {
        let mut bytes = 100u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        assert!(SafeTensors::from_bytes(bytes).is_err());
        assert!(SafeTensors::from_bytes(vec![0; 4]).is_err());
    }
}
