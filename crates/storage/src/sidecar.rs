//! Atomic persistence of [`State`] to a sidecar file (spec §4.B, §6).

use crate::error::{Result, StorageError};
use crate::state::{Checksum, ChecksumAlgorithm, Chunk, ChunkStatus, State, SCHEMA_VERSION};
use chrono::{DateTime, Utc};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Fixed suffix appended to a destination path to name its sidecar.
pub const SIDECAR_SUFFIX: &str = ".dl-state";

/// Path of the sidecar for destination `path`.
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(SIDECAR_SUFFIX);
    PathBuf::from(s)
}

/// Serialize a [`State`] to the deterministic key/value text format.
fn encode(state: &State) -> String {
    let mut out = String::new();
    let mut line = |k: &str, v: &str| {
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\n');
    };

    line("version", &state.version.to_string());
    line("url", &state.url);
    line("filename", &state.filename);
    line(
        "total_size",
        &state
            .total_size
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    );
    line("downloaded", &state.downloaded().to_string());
    line("accept_range", &state.accept_range.to_string());
    line("created_at", &state.created_at.to_rfc3339());
    line("updated_at", &state.updated_at.to_rfc3339());

    match &state.checksum {
        Some(sum) => {
            line("checksum.algorithm", sum.algorithm.as_str());
            line("checksum.expected", &sum.expected);
            line("checksum.actual", sum.actual.as_deref().unwrap_or(""));
        }
        None => {
            line("checksum.algorithm", "");
        }
    }

    line("chunks", &state.chunks.len().to_string());
    for chunk in &state.chunks {
        let prefix = format!("chunk.{}", chunk.id);
        line(&format!("{prefix}.start"), &chunk.start.to_string());
        line(
            &format!("{prefix}.end"),
            &if chunk.end < 0 {
                "unknown".to_string()
            } else {
                chunk.end.to_string()
            },
        );
        line(&format!("{prefix}.downloaded"), &chunk.downloaded.to_string());
        line(&format!("{prefix}.status"), chunk.status.as_str());
    }

    out
}

/// Parse the deterministic key/value text format back into a [`State`].
fn decode(path: &Path, text: &str) -> Result<State> {
    let corrupt = |reason: String| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let mut fields = std::collections::HashMap::new();
    for raw_line in text.lines() {
        if raw_line.is_empty() {
            continue;
        }
        let (k, v) = raw_line
            .split_once('=')
            .ok_or_else(|| corrupt(format!("malformed line: {raw_line:?}")))?;
        fields.insert(k.to_string(), v.to_string());
    }

    let get = |key: &str| -> Result<String> {
        fields
            .get(key)
            .cloned()
            .ok_or_else(|| corrupt(format!("missing field: {key}")))
    };

    let version: u32 = get("version")?
        .parse()
        .map_err(|_| corrupt("version is not an integer".to_string()))?;
    if version > SCHEMA_VERSION {
        return Err(StorageError::VersionTooNew {
            path: path.to_path_buf(),
            found: version,
            supported: SCHEMA_VERSION,
        });
    }

    let url = get("url")?;
    let filename = get("filename")?;
    let total_size = match get("total_size")?.as_str() {
        "unknown" => None,
        s => Some(
            s.parse::<u64>()
                .map_err(|_| corrupt("total_size is not an integer".to_string()))?,
        ),
    };
    let accept_range = get("accept_range")? == "true";
    let created_at: DateTime<Utc> = get("created_at")?
        .parse()
        .map_err(|_| corrupt("created_at is not RFC-3339".to_string()))?;
    let updated_at: DateTime<Utc> = get("updated_at")?
        .parse()
        .map_err(|_| corrupt("updated_at is not RFC-3339".to_string()))?;

    let checksum_algorithm = get("checksum.algorithm")?;
    let checksum = if checksum_algorithm.is_empty() {
        None
    } else {
        let algorithm = ChecksumAlgorithm::parse(&checksum_algorithm)
            .ok_or_else(|| corrupt(format!("unknown checksum algorithm: {checksum_algorithm}")))?;
        let expected = get("checksum.expected")?;
        let actual = get("checksum.actual")?;
        Some(Checksum {
            algorithm,
            expected,
            actual: if actual.is_empty() { None } else { Some(actual) },
        })
    };

    let chunk_count: usize = get("chunks")?
        .parse()
        .map_err(|_| corrupt("chunks count is not an integer".to_string()))?;
    let mut chunks = Vec::with_capacity(chunk_count);
    for id in 0..chunk_count {
        let prefix = format!("chunk.{id}");
        let start: u64 = get(&format!("{prefix}.start"))?
            .parse()
            .map_err(|_| corrupt(format!("chunk {id} start is not an integer")))?;
        let end_raw = get(&format!("{prefix}.end"))?;
        let end: i64 = if end_raw == "unknown" {
            -1
        } else {
            end_raw
                .parse()
                .map_err(|_| corrupt(format!("chunk {id} end is not an integer")))?
        };
        let downloaded: u64 = get(&format!("{prefix}.downloaded"))?
            .parse()
            .map_err(|_| corrupt(format!("chunk {id} downloaded is not an integer")))?;
        let status_raw = get(&format!("{prefix}.status"))?;
        let status = ChunkStatus::parse(&status_raw)
            .ok_or_else(|| corrupt(format!("chunk {id} has unknown status: {status_raw}")))?;

        chunks.push(Chunk {
            id: id as u32,
            start,
            end,
            downloaded,
            status,
        });
    }

    Ok(State {
        version,
        url,
        filename,
        total_size,
        accept_range,
        chunks,
        checksum,
        created_at,
        updated_at,
    })
}

/// Persist `state` to the sidecar for `path`, atomically.
///
/// Writes to a `.tmp` file in the same directory, then renames it over the
/// final sidecar name. If the rename fails, the `.tmp` file is removed so a
/// partial sidecar is never left visible (spec §4.B, §8 scenario 6).
pub fn save(path: &Path, state: &State) -> Result<()> {
    let dest = sidecar_path(path);
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| StorageError::io(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StorageError::io(dir, e))?;
    tmp.write_all(encode(state).as_bytes())
        .map_err(|e| StorageError::io(tmp.path(), e))?;
    tmp.flush().map_err(|e| StorageError::io(tmp.path(), e))?;

    tmp.persist(&dest).map_err(|e| {
        let tmp_path = e.file.path().to_path_buf();
        let _ = std::fs::remove_file(&tmp_path);
        StorageError::io(dest.clone(), e.error)
    })?;

    Ok(())
}

/// Load the sidecar for `path`.
pub fn load(path: &Path) -> Result<State> {
    let sidecar = sidecar_path(path);
    let text = std::fs::read_to_string(&sidecar).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound {
                path: sidecar.clone(),
            }
        } else {
            StorageError::io(sidecar.clone(), e)
        }
    })?;
    decode(&sidecar, &text)
}

/// Whether a sidecar exists for `path`.
pub fn exists(path: &Path) -> bool {
    sidecar_path(path).exists()
}

/// Delete the sidecar for `path`. Missing sidecars are not an error.
pub fn delete(path: &Path) -> Result<()> {
    let sidecar = sidecar_path(path);
    match std::fs::remove_file(&sidecar) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(sidecar, e)),
    }
}

/// Enumerate sidecars in `directory`, skipping corrupt ones.
///
/// A candidate is only included once it decodes successfully: a file that
/// merely has the right name but fails to parse (truncated write, foreign
/// contents) is silently dropped rather than surfaced as a usable sidecar.
pub fn list(directory: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let entries = std::fs::read_dir(directory).map_err(|e| StorageError::io(directory, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(directory, e))?;
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        if !name.ends_with(SIDECAR_SUFFIX) || name.ends_with(&format!("{SIDECAR_SUFFIX}.tmp")) {
            continue;
        }
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(_) => continue,
        };
        if decode(&path, &text).is_err() {
            continue;
        }
        found.push(path);
    }
    found.sort();
    Ok(found)
}

/// Delete sidecars in `directory` whose State is complete.
pub fn clean(directory: &Path) -> Result<usize> {
    let mut removed = 0;
    for sidecar in list(directory)? {
        let text = match std::fs::read_to_string(&sidecar) {
            Ok(t) => t,
            Err(_) => continue,
        };
        let state = match decode(&sidecar, &text) {
            Ok(s) => s,
            Err(_) => continue,
        };
        if state.is_complete() {
            let _ = std::fs::remove_file(&sidecar);
            removed += 1;
        }
    }
    Ok(removed)
}
