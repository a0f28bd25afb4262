use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const DEFAULT_MANIFEST_PATH: &str = "photos_info.json";

/// One successfully transferred photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file_name: String,
    /// Size label of the transferred variant
    pub size: String,
}

/// Writes `entries` as a pretty-printed JSON array, replacing whatever the
/// file held before.
pub fn write(entries: &[ManifestEntry], path: &Path) -> Result<()> {
    let mut buffer = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    entries
        .serialize(&mut serializer)
        .context("Failed to serialize manifest")?;

    std::fs::write(path, &buffer)
        .with_context(|| format!("Failed to write manifest to {}", path.display()))?;

    debug!("Wrote {} manifest entries to {}", entries.len(), path.display());
    Ok(())
}

#[cfg(test)]
pub fn read(path: &Path) -> Result<Vec<ManifestEntry>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest from {}", path.display()))?;
    serde_json::from_str(&data).context("Failed to parse manifest")
}
