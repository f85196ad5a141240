use std::path::PathBuf;
use thiserror::Error;

/// Failure kinds surfaced by the mod-manager core. Presentation layers match
/// on these; plumbing errors travel through `anyhow` with context instead.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure or non-success status from an origin API call.
    /// Never retried automatically.
    #[error("{origin} API unavailable: {detail}")]
    OriginUnavailable { origin: String, detail: String },

    #[error("unsupported origin {0:?} (supported: gamebanana, divamodarchive)")]
    UnsupportedOrigin(String),

    #[error("mod download failed: {0}")]
    DownloadFailed(String),

    #[error("unsupported mod archive format (must be zip, 7z, or rar)")]
    UnsupportedFormat,

    /// Corrupt or otherwise unusable archive payload. Also covers refused
    /// writes during extraction; raw decoder errors never cross this
    /// boundary, only their rendered message does.
    #[error("archive extraction failed: {0}")]
    ArchiveCorrupt(String),

    #[error("archive layout unusable: {0}")]
    UnusableArchiveLayout(String),

    /// The directory could not be read as even a simple mod. Only raised by
    /// the mod factory; `load_mods` logs and skips such directories.
    #[error("mod at {} has no usable local metadata", .0.display())]
    UnmanageableMod(PathBuf),

    /// The batched metadata fetch succeeded but this mod's entry came back
    /// broken and was cached as an error record.
    #[error("{origin} metadata for mod {id} unavailable: {detail}")]
    MetadataUnavailable {
        origin: String,
        id: i64,
        detail: String,
    },
}
