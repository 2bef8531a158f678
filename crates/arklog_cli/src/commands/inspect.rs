//! Inspect command implementation.

use arklog_core::PartitionManifest;
use serde::Serialize;
use std::path::Path;

/// Manifest inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Partition the manifest describes.
    pub partition: u32,
    /// Commit version.
    pub version: u64,
    /// Lowest readable offset.
    pub start_offset: u64,
    /// Highest offset ever archived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_offset: Option<u64>,
    /// Lowest offset still physically present.
    pub archive_start_offset: u64,
    /// Number of segments physically present.
    pub segments: usize,
    /// Bytes in the readable window (at or above `start_offset`).
    pub readable_bytes: u64,
    /// Bytes physically resident, including data below `start_offset`
    /// awaiting collection.
    pub resident_bytes: u64,
    /// Highest fully-archived offset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_archived_offset: Option<u64>,
    /// Structural invariant violation, if the document carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invariant_violation: Option<String>,
}

impl InspectResult {
    fn from_manifest(manifest: &PartitionManifest) -> Self {
        Self {
            partition: manifest.partition().as_u32(),
            version: manifest.version(),
            start_offset: manifest.start_offset().as_u64(),
            last_offset: manifest.last_offset().map(|o| o.as_u64()),
            archive_start_offset: manifest.archive_start_offset().as_u64(),
            segments: manifest.segments().len(),
            readable_bytes: manifest.cloud_log_size(false),
            resident_bytes: manifest.cloud_log_size(true),
            highest_archived_offset: manifest.highest_archived_offset().map(|o| o.as_u64()),
            invariant_violation: manifest.check_invariants().err().map(|e| e.to_string()),
        }
    }
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    include_released: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = std::fs::read(path)
        .map_err(|e| format!("cannot read manifest at {}: {e}", path.display()))?;
    let manifest = PartitionManifest::decode(&data)?;
    let result = InspectResult::from_manifest(&manifest);

    if let Some(violation) = &result.invariant_violation {
        tracing::warn!(%violation, "manifest violates its structural invariants");
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print!("{}", render_text(&result, include_released)),
    }
    Ok(())
}

fn render_text(result: &InspectResult, include_released: bool) -> String {
    let mut out = String::new();
    let total = if include_released {
        result.resident_bytes
    } else {
        result.readable_bytes
    };

    out.push_str("Arklog Manifest Inspection\n");
    out.push_str("==========================\n\n");
    out.push_str(&format!("Partition:        {}\n", result.partition));
    out.push_str(&format!("Commit version:   {}\n\n", result.version));

    out.push_str("Offsets:\n");
    out.push_str(&format!("  start:          {}\n", result.start_offset));
    out.push_str(&format!(
        "  last archived:  {}\n",
        result
            .last_offset
            .map_or_else(|| "none".to_string(), |o| o.to_string())
    ));
    out.push_str(&format!(
        "  archive start:  {}\n\n",
        result.archive_start_offset
    ));

    out.push_str("Cloud log:\n");
    out.push_str(&format!("  segments:       {}\n", result.segments));
    out.push_str(&format!("  size:           {} bytes\n", format_size(total)));
    if result.resident_bytes != result.readable_bytes {
        out.push_str(&format!(
            "  released, not yet collected: {} bytes\n",
            format_size(result.resident_bytes - result.readable_bytes)
        ));
    }
    if let Some(violation) = &result.invariant_violation {
        out.push_str(&format!("\nWARNING: {violation}\n"));
    }
    out
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes}")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arklog_core::{Offset, PartitionId, SegmentMeta, Term};
    use std::io::Write;

    fn sample_manifest() -> PartitionManifest {
        let mut manifest = PartitionManifest::new(PartitionId::new(7));
        for base in [0u64, 10, 20] {
            manifest
                .add_segment(SegmentMeta {
                    base_offset: Offset::new(base),
                    last_offset: Offset::new(base + 9),
                    size_bytes: 1000,
                    created_at_ms: 0,
                    term: Term::new(1),
                    object_key: format!("7/{base}-1.seg"),
                })
                .unwrap();
        }
        manifest.advance_start_offset(Offset::new(10));
        manifest
    }

    #[test]
    fn result_reports_both_windows() {
        let result = InspectResult::from_manifest(&sample_manifest());
        assert_eq!(result.partition, 7);
        assert_eq!(result.segments, 3);
        assert_eq!(result.readable_bytes, 2000);
        assert_eq!(result.resident_bytes, 3000);
        assert_eq!(result.highest_archived_offset, Some(29));
        assert!(result.invariant_violation.is_none());
    }

    #[test]
    fn text_output_flags_released_window() {
        let result = InspectResult::from_manifest(&sample_manifest());

        let readable = render_text(&result, false);
        assert!(readable.contains("size:           2.0 KB bytes"));
        assert!(readable.contains("released, not yet collected: 1000 bytes"));

        let resident = render_text(&result, true);
        assert!(resident.contains("size:           2.9 KB bytes"));
    }

    #[test]
    fn text_output_for_fresh_manifest() {
        let manifest = PartitionManifest::new(PartitionId::new(0));
        let result = InspectResult::from_manifest(&manifest);
        let text = render_text(&result, false);
        assert!(text.contains("last archived:  none"));
        assert!(text.contains("segments:       0"));
    }

    #[test]
    fn run_reads_document_from_disk() {
        let manifest = sample_manifest();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&manifest.encode().unwrap()).unwrap();

        run(file.path(), false, "json").unwrap();
        run(file.path(), true, "text").unwrap();
    }

    #[test]
    fn run_rejects_missing_file() {
        let result = run(Path::new("/nonexistent/manifest.json"), false, "text");
        assert!(result.is_err());
    }
}
