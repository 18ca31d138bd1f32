use anyhow::{anyhow, Context};
use rusqlite::Connection;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/school.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
const DB_FILE: &str = "school.sqlite3";
pub const BUNDLE_FORMAT: &str = "school-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format: String,
    pub db_sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Copies the live database with `VACUUM INTO` so the bundle is consistent
/// even while WAL frames are pending.
fn snapshot_db(conn: &Connection, workspace_path: &Path) -> anyhow::Result<Vec<u8>> {
    let tmp = workspace_path.join(format!("{}.exporting", DB_FILE));
    if tmp.exists() {
        std::fs::remove_file(&tmp)
            .with_context(|| format!("failed to remove stale {}", tmp.to_string_lossy()))?;
    }
    conn.execute("VACUUM INTO ?", [tmp.to_string_lossy().as_ref()])
        .context("failed to snapshot database")?;
    let bytes = std::fs::read(&tmp)
        .with_context(|| format!("failed to read snapshot {}", tmp.to_string_lossy()));
    let _ = std::fs::remove_file(&tmp);
    bytes
}

pub fn export_workspace_bundle(
    conn: &Connection,
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_bytes = snapshot_db(conn, workspace_path)?;
    let db_sha256 = sha256_hex(&db_bytes);

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create output file {}", out_path.to_string_lossy()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "dbSha256": db_sha256,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())
        .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;

    zip.start_file(META_WORKSPACE_ENTRY, opts)
        .context("failed to start workspace metadata entry")?;
    let meta = json!({ "sourceWorkspace": workspace_path.to_string_lossy() });
    zip.write_all(serde_json::to_string_pretty(&meta)?.as_bytes())
        .context("failed to write workspace metadata entry")?;

    zip.finish().context("failed to finalize zip bundle")?;
    log::info!("exported workspace to {}", out_path.display());

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        entry_count: 3,
        db_sha256,
    })
}

/// Replaces the workspace database with the one in the bundle. The caller must
/// have closed every connection to the workspace first.
pub fn import_workspace_bundle(in_path: &Path, workspace_path: &Path) -> anyhow::Result<ImportSummary> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest.get("format").and_then(|v| v.as_str()).unwrap_or("");
    if format != BUNDLE_FORMAT {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected = manifest
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest.json has no dbSha256"))?
        .to_ascii_lowercase();

    let mut db_bytes = Vec::new();
    archive
        .by_name(DB_ENTRY)
        .context("bundle missing db/school.sqlite3")?
        .read_to_end(&mut db_bytes)
        .context("failed to extract database entry")?;
    let actual = sha256_hex(&db_bytes);
    if actual != expected {
        return Err(anyhow!(
            "database checksum mismatch: manifest {}, bundle {}",
            expected,
            actual
        ));
    }

    std::fs::create_dir_all(workspace_path)
        .with_context(|| format!("failed to create workspace {}", workspace_path.to_string_lossy()))?;
    let dst = workspace_path.join(DB_FILE);
    let tmp_dst = workspace_path.join(format!("{}.importing", DB_FILE));
    {
        let mut out = File::create(&tmp_dst)
            .with_context(|| format!("failed to create temp database {}", tmp_dst.to_string_lossy()))?;
        out.write_all(&db_bytes)?;
        out.flush().context("failed to flush extracted database")?;
    }

    // Stale WAL frames would be replayed over the imported file.
    for suffix in ["-wal", "-shm"] {
        let side = workspace_path.join(format!("{}{}", DB_FILE, suffix));
        if side.exists() {
            std::fs::remove_file(&side)
                .with_context(|| format!("failed to remove {}", side.to_string_lossy()))?;
        }
    }
    std::fs::rename(&tmp_dst, &dst)
        .with_context(|| format!("failed to move extracted database to {}", dst.to_string_lossy()))?;
    log::info!("imported workspace bundle {}", in_path.display());

    Ok(ImportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        db_sha256: actual,
    })
}
