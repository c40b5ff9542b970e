//! Pre-mutation file backups with bounded per-file retention (§4.10).

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::model::SnapshotRecord;

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct Manifest {
    snapshots: Vec<SnapshotRecord>,
}

pub struct ConfigSnapshotter {
    snapshot_dir: PathBuf,
    manifest_path: PathBuf,
    max_per_file: usize,
}

impl ConfigSnapshotter {
    pub fn new(snapshot_dir: impl Into<PathBuf>, max_per_file: usize) -> Self {
        let snapshot_dir = snapshot_dir.into();
        let manifest_path = snapshot_dir.join("manifest.json");
        Self {
            snapshot_dir,
            manifest_path,
            max_per_file,
        }
    }

    fn load_manifest(&self) -> Manifest {
        std::fs::read(&self.manifest_path)
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok())
            .unwrap_or_default()
    }

    fn save_manifest(&self, manifest: &Manifest) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.snapshot_dir)?;
        let bytes = serde_json::to_vec_pretty(manifest).unwrap_or_default();
        std::fs::write(&self.manifest_path, bytes)
    }

    /// Snapshot `file_path` before a mutation. Returns the snapshot path, or
    /// `None` if the source file does not exist or the copy failed.
    pub fn snapshot_before_mutation(
        &self,
        file_path: &Path,
        reason: &str,
        app_name: &str,
    ) -> Option<PathBuf> {
        if !file_path.exists() {
            return None;
        }
        std::fs::create_dir_all(&self.snapshot_dir).ok()?;

        let basename = file_path.file_name()?.to_string_lossy().to_string();
        let timestamp = Utc::now();
        let snapshot_name = format!("{}.{}.bak", basename, timestamp.format("%Y%m%d_%H%M%S"));
        let snapshot_path = self.snapshot_dir.join(&snapshot_name);

        std::fs::copy(file_path, &snapshot_path).ok()?;
        let size_bytes = std::fs::metadata(file_path).map(|m| m.len()).unwrap_or(0);

        let mut manifest = self.load_manifest();
        manifest.snapshots.push(SnapshotRecord {
            file: basename.clone(),
            original_path: file_path
                .canonicalize()
                .unwrap_or_else(|_| file_path.to_path_buf())
                .to_string_lossy()
                .to_string(),
            snapshot_name,
            snapshot_path: snapshot_path.to_string_lossy().to_string(),
            timestamp,
            reason: reason.to_string(),
            app: app_name.to_string(),
            size_bytes,
        });

        self.prune(&mut manifest, &basename);
        self.save_manifest(&manifest).ok()?;
        Some(snapshot_path)
    }

    fn prune(&self, manifest: &mut Manifest, basename: &str) {
        let indices: Vec<usize> = manifest
            .snapshots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.file == basename)
            .map(|(i, _)| i)
            .collect();

        if indices.len() <= self.max_per_file {
            return;
        }

        let to_remove_count = indices.len() - self.max_per_file;
        let to_remove: Vec<usize> = indices.into_iter().take(to_remove_count).collect();

        for &i in &to_remove {
            let _ = std::fs::remove_file(&manifest.snapshots[i].snapshot_path);
        }
        let mut kept = Vec::with_capacity(manifest.snapshots.len() - to_remove.len());
        for (i, s) in manifest.snapshots.drain(..).enumerate() {
            if !to_remove.contains(&i) {
                kept.push(s);
            }
        }
        manifest.snapshots = kept;
    }

    /// Restore a file from a snapshot (default: most recent), first
    /// snapshotting the current state so the restore is itself reversible.
    pub fn restore_snapshot(&self, file_basename: &str, index: Option<i64>) -> anyhow::Result<()> {
        let manifest = self.load_manifest();
        let matching: Vec<&SnapshotRecord> = manifest
            .snapshots
            .iter()
            .filter(|s| s.file == file_basename)
            .collect();

        if matching.is_empty() {
            anyhow::bail!("no snapshots found for {}", file_basename);
        }

        let idx = index.unwrap_or(-1);
        let chosen = if idx < 0 {
            let pos = matching.len() as i64 + idx;
            matching.get(pos as usize)
        } else {
            matching.get(idx as usize)
        }
        .ok_or_else(|| anyhow::anyhow!("snapshot index {} out of range", idx))?;

        let snapshot_path = PathBuf::from(&chosen.snapshot_path);
        if !snapshot_path.exists() {
            anyhow::bail!("snapshot file missing: {}", chosen.snapshot_path);
        }

        let original_path = PathBuf::from(&chosen.original_path);
        self.snapshot_before_mutation(&original_path, "pre-restore backup", "ConfigSnapshot");

        std::fs::copy(&snapshot_path, &original_path)?;
        Ok(())
    }

    pub fn list_snapshots(&self, file_filter: Option<&str>) -> Vec<SnapshotRecord> {
        let manifest = self.load_manifest();
        manifest
            .snapshots
            .into_iter()
            .filter(|s| file_filter.map(|f| s.file == f).unwrap_or(true))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(path: &Path, content: &str) {
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn snapshot_then_restore_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let snap_dir = dir.path().join(".config_snapshots");
        let target = dir.path().join("server.toml");
        write_file(&target, "original content");

        let snapper = ConfigSnapshotter::new(&snap_dir, 10);
        snapper.snapshot_before_mutation(&target, "update", "app").unwrap();

        write_file(&target, "mutated content");
        snapper.restore_snapshot("server.toml", None).unwrap();

        let restored = std::fs::read_to_string(&target).unwrap();
        assert_eq!(restored, "original content");

        // Restore itself created one additional snapshot of the pre-restore state.
        let snapshots = snapper.list_snapshots(Some("server.toml"));
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].reason, "pre-restore backup");
    }

    #[test]
    fn retention_prunes_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let snap_dir = dir.path().join(".config_snapshots");
        let target = dir.path().join("server.toml");
        let snapper = ConfigSnapshotter::new(&snap_dir, 3);

        for i in 0..6 {
            write_file(&target, &format!("content {}", i));
            snapper.snapshot_before_mutation(&target, "auto", "app").unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let snapshots = snapper.list_snapshots(Some("server.toml"));
        assert_eq!(snapshots.len(), 3);
        for s in &snapshots {
            assert!(PathBuf::from(&s.snapshot_path).exists());
        }
    }

    #[test]
    fn missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let snapper = ConfigSnapshotter::new(dir.path().join(".snap"), 10);
        let result = snapper.snapshot_before_mutation(
            &dir.path().join("does-not-exist.toml"),
            "r",
            "app",
        );
        assert!(result.is_none());
    }
}
