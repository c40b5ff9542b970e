use bridge_core::config::AppConfig;
use bridge_core::snapshot::ConfigSnapshotter;

pub fn run(config: &AppConfig, list: bool, restore: Option<&str>) -> i32 {
    let snapper = ConfigSnapshotter::new(&config.snapshot.snapshot_dir, config.snapshot.max_per_file);

    if let Some(file) = restore {
        return match snapper.restore_snapshot(file, None) {
            Ok(()) => {
                println!("Restored {} from its most recent snapshot.", file);
                0
            }
            Err(e) => {
                eprintln!("Restore failed: {}", e);
                1
            }
        };
    }

    if list {
        let snapshots = snapper.list_snapshots(None);
        if snapshots.is_empty() {
            println!("No snapshots recorded.");
            return 0;
        }
        for s in snapshots {
            println!("{} [{}] reason={} app={} ({} bytes)", s.file, s.timestamp, s.reason, s.app, s.size_bytes);
        }
        return 0;
    }

    println!("Pass --list to view snapshots or --restore FILE to restore one.");
    0
}
