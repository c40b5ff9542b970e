use std::path::PathBuf;

use bridge_core::preflight::{profile_by_name, run_preflight};

pub async fn run(app: &str, dir: Option<PathBuf>) -> i32 {
    let profile = profile_by_name(app);
    let app_dir = dir.unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

    println!("Preflight: {} ({})", profile.name, app_dir.display());
    let (passed, failed, warned) = run_preflight(profile, &app_dir).await;
    println!("passed={} warned={} failed={}", passed, warned, failed);

    if failed > 0 {
        1
    } else {
        0
    }
}
