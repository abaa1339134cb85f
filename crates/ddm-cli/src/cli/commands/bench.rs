//! `ddm bench <url>` – report the part count calibration/host-policy would pick.

use anyhow::{Context, Result};
use ddm_core::bench::{self, BenchResult};
use ddm_core::config;
use std::collections::HashMap;

fn print_bench_result(r: &BenchResult) {
    println!("  accept-ranges:        {}", r.accept_ranges);
    println!(
        "  content-length:       {}",
        r.content_length.map(|n| n.to_string()).unwrap_or_else(|| "unknown".to_string())
    );
    println!("  observed throughput:  {:.2} MiB/s", r.observed_bytes_per_sec / 1_048_576.0);
    println!("  calibrated parts:     {}", r.calibrated_part_count);
    println!("  adaptive parts:       {}", r.adaptive_part_count);
}

pub async fn run_bench(url: &str) -> Result<()> {
    let cfg = config::load_or_init()?;
    let headers = HashMap::new();
    let result = tokio::task::spawn_blocking({
        let url = url.to_string();
        move || bench::run_bench(&url, &headers, &cfg)
    })
    .await
    .context("bench task join")??;
    print_bench_result(&result);
    Ok(())
}
