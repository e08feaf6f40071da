//! Cache statistics and maintenance commands.
//!
//! Provides a quick summary of what's cached: entry and chunk counts,
//! on-disk sizes, and per-entry breakdowns. Used by `ddg stats` to give
//! confidence that ingests and eviction are working as expected, and by
//! `ddg clear` to drop entries.

use anyhow::Result;

use crate::config::Config;
use crate::pipeline::open_cache;

/// Run the stats command: walk the cache and print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let cache = open_cache(config)?;
    let stats = cache.stats()?;

    println!("doc-digest — Cache Stats");
    println!("========================");
    println!();
    println!("  Cache dir:   {}", config.cache.dir.display());
    println!("  Size:        {}", format_bytes(stats.total_size_bytes));
    println!();
    println!("  Documents:   {}", stats.total_entries);
    println!("  Chunks:      {}", stats.total_chunks);

    if !stats.entries.is_empty() {
        println!();
        println!("  By document:");
        println!(
            "  {:<40} {:<12} {:>7} {:>9}   {}",
            "PATH", "TYPE", "CHUNKS", "SIZE", "LAST ACCESS"
        );
        println!("  {}", "-".repeat(88));

        for entry in &stats.entries {
            println!(
                "  {:<40} {:<12} {:>7} {:>9}   {}",
                truncate_path(&entry.file_path, 40),
                entry.doc_type.to_string(),
                entry.chunks,
                format_bytes(entry.size_bytes),
                format_ts_relative(entry.last_accessed)
            );
        }
    }

    println!();
    Ok(())
}

/// Run the clear command: remove one entry, or everything with `--all`.
pub fn run_clear(config: &Config, file_hash: Option<&str>, all: bool) -> Result<()> {
    if file_hash.is_none() && !all {
        anyhow::bail!("Specify a file hash, or pass --all to clear every entry.");
    }

    let cache = open_cache(config)?;
    let removed = cache.clear(file_hash)?;
    println!(
        "Removed {} cache entr{}.",
        removed,
        if removed == 1 { "y" } else { "ies" }
    );
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Keep the tail of long paths so the file name stays visible.
fn truncate_path(path: &str, max: usize) -> String {
    let chars: Vec<char> = path.chars().collect();
    if chars.len() <= max {
        return path.to_string();
    }
    let tail: String = chars[chars.len() - (max - 3)..].iter().collect();
    format!("...{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now - 30), "just now");
        assert_eq!(format_ts_relative(now - 120), "2 mins ago");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 3 * 86400), "3 days ago");
    }

    #[test]
    fn test_truncate_path() {
        assert_eq!(truncate_path("/short.txt", 40), "/short.txt");
        let long = "/very/long/path/to/some/deeply/nested/report.xlsx";
        let out = truncate_path(long, 20);
        assert_eq!(out.chars().count(), 20);
        assert!(out.starts_with("..."));
        assert!(out.ends_with("report.xlsx"));
    }
}
