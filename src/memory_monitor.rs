//! Background memory monitor.
//!
//! Samples the process resident set size at a fixed interval and, when usage
//! crosses the configured high-water mark, asks the cache registry to shed
//! entries in priority order. The task exits when the shutdown signal fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache_registry::CacheRegistry;
use crate::config::Config;

/// Current resident set size in megabytes, read from procfs.
///
/// Returns 0.0 on platforms without /proc; memory pressure eviction is then
/// effectively disabled, which is the safe degradation.
pub fn process_rss_mb() -> f64 {
    let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
        return 0.0;
    };
    let resident_pages: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let page_size = 4096u64; // PAGE_SIZE on every supported target
    (resident_pages * page_size) as f64 / (1024.0 * 1024.0)
}

/// The RSS threshold above which pressure eviction starts.
fn high_water_mb(config: &Config) -> f64 {
    config.memory_soft_limit_mb as f64 * config.memory_high_water_fraction
}

/// Returns true when the process is above the configured high-water mark.
pub fn under_pressure(config: &Config) -> bool {
    let rss = process_rss_mb();
    rss > 0.0 && rss > high_water_mb(config)
}

/// Spawns the monitoring task. It runs until `shutdown` flips to true.
pub fn spawn(
    config: Arc<Config>,
    registry: Arc<CacheRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(config.memory_check_interval_seconds.max(1));
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            high_water_mb = high_water_mb(&config),
            "Memory monitor started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let rss = process_rss_mb();
            debug!(rss_mb = rss, "Memory sample");

            if rss > 0.0 && rss > high_water_mb(&config) {
                warn!(
                    rss_mb = rss,
                    high_water_mb = high_water_mb(&config),
                    "Memory pressure detected, clearing caches"
                );
                let cleared = registry.pressure_clear(&|| under_pressure(&config));
                info!(caches_cleared = cleared.len(), "Pressure clearing finished");
            }
        }
        info!("Memory monitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BoundedLru;
    use crate::cache_registry::priority;

    #[test]
    fn test_rss_sampling_is_nonnegative() {
        // On Linux this reads a real value; elsewhere it degrades to 0.0.
        assert!(process_rss_mb() >= 0.0);
    }

    #[test]
    fn test_high_water_mark() {
        let mut config = Config::default();
        config.memory_soft_limit_mb = 400;
        config.memory_high_water_fraction = 0.75;
        assert!((high_water_mb(&config) - 300.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_monitor_stops_on_shutdown() {
        let config = Arc::new(Config::default());
        let registry = Arc::new(CacheRegistry::new());
        registry.register(
            "t",
            priority::TRANSCRIPTS,
            Arc::new(BoundedLru::<u32, u32>::new(4, None)),
        );

        let (tx, rx) = watch::channel(false);
        let handle = spawn(config, registry, rx);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor should exit promptly on shutdown")
            .unwrap();
    }
}
