//! Dashboard statistics
//!
//! Community figures come from the database; process figures from `sysinfo`
//! and the request counters kept by the HTTP middleware.

use anyhow::Context;
use chrono::{Duration, Utc};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::{Pid, System};

use crate::db::repositories::StatisticsRepository;
use crate::models::{Permission, SiteStatistics, SystemStatistics, User};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Users registered within this many days count as new
const RECENT_DAYS: i64 = 30;
const TOP_STORIES: i64 = 5;

/// Request counters updated without locks
pub struct RequestStats {
    total_requests: AtomicU64,
    /// Sum of response times in microseconds
    total_response_time_us: AtomicU64,
    start_time: Instant,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, duration_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn avg_response_time_us(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.total_response_time_us.load(Ordering::Relaxed) as f64 / total as f64
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatisticsServiceError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct StatisticsService {
    repo: Arc<dyn StatisticsRepository>,
    request_stats: Arc<RequestStats>,
}

impl StatisticsService {
    pub fn new(repo: Arc<dyn StatisticsRepository>, request_stats: Arc<RequestStats>) -> Self {
        Self { repo, request_stats }
    }

    pub fn request_stats(&self) -> &Arc<RequestStats> {
        &self.request_stats
    }

    pub async fn site_statistics(&self, actor: &User) -> Result<SiteStatistics, StatisticsServiceError> {
        require_statistics(actor)?;
        let since = Utc::now() - Duration::days(RECENT_DAYS);
        Ok(self
            .repo
            .site_statistics(since, TOP_STORIES)
            .await
            .context("Failed to collect site statistics")?)
    }

    pub async fn system_statistics(&self, actor: &User) -> Result<SystemStatistics, StatisticsServiceError> {
        require_statistics(actor)?;

        // Refreshing every process is slow, keep it off the async workers
        let (memory_bytes, system_total_memory, system_used_memory) =
            tokio::task::spawn_blocking(|| {
                let mut sys = System::new_all();
                sys.refresh_all();
                let memory = sys
                    .process(Pid::from_u32(process::id()))
                    .map(|p| p.memory())
                    .unwrap_or(0);
                (memory, sys.total_memory(), sys.used_memory())
            })
            .await
            .context("System statistics task failed")?;

        let uptime_seconds = self.request_stats.uptime_seconds();
        Ok(SystemStatistics {
            version: APP_VERSION.to_string(),
            os_name: System::name().unwrap_or_else(|| "Unknown".to_string()),
            memory_bytes,
            memory_formatted: format_bytes(memory_bytes),
            system_total_memory,
            system_used_memory,
            uptime_seconds,
            uptime_formatted: format_uptime(uptime_seconds),
            total_requests: self.request_stats.total_requests(),
            avg_response_time_ms: self.request_stats.avg_response_time_us() / 1000.0,
        })
    }
}

fn require_statistics(user: &User) -> Result<(), StatisticsServiceError> {
    if user.has_permission(Permission::ViewStatistics) {
        Ok(())
    } else {
        Err(StatisticsServiceError::Forbidden("Statistics are for administrators".into()))
    }
}

/// Uptime such as `2d 3h 4m`
pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m", minutes)
    } else {
        format!("{}s", seconds)
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxStatisticsRepository;
    use crate::db::{create_test_pool, migrations};
    use crate::models::UserRole;

    async fn setup() -> StatisticsService {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        StatisticsService::new(SqlxStatisticsRepository::boxed(pool), Arc::new(RequestStats::new()))
    }

    fn user(role: UserRole) -> User {
        User::new("u".into(), "u@example.com".into(), "h".into(), role)
    }

    #[tokio::test]
    async fn test_requires_admin() {
        let service = setup().await;
        assert!(matches!(
            service.site_statistics(&user(UserRole::Moderator)).await,
            Err(StatisticsServiceError::Forbidden(_))
        ));
        let stats = service.site_statistics(&user(UserRole::Admin)).await.unwrap();
        assert_eq!(stats.users.total, 0);
        assert!(stats.top_stories.is_empty());
    }

    #[tokio::test]
    async fn test_system_statistics() {
        let service = setup().await;
        service.request_stats().record(2000);
        service.request_stats().record(4000);
        let stats = service.system_statistics(&user(UserRole::Admin)).await.unwrap();
        assert_eq!(stats.total_requests, 2);
        assert!((stats.avg_response_time_ms - 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.version, APP_VERSION);
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(125), "2m");
        assert_eq!(format_uptime(3 * 3600 + 60), "3h 1m");
        assert_eq!(format_uptime(2 * 86400 + 3 * 3600 + 4 * 60), "2d 3h 4m");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }
}
