//! 采集指标收集模块
//!
//! 记录同步点、失步、缓冲区交换与每次采集的结果。

use std::collections::BTreeMap;
use std::time::Duration;

use contracts::{CaptureError, DeviceId, SyncLoss};
use metrics::{counter, gauge, histogram};

/// 记录一个同步点
///
/// 每次帧集通过同步测试、回调即将被调用时调用。
pub fn record_sync_point(device_count: usize, spread: Duration) {
    counter!("multi_gee_sync_points_total").increment(1);
    histogram!("multi_gee_sync_spread_ms").record(spread.as_secs_f64() * 1000.0);
    gauge!("multi_gee_sync_devices").set(device_count as f64);
}

/// 记录失步
pub fn record_sync_loss(loss: &SyncLoss) {
    counter!("multi_gee_sync_lost_total", "reason" => loss.reason()).increment(1);
}

/// 记录一次缓冲区交换
pub fn record_frame_swapped(device: DeviceId) {
    counter!(
        "multi_gee_frames_swapped_total",
        "device_id" => device.to_string()
    )
    .increment(1);
}

/// 记录一次设备注册
pub fn record_registration() {
    counter!("multi_gee_registrations_total").increment(1);
}

/// 记录已注册设备数
pub fn record_device_count(count: usize) {
    gauge!("multi_gee_devices_registered").set(count as f64);
}

/// 记录一次采集的结果
pub fn record_capture_result(result: &Result<u32, CaptureError>) {
    match result {
        Ok(frames) => {
            counter!("multi_gee_captures_total", "outcome" => "completed").increment(1);
            histogram!("multi_gee_capture_frames").record(*frames as f64);
        }
        Err(e) => {
            counter!("multi_gee_captures_total", "outcome" => e.outcome()).increment(1);
        }
    }
}

/// 采集指标聚合器
///
/// 在内存中聚合多次采集的统计，便于输出摘要。
#[derive(Debug, Clone, Default)]
pub struct CaptureStatsAggregator {
    /// 采集次数
    pub runs: u64,

    /// 成功完成的采集次数
    pub completed_runs: u64,

    /// 同步帧总数
    pub total_frames: u64,

    /// 各结果出现次数
    pub outcomes: BTreeMap<&'static str, u64>,

    /// 同步点时间戳离散度 (毫秒)
    pub spread_stats: RunningStats,

    /// 单次采集耗时 (毫秒)
    pub duration_stats: RunningStats,

    /// 超出理论帧时间的额外耗时 (毫秒)
    pub overhead_stats: RunningStats,
}

impl CaptureStatsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一个同步点的离散度
    pub fn record_sync_point(&mut self, spread: Duration) {
        self.spread_stats.push(spread.as_secs_f64() * 1000.0);
    }

    /// 记录一次采集
    ///
    /// `expected` 为按帧周期计算的理论耗时。
    pub fn record_run(
        &mut self,
        result: &Result<u32, CaptureError>,
        elapsed: Duration,
        expected: Duration,
    ) {
        self.runs += 1;
        let outcome = match result {
            Ok(frames) => {
                self.completed_runs += 1;
                self.total_frames += u64::from(*frames);
                "completed"
            }
            Err(e) => e.outcome(),
        };
        *self.outcomes.entry(outcome).or_insert(0) += 1;

        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.duration_stats.push(elapsed_ms);
        self.overhead_stats
            .push(elapsed_ms - expected.as_secs_f64() * 1000.0);
    }

    /// 生成摘要报告
    pub fn summary(&self) -> CaptureSummary {
        CaptureSummary {
            runs: self.runs,
            completed_runs: self.completed_runs,
            total_frames: self.total_frames,
            completion_rate: if self.runs > 0 {
                self.completed_runs as f64 / self.runs as f64 * 100.0
            } else {
                0.0
            },
            outcomes: self.outcomes.clone(),
            spread_ms: StatsSummary::from(&self.spread_stats),
            duration_ms: StatsSummary::from(&self.duration_stats),
            overhead_ms: StatsSummary::from(&self.overhead_stats),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct CaptureSummary {
    pub runs: u64,
    pub completed_runs: u64,
    pub total_frames: u64,
    pub completion_rate: f64,
    pub outcomes: BTreeMap<&'static str, u64>,
    pub spread_ms: StatsSummary,
    pub duration_ms: StatsSummary,
    pub overhead_ms: StatsSummary,
}

impl std::fmt::Display for CaptureSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Capture Summary ===")?;
        writeln!(
            f,
            "Runs: {} ({} completed, {:.2}%)",
            self.runs, self.completed_runs, self.completion_rate
        )?;
        writeln!(f, "Synced frames: {}", self.total_frames)?;
        writeln!(f, "Sync spread (ms): {}", self.spread_ms)?;
        writeln!(f, "Run duration (ms): {}", self.duration_ms)?;
        writeln!(f, "Overhead (ms): {}", self.overhead_ms)?;

        if !self.outcomes.is_empty() {
            writeln!(f, "Outcomes:")?;
            for (outcome, count) in &self.outcomes {
                writeln!(f, "  {}: {}", outcome, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }
}
