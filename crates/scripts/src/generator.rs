//! 内置测试脚本使用的随机测站和测量值

use chrono::Utc;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use harvester_core::{Gauge, GaugeId, Location, Measurement};

/// 第 `index` 个测站的代码, 例如 `g007`
pub fn gauge_code(index: usize) -> String {
    format!("g{index:03}")
}

pub fn random_gauge(script: &str, index: usize) -> Gauge {
    let mut rng = rand::rng();
    Gauge {
        id: GaugeId::new(script, gauge_code(index)),
        name: format!("Test gauge #{index}"),
        url: Some(format!("http://example.com/gauges/{index}")),
        level_unit: Some("m".to_string()),
        flow_unit: Some("m3/s".to_string()),
        location: Some(Location {
            latitude: rng.random::<f64>() * 180.0 - 90.0,
            longitude: rng.random::<f64>() * 360.0 - 180.0,
            altitude: rng.random::<f64>() * 3000.0,
        }),
    }
}

/// 当前时刻的测量值
///
/// 指定 `value` 时水位和流量都取该值, 否则在 `[min, max]` 区间内随机取值.
/// 区间为空时使用宽度 100.
pub fn random_measurement(
    script: &str,
    code: &str,
    value: Option<f64>,
    min: f64,
    max: f64,
) -> Measurement {
    let (level, flow) = match value {
        Some(v) => (v, v),
        None => {
            let mut rng = rand::rng();
            let mut delta = (max - min).abs();
            if delta == 0.0 {
                delta = 100.0;
            }
            (
                min + rng.random::<f64>() * delta,
                min + rng.random::<f64>() * delta,
            )
        }
    };
    Measurement::new(
        GaugeId::new(script, code),
        Utc::now(),
        Some(level),
        Some(flow),
    )
}

/// 依次发送, 上下文取消或接收端关闭时返回 false
pub async fn send_all(
    ctx: &CancellationToken,
    values: &mpsc::Sender<Measurement>,
    items: Vec<Measurement>,
) -> bool {
    for m in items {
        tokio::select! {
            _ = ctx.cancelled() => return false,
            sent = values.send(m) => {
                if sent.is_err() {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_value() {
        let m = random_measurement("s", "g001", Some(7.5), 10.0, 20.0);
        assert_eq!(m.level, Some(7.5));
        assert_eq!(m.flow, Some(7.5));
        assert_eq!(m.code(), "g001");
    }

    #[test]
    fn test_random_range() {
        for _ in 0..100 {
            let m = random_measurement("s", "g001", None, 10.0, 20.0);
            let level = m.level.unwrap();
            assert!((10.0..=20.0).contains(&level), "{level}");
        }
        let m = random_measurement("s", "g001", None, 5.0, 5.0);
        assert!((5.0..=105.0).contains(&m.flow.unwrap()));
    }

    #[test]
    fn test_random_gauge() {
        let gauge = random_gauge("all_at_once", 7);
        assert_eq!(gauge.id.code, "g007");
        let location = gauge.location.unwrap();
        assert!((-90.0..=90.0).contains(&location.latitude));
        assert!((-180.0..=180.0).contains(&location.longitude));
    }
}
