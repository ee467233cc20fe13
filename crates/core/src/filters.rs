use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::channels::Predicate;
use crate::models::{GaugeId, Measurement, StringSet};

/// 只接受指定测站代码的测量值
#[derive(Debug, Clone)]
pub struct CodesFilter {
    pub codes: StringSet,
}

impl CodesFilter {
    pub fn new(codes: StringSet) -> Self {
        Self { codes }
    }
}

impl Predicate<Measurement> for CodesFilter {
    fn name(&self) -> &str {
        "codes"
    }

    fn accept(&self, item: &Measurement) -> bool {
        self.codes.contains(item.code())
    }
}

/// 只接受比已知最新值更新的测量值
///
/// 缓存中有该测站的最新值时, 时间必须严格晚于它; 否则必须严格晚于 `after`.
/// 时间相等的测量值会被拒绝.
#[derive(Debug, Clone)]
pub struct LatestFilter {
    pub latest: HashMap<GaugeId, Measurement>,
    pub after: DateTime<Utc>,
}

impl LatestFilter {
    pub fn new(latest: HashMap<GaugeId, Measurement>, after: DateTime<Utc>) -> Self {
        Self { latest, after }
    }
}

impl Predicate<Measurement> for LatestFilter {
    fn name(&self) -> &str {
        "latest"
    }

    fn accept(&self, item: &Measurement) -> bool {
        match self.latest.get(&item.gauge_id) {
            Some(known) => item.timestamp > known.timestamp,
            None => item.timestamp > self.after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn measurement(code: &str, timestamp: DateTime<Utc>) -> Measurement {
        Measurement::new(GaugeId::new("s", code), timestamp, Some(1.0), None)
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_codes_filter() {
        let filter = CodesFilter::new(["g001", "g002"].into_iter().collect());
        assert!(filter.accept(&measurement("g001", base())));
        assert!(!filter.accept(&measurement("g003", base())));
    }

    #[test]
    fn test_latest_filter_with_cached_value() {
        let cached = measurement("g001", base());
        let latest = HashMap::from([(cached.gauge_id.clone(), cached)]);
        let filter = LatestFilter::new(latest, base() - Duration::days(30));

        assert!(!filter.accept(&measurement("g001", base())), "equal timestamp must be rejected");
        assert!(!filter.accept(&measurement("g001", base() - Duration::seconds(1))));
        assert!(filter.accept(&measurement("g001", base() + Duration::seconds(1))));
    }

    #[test]
    fn test_latest_filter_uses_horizon_without_cache() {
        let after = base() - Duration::days(30);
        let filter = LatestFilter::new(HashMap::new(), after);

        assert!(!filter.accept(&measurement("g001", after - Duration::hours(1))));
        assert!(!filter.accept(&measurement("g001", after)));
        assert!(filter.accept(&measurement("g001", after + Duration::hours(1))));
    }

    #[test]
    fn test_latest_filter_is_per_gauge() {
        let cached = measurement("g001", base());
        let latest = HashMap::from([(cached.gauge_id.clone(), cached)]);
        let filter = LatestFilter::new(latest, base() - Duration::days(30));

        // g002 has no cached value, so only the horizon applies
        assert!(filter.accept(&measurement("g002", base() - Duration::days(1))));
    }
}
