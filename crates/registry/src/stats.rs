//! Relative transition durations.
//!
//! Every ratio is measured against the longest transition in the same log.
//! An empty log, or one whose longest transition took no time, has nothing
//! to measure against: ratios come back as `None` and callers draw no bar.

use sts_core_types::TransitionRecord;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DurationStats {
    max: Option<f64>,
}

impl DurationStats {
    pub fn from_records(records: &[TransitionRecord]) -> Self {
        Self {
            max: max_duration(records),
        }
    }

    pub fn max_duration(&self) -> Option<f64> {
        self.max
    }

    /// `duration` as a fraction of the longest duration, within `[0, 1]`.
    pub fn ratio(&self, duration: f64) -> Option<f64> {
        let max = self.max.filter(|max| *max > 0.0)?;
        let ratio = duration / max;
        ratio.is_finite().then(|| ratio.clamp(0.0, 1.0))
    }

    pub fn percentage(&self, record: &TransitionRecord) -> Option<f64> {
        self.ratio(record.duration)
    }
}

pub fn max_duration(records: &[TransitionRecord]) -> Option<f64> {
    records.iter().map(|record| record.duration).reduce(f64::max)
}

pub fn percentage(record: &TransitionRecord, records: &[TransitionRecord]) -> Option<f64> {
    DurationStats::from_records(records).percentage(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(durations: &[f64]) -> Vec<TransitionRecord> {
        durations
            .iter()
            .enumerate()
            .map(|(index, duration)| TransitionRecord::completed(format!("s{index}"), *duration))
            .collect()
    }

    #[test]
    fn empty_log_has_no_max() {
        assert_eq!(max_duration(&[]), None);
        assert_eq!(DurationStats::from_records(&[]).ratio(10.0), None);
    }

    #[test]
    fn max_is_largest_duration() {
        let records = log(&[120.0, 4000.0, 35.0]);
        assert_eq!(max_duration(&records), Some(4000.0));
    }

    #[test]
    fn ratios_stay_within_unit_interval() {
        let records = log(&[0.0, 500.0, 2000.0]);
        for record in &records {
            let ratio = percentage(record, &records).unwrap();
            assert!((0.0..=1.0).contains(&ratio), "{ratio}");
        }
        assert_eq!(percentage(&records[1], &records), Some(0.25));
        assert_eq!(percentage(&records[2], &records), Some(1.0));
    }

    #[test]
    fn all_zero_durations_render_nothing() {
        let records = log(&[0.0, 0.0]);
        assert_eq!(max_duration(&records), Some(0.0));
        assert_eq!(percentage(&records[0], &records), None);
    }

    #[test]
    fn outside_record_is_clamped() {
        let stats = DurationStats::from_records(&log(&[100.0]));
        assert_eq!(stats.ratio(250.0), Some(1.0));
    }
}
