//! The merged per-read table behind the run QC plots
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::info;

use crate::config::defs::{
    EVENTS_RATIO_THRESHOLD, PASS_QSCORE_THRESHOLD, READ_LENGTH_MAX_QUANTILE, STATS_PERCENTILES,
    TIME_MAX_QUANTILE, TIME_MIN_QUANTILE,
};
use crate::utils::fastx::FastqMeta;
use crate::utils::stats::{bases_to_human, compute_nx, describe, quantile, with_thousands, Description};
use crate::utils::summary::SummaryRow;


#[derive(Debug, Clone, PartialEq)]
pub struct ReadRecord {
    pub read_id: String,
    pub run_id: String,
    pub sample_id: String,
    pub channel: u32,
    pub read: u64,
    pub start_time_float: f64,
    pub template_time_float: f64,
    pub template_duration: f64,
    pub num_events: Option<u64>,
    pub sequence_length_template: u64,
    pub mean_qscore_template: f64,
    pub start_time_utc: DateTime<Utc>,

    pub pass: bool,
    pub pore_speed: Option<f64>,
    pub events_ratio: Option<f64>,
    pub start_time_float_by_sample: f64,

    pub read_count: u64,
    pub yield_bases: u64,
    pub channel_yield: u64,
    pub quality_yield: u64,
    pub quality_count: u64,
}

impl ReadRecord {
    fn from_parts(row: SummaryRow, meta: FastqMeta) -> Self {
        let pass = row.mean_qscore_template > PASS_QSCORE_THRESHOLD;
        let pore_speed = if row.template_duration == 0.0 {
            None
        } else {
            Some(row.sequence_length_template as f64 / row.template_duration)
        };
        let events_ratio = match row.num_events {
            Some(events) if row.sequence_length_template > 0 => {
                Some(events as f64 / row.sequence_length_template as f64)
            }
            _ => None,
        };
        ReadRecord {
            read_id: row.read_id,
            run_id: row.run_id,
            sample_id: meta.sample_id,
            channel: row.channel,
            read: meta.read,
            start_time_float: row.start_time,
            template_time_float: row.template_start,
            template_duration: row.template_duration,
            num_events: row.num_events,
            sequence_length_template: row.sequence_length_template,
            mean_qscore_template: row.mean_qscore_template,
            start_time_utc: meta.start_time_utc,
            pass,
            pore_speed,
            events_ratio,
            start_time_float_by_sample: 0.0,
            read_count: 0,
            yield_bases: 0,
            channel_yield: 0,
            quality_yield: 0,
            quality_count: 0,
        }
    }

    pub fn qualitative_pass(&self) -> &'static str {
        if self.pass { "Passed" } else { "Failed" }
    }
}


/// Inner join of summary rows and FASTQ header metadata on (read_id, run_id, channel).
pub fn merge_datasets(summary: Vec<SummaryRow>, fastq: Vec<FastqMeta>) -> Vec<ReadRecord> {
    let mut by_key: HashMap<(String, String, u32), FastqMeta> = HashMap::with_capacity(fastq.len());
    for meta in fastq {
        by_key.insert((meta.read_id.clone(), meta.run_id.clone(), meta.channel), meta);
    }
    summary
        .into_iter()
        .filter_map(|row| {
            let key = (row.read_id.clone(), row.run_id.clone(), row.channel);
            by_key.remove(&key).map(|meta| ReadRecord::from_parts(row, meta))
        })
        .collect()
}

/// Seconds since the sample's first read, from the FASTQ UTC start times, which
/// survive MinKNOW restarts. Sorts the records by it.
pub fn convert_sample_time_columns(records: &mut Vec<ReadRecord>) {
    let Some(min_start) = records.iter().map(|r| r.start_time_utc).min() else {
        return;
    };
    for record in records.iter_mut() {
        let delta = record.start_time_utc - min_start;
        record.start_time_float_by_sample = delta.num_milliseconds() as f64 / 1000.0;
    }
    records.sort_by(|a, b| a.start_time_float_by_sample.total_cmp(&b.start_time_float_by_sample));
}


/// Which trimming filters excluded a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Exclusion {
    pub time: bool,
    pub events_ratio: bool,
    pub length: bool,
}

impl Exclusion {
    pub fn any(&self) -> bool {
        self.time || self.events_ratio || self.length
    }

    pub fn label(&self) -> String {
        let mut parts = Vec::new();
        if self.time {
            parts.push("Time");
        }
        if self.events_ratio {
            parts.push("Events Ratio");
        }
        if self.length {
            parts.push("Max Read Length");
        }
        parts.join(" + ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrimReport {
    pub before: usize,
    pub after: usize,
    pub exclusions: HashMap<Exclusion, usize>,
}

/// Drops outliers that make the plots unreadable: the longest 0.5% of reads,
/// reads with an events ratio of 10 or more (or none), and the earliest/latest
/// 0.1% by time.
pub fn trim_dataset(records: Vec<ReadRecord>) -> (Vec<ReadRecord>, TrimReport) {
    info!("Filtering dataset to make plots nice");
    info!("Starting with {} reads", records.len());

    let lengths: Vec<f64> = records.iter().map(|r| r.sequence_length_template as f64).collect();
    let times: Vec<f64> = records.iter().map(|r| r.start_time_float_by_sample).collect();
    let max_length = quantile(&lengths, READ_LENGTH_MAX_QUANTILE);
    let min_time = quantile(&times, TIME_MIN_QUANTILE);
    let max_time = quantile(&times, TIME_MAX_QUANTILE);

    let mut report = TrimReport { before: records.len(), ..Default::default() };
    let kept: Vec<ReadRecord> = records
        .into_iter()
        .filter(|r| {
            let t = r.start_time_float_by_sample;
            let exclusion = Exclusion {
                time: !(t > min_time && t < max_time),
                events_ratio: !r.events_ratio.map(|e| e < EVENTS_RATIO_THRESHOLD).unwrap_or(false),
                length: !((r.sequence_length_template as f64) < max_length),
            };
            if exclusion.any() {
                *report.exclusions.entry(exclusion).or_insert(0) += 1;
                false
            } else {
                true
            }
        })
        .collect();
    report.after = kept.len();
    info!("Finished filtering with {} reads", kept.len());
    (kept, report)
}


/// Fills the cumulative columns. Records must already be in time order.
pub fn annotate_cumulative(records: &mut [ReadRecord]) {
    let mut total_yield = 0u64;
    let mut channel_yield: HashMap<u32, u64> = HashMap::new();
    let mut quality_yield: HashMap<bool, u64> = HashMap::new();
    let mut quality_count: HashMap<bool, u64> = HashMap::new();

    for (i, record) in records.iter_mut().enumerate() {
        let length = record.sequence_length_template;
        total_yield += length;
        record.read_count = i as u64 + 1;
        record.yield_bases = total_yield;

        let cy = channel_yield.entry(record.channel).or_insert(0);
        *cy += length;
        record.channel_yield = *cy;

        let qy = quality_yield.entry(record.pass).or_insert(0);
        *qy += length;
        record.quality_yield = *qy;

        let qc = quality_count.entry(record.pass).or_insert(0);
        *qc += 1;
        record.quality_count = *qc;
    }
}

/// Sample IDs in first-seen order.
pub fn sample_names(records: &[ReadRecord]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for record in records {
        if !names.contains(&record.sample_id) {
            names.push(record.sample_id.clone());
        }
    }
    names
}


fn description_lines(description: &Description) -> String {
    description
        .rows
        .iter()
        .map(|(label, value)| format!("\t{:<8}\t{:21.2}\n", label, value))
        .collect()
}

/// `1,234.5`
fn with_thousands_f64(value: f64) -> String {
    let formatted = format!("{:.1}", value.max(0.0));
    match formatted.split_once('.') {
        Some((whole, fraction)) => {
            let whole = whole.parse::<u64>().map(with_thousands).unwrap_or_else(|_| whole.to_string());
            format!("{}.{}", whole, fraction)
        }
        None => formatted,
    }
}

/// Summary statistics block for a dataset, as appended to `<name>.<stage>.stats.txt`.
pub fn stats_report(records: &[ReadRecord]) -> String {
    let lengths: Vec<u64> = records.iter().map(|r| r.sequence_length_template).collect();
    let lengths_f: Vec<f64> = lengths.iter().map(|l| *l as f64).collect();
    let qualities: Vec<f64> = records.iter().map(|r| r.mean_qscore_template).collect();
    let total_bp: u64 = lengths.iter().sum();

    let mut out = String::new();
    out.push_str(&format!("# Stats for sample '{}' #\n", sample_names(records).join(", ")));
    out.push_str("Total basepairs:\n");
    out.push_str(&format!(
        "\t{:>16}\t|\t{:>9}\n",
        with_thousands(total_bp),
        bases_to_human(total_bp as f64)
    ));
    out.push_str("Description of Read Lengths:\n");
    out.push_str(&description_lines(&describe(&lengths_f, &STATS_PERCENTILES)));
    out.push_str("Description of Read Qualities:\n");
    out.push_str(&description_lines(&describe(&qualities, &STATS_PERCENTILES)));

    out.push_str("NX values:\n");
    for fraction in STATS_PERCENTILES {
        let nx = compute_nx(&lengths, fraction);
        out.push_str(&format!(
            "\tN{:02.0}:\t{:>8}\t|\t{:>9}\n",
            fraction * 100.0,
            with_thousands(nx),
            bases_to_human(nx as f64)
        ));
    }

    let duration = records
        .iter()
        .map(|r| r.start_time_float_by_sample)
        .fold(0.0, f64::max);
    let total_seconds = duration as u64;
    out.push_str(&format!(
        "\t{:>8} seconds\t|\t{} hours, {} minutes, {} seconds\n",
        with_thousands_f64(duration),
        total_seconds / 3600,
        (total_seconds % 3600) / 60,
        total_seconds % 60
    ));
    out
}


#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn record(read_id: &str, channel: u32, length: u64, qscore: f64, seconds: i64) -> ReadRecord {
        let row = SummaryRow {
            read_id: read_id.to_string(),
            run_id: "run1".to_string(),
            channel,
            start_time: seconds as f64,
            duration: 1.0,
            num_events: Some(length * 2),
            template_start: seconds as f64,
            template_duration: 2.0,
            sequence_length_template: length,
            mean_qscore_template: qscore,
        };
        let meta = FastqMeta {
            read_id: read_id.to_string(),
            run_id: "run1".to_string(),
            sample_id: "sample".to_string(),
            read: 1,
            channel,
            start_time_utc: Utc.with_ymd_and_hms(2018, 6, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(seconds),
        };
        ReadRecord::from_parts(row, meta)
    }

    #[test]
    fn test_derived_columns() {
        let r = record("a", 1, 100, 9.5, 0);
        assert!(r.pass);
        assert_eq!(r.qualitative_pass(), "Passed");
        assert_eq!(r.pore_speed, Some(50.0));
        assert_eq!(r.events_ratio, Some(2.0));

        let r = record("b", 1, 0, 9.0, 0);
        assert!(!r.pass);
        assert_eq!(r.events_ratio, None);
    }

    #[test]
    fn test_merge_is_inner_join_on_read_run_channel() {
        let a = record("a", 1, 10, 10.0, 0);
        let summary = vec![
            SummaryRow {
                read_id: "a".into(), run_id: "run1".into(), channel: 1, start_time: 0.0, duration: 1.0,
                num_events: None, template_start: 0.0, template_duration: 1.0,
                sequence_length_template: 10, mean_qscore_template: 10.0,
            },
            SummaryRow {
                read_id: "b".into(), run_id: "run1".into(), channel: 2, start_time: 0.0, duration: 1.0,
                num_events: None, template_start: 0.0, template_duration: 1.0,
                sequence_length_template: 10, mean_qscore_template: 10.0,
            },
        ];
        let fastq = vec![
            FastqMeta {
                read_id: "a".into(), run_id: "run1".into(), sample_id: "s".into(), read: 1, channel: 1,
                start_time_utc: a.start_time_utc,
            },
            FastqMeta {
                read_id: "b".into(), run_id: "run1".into(), sample_id: "s".into(), read: 2, channel: 3,
                start_time_utc: a.start_time_utc,
            },
        ];
        let merged = merge_datasets(summary, fastq);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].read_id, "a");
        assert_eq!(merged[0].sample_id, "s");
    }

    #[test]
    fn test_convert_sample_time_columns_sorts() {
        let mut records = vec![record("late", 1, 10, 10.0, 90), record("early", 1, 10, 10.0, 30)];
        convert_sample_time_columns(&mut records);
        assert_eq!(records[0].read_id, "early");
        assert_eq!(records[0].start_time_float_by_sample, 0.0);
        assert_eq!(records[1].start_time_float_by_sample, 60.0);
    }

    #[test]
    fn test_annotate_cumulative() {
        let mut records = vec![
            record("a", 1, 100, 12.0, 0),
            record("b", 2, 50, 5.0, 1),
            record("c", 1, 25, 12.0, 2),
        ];
        annotate_cumulative(&mut records);
        let rc: Vec<u64> = records.iter().map(|r| r.read_count).collect();
        let y: Vec<u64> = records.iter().map(|r| r.yield_bases).collect();
        let cy: Vec<u64> = records.iter().map(|r| r.channel_yield).collect();
        let qy: Vec<u64> = records.iter().map(|r| r.quality_yield).collect();
        let qc: Vec<u64> = records.iter().map(|r| r.quality_count).collect();
        assert_eq!(rc, vec![1, 2, 3]);
        assert_eq!(y, vec![100, 150, 175]);
        assert_eq!(cy, vec![100, 50, 125]);
        assert_eq!(qy, vec![100, 50, 125]);
        assert_eq!(qc, vec![1, 1, 2]);
    }

    #[test]
    fn test_trim_dataset_drops_outliers() {
        let mut records: Vec<ReadRecord> = (0..1000)
            .map(|i| record(&format!("r{}", i), 1, 1000 + i as u64, 10.0, i))
            .collect();
        // an events ratio far above the threshold
        records[500].num_events = Some(records[500].sequence_length_template * 20);
        records[500].events_ratio = Some(20.0);
        convert_sample_time_columns(&mut records);

        let (kept, report) = trim_dataset(records);
        assert_eq!(report.before, 1000);
        assert_eq!(report.after, kept.len());
        assert!(kept.iter().all(|r| r.read_id != "r500"));
        // first and last reads by time are gone, as are the longest
        assert!(kept.iter().all(|r| r.read_id != "r0" && r.read_id != "r999"));
        let excluded: usize = report.exclusions.values().sum();
        assert_eq!(excluded, report.before - report.after);
        assert!(report.exclusions.keys().all(|e| e.any()));
    }

    #[test]
    fn test_sample_names_first_seen_order() {
        let mut a = record("a", 1, 1, 1.0, 0);
        let mut b = record("b", 1, 1, 1.0, 0);
        a.sample_id = "y".into();
        b.sample_id = "x".into();
        let c = a.clone();
        assert_eq!(sample_names(&[a, b, c]), vec!["y".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_stats_report() {
        let mut records = vec![
            record("a", 1, 1000, 12.0, 0),
            record("b", 2, 3000, 8.0, 3725),
        ];
        convert_sample_time_columns(&mut records);
        let report = stats_report(&records);
        assert!(report.starts_with("# Stats for sample 'sample' #\n"));
        assert!(report.contains("Total basepairs:\n\t           4,000\t|\t     4 Kb\n"));
        assert!(report.contains("\tcount   \t"));
        assert!(report.contains("\tN50:\t   3,000\t|\t     3 Kb\n"));
        assert!(report.contains("3,725.0 seconds\t|\t1 hours, 2 minutes, 5 seconds"));
    }
}
