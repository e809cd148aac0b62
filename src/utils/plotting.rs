//! PNG run QC plots drawn with plotters
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use log::{info, warn};
use plotters::prelude::*;
use plotters::style::HSLColor;
use rand::rngs::StdRng;
use rand::seq::index::sample;

use crate::utils::dataset::{ReadRecord, TrimReport};
use crate::utils::stats::{bases_to_human, count_to_human, mean, pearson, quantile, seconds_to_hhmm};

const FONT: &str = "sans-serif";
const PLOT_SIZE: (u32, u32) = (1000, 700);
const HIST_BINS: usize = 50;
const MEAN_TIME_BINS: usize = 10;
const QSCORE_TIME_SPLITS: usize = 16;
const QSCORE_DENSITY_BINS: usize = 40;
const DENSITY_BINS: usize = 50;
const PAIR_PLOT_SAMPLE_SIZE: usize = 10_000;
const PAIR_PLOT_EVENTS_RATIO_MAX: f64 = 5.0;
const UNWEIGHTED_HIST_QUANTILE: f64 = 0.99;
const LENGTH_VS_QSCORE_QUANTILE: f64 = 0.98;
const ROBUST_QUANTILES: (f64, f64) = (0.02, 0.98);

// PromethION flowcell: 12 blocks of 10 wells across, 25 rows down
const CHANNEL_WIDTH: usize = 10;
const CHANNEL_ROWS: usize = 25;
const CHANNEL_BLOCKS: usize = 12;
const FLOWCELL_SEPARATORS: [i32; 3] = [30, 60, 90];

const ALL_COLOUR: RGBColor = BLUE;
const PASSED_COLOUR: RGBColor = RGBColor(46, 139, 87);
const FAILED_COLOUR: RGBColor = RGBColor(200, 50, 50);


/// `<plots_dir>/<name>.<suffix>.png`
pub fn plot_path(plots_dir: &Path, name: &str, suffix: &str) -> PathBuf {
    plots_dir.join(format!("{}.{}.png", name, suffix))
}

fn axis_max<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let max = values.into_iter().filter(|v| v.is_finite()).fold(0.0, f64::max);
    if max > 0.0 { max } else { 1.0 }
}

/// (min, max) of `values`, widened when the range is empty or flat.
pub fn value_range(values: &[f64]) -> (f64, f64) {
    let finite = values.iter().copied().filter(|v| v.is_finite());
    let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    if hi <= lo { (lo - 0.5, hi + 0.5) } else { (lo, hi) }
}

/// Colour limits that ignore the extreme 2% at either end.
pub fn robust_range(values: &[f64]) -> (f64, f64) {
    let lo = quantile(values, ROBUST_QUANTILES.0);
    let hi = quantile(values, ROBUST_QUANTILES.1);
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if hi <= lo { (lo, lo + 1.0) } else { (lo, hi) }
}


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistBin {
    pub start: f64,
    pub end: f64,
    pub height: f64,
}

/// Equal-width histogram over [lo, hi]. Values outside the range are dropped,
/// `hi` itself lands in the last bin.
pub fn histogram(values: &[f64], weights: Option<&[f64]>, bins: usize, lo: f64, hi: f64) -> Vec<HistBin> {
    let bins = bins.max(1);
    let width = (hi - lo) / bins as f64;
    let mut heights = vec![0.0; bins];
    for (i, value) in values.iter().enumerate() {
        if !value.is_finite() || *value < lo || *value > hi || width <= 0.0 {
            continue;
        }
        let index = (((value - lo) / width) as usize).min(bins - 1);
        heights[index] += weights.map(|w| w[i]).unwrap_or(1.0);
    }
    heights
        .into_iter()
        .enumerate()
        .map(|(i, height)| HistBin {
            start: lo + width * i as f64,
            end: lo + width * (i + 1) as f64,
            height,
        })
        .collect()
}

/// Mean y of the points in each of `bins` equal x intervals over [lo, hi], as
/// (bin centre, mean). Empty bins are left out.
pub fn bin_means(points: &[(f64, f64)], bins: usize, lo: f64, hi: f64) -> Vec<(f64, f64)> {
    let bins = bins.max(1);
    let width = (hi - lo) / bins as f64;
    if width <= 0.0 {
        return Vec::new();
    }
    let mut sums = vec![(0.0, 0usize); bins];
    for (x, y) in points {
        if *x < lo || *x > hi {
            continue;
        }
        let index = (((x - lo) / width) as usize).min(bins - 1);
        sums[index].0 += y;
        sums[index].1 += 1;
    }
    sums.into_iter()
        .enumerate()
        .filter(|(_, (_, n))| *n > 0)
        .map(|(i, (sum, n))| (lo + width * (i as f64 + 0.5), sum / n as f64))
        .collect()
}

/// Point counts on a `bins` x `bins` grid, indexed `[x bin][y bin]`.
pub fn density_grid(points: &[(f64, f64)], bins: usize, x_range: (f64, f64), y_range: (f64, f64)) -> Vec<Vec<u32>> {
    let bins = bins.max(1);
    let mut grid = vec![vec![0u32; bins]; bins];
    let dx = (x_range.1 - x_range.0) / bins as f64;
    let dy = (y_range.1 - y_range.0) / bins as f64;
    if dx <= 0.0 || dy <= 0.0 {
        return grid;
    }
    for (x, y) in points {
        if *x < x_range.0 || *x > x_range.1 || *y < y_range.0 || *y > y_range.1 {
            continue;
        }
        let i = (((x - x_range.0) / dx) as usize).min(bins - 1);
        let j = (((y - y_range.0) / dy) as usize).min(bins - 1);
        grid[i][j] += 1;
    }
    grid
}


/// (row, column) of a channel on the PromethION map. Channels are numbered down
/// each 10-well block, row by row, block by block.
pub fn channel_grid_position(channel: u32) -> Option<(usize, usize)> {
    let per_block = CHANNEL_WIDTH * CHANNEL_ROWS;
    if channel == 0 || channel as usize > per_block * CHANNEL_BLOCKS {
        return None;
    }
    let index = channel as usize - 1;
    let block = index / per_block;
    let within = index % per_block;
    Some((within / CHANNEL_WIDTH, block * CHANNEL_WIDTH + within % CHANNEL_WIDTH))
}

/// Final yield of every channel laid out as the flowcell, 25 rows by 120 columns.
pub fn flowcell_yield_grid(records: &[ReadRecord]) -> Vec<Vec<f64>> {
    let mut grid: Vec<Vec<f64>> = vec![vec![0.0; CHANNEL_WIDTH * CHANNEL_BLOCKS]; CHANNEL_ROWS];
    for record in records {
        if let Some((row, col)) = channel_grid_position(record.channel) {
            let cell = &mut grid[row][col];
            *cell = cell.max(record.channel_yield as f64);
        }
    }
    grid
}


#[derive(Debug, Clone, PartialEq)]
pub struct TimeSplit {
    pub label: String,
    pub qscores: Vec<f64>,
}

/// Splits the reads into `bins` equal time windows, labelled `HH:MM - HH:MM`.
pub fn time_splits(records: &[ReadRecord], bins: usize) -> Vec<TimeSplit> {
    let times: Vec<f64> = records.iter().map(|r| r.start_time_float_by_sample).collect();
    let (lo, hi) = value_range(&times);
    let bins = bins.max(1);
    let width = (hi - lo) / bins as f64;
    let mut splits: Vec<TimeSplit> = (0..bins)
        .map(|i| TimeSplit {
            label: format!(
                "{} - {}",
                seconds_to_hhmm((lo + width * i as f64).max(0.0)),
                seconds_to_hhmm((lo + width * (i + 1) as f64).min(hi))
            ),
            qscores: Vec::new(),
        })
        .collect();
    for record in records {
        let index = (((record.start_time_float_by_sample - lo) / width) as usize).min(bins - 1);
        splits[index].qscores.push(record.mean_qscore_template);
    }
    splits
}

/// Exclusion combinations, most frequent first.
pub fn exclusion_counts(report: &TrimReport) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = report
        .exclusions
        .iter()
        .map(|(exclusion, count)| (exclusion.label(), *count))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counts
}

/// [qscore, pore speed, length, events ratio] for up to 10 000 reads with an
/// events ratio below 5, in dataset order.
pub fn pair_plot_sample(records: &[ReadRecord], rng: &mut StdRng) -> Vec<[f64; 4]> {
    let eligible: Vec<[f64; 4]> = records
        .iter()
        .filter_map(|r| {
            let events_ratio = r.events_ratio.filter(|e| *e < PAIR_PLOT_EVENTS_RATIO_MAX)?;
            let speed = r.pore_speed?;
            Some([r.mean_qscore_template, speed, r.sequence_length_template as f64, events_ratio])
        })
        .collect();
    if eligible.len() <= PAIR_PLOT_SAMPLE_SIZE {
        return eligible;
    }
    let mut picked = sample(rng, eligible.len(), PAIR_PLOT_SAMPLE_SIZE).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| eligible[i]).collect()
}


fn lerp_colour(from: RGBColor, to: RGBColor, t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    RGBColor(mix(from.0, to.0), mix(from.1, to.1), mix(from.2, to.2))
}

/// Blue through pale grey to green.
fn diverging_colour(t: f64) -> RGBColor {
    let low = RGBColor(58, 118, 175);
    let mid = RGBColor(242, 242, 242);
    let high = RGBColor(56, 142, 60);
    if t < 0.5 { lerp_colour(low, mid, t * 2.0) } else { lerp_colour(mid, high, (t - 0.5) * 2.0) }
}

fn density_colour(t: f64) -> RGBColor {
    lerp_colour(RGBColor(235, 241, 250), RGBColor(8, 48, 107), t.sqrt())
}

fn scale(value: f64, lo: f64, hi: f64) -> f64 {
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}


struct Series<'a> {
    label: &'static str,
    colour: RGBColor,
    points: &'a [(f64, f64)],
}

fn draw_cumulative(path: &Path, title: &str, y_desc: &str, series: &[Series], y_formatter: fn(f64) -> String) -> Result<()> {
    let x_max = axis_max(series.iter().flat_map(|s| s.points.iter().map(|p| p.0)));
    let y_max = axis_max(series.iter().flat_map(|s| s.points.iter().map(|p| p.1)));

    let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(0f64..x_max, 0f64..y_max * 1.05)?;

    chart
        .configure_mesh()
        .x_desc("Time in (HH:MM)")
        .y_desc(y_desc)
        .x_label_formatter(&|x| seconds_to_hhmm(*x))
        .y_label_formatter(&|y| y_formatter(*y))
        .draw()?;

    for s in series {
        let colour = s.colour;
        chart
            .draw_series(LineSeries::new(s.points.iter().copied(), colour.stroke_width(2)))?
            .label(s.label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], colour.stroke_width(2)));
    }
    if series.len() > 1 {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperLeft)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()?;
    }
    root.present()?;
    Ok(())
}

fn time_series<F: Fn(&ReadRecord) -> f64>(records: &[ReadRecord], pass: Option<bool>, value: F) -> Vec<(f64, f64)> {
    records
        .iter()
        .filter(|r| pass.map(|p| r.pass == p).unwrap_or(true))
        .map(|r| (r.start_time_float_by_sample, value(r)))
        .collect()
}

pub fn plot_yield(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    let points = time_series(records, None, |r| r.yield_bases as f64);
    draw_cumulative(
        &plot_path(plots_dir, name, "yield"),
        &format!("Yield over time for {}", name),
        "Cumulative Yield",
        &[Series { label: "All", colour: ALL_COLOUR, points: &points }],
        bases_to_human,
    )
}

pub fn plot_yield_by_quality(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    let all = time_series(records, None, |r| r.yield_bases as f64);
    let passed = time_series(records, Some(true), |r| r.quality_yield as f64);
    let failed = time_series(records, Some(false), |r| r.quality_yield as f64);
    draw_cumulative(
        &plot_path(plots_dir, name, "quality.yield"),
        &format!("Yield over time (by quality) for {}", name),
        "Cumulative Yield",
        &[
            Series { label: "All", colour: ALL_COLOUR, points: &all },
            Series { label: "Passed", colour: PASSED_COLOUR, points: &passed },
            Series { label: "Failed", colour: FAILED_COLOUR, points: &failed },
        ],
        bases_to_human,
    )
}

pub fn plot_reads(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    let points = time_series(records, None, |r| r.read_count as f64);
    draw_cumulative(
        &plot_path(plots_dir, name, "reads"),
        &format!("Read count over time for {}", name),
        "Cumulative read count",
        &[Series { label: "All", colour: ALL_COLOUR, points: &points }],
        count_to_human,
    )
}

pub fn plot_reads_by_quality(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    let all = time_series(records, None, |r| r.read_count as f64);
    let passed = time_series(records, Some(true), |r| r.quality_count as f64);
    let failed = time_series(records, Some(false), |r| r.quality_count as f64);
    draw_cumulative(
        &plot_path(plots_dir, name, "quality.reads"),
        &format!("Read count over time (by quality) for {}", name),
        "Cumulative Read Count",
        &[
            Series { label: "All", colour: ALL_COLOUR, points: &all },
            Series { label: "Passed", colour: PASSED_COLOUR, points: &passed },
            Series { label: "Failed", colour: FAILED_COLOUR, points: &failed },
        ],
        count_to_human,
    )
}


fn draw_histogram(
    path: &Path,
    title: &str,
    x_desc: &str,
    y_desc: &str,
    bins: &[HistBin],
    x_formatter: fn(f64) -> String,
    y_formatter: fn(f64) -> String,
) -> Result<()> {
    let (x_lo, x_hi) = match (bins.first(), bins.last()) {
        (Some(first), Some(last)) => (first.start, last.end),
        _ => return Err(anyhow!("No values for {}", title)),
    };
    let y_max = axis_max(bins.iter().map(|b| b.height));

    let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(x_lo..x_hi, 0f64..y_max * 1.05)?;

    chart
        .configure_mesh()
        .light_line_style(BLACK.mix(0.05))
        .x_desc(x_desc)
        .y_desc(y_desc)
        .x_label_formatter(&|x| x_formatter(*x))
        .y_label_formatter(&|y| y_formatter(*y))
        .draw()?;

    chart.draw_series(bins.iter().map(|b| {
        Rectangle::new([(b.start, 0.0), (b.end, b.height)], ALL_COLOUR.mix(0.6).filled())
    }))?;
    root.present()?;
    Ok(())
}

/// Read length histogram weighted by length, so each bar shows bases.
pub fn plot_weighted_hist(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    let lengths: Vec<f64> = records.iter().map(|r| r.sequence_length_template as f64).collect();
    let bins = histogram(&lengths, Some(&lengths), HIST_BINS, 0.0, axis_max(lengths.iter().copied()));
    draw_histogram(
        &plot_path(plots_dir, name, "weighted.hist"),
        &format!("Read Distribution Graph for {}", name),
        "Read length",
        "Bases per bin",
        &bins,
        bases_to_human,
        bases_to_human,
    )
}

pub fn plot_read_hist(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    let lengths: Vec<f64> = records.iter().map(|r| r.sequence_length_template as f64).collect();
    let max_length = quantile(&lengths, UNWEIGHTED_HIST_QUANTILE);
    let trimmed: Vec<f64> = lengths.into_iter().filter(|l| *l < max_length).collect();
    let bins = histogram(&trimmed, None, HIST_BINS, 0.0, axis_max(trimmed.iter().copied()));
    draw_histogram(
        &plot_path(plots_dir, name, "unweighted.hist"),
        "Read Length Distribution",
        "Read Length",
        "Reads per bin",
        &bins,
        bases_to_human,
        count_to_human,
    )
}

pub fn plot_quality_hist(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    let qscores: Vec<f64> = records.iter().map(|r| r.mean_qscore_template).collect();
    let (lo, hi) = value_range(&qscores);
    let bins = histogram(&qscores, None, HIST_BINS, lo, hi);
    draw_histogram(
        &plot_path(plots_dir, name, "quality.hist"),
        "Mean QScore Distribution",
        "Mean QScore",
        "Reads per bin",
        &bins,
        |q| format!("{:.1}", q),
        count_to_human,
    )
}


pub fn plot_flowcell(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    let grid = flowcell_yield_grid(records);
    let values: Vec<f64> = grid.iter().flatten().copied().collect();
    let (lo, hi) = robust_range(&values);

    let path = plot_path(plots_dir, name, "flowcellmap");
    let root = BitMapBackend::new(&path, (1500, 700)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(&format!("Map of Yield by Channel for {}", name), (FONT, 32))?;
    let (map_area, bar_area) = root.split_horizontally(1360);

    let cols = (CHANNEL_WIDTH * CHANNEL_BLOCKS) as i32;
    let rows = CHANNEL_ROWS as i32;
    let mut map = ChartBuilder::on(&map_area)
        .margin(10)
        .build_cartesian_2d(0..cols, 0..rows)?;
    map.draw_series(grid.iter().enumerate().flat_map(|(row, cells)| {
        cells.iter().enumerate().map(move |(col, value)| {
            // row 0 is drawn at the top
            let y = rows - 1 - row as i32;
            let colour = diverging_colour(scale(*value, lo, hi));
            Rectangle::new([(col as i32, y), (col as i32 + 1, y + 1)], colour.filled())
        })
    }))?;
    for x in FLOWCELL_SEPARATORS {
        map.draw_series(LineSeries::new(vec![(x, 0), (x, rows)], WHITE.stroke_width(5)))?;
    }

    let mut bar = ChartBuilder::on(&bar_area)
        .margin(10)
        .margin_top(20)
        .y_label_area_size(70)
        .build_cartesian_2d(0f64..1f64, lo..hi)?;
    bar.configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .y_desc("Bases per channel")
        .y_label_formatter(&|y| bases_to_human(*y))
        .draw()?;
    let steps = 100;
    bar.draw_series((0..steps).map(|i| {
        let y0 = lo + (hi - lo) * i as f64 / steps as f64;
        let y1 = lo + (hi - lo) * (i + 1) as f64 / steps as f64;
        Rectangle::new([(0.0, y0), (1.0, y1)], diverging_colour((i as f64 + 0.5) / steps as f64).filled())
    }))?;
    root.present()?;
    Ok(())
}


/// Scatter of a per-read value over time split by quality, with 10-bin means.
fn plot_over_time_by_quality(
    records: &[ReadRecord],
    path: &Path,
    title: &str,
    y_desc: &str,
    value: fn(&ReadRecord) -> Option<f64>,
) -> Result<()> {
    let mut passed = Vec::new();
    let mut failed = Vec::new();
    for record in records {
        if let Some(v) = value(record).filter(|v| v.is_finite()) {
            let points = if record.pass { &mut passed } else { &mut failed };
            points.push((record.start_time_float_by_sample, v));
        }
    }
    let all_values: Vec<f64> = passed.iter().chain(failed.iter()).map(|p| p.1).collect();
    if all_values.is_empty() {
        return Err(anyhow!("No values for {}", title));
    }
    let y_max = axis_max([mean(&all_values) * 2.0]);
    let x_max = axis_max(passed.iter().chain(failed.iter()).map(|p| p.0));

    let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d(0f64..x_max, 0f64..y_max)?;
    chart
        .configure_mesh()
        .x_desc("Time in (HH:MM)")
        .y_desc(y_desc)
        .x_label_formatter(&|x| seconds_to_hhmm(*x))
        .draw()?;

    for (label, colour, points) in [("Passed", PASSED_COLOUR, &passed), ("Failed", FAILED_COLOUR, &failed)] {
        chart.draw_series(
            points
                .iter()
                .filter(|p| p.1 <= y_max)
                .map(|&(x, y)| Circle::new((x, y), 1, colour.mix(0.1).filled())),
        )?;
        let means: Vec<(f64, f64)> = bin_means(points, MEAN_TIME_BINS, 0.0, x_max)
            .into_iter()
            .map(|(x, y)| (x, y.min(y_max)))
            .collect();
        chart
            .draw_series(LineSeries::new(means.iter().copied(), colour.stroke_width(2)))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], colour.stroke_width(2)));
        chart.draw_series(means.iter().map(|&(x, y)| Circle::new((x, y), 5, colour.filled())))?;
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.5))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

pub fn plot_pore_speed(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    plot_over_time_by_quality(
        records,
        &plot_path(plots_dir, name, "pore_speed"),
        "Pore speed over time",
        "Pore Speed (bases / second)",
        |r| r.pore_speed,
    )
}

pub fn plot_events_ratio(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    plot_over_time_by_quality(
        records,
        &plot_path(plots_dir, name, "events_ratio"),
        &format!("Events Ratio Graph for {}", name),
        "Events ratio (events / base)",
        |r| r.events_ratio,
    )
}


/// 2-D density of two per-read values annotated with their Pearson r.
fn draw_density(
    path: &Path,
    title: &str,
    x_desc: &str,
    y_desc: &str,
    points: &[(f64, f64)],
    x_formatter: fn(f64) -> String,
) -> Result<()> {
    if points.len() < 2 {
        return Err(anyhow!("Not enough values for {}", title));
    }
    let (xs, ys): (Vec<f64>, Vec<f64>) = points.iter().copied().unzip();
    let x_range = value_range(&xs);
    let y_range = value_range(&ys);
    let grid = density_grid(points, DENSITY_BINS, x_range, y_range);
    let max_count = grid.iter().flatten().copied().max().unwrap_or(1).max(1) as f64;
    let dx = (x_range.1 - x_range.0) / DENSITY_BINS as f64;
    let dy = (y_range.1 - y_range.0) / DENSITY_BINS as f64;

    let root = BitMapBackend::new(path, (900, 900)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 24))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc(x_desc)
        .y_desc(y_desc)
        .x_label_formatter(&|x| x_formatter(*x))
        .draw()?;
    chart.draw_series(grid.iter().enumerate().flat_map(|(i, column)| {
        column.iter().enumerate().filter(|(_, c)| **c > 0).map(move |(j, count)| {
            let x0 = x_range.0 + dx * i as f64;
            let y0 = y_range.0 + dy * j as f64;
            Rectangle::new([(x0, y0), (x0 + dx, y0 + dy)], density_colour(*count as f64 / max_count).filled())
        })
    }))?;

    let annotation = match pearson(&xs, &ys) {
        Some(r) => format!("pearsonr = {:.2}", r),
        None => "pearsonr = nan".to_string(),
    };
    root.draw(&Text::new(annotation, (650, 60), (FONT, 18).into_font()))?;
    root.present()?;
    Ok(())
}

pub fn plot_quality_per_speed(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    let points: Vec<(f64, f64)> = records
        .iter()
        .filter_map(|r| r.pore_speed.map(|s| (s, r.mean_qscore_template)))
        .collect();
    draw_density(
        &plot_path(plots_dir, name, "speed_vs_qscore"),
        &format!("Pore Speed vs Q-score for {}", name),
        "Pore Speed (b/s)",
        "Mean Q-score",
        &points,
        |x| format!("{:.0}", x),
    )
}

pub fn plot_quality_per_readlength(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    let lengths: Vec<f64> = records.iter().map(|r| r.sequence_length_template as f64).collect();
    let max_length = quantile(&lengths, LENGTH_VS_QSCORE_QUANTILE);
    let points: Vec<(f64, f64)> = records
        .iter()
        .filter(|r| (r.sequence_length_template as f64) < max_length)
        .map(|r| (r.sequence_length_template as f64, r.mean_qscore_template))
        .collect();
    draw_density(
        &plot_path(plots_dir, name, "length_vs_qscore"),
        &format!("Sequence length against Q-score for {}", name),
        "Sequence length",
        "Mean Q-score",
        &points,
        bases_to_human,
    )
}


/// Quality distribution for each of 16 time windows, stacked top to bottom.
pub fn plot_quality_over_time(records: &[ReadRecord], name: &str, plots_dir: &Path) -> Result<()> {
    if records.is_empty() {
        return Err(anyhow!("No reads for the quality over time plot"));
    }
    let splits = time_splits(records, QSCORE_TIME_SPLITS);
    let qscores: Vec<f64> = records.iter().map(|r| r.mean_qscore_template).collect();
    let (q_lo, q_hi) = value_range(&qscores);

    let path = plot_path(plots_dir, name, "q_score.time.split");
    let root = BitMapBackend::new(&path, (1000, 1600)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled("Quality distribution over time", (FONT, 28))?;
    let areas = root.split_evenly((splits.len(), 1));
    let last = splits.len() - 1;

    for (i, (area, split)) in areas.iter().zip(&splits).enumerate() {
        let total = split.qscores.len().max(1) as f64;
        let density: Vec<(f64, f64)> = histogram(&split.qscores, None, QSCORE_DENSITY_BINS, q_lo, q_hi)
            .into_iter()
            .map(|b| ((b.start + b.end) / 2.0, b.height / total))
            .collect();
        let d_max = axis_max(density.iter().map(|p| p.1));
        let colour = HSLColor(0.6 - 0.35 * i as f64 / splits.len() as f64, 0.45, 0.5);

        let mut chart = ChartBuilder::on(area)
            .margin_left(10)
            .margin_right(10)
            .x_label_area_size(if i == last { 35 } else { 0 })
            .build_cartesian_2d(q_lo..q_hi, 0f64..d_max)?;
        if i == last {
            chart
                .configure_mesh()
                .disable_mesh()
                .disable_y_axis()
                .x_desc("Mean Q-Score")
                .draw()?;
        }
        chart.draw_series(
            AreaSeries::new(density.iter().copied(), 0.0, colour.mix(0.9)).border_style(WHITE.stroke_width(2)),
        )?;
        area.draw(&Text::new(split.label.clone(), (15, 10), (FONT, 16).into_font()))?;
    }
    root.present()?;
    Ok(())
}


pub fn plot_pair_plot(records: &[ReadRecord], name: &str, plots_dir: &Path, rng: &mut StdRng) -> Result<()> {
    const NAMES: [&str; 4] = ["Mean QScore Template", "Pore Speed (b/s)", "Read Length", "Events / base"];
    const LENGTH_COLUMN: usize = 2;

    let rows = pair_plot_sample(records, rng);
    if rows.len() < 2 {
        return Err(anyhow!("Not enough reads with an events ratio below {} for the pair plot", PAIR_PLOT_EVENTS_RATIO_MAX));
    }
    let columns: Vec<Vec<f64>> = (0..NAMES.len()).map(|c| rows.iter().map(|row| row[c]).collect()).collect();
    let ranges: Vec<(f64, f64)> = columns.iter().map(|c| value_range(c)).collect();
    let bases_formatter: &dyn Fn(&f64) -> String = &|v| bases_to_human(*v);
    let plain_formatter: &dyn Fn(&f64) -> String = &|v| format!("{:.1}", v);

    let path = plot_path(plots_dir, name, "pair_plot");
    let root = BitMapBackend::new(&path, (1400, 1400)).into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(&format!("Pair plot for {}", name), (FONT, 28))?;
    let areas = root.split_evenly((NAMES.len(), NAMES.len()));

    for (index, area) in areas.iter().enumerate() {
        let row = index / NAMES.len();
        let col = index % NAMES.len();
        let (x_lo, x_hi) = ranges[col];
        let diagonal = (row == col)
            .then(|| histogram(&columns[col], Some(&columns[LENGTH_COLUMN]), 20, x_lo, x_hi));
        let (y_lo, y_hi) = match &diagonal {
            Some(bins) => (0.0, axis_max(bins.iter().map(|b| b.height))),
            None => ranges[row],
        };

        let mut chart = ChartBuilder::on(area)
            .margin(5)
            .x_label_area_size(if row == NAMES.len() - 1 { 40 } else { 0 })
            .y_label_area_size(if col == 0 { 60 } else { 0 })
            .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)?;
        {
            let mut mesh = chart.configure_mesh();
            mesh.disable_mesh().x_labels(3).y_labels(3);
            if row == NAMES.len() - 1 {
                mesh.x_desc(NAMES[col]);
            }
            if col == 0 {
                mesh.y_desc(NAMES[row]);
            }
            mesh.x_label_formatter(if col == LENGTH_COLUMN { bases_formatter } else { plain_formatter });
            mesh.y_label_formatter(if row == LENGTH_COLUMN && diagonal.is_none() { bases_formatter } else { plain_formatter });
            mesh.draw()?;
        }

        match diagonal {
            Some(bins) => {
                chart.draw_series(bins.iter().map(|b| {
                    Rectangle::new([(b.start, 0.0), (b.end, b.height)], ALL_COLOUR.mix(0.6).filled())
                }))?;
            }
            None if row < col => {
                chart.draw_series(
                    rows.iter().map(|r| Circle::new((r[col], r[row]), 1, ALL_COLOUR.mix(0.5).filled())),
                )?;
            }
            None => {
                let points: Vec<(f64, f64)> = rows.iter().map(|r| (r[col], r[row])).collect();
                let bins = 30;
                let grid = density_grid(&points, bins, (x_lo, x_hi), (y_lo, y_hi));
                let max_count = grid.iter().flatten().copied().max().unwrap_or(1).max(1) as f64;
                let dx = (x_hi - x_lo) / bins as f64;
                let dy = (y_hi - y_lo) / bins as f64;
                chart.draw_series(grid.iter().enumerate().flat_map(|(i, column)| {
                    column.iter().enumerate().filter(|(_, c)| **c > 0).map(move |(j, count)| {
                        let x0 = x_lo + dx * i as f64;
                        let y0 = y_lo + dy * j as f64;
                        Rectangle::new([(x0, y0), (x0 + dx, y0 + dy)], density_colour(*count as f64 / max_count).filled())
                    })
                }))?;
            }
        }
    }
    root.present()?;
    Ok(())
}


/// Bar chart of how many reads each combination of trimming filters removed.
pub fn plot_filter_exclusions(report: &TrimReport, name: &str, plots_dir: &Path) -> Result<()> {
    let counts = exclusion_counts(report);
    if counts.is_empty() {
        info!("No reads were excluded, skipping the exclusion plot");
        return Ok(());
    }
    let labels: Vec<String> = counts.iter().map(|(label, _)| label.clone()).collect();
    let y_max = counts.iter().map(|(_, c)| *c).max().unwrap_or(1);

    let path = plot_path(plots_dir, name, "filter_exclusions");
    let root = BitMapBackend::new(&path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Reads excluded by condition", (FONT, 24))
        .margin(15)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d((0usize..counts.len()).into_segmented(), 0usize..y_max + y_max / 10 + 1)?;
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(counts.len() + 1)
        .x_desc("Failed filters")
        .y_desc("Reads excluded")
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => labels.get(*i).cloned().unwrap_or_default(),
            _ => String::new(),
        })
        .y_label_formatter(&|y| count_to_human(*y as f64))
        .draw()?;
    chart.draw_series(
        Histogram::vertical(&chart)
            .style(FAILED_COLOUR.mix(0.7).filled())
            .margin(20)
            .data(counts.iter().enumerate().map(|(i, (_, c))| (i, *c))),
    )?;
    root.present()?;
    Ok(())
}


/// Draws every run plot. A plot that fails is logged and the rest still run.
///
/// # Returns
/// The number of plots that failed.
pub fn plot_data(
    records: &[ReadRecord],
    report: &TrimReport,
    name: &str,
    plots_dir: &Path,
    rng: &mut StdRng,
) -> usize {
    let outcomes: Vec<(&str, Result<()>)> = vec![
        ("yield", plot_yield(records, name, plots_dir)),
        ("quality.yield", plot_yield_by_quality(records, name, plots_dir)),
        ("reads", plot_reads(records, name, plots_dir)),
        ("quality.reads", plot_reads_by_quality(records, name, plots_dir)),
        ("weighted.hist", plot_weighted_hist(records, name, plots_dir)),
        ("unweighted.hist", plot_read_hist(records, name, plots_dir)),
        ("flowcellmap", plot_flowcell(records, name, plots_dir)),
        ("pore_speed", plot_pore_speed(records, name, plots_dir)),
        ("quality.hist", plot_quality_hist(records, name, plots_dir)),
        ("q_score.time.split", plot_quality_over_time(records, name, plots_dir)),
        ("speed_vs_qscore", plot_quality_per_speed(records, name, plots_dir)),
        ("length_vs_qscore", plot_quality_per_readlength(records, name, plots_dir)),
        ("events_ratio", plot_events_ratio(records, name, plots_dir)),
        ("pair_plot", plot_pair_plot(records, name, plots_dir, rng)),
        ("filter_exclusions", plot_filter_exclusions(report, name, plots_dir)),
    ];
    let mut failures = 0;
    for (plot, outcome) in outcomes {
        if let Err(e) = outcome {
            warn!("Could not draw the {} plot: {}", plot, e);
            failures += 1;
        }
    }
    info!("Finished plotting");
    failures
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::dataset::tests::record;
    use crate::utils::dataset::{annotate_cumulative, convert_sample_time_columns, trim_dataset, Exclusion};
    use crate::utils::system::generate_rng;

    #[test]
    fn test_channel_grid_position() {
        assert_eq!(channel_grid_position(1), Some((0, 0)));
        assert_eq!(channel_grid_position(10), Some((0, 9)));
        assert_eq!(channel_grid_position(11), Some((1, 0)));
        assert_eq!(channel_grid_position(250), Some((24, 9)));
        assert_eq!(channel_grid_position(251), Some((0, 10)));
        assert_eq!(channel_grid_position(3000), Some((24, 119)));
        assert_eq!(channel_grid_position(0), None);
        assert_eq!(channel_grid_position(3001), None);
    }

    #[test]
    fn test_flowcell_yield_grid_keeps_final_channel_yield() {
        let mut a = record("a", 251, 10, 10.0, 0);
        let mut b = record("b", 251, 10, 10.0, 1);
        a.channel_yield = 10;
        b.channel_yield = 20;
        let grid = flowcell_yield_grid(&[a, b]);
        assert_eq!(grid.len(), 25);
        assert_eq!(grid[0].len(), 120);
        assert_eq!(grid[0][10], 20.0);
        assert_eq!(grid.iter().flatten().filter(|v| **v > 0.0).count(), 1);
    }

    #[test]
    fn test_histogram_weights_and_edges() {
        let values = [0.0, 1.0, 2.0, 4.0];
        let bins = histogram(&values, None, 2, 0.0, 4.0);
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[0].height, 2.0);
        assert_eq!(bins[1].height, 2.0);
        assert_eq!(bins[1].end, 4.0);

        let weighted = histogram(&values, Some(&values), 2, 0.0, 4.0);
        assert_eq!(weighted[0].height, 1.0);
        assert_eq!(weighted[1].height, 6.0);
    }

    #[test]
    fn test_bin_means_skips_empty_bins() {
        let points = [(0.5, 1.0), (1.5, 3.0), (0.2, 3.0)];
        let means = bin_means(&points, 4, 0.0, 4.0);
        assert_eq!(means, vec![(0.5, 2.0), (1.5, 3.0)]);
    }

    #[test]
    fn test_density_grid_counts() {
        let points = [(0.0, 0.0), (1.0, 1.0), (0.9, 0.9), (2.0, 2.0)];
        let grid = density_grid(&points, 2, (0.0, 1.0), (0.0, 1.0));
        assert_eq!(grid[0][0], 1);
        assert_eq!(grid[1][1], 2);
    }

    #[test]
    fn test_value_and_robust_ranges() {
        assert_eq!(value_range(&[]), (0.0, 1.0));
        assert_eq!(value_range(&[2.0, 2.0]), (1.5, 2.5));
        assert_eq!(value_range(&[3.0, 1.0]), (1.0, 3.0));
        let values: Vec<f64> = (0..=100).map(|v| v as f64).collect();
        assert_eq!(robust_range(&values), (2.0, 98.0));
        assert_eq!(robust_range(&[0.0; 5]), (0.0, 1.0));
    }

    #[test]
    fn test_time_splits() {
        let records: Vec<ReadRecord> = (0..=16)
            .map(|i| {
                let mut r = record(&format!("r{}", i), 1, 10, i as f64, 0);
                r.start_time_float_by_sample = i as f64 * 3600.0;
                r
            })
            .collect();
        let splits = time_splits(&records, 16);
        assert_eq!(splits.len(), 16);
        assert_eq!(splits[0].label, "0 - 01:00");
        assert_eq!(splits[15].label, "15:00 - 16:00");
        assert_eq!(splits[15].qscores, vec![15.0, 16.0]);
        assert_eq!(splits.iter().map(|s| s.qscores.len()).sum::<usize>(), 17);
    }

    #[test]
    fn test_exclusion_counts_sorted() {
        let mut report = TrimReport::default();
        report.exclusions.insert(Exclusion { time: true, events_ratio: false, length: false }, 2);
        report.exclusions.insert(Exclusion { time: false, events_ratio: true, length: true }, 5);
        let counts = exclusion_counts(&report);
        assert_eq!(counts[0], ("Events Ratio + Max Read Length".to_string(), 5));
        assert_eq!(counts[1], ("Time".to_string(), 2));
    }

    #[test]
    fn test_pair_plot_sample_filters_and_caps() {
        let mut records: Vec<ReadRecord> = (0..12_000)
            .map(|i| record(&format!("r{}", i), 1, 100, 10.0, i))
            .collect();
        records[0].events_ratio = Some(6.0);
        records[1].pore_speed = None;

        let mut rng = generate_rng(Some(42));
        let rows = pair_plot_sample(&records, &mut rng);
        assert_eq!(rows.len(), PAIR_PLOT_SAMPLE_SIZE);
        assert!(rows.iter().all(|r| r[3] < PAIR_PLOT_EVENTS_RATIO_MAX));

        let few = pair_plot_sample(&records[..3], &mut rng);
        assert_eq!(few.len(), 1);
    }

    #[test]
    fn test_plot_data_draws_every_plot() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let records: Vec<ReadRecord> = (0..400)
            .map(|i| {
                let channel = (i * 37 % 3000 + 1) as u32;
                let length = 200 + (i * 53 % 5000) as u64;
                let qscore = 4.0 + (i % 11) as f64;
                record(&format!("r{}", i), channel, length, qscore, i * 30)
            })
            .collect();
        let mut records = records;
        convert_sample_time_columns(&mut records);
        let (mut trimmed, report) = trim_dataset(records);
        annotate_cumulative(&mut trimmed);

        let mut rng = generate_rng(Some(1));
        let failures = plot_data(&trimmed, &report, "run1", dir.path(), &mut rng);
        assert_eq!(failures, 0);

        for suffix in [
            "yield", "quality.yield", "reads", "quality.reads", "weighted.hist", "unweighted.hist",
            "quality.hist", "flowcellmap", "pore_speed", "events_ratio", "speed_vs_qscore",
            "length_vs_qscore", "q_score.time.split", "pair_plot", "filter_exclusions",
        ] {
            let path = plot_path(dir.path(), "run1", suffix);
            assert!(path.is_file(), "{} was not drawn", path.display());
        }
        Ok(())
    }

    #[test]
    fn test_plot_path() {
        assert_eq!(
            plot_path(Path::new("/plots"), "run1", "quality.yield"),
            PathBuf::from("/plots/run1.quality.yield.png")
        );
    }
}
