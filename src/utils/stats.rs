//! Descriptive statistics and number formatting for the run QC outputs

/// Linearly interpolated quantile of `sorted` (ascending), `q` in [0, 1].
///
/// Returns NaN for an empty slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&sorted, q)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Pearson correlation coefficient of two equal-length series.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs);
    let my = mean(ys);
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}


/// count, mean, std, min, requested percentiles, max
#[derive(Debug, Clone, PartialEq)]
pub struct Description {
    pub rows: Vec<(String, f64)>,
}

pub fn describe(values: &[f64], percentiles: &[f64]) -> Description {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut rows = vec![
        ("count".to_string(), sorted.len() as f64),
        ("mean".to_string(), mean(&sorted)),
        ("std".to_string(), std_dev(&sorted)),
        ("min".to_string(), sorted.first().copied().unwrap_or(f64::NAN)),
    ];
    for p in percentiles {
        rows.push((format!("{}%", (p * 100.0).round()), quantile_sorted(&sorted, *p)));
    }
    rows.push(("max".to_string(), sorted.last().copied().unwrap_or(f64::NAN)));
    Description { rows }
}


/// Helper function to compute Nx (e.g., N50, N75)
///
/// # Arguments
///
/// - `lengths`: Read lengths, any order.
/// - `fraction`: The threshold i.e. the '50' in N50, as 0.5.
///
/// # Returns
///
/// The length L such that reads of length >= L hold `fraction` of all bases.
pub fn compute_nx(lengths: &[u64], fraction: f64) -> u64 {
    let mut sorted = lengths.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let total: u64 = sorted.iter().sum();
    let target = (total as f64 * fraction).ceil() as u64;
    let mut cumsum = 0;
    for &len in &sorted {
        cumsum += len;
        if cumsum >= target {
            return len;
        }
    }
    0
}


/// Decimal SI size with at most two decimals, e.g. `512 bytes`, `1.5 KB`, `12 MB`.
pub fn format_size(value: f64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    let abs = value.abs();
    if abs < 1000.0 {
        let rounded = round_trim(value, 2);
        return if rounded == "1" { "1 byte".to_string() } else { format!("{} bytes", rounded) };
    }
    let mut unit_value = 1000.0;
    let mut unit = UNITS[0];
    for (i, u) in UNITS.iter().enumerate() {
        let scale = 1000f64.powi(i as i32 + 1);
        if abs >= scale {
            unit_value = scale;
            unit = u;
        }
    }
    format!("{} {}", round_trim(value / unit_value, 2), unit)
}

/// Rounds to `decimals` places and strips trailing zeros.
fn round_trim(value: f64, decimals: usize) -> String {
    let s = format!("{:.*}", decimals, value);
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

/// Bases with a `b` suffix: `512b`, `1.5 Kb`, `12 Mb`.
pub fn bases_to_human(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    reformat_size(&format_size(value))
}

/// Counts in the same scale without the unit: `512`, `1.5 K`.
pub fn count_to_human(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    reformat_size(&format_size(value)).trim_end_matches('b').to_string()
}

fn reformat_size(s: &str) -> String {
    let mut out = s.replace(" bytes", "").replace(" byte", "");
    out = out.replace('B', "");
    out.push('b');
    out
}

/// Seconds as `HH:MM`.
pub fn seconds_to_hhmm(seconds: f64) -> String {
    if seconds == 0.0 {
        return "0".to_string();
    }
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 3600, (total % 3600) / 60)
}

/// Integer with `,` thousands separators.
pub fn with_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
