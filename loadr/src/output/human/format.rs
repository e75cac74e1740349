use std::time::Duration;

/// Renders a millisecond value with a unit that keeps 2-4 significant digits.
pub(crate) fn format_millis(ms: f64) -> String {
    if !ms.is_finite() {
        return "-".to_string();
    }
    if ms >= 1000.0 {
        return format!("{:.2}s", ms / 1000.0);
    }
    if ms >= 1.0 {
        return format!("{ms:.2}ms");
    }
    format!("{:.2}µs", ms * 1000.0)
}

pub(crate) fn format_millis_opt(ms: Option<f64>) -> String {
    ms.map_or_else(|| "-".to_string(), format_millis)
}

/// Whole seconds for durations of a second or more, otherwise milliseconds.
pub(crate) fn format_duration(d: Duration) -> String {
    if d >= Duration::from_secs(1) {
        return humantime::format_duration(Duration::from_secs(d.as_secs())).to_string();
    }
    format!("{}ms", d.as_millis())
}

pub(crate) fn format_rate(v: f64) -> String {
    if v.is_finite() {
        format!("{v:.0}")
    } else {
        "0".to_string()
    }
}

pub(crate) fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        format!("{v:.3}")
    }
}

pub(crate) fn format_percent(ratio: f64) -> String {
    format!("{:.2}%", ratio * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_pick_a_readable_unit() {
        assert_eq!(format_millis(0.25), "250.00µs");
        assert_eq!(format_millis(12.345), "12.35ms");
        assert_eq!(format_millis(2100.0), "2.10s");
        assert_eq!(format_millis_opt(None), "-");
    }

    #[test]
    fn durations_drop_subsecond_noise() {
        assert_eq!(format_duration(Duration::from_millis(90_400)), "1m 30s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
    }

    #[test]
    fn numbers_and_ratios() {
        assert_eq!(format_number(150.0), "150");
        assert_eq!(format_number(0.5), "0.500");
        assert_eq!(format_percent(2.0 / 150.0), "1.33%");
        assert_eq!(format_rate(f64::NAN), "0");
    }
}
