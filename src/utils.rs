use std::collections::HashSet;

use indicatif::{ProgressBar, ProgressStyle};

/// Indices of the haystack entries equal to the needle
pub fn index_mask(needle: &str, haystack: &[String]) -> Vec<usize> {
    haystack
        .iter()
        .enumerate()
        .filter(|(_, target)| target.as_str() == needle)
        .map(|(i, _)| i)
        .collect()
}

/// Indices of the haystack entries contained in the set of needles
pub fn membership_mask(needles: &HashSet<&str>, haystack: &[String]) -> Vec<usize> {
    haystack
        .iter()
        .enumerate()
        .filter(|(_, target)| needles.contains(target.as_str()))
        .map(|(i, _)| i)
        .collect()
}

pub fn select_cloned<T: Clone>(indices: &[usize], data: &[T]) -> Vec<T> {
    indices.iter().map(|i| data[*i].clone()).collect()
}

/// Family identifiers are compared without any `-suffix`
pub fn normalize_fid(fid: &str) -> &str {
    fid.split('-').next().unwrap_or(fid)
}

/// Parses a numeric table cell, mapping the usual missing-value tokens to NaN
pub fn parse_value(cell: &str) -> Option<f64> {
    match cell.trim() {
        "" | "NA" | "na" | "NaN" | "nan" | "." => Some(f64::NAN),
        other => other.parse::<f64>().ok(),
    }
}

/// Progress bar over `len` items, hidden when disabled
pub fn progress_bar(len: usize, enabled: bool, message: &'static str) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::with_template("{msg} [{elapsed_precise}] {bar:40} {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(len as u64).with_style(style).with_message(message)
}
