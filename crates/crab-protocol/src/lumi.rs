//! Run and luminosity-section selections.
//!
//! On the wire a selection is two parallel lists: `runs` holds run
//! numbers and `lumis` holds, for the run at the same index, a flat
//! comma-separated list of inclusive range bounds (`"1,10,20,30"` selects
//! sections 1-10 and 20-30).

use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Upper bound used when a run is selected without a lumi mask.
pub const ALL_LUMIS: (u32, u32) = (1, i32::MAX as u32);

/// Widest run range that may be expanded into individual runs.
pub const MAX_EXPANDED_RUNS: u32 = 100_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LumiError {
    #[error("invalid lumi mask: {0}")]
    InvalidMask(String),

    #[error("invalid run range '{0}'")]
    InvalidRange(String),

    #[error("run range '{0}' spans more than {MAX_EXPANDED_RUNS} runs")]
    RangeTooWide(String),
}

/// Inclusive lumi-section ranges per run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LumiMask {
    runs: BTreeMap<u32, Vec<(u32, u32)>>,
}

impl LumiMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the usual JSON form `{"<run>": [[first, last], ...], ...}`.
    pub fn from_json(value: &Value) -> Result<Self, LumiError> {
        let object = value
            .as_object()
            .ok_or_else(|| LumiError::InvalidMask("top level must be an object".into()))?;

        let mut mask = Self::new();
        for (run, ranges) in object {
            let run: u32 = run
                .trim()
                .parse()
                .map_err(|_| LumiError::InvalidMask(format!("bad run number '{}'", run)))?;
            let ranges = ranges.as_array().ok_or_else(|| {
                LumiError::InvalidMask(format!("run {} must map to a list of ranges", run))
            })?;
            for range in ranges {
                let (first, last) = parse_pair(range).ok_or_else(|| {
                    LumiError::InvalidMask(format!("run {}: bad range {}", run, range))
                })?;
                mask.add(run, first, last);
            }
        }
        Ok(mask)
    }

    pub fn from_json_str(text: &str) -> Result<Self, LumiError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| LumiError::InvalidMask(e.to_string()))?;
        Self::from_json(&value)
    }

    /// Every lumi of every run in the range expression.
    pub fn from_run_range(expr: &str) -> Result<Self, LumiError> {
        let mut mask = Self::new();
        for (first, last) in parse_run_range(expr)? {
            if last - first >= MAX_EXPANDED_RUNS {
                return Err(LumiError::RangeTooWide(expr.to_string()));
            }
            for run in first..=last {
                mask.add(run, ALL_LUMIS.0, ALL_LUMIS.1);
            }
        }
        Ok(mask)
    }

    /// Add an inclusive range; bounds may be given in either order.
    pub fn add(&mut self, run: u32, first: u32, last: u32) {
        let (lo, hi) = if first <= last { (first, last) } else { (last, first) };
        let ranges = self.runs.entry(run).or_default();
        ranges.push((lo, hi));
        compact(ranges);
    }

    /// Keep only runs inside the range expression.
    pub fn restrict_to_runs(&self, expr: &str) -> Result<Self, LumiError> {
        let bounds = parse_run_range(expr)?;
        let runs = self
            .runs
            .iter()
            .filter(|(run, _)| bounds.iter().any(|(lo, hi)| (*lo..=*hi).contains(*run)))
            .map(|(run, ranges)| (*run, ranges.clone()))
            .collect();
        Ok(Self { runs })
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn ranges(&self, run: u32) -> Option<&[(u32, u32)]> {
        self.runs.get(&run).map(Vec::as_slice)
    }

    /// The `runs` and `lumis` wire lists.
    pub fn to_wire(&self) -> (Vec<String>, Vec<String>) {
        let runs = self.runs.keys().map(u32::to_string).collect();
        let lumis = self
            .runs
            .values()
            .map(|ranges| {
                ranges
                    .iter()
                    .flat_map(|(lo, hi)| [lo.to_string(), hi.to_string()])
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect();
        (runs, lumis)
    }
}

fn parse_pair(value: &Value) -> Option<(u32, u32)> {
    let pair = value.as_array()?;
    if pair.len() != 2 {
        return None;
    }
    let first = u32::try_from(pair[0].as_u64()?).ok()?;
    let last = u32::try_from(pair[1].as_u64()?).ok()?;
    Some((first, last))
}

/// Sort and merge overlapping or touching ranges in place.
fn compact(ranges: &mut Vec<(u32, u32)>) {
    ranges.sort_unstable();
    let mut merged: Vec<(u32, u32)> = Vec::with_capacity(ranges.len());
    for &(lo, hi) in ranges.iter() {
        match merged.last_mut() {
            Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }
    *ranges = merged;
}

/// Parse `"1-10,15"` into inclusive run bounds.
pub fn parse_run_range(expr: &str) -> Result<Vec<(u32, u32)>, LumiError> {
    let invalid = || LumiError::InvalidRange(expr.to_string());
    let mut bounds = Vec::new();
    for part in expr.split(',').map(str::trim) {
        if part.is_empty() {
            return Err(invalid());
        }
        let (lo, hi) = match part.split_once('-') {
            Some((lo, hi)) => (lo.trim(), hi.trim()),
            None => (part, part),
        };
        let lo: u32 = lo.parse().map_err(|_| invalid())?;
        let hi: u32 = hi.parse().map_err(|_| invalid())?;
        if lo > hi {
            return Err(invalid());
        }
        bounds.push((lo, hi));
    }
    Ok(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_to_wire_merges_overlaps() {
        let mask =
            LumiMask::from_json_str(r#"{"2": [[5, 8]], "1": [[20, 30], [1, 10], [9, 12]]}"#)
                .unwrap();
        let (runs, lumis) = mask.to_wire();
        assert_eq!(runs, vec!["1", "2"]);
        assert_eq!(lumis, vec!["1,12,20,30", "5,8"]);
    }

    #[test]
    fn test_adjacent_ranges_merge() {
        let mut mask = LumiMask::new();
        mask.add(7, 1, 4);
        mask.add(7, 5, 9);
        assert_eq!(mask.ranges(7), Some(&[(1, 9)][..]));
    }

    #[test]
    fn test_run_range_expands() {
        let mask = LumiMask::from_run_range("100-102,200").unwrap();
        let (runs, lumis) = mask.to_wire();
        assert_eq!(runs, vec!["100", "101", "102", "200"]);
        assert!(lumis.iter().all(|l| l == "1,2147483647"));
    }

    #[test]
    fn test_run_range_errors() {
        assert!(matches!(parse_run_range("10-1"), Err(LumiError::InvalidRange(_))));
        assert!(matches!(parse_run_range("1,,2"), Err(LumiError::InvalidRange(_))));
        assert!(matches!(
            LumiMask::from_run_range("1-4000000"),
            Err(LumiError::RangeTooWide(_))
        ));
    }

    #[test]
    fn test_restrict_to_runs() {
        let mask = LumiMask::from_json_str(r#"{"1": [[1, 2]], "5": [[1, 2]], "9": [[3, 4]]}"#)
            .unwrap();
        let restricted = mask.restrict_to_runs("4-9").unwrap();
        assert_eq!(restricted.to_wire().0, vec!["5", "9"]);
    }

    #[test]
    fn test_bad_mask() {
        assert!(LumiMask::from_json_str(r#"{"x": [[1, 2]]}"#).is_err());
        assert!(LumiMask::from_json_str(r#"{"1": [[1]]}"#).is_err());
        assert!(LumiMask::from_json_str("[]").is_err());
    }
}
