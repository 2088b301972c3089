use chrono::NaiveDate;
use log::warn;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::models::{OptionId, Survey, VoteFact};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericStats {
    pub average: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

impl NumericStats {
    /// `None` for an empty sample, so callers never see NaN.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        let sum: f64 = sorted.iter().sum();
        Some(Self {
            average: round2(sum / count as f64),
            median: median_of_sorted(&sorted),
            min: sorted[0],
            max: sorted[count - 1],
            count: count as u64,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueBucket {
    pub value: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateBucket {
    pub date: NaiveDate,
    pub count: u64,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// Expects a non-empty, ascending slice.
fn median_of_sorted(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// One bucket per distinct observed value, ascending.
pub fn value_distribution(values: &[f64]) -> Vec<ValueBucket> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mut buckets: Vec<ValueBucket> = Vec::new();
    for value in sorted {
        match buckets.last_mut() {
            Some(bucket) if bucket.value == value => bucket.count += 1,
            _ => buckets.push(ValueBucket { value, count: 1 }),
        }
    }
    buckets
}

pub fn date_distribution<I>(dates: I) -> Vec<DateBucket>
where
    I: IntoIterator<Item = NaiveDate>,
{
    let mut counts: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for date in dates {
        *counts.entry(date).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(date, count)| DateBucket { date, count })
        .collect()
}

/// `round(100 * count / total)`, and 0 when nothing was counted.
pub fn percentage(count: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    (count as f64 * 100.0 / total as f64).round() as u32
}

/// Every key whose count equals the maximum. Empty when all counts are zero.
pub fn top_by_count<'a, K, I>(counts: I) -> BTreeSet<K>
where
    K: Ord + Clone + 'a,
    I: IntoIterator<Item = (&'a K, u64)>,
{
    let counts: Vec<(&K, u64)> = counts.into_iter().collect();
    let max = counts.iter().map(|(_, count)| *count).max().unwrap_or(0);
    if max == 0 {
        return BTreeSet::new();
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count == max)
        .map(|(key, _)| key.clone())
        .collect()
}

pub fn distinct_voters<'a, I>(facts: I) -> u64
where
    I: IntoIterator<Item = &'a VoteFact>,
{
    facts
        .into_iter()
        .map(|fact| &fact.voter)
        .collect::<HashSet<_>>()
        .len() as u64
}

/// Facts attached to options the survey still has, keyed by option id.
///
/// Facts without an option are left out silently; facts pointing at an
/// option that no longer exists are logged and skipped.
pub fn facts_by_option<'a>(
    survey: &Survey,
    facts: &[&'a VoteFact],
) -> HashMap<&'a OptionId, Vec<&'a VoteFact>> {
    let mut grouped: HashMap<&OptionId, Vec<&VoteFact>> = HashMap::new();
    for &fact in facts {
        let Some(option_id) = &fact.option_id else {
            continue;
        };
        if !survey.has_option(option_id) {
            warn!(
                "Skipping fact {} of survey {}: option {} no longer exists",
                fact.id, survey.id, option_id
            );
            continue;
        }
        grouped.entry(option_id).or_default().push(fact);
    }
    grouped
}
