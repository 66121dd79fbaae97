use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};

/// Region removed by the `remove_us_whiskies` cleaning step.
pub const EXCLUDED_REGION: &str = "USA";

/// Placeholder written into `age_years` when the corrected age is missing
/// and `fill_missing_age` is enabled.
pub const MISSING_AGE_SENTINEL: f64 = -1.0;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ReportError {
    #[error("source workbook not found: {path}")]
    SourceNotFound { path: String },
    #[error("failed to load source data: {0}")]
    LoadFailed(String),
    #[error("no scores found for attendee: {attendee}")]
    PersonNotFound { attendee: String },
    #[error("report rendering failed: {0}")]
    RenderFailed(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct WhiskyId(pub i64);

impl Display for WhiskyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One tasting score as it appears in the scores sheet. `guest` is `None`
/// when the sheet carries no guest column at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreRecord {
    pub whisky: WhiskyId,
    pub attendee: String,
    pub meeting: i64,
    pub guest: Option<bool>,
    pub score: f64,
}

/// One whisky's static metadata. `meeting` is the meeting the whisky was
/// first tasted in; it is consumed by tasting-position ranking and never
/// joined into the output (the score rows already carry it).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WhiskyRecord {
    pub whisky: WhiskyId,
    pub distillery: String,
    pub age_years: Option<f64>,
    pub description: String,
    pub region: String,
    pub abv: f64,
    pub price: f64,
    pub original_bottling: bool,
    pub meeting: i64,
}

/// One denormalized row after the left join. Metadata fields are optional
/// because a score must survive the join even when its whisky has no
/// metadata row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TastingRow {
    pub whisky: WhiskyId,
    pub attendee: String,
    pub meeting: i64,
    pub guest: Option<bool>,
    pub score: f64,
    pub distillery: Option<String>,
    pub age_years: Option<f64>,
    pub age_missing: bool,
    pub description: Option<String>,
    pub region: Option<String>,
    pub abv: Option<f64>,
    pub price: Option<f64>,
    pub original_bottling: Option<bool>,
    pub tasting_position: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TastingTable {
    pub rows: Vec<TastingRow>,
}

impl TastingTable {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct attendee names, sorted ascending.
    #[must_use]
    pub fn attendees(&self) -> Vec<String> {
        let names: std::collections::BTreeSet<&str> =
            self.rows.iter().map(|row| row.attendee.as_str()).collect();
        names.into_iter().map(str::to_string).collect()
    }

    #[must_use]
    pub fn attendee_rows(&self, attendee: &str) -> Vec<&TastingRow> {
        self.rows
            .iter()
            .filter(|row| row.attendee == attendee)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadOptions {
    pub remove_guests: bool,
    pub remove_us_whiskies: bool,
    pub remove_thresh: f64,
    pub pointscale: bool,
    pub fill_missing_age: bool,
    pub min_whiskies_per_region: u32,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            remove_guests: true,
            remove_us_whiskies: false,
            remove_thresh: 0.0,
            pointscale: false,
            fill_missing_age: true,
            min_whiskies_per_region: 0,
        }
    }
}

impl LoadOptions {
    /// Validates numeric bounds.
    ///
    /// # Errors
    /// Returns [`ReportError::Configuration`] when a field is outside its
    /// allowed range.
    pub fn validate(&self) -> Result<(), ReportError> {
        if !self.remove_thresh.is_finite() || self.remove_thresh < 0.0 {
            return Err(ReportError::Configuration(
                "remove_thresh MUST be a finite value >= 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportOptions {
    /// Inclusive minimum whisky count for a distillery to be ranked.
    pub min_distillery_count: usize,
    /// Exclusive minimum whisky count for a region to be ranked.
    pub min_region_count: usize,
    pub distillery_rank_size: usize,
    pub region_rank_size: usize,
    /// Regions are shortlisted to this many (by row count) before ranking.
    pub region_shortlist_size: usize,
    pub trend_window: usize,
    pub min_common_whiskies: usize,
    pub difference_table_size: usize,
    pub similar_scorers_size: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            min_distillery_count: 5,
            min_region_count: 5,
            distillery_rank_size: 5,
            region_rank_size: 3,
            region_shortlist_size: 10,
            trend_window: 10,
            min_common_whiskies: 50,
            difference_table_size: 5,
            similar_scorers_size: 3,
        }
    }
}

impl ReportOptions {
    /// Validates numeric bounds.
    ///
    /// # Errors
    /// Returns [`ReportError::Configuration`] when a field is outside its
    /// allowed range.
    pub fn validate(&self) -> Result<(), ReportError> {
        if self.trend_window == 0 {
            return Err(ReportError::Configuration(
                "trend_window MUST be >= 1".to_string(),
            ));
        }
        if self.region_shortlist_size == 0 {
            return Err(ReportError::Configuration(
                "region_shortlist_size MUST be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Joins scores onto whisky metadata and applies the cleaning transforms in
/// their fixed order: guest removal, region exclusion, outlier removal,
/// rescaling, minimum-whiskies-per-region, age-missing fill.
///
/// The join is a left join by whisky identifier, so the output row count
/// always equals the input score count before any removal step runs.
///
/// # Errors
/// Returns [`ReportError::Configuration`] for invalid options and
/// [`ReportError::LoadFailed`] when the metadata contains a duplicate
/// whisky identifier.
pub fn assemble_table(
    scores: Vec<ScoreRecord>,
    whiskies: Vec<WhiskyRecord>,
    options: &LoadOptions,
) -> Result<TastingTable, ReportError> {
    options.validate()?;

    let positions = tasting_positions(&whiskies);

    let mut metadata: HashMap<WhiskyId, WhiskyRecord> = HashMap::with_capacity(whiskies.len());
    for record in whiskies {
        if let Some(previous) = metadata.insert(record.whisky, record) {
            return Err(ReportError::LoadFailed(format!(
                "duplicate whisky identifier {} in metadata",
                previous.whisky
            )));
        }
    }

    let mut rows: Vec<TastingRow> = scores
        .into_iter()
        .map(|score| {
            let meta = metadata.get(&score.whisky);
            TastingRow {
                whisky: score.whisky,
                attendee: score.attendee,
                meeting: score.meeting,
                guest: score.guest,
                score: score.score,
                distillery: meta.map(|m| m.distillery.clone()),
                age_years: meta.and_then(|m| m.age_years),
                age_missing: false,
                description: meta.map(|m| m.description.clone()),
                region: meta.map(|m| m.region.clone()),
                abv: meta.map(|m| m.abv),
                price: meta.map(|m| m.price),
                original_bottling: meta.map(|m| m.original_bottling),
                tasting_position: positions.get(&score.whisky).copied(),
            }
        })
        .collect();

    if options.remove_guests {
        rows.retain(|row| row.guest != Some(true));
    }

    if options.remove_us_whiskies {
        rows.retain(|row| row.region.as_deref() != Some(EXCLUDED_REGION));
    }

    if options.remove_thresh > 0.0 {
        let means = mean_score_per_whisky(&rows);
        rows.retain(|row| {
            let item_mean = means.get(&row.whisky).copied().unwrap_or(0.0);
            item_mean >= options.remove_thresh && row.score >= options.remove_thresh
        });
    }

    if options.pointscale {
        for row in &mut rows {
            row.score = (row.score - options.remove_thresh) * 10.0;
        }
    }

    if options.min_whiskies_per_region > 0 {
        let counts = distinct_whiskies_per_region(&rows);
        let minimum = options.min_whiskies_per_region as usize;
        // Rows with no region metadata never belong to a qualifying group.
        rows.retain(|row| match &row.region {
            Some(region) => counts.get(region).is_some_and(|count| *count >= minimum),
            None => false,
        });
    }

    if options.fill_missing_age {
        for row in &mut rows {
            row.age_missing = row.age_years.is_none();
            if row.age_years.is_none() {
                row.age_years = Some(MISSING_AGE_SENTINEL);
            }
        }
    }

    Ok(TastingTable { rows })
}

/// Rank of each whisky within its meeting, 1-based, by identifier order.
fn tasting_positions(whiskies: &[WhiskyRecord]) -> HashMap<WhiskyId, u32> {
    let mut by_meeting: BTreeMap<i64, Vec<WhiskyId>> = BTreeMap::new();
    for record in whiskies {
        by_meeting.entry(record.meeting).or_default().push(record.whisky);
    }

    let mut positions = HashMap::new();
    for ids in by_meeting.values_mut() {
        ids.sort();
        for (index, id) in ids.iter().enumerate() {
            let rank = u32::try_from(index + 1).unwrap_or(u32::MAX);
            positions.entry(*id).or_insert(rank);
        }
    }
    positions
}

#[allow(clippy::cast_precision_loss)]
fn mean_score_per_whisky(rows: &[TastingRow]) -> HashMap<WhiskyId, f64> {
    let mut sums: HashMap<WhiskyId, (f64, usize)> = HashMap::new();
    for row in rows {
        let entry = sums.entry(row.whisky).or_insert((0.0, 0));
        entry.0 += row.score;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(id, (sum, count))| (id, sum / count as f64))
        .collect()
}

fn distinct_whiskies_per_region(rows: &[TastingRow]) -> HashMap<String, usize> {
    let mut sets: HashMap<&str, HashSet<WhiskyId>> = HashMap::new();
    for row in rows {
        if let Some(region) = &row.region {
            sets.entry(region.as_str()).or_default().insert(row.whisky);
        }
    }
    sets.into_iter()
        .map(|(region, ids)| (region.to_string(), ids.len()))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttendeeSummary {
    pub attendee: String,
    pub meetings_attended: usize,
    pub whiskies_scored: usize,
    pub avg_score: f64,
    pub total_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupAggregate {
    pub name: String,
    pub avg_score: f64,
    pub whisky_count: usize,
}

/// Ranked group view. `groups` is the charted set (every qualifying group),
/// `top`/`bottom` the table selections. Ordering ties are broken by group
/// name ascending throughout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupRanking {
    pub groups: Vec<GroupAggregate>,
    pub top: Vec<GroupAggregate>,
    pub bottom: Vec<GroupAggregate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendPoint {
    pub whisky: WhiskyId,
    pub score: f64,
    pub moving_avg: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationRow {
    pub attendee: String,
    pub correlation: f64,
    pub common_whiskies: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DifferenceRow {
    pub whisky: WhiskyId,
    pub description: Option<String>,
    pub distillery: Option<String>,
    pub age_years: Option<f64>,
    pub other_attendee: String,
    pub target_score: f64,
    pub other_score: f64,
    pub absolute_difference: f64,
}

/// One display-ready line of the scoring-history table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryRow {
    pub meeting: i64,
    pub score: f64,
    pub description: String,
    pub distillery: String,
    pub age_display: String,
    pub region: String,
    pub abv_percent: Option<f64>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttendeeReport {
    pub summary: AttendeeSummary,
    pub trend: Vec<TrendPoint>,
    pub distilleries: GroupRanking,
    pub regions: GroupRanking,
    pub correlations: Vec<CorrelationRow>,
    pub differences: Vec<DifferenceRow>,
    pub history: Vec<HistoryRow>,
}

/// Computes every derived view for one attendee.
///
/// # Errors
/// Returns [`ReportError::PersonNotFound`] when the attendee has zero rows
/// and [`ReportError::Configuration`] for invalid options.
pub fn build_attendee_report(
    table: &TastingTable,
    attendee: &str,
    options: &ReportOptions,
) -> Result<AttendeeReport, ReportError> {
    options.validate()?;

    let mine = table.attendee_rows(attendee);
    if mine.is_empty() {
        return Err(ReportError::PersonNotFound {
            attendee: attendee.to_string(),
        });
    }

    Ok(AttendeeReport {
        summary: summarize_attendee(attendee, &mine),
        trend: trend_series(&mine, options.trend_window),
        distilleries: distillery_ranking(&mine, options),
        regions: region_ranking(&mine, options),
        correlations: correlation_rows(table, attendee, options.min_common_whiskies),
        differences: largest_differences(table, attendee),
        history: history_rows(&mine),
    })
}

#[allow(clippy::cast_precision_loss)]
fn summarize_attendee(attendee: &str, mine: &[&TastingRow]) -> AttendeeSummary {
    let meetings: HashSet<i64> = mine.iter().map(|row| row.meeting).collect();
    let score_sum: f64 = mine.iter().map(|row| row.score).sum();
    let total_price: f64 = mine.iter().filter_map(|row| row.price).sum();

    AttendeeSummary {
        attendee: attendee.to_string(),
        meetings_attended: meetings.len(),
        whiskies_scored: mine.len(),
        avg_score: score_sum / mine.len() as f64,
        total_price,
    }
}

/// Chronological score series (whisky identifier order) with a trailing
/// moving average; partial windows at the start use the points available.
#[allow(clippy::cast_precision_loss)]
fn trend_series(mine: &[&TastingRow], window: usize) -> Vec<TrendPoint> {
    let mut sorted: Vec<&TastingRow> = mine.to_vec();
    sorted.sort_by_key(|row| row.whisky);

    let mut points = Vec::with_capacity(sorted.len());
    for (index, row) in sorted.iter().enumerate() {
        let start = (index + 1).saturating_sub(window);
        let tail = &sorted[start..=index];
        let avg = tail.iter().map(|r| r.score).sum::<f64>() / tail.len() as f64;
        points.push(TrendPoint {
            whisky: row.whisky,
            score: row.score,
            moving_avg: avg,
        });
    }
    points
}

fn distillery_ranking(mine: &[&TastingRow], options: &ReportOptions) -> GroupRanking {
    let qualifying: Vec<GroupAggregate> = aggregate_groups(mine, |row| row.distillery.as_deref())
        .into_iter()
        .filter(|group| group.whisky_count >= options.min_distillery_count)
        .collect();

    let top = top_by_score(&qualifying, options.distillery_rank_size);
    let bottom = bottom_by_score(&qualifying, options.distillery_rank_size);
    GroupRanking {
        groups: qualifying,
        top,
        bottom,
    }
}

/// Regions are shortlisted to the most frequently scored before the
/// minimum-count filter; the chart shows the whole shortlist.
fn region_ranking(mine: &[&TastingRow], options: &ReportOptions) -> GroupRanking {
    let mut shortlist = aggregate_groups(mine, |row| row.region.as_deref());
    shortlist.sort_by(|a, b| {
        b.whisky_count
            .cmp(&a.whisky_count)
            .then_with(|| a.name.cmp(&b.name))
    });
    shortlist.truncate(options.region_shortlist_size);

    let qualifying: Vec<GroupAggregate> = shortlist
        .iter()
        .filter(|group| group.whisky_count > options.min_region_count)
        .cloned()
        .collect();

    GroupRanking {
        top: top_by_score(&qualifying, options.region_rank_size),
        bottom: bottom_by_score(&qualifying, options.region_rank_size),
        groups: shortlist,
    }
}

/// Mean score and row count per group, sorted by group name. Rows whose key
/// is missing (no metadata after the left join) are not grouped.
#[allow(clippy::cast_precision_loss)]
fn aggregate_groups<'a, F>(mine: &[&'a TastingRow], key: F) -> Vec<GroupAggregate>
where
    F: Fn(&'a TastingRow) -> Option<&'a str>,
{
    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for row in mine {
        if let Some(name) = key(row) {
            let entry = sums.entry(name).or_insert((0.0, 0));
            entry.0 += row.score;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(name, (sum, count))| GroupAggregate {
            name: name.to_string(),
            avg_score: sum / count as f64,
            whisky_count: count,
        })
        .collect()
}

fn top_by_score(groups: &[GroupAggregate], size: usize) -> Vec<GroupAggregate> {
    let mut ranked = groups.to_vec();
    ranked.sort_by(|a, b| {
        b.avg_score
            .total_cmp(&a.avg_score)
            .then_with(|| a.name.cmp(&b.name))
    });
    ranked.truncate(size);
    ranked
}

fn bottom_by_score(groups: &[GroupAggregate], size: usize) -> Vec<GroupAggregate> {
    let mut ranked = groups.to_vec();
    ranked.sort_by(|a, b| {
        a.avg_score
            .total_cmp(&b.avg_score)
            .then_with(|| a.name.cmp(&b.name))
    });
    ranked.truncate(size);
    ranked
}

/// Pearson correlation against every other attendee over commonly scored
/// whiskies. Only overlaps of at least `min_common` qualify; degenerate
/// overlaps (zero variance on either side) are skipped. Sorted by
/// correlation descending, attendee name ascending on ties.
fn correlation_rows(
    table: &TastingTable,
    attendee: &str,
    min_common: usize,
) -> Vec<CorrelationRow> {
    let target: HashMap<WhiskyId, f64> = table
        .rows
        .iter()
        .filter(|row| row.attendee == attendee)
        .map(|row| (row.whisky, row.score))
        .collect();

    let mut others: BTreeMap<&str, Vec<(WhiskyId, f64)>> = BTreeMap::new();
    for row in &table.rows {
        if row.attendee != attendee {
            others
                .entry(row.attendee.as_str())
                .or_default()
                .push((row.whisky, row.score));
        }
    }

    let mut out = Vec::new();
    for (other, scores) in others {
        let pairs: Vec<(f64, f64)> = scores
            .iter()
            .filter_map(|(whisky, score)| target.get(whisky).map(|mine| (*mine, *score)))
            .collect();
        if pairs.len() < min_common {
            continue;
        }
        if let Some(correlation) = pearson(&pairs) {
            out.push(CorrelationRow {
                attendee: other.to_string(),
                correlation,
                common_whiskies: pairs.len(),
            });
        }
    }

    out.sort_by(|a, b| {
        b.correlation
            .total_cmp(&a.correlation)
            .then_with(|| a.attendee.cmp(&b.attendee))
    });
    out
}

#[allow(clippy::cast_precision_loss)]
fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|(_, b)| b).sum::<f64>() / n;

    let mut covariance = 0.0;
    let mut variance_a = 0.0;
    let mut variance_b = 0.0;
    for (a, b) in pairs {
        covariance += (a - mean_a) * (b - mean_b);
        variance_a += (a - mean_a) * (a - mean_a);
        variance_b += (b - mean_b) * (b - mean_b);
    }

    let denominator = (variance_a * variance_b).sqrt();
    if denominator == 0.0 {
        return None;
    }
    Some(covariance / denominator)
}

/// For every whisky the attendee scored, the single other-attendee
/// comparison with the largest absolute difference. Candidates are scanned
/// in attendee-name order with a strict comparison, so equal differences
/// resolve to the first name; zero differences are discarded. Sorted by
/// difference descending, whisky identifier ascending on ties.
fn largest_differences(table: &TastingTable, attendee: &str) -> Vec<DifferenceRow> {
    let mut others_by_whisky: HashMap<WhiskyId, Vec<&TastingRow>> = HashMap::new();
    for row in &table.rows {
        if row.attendee != attendee {
            others_by_whisky.entry(row.whisky).or_default().push(row);
        }
    }
    for candidates in others_by_whisky.values_mut() {
        candidates.sort_by(|a, b| a.attendee.cmp(&b.attendee));
    }

    let mut target_rows: Vec<&TastingRow> = table
        .rows
        .iter()
        .filter(|row| row.attendee == attendee)
        .collect();
    target_rows.sort_by_key(|row| row.whisky);

    let mut seen: HashSet<WhiskyId> = HashSet::new();
    let mut out = Vec::new();
    for row in target_rows {
        if !seen.insert(row.whisky) {
            continue;
        }
        let Some(candidates) = others_by_whisky.get(&row.whisky) else {
            continue;
        };

        let mut best: Option<(&TastingRow, f64)> = None;
        for candidate in candidates {
            let difference = (row.score - candidate.score).abs();
            let better = match best {
                None => difference > 0.0,
                Some((_, best_difference)) => difference > best_difference,
            };
            if better {
                best = Some((candidate, difference));
            }
        }

        if let Some((other, difference)) = best {
            out.push(DifferenceRow {
                whisky: row.whisky,
                description: other.description.clone(),
                distillery: other.distillery.clone(),
                age_years: other.age_years,
                other_attendee: other.attendee.clone(),
                target_score: row.score,
                other_score: other.score,
                absolute_difference: difference,
            });
        }
    }

    out.sort_by(|a, b| {
        b.absolute_difference
            .total_cmp(&a.absolute_difference)
            .then_with(|| a.whisky.cmp(&b.whisky))
    });
    out
}

fn history_rows(mine: &[&TastingRow]) -> Vec<HistoryRow> {
    let mut sorted: Vec<&TastingRow> = mine.to_vec();
    sorted.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.whisky.cmp(&b.whisky))
    });

    sorted
        .iter()
        .map(|row| HistoryRow {
            meeting: row.meeting,
            score: row.score,
            description: row.description.clone().unwrap_or_default(),
            distillery: row.distillery.clone().unwrap_or_default(),
            age_display: display_age(row.age_years),
            region: row.region.clone().unwrap_or_default(),
            abv_percent: row.abv.map(|abv| abv * 100.0),
            price: row.price,
        })
        .collect()
}

/// Whole-year age string, or the `NAN` marker for the missing-age sentinel
/// (and for ages never filled in).
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn display_age(age_years: Option<f64>) -> String {
    match age_years {
        Some(age) if age >= 0.0 => (age.round() as i64).to_string(),
        _ => "NAN".to_string(),
    }
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`ReportError::RenderFailed`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, ReportError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            ReportError::RenderFailed(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    fn must_err<T: std::fmt::Debug>(result: Result<T, ReportError>) -> ReportError {
        match result {
            Ok(value) => panic!("expected Err(..), got Ok({value:?})"),
            Err(err) => err,
        }
    }

    fn score(whisky: i64, attendee: &str, meeting: i64, value: f64) -> ScoreRecord {
        ScoreRecord {
            whisky: WhiskyId(whisky),
            attendee: attendee.to_string(),
            meeting,
            guest: None,
            score: value,
        }
    }

    fn guest_score(whisky: i64, attendee: &str, meeting: i64, value: f64) -> ScoreRecord {
        ScoreRecord {
            guest: Some(true),
            ..score(whisky, attendee, meeting, value)
        }
    }

    fn whisky(id: i64, distillery: &str, region: &str, meeting: i64) -> WhiskyRecord {
        WhiskyRecord {
            whisky: WhiskyId(id),
            distillery: distillery.to_string(),
            age_years: Some(12.0),
            description: format!("{distillery} {id}"),
            region: region.to_string(),
            abv: 0.5,
            price: 80.0,
            original_bottling: true,
            meeting,
        }
    }

    fn build(
        scores: Vec<ScoreRecord>,
        whiskies: Vec<WhiskyRecord>,
        options: &LoadOptions,
    ) -> TastingTable {
        must_ok(assemble_table(scores, whiskies, options))
    }

    fn no_cleaning() -> LoadOptions {
        LoadOptions {
            remove_guests: false,
            fill_missing_age: false,
            ..LoadOptions::default()
        }
    }

    #[test]
    fn left_join_preserves_score_cardinality() {
        let scores = vec![
            score(1, "Alice", 1, 8.0),
            score(2, "Alice", 1, 7.0),
            score(99, "Bob", 2, 6.0),
        ];
        let whiskies = vec![whisky(1, "Ardbeg", "Islay", 1), whisky(2, "Oban", "Highland", 1)];

        let table = build(scores, whiskies, &no_cleaning());

        assert_eq!(table.len(), 3);
        let orphan = &table.rows[2];
        assert_eq!(orphan.whisky, WhiskyId(99));
        assert_eq!(orphan.distillery, None);
        assert_eq!(orphan.region, None);
        assert_eq!(orphan.tasting_position, None);
    }

    #[test]
    fn duplicate_metadata_identifier_is_load_failure() {
        let err = must_err(assemble_table(
            vec![score(1, "Alice", 1, 8.0)],
            vec![whisky(1, "Ardbeg", "Islay", 1), whisky(1, "Oban", "Highland", 2)],
            &no_cleaning(),
        ));
        assert!(matches!(err, ReportError::LoadFailed(_)));
    }

    #[test]
    fn guest_removal_drops_flagged_rows_only() {
        let scores = vec![
            score(1, "Alice", 1, 8.0),
            guest_score(1, "Visitor", 1, 9.0),
            ScoreRecord {
                guest: Some(false),
                ..score(1, "Bob", 1, 7.0)
            },
        ];
        let options = LoadOptions {
            fill_missing_age: false,
            ..LoadOptions::default()
        };

        let table = build(scores, vec![whisky(1, "Ardbeg", "Islay", 1)], &options);

        assert_eq!(table.len(), 2);
        assert!(table.rows.iter().all(|row| row.guest != Some(true)));
    }

    #[test]
    fn region_exclusion_removes_fixed_region() {
        let scores = vec![score(1, "Alice", 1, 8.0), score(2, "Alice", 1, 7.0)];
        let whiskies = vec![
            whisky(1, "Ardbeg", "Islay", 1),
            whisky(2, "Buffalo Trace", EXCLUDED_REGION, 1),
        ];
        let options = LoadOptions {
            remove_us_whiskies: true,
            ..no_cleaning()
        };

        let table = build(scores, whiskies, &options);

        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].whisky, WhiskyId(1));
    }

    #[test]
    fn outlier_removal_applies_both_conditions() {
        // Whisky 1 mean is 5.0 (below 6): all its rows go, including the 8.0.
        // Whisky 2 mean is 7.0: only the individual 4.0 row goes.
        let scores = vec![
            score(1, "Alice", 1, 8.0),
            score(1, "Bob", 1, 2.0),
            score(2, "Alice", 1, 10.0),
            score(2, "Bob", 1, 4.0),
            score(2, "Carol", 1, 7.0),
        ];
        let options = LoadOptions {
            remove_thresh: 6.0,
            ..no_cleaning()
        };

        let table = build(scores, vec![], &options);

        assert_eq!(table.len(), 2);
        assert!(table.rows.iter().all(|row| row.whisky == WhiskyId(2)));
        assert!(table.rows.iter().all(|row| row.score >= 6.0));
    }

    #[test]
    fn rescaling_is_linear_in_the_threshold() {
        let scores = vec![score(1, "Alice", 1, 8.0), score(1, "Bob", 1, 6.5)];
        let options = LoadOptions {
            remove_thresh: 6.0,
            pointscale: true,
            ..no_cleaning()
        };

        let table = build(scores, vec![], &options);

        let values: Vec<f64> = table.rows.iter().map(|row| row.score).collect();
        assert_eq!(values, [20.0, 5.0]);
    }

    #[test]
    fn age_fill_flags_exactly_the_missing_rows() {
        let mut aged = whisky(1, "Ardbeg", "Islay", 1);
        aged.age_years = Some(10.0);
        let mut unaged = whisky(2, "Aultmore", "Speyside", 1);
        unaged.age_years = None;

        let scores = vec![score(1, "Alice", 1, 8.0), score(2, "Alice", 1, 7.0)];
        let options = LoadOptions {
            remove_guests: false,
            ..LoadOptions::default()
        };

        let table = build(scores, vec![aged, unaged], &options);

        assert!(table.rows.iter().all(|row| row.age_years.is_some()));
        assert!(!table.rows[0].age_missing);
        assert!(table.rows[1].age_missing);
        assert_eq!(table.rows[1].age_years, Some(MISSING_AGE_SENTINEL));
    }

    #[test]
    fn min_region_filter_counts_distinct_whiskies() {
        // Islay has two distinct whiskies, Speyside one (scored twice).
        let scores = vec![
            score(1, "Alice", 1, 8.0),
            score(2, "Alice", 1, 7.0),
            score(3, "Alice", 2, 9.0),
            score(3, "Bob", 2, 8.5),
        ];
        let whiskies = vec![
            whisky(1, "Ardbeg", "Islay", 1),
            whisky(2, "Laphroaig", "Islay", 1),
            whisky(3, "Aultmore", "Speyside", 2),
        ];
        let options = LoadOptions {
            min_whiskies_per_region: 2,
            ..no_cleaning()
        };

        let table = build(scores, whiskies, &options);

        assert_eq!(table.len(), 2);
        assert!(table
            .rows
            .iter()
            .all(|row| row.region.as_deref() == Some("Islay")));
    }

    #[test]
    fn tasting_position_ranks_by_identifier_within_meeting() {
        let whiskies = vec![
            whisky(30, "C", "Islay", 1),
            whisky(10, "A", "Islay", 1),
            whisky(20, "B", "Islay", 1),
            whisky(40, "D", "Speyside", 2),
        ];
        let scores = vec![
            score(10, "Alice", 1, 8.0),
            score(20, "Alice", 1, 8.0),
            score(30, "Alice", 1, 8.0),
            score(40, "Alice", 2, 8.0),
        ];

        let table = build(scores, whiskies, &no_cleaning());

        let positions: Vec<Option<u32>> =
            table.rows.iter().map(|row| row.tasting_position).collect();
        assert_eq!(positions, [Some(1), Some(2), Some(3), Some(1)]);
    }

    #[test]
    fn summary_counts_meetings_scores_and_price() {
        let scores = vec![
            score(1, "Alice", 1, 8.0),
            score(2, "Alice", 1, 6.0),
            score(3, "Alice", 2, 7.0),
            score(1, "Bob", 1, 5.0),
        ];
        let whiskies = vec![
            whisky(1, "Ardbeg", "Islay", 1),
            whisky(2, "Oban", "Highland", 1),
            whisky(3, "Aultmore", "Speyside", 2),
        ];
        let table = build(scores, whiskies, &no_cleaning());

        let report = must_ok(build_attendee_report(
            &table,
            "Alice",
            &ReportOptions::default(),
        ));

        assert_eq!(report.summary.meetings_attended, 2);
        assert_eq!(report.summary.whiskies_scored, 3);
        assert!((report.summary.avg_score - 7.0).abs() < f64::EPSILON);
        assert!((report.summary.total_price - 240.0).abs() < f64::EPSILON);
    }

    #[test]
    fn trend_moving_average_uses_partial_windows() {
        let scores = vec![
            score(1, "Alice", 1, 7.0),
            score(2, "Alice", 1, 8.0),
            score(3, "Alice", 1, 9.0),
        ];
        let table = build(scores, vec![], &no_cleaning());

        let report = must_ok(build_attendee_report(
            &table,
            "Alice",
            &ReportOptions::default(),
        ));

        let averages: Vec<f64> = report.trend.iter().map(|point| point.moving_avg).collect();
        assert_eq!(averages, [7.0, 7.5, 8.0]);
    }

    #[test]
    fn correlation_requires_minimum_overlap() {
        let mut scores = Vec::new();
        for id in 0..4 {
            scores.push(score(id, "Alice", 1, 7.0 + 0.5 * id as f64));
            scores.push(score(id, "Bob", 1, 6.0 + 0.5 * id as f64));
        }
        scores.push(score(0, "Carol", 1, 9.0));
        scores.push(score(1, "Carol", 1, 9.5));
        let table = build(scores, vec![], &no_cleaning());

        let options = ReportOptions {
            min_common_whiskies: 3,
            ..ReportOptions::default()
        };
        let report = must_ok(build_attendee_report(&table, "Alice", &options));

        assert_eq!(report.correlations.len(), 1);
        assert_eq!(report.correlations[0].attendee, "Bob");
        assert_eq!(report.correlations[0].common_whiskies, 4);
        assert!((report.correlations[0].correlation - 1.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_correlation_overlaps_are_skipped() {
        let mut scores = Vec::new();
        for id in 0..3 {
            scores.push(score(id, "Alice", 1, 7.0 + id as f64));
            // Bob scores everything identically, so his variance is zero.
            scores.push(score(id, "Bob", 1, 8.0));
        }
        let table = build(scores, vec![], &no_cleaning());

        let options = ReportOptions {
            min_common_whiskies: 2,
            ..ReportOptions::default()
        };
        let report = must_ok(build_attendee_report(&table, "Alice", &options));

        assert!(report.correlations.is_empty());
    }

    #[test]
    fn largest_difference_selects_maximum_not_first() {
        let scores = vec![
            score(1, "Alice", 1, 8.0),
            score(1, "Bob", 1, 6.0),
            score(1, "Carol", 1, 9.0),
        ];
        let table = build(scores, vec![whisky(1, "Ardbeg", "Islay", 1)], &no_cleaning());

        let report = must_ok(build_attendee_report(
            &table,
            "Alice",
            &ReportOptions::default(),
        ));

        assert_eq!(report.differences.len(), 1);
        let row = &report.differences[0];
        assert_eq!(row.other_attendee, "Bob");
        assert!((row.absolute_difference - 2.0).abs() < f64::EPSILON);
        assert!((row.target_score - 8.0).abs() < f64::EPSILON);
        assert!((row.other_score - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn equal_differences_resolve_to_first_attendee_by_name() {
        let scores = vec![
            score(1, "Alice", 1, 8.0),
            score(1, "Zed", 1, 6.0),
            score(1, "Bob", 1, 10.0),
        ];
        let table = build(scores, vec![], &no_cleaning());

        let report = must_ok(build_attendee_report(
            &table,
            "Alice",
            &ReportOptions::default(),
        ));

        assert_eq!(report.differences[0].other_attendee, "Bob");
    }

    #[test]
    fn zero_difference_whiskies_are_discarded() {
        let scores = vec![score(1, "Alice", 1, 8.0), score(1, "Bob", 1, 8.0)];
        let table = build(scores, vec![], &no_cleaning());

        let report = must_ok(build_attendee_report(
            &table,
            "Alice",
            &ReportOptions::default(),
        ));

        assert!(report.differences.is_empty());
    }

    #[test]
    fn unknown_attendee_is_person_not_found() {
        let table = build(vec![score(1, "Alice", 1, 8.0)], vec![], &no_cleaning());

        let err = must_err(build_attendee_report(
            &table,
            "Nobody",
            &ReportOptions::default(),
        ));

        assert_eq!(
            err,
            ReportError::PersonNotFound {
                attendee: "Nobody".to_string()
            }
        );
    }

    #[test]
    fn distillery_ranking_filters_and_breaks_ties_by_name() {
        let mut scores = Vec::new();
        // Two qualifying distilleries with equal means, one below the count bar.
        for id in 0..2 {
            scores.push(score(id, "Alice", 1, 8.0));
            scores.push(score(id + 10, "Alice", 1, 8.0));
        }
        scores.push(score(20, "Alice", 1, 9.5));
        let whiskies = vec![
            whisky(0, "Bunnahabhain", "Islay", 1),
            whisky(1, "Bunnahabhain", "Islay", 1),
            whisky(10, "Ardbeg", "Islay", 1),
            whisky(11, "Ardbeg", "Islay", 1),
            whisky(20, "Oban", "Highland", 1),
        ];
        let table = build(scores, whiskies, &no_cleaning());

        let options = ReportOptions {
            min_distillery_count: 2,
            distillery_rank_size: 1,
            ..ReportOptions::default()
        };
        let report = must_ok(build_attendee_report(&table, "Alice", &options));

        // Oban has only one whisky and never qualifies despite its mean.
        assert_eq!(report.distilleries.groups.len(), 2);
        assert_eq!(report.distilleries.top[0].name, "Ardbeg");
        assert_eq!(report.distilleries.bottom[0].name, "Ardbeg");
    }

    #[test]
    fn region_shortlist_caps_the_charted_groups() {
        let mut scores = Vec::new();
        let mut whiskies = Vec::new();
        // Eleven regions; "Region-00" is the busiest, "Region-10" the quietest.
        let mut id = 0;
        for region in 0..11 {
            for _ in 0..(12 - region) {
                scores.push(score(id, "Alice", 1, 7.5));
                whiskies.push(whisky(id, "Distillery", &format!("Region-{region:02}"), 1));
                id += 1;
            }
        }
        let table = build(scores, whiskies, &no_cleaning());

        let report = must_ok(build_attendee_report(
            &table,
            "Alice",
            &ReportOptions::default(),
        ));

        assert_eq!(report.regions.groups.len(), 10);
        assert!(report
            .regions
            .groups
            .iter()
            .all(|group| group.name != "Region-10"));
        assert_eq!(report.regions.groups[0].name, "Region-00");
    }

    #[test]
    fn history_rows_are_sorted_by_score_descending() {
        let mut old_whisky = whisky(2, "Oban", "Highland", 1);
        old_whisky.age_years = None;
        let scores = vec![
            score(1, "Alice", 1, 7.0),
            score(2, "Alice", 1, 9.0),
            score(3, "Alice", 2, 8.0),
        ];
        let whiskies = vec![whisky(1, "Ardbeg", "Islay", 1), old_whisky, whisky(3, "Aultmore", "Speyside", 2)];
        let options = LoadOptions {
            remove_guests: false,
            ..LoadOptions::default()
        };
        let table = build(scores, whiskies, &options);

        let report = must_ok(build_attendee_report(
            &table,
            "Alice",
            &ReportOptions::default(),
        ));

        let ordered: Vec<f64> = report.history.iter().map(|row| row.score).collect();
        assert_eq!(ordered, [9.0, 8.0, 7.0]);
        assert_eq!(report.history[0].age_display, "NAN");
        assert_eq!(report.history[1].age_display, "12");
        assert_eq!(report.history[0].abv_percent, Some(50.0));
    }

    #[test]
    fn display_age_rounds_and_marks_the_sentinel() {
        assert_eq!(display_age(Some(11.6)), "12");
        assert_eq!(display_age(Some(0.0)), "0");
        assert_eq!(display_age(Some(MISSING_AGE_SENTINEL)), "NAN");
        assert_eq!(display_age(None), "NAN");
    }

    #[test]
    fn invalid_options_are_configuration_errors() {
        let bad_load = LoadOptions {
            remove_thresh: -1.0,
            ..LoadOptions::default()
        };
        assert!(matches!(
            must_err(assemble_table(vec![], vec![], &bad_load)),
            ReportError::Configuration(_)
        ));

        let bad_report = ReportOptions {
            trend_window: 0,
            ..ReportOptions::default()
        };
        let table = TastingTable::default();
        assert!(matches!(
            must_err(build_attendee_report(&table, "Alice", &bad_report)),
            ReportError::Configuration(_)
        ));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arbitrary_scores() -> impl Strategy<Value = Vec<ScoreRecord>> {
            proptest::collection::vec(
                (0_i64..8, 0_usize..4, 1_i64..4, 0.0_f64..10.0).prop_map(
                    |(whisky, who, meeting, value)| ScoreRecord {
                        whisky: WhiskyId(whisky),
                        attendee: format!("Attendee-{who}"),
                        meeting,
                        guest: None,
                        score: value,
                    },
                ),
                0..40,
            )
        }

        proptest! {
            #[test]
            fn outlier_removal_leaves_no_score_below_threshold(
                scores in arbitrary_scores(),
                thresh in 0.1_f64..10.0,
            ) {
                let options = LoadOptions {
                    remove_guests: false,
                    fill_missing_age: false,
                    remove_thresh: thresh,
                    ..LoadOptions::default()
                };
                let table = match assemble_table(scores, vec![], &options) {
                    Ok(table) => table,
                    Err(err) => panic!("assemble failed: {err}"),
                };

                prop_assert!(table.rows.iter().all(|row| row.score >= thresh));

                let mut sums: HashMap<WhiskyId, (f64, usize)> = HashMap::new();
                for row in &table.rows {
                    let entry = sums.entry(row.whisky).or_insert((0.0, 0));
                    entry.0 += row.score;
                    entry.1 += 1;
                }
                for (sum, count) in sums.values() {
                    prop_assert!(sum / *count as f64 >= thresh);
                }
            }

            #[test]
            fn rescaling_matches_the_closed_form(
                scores in arbitrary_scores(),
                thresh in 0.1_f64..10.0,
            ) {
                let plain = LoadOptions {
                    remove_guests: false,
                    fill_missing_age: false,
                    remove_thresh: thresh,
                    ..LoadOptions::default()
                };
                let scaled = LoadOptions {
                    pointscale: true,
                    ..plain.clone()
                };

                let before = match assemble_table(scores.clone(), vec![], &plain) {
                    Ok(table) => table,
                    Err(err) => panic!("assemble failed: {err}"),
                };
                let after = match assemble_table(scores, vec![], &scaled) {
                    Ok(table) => table,
                    Err(err) => panic!("assemble failed: {err}"),
                };

                prop_assert_eq!(before.len(), after.len());
                for (raw, rescaled) in before.rows.iter().zip(&after.rows) {
                    prop_assert!(((raw.score - thresh) * 10.0 - rescaled.score).abs() < 1e-9);
                }
            }
        }
    }
}
