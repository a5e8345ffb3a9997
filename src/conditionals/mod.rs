//! Conditional restrictions: the `value @ (condition)` grammar and the
//! dump/check command pair.
//!
//! `dump` pulls conditional turn restrictions out of the input artifact into
//! a CSV; `check` filters that CSV down to the restrictions active at a
//! given UTC instant, mapping the instant to local time through timezone
//! polygons.

pub mod opening_hours;
pub mod timezone;

use std::path::Path;

use anyhow::{Context, Result};

use crate::conditionals::opening_hours::{check_opening_hours, parse_opening_hours, CivilTime};
use crate::conditionals::timezone::TimezonePolygons;
use crate::formats::input_graph::InputGraph;

/// One `value @ condition` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalClause {
    pub value: String,
    pub condition: String,
}

/// Split a conditional tag value into clauses. Clauses are separated by `;`
/// at parenthesis depth zero; the condition may be parenthesized or bare.
///
/// `"no_right_turn @ (Mo-Fr 07:00-09:00); only_straight @ wet"` yields two
/// clauses.
pub fn parse_conditional_tag(input: &str) -> Vec<ConditionalClause> {
    let mut clauses = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    let bytes = input.as_bytes();
    for (index, &byte) in bytes.iter().enumerate() {
        match byte {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b';' if depth == 0 => {
                if let Some(clause) = parse_clause(&input[start..index]) {
                    clauses.push(clause);
                }
                start = index + 1;
            }
            _ => {}
        }
    }
    if let Some(clause) = parse_clause(&input[start..]) {
        clauses.push(clause);
    }
    clauses
}

fn parse_clause(input: &str) -> Option<ConditionalClause> {
    let (value, condition) = input.split_once('@')?;
    let condition = condition.trim();
    let condition = condition
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(condition);
    Some(ConditionalClause {
        value: value.trim().to_string(),
        condition: condition.trim().to_string(),
    })
}

/// `conditionals dump`: write conditional restrictions from the input graph
/// as CSV rows `(from, via, to, tag, value, condition, lon, lat)`.
pub fn dump_conditionals(input_path: &Path, csv_path: &Path) -> Result<usize> {
    let input = InputGraph::read(input_path)
        .with_context(|| format!("failed to read {}", input_path.display()))?;

    let mut writer = csv::Writer::from_path(csv_path)
        .with_context(|| format!("failed to create {}", csv_path.display()))?;

    let mut written = 0usize;
    for restriction in &input.restrictions {
        if restriction.condition.is_empty() {
            continue;
        }
        let via = input
            .nodes
            .get(restriction.via as usize)
            .context("restriction references a node outside the graph")?;
        let value = if restriction.is_only { "only_turn" } else { "no_turn" };
        writer.write_record([
            restriction.from.to_string(),
            restriction.via.to_string(),
            restriction.to.to_string(),
            "restriction:conditional".to_string(),
            value.to_string(),
            restriction.condition.clone(),
            format!("{:.6}", f64::from(via.lon) / 1e6),
            format!("{:.6}", f64::from(via.lat) / 1e6),
        ])?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// `conditionals check`: keep the CSV rows whose condition is active at the
/// given UTC instant, resolving local time through the timezone shapes.
/// Rows outside every shape and rows with unparseable conditions are
/// dropped (the latter counted in the return value).
pub fn check_conditionals(
    csv_in: &Path,
    csv_out: &Path,
    tz_shapes: Option<&Path>,
    utc_seconds: i64,
    value_override: Option<u32>,
) -> Result<CheckStats> {
    let shapes = tz_shapes.map(TimezonePolygons::load).transpose()?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(csv_in)
        .with_context(|| format!("failed to read {}", csv_in.display()))?;
    let mut writer = csv::Writer::from_path(csv_out)
        .with_context(|| format!("failed to create {}", csv_out.display()))?;

    let mut stats = CheckStats::default();
    for record in reader.records() {
        let record = record?;
        if record.len() < 8 {
            stats.unparsed += 1;
            continue;
        }
        let condition = &record[5];
        let lon: f64 = record[6].parse().unwrap_or(0.0);
        let lat: f64 = record[7].parse().unwrap_or(0.0);

        let offset = match &shapes {
            Some(shapes) => match shapes.offset_at(lon, lat) {
                Some(offset) => offset,
                None => {
                    stats.outside_shapes += 1;
                    continue;
                }
            },
            None => 0,
        };

        let Some(local) = TimezonePolygons::local_time(utc_seconds, offset) else {
            stats.unparsed += 1;
            continue;
        };
        let Some(hours) = parse_opening_hours(condition) else {
            stats.unparsed += 1;
            continue;
        };

        if check_opening_hours(&hours, &CivilTime::from(local)) {
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            if let Some(value) = value_override {
                row[4] = value.to_string();
            }
            writer.write_record(&row)?;
            stats.active += 1;
        } else {
            stats.inactive += 1;
        }
    }
    writer.flush()?;
    Ok(stats)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CheckStats {
    pub active: usize,
    pub inactive: usize,
    pub unparsed: usize,
    pub outside_shapes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_with_parentheses() {
        let clauses = parse_conditional_tag("no_right_turn @ (Mo-Fr 07:00-09:00)");
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].value, "no_right_turn");
        assert_eq!(clauses[0].condition, "Mo-Fr 07:00-09:00");
    }

    #[test]
    fn test_bare_condition_and_multiple_clauses() {
        let clauses =
            parse_conditional_tag("no_left_turn @ wet; only_straight @ (Sa-Su 10:00-18:00)");
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0].condition, "wet");
        assert_eq!(clauses[1].value, "only_straight");
    }

    #[test]
    fn test_semicolon_inside_parentheses_kept() {
        let clauses = parse_conditional_tag("no_u_turn @ (Mo 08:00-10:00; Fr 16:00-18:00)");
        assert_eq!(clauses.len(), 1);
        assert_eq!(clauses[0].condition, "Mo 08:00-10:00; Fr 16:00-18:00");
    }

    #[test]
    fn test_clause_without_at_is_dropped() {
        assert!(parse_conditional_tag("no_right_turn").is_empty());
    }
}
