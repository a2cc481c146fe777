//! Resolution of symbolic period options into concrete date intervals, all
//! anchored at the single reference instant captured when the store is
//! created.

use chrono::{Datelike, Days, Months, NaiveDate};
use once_cell::sync::Lazy;
use searchstate_core::{
    Combinator, ComparisonId, Condition, DateOptionId, Domain, DomainToken, FieldType, PeriodId,
    Result,
};
use std::collections::BTreeMap;

/// Half-open `[start, end)` interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Domain clause `& (field >= start) (field < end)`, with bounds
    /// formatted per the field type.
    pub fn to_domain(self, field_name: &str, field_type: FieldType) -> Domain {
        let (lo, hi) = match field_type {
            FieldType::Datetime => (
                self.start.format("%Y-%m-%d 00:00:00").to_string(),
                self.end.format("%Y-%m-%d 00:00:00").to_string(),
            ),
            _ => (
                self.start.format("%Y-%m-%d").to_string(),
                self.end.format("%Y-%m-%d").to_string(),
            ),
        };
        Domain(vec![
            DomainToken::Op(Combinator::And),
            DomainToken::Leaf(Condition::new(field_name, ">=", lo)),
            DomainToken::Leaf(Condition::new(field_name, "<", hi)),
        ])
    }
}

fn month_start(year: i32, month: u32) -> NaiveDate {
    // month is always produced by shift_month, so it is in 1..=12
    NaiveDate::from_ymd_opt(year, month, 1).expect("month start")
}

fn shift_month(year: i32, month0: i32, offset: i32) -> (i32, u32) {
    let total = year * 12 + month0 + offset;
    (total.div_euclid(12), (total.rem_euclid(12) + 1) as u32)
}

fn month_range(year: i32, month: u32) -> DateRange {
    let start = month_start(year, month);
    DateRange {
        start,
        end: start + Months::new(1),
    }
}

fn quarter_range(year: i32, quarter: u32) -> DateRange {
    let start = month_start(year, 3 * (quarter - 1) + 1);
    DateRange {
        start,
        end: start + Months::new(3),
    }
}

fn year_range(year: i32) -> DateRange {
    DateRange {
        start: month_start(year, 1),
        end: month_start(year + 1, 1),
    }
}

fn week_range(date: NaiveDate) -> DateRange {
    let start = date - Days::new(u64::from(date.weekday().num_days_from_monday()));
    DateRange {
        start,
        end: start + Days::new(7),
    }
}

fn day_range(date: NaiveDate) -> DateRange {
    DateRange {
        start: date,
        end: date + Days::new(1),
    }
}

fn year_offset(option: DateOptionId) -> i32 {
    match option {
        DateOptionId::ThisYear => 0,
        DateOptionId::LastYear => -1,
        DateOptionId::AntepenultimateYear => -2,
        _ => 0,
    }
}

fn month_offset(option: DateOptionId) -> Option<i32> {
    match option {
        DateOptionId::ThisMonth => Some(0),
        DateOptionId::LastMonth => Some(-1),
        DateOptionId::AntepenultimateMonth => Some(-2),
        _ => None,
    }
}

fn quarter_of(option: DateOptionId) -> Option<u32> {
    match option {
        DateOptionId::FirstQuarter => Some(1),
        DateOptionId::SecondQuarter => Some(2),
        DateOptionId::ThirdQuarter => Some(3),
        DateOptionId::FourthQuarter => Some(4),
        _ => None,
    }
}

/// Interval selected by a year option, alone or paired with a sub-year
/// option. The sub-year month offset applies within the selected year, so
/// `last_month` under `last_year` can spill into the year before.
pub fn date_option_range(
    reference: NaiveDate,
    year: DateOptionId,
    sub: Option<DateOptionId>,
) -> DateRange {
    let y = reference.year() + year_offset(year);
    match sub {
        None => year_range(y),
        Some(option) => {
            if let Some(offset) = month_offset(option) {
                let (yy, m) = shift_month(y, reference.month0() as i32, offset);
                month_range(yy, m)
            } else if let Some(q) = quarter_of(option) {
                quarter_range(y, q)
            } else {
                // a year option in sub position selects that year outright
                year_range(reference.year() + year_offset(option))
            }
        }
    }
}

/// The OR-combined domain of a date filter, derived from its selected
/// options. Sub-year options pair with every selected year (defaulting to
/// `this_year` when none is selected); years without sub-year options stand
/// alone.
pub fn date_filter_domain(
    reference: NaiveDate,
    field_name: &str,
    field_type: FieldType,
    current: &[DateOptionId],
) -> Result<Domain> {
    let years: Vec<DateOptionId> = current.iter().copied().filter(|o| o.is_year()).collect();
    let subs: Vec<DateOptionId> = current.iter().copied().filter(|o| !o.is_year()).collect();

    let mut parts = Vec::new();
    if subs.is_empty() {
        for year in &years {
            parts.push(date_option_range(reference, *year, None).to_domain(field_name, field_type));
        }
    } else {
        let years = if years.is_empty() {
            vec![DateOptionId::DEFAULT_YEAR]
        } else {
            years
        };
        for sub in &subs {
            for year in &years {
                parts.push(
                    date_option_range(reference, *year, Some(*sub))
                        .to_domain(field_name, field_type),
                );
            }
        }
    }
    Domain::or(&parts)
}

/// Date-option metadata for menus: sub-year options are group 1, year
/// options group 2.
#[derive(Debug, Clone, Copy)]
pub struct DateOptionDef {
    pub id: DateOptionId,
    pub group_number: u8,
}

pub const DATE_OPTION_GENERATORS: [DateOptionDef; 10] = [
    DateOptionDef { id: DateOptionId::ThisMonth, group_number: 1 },
    DateOptionDef { id: DateOptionId::LastMonth, group_number: 1 },
    DateOptionDef { id: DateOptionId::AntepenultimateMonth, group_number: 1 },
    DateOptionDef { id: DateOptionId::FourthQuarter, group_number: 1 },
    DateOptionDef { id: DateOptionId::ThirdQuarter, group_number: 1 },
    DateOptionDef { id: DateOptionId::SecondQuarter, group_number: 1 },
    DateOptionDef { id: DateOptionId::FirstQuarter, group_number: 1 },
    DateOptionDef { id: DateOptionId::ThisYear, group_number: 2 },
    DateOptionDef { id: DateOptionId::LastYear, group_number: 2 },
    DateOptionDef { id: DateOptionId::AntepenultimateYear, group_number: 2 },
];

/// Menu label of a date option at the given reference date: month names,
/// quarter labels, year numbers.
pub fn date_option_description(reference: NaiveDate, option: DateOptionId) -> String {
    if let Some(offset) = month_offset(option) {
        let (y, m) = shift_month(reference.year(), reference.month0() as i32, offset);
        return month_start(y, m).format("%B").to_string();
    }
    if let Some(q) = quarter_of(option) {
        return format!("Q{q}");
    }
    (reference.year() + year_offset(option)).to_string()
}

static PERIOD_LABELS: Lazy<BTreeMap<PeriodId, (&'static str, u8)>> = Lazy::new(|| {
    BTreeMap::from([
        (PeriodId::Last7Days, ("Last 7 Days", 1)),
        (PeriodId::Last30Days, ("Last 30 Days", 1)),
        (PeriodId::Last365Days, ("Last 365 Days", 1)),
        (PeriodId::Last5Years, ("Last 5 Years", 1)),
        (PeriodId::Today, ("Today", 2)),
        (PeriodId::ThisWeek, ("This Week", 2)),
        (PeriodId::ThisMonth, ("This Month", 2)),
        (PeriodId::ThisQuarter, ("This Quarter", 2)),
        (PeriodId::ThisYear, ("This Year", 2)),
        (PeriodId::Yesterday, ("Yesterday", 3)),
        (PeriodId::LastWeek, ("Last Week", 3)),
        (PeriodId::LastMonth, ("Last Month", 3)),
        (PeriodId::LastQuarter, ("Last Quarter", 3)),
        (PeriodId::LastYear, ("Last Year", 3)),
    ])
});

pub const PERIOD_IDS: [PeriodId; 14] = [
    PeriodId::Last7Days,
    PeriodId::Last30Days,
    PeriodId::Last365Days,
    PeriodId::Last5Years,
    PeriodId::Today,
    PeriodId::ThisWeek,
    PeriodId::ThisMonth,
    PeriodId::ThisQuarter,
    PeriodId::ThisYear,
    PeriodId::Yesterday,
    PeriodId::LastWeek,
    PeriodId::LastMonth,
    PeriodId::LastQuarter,
    PeriodId::LastYear,
];

pub fn period_description(period: PeriodId) -> &'static str {
    PERIOD_LABELS.get(&period).map(|(label, _)| *label).unwrap_or("")
}

pub fn period_group_number(period: PeriodId) -> u8 {
    PERIOD_LABELS.get(&period).map(|(_, g)| *g).unwrap_or(0)
}

pub fn comparison_description(comparison: ComparisonId) -> &'static str {
    match comparison {
        ComparisonId::PreviousPeriod => "Previous Period",
        ComparisonId::PreviousYear => "Previous Year",
    }
}

/// Interval covered by a time-range period. Calendar periods are calendar
/// aligned; rolling periods are the n units ending today, half-open at
/// tomorrow's start.
pub fn period_range(reference: NaiveDate, period: PeriodId) -> DateRange {
    let tomorrow = reference + Days::new(1);
    match period {
        PeriodId::Today => day_range(reference),
        PeriodId::Yesterday => day_range(reference - Days::new(1)),
        PeriodId::ThisWeek => week_range(reference),
        PeriodId::LastWeek => week_range(reference - Days::new(7)),
        PeriodId::ThisMonth => month_range(reference.year(), reference.month()),
        PeriodId::LastMonth => {
            let (y, m) = shift_month(reference.year(), reference.month0() as i32, -1);
            month_range(y, m)
        }
        PeriodId::ThisQuarter => quarter_range(reference.year(), reference.month0() / 3 + 1),
        PeriodId::LastQuarter => {
            let start = month_start(reference.year(), (reference.month0() / 3) * 3 + 1);
            let start = start - Months::new(3);
            DateRange {
                start,
                end: start + Months::new(3),
            }
        }
        PeriodId::ThisYear => year_range(reference.year()),
        PeriodId::LastYear => year_range(reference.year() - 1),
        PeriodId::Last7Days => DateRange {
            start: tomorrow - Days::new(7),
            end: tomorrow,
        },
        PeriodId::Last30Days => DateRange {
            start: tomorrow - Days::new(30),
            end: tomorrow,
        },
        PeriodId::Last365Days => DateRange {
            start: tomorrow - Days::new(365),
            end: tomorrow,
        },
        PeriodId::Last5Years => DateRange {
            start: tomorrow - Months::new(60),
            end: tomorrow,
        },
    }
}

/// Interval the active period is compared against: the immediately preceding
/// period of the same shape, or the same period one year back.
pub fn comparison_range(
    reference: NaiveDate,
    period: PeriodId,
    comparison: ComparisonId,
) -> DateRange {
    let base = period_range(reference, period);
    let shift = |range: DateRange, months: u32, days: u64| {
        if months > 0 {
            DateRange {
                start: range.start - Months::new(months),
                end: range.end - Months::new(months),
            }
        } else {
            DateRange {
                start: range.start - Days::new(days),
                end: range.end - Days::new(days),
            }
        }
    };
    match comparison {
        ComparisonId::PreviousYear => shift(base, 12, 0),
        ComparisonId::PreviousPeriod => match period {
            PeriodId::Today | PeriodId::Yesterday => shift(base, 0, 1),
            PeriodId::ThisWeek | PeriodId::LastWeek | PeriodId::Last7Days => shift(base, 0, 7),
            PeriodId::ThisMonth | PeriodId::LastMonth => shift(base, 1, 0),
            PeriodId::ThisQuarter | PeriodId::LastQuarter => shift(base, 3, 0),
            PeriodId::ThisYear | PeriodId::LastYear => shift(base, 12, 0),
            PeriodId::Last30Days => shift(base, 0, 30),
            PeriodId::Last365Days => shift(base, 0, 365),
            PeriodId::Last5Years => shift(base, 60, 0),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, 15).unwrap()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn year_option_alone() {
        let r = date_option_range(reference(), DateOptionId::LastYear, None);
        assert_eq!(r.start, ymd(2023, 1, 1));
        assert_eq!(r.end, ymd(2024, 1, 1));
    }

    #[test]
    fn month_option_within_year() {
        let r = date_option_range(
            reference(),
            DateOptionId::LastYear,
            Some(DateOptionId::LastMonth),
        );
        assert_eq!(r.start, ymd(2023, 7, 1));
        assert_eq!(r.end, ymd(2023, 8, 1));
    }

    #[test]
    fn month_option_spills_into_previous_year() {
        let january = ymd(2024, 1, 10);
        let r = date_option_range(january, DateOptionId::ThisYear, Some(DateOptionId::LastMonth));
        assert_eq!(r.start, ymd(2023, 12, 1));
        assert_eq!(r.end, ymd(2024, 1, 1));
    }

    #[test]
    fn quarter_option_is_absolute() {
        let r = date_option_range(
            reference(),
            DateOptionId::ThisYear,
            Some(DateOptionId::FirstQuarter),
        );
        assert_eq!(r.start, ymd(2024, 1, 1));
        assert_eq!(r.end, ymd(2024, 4, 1));
    }

    #[test]
    fn sub_year_defaults_to_this_year() {
        let d = date_filter_domain(
            reference(),
            "date_order",
            FieldType::Date,
            &[DateOptionId::ThisMonth],
        )
        .unwrap();
        // one clause only: this_month paired with the implicit this_year
        assert_eq!(d.conditions().count(), 2);
        let bounds: Vec<String> = d
            .conditions()
            .map(|c| c.value().as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(bounds, vec!["2024-08-01", "2024-09-01"]);
    }

    #[test]
    fn sub_year_crosses_with_every_year() {
        let d = date_filter_domain(
            reference(),
            "date_order",
            FieldType::Date,
            &[
                DateOptionId::ThisMonth,
                DateOptionId::ThisYear,
                DateOptionId::LastYear,
            ],
        )
        .unwrap();
        // two OR-combined clauses, four bound conditions
        assert_eq!(d.conditions().count(), 4);
    }

    #[test]
    fn years_alone_or_combine() {
        let d = date_filter_domain(
            reference(),
            "date_order",
            FieldType::Date,
            &[DateOptionId::ThisYear, DateOptionId::LastYear],
        )
        .unwrap();
        assert_eq!(d.conditions().count(), 4);
    }

    #[test]
    fn no_options_no_domain() {
        let d = date_filter_domain(reference(), "date_order", FieldType::Date, &[]).unwrap();
        assert!(d.is_empty());
    }

    #[test]
    fn datetime_bounds_carry_time() {
        let r = day_range(reference());
        let d = r.to_domain("create_date", FieldType::Datetime);
        let bounds: Vec<&str> = d.conditions().filter_map(|c| c.value().as_str()).collect();
        assert_eq!(bounds, vec!["2024-08-15 00:00:00", "2024-08-16 00:00:00"]);
    }

    #[test]
    fn week_starts_monday() {
        // 2024-08-15 is a Thursday
        let r = period_range(reference(), PeriodId::ThisWeek);
        assert_eq!(r.start, ymd(2024, 8, 12));
        assert_eq!(r.end, ymd(2024, 8, 19));
    }

    #[test]
    fn rolling_window_ends_tomorrow() {
        let r = period_range(reference(), PeriodId::Last7Days);
        assert_eq!(r.end, ymd(2024, 8, 16));
        assert_eq!(r.start, ymd(2024, 8, 9));
    }

    #[test]
    fn last_quarter_wraps_year() {
        let january = ymd(2024, 2, 1);
        let r = period_range(january, PeriodId::LastQuarter);
        assert_eq!(r.start, ymd(2023, 10, 1));
        assert_eq!(r.end, ymd(2024, 1, 1));
    }

    #[test]
    fn previous_period_of_this_month() {
        let r = comparison_range(reference(), PeriodId::ThisMonth, ComparisonId::PreviousPeriod);
        assert_eq!(r.start, ymd(2024, 7, 1));
        assert_eq!(r.end, ymd(2024, 8, 1));
    }

    #[test]
    fn previous_year_keeps_shape() {
        let r = comparison_range(reference(), PeriodId::ThisQuarter, ComparisonId::PreviousYear);
        assert_eq!(r.start, ymd(2023, 7, 1));
        assert_eq!(r.end, ymd(2023, 10, 1));
    }

    #[test]
    fn month_description_tracks_reference() {
        assert_eq!(
            date_option_description(reference(), DateOptionId::LastMonth),
            "July"
        );
        assert_eq!(
            date_option_description(reference(), DateOptionId::LastYear),
            "2023"
        );
        assert_eq!(
            date_option_description(reference(), DateOptionId::SecondQuarter),
            "Q2"
        );
    }
}
