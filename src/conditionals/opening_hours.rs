//! Opening-hours expressions, the temporal selector of conditional
//! restrictions (`Mo-Fr 07:00-09:00`, `24/7`, `Jan 10-Feb 20 off`, ...).
//!
//! Supported subset:
//! - `24/7`
//! - month/day ranges, with optional year
//! - weekday ranges, with optional (parsed, unused) nth-of-month selector
//! - time spans, including spans wrapping past midnight via extended
//!   24-48h hours
//! - rule modifiers {open, closed, off, unknown}
//!
//! Not supported: week numbers, holidays/events, day offsets, periodic
//! ranges. Parse failures yield `None`; callers count them as semantic
//! warnings instead of failing the build.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

const MINUTES_PER_DAY: i32 = 24 * 60;

/// A civil timestamp broken into the fields the evaluation needs.
#[derive(Debug, Clone, Copy)]
pub struct CivilTime {
    pub year: i32,
    /// 1-12
    pub month: u32,
    /// 1-31
    pub day: u32,
    /// 0 = Sunday ... 6 = Saturday
    pub weekday: u32,
    pub hour: u32,
    pub minute: u32,
}

impl From<NaiveDateTime> for CivilTime {
    fn from(value: NaiveDateTime) -> Self {
        Self {
            year: value.year(),
            month: value.month(),
            day: value.day(),
            weekday: value.weekday().num_days_from_sunday(),
            hour: value.hour(),
            minute: value.minute(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Modifier {
    Unknown,
    #[default]
    Open,
    Closed,
    Off,
    TwentyFourSeven,
}

/// Minutes since midnight; may exceed 24h for overnight span ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Time {
    pub minutes: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpan {
    pub from: Time,
    pub to: Time,
}

impl TimeSpan {
    pub fn new(from: Time, mut to: Time) -> Self {
        if to.minutes < from.minutes {
            to.minutes += MINUTES_PER_DAY;
        }
        Self { from, to }
    }

    /// Overnight spans split the day decision: `22:00-03:00` at 2am matches
    /// through the *next-day* branch, which weekday/monthday checks then
    /// evaluate against the previous day's selector.
    fn is_in_range(&self, time: &CivilTime, use_curr_day: &mut bool, use_next_day: &mut bool) -> bool {
        let minutes = (time.hour * 60 + time.minute) as i32;
        if self.to.minutes > MINUTES_PER_DAY {
            *use_curr_day = self.from.minutes <= minutes;
            *use_next_day = minutes < self.to.minutes - MINUTES_PER_DAY;
        } else {
            *use_curr_day = self.from.minutes <= minutes && minutes < self.to.minutes;
            *use_next_day = false;
        }
        *use_curr_day || *use_next_day
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdayRange {
    weekdays: u8,
    overnight_weekdays: u8,
}

impl WeekdayRange {
    /// Mask for [from, to] with wrap-around, e.g. [5, 2] covers Fr-Tu.
    pub fn new(from: u8, to: u8) -> Self {
        let weekdays: i32 = if from <= to {
            ((1 << (to - from + 1)) - 1) << from
        } else {
            !(((1 << (from - to - 1)) - 1) << (to + 1))
        };
        let weekdays = (weekdays & 0x7f) as u8;
        let overnight_weekdays = ((weekdays << 1) | if weekdays & 0x40 != 0 { 1 } else { 0 }) & 0x7f;
        Self {
            weekdays,
            overnight_weekdays,
        }
    }

    fn is_in_range(&self, time: &CivilTime, use_curr_day: bool, use_next_day: bool) -> bool {
        (use_curr_day && self.weekdays & (1 << time.weekday) != 0)
            || (use_next_day && self.overnight_weekdays & (1 << time.weekday) != 0)
    }
}

/// A (possibly partial) calendar date; zero fields are unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Monthday {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl Monthday {
    fn is_valid(&self) -> bool {
        self.year > 0 || self.month != 0 || self.day != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonthdayRange {
    pub from: Monthday,
    pub to: Monthday,
}

fn end_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .unwrap()
        .pred_opt()
        .unwrap()
}

impl MonthdayRange {
    fn is_in_range(&self, time: &CivilTime, use_curr_day: bool, use_next_day: bool) -> bool {
        let Some(current) = NaiveDate::from_ymd_opt(time.year, time.month, time.day) else {
            return false;
        };

        let mut date_from = NaiveDate::MIN;
        let mut date_to = NaiveDate::MAX;

        if self.from.is_valid() {
            let year = if self.from.year == 0 { time.year } else { self.from.year };
            let month = if self.from.month == 0 { time.month } else { u32::from(self.from.month) };
            let day = if self.from.day == 0 { 1 } else { u32::from(self.from.day) };
            match NaiveDate::from_ymd_opt(year, month, day) {
                Some(date) => date_from = date,
                None => return false,
            }
        }
        if self.to.is_valid() {
            let year = if self.to.year != 0 {
                self.to.year
            } else if self.from.year != 0 {
                self.from.year
            } else {
                time.year
            };
            let month = if self.to.month != 0 {
                u32::from(self.to.month)
            } else if self.from.month != 0 {
                u32::from(self.from.month)
            } else {
                time.month
            };
            date_to = if self.to.day == 0 {
                end_of_month(year, month)
            } else {
                match NaiveDate::from_ymd_opt(year, month, u32::from(self.to.day)) {
                    Some(date) => date,
                    None => return false,
                }
            };
        } else if self.to == Monthday::default() {
            date_to = date_from;
        }

        if !use_curr_day {
            date_from = date_from.succ_opt().unwrap_or(date_from);
        }
        if use_next_day && date_to != NaiveDate::MAX {
            date_to = date_to.succ_opt().unwrap_or(date_to);
        }

        date_from <= current && current <= date_to
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpeningHours {
    pub times: Vec<TimeSpan>,
    pub weekdays: Vec<WeekdayRange>,
    pub monthdays: Vec<MonthdayRange>,
    pub modifier: Modifier,
}

impl OpeningHours {
    pub fn is_in_range(&self, time: &CivilTime) -> bool {
        if self.modifier == Modifier::TwentyFourSeven {
            return true;
        }
        let mut use_curr_day = true;
        let mut use_next_day = false;

        let time_matches = self.times.is_empty()
            || self
                .times
                .iter()
                .any(|span| span.is_in_range(time, &mut use_curr_day, &mut use_next_day));

        time_matches
            && (self.weekdays.is_empty()
                || self
                    .weekdays
                    .iter()
                    .any(|range| range.is_in_range(time, use_curr_day, use_next_day)))
            && (self.monthdays.is_empty()
                || self
                    .monthdays
                    .iter()
                    .any(|range| range.is_in_range(time, use_curr_day, use_next_day)))
    }
}

/// Whether the condition grants access at `time`: a matched rule counts
/// through its modifier, `off`/`closed` rules negate.
pub fn check_opening_hours(hours: &[OpeningHours], time: &CivilTime) -> bool {
    let mut state = false;
    for rule in hours {
        if rule.is_in_range(time) {
            state = !matches!(rule.modifier, Modifier::Closed | Modifier::Off);
        }
    }
    state
}

// --- parsing -------------------------------------------------------------

struct Scanner<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn skip_blank(&mut self) {
        while self.pos < self.input.len() && (self.input[self.pos] == b' ' || self.input[self.pos] == b'\t') {
            self.pos += 1;
        }
    }

    fn at_end(&mut self) -> bool {
        self.skip_blank();
        self.pos >= self.input.len()
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_blank();
        self.input.get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn number(&mut self) -> Option<u32> {
        self.skip_blank();
        let start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .ok()?
            .parse()
            .ok()
    }

    fn word(&mut self) -> Option<&'a str> {
        self.skip_blank();
        let start = self.pos;
        while self.pos < self.input.len() && self.input[self.pos].is_ascii_alphabetic() {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        std::str::from_utf8(&self.input[start..self.pos]).ok()
    }

    fn save(&self) -> usize {
        self.pos
    }

    fn restore(&mut self, pos: usize) {
        self.pos = pos;
    }
}

fn weekday_index(word: &str) -> Option<u8> {
    match word {
        "Su" => Some(0),
        "Mo" => Some(1),
        "Tu" => Some(2),
        "We" => Some(3),
        "Th" => Some(4),
        "Fr" => Some(5),
        "Sa" => Some(6),
        _ => None,
    }
}

fn month_index(word: &str) -> Option<u8> {
    match word {
        "Jan" => Some(1),
        "Feb" => Some(2),
        "Mar" => Some(3),
        "Apr" => Some(4),
        "May" => Some(5),
        "Jun" => Some(6),
        "Jul" => Some(7),
        "Aug" => Some(8),
        "Sep" => Some(9),
        "Oct" => Some(10),
        "Nov" => Some(11),
        "Dec" => Some(12),
        _ => None,
    }
}

fn modifier_keyword(word: &str) -> Option<Modifier> {
    match word {
        "open" => Some(Modifier::Open),
        "closed" => Some(Modifier::Closed),
        "off" => Some(Modifier::Off),
        "unknown" => Some(Modifier::Unknown),
        _ => None,
    }
}

/// `HH:MM` with extended hours up to 48 for overnight ends.
fn parse_time(scanner: &mut Scanner) -> Option<Time> {
    let hour = scanner.number()?;
    if !scanner.eat(b':') {
        return None;
    }
    let minute = scanner.number()?;
    if hour > 48 || minute > 59 {
        return None;
    }
    Some(Time {
        minutes: (hour * 60 + minute) as i32,
    })
}

fn parse_time_spans(scanner: &mut Scanner, rule: &mut OpeningHours) -> bool {
    loop {
        let from = match parse_time(scanner) {
            Some(time) => time,
            None => return false,
        };
        if !scanner.eat(b'-') {
            return false;
        }
        let to = match parse_time(scanner) {
            Some(time) => time,
            None => return false,
        };
        rule.times.push(TimeSpan::new(from, to));
        if !scanner.eat(b',') {
            return true;
        }
    }
}

fn parse_weekday_ranges(scanner: &mut Scanner, rule: &mut OpeningHours) -> bool {
    loop {
        let checkpoint = scanner.save();
        let from = match scanner.word().and_then(weekday_index) {
            Some(day) => day,
            None => {
                scanner.restore(checkpoint);
                return false;
            }
        };
        let mut to = from;
        if scanner.eat(b'-') {
            to = match scanner.word().and_then(weekday_index) {
                Some(day) => day,
                None => return false,
            };
        } else if scanner.eat(b'[') {
            // nth-of-month selector; parsed for acceptance, not evaluated
            let _negative = scanner.eat(b'-');
            if scanner.number().is_none() || !scanner.eat(b']') {
                return false;
            }
        }
        rule.weekdays.push(WeekdayRange::new(from, to));
        if !scanner.eat(b',') {
            return true;
        }
    }
}

/// `[year] month [day]`, e.g. `Jan`, `Jan 10`, `2024 Jan 10`.
fn parse_monthday(scanner: &mut Scanner) -> Option<Monthday> {
    let checkpoint = scanner.save();
    let mut result = Monthday::default();

    if let Some(number) = scanner.number() {
        if number >= 1000 {
            result.year = number as i32;
        } else {
            scanner.restore(checkpoint);
            return None;
        }
    }

    let month_checkpoint = scanner.save();
    match scanner.word().and_then(month_index) {
        Some(month) => result.month = month,
        None => {
            scanner.restore(month_checkpoint);
            if result.year == 0 {
                scanner.restore(checkpoint);
                return None;
            }
        }
    }

    let day_checkpoint = scanner.save();
    if let Some(day) = scanner.number() {
        if (1..=31).contains(&day) && scanner.peek() != Some(b':') {
            result.day = day as u8;
        } else {
            // a time span follows, not a day-of-month
            scanner.restore(day_checkpoint);
        }
    }

    result.is_valid().then_some(result)
}

fn parse_monthday_ranges(scanner: &mut Scanner, rule: &mut OpeningHours) -> bool {
    loop {
        let from = match parse_monthday(scanner) {
            Some(monthday) => monthday,
            None => return false,
        };
        let mut range = MonthdayRange {
            from,
            to: Monthday::default(),
        };
        if scanner.eat(b'-') {
            range.to = match parse_monthday(scanner) {
                Some(monthday) => monthday,
                None => return false,
            };
        }
        rule.monthdays.push(range);
        if !scanner.eat(b',') {
            return true;
        }
    }
}

fn parse_rule(input: &str) -> Option<OpeningHours> {
    let trimmed = input.trim();
    if trimmed == "24/7" {
        return Some(OpeningHours {
            modifier: Modifier::TwentyFourSeven,
            ..Default::default()
        });
    }

    let mut scanner = Scanner::new(trimmed);
    let mut rule = OpeningHours::default();

    // month/day selectors come first
    {
        let checkpoint = scanner.save();
        if !parse_monthday_ranges(&mut scanner, &mut rule) {
            scanner.restore(checkpoint);
            rule.monthdays.clear();
        }
    }
    // then weekday selectors
    {
        let checkpoint = scanner.save();
        if !parse_weekday_ranges(&mut scanner, &mut rule) {
            scanner.restore(checkpoint);
            rule.weekdays.clear();
        }
    }
    // then time spans
    {
        let checkpoint = scanner.save();
        if !parse_time_spans(&mut scanner, &mut rule) {
            scanner.restore(checkpoint);
            rule.times.clear();
        }
    }
    // trailing modifier
    {
        let checkpoint = scanner.save();
        match scanner.word().and_then(modifier_keyword) {
            Some(modifier) => rule.modifier = modifier,
            None => scanner.restore(checkpoint),
        }
    }

    if !scanner.at_end() {
        return None;
    }
    if rule.times.is_empty() && rule.weekdays.is_empty() && rule.monthdays.is_empty()
        && rule.modifier == Modifier::Open
    {
        return None;
    }
    Some(rule)
}

/// Parse a full opening-hours expression; rules separated by `;` or `||`.
/// Returns `None` if any rule fails to parse.
pub fn parse_opening_hours(input: &str) -> Option<Vec<OpeningHours>> {
    let normalized = input.replace("||", ";");
    let mut result = Vec::new();
    for rule in normalized.split(';') {
        if rule.trim().is_empty() {
            continue;
        }
        result.push(parse_rule(rule)?);
    }
    (!result.is_empty()).then_some(result)
}
