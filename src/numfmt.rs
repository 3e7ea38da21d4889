//! Number format parsing and application
//!
//! Excel number format codes are a mini-language. Each pattern is classified
//! into a [`FormatKind`] and rendered deterministically; unknown constructs
//! pass through as literal text.
//!
//! Format codes can have up to 4 sections separated by semicolons:
//! - `positive;negative;zero;text`
//! - `positive;negative` (zero uses positive, text uses General)
//! - `positive` (all values use this, negatives get a leading minus)
//!
//! Format codes can include:
//! - Color specifications: `[Red]`, `[Blue]`, `[Color1]` through `[Color56]`
//! - Conditions: `[>100]`, `[<=50]`
//! - Locale currency: `[$€-407]`
//! - Accounting alignment: `_` (skip width), `*` (repeat fill), both stripped

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::color::INDEXED_COLORS;
use crate::types::DateSystem;

/// Largest serial Excel can display (9999-12-31).
const MAX_DATE_SERIAL: f64 = 2_958_465.0;

/// Result of formatting a value, including optional color
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedValue {
    /// The formatted text
    pub text: String,
    /// Optional color in #RRGGBB format, from a `[Red]`-style directive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl FormattedValue {
    pub fn new(text: String) -> Self {
        Self { text, color: None }
    }
}

/// Classification of a format pattern, used for rendering and alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum FormatKind {
    /// `General` or no pattern: grouped digits, trailing zeros trimmed
    #[default]
    General,
    Accounting,
    Currency,
    Percentage,
    FixedDecimal,
    Scientific,
    /// Pattern built around quoted literal text, e.g. `0.0" kg"`
    QuotedText,
    Date,
    /// The `@` text placeholder
    Text,
}

impl FormatKind {
    /// Kinds whose output is a number and therefore right-aligned.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::General
                | Self::Accounting
                | Self::Currency
                | Self::Percentage
                | Self::FixedDecimal
                | Self::Scientific
                | Self::QuotedText
                | Self::Date
        )
    }
}

/// A condition parsed from a format code (e.g., `[>100]`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatCondition {
    pub operator: ConditionOperator,
    pub value: f64,
}

/// Comparison operators for format conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOperator {
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Equal,
    NotEqual,
}

impl FormatCondition {
    pub fn matches(&self, value: f64) -> bool {
        match self.operator {
            ConditionOperator::LessThan => value < self.value,
            ConditionOperator::LessOrEqual => value <= self.value,
            ConditionOperator::GreaterThan => value > self.value,
            ConditionOperator::GreaterOrEqual => value >= self.value,
            ConditionOperator::Equal => (value - self.value).abs() < f64::EPSILON,
            ConditionOperator::NotEqual => (value - self.value).abs() >= f64::EPSILON,
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let (operator, rest) = if let Some(rest) = s.strip_prefix("<=") {
            (ConditionOperator::LessOrEqual, rest)
        } else if let Some(rest) = s.strip_prefix(">=") {
            (ConditionOperator::GreaterOrEqual, rest)
        } else if let Some(rest) = s.strip_prefix("<>") {
            (ConditionOperator::NotEqual, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (ConditionOperator::LessThan, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (ConditionOperator::GreaterThan, rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (ConditionOperator::Equal, rest)
        } else {
            return None;
        };
        let value = rest.trim().parse().ok()?;
        Some(Self { operator, value })
    }
}

/// One `;`-separated section with its bracket directives removed.
#[derive(Debug, Clone, Default)]
struct Section {
    body: String,
    color: Option<String>,
    condition: Option<FormatCondition>,
}

/// Built-in number format IDs (0-49 are predefined by Excel)
/// See: ECMA-376 Part 1, Section 18.8.30
pub const fn get_builtin_format(id: u32) -> Option<&'static str> {
    match id {
        0 => Some("General"),
        1 => Some("0"),
        2 => Some("0.00"),
        3 => Some("#,##0"),
        4 => Some("#,##0.00"),
        5 => Some("$#,##0_);($#,##0)"),
        6 => Some("$#,##0_);[Red]($#,##0)"),
        7 => Some("$#,##0.00_);($#,##0.00)"),
        8 => Some("$#,##0.00_);[Red]($#,##0.00)"),
        9 => Some("0%"),
        10 => Some("0.00%"),
        11 => Some("0.00E+00"),
        14 => Some("mm-dd-yy"),
        15 => Some("d-mmm-yy"),
        16 => Some("d-mmm"),
        17 => Some("mmm-yy"),
        18 => Some("h:mm AM/PM"),
        19 => Some("h:mm:ss AM/PM"),
        20 => Some("h:mm"),
        21 => Some("h:mm:ss"),
        22 => Some("m/d/yy h:mm"),
        37 => Some("#,##0 ;(#,##0)"),
        38 => Some("#,##0 ;[Red](#,##0)"),
        39 => Some("#,##0.00;(#,##0.00)"),
        40 => Some("#,##0.00;[Red](#,##0.00)"),
        41 => Some("_(* #,##0_);_(* (#,##0);_(* \"-\"_);_(@_)"),
        42 => Some("_($* #,##0_);_($* (#,##0);_($* \"-\"_);_(@_)"),
        43 => Some("_(* #,##0.00_);_(* (#,##0.00);_(* \"-\"??_);_(@_)"),
        44 => Some("_($* #,##0.00_);_($* (#,##0.00);_($* \"-\"??_);_(@_)"),
        45 => Some("mm:ss"),
        46 => Some("[h]:mm:ss"),
        48 => Some("##0.0E+0"),
        49 => Some("@"),
        _ => None,
    }
}

/// Split a format code on `;`, ignoring separators inside quotes, brackets or escapes.
fn split_sections(code: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in code.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if !in_quotes => escaped = true,
            '"' if !in_brackets => in_quotes = !in_quotes,
            '[' if !in_quotes => in_brackets = true,
            ']' if !in_quotes => in_brackets = false,
            ';' if !in_quotes && !in_brackets => {
                sections.push(code.get(start..i).unwrap_or(""));
                start = i + 1;
            }
            _ => {}
        }
    }
    sections.push(code.get(start..).unwrap_or(""));
    sections
}

/// Strip `[...]` directives from a section, recording color and condition.
///
/// Elapsed-time brackets (`[h]`, `[mm]`, `[ss]`) are kept for the date tokenizer
/// and locale currency brackets become quoted literals.
fn parse_section(raw: &str) -> Section {
    let mut section = Section::default();
    let mut body = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        if c == '"' {
            in_quotes = !in_quotes;
            body.push(c);
            continue;
        }
        if c != '[' || in_quotes {
            body.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    body.push(next);
                }
            }
            continue;
        }

        let mut inner = String::new();
        for ch in chars.by_ref() {
            if ch == ']' {
                break;
            }
            inner.push(ch);
        }

        let lower = inner.to_ascii_lowercase();
        if let Some(locale) = inner.strip_prefix('$') {
            let symbol = locale.split('-').next().unwrap_or("");
            if !symbol.is_empty() {
                body.push('"');
                body.push_str(symbol);
                body.push('"');
            }
        } else if let Some(cond) = FormatCondition::parse(&inner) {
            section.condition = Some(cond);
        } else if let Some(color) = directive_color(&lower) {
            section.color = Some(color.to_string());
        } else if !lower.is_empty() && lower.chars().all(|ch| matches!(ch, 'h' | 'm' | 's')) {
            body.push('[');
            body.push_str(&inner);
            body.push(']');
        }
    }

    section.body = body;
    section
}

fn directive_color(name: &str) -> Option<&'static str> {
    match name {
        "black" => Some("#000000"),
        "blue" => Some("#0000FF"),
        "cyan" => Some("#00FFFF"),
        "green" => Some("#00FF00"),
        "magenta" => Some("#FF00FF"),
        "red" => Some("#FF0000"),
        "white" => Some("#FFFFFF"),
        "yellow" => Some("#FFFF00"),
        _ => {
            // [Color1]..[Color56] address the legacy palette from index 8
            let n: usize = name.strip_prefix("color")?.parse().ok()?;
            if (1..=56).contains(&n) {
                INDEXED_COLORS.get(n + 7).copied()
            } else {
                None
            }
        }
    }
}

/// Characters outside quotes/escapes, lowercased.
fn unquoted(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut in_quotes = false;
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\\' if !in_quotes => {
                chars.next();
            }
            '_' | '*' if !in_quotes => {
                chars.next();
            }
            _ if !in_quotes => out.push(c.to_ascii_lowercase()),
            _ => {}
        }
    }
    out
}

/// Check if a format code is a date/time format
pub fn is_date_format(format_code: &str) -> bool {
    split_sections(format_code)
        .first()
        .is_some_and(|s| is_date_body(&parse_section(s).body))
}

fn is_date_body(body: &str) -> bool {
    let cleaned = unquoted(body).replace("general", "");
    let cleaned: String = cleaned.chars().filter(|&c| c != '[' && c != ']').collect();

    cleaned.contains('y')
        || cleaned.contains('d')
        || cleaned.contains('h')
        || (cleaned.contains('m') && !cleaned.contains(['#', '0', '?']))
        || (cleaned.contains('s') && cleaned.contains(':'))
}

fn is_scientific_body(body: &str) -> bool {
    let u = unquoted(body);
    u.contains("e+") || u.contains("e-")
}

fn classify_body(body: &str) -> FormatKind {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("general") {
        return FormatKind::General;
    }

    let bare = unquoted(trimmed);
    let has_placeholder = bare.contains(['0', '#', '?']);

    if bare.contains('@') && !has_placeholder {
        return FormatKind::Text;
    }
    if is_date_body(trimmed) {
        return FormatKind::Date;
    }
    if is_scientific_body(trimmed) {
        return FormatKind::Scientific;
    }
    if !has_placeholder {
        return FormatKind::QuotedText;
    }
    if trimmed.contains('*') || trimmed.contains("_(") {
        return FormatKind::Accounting;
    }
    if bare.contains('%') {
        return FormatKind::Percentage;
    }
    if has_currency_symbol(trimmed) {
        return FormatKind::Currency;
    }
    if trimmed.contains('"') || trimmed.contains('\\') {
        return FormatKind::QuotedText;
    }
    FormatKind::FixedDecimal
}

fn has_currency_symbol(body: &str) -> bool {
    const SYMBOLS: [char; 5] = ['$', '€', '£', '¥', '₹'];
    // Locale brackets were rewritten to quoted literals, so look inside quotes too
    body.contains(SYMBOLS)
}

/// Classify a whole format code by its first section.
pub fn classify(format_code: &str) -> FormatKind {
    split_sections(format_code)
        .first()
        .map_or(FormatKind::General, |s| classify_body(&parse_section(s).body))
}

/// Format a numeric value using a format code
/// Returns the formatted string
pub fn format_number(value: f64, format_code: &str, date_system: DateSystem) -> String {
    format_value(value, format_code, date_system).text
}

/// Format a numeric value, returning the text and any section color.
pub fn format_value(value: f64, format_code: &str, date_system: DateSystem) -> FormattedValue {
    if !value.is_finite() {
        return FormattedValue::new(if value.is_nan() { "#NUM!" } else { "#DIV/0!" }.into());
    }

    let sections: Vec<Section> = split_sections(format_code.trim())
        .into_iter()
        .map(parse_section)
        .collect();
    let (section, show_minus) = select_section(&sections, value);
    let Some(section) = section else {
        return FormattedValue::new(format_default_grouped(value));
    };
    if sections.len() > 1 && section.body.trim().is_empty() {
        return FormattedValue {
            text: String::new(),
            color: section.color.clone(),
        };
    }

    let magnitude = if show_minus { value.abs() } else { value };
    let kind = classify_body(&section.body);
    let mut text = match kind {
        FormatKind::General => format_default_grouped(magnitude),
        FormatKind::Text => format_general(magnitude),
        FormatKind::Date => {
            format_date(value, &section.body, date_system).unwrap_or_else(|| format_general(value))
        }
        FormatKind::Scientific => format_scientific(magnitude.abs(), &section.body),
        _ => render_numeric(magnitude.abs(), &section.body),
    };

    if show_minus && kind != FormatKind::Date && !is_zero_after_rounding(&text) {
        text.insert(0, '-');
    }

    FormattedValue {
        text,
        color: section.color.clone(),
    }
}

/// Pick the section for a value and whether a minus sign must be added.
fn select_section(sections: &[Section], value: f64) -> (Option<&Section>, bool) {
    if sections.iter().any(|s| s.condition.is_some()) {
        let numeric = sections.iter().take(3);
        let chosen = numeric
            .clone()
            .find(|s| s.condition.is_some_and(|c| c.matches(value)))
            .or_else(|| numeric.clone().find(|s| s.condition.is_none()));
        return (chosen, false);
    }

    match sections.len() {
        0 => (None, false),
        1 => (sections.first(), value < 0.0),
        2 => {
            if value < 0.0 {
                (sections.get(1), false)
            } else {
                (sections.first(), false)
            }
        }
        _ => {
            if value < 0.0 {
                (sections.get(1), false)
            } else if value == 0.0 {
                (sections.get(2), false)
            } else {
                (sections.first(), false)
            }
        }
    }
}

fn is_zero_after_rounding(text: &str) -> bool {
    !text.chars().any(|c| c.is_ascii_digit() && c != '0')
}

/// Apply the text section of a format code to a string value.
///
/// Returns `None` when the code has no text handling, in which case the
/// value is displayed as-is.
pub fn format_text(text: &str, format_code: &str) -> Option<String> {
    let sections = split_sections(format_code.trim());
    let raw = match sections.get(3) {
        Some(s) => *s,
        None => sections.first().filter(|s| s.contains('@'))?,
    };
    let body = parse_section(raw).body;

    let mut out = String::new();
    let mut chars = body.chars();
    let mut in_quotes = false;
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => out.push(c),
            '@' => out.push_str(text),
            '\\' => out.extend(chars.next()),
            '_' | '*' => {
                chars.next();
            }
            _ => out.push(c),
        }
    }
    Some(out)
}

// ============================================================================
// Numeric patterns
// ============================================================================

/// A numeric section decomposed around its digit placeholder run.
#[derive(Debug, Default)]
struct NumericPattern {
    prefix: String,
    suffix: String,
    /// `0` placeholders before the decimal point
    int_required: usize,
    /// `0` placeholders after the decimal point
    frac_required: usize,
    /// `#`/`?` placeholders after the required ones
    frac_optional: usize,
    has_dot: bool,
    /// Any digit placeholder at all; literal-only sections print no number
    has_digits: bool,
    grouping: bool,
    /// Trailing commas divide by 1000 each
    scale_thousands: i32,
    percent: i32,
}

fn parse_numeric_pattern(body: &str) -> NumericPattern {
    #[derive(PartialEq)]
    enum Phase {
        Before,
        Core,
        After,
    }

    let mut pat = NumericPattern::default();
    let mut phase = Phase::Before;
    let mut pending_commas = 0;
    let chars: Vec<char> = body.chars().collect();
    let mut iter = chars.iter().copied().peekable();

    while let Some(c) = iter.next() {
        let is_placeholder = matches!(c, '0' | '#' | '?');
        let starts_core = is_placeholder
            || (c == '.' && iter.peek().is_some_and(|n| matches!(n, '0' | '#' | '?')));

        if phase != Phase::After && (starts_core || (phase == Phase::Core && matches!(c, ',' | '.'))) {
            phase = Phase::Core;
            pat.has_digits |= is_placeholder;
            match c {
                '.' if !pat.has_dot => {
                    pat.has_dot = true;
                }
                ',' => pending_commas += 1,
                '0' if !pat.has_dot => {
                    if pending_commas > 0 {
                        pat.grouping = true;
                        pending_commas = 0;
                    }
                    pat.int_required += 1;
                }
                '#' | '?' if !pat.has_dot => {
                    if pending_commas > 0 {
                        pat.grouping = true;
                        pending_commas = 0;
                    }
                }
                '0' if pat.frac_optional == 0 => pat.frac_required += 1,
                '0' | '#' | '?' => pat.frac_optional += 1,
                _ => {}
            }
            continue;
        }

        if phase == Phase::Core {
            phase = Phase::After;
        }
        let target = if phase == Phase::Before {
            &mut pat.prefix
        } else {
            &mut pat.suffix
        };

        match c {
            '"' => {
                for q in iter.by_ref() {
                    if q == '"' {
                        break;
                    }
                    target.push(q);
                }
            }
            '\\' => target.extend(iter.next()),
            '_' | '*' => {
                iter.next();
            }
            '%' => {
                pat.percent += 1;
                target.push('%');
            }
            _ => target.push(c),
        }
    }

    pat.scale_thousands = pending_commas;
    pat
}

/// Render a non-negative value through a numeric pattern.
fn render_numeric(value: f64, body: &str) -> String {
    let pat = parse_numeric_pattern(body);
    if !pat.has_digits {
        return pat.prefix + &pat.suffix;
    }

    let scaled = value * 100f64.powi(pat.percent) / 1000f64.powi(pat.scale_thousands);
    let decimals = (pat.frac_required + pat.frac_optional).min(15);
    let fixed = format!("{scaled:.decimals$}");
    let (int_digits, frac_digits) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));

    let mut frac = frac_digits.to_string();
    while frac.len() > pat.frac_required && frac.ends_with('0') {
        frac.pop();
    }

    let mut int_part = int_digits.trim_start_matches('0').to_string();
    while int_part.len() < pat.int_required {
        int_part.insert(0, '0');
    }
    if pat.grouping {
        int_part = group_thousands(&int_part);
    }

    let mut out = pat.prefix;
    out.push_str(&int_part);
    if pat.has_dot && (!frac.is_empty() || pat.frac_optional > 0) {
        out.push('.');
        out.push_str(&frac);
    }
    out.push_str(&pat.suffix);
    out
}

/// Insert `,` every three digits from the right.
fn group_thousands(digits: &str) -> String {
    let len = digits.chars().count();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Default display: grouped integer part, up to 10 decimals with trailing zeros trimmed.
pub fn format_default_grouped(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e15 || (abs < 1e-9 && abs != 0.0) {
        return format_exponential(value);
    }
    let fixed = format!("{abs:.10}");
    let (int_digits, frac_digits) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let frac = frac_digits.trim_end_matches('0');

    let mut out = String::new();
    if value < 0.0 && (int_digits != "0" || !frac.is_empty()) {
        out.push('-');
    }
    out.push_str(&group_thousands(int_digits));
    if !frac.is_empty() {
        out.push('.');
        out.push_str(frac);
    }
    out
}

/// Exponential fallback for very large or small values: `1.5E+16`, `1E-10`.
fn format_exponential(value: f64) -> String {
    let raw = format!("{:.5E}", value.abs());
    let (mantissa, exponent) = raw.split_once('E').unwrap_or((raw.as_str(), "0"));
    let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
    let (exp_sign, exp_digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}{mantissa}E{exp_sign}{exp_digits:0>2}")
}

/// General format - plain number display without grouping
#[allow(clippy::cast_possible_truncation)]
fn format_general(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e11 {
        format!("{}", value as i64)
    } else if value.abs() >= 1e11 || (value.abs() < 1e-4 && value != 0.0) {
        format_exponential(value)
    } else {
        let s = format!("{value:.10}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Format a non-negative number in scientific notation
/// Supports formats like "0.00E+00", "0.00E-00", "##0.0E+0"
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn format_scientific(value: f64, body: &str) -> String {
    let upper = body.to_uppercase();
    let always_show_sign = upper.contains("E+");
    let e_pos = upper.find('E').unwrap_or(upper.len());
    let mantissa_part = upper.get(..e_pos).unwrap_or("");
    let exponent_part = upper.get(e_pos..).unwrap_or("");

    let mantissa_decimals = mantissa_part.find('.').map_or(0, |pos| {
        mantissa_part
            .get(pos..)
            .unwrap_or("")
            .chars()
            .filter(|&c| c == '0' || c == '#' || c == '?')
            .count()
    });
    // Excel always shows at least 2 exponent digits
    let exponent_width = exponent_part
        .chars()
        .filter(|&c| c == '0' || c == '#')
        .count()
        .max(2);

    let (mantissa, exponent) = if value == 0.0 {
        (0.0, 0)
    } else {
        let exp = value.log10().floor() as i32;
        (value / 10f64.powi(exp), exp)
    };

    let mut mantissa_str = format!("{mantissa:.mantissa_decimals$}");
    let mut exponent = exponent;
    // Rounding can carry the mantissa to 10.0
    if mantissa_str.starts_with("10") {
        mantissa_str = format!("{:.mantissa_decimals$}", mantissa / 10.0);
        exponent += 1;
    }

    let exp_sign = if exponent < 0 {
        "-"
    } else if always_show_sign {
        "+"
    } else {
        ""
    };
    let exp_abs = exponent.unsigned_abs() as usize;
    format!("{mantissa_str}E{exp_sign}{exp_abs:0>exponent_width$}")
}

// ============================================================================
// Dates
// ============================================================================

/// Calendar components of a date serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateParts {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    /// 0 = Sunday
    pub weekday: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

fn epoch(date: (i32, u32, u32)) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.0, date.1, date.2)
}

/// Convert a date serial into calendar components.
///
/// Returns `None` for negative or out-of-range serials. In the 1900 system
/// serial 60 is the phantom 1900-02-29 and later serials are shifted back one
/// day to compensate.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn serial_to_parts(serial: f64, system: DateSystem) -> Option<DateParts> {
    if !serial.is_finite() || serial < 0.0 || serial > MAX_DATE_SERIAL {
        return None;
    }

    let total_seconds = (serial * 86_400.0).round() as i64;
    let days = total_seconds.div_euclid(86_400);
    let secs = total_seconds.rem_euclid(86_400) as u32;
    let (hour, minute, second) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    let date = match system {
        DateSystem::Excel1904 => epoch((1904, 1, 1))? + Duration::days(days),
        DateSystem::Excel1900 if days == 60 => {
            return Some(DateParts {
                year: 1900,
                month: 2,
                day: 29,
                weekday: 3,
                hour,
                minute,
                second,
            });
        }
        DateSystem::Excel1900 if days < 60 => epoch((1899, 12, 31))? + Duration::days(days),
        DateSystem::Excel1900 => epoch((1899, 12, 30))? + Duration::days(days),
    };

    Some(DateParts {
        year: date.year(),
        month: date.month(),
        day: date.day(),
        weekday: date.weekday().num_days_from_sunday(),
        hour,
        minute,
        second,
    })
}

/// Convert a calendar date into its serial in the given date system.
#[allow(clippy::cast_precision_loss)]
pub fn date_to_serial(date: NaiveDate, system: DateSystem) -> Option<f64> {
    let days = match system {
        DateSystem::Excel1904 => (date - epoch((1904, 1, 1))?).num_days(),
        DateSystem::Excel1900 if date < epoch((1900, 3, 1))? => {
            (date - epoch((1899, 12, 31))?).num_days()
        }
        DateSystem::Excel1900 => (date - epoch((1899, 12, 30))?).num_days(),
    };
    (days >= 0).then_some(days as f64)
}

/// Token types for date format parsing
#[derive(Debug, Clone, PartialEq)]
enum DateToken {
    Year4,
    Year2,
    Month1,
    Month2,
    MonthAbbrev,
    MonthFull,
    MonthLetter,
    Day1,
    Day2,
    DayAbbrev,
    DayFull,
    Hour1,
    Hour2,
    Minute1,
    Minute2,
    Second1,
    Second2,
    AmPm,
    ElapsedHours,
    Literal(String),
}

/// Parse a date format body into tokens
fn parse_date_tokens(body: &str) -> Vec<DateToken> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let mut after_hour = false;

    while let Some(&c) = chars.get(i) {
        let lower = c.to_ascii_lowercase();

        if c == '"' {
            let mut literal = String::new();
            i += 1;
            while let Some(&q) = chars.get(i) {
                i += 1;
                if q == '"' {
                    break;
                }
                literal.push(q);
            }
            tokens.push(DateToken::Literal(literal));
            continue;
        }
        if c == '\\' || c == '_' || c == '*' {
            if c == '\\' {
                if let Some(&next) = chars.get(i + 1) {
                    tokens.push(DateToken::Literal(next.to_string()));
                }
            }
            i += 2;
            continue;
        }
        if c == '[' {
            let inner: String = chars
                .iter()
                .skip(i + 1)
                .take_while(|&&ch| ch != ']')
                .collect();
            i += inner.chars().count() + 2;
            if inner.to_ascii_lowercase().starts_with('h') {
                tokens.push(DateToken::ElapsedHours);
                after_hour = true;
            }
            continue;
        }
        if lower == 'a' {
            let rest: String = chars.iter().skip(i).take(5).collect();
            if rest.eq_ignore_ascii_case("am/pm") {
                tokens.push(DateToken::AmPm);
                i += 5;
                continue;
            }
        }

        let mut count = 1;
        while chars
            .get(i + count)
            .is_some_and(|n| n.to_ascii_lowercase() == lower)
        {
            count += 1;
        }

        let token = match lower {
            'y' if count >= 4 => DateToken::Year4,
            'y' => DateToken::Year2,
            'm' if after_hour || followed_by_seconds(&chars, i + count) => {
                after_hour = false;
                if count >= 2 {
                    DateToken::Minute2
                } else {
                    DateToken::Minute1
                }
            }
            'm' => match count {
                1 => DateToken::Month1,
                2 => DateToken::Month2,
                3 => DateToken::MonthAbbrev,
                4 => DateToken::MonthFull,
                _ => DateToken::MonthLetter,
            },
            'd' => match count {
                1 => DateToken::Day1,
                2 => DateToken::Day2,
                3 => DateToken::DayAbbrev,
                _ => DateToken::DayFull,
            },
            'h' => {
                after_hour = true;
                if count >= 2 {
                    DateToken::Hour2
                } else {
                    DateToken::Hour1
                }
            }
            's' => {
                after_hour = false;
                if count >= 2 {
                    DateToken::Second2
                } else {
                    DateToken::Second1
                }
            }
            _ => {
                tokens.push(DateToken::Literal(c.to_string()));
                i += 1;
                continue;
            }
        };
        tokens.push(token);
        i += count;
    }

    tokens
}

/// Check if 'm' at position is followed by 's' (making it minutes, not months)
fn followed_by_seconds(chars: &[char], start: usize) -> bool {
    for ch in chars.iter().skip(start) {
        match ch.to_ascii_lowercase() {
            's' => return true,
            'h' | 'y' | 'd' | 'm' => return false,
            _ => {}
        }
    }
    false
}

/// Format a date serial through a date/time pattern body.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn format_date(serial: f64, body: &str, system: DateSystem) -> Option<String> {
    let parts = serial_to_parts(serial, system)?;
    let tokens = parse_date_tokens(body);
    let twelve_hour = tokens.contains(&DateToken::AmPm);
    let hour = if twelve_hour {
        match parts.hour % 12 {
            0 => 12,
            h => h,
        }
    } else {
        parts.hour
    };

    let mut out = String::new();
    for token in &tokens {
        match token {
            DateToken::Year4 => out.push_str(&format!("{:04}", parts.year)),
            DateToken::Year2 => out.push_str(&format!("{:02}", parts.year % 100)),
            DateToken::Month1 => out.push_str(&parts.month.to_string()),
            DateToken::Month2 => out.push_str(&format!("{:02}", parts.month)),
            DateToken::MonthAbbrev => out.push_str(month_name(parts.month).get(..3).unwrap_or("")),
            DateToken::MonthFull => out.push_str(month_name(parts.month)),
            DateToken::MonthLetter => out.push_str(month_name(parts.month).get(..1).unwrap_or("")),
            DateToken::Day1 => out.push_str(&parts.day.to_string()),
            DateToken::Day2 => out.push_str(&format!("{:02}", parts.day)),
            DateToken::DayAbbrev => out.push_str(day_name(parts.weekday).get(..3).unwrap_or("")),
            DateToken::DayFull => out.push_str(day_name(parts.weekday)),
            DateToken::Hour1 => out.push_str(&hour.to_string()),
            DateToken::Hour2 => out.push_str(&format!("{hour:02}")),
            DateToken::Minute1 => out.push_str(&parts.minute.to_string()),
            DateToken::Minute2 => out.push_str(&format!("{:02}", parts.minute)),
            DateToken::Second1 => out.push_str(&parts.second.to_string()),
            DateToken::Second2 => out.push_str(&format!("{:02}", parts.second)),
            DateToken::AmPm => out.push_str(if parts.hour >= 12 { "PM" } else { "AM" }),
            DateToken::ElapsedHours => {
                out.push_str(&((serial * 24.0).floor() as u64).to_string());
            }
            DateToken::Literal(s) => out.push_str(s),
        }
    }
    Some(out)
}

fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        12 => "December",
        _ => "???",
    }
}

fn day_name(weekday: u32) -> &'static str {
    match weekday {
        0 => "Sunday",
        1 => "Monday",
        2 => "Tuesday",
        3 => "Wednesday",
        4 => "Thursday",
        5 => "Friday",
        6 => "Saturday",
        _ => "???",
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::float_cmp,
    clippy::panic
)]
mod tests {
    use super::*;

    const D1900: DateSystem = DateSystem::Excel1900;

    #[test]
    fn test_split_sections_respects_quotes() {
        assert_eq!(split_sections("0;\"a;b\";0"), vec!["0", "\"a;b\"", "0"]);
        assert_eq!(split_sections("0.00"), vec!["0.00"]);
    }

    #[test]
    fn test_parse_section_directives() {
        let s = parse_section("[Red][<0]#,##0");
        assert_eq!(s.body, "#,##0");
        assert_eq!(s.color.as_deref(), Some("#FF0000"));
        assert!(s.condition.is_some());

        let s = parse_section("#,##0.00 [$€-407]");
        assert_eq!(s.body, "#,##0.00 \"€\"");

        let s = parse_section("[h]:mm:ss");
        assert_eq!(s.body, "[h]:mm:ss");
    }

    #[test]
    fn test_color_palette_directive() {
        assert_eq!(directive_color("color1"), Some("#000000"));
        assert_eq!(directive_color("color3"), Some("#FF0000"));
        assert_eq!(directive_color("color57"), None);
    }

    #[test]
    fn test_numeric_pattern_shape() {
        let p = parse_numeric_pattern("$#,##0.00");
        assert_eq!(p.prefix, "$");
        assert!(p.grouping);
        assert_eq!(p.int_required, 1);
        assert_eq!(p.frac_required, 2);

        let p = parse_numeric_pattern("0.0,,\" M\"");
        assert_eq!(p.scale_thousands, 2);
        assert_eq!(p.suffix, " M");
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands("1234567"), "1,234,567");
        assert_eq!(group_thousands("123"), "123");
        assert_eq!(group_thousands(""), "");
    }

    #[test]
    fn test_optional_decimals() {
        assert_eq!(format_number(1.5, "#.##", D1900), "1.5");
        assert_eq!(format_number(0.25, "0.0#", D1900), "0.25");
        assert_eq!(format_number(3.0, "0.0#", D1900), "3.0");
    }

    #[test]
    fn test_scientific() {
        assert_eq!(format_number(1_234_567.0, "0.00E+00", D1900), "1.23E+06");
        assert_eq!(format_number(0.000123, "0.00E+00", D1900), "1.23E-04");
        assert_eq!(format_number(-1_234_567.0, "0.00E+00", D1900), "-1.23E+06");
        assert_eq!(format_number(0.0, "0.0E+0", D1900), "0.0E+00");
        assert_eq!(format_number(9.999, "0.0E+00", D1900), "1.0E+01");
    }

    #[test]
    fn test_time_tokens() {
        // 0.75 = 18:00
        assert_eq!(format_number(0.75, "h:mm", D1900), "18:00");
        assert_eq!(format_number(0.75, "h:mm AM/PM", D1900), "6:00 PM");
        assert_eq!(format_number(1.5, "[h]:mm:ss", D1900), "36:00:00");
    }

    #[test]
    fn test_phantom_leap_day() {
        let parts = serial_to_parts(60.0, D1900).unwrap();
        assert_eq!((parts.year, parts.month, parts.day), (1900, 2, 29));
        let parts = serial_to_parts(61.0, D1900).unwrap();
        assert_eq!((parts.year, parts.month, parts.day), (1900, 3, 1));
        let parts = serial_to_parts(1.0, D1900).unwrap();
        assert_eq!((parts.year, parts.month, parts.day), (1900, 1, 1));
    }

    #[test]
    fn test_1904_system() {
        let parts = serial_to_parts(0.0, DateSystem::Excel1904).unwrap();
        assert_eq!((parts.year, parts.month, parts.day), (1904, 1, 1));
        // Same calendar date is 1462 serials apart between the systems
        assert_eq!(
            format_number(44927.0 - 1462.0, "yyyy-mm-dd", DateSystem::Excel1904),
            "2023-01-01"
        );
    }

    #[test]
    fn test_negative_serial_falls_back() {
        assert_eq!(format_number(-5.0, "yyyy-mm-dd", D1900), "-5");
    }

    #[test]
    fn test_condition_sections() {
        let code = "[>=100]\"big\";[<100]\"small\"";
        assert_eq!(format_number(150.0, code, D1900), "big");
        assert_eq!(format_number(5.0, code, D1900), "small");
    }

    #[test]
    fn test_literal_only_sections_print_no_digits() {
        assert_eq!(format_number(5.0, "\"N/A\"", D1900), "N/A");
        assert_eq!(format_number(-5.0, "0;\"neg\";0", D1900), "neg");
        assert_eq!(format_number(-5.0, "\"N/A\"", D1900), "N/A");
        assert!(!parse_numeric_pattern("\"N/A\"").has_digits);
        assert!(parse_numeric_pattern(".00").has_digits);
    }

    #[test]
    fn test_empty_section_displays_nothing() {
        assert_eq!(format_number(0.0, "0;-0;;@", D1900), "");
        assert_eq!(format_number(3.0, "0;-0;;@", D1900), "3");
        assert_eq!(format_number(-3.0, "0;;0", D1900), "");
    }

    #[test]
    fn test_exponential_fallback() {
        assert_eq!(format_default_grouped(1e16), "1E+16");
        assert_eq!(format_default_grouped(-1.5e16), "-1.5E+16");
        assert_eq!(format_default_grouped(1.2345e-10), "1.2345E-10");
        assert_eq!(format_general(2.5e12), "2.5E+12");
    }

    #[test]
    fn test_minus_suppressed_when_rounded_to_zero() {
        assert_eq!(format_number(-0.001, "0.00", D1900), "0.00");
    }
}
