//! Date normalization for extracted field values.
//!
//! Scanned tickets carry dates in whatever shape the source system printed
//! them, including compressed numerics typed on a terminal and Excel serial
//! numbers leaking out of spreadsheets. Everything normalizes to
//! `YYYY-MM-DD`; values that cannot be decoded return `None` and the
//! caller decides the fallback.
//!
//! Ambiguity rule for separated forms: ISO first, then US (`M/D/YYYY`)
//! when the month position holds ≤ 12, then European (`DD/MM/YYYY`).

use jiff::civil::Date;

/// Inclusive Excel serial range accepted as dates (2009..=2036).
const EXCEL_SERIAL_MIN: i64 = 40_000;
const EXCEL_SERIAL_MAX: i64 = 50_000;

/// Normalizes a raw date literal to `YYYY-MM-DD`.
///
/// Returns `None` when the input cannot be decoded as a plausible date.
/// Normalization is idempotent: a normalized output normalizes to itself.
pub fn normalize_date(input: &str) -> Option<String> {
    let trimmed = input.trim().trim_matches(['"', '\'']);
    if trimmed.is_empty() {
        return None;
    }

    if let Some(date) = parse_iso(trimmed) {
        return Some(date.to_string());
    }
    if let Some(date) = parse_slash_iso(trimmed) {
        return Some(date.to_string());
    }
    if let Some(date) = parse_separated(trimmed) {
        return Some(date.to_string());
    }
    if let Some(date) = parse_month_name(trimmed) {
        return Some(date.to_string());
    }
    if let Some(date) = parse_numeric(trimmed) {
        return Some(date.to_string());
    }

    None
}

/// `YYYY-MM-DD`, optionally followed by a `T`/space time suffix.
fn parse_iso(s: &str) -> Option<Date> {
    let date_part = s.split(['T', ' ']).next()?;
    let (y, m, d) = split_three(date_part, '-')?;
    if date_part.len() < 8 || y < 1000 {
        return None;
    }
    make_date(y, m, d)
}

/// `YYYY/MM/DD`.
fn parse_slash_iso(s: &str) -> Option<Date> {
    let (y, m, d) = split_three(s, '/')?;
    if y < 1000 {
        return None;
    }
    make_date(y, m, d)
}

/// `M/D/YYYY` (US) or `DD/MM/YYYY` (EU, when the first number exceeds 12),
/// with `/`, `.` or `-` separators.
fn parse_separated(s: &str) -> Option<Date> {
    let sep = ['/', '.', '-'].into_iter().find(|&c| s.contains(c))?;
    let (a, b, y) = split_three(s, sep)?;
    if y < 1000 || a > 9999 || b > 9999 {
        return None;
    }

    if a <= 12 {
        // US order: month first.
        make_date(y, a, b)
    } else if b <= 12 {
        // European order: the leading number can only be a day.
        make_date(y, b, a)
    } else {
        None
    }
}

/// `June 06, 2025`, `06 June 2025`, `Jun 6 2025`.
fn parse_month_name(s: &str) -> Option<Date> {
    let tokens: Vec<&str> = s
        .split([' ', ',', '.'])
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() != 3 {
        return None;
    }

    // Month name either leads or sits in the middle.
    let (month, day_tok, year_tok) = if let Some(m) = month_from_name(tokens[0]) {
        (m, tokens[1], tokens[2])
    } else if let Some(m) = month_from_name(tokens[1]) {
        (m, tokens[0], tokens[2])
    } else {
        return None;
    };

    let day: i64 = day_tok.parse().ok()?;
    let year: i64 = year_tok.parse().ok()?;
    if year < 1000 {
        return None;
    }
    make_date(year, month, day)
}

/// Pure-digit forms: Excel serials in `40000..=50000`, otherwise 3-5
/// digits decoded as `M[D[D]]YY` constrained to 2000-2099.
fn parse_numeric(s: &str) -> Option<Date> {
    if !s.chars().all(|c| c.is_ascii_digit()) || !(3..=5).contains(&s.len()) {
        return None;
    }
    let n: i64 = s.parse().ok()?;

    if (EXCEL_SERIAL_MIN..=EXCEL_SERIAL_MAX).contains(&n) {
        return excel_serial(n);
    }

    let digits = s.as_bytes();
    let yy: i64 = s[s.len() - 2..].parse().ok()?;
    let year = 2000 + yy;

    match digits.len() {
        // MYY: month only, day defaults to the 1st.
        3 => make_date(year, digit(digits[0]), 1),
        // MDYY.
        4 => make_date(year, digit(digits[0]), digit(digits[1])),
        // MDDYY first, falling back to MMDYY.
        5 => {
            let m_dd = make_date(year, digit(digits[0]), two_digits(digits[1], digits[2]));
            m_dd.or_else(|| make_date(year, two_digits(digits[0], digits[1]), digit(digits[2])))
        }
        _ => None,
    }
}

/// Days offset from the Excel epoch 1899-12-30.
fn excel_serial(n: i64) -> Option<Date> {
    let epoch = jiff::civil::date(1899, 12, 30);
    epoch.checked_add(jiff::Span::new().days(n)).ok()
}

fn month_from_name(token: &str) -> Option<i64> {
    let lower = token.to_ascii_lowercase();
    let month = match lower.as_str() {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn split_three(s: &str, sep: char) -> Option<(i64, i64, i64)> {
    let mut parts = s.split(sep);
    let a: i64 = parts.next()?.trim().parse().ok()?;
    let b: i64 = parts.next()?.trim().parse().ok()?;
    let c: i64 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((a, b, c))
}

fn digit(b: u8) -> i64 {
    i64::from(b - b'0')
}

fn two_digits(hi: u8, lo: u8) -> i64 {
    digit(hi) * 10 + digit(lo)
}

fn make_date(year: i64, month: i64, day: i64) -> Option<Date> {
    let year = i16::try_from(year).ok()?;
    let month = i8::try_from(month).ok()?;
    let day = i8::try_from(day).ok()?;
    Date::new(year, month, day).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_passes_through() {
        assert_eq!(normalize_date("2025-06-05").as_deref(), Some("2025-06-05"));
        assert_eq!(
            normalize_date("2025-06-05T10:30:00Z").as_deref(),
            Some("2025-06-05")
        );
        assert_eq!(
            normalize_date("2025-06-05 10:30:00").as_deref(),
            Some("2025-06-05")
        );
    }

    #[test]
    fn us_forms_prefer_month_first() {
        assert_eq!(normalize_date("06/05/2025").as_deref(), Some("2025-06-05"));
        assert_eq!(normalize_date("6/5/2025").as_deref(), Some("2025-06-05"));
        assert_eq!(normalize_date("6.5.2025").as_deref(), Some("2025-06-05"));
        assert_eq!(normalize_date("6-5-2025").as_deref(), Some("2025-06-05"));
    }

    #[test]
    fn european_when_day_exceeds_twelve() {
        assert_eq!(normalize_date("25/06/2025").as_deref(), Some("2025-06-25"));
        assert_eq!(normalize_date("13.2.2024").as_deref(), Some("2024-02-13"));
    }

    #[test]
    fn month_name_forms() {
        assert_eq!(
            normalize_date("June 06, 2025").as_deref(),
            Some("2025-06-06")
        );
        assert_eq!(normalize_date("06 June 2025").as_deref(), Some("2025-06-06"));
        assert_eq!(normalize_date("Jun 6 2025").as_deref(), Some("2025-06-06"));
    }

    #[test]
    fn slash_iso() {
        assert_eq!(normalize_date("2025/06/05").as_deref(), Some("2025-06-05"));
    }

    #[test]
    fn compressed_numeric() {
        // The shape a terminal operator types: MDYY.
        assert_eq!(normalize_date("6525").as_deref(), Some("2025-06-05"));
        // MYY: day defaults to the 1st.
        assert_eq!(normalize_date("625").as_deref(), Some("2025-06-01"));
        // MDDYY.
        assert_eq!(normalize_date("62525").as_deref(), Some("2025-06-25"));
        // MMDYY fallback when the day digits overflow.
        assert_eq!(normalize_date("12525").as_deref(), Some("2025-12-05"));
    }

    #[test]
    fn excel_serials() {
        assert_eq!(normalize_date("45000").as_deref(), Some("2023-03-15"));
        // Outside the plausibility window: not a serial, and not a valid
        // compressed date either.
        assert_eq!(normalize_date("99999"), None);
    }

    #[test]
    fn unparseable_returns_none() {
        assert_eq!(normalize_date(""), None);
        assert_eq!(normalize_date("not a date"), None);
        assert_eq!(normalize_date("13/13/2025"), None);
        assert_eq!(normalize_date("0/0/2025"), None);
    }

    #[test]
    fn idempotence() {
        for raw in ["6525", "June 06, 2025", "25/06/2025", "45000"] {
            let once = normalize_date(raw).unwrap();
            let twice = normalize_date(&once).unwrap();
            assert_eq!(once, twice);
        }
    }
}
