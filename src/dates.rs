use chrono::{Datelike, NaiveDate};

/// Rendered in place of a date that cannot be parsed.
pub const INVALID_DATE: &str = "Invalid Date";

const MONTHS_PT_BR: [&str; 12] = [
    "janeiro",
    "fevereiro",
    "março",
    "abril",
    "maio",
    "junho",
    "julho",
    "agosto",
    "setembro",
    "outubro",
    "novembro",
    "dezembro",
];

/// Parses a calendar date in the `YYYY-MM-DD` form produced by date inputs.
pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    let bytes = raw.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let digits_ok = bytes
        .iter()
        .enumerate()
        .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !digits_ok {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// `dd/mm/yyyy`, or [`INVALID_DATE`] for malformed input.
pub fn format_date(raw: &str) -> String {
    match parse_iso_date(raw) {
        Some(date) => format_short_date(date),
        None => INVALID_DATE.to_string(),
    }
}

pub fn format_short_date(date: NaiveDate) -> String {
    format!("{:02}/{:02}/{:04}", date.day(), date.month(), date.year())
}

/// Full month name form used on the issue line, e.g. `05 de março de 2026`.
pub fn format_long_date(date: NaiveDate) -> String {
    let month = MONTHS_PT_BR[date.month0() as usize];
    format!("{:02} de {} de {}", date.day(), month, date.year())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_date_uses_day_month_year() {
        assert_eq!(format_date("2025-03-07"), "07/03/2025");
        assert_eq!(format_date("2024-12-31"), "31/12/2024");
    }

    #[test]
    fn malformed_dates_degrade_to_placeholder() {
        for raw in ["", "07/03/2025", "2025-13-01", "2025-02-30", "2025-3-7", "abcd-ef-gh"] {
            assert_eq!(format_date(raw), INVALID_DATE, "input {raw:?}");
        }
    }

    #[test]
    fn leap_day_is_accepted() {
        assert_eq!(format_date("2024-02-29"), "29/02/2024");
    }

    #[test]
    fn long_date_spells_month_in_portuguese() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 5).expect("date");
        assert_eq!(format_long_date(date), "05 de março de 2026");
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).expect("date");
        assert_eq!(format_long_date(date), "16 de outubro de 2026");
    }
}
