//! 访问时间的自由文本解析（尽力而为）
//!
//! 识别 `DD/MM[/YYYY]` 日期 + `14h` / `14h30` / `14:30` 时刻；缺年份取参考日期的年份，
//! 两位年份加 2000。任一部分缺失或非法即为 Unparsed，原文保留。

use std::fmt;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisitTime {
    Parsed(NaiveDateTime),
    Unparsed(String),
}

impl VisitTime {
    pub fn is_parsed(&self) -> bool {
        matches!(self, VisitTime::Parsed(_))
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            VisitTime::Parsed(at) => Some(*at),
            VisitTime::Unparsed(_) => None,
        }
    }
}

impl fmt::Display for VisitTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VisitTime::Parsed(at) => write!(f, "{}", at.format("%d/%m/%Y às %H:%M")),
            VisitTime::Unparsed(raw) => f.write_str(raw),
        }
    }
}

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{2,4}))?\b").expect("valid date regex"))
}

fn hour_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(\d{1,2})\s*(?:h\s*(\d{2})?|:(\d{2}))").expect("valid hour regex")
    })
}

pub fn parse_visit_time(raw: &str, reference: NaiveDate) -> VisitTime {
    parse_parts(raw, reference).map_or_else(|| VisitTime::Unparsed(raw.trim().to_string()), VisitTime::Parsed)
}

fn parse_parts(raw: &str, reference: NaiveDate) -> Option<NaiveDateTime> {
    let date_caps = date_regex().captures(raw)?;
    let day: u32 = date_caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = date_caps.get(2)?.as_str().parse().ok()?;
    let year: i32 = match date_caps.get(3) {
        Some(y) => {
            let y: i32 = y.as_str().parse().ok()?;
            match y {
                0..=99 => 2000 + y,
                1000..=9999 => y,
                _ => return None,
            }
        }
        None => reference.year(),
    };
    let date = NaiveDate::from_ymd_opt(year, month, day)?;

    // 日期之外的部分里找时刻，避免把 "10/12" 的数字当成小时
    let date_span = date_caps.get(0)?;
    let rest = format!("{} {}", &raw[..date_span.start()], &raw[date_span.end()..]);
    let hour_caps = hour_regex().captures(&rest)?;
    let hour: u32 = hour_caps.get(1)?.as_str().parse().ok()?;
    let minute: u32 = hour_caps
        .get(2)
        .or_else(|| hour_caps.get(3))
        .map(|m| m.as_str().parse().ok())
        .unwrap_or(Some(0))?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Some(date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> VisitTime {
        VisitTime::Parsed(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, min, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_full_date_and_hour() {
        assert_eq!(parse_visit_time("20/03/2026 às 14h", reference()), at(2026, 3, 20, 14, 0));
        assert_eq!(parse_visit_time("20/03/2026 14h30", reference()), at(2026, 3, 20, 14, 30));
        assert_eq!(parse_visit_time("dia 5/4/26 as 09:15", reference()), at(2026, 4, 5, 9, 15));
    }

    #[test]
    fn test_missing_year_uses_reference() {
        assert_eq!(parse_visit_time("12/03 10h", reference()), at(2026, 3, 12, 10, 0));
    }

    #[test]
    fn test_unparsed_keeps_raw_text() {
        assert_eq!(
            parse_visit_time(" amanhã de tarde ", reference()),
            VisitTime::Unparsed("amanhã de tarde".into())
        );
        // 没有时刻
        assert!(!parse_visit_time("20/03/2026", reference()).is_parsed());
        // 非法日期
        assert!(!parse_visit_time("31/02/2026 10h", reference()).is_parsed());
        assert!(!parse_visit_time("20/03/2026 25h", reference()).is_parsed());
    }

    #[test]
    fn test_display() {
        assert_eq!(at(2026, 3, 20, 14, 0).to_string(), "20/03/2026 às 14:00");
    }
}
