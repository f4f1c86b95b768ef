//! Positional tokenizer for PSA label text.
//!
//! PSA label layouts vary by era, so no field sits at a fixed position. The
//! two anchors that are reliable are the set year (first 4-digit token in a
//! plausible range) and the certification number (last run of 6+ digits).
//! Everything between them is kept as ordered dynamic fields.

use std::sync::LazyLock;

use chrono::Datelike;
use regex::Regex;
use serde::{Deserialize, Serialize};

static YEAR_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})\b").expect("year regex is valid"));
static CERT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{6,}").expect("cert regex is valid"));
static LEADING_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})\b").expect("leading year regex is valid"));

/// Earliest Pokemon TCG release year.
pub const DEFAULT_MIN_YEAR: u16 = 1995;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLabel {
    pub year: Option<u16>,
    pub cert_number: Option<String>,
    /// Year-line text after the year (usually `POKEMON <SET>`).
    pub header: Option<String>,
    /// Ordered text between the year and the certification number.
    pub dynamic_fields: Vec<String>,
}

impl ParsedLabel {
    /// Dynamic fields keyed `text1`, `text2`, ...
    pub fn named_fields(&self) -> Vec<(String, &str)> {
        self.dynamic_fields
            .iter()
            .enumerate()
            .map(|(i, field)| (format!("text{}", i + 1), field.as_str()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PsaLabelParser {
    min_year: u16,
    max_year: u16,
}

impl Default for PsaLabelParser {
    /// Years from 1995 through next year.
    fn default() -> Self {
        let next_year = u16::try_from(chrono::Utc::now().year() + 1).unwrap_or(u16::MAX);
        Self::with_year_range(DEFAULT_MIN_YEAR, next_year)
    }
}

struct YearHit {
    line: usize,
    year: u16,
    end: usize,
}

struct CertHit {
    line: usize,
    start: usize,
    end: usize,
}

impl PsaLabelParser {
    pub fn with_year_range(min_year: u16, max_year: u16) -> Self {
        Self { min_year, max_year }
    }

    pub fn parse(&self, text: &str) -> ParsedLabel {
        let lines: Vec<&str> = text.lines().collect();
        self.parse_lines(&lines)
    }

    pub fn parse_lines<S: AsRef<str>>(&self, raw_lines: &[S]) -> ParsedLabel {
        let lines: Vec<&str> = raw_lines
            .iter()
            .map(|l| l.as_ref().trim())
            .filter(|l| !l.is_empty())
            .collect();

        let year = self.find_year(&lines);
        let start = year.as_ref().map_or(0, |y| y.line);

        // A later line opening with a year belongs to another label.
        let end = lines
            .iter()
            .enumerate()
            .skip(start + 1)
            .find(|(_, line)| year.is_some() && self.starts_with_year(line))
            .map_or(lines.len(), |(i, _)| i);

        let cert = Self::find_cert(&lines, start, end, year.as_ref());

        let header = year.as_ref().map(|y| {
            let rest_end = match &cert {
                Some(c) if c.line == y.line => c.start,
                _ => lines[y.line].len(),
            };
            lines[y.line][y.end..rest_end].trim().to_string()
        });

        let mut dynamic_fields = Vec::new();
        let mut push = |s: &str| {
            let s = s.trim();
            if !s.is_empty() {
                dynamic_fields.push(s.to_string());
            }
        };

        match (&year, &cert) {
            (Some(y), Some(c)) if c.line == y.line => {
                push(&lines[c.line][y.end..c.start]);
                if c.line + 1 < end {
                    push(lines[c.line + 1]);
                }
            }
            (_, Some(c)) => {
                let first = year.as_ref().map_or(0, |y| y.line + 1);
                for line in &lines[first..c.line] {
                    push(line);
                }
                push(&lines[c.line][..c.start]);
                if c.line + 1 < end {
                    push(lines[c.line + 1]);
                }
            }
            (Some(y), None) => {
                for line in &lines[y.line + 1..end] {
                    push(line);
                }
            }
            (None, None) => {
                for line in &lines {
                    push(line);
                }
            }
        }

        ParsedLabel {
            year: year.map(|y| y.year),
            cert_number: cert.map(|c| lines[c.line][c.start..c.end].to_string()),
            header: header.filter(|h| !h.is_empty()),
            dynamic_fields,
        }
    }

    fn in_range(&self, year: u16) -> bool {
        (self.min_year..=self.max_year).contains(&year)
    }

    fn find_year(&self, lines: &[&str]) -> Option<YearHit> {
        lines.iter().enumerate().find_map(|(line, text)| {
            YEAR_TOKEN.captures_iter(text).find_map(|caps| {
                let m = caps.get(1)?;
                let year = m.as_str().parse::<u16>().ok()?;
                self.in_range(year).then_some(YearHit {
                    line,
                    year,
                    end: m.end(),
                })
            })
        })
    }

    fn starts_with_year(&self, line: &str) -> bool {
        LEADING_YEAR
            .captures(line)
            .and_then(|caps| caps.get(1)?.as_str().parse::<u16>().ok())
            .is_some_and(|year| self.in_range(year))
    }

    /// Last 6+ digit run in `[start, end)`, ignoring anything before the year.
    fn find_cert(
        lines: &[&str],
        start: usize,
        end: usize,
        year: Option<&YearHit>,
    ) -> Option<CertHit> {
        (start..end).rev().find_map(|line| {
            let floor = match year {
                Some(y) if y.line == line => y.end,
                _ => 0,
            };
            CERT_RUN
                .find_iter(lines[line])
                .filter(|m| m.start() >= floor)
                .last()
                .map(|m| CertHit {
                    line,
                    start: m.start(),
                    end: m.end(),
                })
        })
    }
}
