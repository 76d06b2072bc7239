//! Guessing a document title and headings from recognized text.
//!
//! OCR output has no font information, so everything here works from the
//! shape of each line: numbering, chapter markers, capitalization.

use std::{collections::BTreeSet, sync::LazyLock};

use regex::Regex;
use schemars::JsonSchema;

use crate::{ocr::PageResult, prelude::*};

/// Never report more than this many headings for a single page.
const MAX_HEADINGS_PER_PAGE: usize = 10;

/// How many non-empty lines at the top of the first page may hold the title.
const TITLE_SEARCH_LINES: usize = 10;

/// Heading level.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub enum HeadingLevel {
    H1,
    H2,
    H3,
}

impl HeadingLevel {
    /// Level for a numbering depth, where `1` is `1.`, `2` is `1.2`, etc.
    fn from_depth(depth: usize) -> Self {
        match depth {
            0 | 1 => HeadingLevel::H1,
            2 => HeadingLevel::H2,
            _ => HeadingLevel::H3,
        }
    }
}

/// A line that looks like a heading.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
pub struct Heading {
    /// Heading level.
    pub level: HeadingLevel,

    /// Heading text, with surrounding whitespace removed.
    pub text: String,

    /// 1-based page number.
    pub page: usize,
}

/// The title and headings of a document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Outline {
    pub title: Option<String>,
    pub headings: Vec<Heading>,
}

macro_rules! regex {
    ($re:expr) => {
        LazyLock::new(|| Regex::new($re).expect("failed to compile regex"))
    };
}

/// `1 Introduction`, `2.3. Results`, `4.1.2 Details`.
static NUMBERED_RE: LazyLock<Regex> = regex!(r"^(\d{1,3}(?:\.\d{1,3})*)\.?\s+\S");

/// `Chapter 3`, `PART IV`.
static CHAPTER_RE: LazyLock<Regex> =
    regex!(r"(?i)^(?:chapter|part)\s+(?:\d+|[ivxlc]+)\b");

/// `Section 2`.
static SECTION_RE: LazyLock<Regex> = regex!(r"(?i)^section\s+\d+");

/// `IV. Discussion`.
static ROMAN_RE: LazyLock<Regex> = regex!(r"^[IVXLC]+\.\s+\S");

/// `第3章`, `第一部`, `第二編`.
static CJK_CHAPTER_RE: LazyLock<Regex> =
    regex!(r"^第[0-9０-９一二三四五六七八九十百千〇零]+[章部編编]");

/// `第2節`, `第三节`, `第五条`.
static CJK_SECTION_RE: LazyLock<Regex> =
    regex!(r"^第[0-9０-９一二三四五六七八九十百千〇零]+[節节条條]");

/// `제1장`, `제 2 부`.
static KOREAN_CHAPTER_RE: LazyLock<Regex> = regex!(r"^제\s*\d+\s*[장부편]");

/// `제3절`.
static KOREAN_SECTION_RE: LazyLock<Regex> = regex!(r"^제\s*\d+\s*절");

/// `一、概要`.
static CJK_LIST_HEADING_RE: LazyLock<Regex> = regex!(r"^[一二三四五六七八九十]+、\s*\S");

/// Lines that are never titles or headings.
static NON_TITLE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Page numbers.
        r"(?i)^(?:page\s+)?\d+(?:\s*(?:of|/)\s*\d+)?$",
        r"^[-–—]\s*\d+\s*[-–—]$",
        // Years.
        r"^(?:19|20)\d{2}$",
        // Nothing but digits and punctuation.
        r"^[\d\s\p{P}\p{S}]+$",
        // Email addresses and URLs.
        r"\S+@\S+\.\S+",
        r"(?i)https?://|www\.",
        // Copyright notices.
        r"(?i)©|\(c\)|copyright",
    ]
    .iter()
    .map(|re| Regex::new(re).expect("failed to compile regex"))
    .collect()
});

/// Is this line something we should never report?
fn is_non_title(line: &str) -> bool {
    NON_TITLE_RES.iter().any(|re| re.is_match(line))
}

/// Is this line written entirely in capital letters?
fn is_all_caps(line: &str) -> bool {
    let letters = line.chars().filter(|c| c.is_alphabetic()).collect::<Vec<_>>();
    letters.len() >= 4
        && letters.iter().all(|c| c.is_uppercase())
        && line.split_whitespace().count() <= 8
}

/// If this line looks like a heading, what level is it?
fn heading_level(line: &str) -> Option<HeadingLevel> {
    let char_count = line.chars().count();
    if !(2..=120).contains(&char_count) || is_non_title(line) {
        return None;
    }
    if let Some(caps) = NUMBERED_RE.captures(line) {
        let depth = caps[1].split('.').count();
        return Some(HeadingLevel::from_depth(depth));
    }
    if CHAPTER_RE.is_match(line)
        || CJK_CHAPTER_RE.is_match(line)
        || KOREAN_CHAPTER_RE.is_match(line)
        || ROMAN_RE.is_match(line)
    {
        return Some(HeadingLevel::H1);
    }
    if SECTION_RE.is_match(line)
        || CJK_SECTION_RE.is_match(line)
        || KOREAN_SECTION_RE.is_match(line)
        || CJK_LIST_HEADING_RE.is_match(line)
    {
        return Some(HeadingLevel::H2);
    }
    if is_all_caps(line) {
        return Some(HeadingLevel::H1);
    }
    None
}

/// Metadata titles must be longer than 3 and shorter than 150 characters.
fn is_usable_metadata_title(title: &str) -> bool {
    (4..150).contains(&title.chars().count())
}

/// Use the metadata title if it looks reasonable, or else pick one from the top
/// of the first page with any text.
fn find_title(metadata_title: Option<&str>, pages: &[PageResult]) -> Option<String> {
    if let Some(title) = metadata_title.map(str::trim)
        && is_usable_metadata_title(title)
    {
        return Some(title.to_owned());
    }
    let first = pages.iter().find(|p| !p.text().trim().is_empty())?;
    first
        .text()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(TITLE_SEARCH_LINES)
        .find(|l| (5..=200).contains(&l.chars().count()) && !is_non_title(l))
        .map(str::to_owned)
}

/// Find a title and headings in a document's pages, which must be sorted.
/// `metadata_title` is the title stored in the PDF itself, if any.
pub fn detect_outline(metadata_title: Option<&str>, pages: &[PageResult]) -> Outline {
    let mut seen = BTreeSet::new();
    let mut headings = vec![];
    for page in pages {
        let mut on_page = 0;
        for line in page.text().lines().map(str::trim) {
            if on_page >= MAX_HEADINGS_PER_PAGE {
                break;
            }
            let Some(level) = heading_level(line) else {
                continue;
            };
            if !seen.insert(line.to_lowercase()) {
                continue;
            }
            headings.push(Heading {
                level,
                text: line.to_owned(),
                page: page.page_idx + 1,
            });
            on_page += 1;
        }
    }
    Outline {
        title: find_title(metadata_title, pages),
        headings,
    }
}
