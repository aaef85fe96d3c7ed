//! Domain key types: sector codes, firm-age brackets and buckets, size classes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Calendar year of an observation.
pub type Year = i32;

/// NAICS-style sector code at a given number of digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectorCode {
    code: u32,
    digits: u8,
}

/// 2-digit sectors folded together to match the regulation index granularity.
const TWO_DIGIT_RECODE: [(u32, u32); 4] = [(32, 31), (33, 31), (45, 44), (49, 48)];

impl SectorCode {
    /// Build from a numeric code; the digit count is the decimal width of `code`.
    pub fn new(code: u32) -> Self {
        let digits = code.checked_ilog10().map_or(1, |l| l as u8 + 1);
        Self { code, digits }
    }

    /// Parse the leading `digits` characters of a raw code such as `"3111"` or `"31-33"`.
    ///
    /// Shorter codes are kept at their own width. Returns `None` when the prefix
    /// is not purely numeric.
    pub fn parse(raw: &str, digits: u8) -> Option<Self> {
        let prefix: String = raw.trim().chars().take(digits as usize).collect();
        if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let code = prefix.parse().ok()?;
        Some(Self { code, digits: prefix.len() as u8 })
    }

    /// Numeric value of the code.
    pub fn code(&self) -> u32 {
        self.code
    }

    /// Number of digits the code carries.
    pub fn digits(&self) -> u8 {
        self.digits
    }

    /// Coarsen to `digits` leading digits (no-op if already at or below that width).
    pub fn truncate(&self, digits: u8) -> Self {
        if digits >= self.digits {
            return *self;
        }
        let scale = 10u32.pow(u32::from(self.digits - digits));
        Self { code: self.code / scale, digits }
    }

    /// 2-digit code after applying the manufacturing / retail / transport recoding.
    pub fn two_digit(&self) -> Self {
        let t = self.truncate(2);
        let code = TWO_DIGIT_RECODE
            .iter()
            .find(|(from, _)| *from == t.code)
            .map_or(t.code, |&(_, to)| to);
        Self { code, digits: t.digits }
    }
}

impl fmt::Display for SectorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// Firm-age bracket vocabulary of the firm-dynamics tables, youngest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgeBracket {
    /// `a) 0`, new entrants.
    Age0,
    /// `b) 1`
    Age1,
    /// `c) 2`
    Age2,
    /// `d) 3`
    Age3,
    /// `e) 4`
    Age4,
    /// `f) 5`
    Age5,
    /// `g) 6 to 10`
    Age6To10,
    /// `h) 11 to 15`
    Age11To15,
    /// `i) 16 to 20`
    Age16To20,
    /// `j) 21 to 25`
    Age21To25,
    /// `k) 26+`
    Age26Plus,
    /// `l) Left Censored`
    LeftCensored,
}

impl AgeBracket {
    /// Every bracket in sort order.
    pub const ALL: [AgeBracket; 12] = [
        AgeBracket::Age0,
        AgeBracket::Age1,
        AgeBracket::Age2,
        AgeBracket::Age3,
        AgeBracket::Age4,
        AgeBracket::Age5,
        AgeBracket::Age6To10,
        AgeBracket::Age11To15,
        AgeBracket::Age16To20,
        AgeBracket::Age21To25,
        AgeBracket::Age26Plus,
        AgeBracket::LeftCensored,
    ];

    /// Source label, e.g. `"g) 6 to 10"`.
    pub fn label(&self) -> &'static str {
        match self {
            AgeBracket::Age0 => "a) 0",
            AgeBracket::Age1 => "b) 1",
            AgeBracket::Age2 => "c) 2",
            AgeBracket::Age3 => "d) 3",
            AgeBracket::Age4 => "e) 4",
            AgeBracket::Age5 => "f) 5",
            AgeBracket::Age6To10 => "g) 6 to 10",
            AgeBracket::Age11To15 => "h) 11 to 15",
            AgeBracket::Age16To20 => "i) 16 to 20",
            AgeBracket::Age21To25 => "j) 21 to 25",
            AgeBracket::Age26Plus => "k) 26+",
            AgeBracket::LeftCensored => "l) Left Censored",
        }
    }

    /// Parse a source label.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL.iter().copied().find(|b| b.label() == raw)
    }

    /// Position in the sort order (youngest = 0).
    pub fn rank(&self) -> usize {
        *self as usize
    }

    /// Age bucket of this bracket under the fixed vocabulary.
    pub fn bucket(&self) -> AgeBucket {
        AgeBucket::from_rank(self.rank())
    }
}

/// Integer age since entry, `0..=7`, where 7 is the terminal "mature" bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgeBucket(u8);

impl AgeBucket {
    /// Entrants.
    pub const ENTRANT: AgeBucket = AgeBucket(0);
    /// Terminal bucket; every rank at or above it collapses here.
    pub const MATURE: AgeBucket = AgeBucket(7);

    /// Bucket for a sequential rank, clamped to [`AgeBucket::MATURE`].
    pub fn from_rank(rank: usize) -> Self {
        AgeBucket(rank.min(Self::MATURE.0 as usize) as u8)
    }

    /// Integer value.
    pub fn get(&self) -> u8 {
        self.0
    }

    /// `true` for the entrant bucket.
    pub fn is_entrant(&self) -> bool {
        *self == Self::ENTRANT
    }

    /// Coarse age label (`"00"`..`"05"`, `"06-10"`, `"11+"`).
    pub fn label(&self) -> &'static str {
        match self.0 {
            0 => "00",
            1 => "01",
            2 => "02",
            3 => "03",
            4 => "04",
            5 => "05",
            6 => "06-10",
            _ => "11+",
        }
    }
}

impl fmt::Display for AgeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Firm size class: firms with 500+ employees are "large".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SizeClass {
    /// Fewer than 500 employees.
    Small,
    /// 500 employees or more.
    Large,
}

const LARGE_SIZE_BRACKETS: [&str; 5] =
    ["f) 500 to 999", "g) 1000 to 2499", "h) 2500 to 4999", "i) 5000 to 9999", "j) 10000+"];

impl SizeClass {
    /// Classify a firm-size bracket label.
    pub fn from_bracket(raw: &str) -> Self {
        if LARGE_SIZE_BRACKETS.contains(&raw.trim()) { SizeClass::Large } else { SizeClass::Small }
    }

    /// `large_firm` indicator value.
    pub fn indicator(&self) -> u8 {
        match self {
            SizeClass::Small => 0,
            SizeClass::Large => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_parse_and_truncate() {
        let s = SectorCode::parse("3118", 4).unwrap();
        assert_eq!(s.code(), 3118);
        assert_eq!(s.truncate(3).code(), 311);
        assert_eq!(s.truncate(2).code(), 31);
        assert_eq!(s.truncate(6), s);

        let range = SectorCode::parse("31-33", 2).unwrap();
        assert_eq!(range.code(), 31);
        assert!(SectorCode::parse("31-33", 4).is_none());
        assert!(SectorCode::parse("", 2).is_none());

        let short = SectorCode::parse("11", 4).unwrap();
        assert_eq!(short.digits(), 2);
        assert_eq!(short.truncate(2), short);
    }

    #[test]
    fn test_two_digit_recode() {
        assert_eq!(SectorCode::new(3391).two_digit().code(), 31);
        assert_eq!(SectorCode::new(3221).two_digit().code(), 31);
        assert_eq!(SectorCode::new(4541).two_digit().code(), 44);
        assert_eq!(SectorCode::new(4931).two_digit().code(), 48);
        assert_eq!(SectorCode::new(5112).two_digit().code(), 51);
        assert_eq!(SectorCode::new(52).digits(), 2);
    }

    #[test]
    fn test_age_bucket_monotone_and_clamped() {
        let mut prev = 0u8;
        for b in AgeBracket::ALL {
            let bucket = b.bucket().get();
            assert!(bucket >= prev, "{b:?} -> {bucket} after {prev}");
            assert!(bucket <= 7);
            prev = bucket;
        }
        for b in &AgeBracket::ALL[7..] {
            assert_eq!(b.bucket(), AgeBucket::MATURE);
        }
        assert_eq!(AgeBracket::Age6To10.bucket().get(), 6);
        assert_eq!(AgeBucket::from_rank(40), AgeBucket::MATURE);
        assert_eq!(AgeBracket::Age0.bucket(), AgeBucket::ENTRANT);
        assert_eq!(AgeBracket::LeftCensored.bucket(), AgeBucket::MATURE);
    }

    #[test]
    fn test_age_labels_round_trip() {
        for b in AgeBracket::ALL {
            assert_eq!(AgeBracket::parse(b.label()), Some(b));
        }
        assert!(AgeBracket::parse("m) unknown").is_none());
        assert_eq!(AgeBucket::from_rank(6).label(), "06-10");
        assert_eq!(AgeBucket::from_rank(11).label(), "11+");
    }

    #[test]
    fn test_size_class() {
        assert_eq!(SizeClass::from_bracket("f) 500 to 999"), SizeClass::Large);
        assert_eq!(SizeClass::from_bracket("j) 10000+"), SizeClass::Large);
        assert_eq!(SizeClass::from_bracket("e) 100 to 499"), SizeClass::Small);
        assert_eq!(SizeClass::Large.indicator(), 1);
    }
}
