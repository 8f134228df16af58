// 🧱 Records - every table the pipeline passes between stages
//
// Each stage consumes an immutable slice of one record type and returns a
// fresh Vec of the next. Nothing here is mutated after construction.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// GEOGRAPHIC IDENTIFIER
// ============================================================================

/// Normalized census identifier (block or tract)
///
/// Published tables disagree on leading zeros: the crosswalk's `trct` is
/// "06001400100", a numeric reader sees 6001400100. All-digit ids are stored
/// without leading zeros so both spellings join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GeoId(String);

impl GeoId {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("empty geographic identifier".to_string());
        }

        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            let stripped = trimmed.trim_start_matches('0');
            let canonical = if stripped.is_empty() { "0" } else { stripped };
            Ok(GeoId(canonical.to_string()))
        } else {
            Ok(GeoId(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for GeoId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        GeoId::parse(&value)
    }
}

impl From<GeoId> for String {
    fn from(id: GeoId) -> Self {
        id.0
    }
}

impl fmt::Display for GeoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// CATEGORIES
// ============================================================================

/// The four aggregated employment categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Makers,
    Services,
    Professions,
    Support,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Makers,
        Category::Services,
        Category::Professions,
        Category::Support,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Category::Makers => "makers",
            Category::Services => "services",
            Category::Professions => "professions",
            Category::Support => "support",
        }
    }

    /// Short column prefix (shapefile dbf fields are limited to 10 chars)
    pub fn prefix(&self) -> &'static str {
        match self {
            Category::Makers => "make",
            Category::Services => "serv",
            Category::Professions => "prof",
            Category::Support => "supp",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Number of raw NAICS sector columns (CNS01..CNS20) in a WAC table
pub const RAW_CATEGORY_COUNT: usize = 20;

/// CNSnn → super category, indexed by nn - 1
///
///   makers      = CNS01-06, CNS08
///   services    = CNS07, CNS14, CNS17, CNS18
///   professions = CNS09-13
///   support     = CNS15, CNS16, CNS19, CNS20
pub const RAW_CATEGORY_MAP: [Category; RAW_CATEGORY_COUNT] = [
    Category::Makers,      // CNS01 agriculture
    Category::Makers,      // CNS02 mining
    Category::Makers,      // CNS03 utilities
    Category::Makers,      // CNS04 construction
    Category::Makers,      // CNS05 manufacturing
    Category::Makers,      // CNS06 wholesale
    Category::Services,    // CNS07 retail
    Category::Makers,      // CNS08 transportation
    Category::Professions, // CNS09 information
    Category::Professions, // CNS10 finance
    Category::Professions, // CNS11 real estate
    Category::Professions, // CNS12 professional services
    Category::Professions, // CNS13 management
    Category::Services,    // CNS14 administrative support
    Category::Support,     // CNS15 education
    Category::Support,     // CNS16 health care
    Category::Services,    // CNS17 arts
    Category::Services,    // CNS18 accommodation & food
    Category::Support,     // CNS19 other services
    Category::Support,     // CNS20 public administration
];

/// One value per category
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ByCategory<T> {
    pub makers: T,
    pub services: T,
    pub professions: T,
    pub support: T,
}

impl<T: Copy> ByCategory<T> {
    pub fn splat(value: T) -> Self {
        ByCategory {
            makers: value,
            services: value,
            professions: value,
            support: value,
        }
    }

    pub fn from_fn(mut f: impl FnMut(Category) -> T) -> Self {
        ByCategory {
            makers: f(Category::Makers),
            services: f(Category::Services),
            professions: f(Category::Professions),
            support: f(Category::Support),
        }
    }

    pub fn get(&self, category: Category) -> T {
        match category {
            Category::Makers => self.makers,
            Category::Services => self.services,
            Category::Professions => self.professions,
            Category::Support => self.support,
        }
    }

    pub fn map<U: Copy>(&self, mut f: impl FnMut(T) -> U) -> ByCategory<U> {
        ByCategory::from_fn(|c| f(self.get(c)))
    }

    /// Iterate in Category::ALL order
    pub fn iter(&self) -> impl Iterator<Item = (Category, T)> + '_ {
        Category::ALL.iter().map(move |c| (*c, self.get(*c)))
    }
}

impl<T> ByCategory<T> {
    pub fn get_mut(&mut self, category: Category) -> &mut T {
        match category {
            Category::Makers => &mut self.makers,
            Category::Services => &mut self.services,
            Category::Professions => &mut self.professions,
            Category::Support => &mut self.support,
        }
    }
}

/// Job counts per aggregated category
pub type CategoryCounts = ByCategory<u64>;

impl CategoryCounts {
    /// Sum of the four categories
    ///
    /// Counts built by `checked_add` / `BlockRecord::aggregate` in this crate
    /// always have a total that fits; use `checked_total` on anything else.
    pub fn total(&self) -> u64 {
        self.makers + self.services + self.professions + self.support
    }

    pub fn checked_total(&self) -> Option<u64> {
        self.makers
            .checked_add(self.services)?
            .checked_add(self.professions)?
            .checked_add(self.support)
    }

    /// Element-wise sum; None when a category or the total overflows
    pub fn checked_add(&self, other: &CategoryCounts) -> Option<CategoryCounts> {
        let sum = CategoryCounts {
            makers: self.makers.checked_add(other.makers)?,
            services: self.services.checked_add(other.services)?,
            professions: self.professions.checked_add(other.professions)?,
            support: self.support.checked_add(other.support)?,
        };
        sum.checked_total().map(|_| sum)
    }
}

// ============================================================================
// STAGE RECORDS
// ============================================================================

/// One census block from a WAC table
#[derive(Debug, Clone, PartialEq)]
pub struct BlockRecord {
    pub block_id: GeoId,
    /// CNS01..CNS20
    pub raw: [u64; RAW_CATEGORY_COUNT],
    /// Stated total (C000); checked against `raw`, never trusted
    pub total_jobs: u64,
}

impl BlockRecord {
    /// Roll the 20 raw sectors up into the 4 categories
    ///
    /// None when the counts do not fit in a u64 total (a corrupt row).
    pub fn aggregate(&self) -> Option<CategoryCounts> {
        let mut counts = CategoryCounts::default();
        for (index, value) in self.raw.iter().enumerate() {
            let slot = counts.get_mut(RAW_CATEGORY_MAP[index]);
            *slot = slot.checked_add(*value)?;
        }
        counts.checked_total().map(|_| counts)
    }

    /// CNS01..CNS20 summed without overflow
    pub fn raw_total(&self) -> u128 {
        self.raw.iter().map(|v| u128::from(*v)).sum()
    }

    /// Stated total minus the sector sum (0 when the block reconciles)
    pub fn discrepancy(&self) -> i128 {
        // both sides are at most 20 * u64::MAX, far inside i128
        self.total_jobs as i128 - self.raw_total() as i128
    }
}

/// Block → tract mapping row with the county used for filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrosswalkEntry {
    pub block_id: GeoId,
    pub tract_id: GeoId,
    pub county_fips: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedTractRecord {
    pub tract_id: GeoId,
    pub counts: CategoryCounts,
}

impl AggregatedTractRecord {
    pub fn total(&self) -> u64 {
        self.counts.total()
    }
}

/// Location quotient, None when undefined (zero tract total or zero region share)
pub type Quotient = Option<f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationQuotientRecord {
    pub tract_id: GeoId,
    pub year: u16,
    pub counts: CategoryCounts,
    pub lq: ByCategory<Quotient>,
}

impl LocationQuotientRecord {
    pub fn total(&self) -> u64 {
        self.counts.total()
    }
}

/// Baseline and current year of a differenced table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearPair {
    pub baseline: u16,
    pub current: u16,
}

impl YearPair {
    /// Two-digit column suffix, 2015 → "15", 2002 → "02"
    pub fn suffix(year: u16) -> String {
        format!("{:02}", year % 100)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LqChangeRecord {
    pub tract_id: GeoId,
    pub years: YearPair,
    /// Counts of the current year (drives density)
    pub counts: CategoryCounts,
    pub current: ByCategory<Quotient>,
    pub baseline: ByCategory<Quotient>,
    pub delta: ByCategory<Quotient>,
}

/// Anything the density stage can classify: an id plus job counts
pub trait TractMeasure {
    fn tract_id(&self) -> &GeoId;
    fn counts(&self) -> &CategoryCounts;

    fn total(&self) -> u64 {
        self.counts().total()
    }
}

impl TractMeasure for AggregatedTractRecord {
    fn tract_id(&self) -> &GeoId {
        &self.tract_id
    }

    fn counts(&self) -> &CategoryCounts {
        &self.counts
    }
}

impl TractMeasure for LocationQuotientRecord {
    fn tract_id(&self) -> &GeoId {
        &self.tract_id
    }

    fn counts(&self) -> &CategoryCounts {
        &self.counts
    }
}

impl TractMeasure for LqChangeRecord {
    fn tract_id(&self) -> &GeoId {
        &self.tract_id
    }

    fn counts(&self) -> &CategoryCounts {
        &self.counts
    }
}

/// Density classification merged with the record it was computed from
#[derive(Debug, Clone, PartialEq)]
pub struct DensityRecord<R> {
    pub record: R,
    pub area_sqmi: f64,
    /// Jobs per square mile, None when not finite
    pub density: Option<f64>,
    pub category_density: ByCategory<Option<f64>>,
    /// 0 = lowest density fifth, 4 = highest
    pub quintile: Option<u8>,
    /// Job-count decile among the tracts with geometry, per category
    pub category_deciles: ByCategory<Option<u8>>,
}

impl<R: TractMeasure> TractMeasure for DensityRecord<R> {
    fn tract_id(&self) -> &GeoId {
        self.record.tract_id()
    }

    fn counts(&self) -> &CategoryCounts {
        self.record.counts()
    }
}
