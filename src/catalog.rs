//! Listings of things neighbours rent out, lend, or offer for hire, and the browse filter.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Browse page defaults for the price slider.
pub const DEFAULT_MIN_PRICE: f64 = 0.0;
pub const DEFAULT_MAX_PRICE: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Tools,
    Appliances,
    Skills,
    Services,
    Others,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingType {
    Rent,
    Borrow,
    Hire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceUnit {
    Hour,
    Day,
    Week,
    Month,
    Job,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    New,
    LikeNew,
    Good,
    Fair,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    #[serde(rename = "type")]
    pub listing_type: ListingType,
    pub price: f64,
    #[serde(default)]
    pub deposit: Option<f64>,
    pub price_unit: PriceUnit,
    pub district: String,
    #[serde(default)]
    pub address: String,
    pub available: bool,
    #[serde(default)]
    pub condition: Option<Condition>,
    pub posted_date: String,
    #[serde(default)]
    pub views: u32,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub review_count: Option<u32>,
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = serde_json::to_value(self.price_unit)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        write!(f, "{} \u{2014} RM{:.2}/{} ({})", self.title, self.price, unit, self.district)?;
        if !self.available {
            write!(f, " [unavailable]")?;
        }
        Ok(())
    }
}

/// Parse a lowercase wire name (`"tools"`, `"rent"`, ...). `"all"` means no constraint.
pub fn parse_choice<T: for<'de> Deserialize<'de>>(s: &str) -> Result<Option<T>, String> {
    let s = s.trim().to_lowercase();
    if s.is_empty() || s == "all" {
        return Ok(None);
    }
    serde_json::from_value(serde_json::Value::String(s.clone()))
        .map(Some)
        .map_err(|_| format!("unknown value '{}'", s))
}

impl FromStr for Category {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_choice(s)?.ok_or_else(|| "category required".into())
    }
}

impl FromStr for ListingType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_choice(s)?.ok_or_else(|| "listing type required".into())
    }
}

/// Browse criteria; an item must satisfy every one.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFilter {
    /// Case-insensitive substring of title or description.
    pub search: String,
    pub category: Option<Category>,
    pub district: Option<String>,
    pub listing_type: Option<ListingType>,
    pub min_price: f64,
    pub max_price: f64,
    pub available_only: bool,
}

impl Default for ItemFilter {
    fn default() -> Self {
        Self {
            search: String::new(),
            category: None,
            district: None,
            listing_type: None,
            min_price: DEFAULT_MIN_PRICE,
            max_price: DEFAULT_MAX_PRICE,
            available_only: false,
        }
    }
}

impl ItemFilter {
    /// Accepts `"all"` or an empty string as "no constraint".
    pub fn with_district(mut self, district: Option<&str>) -> Self {
        self.district = district
            .map(str::trim)
            .filter(|d| !d.is_empty() && !d.eq_ignore_ascii_case("all"))
            .map(str::to_string);
        self
    }

    /// Rejects a price range that no item could fall into.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_price > self.max_price {
            return Err(format!("min price {} exceeds max price {}", self.min_price, self.max_price));
        }
        Ok(())
    }

    pub fn matches(&self, item: &Item) -> bool {
        let needle = self.search.to_lowercase();
        let matches_search = item.title.to_lowercase().contains(&needle)
            || item.description.to_lowercase().contains(&needle);
        let matches_category = self.category.map_or(true, |c| item.category == c);
        let matches_district = self.district.as_deref().map_or(true, |d| item.district == d);
        let matches_type = self.listing_type.map_or(true, |t| item.listing_type == t);
        let matches_price = item.price >= self.min_price && item.price <= self.max_price;
        let matches_availability = !self.available_only || item.available;

        matches_search
            && matches_category
            && matches_district
            && matches_type
            && matches_price
            && matches_availability
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read listings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed listings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The in-memory listing set.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: Vec<Item>,
}

impl Catalog {
    pub fn new(items: Vec<Item>) -> Self {
        Self { items }
    }

    /// Load a JSON array of items.
    pub fn load_from(path: &Path) -> Result<Self, CatalogError> {
        let data = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(serde_json::from_str(&data)?))
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Matching items in catalog order.
    pub fn filter(&self, filter: &ItemFilter) -> Vec<&Item> {
        self.items.iter().filter(|i| filter.matches(i)).collect()
    }
}
