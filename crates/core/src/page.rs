//! Pagination and sort direction shared by every listing operation.

use core::cmp::Ordering;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Sort direction for paged listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Orient an ascending comparison according to this direction.
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(DomainError::validation(format!(
                "sort direction must be 'asc' or 'desc', got '{other}'"
            ))),
        }
    }
}

/// Zero-based page request.
///
/// `size` is clamped to `1..=MAX_SIZE` on construction; an `index` past the
/// last page is valid and yields an empty page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    index: u32,
    size: u32,
}

impl PageRequest {
    pub const DEFAULT_SIZE: u32 = 10;
    pub const MAX_SIZE: u32 = 100;

    pub fn new(index: u32, size: u32) -> Self {
        Self {
            index,
            size: size.clamp(1, Self::MAX_SIZE),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.index) * u64::from(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_SIZE)
    }
}

/// One page of results plus enough metadata to render pagination controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub index: u32,
    pub size: u32,
    pub total_items: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, request: PageRequest, total_items: u64) -> Self {
        Self {
            items,
            index: request.index(),
            size: request.size(),
            total_items,
        }
    }

    /// Cut a page out of an already ordered collection.
    pub fn from_sorted(all: Vec<T>, request: PageRequest) -> Self {
        let total_items = all.len() as u64;
        let offset = usize::try_from(request.offset()).unwrap_or(usize::MAX);
        let items = all
            .into_iter()
            .skip(offset)
            .take(request.size() as usize)
            .collect();
        Self::new(items, request, total_items)
    }

    pub fn total_pages(&self) -> u64 {
        self.total_items.div_ceil(u64::from(self.size.max(1)))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            index: self.index,
            size: self.size,
            total_items: self.total_items,
        }
    }
}
