//! Usage and leak reports.

use std::fmt;

use crate::api::category::Category;
use crate::api::entry::AllocationEntry;
use crate::util::format_bytes;

/// Live bytes and allocation count for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryUsage {
    pub category: Category,
    pub bytes: usize,
    pub count: usize,
}

/// Snapshot of live (not yet freed) memory, grouped by category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageReport {
    categories: [CategoryUsage; 5],
}

impl Default for UsageReport {
    fn default() -> Self {
        Self {
            categories: Category::ALL.map(|category| CategoryUsage {
                category,
                bytes: 0,
                count: 0,
            }),
        }
    }
}

impl UsageReport {
    /// Create an empty report.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, category: Category, size: usize) {
        let usage = &mut self.categories[category.index()];
        usage.bytes += size;
        usage.count += 1;
    }

    /// Usage for a single category.
    pub fn get(&self, category: Category) -> CategoryUsage {
        self.categories[category.index()]
    }

    /// Per-category usage in report order.
    pub fn categories(&self) -> &[CategoryUsage] {
        &self.categories
    }

    pub fn total_bytes(&self) -> usize {
        self.categories.iter().map(|c| c.bytes).sum()
    }

    pub fn total_count(&self) -> usize {
        self.categories.iter().map(|c| c.count).sum()
    }
}

impl fmt::Display for UsageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Memory usage:")?;
        for usage in &self.categories {
            writeln!(
                f,
                "  {:<9} {:>12} in {} allocations",
                usage.category.name(),
                format_bytes(usage.bytes),
                usage.count
            )?;
        }
        write!(
            f,
            "  {:<9} {:>12} in {} allocations",
            "total",
            format_bytes(self.total_bytes()),
            self.total_count()
        )
    }
}

/// Allocations still live when the tracker was shut down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    /// Leaked entries, in table order.
    pub leaks: Vec<AllocationEntry>,
}

impl LeakReport {
    pub fn is_empty(&self) -> bool {
        self.leaks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.leaks.len()
    }

    /// Sum of the leaked sizes.
    pub fn total_bytes(&self) -> usize {
        self.leaks.iter().map(|leak| leak.size).sum()
    }

    /// Leaked bytes attributed to one category.
    pub fn bytes_in(&self, category: Category) -> usize {
        self.leaks
            .iter()
            .filter(|leak| leak.category == category)
            .map(|leak| leak.size)
            .sum()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.leaks.is_empty() {
            return write!(f, "No leaks");
        }
        writeln!(
            f,
            "{} leaks, {} total:",
            self.leaks.len(),
            format_bytes(self.total_bytes())
        )?;
        for (i, leak) in self.leaks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {}", leak)?;
        }
        Ok(())
    }
}
