//! Allocation categories.

use std::fmt;

/// The subsystem an allocation belongs to.
///
/// Attached at allocation time and only used to group leak and usage
/// reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Category {
    /// Engine core (logging, tracking, platform glue).
    Core,
    /// Containers: arrays, maps, strings.
    Ds,
    /// Rendering resources.
    Render,
    /// Windowing and OS integration.
    Platform,
    /// Anything else.
    #[default]
    General,
}

impl Category {
    /// Every category, in report order.
    pub const ALL: [Category; 5] = [
        Category::Core,
        Category::Ds,
        Category::Render,
        Category::Platform,
        Category::General,
    ];

    /// Get the category name.
    pub fn name(&self) -> &'static str {
        match self {
            Category::Core => "core",
            Category::Ds => "ds",
            Category::Render => "render",
            Category::Platform => "platform",
            Category::General => "general",
        }
    }

    /// Position in [`Category::ALL`].
    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
