//! Small helpers shared by the report types.

pub(crate) mod size;

pub(crate) use size::format_bytes;
