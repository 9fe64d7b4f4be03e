// Utilities
// CSV export of status snapshots for offline review.

pub mod status_export;
