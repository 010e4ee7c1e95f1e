//! Durable output for finalized listings.
//!
//! # Submodules
//!
//! - [`json`]: the incremental JSON array store every page worker appends to
//!
//! # Output Structure
//!
//! ```text
//! scraped_data.json        # [ {listing}, {listing}, ... ]
//! scraped_data.json.tmp    # transient, only exists mid-rewrite
//! ```

pub mod json;
