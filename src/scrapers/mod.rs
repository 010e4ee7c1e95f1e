//! Markup scrapers for the listing site.
//!
//! The site renders each paginated listing page as one large table; every
//! job posting is a `<tr>` whose `id` starts with `tr`. The same semantic
//! field lives in different cells depending on how the employer filed the
//! advert, so field extraction is done by ordered resolver strategies.
//!
//! # Submodules
//!
//! - [`listings`]: turns a listing page into one [`listings::ParsedListing`]
//!   per detected container, in document order

pub mod listings;
