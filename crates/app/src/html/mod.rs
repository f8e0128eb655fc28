//! Embedded static HTML served by the gateway.
//!
//! The page is kept as a `&'static str` so it is bundled directly inside the
//! binary without filesystem lookups.

mod dashboard;

pub(crate) use dashboard::INDEX_HTML;
