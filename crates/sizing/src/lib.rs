//! Version normalisation, the macOS catalog and partition sizing.
//!
//! Everything here is total over its input: malformed version strings and
//! empty payloads degrade to conservative defaults instead of failing.

pub mod calculator;
pub mod catalog;
pub mod version;

pub use calculator::{
    installer_size_mb, required_size_mb, required_size_mb_with, SizingConfig,
    FILESYSTEM_OVERHEAD_FRACTION, FIXED_BOOT_RESERVE_MB, MIN_PARTITION_MB,
};
pub use catalog::{
    entry, lookup, os_family_in, resolve_os_name, CatalogLookup, OsCatalogEntry,
    FALLBACK_BUFFER_GB, GENERIC_OS_NAME, OS_CATALOG,
};
pub use version::{
    compare_versions, format_version_display, is_update, normalize, parse_ordered_triple,
    VersionKey, VersionTriple, FALLBACK_VERSION_KEY,
};
