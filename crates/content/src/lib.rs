//! Finding installer bundles on disk and deciding whether they are usable.

pub mod discovery;
pub mod stub;

pub use discovery::{
    default_search_paths, payload_size_kb, read_installer_metadata, scan_for_installers,
    scan_for_partial_downloads, InstallerMetadata, MIST_TEMP_DIR,
};
pub use stub::{
    is_stub, partition_by_usability, stub_reason, validate_installer, ExcludedInstaller,
    MIN_SHARED_SUPPORT_MB, STUB_THRESHOLD_MB,
};
