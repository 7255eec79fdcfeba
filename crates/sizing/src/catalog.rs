use crate::version::{normalize, VersionKey};
use serde::Serialize;

pub const GENERIC_OS_NAME: &str = "macOS";

/// Safety margin for versions the catalog does not know.
pub const FALLBACK_BUFFER_GB: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OsCatalogEntry {
    pub key: &'static str,
    pub name: &'static str,
    pub default_buffer_gb: f64,
    pub min_year: u16,
}

pub const OS_CATALOG: &[OsCatalogEntry] = &[
    OsCatalogEntry { key: "26", name: "Tahoe", default_buffer_gb: 3.0, min_year: 2025 },
    OsCatalogEntry { key: "15", name: "Sequoia", default_buffer_gb: 2.5, min_year: 2024 },
    OsCatalogEntry { key: "14", name: "Sonoma", default_buffer_gb: 2.2, min_year: 2023 },
    OsCatalogEntry { key: "13", name: "Ventura", default_buffer_gb: 2.0, min_year: 2022 },
    OsCatalogEntry { key: "12", name: "Monterey", default_buffer_gb: 2.0, min_year: 2021 },
    OsCatalogEntry { key: "11", name: "Big Sur", default_buffer_gb: 2.0, min_year: 2020 },
    OsCatalogEntry { key: "10.15", name: "Catalina", default_buffer_gb: 1.5, min_year: 2019 },
    OsCatalogEntry { key: "10.14", name: "Mojave", default_buffer_gb: 1.5, min_year: 2018 },
    OsCatalogEntry { key: "10.13", name: "High Sierra", default_buffer_gb: 1.0, min_year: 2017 },
    OsCatalogEntry { key: "10.12", name: "Sierra", default_buffer_gb: 1.0, min_year: 2016 },
    OsCatalogEntry { key: "10.11", name: "El Capitan", default_buffer_gb: 1.0, min_year: 2015 },
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CatalogLookup {
    pub name: &'static str,
    pub default_buffer_gb: f64,
}

pub fn entry(key: &VersionKey) -> Option<&'static OsCatalogEntry> {
    OS_CATALOG.iter().find(|entry| entry.key == key.as_str())
}

pub fn lookup(key: &VersionKey) -> CatalogLookup {
    match entry(key) {
        Some(entry) => CatalogLookup {
            name: entry.name,
            default_buffer_gb: entry.default_buffer_gb,
        },
        None => CatalogLookup {
            name: GENERIC_OS_NAME,
            default_buffer_gb: FALLBACK_BUFFER_GB,
        },
    }
}

/// Finds the catalog OS name mentioned in free text such as a bundle or
/// volume name. Longer names are tried first so "High Sierra" never
/// resolves to "Sierra". Underscores count as spaces.
pub fn os_family_in(text: &str) -> Option<&'static str> {
    let haystack = text.replace('_', " ").to_ascii_lowercase();
    let mut names: Vec<&'static str> = OS_CATALOG.iter().map(|entry| entry.name).collect();
    names.sort_by(|a, b| b.len().cmp(&a.len()));
    names
        .into_iter()
        .find(|name| haystack.contains(&name.to_ascii_lowercase()))
}

/// Friendly OS name for an installer. The bundle name wins over the
/// version string because some older installers carry an updated app
/// version (High Sierra ships as "13.6.02").
pub fn resolve_os_name(version: &str, installer_name: Option<&str>) -> &'static str {
    if let Some(name) = installer_name {
        let clean = name
            .replace("Install macOS ", "")
            .replace("Install ", "")
            .replace(".app", "");
        if let Some(family) = os_family_in(&clean) {
            return family;
        }
    }
    lookup(&normalize(version)).name
}
