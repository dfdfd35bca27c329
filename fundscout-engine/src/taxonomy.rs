//! Funding focus-area taxonomy
//!
//! Static read-only lookup from a focus-area key to its category and
//! subcategories, built once. The mapping table is visible, not hidden.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

/// One taxonomy entry
#[derive(Debug, Clone, Serialize)]
pub struct FocusArea {
    pub category: &'static str,
    pub subcategories: &'static [&'static str],
}

/// Look up a focus area by key
///
/// Keys are normalized (trimmed, lowercased, spaces and underscores folded
/// to hyphens), so "Human Services" and "human-services" resolve alike.
pub fn lookup(key: &str) -> Option<&'static FocusArea> {
    table().get(normalize(key).as_str())
}

/// All known focus-area keys, sorted
pub fn keys() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = table().keys().copied().collect();
    keys.sort_unstable();
    keys
}

fn normalize(key: &str) -> String {
    key.trim().to_lowercase().replace([' ', '_'], "-")
}

fn table() -> &'static HashMap<&'static str, FocusArea> {
    static TABLE: OnceLock<HashMap<&'static str, FocusArea>> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

fn build_table() -> HashMap<&'static str, FocusArea> {
    let mut map = HashMap::new();

    map.insert(
        "education",
        FocusArea {
            category: "Education",
            subcategories: &[
                "early-childhood",
                "k-12",
                "higher-education",
                "adult-literacy",
                "stem",
            ],
        },
    );
    map.insert(
        "health",
        FocusArea {
            category: "Health",
            subcategories: &[
                "public-health",
                "mental-health",
                "rural-health",
                "maternal-health",
            ],
        },
    );
    map.insert(
        "housing",
        FocusArea {
            category: "Housing & Shelter",
            subcategories: &[
                "affordable-housing",
                "homelessness",
                "home-repair",
                "transitional-housing",
            ],
        },
    );
    map.insert(
        "environment",
        FocusArea {
            category: "Environment",
            subcategories: &["conservation", "climate", "water-quality", "land-use"],
        },
    );
    map.insert(
        "arts-culture",
        FocusArea {
            category: "Arts & Culture",
            subcategories: &["performing-arts", "museums", "public-art", "heritage"],
        },
    );
    map.insert(
        "human-services",
        FocusArea {
            category: "Human Services",
            subcategories: &["food-security", "family-services", "aging", "disability"],
        },
    );
    map.insert(
        "community-development",
        FocusArea {
            category: "Community Development",
            subcategories: &[
                "economic-development",
                "neighborhood-revitalization",
                "small-business",
                "rural-development",
            ],
        },
    );
    map.insert(
        "workforce",
        FocusArea {
            category: "Workforce Development",
            subcategories: &["job-training", "apprenticeship", "reentry", "youth-employment"],
        },
    );
    map.insert(
        "youth",
        FocusArea {
            category: "Youth Development",
            subcategories: &["mentoring", "after-school", "juvenile-justice"],
        },
    );
    map.insert(
        "research",
        FocusArea {
            category: "Research & Science",
            subcategories: &["basic-research", "applied-research", "fellowships"],
        },
    );
    map.insert(
        "veterans",
        FocusArea {
            category: "Veterans Services",
            subcategories: &["benefits-navigation", "housing", "employment"],
        },
    );
    map.insert(
        "disaster-relief",
        FocusArea {
            category: "Disaster Relief",
            subcategories: &["preparedness", "response", "recovery", "mitigation"],
        },
    );

    map
}
