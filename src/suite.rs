use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::Resource;

/// Substring that marks a resource as a Standard Plus suite when it predates
/// the dedicated type.
pub const STANDARD_PLUS_MARKER: &str = "Standard Plus";

/// Accommodation category of a bookable unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuiteType {
    VipSuite,
    StandardPlusSuite,
    StandardSuite,
    Kennel,
    PlayArea,
    GroomingStation,
    TrainingArea,
    ExamRoom,
}

impl SuiteType {
    pub const ALL: [SuiteType; 8] = [
        Self::VipSuite,
        Self::StandardPlusSuite,
        Self::StandardSuite,
        Self::Kennel,
        Self::PlayArea,
        Self::GroomingStation,
        Self::TrainingArea,
        Self::ExamRoom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VipSuite => "VIP_SUITE",
            Self::StandardPlusSuite => "STANDARD_PLUS_SUITE",
            Self::StandardSuite => "STANDARD_SUITE",
            Self::Kennel => "KENNEL",
            Self::PlayArea => "PLAY_AREA",
            Self::GroomingStation => "GROOMING_STATION",
            Self::TrainingArea => "TRAINING_AREA",
            Self::ExamRoom => "EXAM_ROOM",
        }
    }

    /// Overnight and daycare units must be assigned; service stations may
    /// be scheduled without one.
    pub fn requires_resource(self) -> bool {
        matches!(
            self,
            Self::VipSuite
                | Self::StandardPlusSuite
                | Self::StandardSuite
                | Self::Kennel
                | Self::PlayArea
        )
    }
}

impl fmt::Display for SuiteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuiteType {
    type Err = UnmappedCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or(UnmappedCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unmapped suite type or service category: {0}")]
pub struct UnmappedCategory(pub String);

/// Suite type resolved from a request, plus whether the request must end
/// with a resource assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSuite {
    pub suite_type: SuiteType,
    pub requires_resource: bool,
}

/// Service category → suite type table, plus per-category overrides of the
/// mandatory-assignment rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationPolicy {
    categories: BTreeMap<String, ResolvedSuite>,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        let mut policy = Self {
            categories: BTreeMap::new(),
        };
        policy.map_category("BOARDING", SuiteType::Kennel);
        policy.map_category("DAYCARE", SuiteType::PlayArea);
        policy.map_category("GROOMING", SuiteType::GroomingStation);
        policy.map_category("TRAINING", SuiteType::TrainingArea);
        policy.map_category("VET", SuiteType::ExamRoom);
        policy
    }
}

impl AllocationPolicy {
    /// A policy with no categories; only canonical suite tokens resolve.
    pub fn empty() -> Self {
        Self {
            categories: BTreeMap::new(),
        }
    }

    /// Map `category` to `suite_type`, inheriting the suite type's
    /// mandatory-assignment rule.
    pub fn map_category(&mut self, category: &str, suite_type: SuiteType) {
        self.categories.insert(
            normalize(category),
            ResolvedSuite {
                suite_type,
                requires_resource: suite_type.requires_resource(),
            },
        );
    }

    /// Force (or waive) resource assignment for one category.
    pub fn set_requires_resource(&mut self, category: &str, required: bool) -> bool {
        match self.categories.get_mut(&normalize(category)) {
            Some(entry) => {
                entry.requires_resource = required;
                true
            }
            None => false,
        }
    }

    /// Parse a `CATEGORY=SUITE_TYPE[,...]` list and merge it over this table.
    /// A trailing `!` on the suite type makes the category mandatory, a
    /// trailing `?` makes it optional.
    pub fn merge_spec(&mut self, spec: &str) -> Result<(), UnmappedCategory> {
        for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (category, target) = pair
                .split_once('=')
                .ok_or_else(|| UnmappedCategory(pair.to_string()))?;
            let (target, required) = match target.trim() {
                t if t.ends_with('!') => (&t[..t.len() - 1], Some(true)),
                t if t.ends_with('?') => (&t[..t.len() - 1], Some(false)),
                t => (t, None),
            };
            let suite_type: SuiteType = target.parse()?;
            self.map_category(category, suite_type);
            if let Some(required) = required {
                self.set_requires_resource(category, required);
            }
        }
        Ok(())
    }

    /// Resolve a canonical suite token or a service category.
    pub fn resolve(&self, token: &str) -> Result<ResolvedSuite, UnmappedCategory> {
        if let Ok(suite_type) = token.parse::<SuiteType>() {
            return Ok(ResolvedSuite {
                suite_type,
                requires_resource: suite_type.requires_resource(),
            });
        }
        self.categories
            .get(&normalize(token))
            .copied()
            .ok_or_else(|| UnmappedCategory(token.to_string()))
    }

    pub fn categories(&self) -> impl Iterator<Item = (&str, ResolvedSuite)> {
        self.categories.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Predicate selecting the active resources that can host a suite type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteMatcher {
    suite_type: SuiteType,
}

impl SuiteMatcher {
    pub fn new(suite_type: SuiteType) -> Self {
        Self { suite_type }
    }

    pub fn suite_type(&self) -> SuiteType {
        self.suite_type
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        resource.is_active && self.matches_type(resource)
    }

    /// Type match ignoring the active flag. Standard Plus also accepts
    /// resources whose name or description carries the marker.
    pub fn matches_type(&self, resource: &Resource) -> bool {
        if resource.suite_type == self.suite_type {
            return true;
        }
        self.suite_type == SuiteType::StandardPlusSuite
            && (resource.name.contains(STANDARD_PLUS_MARKER)
                || resource
                    .description
                    .as_deref()
                    .is_some_and(|d| d.contains(STANDARD_PLUS_MARKER)))
    }
}

fn normalize(token: &str) -> String {
    token
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}
