//! Institution categories and the charter/entity-code decision table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Institution category.
///
/// Declaration order is priority order for the registry-derived kinds:
/// when one legal name carries conflicting evidence in the same quarter,
/// the smallest variant wins. The last three are name-list overrides applied
/// after resolution and never compete on priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InstitutionCategory {
    #[serde(rename = "bank")]
    Bank,
    #[serde(rename = "credit union")]
    CreditUnion,
    #[serde(rename = "bank holding company")]
    HoldingCompany,
    #[serde(rename = "insurance related")]
    InsuranceRelated,
    #[serde(rename = "security related")]
    SecurityRelated,
    #[serde(rename = "others")]
    Others,
    #[serde(rename = "major credit bureaus")]
    MajorCreditBureau,
    #[serde(rename = "scra")]
    Scra,
    #[serde(rename = "data broker")]
    DataBroker,
}

impl InstitutionCategory {
    /// Numeric rank of the registry-derived kinds (bank=1 .. others=6).
    pub fn priority(self) -> u8 {
        match self {
            Self::Bank => 1,
            Self::CreditUnion => 2,
            Self::HoldingCompany => 3,
            Self::InsuranceRelated => 4,
            Self::SecurityRelated => 5,
            Self::Others => 6,
            Self::MajorCreditBureau | Self::Scra | Self::DataBroker => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bank => "bank",
            Self::CreditUnion => "credit union",
            Self::HoldingCompany => "bank holding company",
            Self::InsuranceRelated => "insurance related",
            Self::SecurityRelated => "security related",
            Self::Others => "others",
            Self::MajorCreditBureau => "major credit bureaus",
            Self::Scra => "scra",
            Self::DataBroker => "data broker",
        }
    }

    /// Kinds that file the quarterly reports the asset panels are built from.
    pub fn files_financial_reports(self) -> bool {
        matches!(self, Self::Bank | Self::CreditUnion | Self::HoldingCompany)
    }

    /// Non-depository overrides are never matched against financial reports.
    pub fn is_name_list_override(self) -> bool {
        matches!(self, Self::MajorCreditBureau | Self::Scra | Self::DataBroker)
    }
}

impl fmt::Display for InstitutionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstitutionCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL.iter()
            .copied()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| format!("unknown institution category '{s}'"))
    }
}

const ALL: [InstitutionCategory; 9] = [
    InstitutionCategory::Bank,
    InstitutionCategory::CreditUnion,
    InstitutionCategory::HoldingCompany,
    InstitutionCategory::InsuranceRelated,
    InstitutionCategory::SecurityRelated,
    InstitutionCategory::Others,
    InstitutionCategory::MajorCreditBureau,
    InstitutionCategory::Scra,
    InstitutionCategory::DataBroker,
];

// ── Decision table ─────────────────────────────────────────────────

type CodePredicate = fn(Option<u32>, Option<&str>) -> bool;

fn is_bank(charter: Option<u32>, entity: Option<&str>) -> bool {
    matches!(charter, Some(200 | 300 | 320 | 340))
        || matches!(entity, Some("SMB" | "DBR" | "NAT" | "NMB" | "ISB"))
}

fn is_credit_union(charter: Option<u32>, entity: Option<&str>) -> bool {
    charter == Some(330) || matches!(entity, Some("FCU" | "SCU"))
}

fn is_holding_company(_charter: Option<u32>, entity: Option<&str>) -> bool {
    matches!(entity, Some("BHC" | "FBH" | "FHD" | "SLHC"))
}

fn is_insurance(charter: Option<u32>, _entity: Option<&str>) -> bool {
    charter == Some(550)
}

fn is_securities(charter: Option<u32>, _entity: Option<&str>) -> bool {
    charter == Some(700)
}

/// Ordered `(predicate, category)` rules. First match wins.
const CLASSIFICATION_RULES: [(CodePredicate, InstitutionCategory); 5] = [
    (is_bank, InstitutionCategory::Bank),
    (is_credit_union, InstitutionCategory::CreditUnion),
    (is_holding_company, InstitutionCategory::HoldingCompany),
    (is_insurance, InstitutionCategory::InsuranceRelated),
    (is_securities, InstitutionCategory::SecurityRelated),
];

/// Classify a registry row from its charter-type and entity-type codes.
/// Rows matching no rule are `Others`.
pub fn classify(charter_type_code: Option<u32>, entity_type_code: Option<&str>) -> InstitutionCategory {
    let entity = entity_type_code.map(str::trim);
    CLASSIFICATION_RULES
        .iter()
        .find(|(predicate, _)| predicate(charter_type_code, entity))
        .map(|(_, category)| *category)
        .unwrap_or(InstitutionCategory::Others)
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstitutionCategory::*;

    #[test]
    fn bank_rules_are_checked_first() {
        // Charter says credit union, entity type says national bank.
        assert_eq!(classify(Some(330), Some("NAT")), Bank);
        assert_eq!(classify(Some(330), None), CreditUnion);
        assert_eq!(classify(None, Some("BHC")), HoldingCompany);
        assert_eq!(classify(Some(550), Some("BHC")), HoldingCompany);
        assert_eq!(classify(Some(550), None), InsuranceRelated);
        assert_eq!(classify(Some(700), None), SecurityRelated);
        assert_eq!(classify(Some(0), Some("DEO")), Others);
        assert_eq!(classify(None, None), Others);
    }

    #[test]
    fn priority_follows_declaration_order() {
        assert!(Bank < CreditUnion && CreditUnion < HoldingCompany && HoldingCompany < Others);
        assert_eq!(Bank.priority(), 1);
        assert_eq!(Others.priority(), 6);
    }

    #[test]
    fn labels_parse_back() {
        for c in ALL {
            assert_eq!(c.as_str().parse::<InstitutionCategory>().unwrap(), c);
        }
    }
}
