//! Publications list form (Appendix 7).
//!
//! The form holds four sections of publication entries. Clients have sent
//! it in three shapes over time: a `sections` object, the four arrays at the
//! top level, or only legacy `count_*` totals. All of them parse into
//! [`PublicationsForm`].

use journey_core::{JourneyResult, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

static DOI_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^10\.[0-9]{4,9}/[-._;()/:A-Z0-9]+$").expect("valid DOI regex"));
static ISSN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{4}-[0-9]{3}[0-9Xx]$").expect("valid ISSN regex"));
static YEAR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(18|19|20)\d{2}([/\\-](18|19|20)\d{2})?$").expect("valid year regex")
});

const MAX_TITLE_CHARS: usize = 1000;

pub const SECTION_WOS_SCOPUS: &str = "wos_scopus";
pub const SECTION_KOKSON: &str = "kokson";
pub const SECTION_CONFERENCES: &str = "conferences";
pub const SECTION_IP: &str = "ip";

/// One publication, conference paper or intellectual property record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicationEntry {
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub format_other: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub journal: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub year: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub volume_issue: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pages_or_sheets: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub doi: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub issn_print: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub issn_online: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub coauthors: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub indexing: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub indexing_other: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ip_type_other: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub certificate_no: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub isbn: String,
}

impl PublicationEntry {
    /// Trim every text field and drop blank coauthors.
    fn normalized(mut self) -> Self {
        for field in [
            &mut self.title,
            &mut self.format,
            &mut self.format_other,
            &mut self.journal,
            &mut self.year,
            &mut self.volume_issue,
            &mut self.pages_or_sheets,
            &mut self.doi,
            &mut self.issn_print,
            &mut self.issn_online,
            &mut self.indexing,
            &mut self.indexing_other,
            &mut self.ip_type,
            &mut self.ip_type_other,
            &mut self.certificate_no,
            &mut self.isbn,
        ] {
            let trimmed = field.trim();
            if trimmed.len() != field.len() {
                *field = trimmed.to_string();
            }
        }
        self.coauthors = self
            .coauthors
            .into_iter()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        self
    }

    fn validate(&self, require_ip_type: bool) -> Result<(), &'static str> {
        if self.title.is_empty() {
            return Err("title is required");
        }
        if self.title.chars().count() > MAX_TITLE_CHARS {
            return Err("title exceeds 1000 characters");
        }
        if !self.year.is_empty() && !YEAR_PATTERN.is_match(&self.year) {
            return Err("year must be in format YYYY or YYYY/YYYY");
        }
        if !self.doi.is_empty() && !DOI_PATTERN.is_match(&self.doi) {
            return Err("invalid DOI");
        }
        if !self.issn_print.is_empty() && !ISSN_PATTERN.is_match(&self.issn_print) {
            return Err("invalid ISSN print");
        }
        if !self.issn_online.is_empty() && !ISSN_PATTERN.is_match(&self.issn_online) {
            return Err("invalid ISSN online");
        }
        if require_ip_type && self.ip_type.is_empty() && self.ip_type_other.is_empty() {
            return Err("type is required for intellectual property entries");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicationSections {
    pub wos_scopus: Vec<PublicationEntry>,
    pub kokson: Vec<PublicationEntry>,
    pub conferences: Vec<PublicationEntry>,
    pub ip: Vec<PublicationEntry>,
}

impl PublicationSections {
    fn is_empty(&self) -> bool {
        self.wos_scopus.is_empty()
            && self.kokson.is_empty()
            && self.conferences.is_empty()
            && self.ip.is_empty()
    }

    /// Entry count per section.
    pub fn summary(&self) -> BTreeMap<String, i64> {
        [
            (SECTION_WOS_SCOPUS, self.wos_scopus.len()),
            (SECTION_KOKSON, self.kokson.len()),
            (SECTION_CONFERENCES, self.conferences.len()),
            (SECTION_IP, self.ip.len()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v as i64))
        .collect()
    }
}

/// Stored shape of the publications form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationsForm {
    #[serde(default)]
    pub sections: PublicationSections,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub legacy_counts: BTreeMap<String, i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IncomingForm {
    sections: Option<PublicationSections>,
    legacy_counts: Option<BTreeMap<String, i64>>,
    wos_scopus: Vec<PublicationEntry>,
    kokson: Vec<PublicationEntry>,
    conferences: Vec<PublicationEntry>,
    ip: Vec<PublicationEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyCountsOnly {
    count_wos_scopus: Option<i64>,
    count_kokson: Option<i64>,
    count_conferences: Option<i64>,
    count_ip: Option<i64>,
}

fn invalid(reason: impl Into<String>) -> journey_core::JourneyError {
    ValidationError::InvalidPayload {
        reason: reason.into(),
    }
    .into()
}

impl PublicationsForm {
    /// Parse any of the accepted shapes without validating entries.
    pub fn parse(raw: &[u8]) -> JourneyResult<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(raw).map_err(|e| invalid(format!("publications form: {}", e)))?;
        if !value.is_object() {
            return Err(invalid("publications form must be a JSON object"));
        }

        let incoming: IncomingForm = serde_json::from_value(value.clone())
            .map_err(|e| invalid(format!("publications form: {}", e)))?;

        let flat = PublicationSections {
            wos_scopus: incoming.wos_scopus,
            kokson: incoming.kokson,
            conferences: incoming.conferences,
            ip: incoming.ip,
        };
        let has_counts_map = incoming
            .legacy_counts
            .as_ref()
            .map(|m| !m.is_empty())
            .unwrap_or(false);

        if incoming.sections.is_none() && !has_counts_map && flat.is_empty() {
            if let Ok(legacy) = serde_json::from_value::<LegacyCountsOnly>(value) {
                let counts: BTreeMap<String, i64> = [
                    (SECTION_WOS_SCOPUS, legacy.count_wos_scopus),
                    (SECTION_KOKSON, legacy.count_kokson),
                    (SECTION_CONFERENCES, legacy.count_conferences),
                    (SECTION_IP, legacy.count_ip),
                ]
                .into_iter()
                .filter_map(|(k, v)| v.map(|n| (k.to_string(), n)))
                .collect();
                if !counts.is_empty() {
                    return Ok(Self {
                        sections: PublicationSections::default(),
                        legacy_counts: counts,
                    });
                }
            }
        }

        Ok(Self {
            sections: incoming.sections.unwrap_or(flat),
            legacy_counts: incoming.legacy_counts.unwrap_or_default(),
        })
    }

    /// Normalize every entry and collect validation errors as
    /// `section[n]: message`, sorted and joined with `"; "`.
    pub fn sanitize(&mut self) -> JourneyResult<()> {
        let mut errors = Vec::new();
        let sections = std::mem::take(&mut self.sections);
        self.sections = PublicationSections {
            wos_scopus: sanitize_section(sections.wos_scopus, SECTION_WOS_SCOPUS, false, &mut errors),
            kokson: sanitize_section(sections.kokson, SECTION_KOKSON, false, &mut errors),
            conferences: sanitize_section(sections.conferences, SECTION_CONFERENCES, false, &mut errors),
            ip: sanitize_section(sections.ip, SECTION_IP, true, &mut errors),
        };

        if errors.is_empty() {
            Ok(())
        } else {
            errors.sort();
            Err(invalid(errors.join("; ")))
        }
    }

    /// Per-section counts, with legacy totals filling in sections that have
    /// no entries.
    pub fn summary(&self) -> BTreeMap<String, i64> {
        let mut summary = self.sections.summary();
        for (key, value) in &self.legacy_counts {
            if *value > 0 && summary.get(key).copied().unwrap_or(0) == 0 {
                summary.insert(key.clone(), *value);
            }
        }
        summary
    }

    /// Client-visible projection of a stored form.
    pub fn client_view(&self) -> serde_json::Value {
        let mut view = serde_json::json!({
            SECTION_WOS_SCOPUS: self.sections.wos_scopus,
            SECTION_KOKSON: self.sections.kokson,
            SECTION_CONFERENCES: self.sections.conferences,
            SECTION_IP: self.sections.ip,
            "summary": self.summary(),
        });
        if !self.legacy_counts.is_empty() {
            view["legacy_counts"] = serde_json::json!(self.legacy_counts);
        }
        view
    }
}

fn sanitize_section(
    entries: Vec<PublicationEntry>,
    section: &str,
    require_ip_type: bool,
    errors: &mut Vec<String>,
) -> Vec<PublicationEntry> {
    entries
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| {
            let entry = entry.normalized();
            if let Err(msg) = entry.validate(require_ip_type) {
                errors.push(format!("{}[{}]: {}", section, idx + 1, msg));
            }
            entry
        })
        .collect()
}

/// Parse, normalize and validate a submitted payload, returning the bytes to store.
pub fn normalize_payload(raw: &[u8]) -> JourneyResult<Vec<u8>> {
    let mut form = PublicationsForm::parse(raw)?;
    form.sanitize()?;
    serde_json::to_vec(&form).map_err(|e| invalid(format!("publications form: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bytes(v: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&v).unwrap()
    }

    #[test]
    fn test_parses_sections_shape() {
        let form = PublicationsForm::parse(&bytes(json!({
            "sections": {"wos_scopus": [{"title": "A"}], "ip": [{"title": "P", "ip_type": "patent"}]}
        })))
        .unwrap();
        assert_eq!(form.sections.wos_scopus.len(), 1);
        assert_eq!(form.sections.ip[0].ip_type, "patent");
        assert!(form.sections.kokson.is_empty());
    }

    #[test]
    fn test_parses_flat_shape() {
        let form = PublicationsForm::parse(&bytes(json!({
            "kokson": [{"title": "K1"}, {"title": "K2"}],
            "legacy_counts": {"ip": 3}
        })))
        .unwrap();
        assert_eq!(form.sections.kokson.len(), 2);
        assert_eq!(form.legacy_counts.get("ip"), Some(&3));
    }

    #[test]
    fn test_parses_legacy_count_fields() {
        let form = PublicationsForm::parse(&bytes(json!({
            "count_wos_scopus": 2, "count_ip": 0
        })))
        .unwrap();
        assert!(form.sections.is_empty());
        assert_eq!(form.legacy_counts.get("wos_scopus"), Some(&2));
        assert_eq!(form.legacy_counts.get("ip"), Some(&0));
        assert!(form.legacy_counts.get("kokson").is_none());
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(PublicationsForm::parse(b"[1,2]").is_err());
        assert!(PublicationsForm::parse(b"not json").is_err());
    }

    #[test]
    fn test_summary_merges_legacy_only_where_empty() {
        let form = PublicationsForm::parse(&bytes(json!({
            "wos_scopus": [{"title": "A"}],
            "legacy_counts": {"wos_scopus": 5, "kokson": 4, "ip": 0}
        })))
        .unwrap();
        let summary = form.summary();
        assert_eq!(summary["wos_scopus"], 1);
        assert_eq!(summary["kokson"], 4);
        assert_eq!(summary["conferences"], 0);
        assert_eq!(summary["ip"], 0);
    }

    #[test]
    fn test_client_view_shape() {
        let form = PublicationsForm::parse(&bytes(json!({"count_kokson": 2}))).unwrap();
        let view = form.client_view();
        assert_eq!(view["summary"]["kokson"], 2);
        assert_eq!(view["legacy_counts"]["kokson"], 2);
        assert!(view["wos_scopus"].as_array().unwrap().is_empty());

        let plain = PublicationsForm::parse(&bytes(json!({"ip": []}))).unwrap().client_view();
        assert!(plain.get("legacy_counts").is_none());
    }

    #[test]
    fn test_normalize_trims_and_drops_blank_coauthors() {
        let out = normalize_payload(&bytes(json!({
            "wos_scopus": [{
                "title": "  Deep learning  ",
                "year": " 2021/2022 ",
                "doi": "10.1000/xyz123",
                "issn_print": "1234-567X",
                "coauthors": [" A. Author ", "  ", ""]
            }]
        })))
        .unwrap();
        let stored: PublicationsForm = serde_json::from_slice(&out).unwrap();
        let entry = &stored.sections.wos_scopus[0];
        assert_eq!(entry.title, "Deep learning");
        assert_eq!(entry.year, "2021/2022");
        assert_eq!(entry.coauthors, vec!["A. Author"]);
    }

    #[test]
    fn test_validation_errors_are_sorted_and_indexed() {
        let err = normalize_payload(&bytes(json!({
            "wos_scopus": [{"title": "ok"}, {"title": "  "}],
            "ip": [{"title": "Patent"}],
            "conferences": [{"title": "C", "year": "1700", "doi": "11.1/x"}]
        })))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid payload: conferences[1]: year must be in format YYYY or YYYY/YYYY; \
             ip[1]: type is required for intellectual property entries; \
             wos_scopus[2]: title is required"
        );
    }

    #[test]
    fn test_identifier_patterns() {
        let entry = |doi: &str, issn: &str| PublicationEntry {
            title: "T".to_string(),
            doi: doi.to_string(),
            issn_online: issn.to_string(),
            ..PublicationEntry::default()
        };
        assert!(entry("10.1038/nphys1170", "2049-3630").validate(false).is_ok());
        assert_eq!(entry("doi:10.1/x", "").validate(false), Err("invalid DOI"));
        assert_eq!(entry("", "12345678").validate(false), Err("invalid ISSN online"));
        let long = PublicationEntry {
            title: "я".repeat(1001),
            ..PublicationEntry::default()
        };
        assert_eq!(long.validate(false), Err("title exceeds 1000 characters"));
    }
}
