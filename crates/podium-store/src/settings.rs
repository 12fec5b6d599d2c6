//! Per-backend and per-frontend runtime settings.

use serde::{Deserialize, Serialize};

/// Capability labels. Stored lowercase; a tag list is a set, so ordering
/// and duplicates never matter for equality.
pub type Tags = Vec<String>;

/// Canonical form: lowercased, sorted, deduplicated.
pub fn normalize_tags(tags: &[String]) -> Tags {
    let mut out: Tags = tags.iter().map(|t| t.trim().to_lowercase()).collect();
    out.retain(|t| !t.is_empty());
    out.sort();
    out.dedup();
    out
}

/// Set equality by sort-and-compare.
pub fn tags_eq(a: &[String], b: &[String]) -> bool {
    normalize_tags(a) == normalize_tags(b)
}

/// True when every required label is present in `tags`.
pub fn tags_cover(tags: &[String], required: &[String]) -> bool {
    let have = normalize_tags(tags);
    normalize_tags(required)
        .iter()
        .all(|req| have.binary_search(req).is_ok())
}

/// Per-backend runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub tags: Tags,
}

/// Partial update for [`BackendSettings`]. `None` fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSettingsPatch {
    pub tags: Option<Tags>,
}

impl BackendSettings {
    /// Merge a partial update. Returns `true` when a field changed.
    pub fn merge(&mut self, patch: &BackendSettingsPatch) -> bool {
        let mut changed = false;
        if let Some(tags) = &patch.tags {
            if !tags_eq(&self.tags, tags) {
                self.tags = normalize_tags(tags);
                changed = true;
            }
        }
        changed
    }
}

/// Default presentation injected into `create` requests of a frontend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefaultPresentationSettings {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub force: bool,
}

/// Well-known per-frontend settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontendSettings {
    #[serde(default)]
    pub required_tags: Tags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_presentation: Option<DefaultPresentationSettings>,
}

/// Partial update for [`FrontendSettings`]. `None` fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrontendSettingsPatch {
    pub required_tags: Option<Tags>,
    pub default_presentation: Option<DefaultPresentationSettings>,
}

impl FrontendSettings {
    /// Merge a partial update. Returns `true` when a field changed.
    pub fn merge(&mut self, patch: &FrontendSettingsPatch) -> bool {
        let mut changed = false;
        if let Some(tags) = &patch.required_tags {
            if !tags_eq(&self.required_tags, tags) {
                self.required_tags = normalize_tags(tags);
                changed = true;
            }
        }
        if let Some(presentation) = &patch.default_presentation {
            if self.default_presentation.as_ref() != Some(presentation) {
                self.default_presentation = Some(presentation.clone());
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(labels: &[&str]) -> Tags {
        labels.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn tags_equality_ignores_order_and_duplicates() {
        assert!(tags_eq(&tags(&["eu", "paid"]), &tags(&["paid", "eu"])));
        assert!(tags_eq(&tags(&["eu", "eu"]), &tags(&["eu"])));
        assert!(!tags_eq(&tags(&["eu"]), &tags(&["paid"])));
    }

    #[test]
    fn tags_cover_is_subset_check() {
        assert!(tags_cover(&tags(&["eu", "paid"]), &tags(&["paid"])));
        assert!(tags_cover(&tags(&["eu"]), &tags(&[])));
        assert!(!tags_cover(&tags(&["eu"]), &tags(&["paid"])));
    }

    #[test]
    fn normalize_lowercases_and_sorts() {
        assert_eq!(
            normalize_tags(&tags(&["Paid", "EU", "eu", " "])),
            tags(&["eu", "paid"])
        );
    }

    #[test]
    fn backend_merge_skips_none() {
        let mut settings = BackendSettings {
            tags: tags(&["eu"]),
        };
        assert!(!settings.merge(&BackendSettingsPatch { tags: None }));
        assert_eq!(settings.tags, tags(&["eu"]));
    }

    #[test]
    fn backend_merge_reports_change() {
        let mut settings = BackendSettings {
            tags: tags(&["eu"]),
        };
        assert!(settings.merge(&BackendSettingsPatch {
            tags: Some(tags(&["eu", "paid"])),
        }));
        assert_eq!(settings.tags, tags(&["eu", "paid"]));

        // Same set in a different order is not a change.
        assert!(!settings.merge(&BackendSettingsPatch {
            tags: Some(tags(&["paid", "eu"])),
        }));
    }

    #[test]
    fn frontend_merge_updates_presentation() {
        let mut settings = FrontendSettings::default();
        let patch = FrontendSettingsPatch {
            required_tags: None,
            default_presentation: Some(DefaultPresentationSettings {
                url: "https://cdn/deck.pdf".into(),
                force: true,
            }),
        };

        assert!(settings.merge(&patch));
        assert!(!settings.merge(&patch));
        assert_eq!(
            settings.default_presentation.as_ref().map(|p| p.force),
            Some(true)
        );
    }
}
