//! Slug helpers and Normandy slug generation

use crate::models::Experiment;
use crate::{Error, Result};

/// Upper bound on generated Normandy slugs
pub const NORMANDY_SLUG_MAX_LEN: usize = 80;

/// Lower-case `value`, drop anything that is not alphanumeric, `-`, `_` or
/// whitespace, then join the remaining words with single hyphens.
pub fn slugify(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    cleaned
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Drop trailing `.0` components so `"55.0"` renders as `"55"`.
fn short_version(version: &str) -> &str {
    let mut v = version;
    while let Some(stripped) = v.strip_suffix(".0") {
        v = stripped;
    }
    v
}

/// Build the identifier used as the record id on the delivery side:
/// `bug-<bug id>-<type>-<name>-<channel>-<min>[-to-<max>]`.
///
/// The name is truncated so that the whole slug fits in
/// [`NORMANDY_SLUG_MAX_LEN`] characters.
pub fn generate_normandy_slug(experiment: &Experiment) -> Result<String> {
    let missing = |field: &str| {
        Error::InvalidInput(format!(
            "The {} must be set before a Normandy slug can be generated",
            field
        ))
    };

    let bugzilla_id = experiment.bugzilla_id.ok_or_else(|| missing("Bugzilla ID"))?;
    let channel = experiment
        .firefox_channel
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| missing("Firefox channel"))?;
    let min_version = experiment
        .firefox_min_version
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| missing("Firefox min version"))?;

    let version = match experiment.firefox_max_version.as_deref().filter(|v| !v.is_empty()) {
        Some(max) => format!("{}-to-{}", short_version(min_version), short_version(max)),
        None => short_version(min_version).to_string(),
    };

    let prefix = format!("bug-{}-{}-", bugzilla_id, experiment.experiment_type);
    let postfix = format!("-{}-{}", channel, version);
    let remaining = NORMANDY_SLUG_MAX_LEN.saturating_sub(prefix.len() + postfix.len());

    let truncated_name: String = experiment.name.chars().take(remaining).collect();
    let mut name_slug = slugify(&truncated_name);
    // slugify never grows ASCII input but may for some unicode case mappings
    while name_slug.len() > remaining {
        name_slug.pop();
    }
    let name_slug = name_slug.trim_end_matches('-');

    Ok(format!("{}{}{}", prefix, name_slug, postfix).to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExperimentType;
    use crate::status::ExperimentStatus;
    use chrono::Utc;

    fn experiment(name: &str) -> Experiment {
        Experiment {
            id: 1,
            slug: "test".to_string(),
            name: name.to_string(),
            experiment_type: ExperimentType::Rapid,
            status: ExperimentStatus::Review,
            owner_email: "owner@example.com".to_string(),
            public_description: None,
            firefox_channel: Some("Release".to_string()),
            firefox_min_version: Some("55.0".to_string()),
            firefox_max_version: None,
            proposed_start_date: None,
            proposed_duration: None,
            proposed_enrollment: None,
            pref_name: None,
            pref_type: None,
            pref_branch: None,
            normandy_slug: None,
            normandy_id: None,
            bugzilla_id: Some(12345),
            data_science_bugzilla_url: None,
            feature_bugzilla_url: None,
            risk_internal_only: false,
            created_at: Utc::now(),
            variants: Vec::new(),
        }
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  a -- b  "), "a-b");
        assert_eq!(slugify("snake_case ok"), "snake_case-ok");
    }

    #[test]
    fn test_generate_normandy_slug() {
        let slug = generate_normandy_slug(&experiment("test")).unwrap();
        assert_eq!(slug, "bug-12345-rapid-test-release-55");
    }

    #[test]
    fn test_generate_normandy_slug_with_max_version() {
        let mut exp = experiment("Pref Flip Study");
        exp.experiment_type = ExperimentType::Pref;
        exp.firefox_max_version = Some("57.0".to_string());
        let slug = generate_normandy_slug(&exp).unwrap();
        assert_eq!(slug, "bug-12345-pref-pref-flip-study-release-55-to-57");
    }

    #[test]
    fn test_generate_normandy_slug_truncates_long_names() {
        let exp = experiment(&"very long name ".repeat(20));
        let slug = generate_normandy_slug(&exp).unwrap();
        assert!(slug.len() <= NORMANDY_SLUG_MAX_LEN, "slug too long: {}", slug);
        assert!(slug.starts_with("bug-12345-rapid-very-long-name"));
        assert!(slug.ends_with("-release-55"));
        assert!(!slug.contains("--"));
    }

    #[test]
    fn test_generate_normandy_slug_requires_bug() {
        let mut exp = experiment("test");
        exp.bugzilla_id = None;
        assert!(matches!(
            generate_normandy_slug(&exp),
            Err(Error::InvalidInput(_))
        ));
    }
}
