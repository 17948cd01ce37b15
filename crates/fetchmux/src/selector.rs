//! Format selection policy evaluation.
//!
//! A policy is an ordered list of quality rules such as
//! `best,best[height<=720],best[height<=480]`. Rules are tried in declared
//! order; the first rule matching at least one format fixes the candidate
//! pool. Selection is a pure function of its inputs: identical format sets
//! and policies always yield identical output.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DownloadError;
use crate::format::Format;

/// Default policy of the engine: best available, then progressively more
/// conservative height caps as fallbacks.
pub const DEFAULT_POLICY: &str = "best,best[height<=720],best[height<=480]";

/// One quality-match rule of a [`SelectionPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatRule {
    /// Upper bound on video height; `None` means unconstrained.
    pub max_height: Option<u32>,
}

impl FormatRule {
    fn matches(&self, format: &Format) -> bool {
        match self.max_height {
            // Audio-only formats carry no height and satisfy any cap.
            Some(max) => format.height.is_none_or(|h| h <= max),
            None => true,
        }
    }
}

/// Ordered list of format-match rules; first rule with a non-empty match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    rules: Vec<FormatRule>,
}

impl SelectionPolicy {
    pub fn new(rules: Vec<FormatRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[FormatRule] {
        &self.rules
    }
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        DEFAULT_POLICY
            .parse()
            .unwrap_or_else(|_| Self::new(vec![FormatRule { max_height: None }]))
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rule) in self.rules.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match rule.max_height {
                Some(max) => write!(f, "best[height<={max}]")?,
                None => f.write_str("best")?,
            }
        }
        Ok(())
    }
}

impl FromStr for SelectionPolicy {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut rules = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part == "best" {
                rules.push(FormatRule { max_height: None });
                continue;
            }
            let constraint = part
                .strip_prefix("best[height<=")
                .and_then(|rest| rest.strip_suffix(']'))
                .ok_or_else(|| {
                    DownloadError::invalid_policy(s, format!("unrecognized rule `{part}`"))
                })?;
            let max_height = constraint.parse::<u32>().map_err(|e| {
                DownloadError::invalid_policy(s, format!("bad height bound `{constraint}`: {e}"))
            })?;
            rules.push(FormatRule {
                max_height: Some(max_height),
            });
        }
        if rules.is_empty() {
            return Err(DownloadError::invalid_policy(s, "policy has no rules"));
        }
        Ok(Self { rules })
    }
}

/// Pick the format(s) to download: one muxed format, or one video-only plus
/// one audio-only stream to be remuxed later.
///
/// Tie-break is documented policy, not hidden behavior: video scores by
/// height, then total bitrate, then format id; audio scores by audio
/// bitrate, then total bitrate, then format id.
pub fn select(
    formats: &[Format],
    policy: &SelectionPolicy,
) -> Result<Vec<Format>, DownloadError> {
    let pool: Vec<&Format> = policy
        .rules()
        .iter()
        .map(|rule| formats.iter().filter(|f| rule.matches(f)).collect())
        .find(|pool: &Vec<&Format>| !pool.is_empty())
        .ok_or_else(|| DownloadError::no_matching_format(policy.to_string()))?;

    if let Some(best_muxed) = pool
        .iter()
        .filter(|f| f.is_muxed())
        .max_by(|a, b| video_score(a, b))
    {
        return Ok(vec![(*best_muxed).clone()]);
    }

    let best_video = pool
        .iter()
        .filter(|f| f.is_video_only())
        .max_by(|a, b| video_score(a, b));
    let best_audio = pool
        .iter()
        .filter(|f| f.is_audio_only())
        .max_by(|a, b| audio_score(a, b));

    let selection: Vec<Format> = [best_video, best_audio]
        .into_iter()
        .flatten()
        .map(|f| (*f).clone())
        .collect();

    if selection.is_empty() {
        return Err(DownloadError::no_matching_format(policy.to_string()));
    }
    Ok(selection)
}

fn video_score(a: &Format, b: &Format) -> Ordering {
    a.height
        .cmp(&b.height)
        .then(total_cmp_opt(a.tbr, b.tbr))
        .then(a.format_id.cmp(&b.format_id))
}

fn audio_score(a: &Format, b: &Format) -> Ordering {
    total_cmp_opt(a.abr, b.abr)
        .then(total_cmp_opt(a.tbr, b.tbr))
        .then(a.format_id.cmp(&b.format_id))
}

fn total_cmp_opt(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{audio_only, muxed, video_only};

    #[test]
    fn parses_default_policy() {
        let policy: SelectionPolicy = DEFAULT_POLICY.parse().unwrap();
        assert_eq!(policy.rules().len(), 3);
        assert_eq!(policy.rules()[0].max_height, None);
        assert_eq!(policy.rules()[1].max_height, Some(720));
        assert_eq!(policy.rules()[2].max_height, Some(480));
        assert_eq!(policy.to_string(), DEFAULT_POLICY);
    }

    #[test]
    fn rejects_malformed_policies() {
        assert!(matches!(
            "".parse::<SelectionPolicy>(),
            Err(DownloadError::InvalidPolicy { .. })
        ));
        assert!(matches!(
            "worst".parse::<SelectionPolicy>(),
            Err(DownloadError::InvalidPolicy { .. })
        ));
        assert!(matches!(
            "best[height<=abc]".parse::<SelectionPolicy>(),
            Err(DownloadError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn best_picks_separate_streams_when_no_muxed_exists() {
        let formats = vec![
            video_only("137", 1080, "mp4", "avc1.640028", 4400.0),
            audio_only("140", 129.0),
        ];
        let policy: SelectionPolicy = "best".parse().unwrap();
        let selection = select(&formats, &policy).unwrap();
        let ids: Vec<&str> = selection.iter().map(|f| f.format_id.as_str()).collect();
        assert_eq!(ids, ["137", "140"]);
        assert!(selection.iter().all(|f| f.is_remux_needed()));
    }

    #[test]
    fn muxed_format_wins_the_pool_alone() {
        let formats = vec![muxed("18", 360, "mp4")];
        let policy: SelectionPolicy = "best[height<=480]".parse().unwrap();
        let selection = select(&formats, &policy).unwrap();
        assert_eq!(selection.len(), 1);
        assert_eq!(selection[0].format_id, "18");
        assert!(!selection[0].is_remux_needed());
    }

    #[test]
    fn first_matching_rule_fixes_the_pool() {
        let formats = vec![
            video_only("248", 1080, "webm", "vp9", 2600.0),
            video_only("135", 480, "mp4", "avc1.4d401e", 1100.0),
            audio_only("140", 129.0),
        ];
        let policy: SelectionPolicy = "best[height<=720],best".parse().unwrap();
        let selection = select(&formats, &policy).unwrap();
        // height<=720 matches 135 and 140; the 1080p stream never enters the pool.
        let ids: Vec<&str> = selection.iter().map(|f| f.format_id.as_str()).collect();
        assert_eq!(ids, ["135", "140"]);
    }

    #[test]
    fn tie_break_is_height_then_bitrate_then_id() {
        let formats = vec![
            video_only("298", 720, "mp4", "avc1.4d4020", 3500.0),
            video_only("136", 720, "mp4", "avc1.4d401f", 1200.0),
            audio_only("140", 129.0),
        ];
        let policy: SelectionPolicy = "best".parse().unwrap();
        let selection = select(&formats, &policy).unwrap();
        assert_eq!(selection[0].format_id, "298");

        let same_bitrate = vec![
            video_only("a", 720, "mp4", "avc1.4d401f", 1200.0),
            video_only("b", 720, "mp4", "avc1.4d401f", 1200.0),
        ];
        let selection = select(&same_bitrate, &policy).unwrap();
        assert_eq!(selection[0].format_id, "b");
    }

    #[test]
    fn select_is_deterministic_and_idempotent() {
        let formats = vec![
            video_only("137", 1080, "mp4", "avc1.640028", 4400.0),
            video_only("136", 720, "mp4", "avc1.4d401f", 1200.0),
            audio_only("140", 129.0),
            audio_only("251", 140.0),
            muxed("18", 360, "mp4"),
        ];
        let policy = SelectionPolicy::default();
        let first = select(&formats, &policy).unwrap();
        for _ in 0..10 {
            assert_eq!(select(&formats, &policy).unwrap(), first);
        }
    }

    #[test]
    fn no_rule_matching_any_format_fails() {
        let formats = vec![video_only("137", 1080, "mp4", "avc1.640028", 4400.0)];
        let policy: SelectionPolicy = "best[height<=480]".parse().unwrap();
        assert!(matches!(
            select(&formats, &policy),
            Err(DownloadError::NoMatchingFormat { .. })
        ));
    }

    #[test]
    fn audio_only_pool_yields_single_audio_stream() {
        let formats = vec![audio_only("140", 129.0), audio_only("251", 140.0)];
        let policy: SelectionPolicy = "best".parse().unwrap();
        let selection = select(&formats, &policy).unwrap();
        assert_eq!(selection.len(), 1);
        assert_eq!(selection[0].format_id, "251");
    }
}
