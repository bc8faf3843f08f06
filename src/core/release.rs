//! Canonical release selection among a recording's candidate releases

use std::cmp::Ordering;

use crate::models::Release;

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Exact or prefix match in either direction, ignoring case
fn album_matches(release_title: &str, expected_album: &str) -> bool {
    let release = normalize(release_title);
    let expected = normalize(expected_album);
    if release.is_empty() || expected.is_empty() {
        return false;
    }
    release == expected || release.starts_with(&expected) || expected.starts_with(&release)
}

/// Releases named after the track itself are usually singles
fn title_differs(release: &Release, track_title: &str) -> bool {
    normalize(&release.title) != normalize(track_title)
}

/// Oldest first; undated releases after dated ones, then by title and id
fn compare_releases(a: &Release, b: &Release) -> Ordering {
    match (a.parsed_date(), b.parsed_date()) {
        (Some(da), Some(db)) => da.cmp(&db),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.title.cmp(&b.title))
    .then_with(|| a.id.cmp(&b.id))
}

/// Pick the release that best represents where a recording "comes from".
///
/// Tie-break order, first match wins:
/// 1. official album whose title matches the expected album
/// 2. official album from a preferred country, not named after the track
/// 3. official album not named after the track
/// 4. any official release not named after the track
/// 5. any release not named after the track
/// 6. the oldest release overall
pub fn select_best_release<'a>(
    releases: &'a [Release],
    expected_album: &str,
    track_title: &str,
    preferred_countries: &[String],
) -> Option<&'a Release> {
    let mut sorted: Vec<&Release> = releases.iter().collect();
    sorted.sort_by(|a, b| compare_releases(a, b));

    let in_preferred_country = |r: &Release| {
        r.country.as_deref().is_some_and(|c| {
            preferred_countries
                .iter()
                .any(|p| p.eq_ignore_ascii_case(c))
        })
    };

    let candidates = || sorted.iter().copied();

    candidates()
        .find(|r| r.is_official_album() && album_matches(&r.title, expected_album))
        .or_else(|| {
            candidates().find(|r| {
                r.is_official_album() && in_preferred_country(*r) && title_differs(r, track_title)
            })
        })
        .or_else(|| candidates().find(|r| r.is_official_album() && title_differs(r, track_title)))
        .or_else(|| candidates().find(|r| r.is_official() && title_differs(r, track_title)))
        .or_else(|| candidates().find(|r| title_differs(r, track_title)))
        .or_else(|| sorted.first().copied())
}
