//! Identity verification seam. The matcher itself is an external
//! collaborator; this module only runs the first-match-wins loop.

use crate::models::BiometricRecord;

/// Opaque template comparison predicate supplied by the host.
pub trait TemplateMatcher {
    fn matches(&self, candidate: &[u8], enrolled: &[u8]) -> bool;
}

/// Scans enrolled records in order and returns the first match. Duplicate
/// enrollments for the same person are tolerated; the scan stops at the
/// first hit.
pub fn identify_person<'a>(
    matcher: &impl TemplateMatcher,
    candidate: &[u8],
    enrolled: &'a [BiometricRecord],
) -> Option<&'a BiometricRecord> {
    enrolled
        .iter()
        .filter(|record| !record.template.is_empty())
        .find(|record| matcher.matches(candidate, &record.template))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ExactMatcher;

    impl TemplateMatcher for ExactMatcher {
        fn matches(&self, candidate: &[u8], enrolled: &[u8]) -> bool {
            candidate == enrolled
        }
    }

    #[test]
    fn first_match_wins() {
        let a = BiometricRecord::new("p1", "Ana", 0, b"t1".to_vec());
        let b = BiometricRecord::new("p2", "Bia", 0, b"t2".to_vec());
        let dup = BiometricRecord::new("p3", "Caio", 0, b"t2".to_vec());
        let enrolled = vec![a, b, dup];

        let hit = identify_person(&ExactMatcher, b"t2", &enrolled);
        assert_eq!(hit.map(|r| r.person_id.as_str()), Some("p2"));
    }

    #[test]
    fn no_match_returns_none() {
        let enrolled = vec![BiometricRecord::new("p1", "Ana", 0, b"t1".to_vec())];
        assert!(identify_person(&ExactMatcher, b"zz", &enrolled).is_none());
    }
}
