use serde::Deserialize;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use sha1::{Digest, Sha1};

use crate::context::TargetingContext;

/// Number of hash bits mapped onto the unit interval; every such integer is exactly
/// representable as an f64, so the resulting fraction is strictly below 1.
const BUCKET_BITS: u32 = 53;
const BUCKET_SCALE: f64 = (1u64 << BUCKET_BITS) as f64;

/// Returns where `identity` falls, as a fraction in [0, 1), in the rollout of `feature_name`.
///
/// The position is derived from a SHA-1 digest of `"{feature_name}\n{identity}"`, so it is the
/// same in every process and on every platform.
pub fn bucket(feature_name: &str, identity: &str) -> f64 {
    let mut hash = Sha1::new();
    hash.update(feature_name.as_bytes());
    hash.update(b"\n");
    hash.update(identity.as_bytes());
    let digest = hash.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let numhash = u64::from_be_bytes(prefix) >> (64 - BUCKET_BITS);

    numhash as f64 / BUCKET_SCALE
}

/// Returns true if `identity` falls within the first `rollout_percentage` percent of the
/// rollout of `feature_name`.
///
/// A percentage of 0 never targets anybody and 100 targets everybody.
pub fn is_targeted(identity: &str, feature_name: &str, rollout_percentage: f64) -> bool {
    bucket(feature_name, identity) < rollout_percentage / 100.0
}

/// Audience describes who a targeted feature is enabled for.
#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Audience {
    /// Users that are always targeted.
    #[serde(default)]
    pub users: Vec<String>,
    /// Groups with a per-group rollout.
    #[serde(default)]
    pub groups: Vec<GroupRollout>,
    /// Rollout applied to users that are neither listed nor targeted through a group.
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    pub default_rollout_percentage: f64,
}

/// GroupRollout includes a percentage of the members of a group in a rollout.
#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct GroupRollout {
    pub name: String,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    #[serde(default)]
    pub rollout_percentage: f64,
}

impl Audience {
    /// Checks that every rollout percentage lies within [0, 100].
    pub fn validate(&self) -> Result<(), String> {
        check_percentage("DefaultRolloutPercentage", self.default_rollout_percentage)?;
        for group in &self.groups {
            check_percentage(
                &format!("RolloutPercentage of group '{}'", group.name),
                group.rollout_percentage,
            )?;
        }
        Ok(())
    }

    /// Decides whether `context` is part of this audience for `feature_name`.
    ///
    /// Listed users win, then group rollouts in the order of the context's groups, then the
    /// default rollout. Without a user id only group rollouts can target the context.
    pub fn targets(&self, feature_name: &str, context: &TargetingContext, ignore_case: bool) -> bool {
        let matches = |a: &str, b: &str| {
            if ignore_case {
                a.eq_ignore_ascii_case(b)
            } else {
                a == b
            }
        };

        let user_id = context.user_id.as_deref().map(|id| {
            if ignore_case {
                id.to_ascii_lowercase()
            } else {
                id.to_string()
            }
        });

        if let Some(user_id) = &user_id {
            if self.users.iter().any(|u| matches(u, user_id)) {
                return true;
            }
        }

        let user_salt = user_id.as_deref().unwrap_or_default();
        for group in &context.groups {
            let rollout = self.groups.iter().find(|g| matches(&g.name, group));
            if let Some(rollout) = rollout {
                let identity = format!("{}\n{}", user_salt, rollout.name);
                if is_targeted(&identity, feature_name, rollout.rollout_percentage) {
                    return true;
                }
            }
        }

        match &user_id {
            Some(user_id) => is_targeted(user_id, feature_name, self.default_rollout_percentage),
            None => false,
        }
    }
}

fn check_percentage(what: &str, value: f64) -> Result<(), String> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{} must be between 0 and 100, got {}", what, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use spectral::prelude::*;
    use test_case::test_case;

    const FEATURE: &str = "TargetingTestFeature";

    fn audience() -> Audience {
        serde_json::from_str(
            r#"{
                "Users": ["Jeff", "Alicia"],
                "Groups": [
                    {"Name": "Ring0", "RolloutPercentage": 100},
                    {"Name": "Ring1", "RolloutPercentage": "50"},
                    {"Name": "Ring2", "RolloutPercentage": 0}
                ],
                "DefaultRolloutPercentage": 0
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn bucket_is_stable() {
        let first = bucket(FEATURE, "Anne");
        assert_that!(bucket(FEATURE, "Anne")).is_equal_to(first);
        assert_that!(first).is_greater_than_or_equal_to(0.0);
        assert_that!(first).is_less_than(1.0);
        assert_that!(bucket("OtherFeature", "Anne")).is_not_equal_to(first);
    }

    #[test]
    fn targeted_fraction_tracks_rollout_percentage() {
        const SAMPLE: usize = 20_000;
        for percentage in [10.0, 30.0, 50.0, 90.0] {
            let targeted = (0..SAMPLE)
                .filter(|i| is_targeted(&format!("user-{}", i), FEATURE, percentage))
                .count();
            let fraction = targeted as f64 / SAMPLE as f64;
            assert!(
                (fraction - percentage / 100.0).abs() < 0.02,
                "{}% rollout targeted {}",
                percentage,
                fraction
            );
        }
    }

    proptest! {
        #[test]
        fn targeting_is_deterministic(id in ".*", feature in "[A-Za-z]{1,12}", p in 0.0..=100.0f64) {
            prop_assert_eq!(is_targeted(&id, &feature, p), is_targeted(&id, &feature, p));
        }

        #[test]
        fn targeting_is_monotonic_in_percentage(id in ".*", p in 0.0..=100.0f64, q in 0.0..=100.0f64) {
            let (low, high) = if p <= q { (p, q) } else { (q, p) };
            if is_targeted(&id, FEATURE, low) {
                prop_assert!(is_targeted(&id, FEATURE, high));
            }
        }

        #[test]
        fn zero_and_hundred_are_absolute(id in ".*") {
            prop_assert!(!is_targeted(&id, FEATURE, 0.0));
            prop_assert!(is_targeted(&id, FEATURE, 100.0));
        }
    }

    #[test]
    fn listed_users_are_targeted_regardless_of_rollouts() {
        let context = TargetingContext::for_user("Jeff").with_group("Ring2");
        assert!(audience().targets(FEATURE, &context, false));
    }

    #[test]
    fn zero_percent_group_and_default_means_not_targeted() {
        let context = TargetingContext::for_user("Patty").with_group("Ring2");
        assert!(!audience().targets(FEATURE, &context, false));
    }

    #[test]
    fn full_group_rollout_targets_members() {
        let context = TargetingContext::for_user("Patty").with_group("Ring0");
        assert!(audience().targets(FEATURE, &context, false));
    }

    #[test]
    fn unmatched_user_falls_back_to_default_rollout() {
        let mut audience = audience();
        let context = TargetingContext::for_user("Patty").with_group("NotConfigured");
        assert!(!audience.targets(FEATURE, &context, false));

        audience.default_rollout_percentage = 100.0;
        assert!(audience.targets(FEATURE, &context, false));
    }

    #[test]
    fn group_rollout_differs_between_members() {
        let audience = audience();
        let outcomes: Vec<bool> = (0..200)
            .map(|i| {
                let context = TargetingContext::for_user(format!("user-{}", i)).with_group("Ring1");
                audience.targets(FEATURE, &context, false)
            })
            .collect();
        assert!(outcomes.iter().any(|t| *t));
        assert!(outcomes.iter().any(|t| !*t));
    }

    #[test]
    fn no_user_and_no_group_is_not_targeted() {
        let mut audience = audience();
        audience.default_rollout_percentage = 100.0;
        assert!(!audience.targets(FEATURE, &TargetingContext::default(), false));

        let anonymous_member = TargetingContext::default().with_group("Ring0");
        assert!(audience.targets(FEATURE, &anonymous_member, false));
    }

    #[test_case("jeff", false, false)]
    #[test_case("jeff", true, true)]
    #[test_case("Jeff", false, true)]
    fn user_matching_honors_ignore_case(user: &str, ignore_case: bool, expected: bool) {
        let context = TargetingContext::for_user(user);
        assert_that!(audience().targets(FEATURE, &context, ignore_case)).is_equal_to(expected);
    }

    #[test_case("ring0", false, false)]
    #[test_case("ring0", true, true)]
    #[test_case("Ring0", false, true)]
    fn group_matching_honors_ignore_case(group: &str, ignore_case: bool, expected: bool) {
        let context = TargetingContext::default().with_group(group);
        assert_that!(audience().targets(FEATURE, &context, ignore_case)).is_equal_to(expected);
    }

    #[test]
    fn validation_rejects_out_of_range_percentages() {
        assert_that!(audience().validate()).is_ok();

        let mut audience = audience();
        audience.groups[1].rollout_percentage = 101.0;
        assert_that!(audience.validate()).is_err();

        audience.groups[1].rollout_percentage = 50.0;
        audience.default_rollout_percentage = -1.0;
        assert_that!(audience.validate()).is_err();
    }
}
