//! Profile dependency resolution and classification.
//!
//! Profiles reference each other through `source_profile`, which forms a
//! directed graph that users can (accidentally) make cyclic. Traversal keeps
//! an explicit list of visited names and never recurses.

use std::collections::BTreeMap;

use tracing::debug;

use super::Profile;
use crate::app::error::{ConsoleError, Result};

/// Suffix some MFA tooling uses to store the long-term keys backing a profile.
pub const SOURCE_PROFILE_SUFFIX: &str = "::source-profile";

/// Resolve `start_name` into the ordered list of profiles that must be
/// traversed to reach base credentials, root first.
///
/// The walk follows `source_profile` until it is absent, or until it reaches a
/// profile without `role_arn`; such a profile is a credentials root and the
/// chain stops there. Revisiting a name fails with
/// [`ConsoleError::ProfileCycle`].
pub fn resolve_chain(
    profiles: &BTreeMap<String, Profile>,
    start_name: &str,
) -> Result<Vec<String>> {
    let mut chain = vec![start_name.to_string()];
    let mut current = profiles.get(start_name);

    while let Some(source) = current.and_then(|profile| profile.source_profile.as_deref()) {
        if chain.iter().any(|visited| visited == source) {
            return Err(ConsoleError::ProfileCycle {
                chain,
                next: source.to_string(),
            });
        }
        chain.push(source.to_string());

        let next = profiles.get(source);
        if next.is_some_and(|profile| profile.role_arn.is_none()) {
            break;
        }
        current = next;
    }

    chain.reverse();
    Ok(chain)
}

/// True when every hop after the credentials root assumes a role.
///
/// The chain root is excluded because it only supplies base credentials. A
/// chain that cannot be resolved (cycle) is never multi-stage.
pub fn is_multi_stage_role_assuming_profile(
    profiles: &BTreeMap<String, Profile>,
    profile_name: &str,
) -> bool {
    let Ok(chain) = resolve_chain(profiles, profile_name) else {
        return false;
    };
    // The root only supplies credentials.
    let hops = chain.get(1..).unwrap_or_default();

    !hops.is_empty()
        && hops.iter().all(|name| {
            profiles
                .get(name)
                .is_some_and(|profile| profile.role_arn.is_some())
        })
}

/// Derived profile sets, each ordered by declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub usable: Vec<String>,
    pub cachable: Vec<String>,
    pub standard: Vec<String>,
}

fn is_usable(
    profiles: &BTreeMap<String, Profile>,
    name: &str,
    profile: &Profile,
    credential_profiles: &[String],
) -> bool {
    let credentials_name = profile.source_profile.as_deref().unwrap_or(name);
    let single_stage =
        profile.role_arn.is_some() && credential_profiles.iter().any(|p| p == credentials_name);

    single_stage
        || is_multi_stage_role_assuming_profile(profiles, name)
        || profile.sso_session.is_some()
}

fn is_cachable(name: &str, profile: &Profile, long_term_credential_profiles: &[String]) -> bool {
    if profile.mfa_serial.is_none() || profile.role_arn.is_some() {
        return false;
    }

    let short_term = profile.source_profile.as_deref().unwrap_or(name);
    let long_term = format!("{short_term}{SOURCE_PROFILE_SUFFIX}");
    long_term_credential_profiles
        .iter()
        .any(|p| *p == long_term || p == short_term)
}

/// Compute usable, cachable and standard profiles.
///
/// Each predicate looks at a single profile, so the result does not depend on
/// evaluation order and running it twice yields the same sets.
pub fn classify(
    profiles: &BTreeMap<String, Profile>,
    credential_profiles: &[String],
    long_term_credential_profiles: &[String],
) -> Classification {
    let mut ordered: Vec<(&String, &Profile)> = profiles.iter().collect();
    ordered.sort_by(|a, b| (a.1.order, a.0).cmp(&(b.1.order, b.0)));

    let mut classification = Classification::default();
    for (name, profile) in ordered {
        if is_usable(profiles, name, profile, credential_profiles) {
            classification.usable.push(name.clone());
            if profile.sso_session.is_none() {
                classification.standard.push(name.clone());
            }
        }
        if is_cachable(name, profile, long_term_credential_profiles) {
            classification.cachable.push(name.clone());
        }
    }

    debug!(
        "Classified {} profiles: {} usable, {} cachable, {} standard",
        profiles.len(),
        classification.usable.len(),
        classification.cachable.len(),
        classification.standard.len()
    );
    classification
}
