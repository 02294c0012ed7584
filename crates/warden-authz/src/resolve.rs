//! Endpoint-level role resolution
//!
//! Policies are consulted layer by layer:
//!
//! 1. user policy on the endpoint
//! 2. user policy on the endpoint's group
//! 3. team policies on the endpoint (every team the user belongs to)
//! 4. team policies on the endpoint's group
//!
//! The first layer that yields a candidate wins, and among that layer's
//! candidates the role with the largest `priority` value is selected. Policies
//! pointing at roles that no longer exist are skipped.

use warden_common::model::{
    Endpoint, EndpointGroup, Role, RoleId, TeamAccessPolicies, TeamId, UserAccessPolicies, UserId,
};
use warden_common::Authorizations;

use crate::roles::{ROLE_STANDARD_USER, VOLUME_BROWSE_READ, VOLUME_BROWSE_WRITE};

/// Role ids granted to a user by a user policy map
pub(crate) fn user_candidates(policies: &UserAccessPolicies, user_id: UserId) -> Vec<RoleId> {
    policies.get(&user_id).map(|p| p.role_id).into_iter().collect()
}

/// Role ids granted to any of the teams by a team policy map
pub(crate) fn team_candidates(policies: &TeamAccessPolicies, team_ids: &[TeamId]) -> Vec<RoleId> {
    team_ids
        .iter()
        .filter_map(|team_id| policies.get(team_id).map(|p| p.role_id))
        .collect()
}

/// Pick the role with the largest priority among the candidates
///
/// Equal priorities keep the first candidate so the result does not depend on
/// the order of `roles`.
pub(crate) fn highest_priority(candidates: &[RoleId], roles: &[Role]) -> Option<Role> {
    let mut selected: Option<&Role> = None;
    for role_id in candidates {
        let Some(role) = roles.iter().find(|r| r.id == *role_id) else {
            continue;
        };
        match selected {
            Some(current) if current.priority >= role.priority => {}
            _ => selected = Some(role),
        }
    }
    selected.cloned()
}

/// Walk the layers in order and resolve the first one that yields a role
pub(crate) fn first_layer_match<I>(layers: I, roles: &[Role]) -> Option<Role>
where
    I: IntoIterator<Item = Vec<RoleId>>,
{
    layers
        .into_iter()
        .find_map(|candidates| highest_priority(&candidates, roles))
}

/// Resolve a user's role on an endpoint
///
/// `team_ids` are the teams the user is a member of. Returns `None` when no
/// layer grants the user anything, which means no access.
pub fn resolve_endpoint_role(
    user_id: UserId,
    team_ids: &[TeamId],
    endpoint: &Endpoint,
    group: &EndpointGroup,
    roles: &[Role],
) -> Option<Role> {
    first_layer_match(
        [
            user_candidates(&endpoint.user_access_policies, user_id),
            user_candidates(&group.user_access_policies, user_id),
            team_candidates(&endpoint.team_access_policies, team_ids),
            team_candidates(&group.team_access_policies, team_ids),
        ],
        roles,
    )
}

/// Resolve a team's role on an endpoint: endpoint policy first, then group
pub fn resolve_team_endpoint_role(
    team_id: TeamId,
    endpoint: &Endpoint,
    group: &EndpointGroup,
    roles: &[Role],
) -> Option<Role> {
    let team_ids = [team_id];
    first_layer_match(
        [
            team_candidates(&endpoint.team_access_policies, &team_ids),
            team_candidates(&group.team_access_policies, &team_ids),
        ],
        roles,
    )
}

/// Effective endpoint authorizations for a resolved role
///
/// Starts from the role's table and layers the environment's volume-browser
/// override on top. Browsing reads are granted to every role; browsing writes
/// only to standard users.
pub fn endpoint_authorizations(role: &Role, endpoint: &Endpoint) -> Authorizations {
    let mut authorizations = role.authorizations.clone();

    if endpoint
        .security_settings
        .allow_volume_browser_for_regular_users
    {
        for op in VOLUME_BROWSE_READ {
            authorizations.grant(*op);
        }
        if role.id == ROLE_STANDARD_USER {
            for op in VOLUME_BROWSE_WRITE {
                authorizations.grant(*op);
            }
        }
    }

    authorizations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::{predefined_roles, ROLE_ENDPOINT_ADMIN, ROLE_HELPDESK, ROLE_READONLY};
    use crate::testing::{endpoint, group};
    use warden_common::model::AccessPolicy;
    use warden_common::Authorization;

    #[test]
    fn test_group_policy_applies_when_endpoint_is_silent() {
        let roles = predefined_roles();
        let ep = endpoint(1, 1);
        let mut g = group(1);
        g.user_access_policies
            .insert(UserId(7), AccessPolicy::new(ROLE_STANDARD_USER));

        let role = resolve_endpoint_role(UserId(7), &[], &ep, &g, &roles).unwrap();
        assert_eq!(role.id, ROLE_STANDARD_USER);
    }

    #[test]
    fn test_direct_user_policy_beats_team_and_group() {
        let roles = predefined_roles();
        let mut ep = endpoint(1, 1);
        ep.user_access_policies
            .insert(UserId(7), AccessPolicy::new(ROLE_ENDPOINT_ADMIN));
        ep.team_access_policies
            .insert(TeamId(3), AccessPolicy::new(ROLE_READONLY));
        let mut g = group(1);
        g.user_access_policies
            .insert(UserId(7), AccessPolicy::new(ROLE_READONLY));

        let role = resolve_endpoint_role(UserId(7), &[TeamId(3)], &ep, &g, &roles).unwrap();
        assert_eq!(role.id, ROLE_ENDPOINT_ADMIN);
    }

    #[test]
    fn test_team_candidates_pick_largest_priority() {
        let roles = predefined_roles();
        let mut ep = endpoint(1, 1);
        ep.team_access_policies
            .insert(TeamId(1), AccessPolicy::new(RoleId(2)));
        ep.team_access_policies
            .insert(TeamId(2), AccessPolicy::new(RoleId(5)));

        let role =
            resolve_endpoint_role(UserId(7), &[TeamId(1), TeamId(2)], &ep, &group(1), &roles)
                .unwrap();
        assert_eq!(role.priority, 5);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let roles = predefined_roles();
        let mut ep = endpoint(1, 1);
        ep.team_access_policies
            .insert(TeamId(1), AccessPolicy::new(ROLE_HELPDESK));
        ep.team_access_policies
            .insert(TeamId(2), AccessPolicy::new(ROLE_STANDARD_USER));
        let g = group(1);
        let teams = [TeamId(2), TeamId(1)];

        let first = resolve_endpoint_role(UserId(7), &teams, &ep, &g, &roles);
        for _ in 0..10 {
            assert_eq!(resolve_endpoint_role(UserId(7), &teams, &ep, &g, &roles), first);
        }
    }

    #[test]
    fn test_no_policy_means_no_role() {
        let roles = predefined_roles();
        let role = resolve_endpoint_role(UserId(7), &[], &endpoint(1, 1), &group(1), &roles);
        assert!(role.is_none());
    }

    #[test]
    fn test_dangling_role_falls_through_to_next_layer() {
        let roles = predefined_roles();
        let mut ep = endpoint(1, 1);
        ep.user_access_policies
            .insert(UserId(7), AccessPolicy::new(RoleId(99)));
        let mut g = group(1);
        g.user_access_policies
            .insert(UserId(7), AccessPolicy::new(ROLE_READONLY));

        let role = resolve_endpoint_role(UserId(7), &[], &ep, &g, &roles).unwrap();
        assert_eq!(role.id, ROLE_READONLY);
    }

    #[test]
    fn test_team_endpoint_role_falls_back_to_group() {
        let roles = predefined_roles();
        let mut g = group(1);
        g.team_access_policies
            .insert(TeamId(4), AccessPolicy::new(ROLE_HELPDESK));

        let role = resolve_team_endpoint_role(TeamId(4), &endpoint(1, 1), &g, &roles).unwrap();
        assert_eq!(role.id, ROLE_HELPDESK);
        assert!(resolve_team_endpoint_role(TeamId(5), &endpoint(1, 1), &g, &roles).is_none());
    }

    #[test]
    fn test_volume_browser_override() {
        let roles = predefined_roles();
        let readonly = roles.iter().find(|r| r.id == ROLE_READONLY).unwrap();
        let standard = roles.iter().find(|r| r.id == ROLE_STANDARD_USER).unwrap();

        let mut ep = endpoint(1, 1);
        let plain = endpoint_authorizations(readonly, &ep);
        assert!(!plain.is_granted(Authorization::DockerAgentBrowseList));

        ep.security_settings.allow_volume_browser_for_regular_users = true;
        let readonly_auths = endpoint_authorizations(readonly, &ep);
        assert!(readonly_auths.is_granted(Authorization::DockerAgentBrowseGet));
        assert!(readonly_auths.is_granted(Authorization::DockerAgentBrowseList));
        assert!(!readonly_auths.is_granted(Authorization::DockerAgentBrowseDelete));

        let standard_auths = endpoint_authorizations(standard, &ep);
        assert!(standard_auths.is_granted(Authorization::DockerAgentBrowsePut));
        assert!(standard_auths.is_granted(Authorization::DockerAgentBrowseRename));

        // the override never leaks into the role itself
        assert!(!standard
            .authorizations
            .is_granted(Authorization::DockerAgentBrowsePut));
    }
}
