//! Namespaces owned by teams.

use crate::constants::TEAM_OWNER_LABEL;
use crate::store::ObjectKey;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub fn namespace_key(team: &str) -> ObjectKey {
    ObjectKey::of::<Namespace>(None, team)
}

/// Namespace named after `team`, labelled back to it
pub fn desired_namespace(team: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(team.to_string()),
            labels: Some(BTreeMap::from([(
                TEAM_OWNER_LABEL.to_string(),
                team.to_string(),
            )])),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

/// Owner label of `namespace` when it names a team other than `team`
pub fn foreign_owner<'a>(namespace: &'a Namespace, team: &str) -> Option<&'a str> {
    namespace
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(TEAM_OWNER_LABEL))
        .map(String::as_str)
        .filter(|owner| *owner != team)
}
