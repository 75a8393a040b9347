//! Per-deployment environment merging and override validation.
//!
//! Three configuration layers feed one deployment: the system's
//! `deploy-defaults`, the explicit per-deployment mapping, and caller
//! overrides of the form `DEPLOYMENT_ID.KEY=VALUE`. Later layers replace
//! earlier keys entirely; there is no deep merging.
//!
//! After merging, `type` and `location` are extracted and removed from the
//! map handed to extensions: they are deployment metadata, not environment
//! for extension logic. An `UPGRADE` key reflecting the invocation mode is
//! injected for extensions that behave differently on upgrade.

use std::collections::{HashMap, HashSet};

use crate::domain::cluster::DeploymentRequest;
use crate::domain::errors::DeployError;

/// Substring marking an environment key as secret. Case-sensitive:
/// `ROOT_PASSWORD` is redacted from persisted records, `password2` is not.
const SECRET_KEY_MARKER: &str = "PASSWORD";

/// Whether a key names a secret that must be kept out of persisted or
/// logged records. Secrets are still passed to extensions as regular
/// environment entries.
pub fn key_is_secret(key: &str) -> bool {
    key.contains(SECRET_KEY_MARKER)
}

/// Merge the three configuration layers for one deployment.
///
/// Precedence is overrides > explicit > defaults, per whole key. The
/// returned request carries the extracted `type`/`location` and the final
/// environment with `UPGRADE` injected.
pub fn merge_deployment_env(
    id: &str,
    defaults: &HashMap<String, String>,
    explicit: &HashMap<String, String>,
    overrides: &HashMap<String, String>,
    upgrade: bool,
) -> Result<DeploymentRequest, DeployError> {
    let mut env: HashMap<String, String> = HashMap::new();
    for layer in [defaults, explicit, overrides] {
        for (key, value) in layer {
            env.insert(key.clone(), value.clone());
        }
    }

    env.insert(
        "UPGRADE".to_string(),
        if upgrade { "yes" } else { "no" }.to_string(),
    );

    let extension_type = env.remove("type").ok_or_else(|| {
        DeployError::configuration(format!("\"type\" is undefined for system \"{id}\""))
    })?;
    let location = env.remove("location").ok_or_else(|| {
        DeployError::configuration(format!("\"location\" is undefined for system \"{id}\""))
    })?;

    Ok(DeploymentRequest {
        id: id.to_string(),
        extension_type,
        location,
        env,
    })
}

/// Select the override pairs scoped to one deployment id and strip the
/// `ID.` prefix, yielding the override layer for [`merge_deployment_env`].
///
/// Pairs that do not parse as `KEY=VALUE` after the prefix are ignored;
/// they belong to other deployments or were already rejected by
/// [`validate_overrides`].
pub fn overrides_for_deployment(
    id: &str,
    override_pairs: &[String],
) -> HashMap<String, String> {
    let prefix = format!("{id}.");
    override_pairs
        .iter()
        .filter_map(|pair| pair.strip_prefix(&prefix))
        .filter_map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

/// Validate caller override pairs against the known deployment and
/// subsystem ids.
///
/// Two rules, both from the original contract:
///
/// - an override key equal to a subsystem id is rejected outright;
///   subsystems deploy only through their parent
/// - an override that does not contain any known deployment or subsystem
///   id as a substring references a non-existent deployment
///
/// The substring containment (rather than exact `id.`-prefix matching) is
/// deliberate and preserved for compatibility, including its known
/// false-positive acceptance when an unrelated token happens to contain an
/// id.
pub fn validate_overrides(
    override_pairs: &[String],
    deployment_ids: &HashSet<String>,
    subsystem_ids: &HashSet<String>,
) -> Result<(), DeployError> {
    for pair in override_pairs {
        if subsystem_ids.contains(pair.as_str()) {
            return Err(DeployError::configuration(format!(
                "cannot directly deploy subsystems; create a top level \
                 deployment for the subsystem {pair} instead"
            )));
        }
        let references_known = deployment_ids.iter().any(|id| pair.contains(id.as_str()))
            || subsystem_ids.iter().any(|id| pair.contains(id.as_str()));
        if !references_known {
            return Err(DeployError::configuration(format!(
                "variable referenced a non-existent deployment name: {pair}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ids(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn later_layers_win_per_whole_key() {
        let defaults = map(&[("type", "tar"), ("HOSTNAME", "default"), ("A", "d")]);
        let explicit = map(&[("location", "/out/x.tar"), ("HOSTNAME", "explicit")]);
        let overrides = map(&[("HOSTNAME", "override")]);

        let request =
            merge_deployment_env("host1", &defaults, &explicit, &overrides, false).unwrap();

        assert_eq!(request.env.get("HOSTNAME").unwrap(), "override");
        assert_eq!(request.env.get("A").unwrap(), "d");
    }

    #[test]
    fn type_and_location_are_extracted() {
        let explicit = map(&[("type", "rawdisk"), ("location", "/out/img")]);
        let request =
            merge_deployment_env("host1", &HashMap::new(), &explicit, &HashMap::new(), false)
                .unwrap();

        assert_eq!(request.extension_type, "rawdisk");
        assert_eq!(request.location, "/out/img");
        assert!(!request.env.contains_key("type"));
        assert!(!request.env.contains_key("location"));
    }

    #[test]
    fn missing_type_or_location_is_a_configuration_error() {
        let only_type = map(&[("type", "tar")]);
        let err =
            merge_deployment_env("host1", &HashMap::new(), &only_type, &HashMap::new(), false)
                .unwrap_err();
        assert!(err.to_string().contains("\"location\" is undefined"));

        let only_location = map(&[("location", "/out")]);
        let err = merge_deployment_env(
            "host1",
            &HashMap::new(),
            &only_location,
            &HashMap::new(),
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("\"type\" is undefined"));
    }

    #[test]
    fn upgrade_flag_is_injected() {
        let explicit = map(&[("type", "tar"), ("location", "/out")]);
        let deploy =
            merge_deployment_env("x", &HashMap::new(), &explicit, &HashMap::new(), false)
                .unwrap();
        assert_eq!(deploy.env.get("UPGRADE").unwrap(), "no");

        let upgrade =
            merge_deployment_env("x", &HashMap::new(), &explicit, &HashMap::new(), true).unwrap();
        assert_eq!(upgrade.env.get("UPGRADE").unwrap(), "yes");
    }

    #[test]
    fn overrides_are_scoped_by_deployment_prefix() {
        let pairs = vec![
            "host1.HOSTNAME=alpha".to_string(),
            "host2.HOSTNAME=beta".to_string(),
            "host1.RAM_SIZE=2G".to_string(),
        ];
        let layer = overrides_for_deployment("host1", &pairs);
        assert_eq!(layer.get("HOSTNAME").unwrap(), "alpha");
        assert_eq!(layer.get("RAM_SIZE").unwrap(), "2G");
        assert!(!layer.contains_key("host2.HOSTNAME"));
        assert_eq!(layer.len(), 2);
    }

    #[test]
    fn override_containing_known_id_passes_validation() {
        let pairs = vec!["foo.HOSTNAME=bar".to_string()];
        assert!(validate_overrides(&pairs, &ids(&["foo", "baz"]), &ids(&[])).is_ok());
    }

    #[test]
    fn override_for_unknown_deployment_is_rejected() {
        let pairs = vec!["qux.HOSTNAME=bar".to_string()];
        let err = validate_overrides(&pairs, &ids(&["foo", "baz"]), &ids(&[])).unwrap_err();
        assert!(err.to_string().contains("non-existent deployment"));
    }

    #[test]
    fn direct_subsystem_target_is_always_rejected() {
        let pairs = vec!["sub1".to_string()];
        let err = validate_overrides(&pairs, &ids(&["foo"]), &ids(&["sub1"])).unwrap_err();
        assert!(err.to_string().contains("cannot directly deploy subsystems"));
    }

    #[test]
    fn override_referencing_subsystem_key_is_accepted() {
        // Mentioning a subsystem id inside a longer pair is allowed; only an
        // exact match is a direct-deploy attempt.
        let pairs = vec!["sub1.HOSTNAME=bar".to_string()];
        assert!(validate_overrides(&pairs, &ids(&["foo"]), &ids(&["sub1"])).is_ok());
    }

    #[test]
    fn secret_key_match_is_case_sensitive() {
        assert!(key_is_secret("ROOT_PASSWORD"));
        assert!(key_is_secret("PASSWORD2"));
        assert!(!key_is_secret("password2"));
        assert!(!key_is_secret("HOSTNAME"));
    }
}
