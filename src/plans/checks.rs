//! Pre-update checks run before a k0s update plan is accepted.
//!
//! The cluster must not hold objects served only through APIs that the
//! target Kubernetes version no longer provides.

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::error::Error;

/// An API version removed in a given Kubernetes minor release.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemovedApi {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    /// First `(major, minor)` release without the API.
    pub removed_in: (u32, u32),
    /// Version still serving the same objects, if any.
    pub replacement: Option<&'static str>,
}

impl RemovedApi {
    fn resource(&self, version: &str) -> ApiResource {
        ApiResource::from_gvk_with_plural(
            &GroupVersionKind::gvk(self.group, version, self.kind),
            self.plural,
        )
    }

    pub fn group_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }

    /// Blocker message for `count` objects still on this API.
    pub fn describe(&self, count: usize) -> String {
        format!(
            "{}.{} {} has been removed in Kubernetes v{}.{}, but there are {} such resources in the cluster",
            self.plural, self.group, self.version, self.removed_in.0, self.removed_in.1, count
        )
    }
}

const fn removed(
    group: &'static str,
    version: &'static str,
    kind: &'static str,
    plural: &'static str,
    removed_in: (u32, u32),
    replacement: Option<&'static str>,
) -> RemovedApi {
    RemovedApi {
        group,
        version,
        kind,
        plural,
        removed_in,
        replacement,
    }
}

const FLOWCONTROL: &str = "flowcontrol.apiserver.k8s.io";

/// Removed APIs, oldest removal first.
pub const REMOVED_APIS: &[RemovedApi] = &[
    removed("batch", "v1beta1", "CronJob", "cronjobs", (1, 25), Some("v1")),
    removed("policy", "v1beta1", "PodDisruptionBudget", "poddisruptionbudgets", (1, 25), Some("v1")),
    removed("policy", "v1beta1", "PodSecurityPolicy", "podsecuritypolicies", (1, 25), None),
    removed("autoscaling", "v2beta2", "HorizontalPodAutoscaler", "horizontalpodautoscalers", (1, 26), Some("v2")),
    removed(FLOWCONTROL, "v1beta1", "FlowSchema", "flowschemas", (1, 26), Some("v1beta2")),
    removed(FLOWCONTROL, "v1beta1", "PriorityLevelConfiguration", "prioritylevelconfigurations", (1, 26), Some("v1beta2")),
    removed("storage.k8s.io", "v1beta1", "CSIStorageCapacity", "csistoragecapacities", (1, 27), Some("v1")),
    removed(FLOWCONTROL, "v1beta2", "FlowSchema", "flowschemas", (1, 29), Some("v1beta3")),
    removed(FLOWCONTROL, "v1beta2", "PriorityLevelConfiguration", "prioritylevelconfigurations", (1, 29), Some("v1beta3")),
    removed(FLOWCONTROL, "v1beta3", "FlowSchema", "flowschemas", (1, 32), Some("v1")),
    removed(FLOWCONTROL, "v1beta3", "PriorityLevelConfiguration", "prioritylevelconfigurations", (1, 32), Some("v1")),
];

/// Parse a k0s or Kubernetes version (`v1.31.2+k0s.0`, `1.31`) into major
/// and minor components.
pub fn parse_version(version: &str) -> Result<(u32, u32), Error> {
    let invalid = || Error::InvalidVersion(version.to_string());
    let mut parts = version.strip_prefix('v').unwrap_or(version).split('.');

    let major = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(invalid)?;
    let minor = parts
        .next()
        .map(|p| p.split(|c: char| !c.is_ascii_digit()).next().unwrap_or_default())
        .and_then(|p| p.parse().ok())
        .ok_or_else(invalid)?;

    Ok((major, minor))
}

/// APIs that no longer exist in `version`.
pub fn removed_by(version: &str) -> Result<Vec<&'static RemovedApi>, Error> {
    let target = parse_version(version)?;
    Ok(REMOVED_APIS
        .iter()
        .filter(|api| api.removed_in <= target)
        .collect())
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait UpdateCheck: Send + Sync {
    /// Reason the cluster cannot be updated to `version`, or `None`.
    async fn blocker(&self, version: &str) -> Result<Option<String>, Error>;
}

/// Looks up objects on removed APIs through the API server.
pub struct RemovedApiCheck {
    client: kube::Client,
}

impl RemovedApiCheck {
    pub const fn new(client: kube::Client) -> Self {
        Self { client }
    }

    async fn is_served(&self, api: &RemovedApi) -> Result<bool, Error> {
        match self
            .client
            .list_api_group_resources(&api.group_version())
            .await
        {
            Ok(list) => Ok(list.resources.iter().any(|r| r.name == api.plural)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Number of objects reachable only through the removed API.
    async fn outdated(&self, api: &RemovedApi) -> Result<usize, Error> {
        let removed: Api<DynamicObject> =
            Api::all_with(self.client.clone(), &api.resource(api.version));
        let items = removed.list_metadata(&ListParams::default()).await?.items;

        // The API server may serve the same objects under the removed and the
        // current version; only objects missing from the latter are at risk.
        let Some(current) = api.replacement else {
            return Ok(items.len());
        };
        let resource = api.resource(current);

        let mut outdated = 0;
        for item in &items {
            let Some(name) = item.metadata.name.as_deref() else {
                continue;
            };
            let current_api: Api<DynamicObject> = match item.metadata.namespace.as_deref() {
                Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
                None => Api::all_with(self.client.clone(), &resource),
            };
            if current_api.get_metadata_opt(name).await?.is_none() {
                outdated += 1;
            }
        }
        Ok(outdated)
    }
}

#[async_trait]
impl UpdateCheck for RemovedApiCheck {
    async fn blocker(&self, version: &str) -> Result<Option<String>, Error> {
        for api in removed_by(version)? {
            if !self.is_served(api).await? {
                debug!(api = %api.group_version(), kind = api.kind, "Removed API not served");
                continue;
            }
            let count = self.outdated(api).await?;
            if count > 0 {
                return Ok(Some(api.describe(count)));
            }
        }
        info!(version, "No objects on removed APIs");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("v1.31.2+k0s.0").unwrap(), (1, 31));
        assert_eq!(parse_version("1.29").unwrap(), (1, 29));
        assert_eq!(parse_version("v1.30-rc.1").unwrap(), (1, 30));
        assert!(matches!(parse_version("latest"), Err(Error::InvalidVersion(_))));
        assert!(parse_version("v1").is_err());
        assert!(parse_version("").is_err());
    }

    #[test]
    fn test_removed_by_filters_on_minor() {
        assert!(removed_by("v1.24.9+k0s.0").unwrap().is_empty());

        let in_125 = removed_by("v1.25.0+k0s.0").unwrap();
        assert_eq!(in_125.len(), 3);
        assert!(in_125.iter().all(|api| api.removed_in == (1, 25)));

        let in_131 = removed_by("v1.31.1+k0s.0").unwrap();
        assert!(in_131.iter().any(|api| api.group == FLOWCONTROL && api.version == "v1beta2"));
        assert!(!in_131.iter().any(|api| api.version == "v1beta3"));

        assert_eq!(removed_by("v1.32.0").unwrap().len(), REMOVED_APIS.len());
    }

    #[test]
    fn test_removed_apis_ordered_by_release() {
        assert!(REMOVED_APIS.windows(2).all(|w| w[0].removed_in <= w[1].removed_in));
    }

    #[test]
    fn test_describe() {
        let api = REMOVED_APIS
            .iter()
            .find(|api| api.kind == "FlowSchema" && api.version == "v1beta2")
            .unwrap();
        assert_eq!(api.group_version(), "flowcontrol.apiserver.k8s.io/v1beta2");
        assert_eq!(
            api.describe(2),
            "flowschemas.flowcontrol.apiserver.k8s.io v1beta2 has been removed in Kubernetes v1.29, but there are 2 such resources in the cluster"
        );
    }
}
