//! PS-013: Deterministic simulated cloud backend.
//!
//! Derives identifiers the way a cloud provider would expose them, from a
//! BLAKE3 hash of the resource id, so repeated runs yield identical values.

use super::Provisioner;
use crate::core::stack::DependencyAttributes;
use crate::core::types::{Attributes, BackendConfig, ResourceKind, ResourceNode};

#[derive(Debug, Clone)]
pub struct SimulatedProvisioner {
    region: String,
    account_id: String,
}

impl Default for SimulatedProvisioner {
    fn default() -> Self {
        Self::new(&BackendConfig::default())
    }
}

impl SimulatedProvisioner {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            region: config.region.clone(),
            account_id: config.account_id.clone(),
        }
    }

    fn digest(&self, node: &ResourceNode) -> blake3::Hash {
        blake3::hash(format!("{}/{}/{}", self.account_id, node.kind, node.id).as_bytes())
    }

    /// Provider-style id: `<prefix>-0<16 hex>`.
    fn resource_id(&self, prefix: &str, node: &ResourceNode) -> String {
        let hex = self.digest(node).to_hex();
        format!("{}-0{}", prefix, &hex[..16])
    }

    fn public_ip(&self, node: &ResourceNode) -> [u8; 4] {
        let bytes = self.digest(node);
        let b = bytes.as_bytes();
        [54, b[0], b[1], b[2].max(1)]
    }
}

fn require(node: &ResourceNode, key: &str) -> Result<String, String> {
    node.property_str(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| format!("{} '{}' has no {}", node.kind, node.id, key))
}

/// Read `vpcId` from the first dependency that exposes one.
fn vpc_of(node: &ResourceNode, deps: &DependencyAttributes<'_>) -> Result<String, String> {
    deps.values()
        .find_map(|attrs| attrs.get("vpcId").cloned())
        .ok_or_else(|| format!("{} '{}' does not depend on a network", node.kind, node.id))
}

impl Provisioner for SimulatedProvisioner {
    fn provision(
        &mut self,
        node: &ResourceNode,
        deps: &DependencyAttributes<'_>,
    ) -> Result<Attributes, String> {
        let mut attrs = Attributes::new();
        let mut set = |k: &str, v: String| {
            attrs.insert(k.to_string(), v);
        };

        match node.kind {
            ResourceKind::Network => {
                set("vpcId", self.resource_id("vpc", node));
                set("cidrBlock", require(node, "cidr")?);
            }
            ResourceKind::Subnet => {
                set("subnetId", self.resource_id("subnet", node));
                set("vpcId", vpc_of(node, deps)?);
            }
            ResourceKind::SecurityGroup => {
                set("securityGroupId", self.resource_id("sg", node));
                set("vpcId", vpc_of(node, deps)?);
            }
            ResourceKind::KeyPair => {
                set("keyName", require(node, "key_name")?);
                set("keyPairId", self.resource_id("key", node));
            }
            ResourceKind::ComputeInstance => {
                require(node, "instance_type")?;
                let [a, b, c, d] = self.public_ip(node);
                set("instanceId", self.resource_id("i", node));
                set(
                    "publicDnsName",
                    format!("ec2-{}-{}-{}-{}.{}.compute.amazonaws.com", a, b, c, d, self.region),
                );
                set("publicIp", format!("{}.{}.{}.{}", a, b, c, d));
            }
            ResourceKind::SourceRepo => {
                let name = require(node, "repository_name")?;
                let host = format!("git-codecommit.{}.amazonaws.com", self.region);
                set("cloneUrlHttp", format!("https://{}/v1/repos/{}", host, name));
                set("cloneUrlSsh", format!("ssh://{}/v1/repos/{}", host, name));
                set(
                    "arn",
                    format!("arn:aws:codecommit:{}:{}:{}", self.region, self.account_id, name),
                );
                set("repositoryName", name);
            }
            ResourceKind::ImageRegistry => {
                let name = require(node, "repository_name")?;
                set(
                    "repositoryUri",
                    format!("{}.dkr.ecr.{}.amazonaws.com/{}", self.account_id, self.region, name),
                );
                set(
                    "arn",
                    format!("arn:aws:ecr:{}:{}:repository/{}", self.region, self.account_id, name),
                );
                set("repositoryName", name);
            }
        }

        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn provision(node: &ResourceNode, deps: &DependencyAttributes<'_>) -> Result<Attributes, String> {
        SimulatedProvisioner::default().provision(node, deps)
    }

    #[test]
    fn test_ps013_network_and_group() {
        let vpc = ResourceNode::new("vpc", ResourceKind::Network).with_property("cidr", "10.0.0.0/16");
        let vpc_attrs = provision(&vpc, &IndexMap::new()).unwrap();
        assert!(vpc_attrs["vpcId"].starts_with("vpc-0"));
        assert_eq!(vpc_attrs["cidrBlock"], "10.0.0.0/16");

        let sg = ResourceNode::new("sg", ResourceKind::SecurityGroup).depending_on(["vpc"]);
        let mut deps: DependencyAttributes<'_> = IndexMap::new();
        deps.insert("vpc", &vpc_attrs);
        let sg_attrs = provision(&sg, &deps).unwrap();
        assert!(sg_attrs["securityGroupId"].starts_with("sg-0"));
        assert_eq!(sg_attrs["vpcId"], vpc_attrs["vpcId"]);
    }

    #[test]
    fn test_ps013_group_without_network_fails() {
        let sg = ResourceNode::new("sg", ResourceKind::SecurityGroup);
        let err = provision(&sg, &IndexMap::new()).unwrap_err();
        assert!(err.contains("does not depend on a network"));
    }

    #[test]
    fn test_ps013_deterministic_ids() {
        let node = ResourceNode::new("web", ResourceKind::ComputeInstance).with_property("instance_type", "t2.micro");
        let a = provision(&node, &IndexMap::new()).unwrap();
        let b = provision(&node, &IndexMap::new()).unwrap();
        assert_eq!(a, b);
        assert!(a["instanceId"].starts_with("i-0"));
        assert!(a["publicDnsName"].starts_with("ec2-54-"));
        assert!(a["publicDnsName"].ends_with(".us-east-1.compute.amazonaws.com"));

        let other = ResourceNode::new("db", ResourceKind::ComputeInstance).with_property("instance_type", "t2.micro");
        assert_ne!(a["instanceId"], provision(&other, &IndexMap::new()).unwrap()["instanceId"]);
    }

    #[test]
    fn test_ps013_repositories() {
        let config = BackendConfig {
            region: "eu-west-1".to_string(),
            account_id: "123456789012".to_string(),
        };
        let mut backend = SimulatedProvisioner::new(&config);
        let repo = ResourceNode::new("repo", ResourceKind::SourceRepo).with_property("repository_name", "flask-repo");
        let attrs = backend.provision(&repo, &IndexMap::new()).unwrap();
        assert_eq!(
            attrs["cloneUrlHttp"],
            "https://git-codecommit.eu-west-1.amazonaws.com/v1/repos/flask-repo"
        );
        assert_eq!(attrs["arn"], "arn:aws:codecommit:eu-west-1:123456789012:flask-repo");

        let registry = ResourceNode::new("ecr", ResourceKind::ImageRegistry).with_property("repository_name", "flask-ecr-repo");
        let attrs = backend.provision(&registry, &IndexMap::new()).unwrap();
        assert_eq!(
            attrs["repositoryUri"],
            "123456789012.dkr.ecr.eu-west-1.amazonaws.com/flask-ecr-repo"
        );
    }

    #[test]
    fn test_ps013_missing_required_property() {
        let key = ResourceNode::new("key", ResourceKind::KeyPair);
        let err = provision(&key, &IndexMap::new()).unwrap_err();
        assert_eq!(err, "key_pair 'key' has no key_name");
    }
}
