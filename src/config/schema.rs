//! Resource kinds and their property schemas.
//!
//! Every declaration carries a type tag that selects one [`ResourceKind`].
//! The kind fixes which properties are accepted, which are required, which
//! force a replacement when they change, and which output attributes other
//! declarations may reference.
//!
//! Lookup kinds are never created: they describe a query for something that
//! already exists, declared under `lookups` instead of `resources`.

use serde::{Deserialize, Serialize};

/// Shape of a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// A string (templates are accepted).
    String,
    /// A whole number.
    Integer,
    /// A boolean.
    Boolean,
    /// A list of values.
    List,
    /// A map of values.
    Map,
    /// Any value.
    Any,
}

/// Schema entry for a single property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Property name.
    pub name: &'static str,
    /// Expected value shape.
    pub ty: FieldType,
    /// Whether the property must be present.
    pub required: bool,
    /// Whether a change to this property requires delete + create.
    pub replace_on_change: bool,
}

impl FieldSpec {
    const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
            replace_on_change: false,
        }
    }

    const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: false,
            replace_on_change: false,
        }
    }

    const fn forces_replace(mut self) -> Self {
        self.replace_on_change = true;
        self
    }
}

/// Property accepted by every kind.
pub const TAGS_FIELD: FieldSpec = FieldSpec::optional("tags", FieldType::Map);

/// The closed set of resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Virtual network.
    Network,
    /// Subnet inside a network.
    Subnet,
    /// Firewall rule set.
    SecurityGroup,
    /// Identity role.
    IamRole,
    /// Managed policy attached to a role.
    RolePolicyAttachment,
    /// Instance profile wrapping a role.
    InstanceProfile,
    /// Launch template for instances.
    LaunchConfiguration,
    /// Autoscaling group of instances.
    AutoscalingGroup,
    /// Container capacity provider.
    CapacityProvider,
    /// Container cluster.
    Cluster,
    /// Load balancer.
    LoadBalancer,
    /// Load balancer target group.
    TargetGroup,
    /// Load balancer listener.
    Listener,
    /// Container task definition.
    TaskDefinition,
    /// Container service.
    Service,
    /// Machine image, looked up by owner and name pattern.
    Image,
}

use FieldType::{Any, Boolean, Integer, List, Map, String as Str};

const NETWORK: &[FieldSpec] = &[
    FieldSpec::required("cidr_block", Str).forces_replace(),
    FieldSpec::optional("enable_dns_hostnames", Boolean),
];

const SUBNET: &[FieldSpec] = &[
    FieldSpec::required("network_id", Str).forces_replace(),
    FieldSpec::required("cidr_block", Str).forces_replace(),
    FieldSpec::optional("public", Boolean).forces_replace(),
    FieldSpec::optional("availability_zone", Str).forces_replace(),
];

const SECURITY_GROUP: &[FieldSpec] = &[
    FieldSpec::required("network_id", Str).forces_replace(),
    FieldSpec::optional("description", Str).forces_replace(),
    FieldSpec::optional("ingress", List),
    FieldSpec::optional("egress", List),
];

const IAM_ROLE: &[FieldSpec] = &[
    FieldSpec::required("assume_role_policy", Any),
    FieldSpec::optional("description", Str),
];

const ROLE_POLICY_ATTACHMENT: &[FieldSpec] = &[
    FieldSpec::required("role", Str).forces_replace(),
    FieldSpec::required("policy_arn", Str).forces_replace(),
];

const INSTANCE_PROFILE: &[FieldSpec] = &[FieldSpec::required("role", Str)];

const LAUNCH_CONFIGURATION: &[FieldSpec] = &[
    FieldSpec::required("image_id", Str).forces_replace(),
    FieldSpec::required("instance_type", Str).forces_replace(),
    FieldSpec::optional("iam_instance_profile", Str).forces_replace(),
    FieldSpec::optional("user_data", Str).forces_replace(),
    FieldSpec::optional("security_groups", List).forces_replace(),
];

const AUTOSCALING_GROUP: &[FieldSpec] = &[
    FieldSpec::required("launch_configuration", Str),
    FieldSpec::required("subnet_ids", List),
    FieldSpec::required("min_size", Integer),
    FieldSpec::required("max_size", Integer),
    FieldSpec::optional("desired_capacity", Integer),
    FieldSpec::optional("protect_from_scale_in", Boolean),
];

const CAPACITY_PROVIDER: &[FieldSpec] = &[
    FieldSpec::required("autoscaling_group_arn", Str).forces_replace(),
    FieldSpec::optional("managed_termination_protection", Str),
    FieldSpec::optional("managed_scaling", Map),
];

const CLUSTER: &[FieldSpec] = &[
    FieldSpec::required("name", Str).forces_replace(),
    FieldSpec::optional("capacity_providers", List),
];

const LOAD_BALANCER: &[FieldSpec] = &[
    FieldSpec::required("subnets", List),
    FieldSpec::optional("load_balancer_type", Str).forces_replace(),
    FieldSpec::optional("internal", Boolean).forces_replace(),
    FieldSpec::optional("security_groups", List),
];

const TARGET_GROUP: &[FieldSpec] = &[
    FieldSpec::required("port", Integer).forces_replace(),
    FieldSpec::required("protocol", Str).forces_replace(),
    FieldSpec::required("network_id", Str).forces_replace(),
    FieldSpec::optional("target_type", Str).forces_replace(),
];

const LISTENER: &[FieldSpec] = &[
    FieldSpec::required("load_balancer_arn", Str).forces_replace(),
    FieldSpec::required("port", Integer),
    FieldSpec::required("default_actions", List),
    FieldSpec::optional("protocol", Str),
];

const TASK_DEFINITION: &[FieldSpec] = &[
    FieldSpec::required("family", Str).forces_replace(),
    FieldSpec::required("container_definitions", Any).forces_replace(),
    FieldSpec::optional("cpu", Str).forces_replace(),
    FieldSpec::optional("memory", Str).forces_replace(),
    FieldSpec::optional("network_mode", Str).forces_replace(),
    FieldSpec::optional("requires_compatibilities", List).forces_replace(),
    FieldSpec::optional("execution_role_arn", Str).forces_replace(),
];

const SERVICE: &[FieldSpec] = &[
    FieldSpec::required("cluster", Str).forces_replace(),
    FieldSpec::required("task_definition", Str),
    FieldSpec::optional("launch_type", Str).forces_replace(),
    FieldSpec::optional("scheduling_strategy", Str).forces_replace(),
    FieldSpec::optional("desired_count", Integer),
    FieldSpec::optional("network_configuration", Map),
    FieldSpec::optional("load_balancers", List).forces_replace(),
];

const IMAGE: &[FieldSpec] = &[
    FieldSpec::required("owners", List),
    FieldSpec::required("name_pattern", Str),
    FieldSpec::optional("most_recent", Boolean),
    FieldSpec::optional("architecture", Str),
];

const OUTPUTS_BASIC: &[&str] = &["id", "arn"];
const OUTPUTS_NAMED: &[&str] = &["id", "arn", "name"];

impl ResourceKind {
    /// All kinds, in documentation order.
    pub const ALL: [Self; 16] = [
        Self::Network,
        Self::Subnet,
        Self::SecurityGroup,
        Self::IamRole,
        Self::RolePolicyAttachment,
        Self::InstanceProfile,
        Self::LaunchConfiguration,
        Self::AutoscalingGroup,
        Self::CapacityProvider,
        Self::Cluster,
        Self::LoadBalancer,
        Self::TargetGroup,
        Self::Listener,
        Self::TaskDefinition,
        Self::Service,
        Self::Image,
    ];

    /// Parses a type tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == tag)
    }

    /// Returns the type tag used in manifests.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::SecurityGroup => "security_group",
            Self::IamRole => "iam_role",
            Self::RolePolicyAttachment => "role_policy_attachment",
            Self::InstanceProfile => "instance_profile",
            Self::LaunchConfiguration => "launch_configuration",
            Self::AutoscalingGroup => "autoscaling_group",
            Self::CapacityProvider => "capacity_provider",
            Self::Cluster => "cluster",
            Self::LoadBalancer => "load_balancer",
            Self::TargetGroup => "target_group",
            Self::Listener => "listener",
            Self::TaskDefinition => "task_definition",
            Self::Service => "service",
            Self::Image => "image",
        }
    }

    /// Returns the property schema for this kind, excluding `tags`.
    #[must_use]
    pub const fn fields(self) -> &'static [FieldSpec] {
        match self {
            Self::Network => NETWORK,
            Self::Subnet => SUBNET,
            Self::SecurityGroup => SECURITY_GROUP,
            Self::IamRole => IAM_ROLE,
            Self::RolePolicyAttachment => ROLE_POLICY_ATTACHMENT,
            Self::InstanceProfile => INSTANCE_PROFILE,
            Self::LaunchConfiguration => LAUNCH_CONFIGURATION,
            Self::AutoscalingGroup => AUTOSCALING_GROUP,
            Self::CapacityProvider => CAPACITY_PROVIDER,
            Self::Cluster => CLUSTER,
            Self::LoadBalancer => LOAD_BALANCER,
            Self::TargetGroup => TARGET_GROUP,
            Self::Listener => LISTENER,
            Self::TaskDefinition => TASK_DEFINITION,
            Self::Service => SERVICE,
            Self::Image => IMAGE,
        }
    }

    /// Looks up a field, including the shared `tags` field.
    #[must_use]
    pub fn field(self, name: &str) -> Option<&'static FieldSpec> {
        if name == TAGS_FIELD.name {
            return Some(&TAGS_FIELD);
        }
        self.fields().iter().find(|f| f.name == name)
    }

    /// Returns the output attributes this kind exports.
    #[must_use]
    pub const fn outputs(self) -> &'static [&'static str] {
        match self {
            Self::Network => &["id", "arn", "cidr_block"],
            Self::Subnet | Self::RolePolicyAttachment | Self::Listener => OUTPUTS_BASIC,
            Self::LoadBalancer => &["id", "arn", "name", "dns_name"],
            Self::TaskDefinition => &["id", "arn", "family", "revision"],
            Self::SecurityGroup
            | Self::IamRole
            | Self::InstanceProfile
            | Self::LaunchConfiguration
            | Self::AutoscalingGroup
            | Self::CapacityProvider
            | Self::Cluster
            | Self::TargetGroup
            | Self::Service
            | Self::Image => OUTPUTS_NAMED,
        }
    }

    /// Returns true for kinds that are only ever looked up, never managed.
    #[must_use]
    pub const fn is_lookup(self) -> bool {
        matches!(self, Self::Image)
    }

    /// Returns true if this kind exports the given attribute.
    #[must_use]
    pub fn exports(self, attribute: &str) -> bool {
        self.outputs().contains(&attribute)
    }

    /// Returns true if a change to `property` forces replacement.
    #[must_use]
    pub fn replaces_on(self, property: &str) -> bool {
        self.field(property).is_some_and(|f| f.replace_on_change)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(ResourceKind::from_tag("bucket"), None);
    }

    #[test]
    fn test_every_kind_exports_id_and_arn() {
        for kind in ResourceKind::ALL {
            assert!(kind.exports("id"), "{kind} must export id");
            assert!(kind.exports("arn"), "{kind} must export arn");
        }
        assert!(ResourceKind::LoadBalancer.exports("dns_name"));
        assert!(!ResourceKind::Subnet.exports("name"));
    }

    #[test]
    fn test_tags_accepted_everywhere() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.field("tags"), Some(&TAGS_FIELD));
        }
    }

    #[test]
    fn test_replace_on_change() {
        assert!(ResourceKind::Network.replaces_on("cidr_block"));
        assert!(!ResourceKind::AutoscalingGroup.replaces_on("max_size"));
        assert!(!ResourceKind::Cluster.replaces_on("unknown"));
    }

    #[test]
    fn test_only_images_are_lookups() {
        let lookups: Vec<ResourceKind> = ResourceKind::ALL.into_iter().filter(|k| k.is_lookup()).collect();
        assert_eq!(lookups, vec![ResourceKind::Image]);
        assert!(ResourceKind::Image.exports("name"));
    }

    #[test]
    fn test_serde_tag_matches_as_str() {
        let json = serde_json::to_string(&ResourceKind::RolePolicyAttachment).unwrap();
        assert_eq!(json, "\"role_policy_attachment\"");
    }
}
