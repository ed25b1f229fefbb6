//! PS-001: Stack schema and domain types.
//!
//! Defines the YAML schema for stack files (resources, security rules,
//! pipeline, outputs, policy) together with the runtime types shared by the
//! graph, the orchestrator, the state lock and the provenance log.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Attribute values exposed by a provisioned resource.
pub type Attributes = IndexMap<String, String>;

// ============================================================================
// Top-level stack.yaml
// ============================================================================

/// Root configuration: the desired stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Stack name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Global parameters, referenced as `{{params.KEY}}`
    #[serde(default)]
    pub params: IndexMap<String, serde_yaml_ng::Value>,

    /// Provisioning backend settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Resource declarations (order-preserving)
    #[serde(default)]
    pub resources: IndexMap<String, ResourceDecl>,

    /// Delivery pipeline
    #[serde(default)]
    pub pipeline: Option<PipelineDecl>,

    /// Stack outputs, exported after provisioning
    #[serde(default)]
    pub outputs: IndexMap<String, OutputDecl>,

    #[serde(default)]
    pub policy: Policy,
}

/// Backend settings used to derive provider identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_account")]
    pub account_id: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            account_id: default_account(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_account() -> String {
    "000000000000".to_string()
}

/// Persistence and provenance policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Persist the state lock after apply
    #[serde(default = "default_true")]
    pub lock_file: bool,

    /// Append provenance events on every apply/run
    #[serde(default = "default_true")]
    pub tripwire: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            lock_file: true,
            tripwire: true,
        }
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Resources
// ============================================================================

/// A resource as written in the stack file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDecl {
    pub kind: ResourceKind,

    /// Resources that must be provisioned first
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub properties: IndexMap<String, serde_yaml_ng::Value>,

    /// Security rules (security groups only)
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
}

/// Kind of provisionable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Subnet,
    SecurityGroup,
    KeyPair,
    ComputeInstance,
    SourceRepo,
    ImageRegistry,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Subnet => write!(f, "subnet"),
            Self::SecurityGroup => write!(f, "security_group"),
            Self::KeyPair => write!(f, "key_pair"),
            Self::ComputeInstance => write!(f, "compute_instance"),
            Self::SourceRepo => write!(f, "source_repo"),
            Self::ImageRegistry => write!(f, "image_registry"),
        }
    }
}

/// A single provisionable unit in the resource graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceNode {
    pub id: String,
    pub kind: ResourceKind,
    pub properties: IndexMap<String, serde_yaml_ng::Value>,
    pub depends_on: BTreeSet<String>,
    pub rules: Vec<SecurityRule>,
}

impl ResourceNode {
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            properties: IndexMap::new(),
            depends_on: BTreeSet::new(),
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_yaml_ng::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn depending_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Property rendered as a string, if present.
    pub fn property_str(&self, key: &str) -> Option<String> {
        self.properties.get(key).map(value_to_string)
    }
}

/// Network protocol of a security rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    All,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
            Self::Icmp => write!(f, "icmp"),
            Self::All => write!(f, "all"),
        }
    }
}

/// Traffic direction of a security rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Ingress,
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::Egress => write!(f, "egress"),
        }
    }
}

/// A permit statement attached to a security group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityRule {
    pub protocol: Protocol,

    /// Port number; kept wider than u16 so out-of-range input is reported, not truncated
    #[serde(default)]
    pub port: u32,

    #[serde(default = "default_cidr")]
    pub source_cidr: String,

    #[serde(default)]
    pub direction: Direction,

    #[serde(default)]
    pub description: Option<String>,
}

fn default_cidr() -> String {
    "0.0.0.0/0".to_string()
}

impl SecurityRule {
    /// TCP ingress from anywhere.
    pub fn tcp_ingress(port: u32) -> Self {
        Self {
            protocol: Protocol::Tcp,
            port,
            source_cidr: default_cidr(),
            direction: Direction::Ingress,
            description: None,
        }
    }
}

impl fmt::Display for SecurityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} from {}",
            self.direction, self.protocol, self.port, self.source_cidr
        )
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Pipeline as written in the stack file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDecl {
    pub name: String,
    #[serde(default)]
    pub stages: Vec<Stage>,
}

/// An ordered phase of a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub name: String,
    pub order: u32,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl Stage {
    pub fn new(name: impl Into<String>, order: u32, actions: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            order,
            actions,
        }
    }

    /// Artifact ids produced by any action of this stage.
    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.actions
            .iter()
            .flat_map(|a| a.outputs.iter().map(String::as_str))
    }
}

/// Kind of work an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Source,
    Build,
    Deploy,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Build => write!(f, "build"),
            Self::Deploy => write!(f, "deploy"),
        }
    }
}

/// A single operation within a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub parameters: IndexMap<String, serde_yaml_ng::Value>,
}

impl Action {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn input(mut self, artifact: impl Into<String>) -> Self {
        self.inputs.push(artifact.into());
        self
    }

    #[must_use]
    pub fn output(mut self, artifact: impl Into<String>) -> Self {
        self.outputs.push(artifact.into());
        self
    }

    #[must_use]
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<serde_yaml_ng::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Opaque reference to the data behind an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub location: String,
    #[serde(default)]
    pub digest: Option<String>,
}

impl Payload {
    pub fn at(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            digest: None,
        }
    }
}

/// Data handed from one stage to the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub producer_stage: String,
    pub payload: Payload,
}

/// Execution status of a stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageStatus {
    /// Allowed transitions: pending → running → succeeded | failed.
    pub fn can_transition_to(self, next: StageStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Overall result of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ============================================================================
// Outputs
// ============================================================================

/// Output as written in the stack file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDecl {
    /// Resource id the value is read from
    pub source: String,
    pub attribute: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// State / Lock file
// ============================================================================

/// Provisioned state of a stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackLock {
    pub schema: String,
    pub stack: String,
    pub generated_at: String,
    pub generator: String,

    /// Per-resource state, in creation order
    pub resources: IndexMap<String, ResourceLock>,

    /// Exported stack outputs
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    pub kind: ResourceKind,
    pub status: ResourceStatus,
    #[serde(default)]
    pub applied_at: Option<String>,
    /// BLAKE3 hash of the desired state that was provisioned
    pub hash: String,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Provisioned,
    Failed,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioned => write!(f, "PROVISIONED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Action to take on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub resource_id: String,
    pub kind: ResourceKind,
    pub action: PlanAction,
    /// Dependency level (0 = no dependencies)
    pub level: usize,
    pub description: String,
}

/// Full provisioning plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub name: String,
    pub changes: Vec<PlannedChange>,
    pub execution_order: Vec<String>,
    pub to_create: u32,
    pub to_update: u32,
    pub unchanged: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ProvisionStarted {
        stack: String,
        run_id: String,
        pipestack_version: String,
    },
    ResourceProvisioned {
        stack: String,
        resource: String,
        kind: ResourceKind,
        hash: String,
    },
    ResourceUnchanged {
        stack: String,
        resource: String,
    },
    ResourceFailed {
        stack: String,
        resource: String,
        error: String,
    },
    OutputsExported {
        stack: String,
        outputs: Vec<String>,
    },
    StageStarted {
        pipeline: String,
        stage: String,
        order: u32,
    },
    StageSucceeded {
        pipeline: String,
        stage: String,
        artifacts: Vec<String>,
        duration_seconds: f64,
    },
    StageFailed {
        pipeline: String,
        stage: String,
        error: String,
        duration_seconds: f64,
    },
    PipelineCompleted {
        pipeline: String,
        run_id: String,
        status: PipelineStatus,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Value helper
// ============================================================================

/// Render a scalar YAML value as a plain string.
pub fn value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => serde_yaml_ng::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}
