//! PS-002: Stack file parsing, validation and compilation.
//!
//! Parses stack.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - depends_on and template references must name declared resources
//! - Required properties per resource kind
//! - Placement: subnets and security groups sit in a network, instances in a security group
//!
//! A valid stack compiles into a [`Blueprint`]: the resource graph, the
//! pipeline and the output bindings. All of this happens before any
//! provisioning call.

use super::error::{Error, Result};
use super::graph::ResourceGraph;
use super::outputs::OutputBinding;
use super::pipeline::{build_pipeline, Pipeline};
use super::resolver::{resolve_params, value_references, TemplateRef};
use super::types::{ResourceKind, ResourceNode, StackConfig};
use std::path::Path;
use tracing::debug;

/// Everything derived from a stack file before provisioning.
#[derive(Debug)]
pub struct Blueprint {
    pub graph: ResourceGraph,
    pub pipeline: Option<Pipeline>,
    pub outputs: Vec<OutputBinding>,
}

/// Parse a stack.yaml file from disk.
pub fn parse_stack_file(path: &Path) -> Result<StackConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Parse(format!("failed to read {}: {}", path.display(), e)))?;
    parse_stack(&content)
}

/// Parse a stack.yaml from a string.
pub fn parse_stack(yaml: &str) -> Result<StackConfig> {
    serde_yaml_ng::from_str(yaml).map_err(|e| Error::Parse(format!("YAML parse error: {}", e)))
}

/// Parse and validate in one step.
pub fn load_stack(path: &Path) -> Result<StackConfig> {
    let config = parse_stack_file(path)?;
    let errors = validate_stack(&config);
    if !errors.is_empty() {
        return Err(Error::Config(errors));
    }
    Ok(config)
}

/// Property each kind must declare.
fn required_property(kind: ResourceKind) -> Option<&'static str> {
    match kind {
        ResourceKind::Network => Some("cidr"),
        ResourceKind::KeyPair => Some("key_name"),
        ResourceKind::ComputeInstance => Some("instance_type"),
        ResourceKind::SourceRepo | ResourceKind::ImageRegistry => Some("repository_name"),
        ResourceKind::Subnet | ResourceKind::SecurityGroup => None,
    }
}

/// Kind a resource must depend on, if any.
fn required_parent(kind: ResourceKind) -> Option<ResourceKind> {
    match kind {
        ResourceKind::Subnet | ResourceKind::SecurityGroup => Some(ResourceKind::Network),
        ResourceKind::ComputeInstance => Some(ResourceKind::SecurityGroup),
        _ => None,
    }
}

/// Validate a parsed stack. Returns a list of messages (empty = valid).
pub fn validate_stack(config: &StackConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!("version must be \"1.0\", got \"{}\"", config.version));
    }
    if config.name.is_empty() {
        errors.push("name must not be empty".to_string());
    }

    for (id, resource) in &config.resources {
        for dep in &resource.depends_on {
            if dep == id {
                errors.push(format!("resource '{}' depends on itself", id));
            } else if !config.resources.contains_key(dep) {
                errors.push(format!("resource '{}' depends on unknown resource '{}'", id, dep));
            }
        }

        if let Some(key) = required_property(resource.kind) {
            if !resource.properties.contains_key(key) {
                errors.push(format!("resource '{}' ({}) has no {}", id, resource.kind, key));
            }
        }

        if let Some(parent) = required_parent(resource.kind) {
            let placed = resource
                .depends_on
                .iter()
                .filter_map(|dep| config.resources.get(dep))
                .any(|dep| dep.kind == parent);
            if !placed {
                errors.push(format!(
                    "resource '{}' ({}) must depend on a {}",
                    id, resource.kind, parent
                ));
            }
        }

        if !resource.rules.is_empty() && resource.kind != ResourceKind::SecurityGroup {
            errors.push(format!(
                "resource '{}' ({}) declares rules; only security groups accept rules",
                id, resource.kind
            ));
        }

        for (key, value) in &resource.properties {
            let context = format!("resource '{}' property '{}'", id, key);
            check_references(config, &context, value, &mut errors);
            if let Ok(refs) = value_references(value) {
                if refs.iter().any(|r| matches!(r, TemplateRef::Resource { .. })) {
                    errors.push(format!("{} may only reference params", context));
                }
            }
        }
    }

    if let Some(pipeline) = &config.pipeline {
        for stage in &pipeline.stages {
            for action in &stage.actions {
                for (key, value) in &action.parameters {
                    let context = format!("action '{}' parameter '{}'", action.name, key);
                    check_references(config, &context, value, &mut errors);
                }
            }
        }
    }

    for (name, output) in &config.outputs {
        if !config.resources.contains_key(&output.source) {
            errors.push(format!(
                "output '{}' references unknown resource '{}'",
                name, output.source
            ));
        }
    }

    errors
}

fn check_references(
    config: &StackConfig,
    context: &str,
    value: &serde_yaml_ng::Value,
    errors: &mut Vec<String>,
) {
    let refs = match value_references(value) {
        Ok(refs) => refs,
        Err(e) => {
            errors.push(format!("{}: {}", context, e));
            return;
        }
    };
    for reference in refs {
        match reference {
            TemplateRef::Param(key) if !config.params.contains_key(&key) => {
                errors.push(format!("{} references unknown param '{}'", context, key));
            }
            TemplateRef::Resource { id, .. } if !config.resources.contains_key(&id) => {
                errors.push(format!("{} references unknown resource '{}'", context, id));
            }
            _ => {}
        }
    }
}

/// Build the resource graph: nodes first, then edges, then rules.
pub fn build_graph(config: &StackConfig) -> Result<ResourceGraph> {
    let mut graph = ResourceGraph::new();
    for (id, decl) in &config.resources {
        let mut node = ResourceNode::new(id.clone(), decl.kind);
        for (key, value) in &decl.properties {
            node.properties.insert(key.clone(), resolve_params(value, &config.params)?);
        }
        graph.add_node(node)?;
    }
    for (id, decl) in &config.resources {
        for dep in &decl.depends_on {
            graph.add_dependency(id, dep)?;
        }
    }
    for (id, decl) in &config.resources {
        for rule in &decl.rules {
            graph.attach_rule(id, rule.clone())?;
        }
    }
    debug!(nodes = graph.len(), "resource graph built");
    Ok(graph)
}

/// Build the declared pipeline, if any.
pub fn build_stack_pipeline(config: &StackConfig) -> Result<Option<Pipeline>> {
    config
        .pipeline
        .as_ref()
        .map(|decl| build_pipeline(decl.name.clone(), decl.stages.clone()))
        .transpose()
}

/// Output bindings in declaration order.
pub fn output_bindings(config: &StackConfig) -> Result<Vec<OutputBinding>> {
    config
        .outputs
        .iter()
        .map(|(name, decl)| {
            if !config.resources.contains_key(&decl.source) {
                return Err(Error::UnknownNode(decl.source.clone()));
            }
            Ok(OutputBinding::new(name.clone(), decl.source.clone(), decl.attribute.clone()))
        })
        .collect()
}

/// Validate and compile a stack into graph, pipeline and outputs.
pub fn compile(config: &StackConfig) -> Result<Blueprint> {
    let errors = validate_stack(config);
    if !errors.is_empty() {
        return Err(Error::Config(errors));
    }
    let graph = build_graph(config)?;
    graph.validate()?;
    Ok(Blueprint {
        graph,
        pipeline: build_stack_pipeline(config)?,
        outputs: output_bindings(config)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLASK_STACK: &str = r#"
version: "1.0"
name: flask-stack
params:
  region: us-east-1
  key_name: my-key-pair
resources:
  vpc:
    kind: network
    properties:
      cidr: 10.0.0.0/16
      max_azs: 2
  public-subnet:
    kind: subnet
    depends_on: [vpc]
    properties:
      cidr_mask: 24
  key:
    kind: key_pair
    properties:
      key_name: my-key-pair
  sg:
    kind: security_group
    depends_on: [vpc]
    properties:
      group_name: my-security-group
    rules:
      - protocol: tcp
        port: 22
        description: Allow SSH access
      - protocol: tcp
        port: 5000
        description: Allow access to port 5000
  instance:
    kind: compute_instance
    depends_on: [sg, key, public-subnet]
    properties:
      instance_type: t2.micro
      key_name: "{{params.key_name}}"
  repo:
    kind: source_repo
    properties:
      repository_name: flask-repo
  registry:
    kind: image_registry
    properties:
      repository_name: flask-ecr-repo
pipeline:
  name: flask-pipeline
  stages:
    - name: Source
      order: 1
      actions:
        - name: RetrieveSource
          kind: source
          outputs: [source_output]
          parameters:
            repository: "{{resources.repo.cloneUrlHttp}}"
            branch: master
    - name: Build
      order: 2
      actions:
        - name: BuildAndPushDockerImage
          kind: build
          inputs: [source_output]
          outputs: [build_output]
          parameters:
            environment:
              ECR_REPOSITORY_URL: "{{resources.registry.repositoryUri}}"
            commands:
              - echo 'Starting build'
              - docker build -t $ECR_REPOSITORY_URL:latest .
            artifacts:
              files: [Dockerfile]
              base_directory: .
              discard_paths: "no"
outputs:
  instancePublicDnsName:
    source: instance
    attribute: publicDnsName
  flaskRepositoryUrl:
    source: repo
    attribute: cloneUrlHttp
    description: Flask repository URL
"#;

    #[test]
    fn test_ps002_parse_and_compile_flask() {
        let config = parse_stack(FLASK_STACK).unwrap();
        assert!(validate_stack(&config).is_empty(), "{:?}", validate_stack(&config));
        let blueprint = compile(&config).unwrap();
        assert_eq!(blueprint.graph.len(), 7);
        assert_eq!(blueprint.graph.node("sg").unwrap().rules.len(), 2);
        assert_eq!(
            blueprint.graph.node("instance").unwrap().property_str("key_name").as_deref(),
            Some("my-key-pair")
        );
        let pipeline = blueprint.pipeline.unwrap();
        assert_eq!(pipeline.stages().len(), 2);
        assert_eq!(blueprint.outputs.len(), 2);
        assert_eq!(blueprint.outputs[0].name, "instancePublicDnsName");
    }

    #[test]
    fn test_ps002_parse_invalid_yaml() {
        assert!(matches!(parse_stack("{{{{"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_ps002_bad_version_and_name() {
        let config = parse_stack("version: \"2.0\"\nname: \"\"\n").unwrap();
        let errors = validate_stack(&config);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("version"));
    }

    #[test]
    fn test_ps002_required_properties() {
        let yaml = r#"
version: "1.0"
name: s
resources:
  vpc:
    kind: network
  repo:
    kind: source_repo
"#;
        let errors = validate_stack(&parse_stack(yaml).unwrap());
        assert!(errors.iter().any(|e| e.contains("'vpc' (network) has no cidr")));
        assert!(errors.iter().any(|e| e.contains("'repo' (source_repo) has no repository_name")));
    }

    #[test]
    fn test_ps002_placement_rules() {
        let yaml = r#"
version: "1.0"
name: s
resources:
  sg:
    kind: security_group
  web:
    kind: compute_instance
    properties:
      instance_type: t2.micro
"#;
        let errors = validate_stack(&parse_stack(yaml).unwrap());
        assert!(errors.iter().any(|e| e.contains("'sg' (security_group) must depend on a network")));
        assert!(errors.iter().any(|e| e.contains("'web' (compute_instance) must depend on a security_group")));
    }

    #[test]
    fn test_ps002_unknown_dependency_and_self() {
        let yaml = r#"
version: "1.0"
name: s
resources:
  vpc:
    kind: network
    depends_on: [vpc, ghost]
    properties:
      cidr: 10.0.0.0/16
"#;
        let errors = validate_stack(&parse_stack(yaml).unwrap());
        assert!(errors.iter().any(|e| e.contains("depends on itself")));
        assert!(errors.iter().any(|e| e.contains("unknown resource 'ghost'")));
    }

    #[test]
    fn test_ps002_rules_on_non_group() {
        let yaml = r#"
version: "1.0"
name: s
resources:
  vpc:
    kind: network
    properties:
      cidr: 10.0.0.0/16
    rules:
      - protocol: tcp
        port: 22
"#;
        let errors = validate_stack(&parse_stack(yaml).unwrap());
        assert!(errors.iter().any(|e| e.contains("only security groups accept rules")));
    }

    #[test]
    fn test_ps002_template_reference_checks() {
        let yaml = FLASK_STACK
            .replace("{{resources.registry.repositoryUri}}", "{{resources.ghost.uri}}")
            .replace("{{params.key_name}}", "{{params.zone}}");
        let errors = validate_stack(&parse_stack(&yaml).unwrap());
        assert!(errors.iter().any(|e| e.contains("unknown resource 'ghost'")), "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("unknown param 'zone'")), "{errors:?}");
    }

    #[test]
    fn test_ps002_unknown_output_source() {
        let yaml = FLASK_STACK.replace("source: repo", "source: nowhere");
        let config = parse_stack(&yaml).unwrap();
        assert!(validate_stack(&config)
            .iter()
            .any(|e| e.contains("output 'flaskRepositoryUrl' references unknown resource 'nowhere'")));
        assert!(matches!(output_bindings(&config), Err(Error::UnknownNode(_))));
        assert!(matches!(compile(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_ps002_invalid_rule_rejected_by_graph() {
        let yaml = FLASK_STACK.replace("port: 5000", "port: 70000");
        let config = parse_stack(&yaml).unwrap();
        assert!(matches!(build_graph(&config), Err(Error::InvalidRule { .. })));
    }

    #[test]
    fn test_ps002_cycle_rejected() {
        let yaml = r#"
version: "1.0"
name: s
resources:
  a:
    kind: network
    depends_on: [b]
    properties:
      cidr: 10.0.0.0/16
  b:
    kind: network
    depends_on: [a]
    properties:
      cidr: 10.1.0.0/16
"#;
        let config = parse_stack(yaml).unwrap();
        assert!(matches!(compile(&config), Err(Error::Cycle(_))));
    }

    #[test]
    fn test_ps002_pipeline_errors_surface() {
        let yaml = FLASK_STACK.replace("inputs: [source_output]", "inputs: [missing]");
        let config = parse_stack(&yaml).unwrap();
        assert!(matches!(compile(&config), Err(Error::DanglingArtifact { .. })));
    }

    #[test]
    fn test_ps002_parse_stack_file_missing() {
        let err = parse_stack_file(Path::new("/nonexistent/stack.yaml")).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
