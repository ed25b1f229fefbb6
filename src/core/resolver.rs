//! PS-008: Template resolution for action parameters.
//!
//! Resolves `{{params.key}}` and `{{resources.id.attribute}}` templates
//! against a materialized [`Stack`], and `$NAME` / `${NAME}` environment
//! references in build commands.

use super::error::{Error, Result};
use super::stack::Stack;
use super::types::{value_to_string, Stage};
use indexmap::IndexMap;
use regex::{Captures, Regex};
use serde_yaml_ng::Value;
use std::sync::LazyLock;
use tracing::debug;

/// Matches `${NAME}` or `$NAME`.
static ENV_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("environment reference pattern is valid")
});

/// A `{{ ... }}` reference found in a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateRef {
    Param(String),
    Resource { id: String, attribute: String },
}

/// Byte span of a template (including braces) and what it refers to.
type Span = (usize, usize, TemplateRef);

fn scan(template: &str) -> Result<Vec<Span>> {
    let mut spans = Vec::new();
    let mut start = 0;

    while let Some(open) = template[start..].find("{{") {
        let open = start + open;
        let close = template[open..]
            .find("}}")
            .ok_or_else(|| Error::Template(format!("unclosed template at position {}", open)))?;
        let close = open + close + 2;
        let key = template[open + 2..close - 2].trim();

        let reference = if let Some(param) = key.strip_prefix("params.") {
            TemplateRef::Param(param.to_string())
        } else if let Some(rest) = key.strip_prefix("resources.") {
            let (id, attribute) = rest
                .split_once('.')
                .filter(|(id, attr)| !id.is_empty() && !attr.is_empty())
                .ok_or_else(|| Error::Template(format!("invalid resource ref: {}", key)))?;
            TemplateRef::Resource {
                id: id.to_string(),
                attribute: attribute.to_string(),
            }
        } else {
            return Err(Error::Template(format!("unknown template variable: {}", key)));
        };

        spans.push((open, close, reference));
        start = close;
    }

    Ok(spans)
}

/// List the references in a string without resolving them.
pub fn template_references(template: &str) -> Result<Vec<TemplateRef>> {
    Ok(scan(template)?.into_iter().map(|(_, _, r)| r).collect())
}

/// List the references in every string of a YAML value.
pub fn value_references(value: &Value) -> Result<Vec<TemplateRef>> {
    match value {
        Value::String(s) => template_references(s),
        Value::Sequence(items) => {
            let mut refs = Vec::new();
            for item in items {
                refs.extend(value_references(item)?);
            }
            Ok(refs)
        }
        Value::Mapping(map) => {
            let mut refs = Vec::new();
            for item in map.values() {
                refs.extend(value_references(item)?);
            }
            Ok(refs)
        }
        _ => Ok(Vec::new()),
    }
}

/// Resolve all templates in a string.
pub fn resolve_template(
    template: &str,
    params: &IndexMap<String, Value>,
    stack: &Stack,
) -> Result<String> {
    render(template, params, Some(stack))
}

fn render(template: &str, params: &IndexMap<String, Value>, stack: Option<&Stack>) -> Result<String> {
    let spans = scan(template)?;
    if spans.is_empty() {
        return Ok(template.to_string());
    }

    let mut result = String::with_capacity(template.len());
    let mut last = 0;
    for (open, close, reference) in spans {
        result.push_str(&template[last..open]);
        let value = match (reference, stack) {
            (TemplateRef::Param(key), _) => params
                .get(&key)
                .map(value_to_string)
                .ok_or_else(|| Error::Template(format!("unknown param: {}", key)))?,
            (TemplateRef::Resource { id, attribute }, Some(stack)) => {
                stack.resolve_attribute(&id, &attribute)?
            }
            (TemplateRef::Resource { id, attribute }, None) => {
                return Err(Error::Template(format!(
                    "resources.{}.{} cannot be referenced here",
                    id, attribute
                )));
            }
        };
        result.push_str(&value);
        last = close;
    }
    result.push_str(&template[last..]);

    debug!(template, resolved = %result, "template resolved");
    Ok(result)
}

fn render_value(value: &Value, params: &IndexMap<String, Value>, stack: Option<&Stack>) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(render(s, params, stack)?)),
        Value::Sequence(items) => items
            .iter()
            .map(|item| render_value(item, params, stack))
            .collect::<Result<Vec<_>>>()
            .map(Value::Sequence),
        Value::Mapping(map) => {
            let mut resolved = serde_yaml_ng::Mapping::new();
            for (k, v) in map {
                resolved.insert(k.clone(), render_value(v, params, stack)?);
            }
            Ok(Value::Mapping(resolved))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve templates in every string of a YAML value. Keys are left as is.
pub fn resolve_value(value: &Value, params: &IndexMap<String, Value>, stack: &Stack) -> Result<Value> {
    render_value(value, params, Some(stack))
}

/// Resolve `{{params.*}}` only; resource references are rejected.
/// Used for resource properties, which are fixed before provisioning.
pub fn resolve_params(value: &Value, params: &IndexMap<String, Value>) -> Result<Value> {
    render_value(value, params, None)
}

/// Copy of `stages` with every action parameter resolved.
pub fn resolve_stages(
    stages: &[Stage],
    params: &IndexMap<String, Value>,
    stack: &Stack,
) -> Result<Vec<Stage>> {
    let mut resolved = stages.to_vec();
    for stage in &mut resolved {
        for action in &mut stage.actions {
            for value in action.parameters.values_mut() {
                *value = resolve_value(value, params, stack)?;
            }
        }
    }
    Ok(resolved)
}

/// Substitute `$NAME` and `${NAME}` for names present in `env`.
/// Unknown names and shell constructs such as `$(...)` are left untouched.
pub fn interpolate_env(command: &str, env: &IndexMap<String, String>) -> String {
    ENV_REGEX
        .replace_all(command, |caps: &Captures<'_>| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            env.get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::simulated::SimulatedProvisioner;
    use crate::core::graph::ResourceGraph;
    use crate::core::types::{Action, ActionKind, ResourceKind, ResourceNode};

    fn params() -> IndexMap<String, Value> {
        let mut p = IndexMap::new();
        p.insert("region".to_string(), Value::String("us-east-1".into()));
        p.insert("port".to_string(), Value::from(5000));
        p
    }

    fn provisioned() -> Stack {
        let mut g = ResourceGraph::new();
        g.add_node(
            ResourceNode::new("registry", ResourceKind::ImageRegistry)
                .with_property("repository_name", "flask-app"),
        )
        .unwrap();
        let mut s = Stack::new(g).unwrap();
        s.provision_all(&mut SimulatedProvisioner::default()).unwrap();
        s
    }

    fn empty() -> Stack {
        Stack::new(ResourceGraph::new()).unwrap()
    }

    #[test]
    fn test_ps008_resolve_params() {
        let out = resolve_template("region={{params.region}} port={{ params.port }}", &params(), &empty())
            .unwrap();
        assert_eq!(out, "region=us-east-1 port=5000");
    }

    #[test]
    fn test_ps008_resolve_resource_attribute() {
        let s = provisioned();
        let out = resolve_template("{{resources.registry.repositoryUri}}", &params(), &s).unwrap();
        assert!(out.ends_with(".amazonaws.com/flask-app"), "{out}");
    }

    #[test]
    fn test_ps008_no_templates_passthrough() {
        assert_eq!(resolve_template("plain", &params(), &empty()).unwrap(), "plain");
    }

    #[test]
    fn test_ps008_unclosed_template() {
        let err = resolve_template("{{params.region", &params(), &empty()).unwrap_err();
        assert!(err.to_string().contains("unclosed"));
    }

    #[test]
    fn test_ps008_unknown_param_and_variable() {
        assert!(matches!(
            resolve_template("{{params.nope}}", &params(), &empty()),
            Err(Error::Template(_))
        ));
        assert!(matches!(
            resolve_template("{{stack.region}}", &params(), &empty()),
            Err(Error::Template(_))
        ));
        assert!(matches!(
            resolve_template("{{resources.registry}}", &params(), &empty()),
            Err(Error::Template(_))
        ));
    }

    #[test]
    fn test_ps008_unknown_resource() {
        let err = resolve_template("{{resources.ghost.id}}", &params(), &provisioned()).unwrap_err();
        assert!(matches!(err, Error::UnknownNode(ref id) if id == "ghost"));
    }

    #[test]
    fn test_ps008_references() {
        let refs = template_references("{{params.a}}-{{resources.vpc.vpcId}}").unwrap();
        assert_eq!(
            refs,
            vec![
                TemplateRef::Param("a".to_string()),
                TemplateRef::Resource {
                    id: "vpc".to_string(),
                    attribute: "vpcId".to_string()
                },
            ]
        );
        let nested: Value = serde_yaml_ng::from_str("commands: ['echo {{params.a}}']\nfiles: [x]").unwrap();
        assert_eq!(value_references(&nested).unwrap().len(), 1);
    }

    #[test]
    fn test_ps008_resolve_stages() {
        let stages = vec![Stage::new(
            "Build",
            2,
            vec![Action::new("Build", ActionKind::Build)
                .parameter("environment", {
                    let mut m = serde_yaml_ng::Mapping::new();
                    m.insert("AWS_REGION".into(), "{{params.region}}".into());
                    m.insert("ECR_REPOSITORY_URL".into(), "{{resources.registry.repositoryUri}}".into());
                    Value::Mapping(m)
                })
                .parameter("commands", vec!["docker push $ECR_REPOSITORY_URL:latest"])],
        )];
        let resolved = resolve_stages(&stages, &params(), &provisioned()).unwrap();
        let env = &resolved[0].actions[0].parameters["environment"];
        assert_eq!(env["AWS_REGION"], Value::String("us-east-1".into()));
        assert!(env["ECR_REPOSITORY_URL"].as_str().unwrap().contains("dkr.ecr"));
        // original untouched
        assert_eq!(
            stages[0].actions[0].parameters["environment"]["AWS_REGION"],
            Value::String("{{params.region}}".into())
        );
    }

    #[test]
    fn test_ps008_resolve_params_rejects_resources() {
        let ok = resolve_params(&Value::String("{{params.region}}".into()), &params()).unwrap();
        assert_eq!(ok, Value::String("us-east-1".into()));
        let err = resolve_params(&Value::String("{{resources.vpc.vpcId}}".into()), &params()).unwrap_err();
        assert!(err.to_string().contains("cannot be referenced here"));
    }

    #[test]
    fn test_ps008_interpolate_env() {
        let mut env = IndexMap::new();
        env.insert("ECR_REPOSITORY_URL".to_string(), "123.dkr.ecr.us-east-1.amazonaws.com/app".to_string());
        env.insert("AWS_REGION".to_string(), "us-east-1".to_string());
        let out = interpolate_env(
            "docker tag app:latest $ECR_REPOSITORY_URL:latest --region ${AWS_REGION} $HOME $(pwd)",
            &env,
        );
        assert_eq!(
            out,
            "docker tag app:latest 123.dkr.ecr.us-east-1.amazonaws.com/app:latest --region us-east-1 $HOME $(pwd)"
        );
    }
}
