//! PS-019: CLI subcommands.

use crate::core::apply::{self, ApplyConfig, ApplyResult};
use crate::core::error::{Error, Result};
use crate::core::executor::PipelineRun;
use crate::core::types::{ExecutionPlan, PlanAction, StackLock, StageStatus};
use crate::core::{parser, state};
use crate::provenance::eventlog;
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "pipestack",
    version,
    about = "Declarative provisioning graph and Source → Build delivery pipeline"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stack project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate stack.yaml and its resource graph
    Validate {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,
    },

    /// Show the provisioning plan (diff desired vs locked)
    Plan {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Provision the stack, export outputs, then run the pipeline
    Apply {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Re-provision every resource, ignoring the lock
        #[arg(long)]
        force: bool,

        /// Show the plan without provisioning
        #[arg(long)]
        dry_run: bool,

        /// Provision and export only
        #[arg(long)]
        skip_pipeline: bool,

        /// Directory source actions resolve checkouts against
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
    },

    /// Run the pipeline against an already provisioned stack
    Run {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Directory source actions resolve checkouts against
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
    },

    /// Print exported stack outputs from the lock
    Outputs {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Only this stack
        #[arg(long)]
        stack: Option<String>,

        /// Emit JSON instead of `name = value` lines
        #[arg(long)]
        json: bool,
    },

    /// Show current state from lock files
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan { file, state_dir } => cmd_plan(&file, &state_dir),
        Commands::Apply {
            file,
            state_dir,
            force,
            dry_run,
            skip_pipeline,
            workspace,
        } => cmd_apply(
            &file,
            &state_dir,
            &workspace,
            ApplyFlags {
                force,
                dry_run,
                skip_pipeline,
            },
        ),
        Commands::Run {
            file,
            state_dir,
            workspace,
        } => cmd_run(&file, &state_dir, &workspace),
        Commands::Outputs {
            state_dir,
            stack,
            json,
        } => cmd_outputs(&state_dir, stack.as_deref(), json),
        Commands::Status { state_dir } => cmd_status(&state_dir),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "pipestack", &mut std::io::stdout());
            Ok(())
        }
    }
}

const INIT_TEMPLATE: &str = r#"version: "1.0"
name: flask-stack
description: "Flask app on a single instance, delivered through a Source -> Build pipeline"

params:
  key_name: my-key-pair

backend:
  region: us-east-1
  account_id: "000000000000"

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
      key_name: "{{params.key_name}}"
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
            path: flask_app
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
              AWS_REGION: us-east-1
            commands:
              - echo 'Starting build'
              - docker build -t $ECR_REPOSITORY_URL:latest .
              - aws ecr get-login-password --region $AWS_REGION | docker login --username AWS --password-stdin $ECR_REPOSITORY_URL
              - docker push $ECR_REPOSITORY_URL:latest
            artifacts:
              files: ["**/*"]
              base_directory: .
              discard_paths: "no"

outputs:
  instancePublicDnsName:
    source: instance
    attribute: publicDnsName
    description: Public DNS name of the instance
  flaskRepositoryUrl:
    source: repo
    attribute: cloneUrlHttp
    description: Flask repository URL
  flaskEcrRepositoryUri:
    source: registry
    attribute: repositoryUri
    description: Registry URI for the Flask image

policy:
  lock_file: true
  tripwire: true
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let config_path = path.join("stack.yaml");
    if config_path.exists() {
        return Err(Error::State(format!("{} already exists", config_path.display())));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir)?;
    std::fs::write(&config_path, INIT_TEMPLATE)?;

    println!("Initialized pipestack project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<()> {
    let config = parser::load_stack(file)?;
    let blueprint = parser::compile(&config)?;
    let order = blueprint.graph.validate()?;
    let stages = blueprint.pipeline.as_ref().map_or(0, |p| p.stages().len());
    println!(
        "OK: {} ({} resources, {} stages, {} outputs)",
        config.name,
        order.len(),
        stages,
        blueprint.outputs.len()
    );
    Ok(())
}

fn cmd_plan(file: &Path, state_dir: &Path) -> Result<()> {
    let config = parser::load_stack(file)?;
    let (_, plan, _) = apply::plan_stack(&config, state_dir)?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout, one dependency level per block.
fn print_plan(plan: &ExecutionPlan) {
    println!("Planning: {} ({} resources)", plan.name, plan.changes.len());
    println!();

    let mut current_level = None;
    for change in &plan.changes {
        if current_level != Some(change.level) {
            current_level = Some(change.level);
            println!("level {}:", change.level);
        }
        let symbol = match change.action {
            PlanAction::Create => "+",
            PlanAction::Update => "~",
            PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} unchanged.",
        plan.to_create, plan.to_update, plan.unchanged
    );
}

struct ApplyFlags {
    force: bool,
    dry_run: bool,
    skip_pipeline: bool,
}

fn cmd_apply(file: &Path, state_dir: &Path, workspace: &Path, flags: ApplyFlags) -> Result<()> {
    let config = parser::load_stack(file)?;
    let cfg = ApplyConfig {
        config: &config,
        state_dir,
        workspace,
        force: flags.force,
        dry_run: flags.dry_run,
        skip_pipeline: flags.skip_pipeline,
    };

    let result = apply::apply(&cfg)?;

    if flags.dry_run {
        print_plan(&result.plan);
        println!("Dry run: nothing provisioned.");
        return Ok(());
    }

    print_apply(&result);
    match &result.run {
        Some(run) => report_run(run),
        None => Ok(()),
    }
}

fn print_apply(result: &ApplyResult) {
    println!(
        "{}: {} provisioned, {} unchanged ({:.1}s)",
        result.plan.name,
        result.provisioned,
        result.unchanged,
        result.total_duration.as_secs_f64()
    );
    if !result.outputs.is_empty() {
        println!();
        println!("Outputs:");
        for (name, value) in &result.outputs {
            println!("  {} = {}", name, value);
        }
    }
}

fn cmd_run(file: &Path, state_dir: &Path, workspace: &Path) -> Result<()> {
    let config = parser::load_stack(file)?;
    let cfg = ApplyConfig {
        config: &config,
        state_dir,
        workspace,
        force: false,
        dry_run: false,
        skip_pipeline: false,
    };
    let run = apply::run_pipeline(&cfg)?;
    report_run(&run)
}

/// Print the per-stage report; a failed run becomes the command's error.
fn report_run(run: &PipelineRun) -> Result<()> {
    println!();
    println!("Pipeline {} [{}]:", run.pipeline, run.run_id);
    for stage in &run.stages {
        let detail = match stage.status {
            StageStatus::Succeeded => format!("-> {}", stage.artifacts.join(", ")),
            StageStatus::Failed => stage.error.clone().unwrap_or_default(),
            _ => String::new(),
        };
        println!(
            "  {:>2}. {:<12} {:<9} ({:.1}s) {}",
            stage.order,
            stage.name,
            stage.status.to_string(),
            stage.duration.as_secs_f64(),
            detail
        );
    }
    println!(
        "Pipeline {}: {} ({:.1}s)",
        run.status,
        run.pipeline,
        run.total_duration.as_secs_f64()
    );

    match run.failed_stage() {
        Some(stage) => Err(Error::PipelineFailed {
            pipeline: run.pipeline.clone(),
            stage: stage.name.clone(),
        }),
        None => Ok(()),
    }
}

/// Load every stack lock in the state directory, optionally one stack only.
fn load_locks(state_dir: &Path, only: Option<&str>) -> Result<Vec<StackLock>> {
    if !state_dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = std::fs::read_dir(state_dir)
        .map_err(|e| Error::State(format!("cannot read state dir {}: {}", state_dir.display(), e)))?
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| only.map_or(true, |o| o == name))
        .collect();
    names.sort();

    let mut locks = Vec::new();
    for name in names {
        if let Some(lock) = state::load_lock(state_dir, &name)? {
            locks.push(lock);
        }
    }
    Ok(locks)
}

fn cmd_outputs(state_dir: &Path, stack: Option<&str>, json: bool) -> Result<()> {
    let locks = load_locks(state_dir, stack)?;
    if locks.is_empty() {
        return Err(Error::State(match stack {
            Some(name) => format!("no lock for stack '{}'; run `pipestack apply` first", name),
            None => "no state found; run `pipestack apply` first".to_string(),
        }));
    }

    if json {
        let map: indexmap::IndexMap<&str, _> =
            locks.iter().map(|l| (l.stack.as_str(), &l.outputs)).collect();
        let text = serde_json::to_string_pretty(&map)
            .map_err(|e| Error::State(format!("cannot serialize outputs: {}", e)))?;
        println!("{}", text);
        return Ok(());
    }

    for lock in &locks {
        println!("{}:", lock.stack);
        for (name, value) in &lock.outputs {
            println!("  {} = {}", name, value);
        }
    }
    Ok(())
}

fn cmd_status(state_dir: &Path) -> Result<()> {
    let locks = load_locks(state_dir, None)?;
    if locks.is_empty() {
        println!("No state found. Run `pipestack apply` first.");
        return Ok(());
    }

    for lock in &locks {
        let events = eventlog::read_events(state_dir, &lock.stack)?;
        println!("Stack: {}", lock.stack);
        println!("  Generated: {}", lock.generated_at);
        println!("  Generator: {}", lock.generator);
        println!("  Resources: {}", lock.resources.len());
        for (id, rl) in &lock.resources {
            let applied = rl
                .applied_at
                .as_deref()
                .map(|t| format!(" at {}", t))
                .unwrap_or_default();
            println!("    {}: {} [{}]{}", id, rl.status, rl.kind, applied);
        }
        println!("  Outputs: {}", lock.outputs.len());
        println!("  Events: {}", events.len());
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL_STACK: &str = r#"
version: "1.0"
name: local
resources:
  vpc:
    kind: network
    properties:
      cidr: 10.0.0.0/16
  registry:
    kind: image_registry
    properties:
      repository_name: app
pipeline:
  name: local-pipeline
  stages:
    - name: Source
      order: 1
      actions:
        - name: Checkout
          kind: source
          outputs: [src]
          parameters:
            path: app
    - name: Build
      order: 2
      actions:
        - name: Package
          kind: build
          inputs: [src]
          outputs: [bundle]
          parameters:
            environment:
              REGISTRY: "{{resources.registry.repositoryUri}}"
            commands:
              - echo "$REGISTRY" > image.txt
            artifacts: image.txt
outputs:
  registryUri:
    source: registry
    attribute: repositoryUri
"#;

    struct Project {
        dir: tempfile::TempDir,
    }

    impl Project {
        fn new(stack: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("stack.yaml"), stack).unwrap();
            std::fs::create_dir(dir.path().join("app")).unwrap();
            std::fs::write(dir.path().join("app/app.py"), "print('hi')").unwrap();
            Self { dir }
        }

        fn file(&self) -> PathBuf {
            self.dir.path().join("stack.yaml")
        }

        fn state(&self) -> PathBuf {
            self.dir.path().join("state")
        }

        fn workspace(&self) -> &Path {
            self.dir.path()
        }
    }

    fn flags(dry_run: bool, skip_pipeline: bool) -> ApplyFlags {
        ApplyFlags {
            force: false,
            dry_run,
            skip_pipeline,
        }
    }

    #[test]
    fn test_ps019_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("project");
        std::fs::create_dir_all(&sub).unwrap();
        cmd_init(&sub).unwrap();
        assert!(sub.join("stack.yaml").exists());
        assert!(sub.join("state").is_dir());
        // the template is itself a valid stack
        cmd_validate(&sub.join("stack.yaml")).unwrap();
    }

    #[test]
    fn test_ps019_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stack.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_ps019_init_template_provisions() {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let state = dir.path().join("state");
        cmd_apply(&dir.path().join("stack.yaml"), &state, dir.path(), flags(false, true)).unwrap();
        let lock = state::load_lock(&state, "flask-stack").unwrap().unwrap();
        assert_eq!(lock.resources.len(), 7);
        assert_eq!(lock.outputs.len(), 3);
    }

    #[test]
    fn test_ps019_validate_valid() {
        let p = Project::new(LOCAL_STACK);
        cmd_validate(&p.file()).unwrap();
    }

    #[test]
    fn test_ps019_validate_invalid() {
        let p = Project::new("version: \"2.0\"\nname: \"\"\n");
        let err = cmd_validate(&p.file()).unwrap_err();
        assert!(matches!(err, Error::Config(ref errors) if errors.len() == 2));
    }

    #[test]
    fn test_ps019_validate_cycle() {
        let p = Project::new(
            r#"
version: "1.0"
name: cyclic
resources:
  a:
    kind: key_pair
    depends_on: [b]
    properties:
      key_name: a
  b:
    kind: key_pair
    depends_on: [a]
    properties:
      key_name: b
"#,
        );
        assert!(matches!(cmd_validate(&p.file()), Err(Error::Cycle(_))));
    }

    #[test]
    fn test_ps019_validate_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_validate(&dir.path().join("nope.yaml")).is_err());
    }

    #[test]
    fn test_ps019_plan() {
        let p = Project::new(LOCAL_STACK);
        cmd_plan(&p.file(), &p.state()).unwrap();
    }

    #[test]
    fn test_ps019_apply_dry_run() {
        let p = Project::new(LOCAL_STACK);
        cmd_apply(&p.file(), &p.state(), p.workspace(), flags(true, false)).unwrap();
        assert!(state::load_lock(&p.state(), "local").unwrap().is_none());
    }

    #[test]
    fn test_ps019_apply_real() {
        let p = Project::new(LOCAL_STACK);
        cmd_apply(&p.file(), &p.state(), p.workspace(), flags(false, false)).unwrap();

        let lock = state::load_lock(&p.state(), "local").unwrap().unwrap();
        assert_eq!(lock.resources.len(), 2);
        let build = state::build_dir(&p.state(), "local").join("Build/Package");
        let image = std::fs::read_to_string(build.join("image.txt")).unwrap();
        assert_eq!(image.trim(), lock.outputs["registryUri"]);
        assert!(!p.workspace().join("app/image.txt").exists());
    }

    #[test]
    fn test_ps019_apply_failed_pipeline_is_error() {
        let p = Project::new(&LOCAL_STACK.replace("artifacts: image.txt", "artifacts: missing.txt"));
        let err = cmd_apply(&p.file(), &p.state(), p.workspace(), flags(false, false)).unwrap_err();
        assert!(matches!(err, Error::PipelineFailed { ref stage, .. } if stage == "Build"));
        // provisioning still recorded
        assert!(state::load_lock(&p.state(), "local").unwrap().is_some());
    }

    #[test]
    fn test_ps019_run_after_apply() {
        let p = Project::new(LOCAL_STACK);
        assert!(cmd_run(&p.file(), &p.state(), p.workspace()).is_err());
        cmd_apply(&p.file(), &p.state(), p.workspace(), flags(false, true)).unwrap();
        cmd_run(&p.file(), &p.state(), p.workspace()).unwrap();
    }

    #[test]
    fn test_ps019_status_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        cmd_status(&dir.path().join("state")).unwrap();
    }

    #[test]
    fn test_ps019_status_with_lock() {
        let p = Project::new(LOCAL_STACK);
        cmd_apply(&p.file(), &p.state(), p.workspace(), flags(false, true)).unwrap();
        cmd_status(&p.state()).unwrap();
    }

    #[test]
    fn test_ps019_outputs() {
        let p = Project::new(LOCAL_STACK);
        assert!(cmd_outputs(&p.state(), None, false).is_err());
        cmd_apply(&p.file(), &p.state(), p.workspace(), flags(false, true)).unwrap();
        cmd_outputs(&p.state(), None, false).unwrap();
        cmd_outputs(&p.state(), Some("local"), true).unwrap();
        assert!(cmd_outputs(&p.state(), Some("other"), true).is_err());
    }

    #[test]
    fn test_ps019_load_locks_filters() {
        let p = Project::new(LOCAL_STACK);
        cmd_apply(&p.file(), &p.state(), p.workspace(), flags(false, true)).unwrap();
        std::fs::create_dir_all(p.state().join("empty")).unwrap();
        let all = load_locks(&p.state(), None).unwrap();
        assert_eq!(all.len(), 1);
        assert!(load_locks(&p.state(), Some("empty")).unwrap().is_empty());
    }

    #[test]
    fn test_ps019_dispatch() {
        let p = Project::new(LOCAL_STACK);
        dispatch(Commands::Validate { file: p.file() }).unwrap();
        dispatch(Commands::Status { state_dir: p.state() }).unwrap();
    }

    #[test]
    fn test_ps019_cli_parses_verbosity() {
        let cli = Cli::try_parse_from(["pipestack", "-vv", "plan", "-f", "s.yaml"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Plan { .. }));
        Cli::command().debug_assert();
    }
}
