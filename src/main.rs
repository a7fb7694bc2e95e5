//! refgate inspection CLI
//!
//! Evaluates permissions and ref visibility against a configured project
//! hierarchy.

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use refgate::{
    access_control::{ProjectChain, SectionSortCache},
    backend::{PermissionBackend, PermissionScope, RefFilterOptions},
    change::ChangeId,
    config::{AppConfig, LogFormat, load_config},
    error::{CheckResult, PermissionError},
    identity::{AccessPath, Identity},
    permissions::{
        ChangePermission, ChangeScopePermission, GlobalPermission, LabelPermission,
        LabelPermissionWithValue, ProjectPermission, RefPermission,
    },
};
use serde_json::json;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// refgate - Hierarchical ref-level access control
#[derive(Parser, Debug)]
#[command(name = "refgate")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "REFGATE_CONFIG")]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error); overrides the configuration
    #[arg(long, env = "REFGATE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Output::Text)]
    output: Output,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, then print the project hierarchy
    Validate,

    /// Check one permission at global, project, ref or change scope
    Check {
        #[command(flatten)]
        user: UserArgs,

        /// Project to check on; global capabilities are checked without it
        #[arg(long)]
        project: Option<String>,

        /// Ref to check on
        #[arg(long = "ref", requires = "project", conflicts_with = "change")]
        ref_name: Option<String>,

        /// Change to check on
        #[arg(long, requires = "project")]
        change: Option<u32>,

        /// Permission name, e.g. `push`, `read`, `abandon` or `label-Code-Review=+2`
        permission: String,
    },

    /// Print the refs of a project the user may see
    Refs {
        #[command(flatten)]
        user: UserArgs,

        #[arg(long)]
        project: String,

        /// Drop change and edit refs
        #[arg(long)]
        filter_meta: bool,

        /// Ref names to filter
        #[arg(required = true)]
        refs: Vec<String>,
    },
}

#[derive(clap::Args, Debug)]
struct UserArgs {
    /// Account to check for; anonymous when omitted
    #[arg(long, conflicts_with = "internal")]
    account: Option<u32>,

    /// Check for the server itself
    #[arg(long)]
    internal: bool,

    /// How the request reached the server
    #[arg(long, value_enum)]
    access_path: Option<PathArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PathArg {
    Git,
    RestApi,
    SshCommand,
    WebBrowser,
}

impl From<PathArg> for AccessPath {
    fn from(path: PathArg) -> Self {
        match path {
            PathArg::Git => AccessPath::Git,
            PathArg::RestApi => AccessPath::RestApi,
            PathArg::SshCommand => AccessPath::SshCommand,
            PathArg::WebBrowser => AccessPath::WebBrowser,
        }
    }
}

impl UserArgs {
    fn identity(&self, config: &AppConfig) -> Identity {
        if self.internal {
            return Identity::Internal;
        }
        match self.account.map(|id| config.identity(id)) {
            Some(Identity::Identified(user)) => Identity::Identified(match self.access_path {
                Some(path) => user.with_access_path(path.into()),
                None => user,
            }),
            Some(identity) => identity,
            None => Identity::Anonymous,
        }
    }
}

fn init_logging(config: &AppConfig, level: Option<&str>) {
    let level = level.unwrap_or(config.logging.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_logging(&config, args.log_level.as_deref());

    debug!(version = env!("CARGO_PKG_VERSION"), "Starting refgate");

    let backend = config
        .build_backend()
        .inspect_err(|e| error!(error = %e, "Failed to build permission backend"))?;

    match &args.command {
        Command::Validate => validate(&config, args.output),
        Command::Check {
            user,
            project,
            ref_name,
            change,
            permission,
        } => {
            let identity = user.identity(&config);
            let target = Target {
                project: project.as_deref(),
                ref_name: ref_name.as_deref(),
                change: change.map(ChangeId),
            };
            check(&backend, identity, &target, permission, args.output)
        }
        Command::Refs {
            user,
            project,
            filter_meta,
            refs,
        } => {
            let identity = user.identity(&config);
            let options = RefFilterOptions::default().filter_meta(*filter_meta);
            let visible = backend
                .user(identity)
                .project(project)
                .filter(refs.iter().cloned(), &options)?;
            match args.output {
                Output::Text => visible.iter().for_each(|r| println!("{}", r)),
                Output::Json => println!("{}", json!({ "project": project, "visible": visible })),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn validate(config: &AppConfig, output: Output) -> anyhow::Result<ExitCode> {
    let store = config.project_store(Arc::new(SectionSortCache::new()))?;
    let root = &config.engine.all_projects;

    let mut hierarchy = Vec::new();
    for name in store.names() {
        let chain = ProjectChain::resolve(&store, &name, root)?;
        hierarchy.push(
            chain
                .names()
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>(),
        );
    }

    match output {
        Output::Text => {
            println!(
                "configuration ok: {} projects, {} accounts, {} changes",
                config.projects.len(),
                config.accounts.len(),
                config.changes.len()
            );
            for chain in &hierarchy {
                println!("  {}", chain.join(" -> "));
            }
        }
        Output::Json => println!(
            "{}",
            json!({
                "projects": config.projects.len(),
                "accounts": config.accounts.len(),
                "changes": config.changes.len(),
                "hierarchy": hierarchy,
            })
        ),
    }
    Ok(ExitCode::SUCCESS)
}

struct Target<'a> {
    project: Option<&'a str>,
    ref_name: Option<&'a str>,
    change: Option<ChangeId>,
}

fn unknown(permission: &str, scope: &str) -> anyhow::Error {
    anyhow!("unknown {} permission '{}'", scope, permission)
}

fn parse_change_permission(name: &str) -> Option<ChangeScopePermission> {
    ChangePermission::try_parse(name)
        .map(Into::into)
        .or_else(|| LabelPermissionWithValue::try_parse(name).map(Into::into))
        .or_else(|| LabelPermission::try_parse(name).map(Into::into))
}

fn check(
    backend: &PermissionBackend,
    identity: Identity,
    target: &Target<'_>,
    permission: &str,
    output: Output,
) -> anyhow::Result<ExitCode> {
    let user = backend.user(identity);

    let (resource, result): (String, CheckResult) = match (
        target.project,
        target.ref_name,
        target.change,
    ) {
        (None, _, _) => {
            let p = GlobalPermission::try_parse(permission)
                .ok_or_else(|| unknown(permission, "global"))?;
            (user.resource_path(), user.check(&p))
        }
        (Some(project), None, None) => {
            let p = ProjectPermission::try_parse(permission)
                .ok_or_else(|| unknown(permission, "project"))?;
            let scope = user.project(project);
            (scope.resource_path(), scope.check(&p))
        }
        (Some(project), Some(ref_name), _) => {
            let p = RefPermission::try_parse(permission)
                .ok_or_else(|| unknown(permission, "ref"))?;
            let scope = user.ref_(project, ref_name);
            (scope.resource_path(), scope.check(&p))
        }
        (Some(project), None, Some(change)) => {
            let p = parse_change_permission(permission)
                .ok_or_else(|| unknown(permission, "change"))?;
            let scope = user.change(&backend.change_data(project, change));
            (scope.resource_path(), scope.check(&p))
        }
    };

    let (allowed, message) = match result {
        Ok(()) => (true, None),
        Err(PermissionError::Auth(e)) => (false, Some(e.to_string())),
        Err(PermissionError::Backend(e)) => return Err(e.into()),
    };

    match output {
        Output::Text => match &message {
            None => println!("{} {}: allowed", permission, resource),
            Some(message) => println!("{} {}: denied\n{}", permission, resource, message),
        },
        Output::Json => println!(
            "{}",
            json!({
                "permission": permission,
                "resource": resource,
                "allowed": allowed,
                "message": message,
            })
        ),
    }

    Ok(if allowed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
