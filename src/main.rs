//! Binary entry point for the `homelab` CLI.

use std::io::{self, Write};
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use serde::Serialize;
use thiserror::Error;

use homelab::engine::{Plan, PlanEngine, PlanError, Property, ResourceRef, kinds};
use homelab::instance::{InstanceSpecFile, SpecFileError, SubnetFacts};
use homelab::logging::{self, LogFormat};
use homelab::provision::{
    InstanceProvisioner, ProvisionError, ResolvedInstance, SUBNET_IPV4_KEY, SUBNET_IPV6_KEY,
};
use homelab::random::{FileDrawStore, MemoizedRandom};
use homelab::user_data::ListOrder;
use homelab::{ConfigError, StackConfig};

mod cli;

use cli::{Cli, Command, LogFormatArg, SpecArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Spec(#[from] SpecFileError),
    #[error(transparent)]
    Provision(#[from] ProvisionError<PlanError>),
    #[error("failed to render plan: {0}")]
    Plan(#[from] PlanError),
    #[error("failed to serialise output: {0}")]
    Render(String),
    #[error("instance {0} has no user data in the plan")]
    MissingUserData(String),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Document printed by `homelab plan`.
#[derive(Debug, Serialize)]
struct PlanReport {
    plan: Plan,
    outputs: ResolvedInstance,
}

struct Described {
    engine: PlanEngine,
    name: String,
    outputs: ResolvedInstance,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(log_format(cli.log_format));
    let exit_code = match dispatch(cli.command).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

const fn log_format(arg: LogFormatArg) -> LogFormat {
    match arg {
        LogFormatArg::Human => LogFormat::Human,
        LogFormatArg::Json => LogFormat::Json,
    }
}

async fn dispatch(command: Command) -> Result<(), CliError> {
    match command {
        Command::Plan(args) => {
            let described = describe(&args).await?;
            let report = PlanReport {
                plan: described.engine.snapshot()?,
                outputs: described.outputs,
            };
            let rendered = serde_json::to_string_pretty(&report)
                .map_err(|err| CliError::Render(err.to_string()))?;
            writeln!(io::stdout(), "{rendered}")?;
        }
        Command::UserData(args) => {
            let described = describe(&args).await?;
            let instance = ResourceRef::new(kinds::INSTANCE, described.name.as_str());
            let document = described
                .engine
                .resource(&instance)?
                .and_then(|decl| match decl.get("user_data") {
                    Some(Property::Literal(serde_json::Value::String(body))) => Some(body.clone()),
                    _ => None,
                })
                .ok_or(CliError::MissingUserData(described.name))?;
            write!(io::stdout(), "{document}")?;
        }
    }
    Ok(())
}

async fn describe(args: &SpecArgs) -> Result<Described, CliError> {
    let config = StackConfig::load_validated()?;
    let file = InstanceSpecFile::load(Utf8Path::new(&args.spec))?;
    let engine = register_subnets(PlanEngine::new(), &file.subnets);
    let spec = file.into_spec(&config.default_instance_type)?;

    let state_path = args
        .state_file
        .as_deref()
        .map_or_else(|| config.state_path(), Utf8PathBuf::from);
    let random = MemoizedRandom::new(FileDrawStore::new(state_path));
    let order = if args.override_first {
        ListOrder::OverrideFirst
    } else {
        ListOrder::BaseFirst
    };

    let outputs = InstanceProvisioner::new(&engine, &random, config.base_document())
        .with_list_order(order)
        .provision(&spec)
        .await?;
    Ok(Described {
        engine,
        name: spec.name,
        outputs,
    })
}

fn register_subnets<'a>(
    engine: PlanEngine,
    subnets: impl IntoIterator<Item = (&'a String, &'a SubnetFacts)>,
) -> PlanEngine {
    subnets.into_iter().fold(engine, |plan, (id, facts)| {
        plan.with_existing(
            ResourceRef::new(kinds::SUBNET, id.as_str()),
            [
                (SUBNET_IPV4_KEY, facts.cidr_block.clone()),
                (
                    SUBNET_IPV6_KEY,
                    facts.ipv6_cidr_block.clone().unwrap_or_default(),
                ),
            ],
        )
    })
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use rstest::rstest;

    #[rstest]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::MissingUserData(String::from("gw")));
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert_eq!(rendered, "instance gw has no user data in the plan\n");
    }

    #[rstest]
    #[case(LogFormatArg::Human, LogFormat::Human)]
    #[case(LogFormatArg::Json, LogFormat::Json)]
    fn log_format_maps_cli_values(#[case] arg: LogFormatArg, #[case] expected: LogFormat) {
        assert_eq!(log_format(arg), expected);
    }

    #[tokio::test]
    async fn registered_subnets_expose_both_ranges() {
        use homelab::engine::Engine;

        let subnets = BTreeMap::from([(
            String::from("subnet-1"),
            SubnetFacts {
                cidr_block: String::from("10.0.1.0/24"),
                ipv6_cidr_block: None,
            },
        )]);
        let engine = register_subnets(PlanEngine::new(), &subnets);
        let subnet = ResourceRef::new(kinds::SUBNET, "subnet-1");

        let ipv4 = engine
            .read_output(&subnet, SUBNET_IPV4_KEY)
            .await
            .unwrap_or_else(|err| panic!("ipv4: {err}"));
        let ipv6 = engine
            .read_output(&subnet, SUBNET_IPV6_KEY)
            .await
            .unwrap_or_else(|err| panic!("ipv6: {err}"));

        assert_eq!(ipv4.as_known(), Some("10.0.1.0/24"));
        assert_eq!(ipv6.as_known(), Some(""));
    }
}
