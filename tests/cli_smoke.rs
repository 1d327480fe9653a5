//! Behavioural tests for the `homelab` CLI.

#[path = "common/test_constants.rs"]
mod test_constants;

use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use test_constants::{SUBNET_ID, SUBNET_IPV4, SUBNET_IPV6, ZONE_ID};

fn spec_toml(network: &str) -> String {
    format!(
        r#"name = "gw"
subnet_ids = ["{SUBNET_ID}"]
vpc_id = "vpc-1"
security_groups = ["sg-1"]
image_id = "ami-123"

[dns]
zone = "{ZONE_ID}"
hostname = "gw"

[network]
{network}

[subnets.{SUBNET_ID}]
cidr_block = "{SUBNET_IPV4}"
ipv6_cidr_block = "{SUBNET_IPV6}"
"#
    )
}

#[fixture]
fn workspace() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

fn write_spec(dir: &TempDir, network: &str) {
    fs::write(dir.path().join("gw.toml"), spec_toml(network))
        .unwrap_or_else(|err| panic!("write spec: {err}"));
}

fn homelab(dir: &TempDir, args: &[&str]) -> assert_cmd::Command {
    homelab_in(dir.path(), args)
}

fn homelab_in(cwd: &Path, args: &[&str]) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("homelab");
    cmd.current_dir(cwd)
        .env("HOMELAB_ACCOUNT_ID", "123456789012")
        .env("HOMELAB_STATE_FILE", "draws.toml")
        .env_remove("HOMELAB_CONFIG_PATH")
        .args(args);
    cmd
}

#[test]
fn cli_without_arguments_prints_help() {
    let mut cmd = cargo_bin_cmd!("homelab");
    cmd.assert().failure().stderr(contains("Usage"));
}

#[rstest]
fn plan_prints_resources_and_outputs(workspace: TempDir) {
    write_spec(&workspace, "use_elastic_ip = true");

    homelab(&workspace, &["plan", "gw.toml"])
        .assert()
        .success()
        .stdout(
            contains("\"kind\": \"aws:ec2/eipAssociation\"")
                .and(contains("\"name\": \"gw-aaaa\""))
                .and(contains("\"ip_source\": \"elastic_ip\"")),
        );
}

#[rstest]
fn user_data_prints_the_cloud_config_document(workspace: TempDir) {
    write_spec(&workspace, "");

    homelab(&workspace, &["user-data", "gw.toml"])
        .assert()
        .success()
        .stdout(contains("#cloud-config").and(contains("hostnamectl set-hostname gw")));
}

#[rstest]
fn contradictory_network_flags_fail_before_planning(workspace: TempDir) {
    write_spec(&workspace, "source_dest_check = false");

    homelab(&workspace, &["plan", "gw.toml"])
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(contains("network.source_dest_check requires"));
}

#[rstest]
fn missing_account_names_the_variable(workspace: TempDir) {
    write_spec(&workspace, "");

    homelab(&workspace, &["plan", "gw.toml"])
        .env("HOMELAB_ACCOUNT_ID", " ")
        .assert()
        .failure()
        .stderr(contains("HOMELAB_ACCOUNT_ID"));
}

#[rstest]
fn spec_paths_may_point_above_the_working_directory(workspace: TempDir) {
    write_spec(&workspace, "");
    fs::write(
        workspace.path().join("extra.yaml"),
        "#cloud-config\npackages: [wireguard-tools]\n",
    )
    .unwrap_or_else(|err| panic!("write override: {err}"));
    let spec = fs::read_to_string(workspace.path().join("gw.toml"))
        .unwrap_or_else(|err| panic!("read spec: {err}"));
    fs::write(
        workspace.path().join("gw.toml"),
        format!("user_data_file = \"extra.yaml\"\n{spec}"),
    )
    .unwrap_or_else(|err| panic!("rewrite spec: {err}"));
    let nested = workspace.path().join("nested");
    fs::create_dir(&nested).unwrap_or_else(|err| panic!("mkdir: {err}"));

    homelab_in(&nested, &["user-data", "../gw.toml"])
        .assert()
        .success()
        .stdout(contains("#cloud-config").and(contains("wireguard-tools")));
}
