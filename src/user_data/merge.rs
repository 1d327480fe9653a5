//! Field-level merge of a base document with caller overrides.

use std::collections::BTreeMap;

use super::CloudConfig;

/// How a field combines a base value with an override.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldPolicy {
    /// Both lists are kept in full, in the order chosen by [`ListOrder`].
    Concatenate,
    /// Both lists are kept, duplicates dropped, first occurrence wins.
    Union,
    /// Keys from both maps are kept; the override wins on a shared key.
    MapUnion,
    /// The override replaces the base when present.
    Replace,
}

/// Which side's entries come first in concatenated and unioned lists.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ListOrder {
    /// Base entries, then override entries.
    #[default]
    BaseFirst,
    /// Override entries, then base entries.
    OverrideFirst,
}

/// Merge policy of every typed key. Passthrough keys follow `extensions`.
pub const MERGE_POLICY: &[(&str, FieldPolicy)] = &[
    ("packages", FieldPolicy::Union),
    ("yum_repos", FieldPolicy::MapUnion),
    ("write_files", FieldPolicy::Concatenate),
    ("bootcmd", FieldPolicy::Concatenate),
    ("runcmd", FieldPolicy::Concatenate),
    ("users", FieldPolicy::Union),
    ("ssh_keys", FieldPolicy::MapUnion),
    ("ssh_genkeytypes", FieldPolicy::Union),
    ("ssh_deletekeys", FieldPolicy::Replace),
    ("extensions", FieldPolicy::MapUnion),
];

/// Looks up the policy applied to a typed key.
#[must_use]
pub fn policy_for(field: &str) -> Option<FieldPolicy> {
    MERGE_POLICY
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, policy)| *policy)
}

fn ordered<'a, T>(base: &'a [T], overrides: &'a [T], order: ListOrder) -> (&'a [T], &'a [T]) {
    match order {
        ListOrder::BaseFirst => (base, overrides),
        ListOrder::OverrideFirst => (overrides, base),
    }
}

fn concatenate<T: Clone>(base: &[T], overrides: &[T], order: ListOrder) -> Vec<T> {
    let (first, second) = ordered(base, overrides, order);
    first.iter().chain(second).cloned().collect()
}

fn union<T: Clone + PartialEq>(base: &[T], overrides: &[T], order: ListOrder) -> Vec<T> {
    let (first, second) = ordered(base, overrides, order);
    let mut merged: Vec<T> = Vec::with_capacity(first.len() + second.len());
    for item in first.iter().chain(second) {
        if !merged.contains(item) {
            merged.push(item.clone());
        }
    }
    merged
}

fn map_union<V: Clone>(base: &BTreeMap<String, V>, overrides: &BTreeMap<String, V>) -> BTreeMap<String, V> {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(key, value)| (key.clone(), value.clone())));
    merged
}

fn optional_union(
    base: Option<&Vec<String>>,
    overrides: Option<&Vec<String>>,
    order: ListOrder,
) -> Option<Vec<String>> {
    match (base, overrides) {
        (None, None) => None,
        (Some(only), None) | (None, Some(only)) => Some(only.clone()),
        (Some(lhs), Some(rhs)) => Some(union(lhs, rhs, order)),
    }
}

/// Merges `overrides` onto `base` following [`MERGE_POLICY`].
///
/// Neither input is modified; no list-valued key loses entries from either
/// side.
#[must_use]
pub fn merge(base: &CloudConfig, overrides: &CloudConfig, order: ListOrder) -> CloudConfig {
    CloudConfig {
        packages: union(&base.packages, &overrides.packages, order),
        yum_repos: map_union(&base.yum_repos, &overrides.yum_repos),
        write_files: concatenate(&base.write_files, &overrides.write_files, order),
        bootcmd: concatenate(&base.bootcmd, &overrides.bootcmd, order),
        runcmd: concatenate(&base.runcmd, &overrides.runcmd, order),
        users: union(&base.users, &overrides.users, order),
        ssh_keys: map_union(&base.ssh_keys, &overrides.ssh_keys),
        ssh_genkeytypes: optional_union(
            base.ssh_genkeytypes.as_ref(),
            overrides.ssh_genkeytypes.as_ref(),
            order,
        ),
        ssh_deletekeys: overrides.ssh_deletekeys.or(base.ssh_deletekeys),
        extensions: map_union(&base.extensions, &overrides.extensions),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_data::{CommandEntry, WriteFile};
    use rstest::rstest;

    fn file(path: &str) -> WriteFile {
        WriteFile {
            path: path.to_owned(),
            content: String::from("x"),
            ..WriteFile::default()
        }
    }

    fn base() -> CloudConfig {
        CloudConfig {
            packages: vec![String::from("jq"), String::from("htop")],
            write_files: vec![file("/etc/base.conf")],
            bootcmd: vec![CommandEntry::from("echo base-boot")],
            runcmd: vec![CommandEntry::from("echo base-run")],
            ssh_deletekeys: Some(true),
            ..CloudConfig::default()
        }
        .with_extension("repo_upgrade", "security")
        .with_extension("timezone", "UTC")
    }

    fn overrides() -> CloudConfig {
        CloudConfig {
            packages: vec![String::from("htop"), String::from("wireguard-tools")],
            write_files: vec![file("/etc/wireguard/wg0.conf")],
            bootcmd: vec![CommandEntry::from("echo override-boot")],
            runcmd: vec![CommandEntry::from("echo override-run")],
            ..CloudConfig::default()
        }
        .with_extension("repo_upgrade", "all")
    }

    #[rstest]
    #[case(ListOrder::BaseFirst, ["echo base-run", "echo override-run"])]
    #[case(ListOrder::OverrideFirst, ["echo override-run", "echo base-run"])]
    fn command_lists_concatenate_in_order(#[case] order: ListOrder, #[case] expected: [&str; 2]) {
        let merged = merge(&base(), &overrides(), order);
        let commands: Vec<CommandEntry> = expected.into_iter().map(CommandEntry::from).collect();
        assert_eq!(merged.runcmd, commands);
        assert_eq!(merged.bootcmd.len(), 2);
    }

    #[rstest]
    fn write_files_keep_both_sides() {
        let merged = merge(&base(), &overrides(), ListOrder::BaseFirst);
        let paths: Vec<&str> = merged.write_files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["/etc/base.conf", "/etc/wireguard/wg0.conf"]);
    }

    #[rstest]
    fn packages_are_unioned_without_duplicates() {
        let merged = merge(&base(), &overrides(), ListOrder::BaseFirst);
        assert_eq!(merged.packages, ["jq", "htop", "wireguard-tools"]);
    }

    #[rstest]
    fn scalar_and_passthrough_keys_prefer_the_override() {
        let merged = merge(&base(), &overrides(), ListOrder::BaseFirst);
        assert_eq!(
            merged.extensions.get("repo_upgrade"),
            Some(&serde_yaml::Value::from("all"))
        );
        assert_eq!(
            merged.extensions.get("timezone"),
            Some(&serde_yaml::Value::from("UTC"))
        );
        assert_eq!(merged.ssh_deletekeys, Some(true));
    }

    #[rstest]
    fn every_typed_key_has_a_policy() {
        for field in [
            "packages",
            "yum_repos",
            "write_files",
            "bootcmd",
            "runcmd",
            "users",
            "ssh_keys",
            "ssh_genkeytypes",
            "ssh_deletekeys",
        ] {
            assert!(policy_for(field).is_some(), "{field} has no merge policy");
        }
        assert_eq!(policy_for("runcmd"), Some(FieldPolicy::Concatenate));
    }
}
