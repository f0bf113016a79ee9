//! Configuration-management tooling on top of the minimal Linux base.

use dockyard_common::constants::{
    ANSIBLE_CONFIG_ENV, ANSIBLE_CONFIG_FILE, ANSIBLE_CONFIG_LOCATION, DEFAULT_ALPINE_VERSION,
    DEFAULT_ANSIBLE_VERSION,
};
use dockyard_common::types::PackageSpec;
use dockyard_core::composition::Composition;
use dockyard_core::source::DirectorySource;

use crate::alpine::{AlpineOpts, alpine};

/// Packages needed to install the tool and its native extensions with pip.
pub const PACKAGES: [&str; 10] = [
    "bash",
    "gcc",
    "grep",
    "openssl-dev",
    "py3-pip",
    "python3-dev",
    "gpgme-dev",
    "libc-dev",
    "rust",
    "cargo",
];

/// Options for [`ansible`].
#[derive(Debug, Clone)]
pub struct AnsibleOpts {
    /// Tool release installed with pip; empty selects
    /// [`DEFAULT_ANSIBLE_VERSION`].
    pub version: String,
    /// Project placed at [`ANSIBLE_CONFIG_LOCATION`].
    pub project: DirectorySource,
    /// Contents of the generated configuration file.
    pub config: String,
}

impl Default for AnsibleOpts {
    fn default() -> Self {
        Self {
            version: String::new(),
            project: DirectorySource::Empty,
            config: String::new(),
        }
    }
}

/// Builds the tool image: Alpine with [`PACKAGES`], the project copied to
/// the configuration location, a generated config file written there, and
/// the tool installed at the requested version.
#[must_use]
pub fn ansible(opts: &AnsibleOpts) -> Composition {
    let version = crate::or_default(&opts.version, DEFAULT_ANSIBLE_VERSION);
    alpine(&AlpineOpts {
        version: DEFAULT_ALPINE_VERSION.to_string(),
        packages: PackageSpec::from_names(&PACKAGES),
    })
    .with_directory(ANSIBLE_CONFIG_LOCATION, opts.project.clone())
    .with_env(ANSIBLE_CONFIG_ENV, ANSIBLE_CONFIG_LOCATION)
    .with_new_file(
        format!("{ANSIBLE_CONFIG_LOCATION}/{ANSIBLE_CONFIG_FILE}"),
        opts.config.as_str(),
    )
    .with_exec(["pip3", "install", format!("ansible=={version}").as_str()])
}

#[cfg(test)]
mod tests {
    use dockyard_core::operation::Operation;

    use super::*;

    #[test]
    fn ansible_writes_config_and_installs_version() {
        let opts = AnsibleOpts {
            version: "7.1".into(),
            project: DirectorySource::host("/work/playbooks"),
            config: "[defaults]\ninventory = hosts\n".into(),
        };
        let ops = ansible(&opts).operations();
        // base, index refresh, one install per package, then four steps
        assert_eq!(ops.len(), 2 + PACKAGES.len() + 4);
        assert_eq!(
            ops[ops.len() - 2],
            Operation::NewFile {
                path: "/etc/ansible/ansible.cfg".into(),
                contents: "[defaults]\ninventory = hosts\n".into(),
                permissions: Operation::DEFAULT_FILE_PERMISSIONS,
            }
        );
        assert_eq!(ops[ops.len() - 1].to_string(), "exec [pip3 install ansible==7.1]");
    }

    #[test]
    fn ansible_points_env_at_config_location() {
        let ops = ansible(&AnsibleOpts::default()).operations();
        assert!(ops.contains(&Operation::Env {
            key: "ANSIBLE_CONFIG_LOCATION".into(),
            value: "/etc/ansible".into(),
        }));
        assert!(ops.contains(&Operation::WithDirectory {
            path: "/etc/ansible".into(),
            source: DirectorySource::Empty,
        }));
    }

    #[test]
    fn ansible_empty_version_uses_default() {
        let ops = ansible(&AnsibleOpts::default()).operations();
        assert_eq!(
            ops.last().map(ToString::to_string).as_deref(),
            Some("exec [pip3 install ansible==7.1]")
        );
    }
}
