//! `dockyard images`: Manage the local base-image catalog.

use std::fmt::Write as _;

use clap::{Args, Subcommand};
use dockyard_common::types::{ImageRef, Platform};
use dockyard_engine::registry::{ImageCatalog, ImageEntry};

use super::Context;
use crate::output::{BOLD, GREEN, RESET};

/// Arguments for the `images` command.
#[derive(Args, Debug)]
pub struct ImagesArgs {
    /// Catalog action.
    #[command(subcommand)]
    pub action: ImagesAction,
}

/// Catalog actions.
#[derive(Subcommand, Debug)]
pub enum ImagesAction {
    /// Register a base image.
    Add {
        /// Image reference, e.g. `alpine:3.17.1`.
        name: ImageRef,
        /// Root filesystem source: `file://<dir>`, `tar://<archive>`, or
        /// an `https://` archive URL.
        source: String,
        /// Expected SHA-256 of a remote archive.
        #[arg(long)]
        sha256: Option<String>,
        /// Restrict the entry to one platform, e.g. `linux/arm64`.
        #[arg(long)]
        platform: Option<Platform>,
    },
    /// List registered base images.
    List {
        /// Print the catalog as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove every entry registered under a name.
    Remove {
        /// Image reference to remove.
        name: ImageRef,
    },
}

/// Executes the `images` command.
///
/// # Errors
///
/// Returns an error if catalog operations fail.
#[allow(clippy::print_stdout)]
pub fn execute(args: ImagesArgs, ctx: &Context) -> anyhow::Result<()> {
    let catalog = ImageCatalog::open(&ctx.engine.data_dir)?;
    match args.action {
        ImagesAction::Add {
            name,
            source,
            sha256,
            platform,
        } => {
            let mut entry = ImageEntry::new(&name, source);
            if let Some(sha256) = sha256 {
                entry = entry.with_sha256(sha256);
            }
            if let Some(platform) = platform {
                entry = entry.with_platform(platform);
            }
            catalog.register(entry)?;
            eprintln!("{BOLD}{GREEN}Registered{RESET} {name}");
        }
        ImagesAction::List { json } => {
            let entries = catalog.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print!("{}", render_table(&entries));
            }
        }
        ImagesAction::Remove { name } => {
            catalog.remove(&name.to_string())?;
            eprintln!("{BOLD}{GREEN}Removed{RESET} {name}");
        }
    }
    Ok(())
}

fn render_table(entries: &[ImageEntry]) -> String {
    let mut table = String::from("NAME\tPLATFORM\tSOURCE\tCREATED\n");
    for entry in entries {
        let platform = entry
            .platform
            .map_or_else(|| "any".to_string(), |p| p.to_string());
        let _ = writeln!(
            table,
            "{}\t{platform}\t{}\t{}",
            entry.name, entry.source, entry.created_at
        );
    }
    table
}

#[cfg(test)]
mod tests {
    use dockyard_common::types::{Arch, Os};

    use super::*;

    #[test]
    fn render_table_lists_platform_or_any() {
        let image = ImageRef::parse("alpine:3.17.1").expect("reference");
        let entries = vec![
            ImageEntry::new(&image, "file:///images/alpine"),
            ImageEntry::new(&image, "file:///images/alpine-arm")
                .with_platform(Platform::new(Os::Linux, Arch::Arm64)),
        ];
        let table = render_table(&entries);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("NAME\tPLATFORM"));
        assert!(lines[1].starts_with("alpine:3.17.1\tany\tfile:///images/alpine\t"));
        assert!(lines[2].starts_with("alpine:3.17.1\tlinux/arm64\t"));
    }

    #[test]
    fn render_table_with_no_entries_prints_header_only() {
        assert_eq!(render_table(&[]), "NAME\tPLATFORM\tSOURCE\tCREATED\n");
    }
}
