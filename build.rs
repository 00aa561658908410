//! Build script for generating the `avh-harness` man pages.
//!
//! The packaging pipeline expects the man pages to be available from the
//! build output directory, so we generate them using clap-mangen here: one
//! page for the top-level command and one per subcommand.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let root = Cli::command();
    render(root.clone(), &out_dir.join("avh-harness.1"))?;
    for subcommand in root.get_subcommands() {
        let name = format!("avh-harness-{}", subcommand.get_name());
        let page = out_dir.join(format!("{name}.1"));
        render(subcommand.clone().name(name), &page)?;
    }

    Ok(())
}

fn render(command: clap::Command, page: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut buffer = Vec::new();
    Man::new(command).render(&mut buffer)?;
    let mut file = File::create(page)?;
    file.write_all(&buffer)?;
    Ok(())
}
