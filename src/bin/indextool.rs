//! indextool: sparse-index builder for catalog blobs.
//!
//! Given one or more serialized catalog files, opens every capture file each
//! catalog references, samples `(timestamp, offset)` pairs at the requested
//! rate, and writes the catalog back with the sparse index attached. Can
//! also print a catalog's entries or rewrite the base path its entries point
//! at.
//!
//! Per-catalog failures are reported and skipped; the exit code is non-zero
//! only when every input failed.

use bgpvault::archive::{generate_index, Catalog, EntryOffset};
use bgpvault::mrt::{open_record_reader, record_timestamp};
use clap::Parser;
use std::path::{Component, Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "indextool")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build sparse intra-file indexes for bgpvault catalog blobs")]
struct Cli {
    /// Catalog blob files to process
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Suffix appended to the output catalog filename
    #[arg(short = 'o', long = "outsuffix", default_value = "")]
    outsuffix: String,

    /// Sample rate in (0, 1]; the index gets floor(1/rate) slots per file
    #[arg(short = 'r', long = "rate", default_value_t = 0.1)]
    rate: f64,

    /// Print catalog entries to stdout instead of writing an index
    #[arg(short = 'p', long = "print")]
    print: bool,

    /// Replace the common base path of all entries with this path
    #[arg(long = "bp")]
    basepath: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut failures = 0usize;
    for file in &cli.files {
        let result = if cli.print {
            print_catalog(file)
        } else {
            index_catalog(file, &cli.outsuffix, cli.rate, cli.basepath.as_deref())
        };
        if let Err(err) = result {
            eprintln!("{}: {err}", file.display());
            failures += 1;
        }
    }

    if failures == cli.files.len() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn print_catalog(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = Catalog::from_blob(path)?;
    println!("------ {} ------", path.display());
    for entry in catalog.iter() {
        println!("{entry}");
    }
    Ok(())
}

fn index_catalog(
    path: &Path,
    outsuffix: &str,
    rate: f64,
    basepath: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut catalog = Catalog::from_blob(path)?;

    if let Some(basepath) = basepath {
        rewrite_base(&mut catalog, basepath);
    }

    for entry in catalog.entries_mut() {
        let mut reader = match open_record_reader(&entry.path) {
            Ok(reader) => reader,
            Err(err) => {
                eprintln!("error opening {}: {err}", entry.path.display());
                continue;
            }
        };
        let index = generate_index(&mut reader, entry.size, rate, record_timestamp);
        let offsets: Vec<EntryOffset> = index
            .into_iter()
            .enumerate()
            .filter_map(|(slot, item)| match item {
                Some(item) => Some(EntryOffset {
                    value: item.value,
                    offset: item.offset,
                }),
                None => {
                    eprintln!("{}: no record sampled in slot {slot}", entry.path.display());
                    None
                }
            })
            .collect();
        entry.offsets = Some(offsets);
    }

    let mut output = path.as_os_str().to_owned();
    output.push(outsuffix);
    catalog.to_blob(Path::new(&output))?;
    Ok(())
}

/// Replace the longest common directory prefix of all entry paths with
/// `base`. The common prefix is computed component-wise, so partial
/// directory names never match.
fn rewrite_base(catalog: &mut Catalog, base: &Path) {
    let Some(prefix) = common_prefix(catalog) else {
        return;
    };
    for entry in catalog.entries_mut() {
        if let Ok(rest) = entry.path.strip_prefix(&prefix) {
            entry.path = base.join(rest);
        }
    }
}

fn common_prefix(catalog: &Catalog) -> Option<PathBuf> {
    let mut entries = catalog.iter();
    let mut prefix: Vec<Component> = entries.next()?.path.parent()?.components().collect();
    for entry in entries {
        let parent = entry.path.parent()?;
        let shared = prefix
            .iter()
            .zip(parent.components())
            .take_while(|(a, b)| **a == *b)
            .count();
        prefix.truncate(shared);
    }
    if prefix.is_empty() {
        None
    } else {
        Some(prefix.iter().copied().collect())
    }
}
