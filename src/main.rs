//! aproj: save, load and inspect alignment workbench project archives.

use std::collections::HashSet;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;

use aform_project::archive::{self, LoadedProject, Report};
use aform_project::config::Config;
use aform_project::error::ArchiveError;
use aform_project::model::{Container, Workspace};
use aform_project::stockholm;

/// Project archive tool for multi-view alignment workbenches.
#[derive(Parser, Debug)]
#[command(name = "aproj")]
#[command(author, version, about, long_about = None)]
#[command(after_help = AFTER_HELP)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a one-view project from a Stockholm alignment.
    Import {
        /// Stockholm alignment file.
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Archive to write.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Write one view of a project as Stockholm.
    Export {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
        /// Index of the view to export.
        #[arg(long, default_value_t = 0)]
        view: usize,
        /// Stockholm file to write.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Load a project and list its views, windows and viewers.
    Inspect {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Load a project and save it again.
    Resave {
        #[arg(value_name = "IN")]
        input: PathBuf,
        #[arg(value_name = "OUT")]
        output: PathBuf,
        /// Sequence-set ID whose views are dropped (repeatable).
        #[arg(long, value_name = "SEQSET")]
        skip: Vec<String>,
    },
}

const AFTER_HELP: &str = "\
CONFIGURATION:
  Settings are read from ./aproj.toml or ~/.config/aproj/aproj.toml:
    compression = 6        gzip level for saved archives
    history_limit = 100    undo depth of loaded views
    extract_dir = \"files\"  where copied structure files are written on load
    id_salt = \"_fixed\"     fixed suffix for generated IDs

LOGGING:
  Set RUST_LOG=debug to trace every archive entry.
";

#[derive(Serialize)]
struct ViewSummary {
    id: String,
    sequence_set_id: String,
    title: String,
    molecule: String,
    sequences: usize,
    width: usize,
    annotations: usize,
    groups: usize,
    viewers: Vec<String>,
}

#[derive(Serialize)]
struct ViewerSummary {
    id: String,
    kind: String,
    views: Vec<String>,
    bindings: usize,
}

#[derive(Serialize)]
struct Inspection<'a> {
    views: Vec<ViewSummary>,
    windows: &'a [Container],
    viewers: Vec<ViewerSummary>,
    report: &'a Report,
}

fn inspect<'a>(workspace: &'a Workspace, report: &'a Report) -> Inspection<'a> {
    let views = workspace
        .views
        .iter()
        .map(|view| {
            let v = view.borrow();
            let alignment = v.alignment.borrow();
            ViewSummary {
                id: v.id.clone(),
                sequence_set_id: v.sequence_set_id.clone(),
                title: v.title().to_string(),
                molecule: alignment.molecule.to_string(),
                sequences: alignment.num_sequences(),
                width: alignment.width(),
                annotations: alignment.annotations.len(),
                groups: alignment.groups.len(),
                viewers: v.viewer_links.iter().map(|l| l.viewer_id.clone()).collect(),
            }
        })
        .collect();
    let viewers = workspace
        .viewers
        .values()
        .map(|viewer| {
            let viewer = viewer.borrow();
            ViewerSummary {
                id: viewer.id.clone(),
                kind: viewer.kind().to_string(),
                views: viewer.views.clone(),
                bindings: viewer.bindings.len(),
            }
        })
        .collect();
    Inspection {
        views,
        windows: &workspace.containers,
        viewers,
        report,
    }
}

fn print_inspection(inspection: &Inspection<'_>) {
    println!("Views:");
    for v in &inspection.views {
        println!(
            "  {} [{}] \"{}\" {} x {} {} ({} annotations, {} groups)",
            v.id, v.sequence_set_id, v.title, v.sequences, v.width, v.molecule, v.annotations, v.groups
        );
        if !v.viewers.is_empty() {
            println!("    viewers: {}", v.viewers.join(", "));
        }
    }
    println!("Windows:");
    for window in inspection.windows {
        match window {
            Container::Standalone { view } => println!("  standalone: {view}"),
            Container::Tabbed {
                sequence_set_id,
                views,
            } => println!("  tabs [{sequence_set_id}]: {}", views.join(", ")),
            Container::Split {
                nucleotide,
                protein,
            } => println!("  split: {nucleotide} | {protein}"),
        }
    }
    if !inspection.viewers.is_empty() {
        println!("Viewers:");
        for viewer in &inspection.viewers {
            println!(
                "  {} ({}) shown in {} with {} sequence bindings",
                viewer.id,
                viewer.kind,
                viewer.views.join(", "),
                viewer.bindings
            );
        }
    }
    if !inspection.report.is_empty() {
        println!("Warnings:");
        for warning in &inspection.report.warnings {
            println!("  {warning}");
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let args = Args::parse();
    let (config, loaded) = Config::load();
    if loaded {
        info!("using settings from aproj.toml");
    }

    match args.command {
        Command::Import { file, output } => {
            let view = stockholm::import_view(&file).map_err(ArchiveError::from)?;
            let mut workspace = Workspace::new();
            workspace.containers.push(Container::Standalone {
                view: view.borrow().id.clone(),
            });
            workspace.add_view(view);
            let report = archive::save_all(&workspace, &output, &config.save_options(HashSet::new()))?;
            info!("wrote {} ({} warnings)", output.display(), report.len());
        }
        Command::Export {
            archive: path,
            view,
            output,
        } => {
            let LoadedProject { workspace, .. } =
                archive::load(&path, config.load_options(HashSet::new()))?;
            let selected = workspace
                .views
                .get(view)
                .ok_or(ArchiveError::NoSuchView(view))?;
            stockholm::writer::write_file(&selected.borrow(), &output)?;
            info!("wrote {}", output.display());
        }
        Command::Inspect { archive: path, json } => {
            let project = archive::load(&path, config.load_options(HashSet::new()))?;
            let inspection = inspect(&project.workspace, &project.report);
            if json {
                println!("{}", serde_json::to_string_pretty(&inspection)?);
            } else {
                print_inspection(&inspection);
            }
        }
        Command::Resave {
            input,
            output,
            skip,
        } => {
            let skip: HashSet<String> = skip.into_iter().collect();
            let project = archive::load(&input, config.load_options(skip))?;
            let mut report = project.report;
            report.extend(archive::save_all(
                &project.workspace,
                &output,
                &config.save_options(HashSet::new()),
            )?);
            if !report.is_empty() {
                eprintln!("{}", report.summary());
            }
            info!("wrote {}", output.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspection_borrows_workspace_and_report() {
        let mut workspace = Workspace::new();
        workspace.containers.push(Container::Standalone {
            view: "V1".to_string(),
        });
        let report = Report::new();
        let inspection = inspect(&workspace, &report);
        assert!(inspection.views.is_empty());
        assert_eq!(inspection.windows.len(), 1);
        let json = serde_json::to_value(&inspection).unwrap();
        assert_eq!(json["windows"].as_array().map(Vec::len), Some(1));
        assert!(json["report"].is_object());
    }
}
