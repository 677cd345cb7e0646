use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use template_pdf::storage::{DirectoryStore, TemplateLibrary};
use template_pdf::{Error, ExportStrategy, ValueMap, archive, variables};

#[derive(Parser)]
#[command(name = "template-pdf", about = "Render document templates to print-ready PDF")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fill in a template and write a PDF
    Render {
        /// Template file (.json or .zip)
        input: PathBuf,
        /// JSON object mapping tokens to values
        #[arg(long)]
        values: Option<PathBuf>,
        /// Output PDF file (defaults to input with .pdf extension)
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Capture one page as an image instead of writing vector output
        #[arg(long)]
        raster: bool,
    },
    /// Validate a template and list the tokens it uses
    Check {
        input: PathBuf,
        #[arg(long)]
        values: Option<PathBuf>,
    },
    /// List the template variables that can be inserted
    Variables,
    /// Store a template file in the library under a name
    Save {
        name: String,
        input: PathBuf,
        #[arg(long)]
        store: PathBuf,
    },
    /// Write a stored template to a file (.json or .zip)
    Load {
        name: String,
        output: PathBuf,
        #[arg(long)]
        store: PathBuf,
    },
    /// List stored templates
    List {
        #[arg(long)]
        store: PathBuf,
    },
    /// Remove a stored template
    Delete {
        name: String,
        #[arg(long)]
        store: PathBuf,
    },
}

fn require_file(path: &Path) -> Result<(), Error> {
    if !path.exists() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("file not found: {}", path.display()),
        )));
    }
    if !path.is_file() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("not a file: {}", path.display()),
        )));
    }
    Ok(())
}

fn load_values(path: Option<&Path>) -> Result<ValueMap, Error> {
    match path {
        Some(path) => {
            require_file(path)?;
            template_pdf::read_values(path)
        }
        None => Ok(ValueMap::new()),
    }
}

fn library(store: &Path) -> Result<TemplateLibrary<DirectoryStore>, Error> {
    Ok(TemplateLibrary::new(DirectoryStore::open(store)?))
}

fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Render {
            input,
            values,
            output,
            raster,
        } => {
            require_file(&input)?;
            let values = load_values(values.as_deref())?;
            let output = output.unwrap_or_else(|| input.with_extension("pdf"));
            let strategy = if raster {
                ExportStrategy::Raster
            } else {
                ExportStrategy::NativePrint
            };
            template_pdf::render_pdf_file(&input, &values, strategy, &output)?;
            println!("{}", output.display());
        }
        Command::Check { input, values } => {
            require_file(&input)?;
            let model = archive::import_file(&input)?;
            let values = load_values(values.as_deref())?;
            let geometry = model.geometry();
            let page = geometry.page_mm();
            println!(
                "{}: {} x {} mm, margin {} mm, {} page(s), {} object(s)",
                if model.title.is_empty() { "(untitled)" } else { model.title.as_str() },
                page.width,
                page.height,
                geometry.margin_mm,
                model.total_pages,
                model.objects.len()
            );
            let unresolved = variables::unresolved_tokens(&model, &values);
            for token in variables::tokens_in(&model.content) {
                let status = if unresolved.contains(&token) { "unresolved" } else { "ok" };
                println!("  {token} {status}");
            }
        }
        Command::Variables => {
            for variable in variables::catalogue() {
                println!("{:<14} {:<24} {}", variable.group, variable.key, variable.label);
            }
        }
        Command::Save { name, input, store } => {
            require_file(&input)?;
            let model = archive::import_file(&input)?;
            library(&store)?.save(&name, &model)?;
        }
        Command::Load {
            name,
            output,
            store,
        } => {
            let Some(model) = library(&store)?.load(&name)? else {
                return Err(Error::Storage(format!("no template named '{name}'")));
            };
            archive::export_file(&model, &output, None)?;
        }
        Command::List { store } => {
            for summary in library(&store)?.summaries()? {
                println!(
                    "{:<24} {:<32} {} objects, updated {}",
                    summary.name,
                    summary.title,
                    summary.objects,
                    summary.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Delete { name, store } => {
            if !library(&store)?.delete(&name)? {
                return Err(Error::Storage(format!("no template named '{name}'")));
            }
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args.command) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
