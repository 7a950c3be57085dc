use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use log::info;
use serde_json::Value;

use ogframe::capture::FsLoader;
use ogframe::editor::upload::FsUploader;
use ogframe::template::TemplateRegistry;
use ogframe::{Editor, EditorConfig, EditorOptions, SourceDocument};

#[derive(Parser)]
#[command(name = "ogframe", version, about = "Render social preview images from layout templates")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a layout for a document and write the PNG
    Render(RenderArgs),
    /// Print the form directives of a layout as JSON
    Fields(SessionArgs),
}

#[derive(Args)]
struct SessionArgs {
    /// Layout registry (JSON)
    #[arg(long)]
    layouts: PathBuf,
    /// Source document (JSON object with an `_id`)
    #[arg(long)]
    document: PathBuf,
    /// Layout id; defaults to the first layout of the registry
    #[arg(long)]
    layout: Option<String>,
    /// Editor configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct RenderArgs {
    #[command(flatten)]
    session: SessionArgs,
    /// Field edits, `path=value`; values are parsed as JSON, else taken as text
    #[arg(long = "set", value_name = "PATH=VALUE")]
    edits: Vec<String>,
    /// Directory the PNG is written to
    #[arg(long, default_value = "out")]
    out_dir: PathBuf,
    /// Font replacing the bundled DejaVu Sans (TTF/OTF)
    #[arg(long)]
    font: Option<PathBuf>,
    /// Directory relative image and font URLs resolve against
    #[arg(long)]
    assets: Option<PathBuf>,
}

fn parse_edit(edit: &str) -> anyhow::Result<(&str, Value)> {
    let Some((path, raw)) = edit.split_once('=') else {
        bail!("edit {:?} is not of the form path=value", edit);
    };
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((path.trim(), value))
}

fn open_editor(session: &SessionArgs, options: EditorOptions, assets: PathBuf, out_dir: PathBuf) -> anyhow::Result<Editor> {
    let registry = TemplateRegistry::from_path(&session.layouts)
        .with_context(|| format!("reading layouts from {}", session.layouts.display()))?;
    let layouts = registry.into_definitions(&options.config)?;

    let text = std::fs::read_to_string(&session.document)
        .with_context(|| format!("reading document {}", session.document.display()))?;
    let document: SourceDocument = serde_json::from_str(&text).context("parsing document")?;

    let mut editor = Editor::new(
        layouts,
        document,
        options,
        Arc::new(FsLoader::new(assets)),
        Arc::new(FsUploader::new(out_dir)),
    )?;
    if let Some(id) = &session.layout {
        if !editor.select_layout(id)? {
            bail!("no layout with id {:?}", id);
        }
    }
    Ok(editor)
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<EditorConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
            Ok(serde_json::from_str(&text).context("parsing config")?)
        }
        None => Ok(EditorConfig::default()),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Command::Fields(session) => {
            let options = EditorOptions {
                config: load_config(session.config.as_ref())?,
                ..EditorOptions::default()
            };
            let editor = open_editor(&session, options, PathBuf::from("."), PathBuf::from("out"))?;
            println!("{}", serde_json::to_string_pretty(&editor.directives())?);
        }
        Command::Render(args) => {
            let default_font = match &args.font {
                Some(path) => Some(std::fs::read(path).with_context(|| format!("reading font {}", path.display()))?),
                None => None,
            };
            let options = EditorOptions {
                config: load_config(args.session.config.as_ref())?,
                default_font,
                ..EditorOptions::default()
            };
            let assets = args.assets.clone().unwrap_or_else(|| {
                args.session
                    .layouts
                    .parent()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("."))
            });
            let mut editor = open_editor(&args.session, options, assets, args.out_dir.clone())?;
            for edit in &args.edits {
                let (path, value) = parse_edit(edit)?;
                editor.edit(path, value).with_context(|| format!("applying {}", edit))?;
            }
            let asset = editor.generate().await.context("generating image")?;
            info!("{} image ready", editor.active_layout().id);
            println!("{}", asset.location);
        }
    }
    Ok(())
}
