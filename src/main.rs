use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::{info, Level};

use stencil_pdf::fonts::suggest_font;
use stencil_pdf::logging::{init_logging, LogOptions};
use stencil_pdf::{
    Alignment, Engine, EngineConfig, EraseMode, FillDiagnostics, FillFieldSpec, FillOutcome, FontSelection, HAlign,
    ProviderPolicy, ProviderUsed, SizeMode, VAlign,
};

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about,
    long_about = "Detect {{placeholder}} tokens in PDFs and fill them in place.",
    arg_required_else_help = true
)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,

    /// Log level for stderr (and the log file, if any)
    #[clap(long, global = true, default_value = "info")]
    pub log_level: Level,

    /// Also write logs to `stencil.log` in this directory
    #[clap(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// JSON engine configuration; environment variables apply when omitted
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,

    /// Trace every content-stream decision of the extractor and redactor
    #[clap(long, global = true)]
    pub debug_ops: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the detected placeholders as JSON
    Detect {
        pdf: PathBuf,
        #[clap(long, default_value = "auto")]
        provider: ProviderPolicy,
    },
    /// List the fonts referenced by the document
    Fonts { pdf: PathBuf },
    /// Fill placeholders and write the result
    Fill(FillArgs),
    /// Report whether the OCR engine is usable
    OcrStatus,
}

#[derive(clap::Args, Debug)]
pub struct FillArgs {
    pub pdf: PathBuf,

    /// JSON object of key to value, or a list of full fill specs
    #[clap(long)]
    pub values: PathBuf,

    #[clap(short, long)]
    pub out: PathBuf,

    #[clap(long, default_value = "auto")]
    pub provider: ProviderPolicy,

    #[clap(long, value_enum, default_value_t = EraseArg::Redact)]
    pub erase: EraseArg,

    /// `default`, `auto` (reuse the placeholder's own font), `suggest`
    /// (best embedded font), a font file, or `<num> <gen> R`
    #[clap(long, default_value = "default")]
    pub font: String,

    #[clap(long, value_enum, default_value_t = HAlignArg::Center)]
    pub align: HAlignArg,

    #[clap(long, value_enum, default_value_t = VAlignArg::Middle)]
    pub valign: VAlignArg,

    #[clap(long, default_value_t = 6.0)]
    pub min: f32,

    #[clap(long, default_value_t = 14.0)]
    pub max: f32,

    /// Use this size instead of auto-sizing
    #[clap(long)]
    pub fixed: Option<f32>,

    /// Text colour as `r,g,b` in 0-1 or 0-255
    #[clap(long)]
    pub color: Option<String>,

    /// Pretty-print the report
    #[clap(short, long)]
    pub pretty: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum EraseArg {
    Redact,
    None,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum HAlignArg {
    Start,
    Center,
    End,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum VAlignArg {
    Top,
    Middle,
    Baseline,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }
}

/// `values.json`: either `{"key": "value"}` or `[FillFieldSpec, ...]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ValuesFile {
    Map(BTreeMap<String, String>),
    Specs(Vec<FillFieldSpec>),
}

#[derive(Serialize)]
struct FillSummary<'a> {
    output: &'a Path,
    provider_used: ProviderUsed,
    detection_warning: Option<&'a str>,
    font_used: &'a [String],
    font_embedded: bool,
    missing_keys: Vec<&'a str>,
    outcomes: &'a [FillOutcome],
    diagnostics: &'a FillDiagnostics,
}

fn parse_color(raw: &str) -> anyhow::Result<[f32; 3]> {
    let parts: Vec<f32> = raw
        .split(',')
        .map(|p| p.trim().parse::<f32>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("invalid colour '{raw}'"))?;
    let [r, g, b] = parts.as_slice() else {
        bail!("colour '{raw}' must have three components");
    };
    let scale = if [r, g, b].iter().any(|c| **c > 1.0) { 255.0 } else { 1.0 };
    Ok([r / scale, g / scale, b / scale])
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
        }
        None => Ok(EngineConfig::from_env()),
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}

fn read_pdf(engine: &Engine, path: &Path) -> anyhow::Result<stencil_pdf::PdfDocument> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    engine
        .load(&bytes)
        .with_context(|| format!("loading {}", path.display()))
}

fn fill_specs(args: &FillArgs, engine: &Engine, doc: &stencil_pdf::PdfDocument) -> anyhow::Result<Vec<FillFieldSpec>> {
    let raw = fs::read_to_string(&args.values).with_context(|| format!("reading {}", args.values.display()))?;
    let values: ValuesFile =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", args.values.display()))?;

    let font = match args.font.trim() {
        "suggest" => {
            let fonts = engine.list_fonts(doc);
            match suggest_font(&fonts).and_then(|f| f.object_id) {
                Some(id) => FontSelection::Embedded(id),
                None => {
                    info!("no reusable embedded font, using the default");
                    FontSelection::Default
                }
            }
        }
        other => other.parse::<FontSelection>().map_err(|e| anyhow!(e))?,
    };
    let text_color = args.color.as_deref().map(parse_color).transpose()?;

    let specs = match values {
        ValuesFile::Specs(specs) => specs,
        ValuesFile::Map(map) => map
            .into_iter()
            .map(|(key, value)| FillFieldSpec {
                align: Alignment {
                    horizontal: match args.align {
                        HAlignArg::Start => HAlign::Start,
                        HAlignArg::Center => HAlign::Center,
                        HAlignArg::End => HAlign::End,
                    },
                    vertical: match args.valign {
                        VAlignArg::Top => VAlign::Top,
                        VAlignArg::Middle => VAlign::Middle,
                        VAlignArg::Baseline => VAlign::Baseline,
                    },
                },
                min_font_size: args.min,
                max_font_size: args.max,
                size_mode: if args.fixed.is_some() {
                    SizeMode::Fixed
                } else {
                    SizeMode::Auto
                },
                fixed_font_size: args.fixed,
                text_color,
                font: font.clone(),
                erase_mode: match args.erase {
                    EraseArg::Redact => EraseMode::Redact,
                    EraseArg::None => EraseMode::None,
                },
                ..FillFieldSpec::new(&key, &value)
            })
            .collect(),
    };
    Ok(specs)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse_args();

    let config = load_config(args.config.as_deref())?;
    // Keep the guard alive or buffered file output is lost.
    let _guard = init_logging(&LogOptions {
        level: args.log_level,
        debug_content: args.debug_ops,
        debug_fonts: config.fonts.verbose_diagnostics,
        log_dir: args.log_dir.clone(),
    })
    .context("initializing logging")?;

    match &args.command {
        Command::Detect { pdf, provider } => {
            let engine = Engine::new(config);
            let doc = read_pdf(&engine, pdf)?;
            print_json(&engine.detect(&doc, *provider), true)?;
        }
        Command::Fonts { pdf } => {
            let engine = Engine::local_only(config);
            let doc = read_pdf(&engine, pdf)?;
            print_json(&engine.list_fonts(&doc), true)?;
        }
        Command::OcrStatus => {
            let engine = Engine::new(config);
            print_json(&engine.ocr_status(), true)?;
        }
        Command::Fill(fill) => {
            let engine = if fill.provider == ProviderPolicy::Local {
                Engine::local_only(config)
            } else {
                Engine::new(config)
            };
            let doc = read_pdf(&engine, &fill.pdf)?;
            let specs = fill_specs(fill, &engine, &doc)?;
            let (detection, report) = engine.detect_and_fill(doc, fill.provider, &specs)?;

            fs::write(&fill.out, &report.bytes).with_context(|| format!("writing {}", fill.out.display()))?;
            info!(out = %fill.out.display(), bytes = report.bytes.len(), "filled document written");

            let summary = FillSummary {
                output: &fill.out,
                provider_used: detection.provider_used,
                detection_warning: detection.warning.as_deref(),
                font_used: &report.diagnostics.font_used,
                font_embedded: report.diagnostics.font_embedded,
                missing_keys: report.diagnostics.missing_keys.iter().map(String::as_str).collect(),
                outcomes: &report.outcomes,
                diagnostics: &report.diagnostics,
            };
            print_json(&summary, fill.pretty)?;
        }
    }

    Ok(())
}
