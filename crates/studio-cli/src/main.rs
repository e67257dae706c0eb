use std::fs;
use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use studio_contracts::chat::{parse_intent, Intent, SESSION_HELP_COMMANDS};
use studio_contracts::events::EventKind;
use studio_contracts::flags::{
    FlagScope, UsageQuota, DEFAULT_DAILY_LIMIT, FEEDBACK_SUBMITTED_FLAG, UPDATE_NOTICE_FLAG,
};
use studio_contracts::image::mime_for_extension;
use studio_contracts::{
    compile, AdjustmentSettings, AspectRatio, BackdropStyle, Completion, ImageBuffer, Intensity,
    ObjectPreset,
};
use studio_engine::{
    default_editor_registry, EditorConfig, GenerationReport, ImageEditor, StudioEngine,
};

#[derive(Debug, Parser)]
#[command(name = "studio-rs", version, about = "Studio photo editing CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import one image, generate, and export the result.
    Edit(EditArgs),
    /// Interactive slash-command session.
    Session(SessionArgs),
    /// Print the compiled prompt for a set of settings.
    Prompt(PromptArgs),
}

#[derive(Debug, Clone, Args)]
struct EditorArgs {
    #[arg(long, default_value = "gemini")]
    editor: String,
    #[arg(long)]
    env_file: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Generated images allowed per UTC day.
    #[arg(long, default_value_t = DEFAULT_DAILY_LIMIT)]
    daily_limit: u32,
}

#[derive(Debug, Clone, Args)]
struct SettingsArgs {
    #[arg(long, default_value = "standard")]
    intensity: String,
    #[arg(long, default_value = "clean")]
    style: String,
    #[arg(long)]
    preset: Option<String>,
    #[arg(long)]
    asset: Option<PathBuf>,
    #[arg(long)]
    custom: Option<String>,
    #[arg(long, default_value_t = 1)]
    count: usize,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[command(flatten)]
    editor: EditorArgs,
    #[command(flatten)]
    settings: SettingsArgs,
    /// Candidate to keep when more than one variation is generated.
    #[arg(long, default_value_t = 0)]
    pick: usize,
    #[arg(long)]
    save: Option<PathBuf>,
    /// Painted mask; every non-black pixel marks the area to replace.
    #[arg(long, requires = "replace")]
    mask: Option<PathBuf>,
    /// What to put in the masked area.
    #[arg(long, requires = "mask")]
    replace: Option<String>,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    #[arg(long)]
    out: PathBuf,
    #[command(flatten)]
    editor: EditorArgs,
}

#[derive(Debug, Parser)]
struct PromptArgs {
    #[command(flatten)]
    settings: SettingsArgs,
    #[arg(long, default_value_t = 1)]
    width: u32,
    #[arg(long, default_value_t = 1)]
    height: u32,
}

impl SettingsArgs {
    fn to_settings(&self) -> Result<AdjustmentSettings> {
        let mut settings = AdjustmentSettings::default()
            .with_intensity(self.intensity.parse::<Intensity>()?)
            .with_backdrop_style(self.style.parse::<BackdropStyle>()?);
        if let Some(custom) = self.custom.as_deref() {
            settings = settings.with_custom_instructions(custom);
        }
        if let Some(asset) = self.asset.as_deref() {
            settings = settings.with_swap_asset(read_image(asset)?);
        } else if let Some(preset) = self.preset.as_deref() {
            settings = settings.with_swap_preset(preset.parse::<ObjectPreset>()?);
        }
        Ok(settings.with_variation_count(self.count)?)
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("studio-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Edit(args) => run_edit(args),
        Command::Session(args) => {
            run_session(args)?;
            Ok(0)
        }
        Command::Prompt(args) => run_prompt(args),
    }
}

fn resolve_editor(args: &EditorArgs) -> Result<Arc<dyn ImageEditor>> {
    let config = match args.env_file.as_deref() {
        Some(path) => EditorConfig::from_env_with_dotenv(path),
        None => EditorConfig::from_env_with_dotenv(Path::new(".env")),
    };
    let registry = default_editor_registry(&config)?;
    let Some(editor) = registry.get(&args.editor) else {
        bail!(
            "unknown editor '{}' (available: {})",
            args.editor,
            registry.names().join(", ")
        );
    };
    if editor.name() == "gemini" && !config.has_credentials() {
        eprintln!("Warning: no API key or access token configured; requests will fail.");
    }
    Ok(editor)
}

fn open_engine(out: &Path, args: &EditorArgs) -> Result<StudioEngine> {
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| out.join("events.jsonl"));
    let quota = UsageQuota::new(out.join("flags.json"), args.daily_limit);
    Ok(StudioEngine::new(out, events_path, resolve_editor(args)?)?.with_usage_quota(quota))
}

fn run_edit(args: EditArgs) -> Result<i32> {
    let mut engine = open_engine(&args.out, &args.editor)?;
    let settings = args.settings.to_settings()?;
    engine.import(read_image(&args.input)?)?;
    engine.set_settings(settings)?;

    let report = match (args.mask.as_deref(), args.replace.as_deref()) {
        (Some(mask), Some(replacement)) => {
            engine.set_mask(&read_image(mask)?)?;
            engine.replace_object(replacement)?
        }
        _ => engine.generate()?,
    };
    let code = match &report.completion {
        Completion::Committed { .. } => 0,
        Completion::Ready { count } => {
            engine.select_preview(args.pick)?;
            engine.accept()?;
            println!("Kept variation {} of {count}", args.pick + 1);
            0
        }
        Completion::Failed { cause } => {
            eprintln!(
                "{}",
                engine.variations().error().unwrap_or("Generation failed.")
            );
            eprintln!("cause: {cause}");
            1
        }
        Completion::Stale => 1,
    };
    print_report_warnings(&mut io::stdout(), &report)?;

    if code == 0 {
        let path = engine.export_current(args.save.as_deref())?;
        println!("Saved {}", path.display());
    }
    engine.finish()?;
    Ok(code)
}

fn run_prompt(args: PromptArgs) -> Result<i32> {
    let settings = args.settings.to_settings()?;
    settings.validate()?;
    let compiled = compile(&settings);
    println!("{}", compiled.text);
    println!(
        "aspect_ratio: {}",
        AspectRatio::from_dimensions(args.width, args.height)
    );
    if let Some(reference) = compiled.reference_image.as_ref() {
        println!("reference_image: sha256:{}", reference.digest());
    }
    Ok(0)
}

fn run_session(args: SessionArgs) -> Result<()> {
    let mut engine = open_engine(&args.out, &args.editor)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let result = run_session_loop(&mut engine, &mut stdin.lock(), &mut stdout);
    engine.finish()?;
    result
}

/// Drives the engine from slash commands until end of input. Command
/// failures are reported and the loop continues.
fn run_session_loop<R: BufRead, W: Write>(
    engine: &mut StudioEngine,
    input: &mut R,
    out: &mut W,
) -> Result<()> {
    let started = Instant::now();
    writeln!(out, "Studio session started. Type /help for commands.")?;
    if !engine.flags().is_set(UPDATE_NOTICE_FLAG) {
        writeln!(
            out,
            "What's new: edit history with undo/redo, up to four variations per request."
        )?;
        engine
            .flags_mut()
            .set(UPDATE_NOTICE_FLAG, FlagScope::Persistent)?;
    }

    let mut line = String::new();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let intent = parse_intent(line.trim_end_matches(['\n', '\r']));
        if intent.action == "noop" {
            continue;
        }
        if let Err(err) = handle_intent(engine, &intent, started, out) {
            writeln!(out, "{} failed: {err:#}", intent.action)?;
        }
    }
    Ok(())
}

fn handle_intent<W: Write>(
    engine: &mut StudioEngine,
    intent: &Intent,
    started: Instant,
    out: &mut W,
) -> Result<()> {
    match intent.action.as_str() {
        "help" => {
            writeln!(out, "Commands: {}", SESSION_HELP_COMMANDS.join(" "))?;
        }
        "load_image" => {
            let path = required_arg(intent, "path", "/load requires a path")?;
            let image = read_image(Path::new(path))?;
            let bytes = image.len();
            engine.import(image)?;
            writeln!(out, "Loaded {path} ({bytes} bytes)")?;
        }
        "set_intensity" => {
            let value = required_arg(intent, "intensity", "/intensity requires a value")?;
            let intensity = value.parse::<Intensity>()?;
            update_settings(engine, |settings| Ok(settings.with_intensity(intensity)))?;
            writeln!(out, "Intensity: {}", intensity.label())?;
        }
        "set_backdrop_style" => {
            let value = required_arg(intent, "style", "/style requires a value")?;
            let style = value.parse::<BackdropStyle>()?;
            update_settings(engine, |settings| Ok(settings.with_backdrop_style(style)))?;
            writeln!(out, "Style: {style}")?;
        }
        "set_preset" => {
            let value = required_arg(intent, "preset", "/preset requires a value")?;
            let preset = value.parse::<ObjectPreset>()?;
            update_settings(engine, |settings| Ok(settings.with_swap_preset(preset)))?;
            writeln!(out, "Preset: {}", preset.label())?;
        }
        "set_variation_count" => {
            let value = required_arg(intent, "count", "/count requires a number")?;
            let count: usize = value
                .parse()
                .with_context(|| format!("invalid count '{value}'"))?;
            update_settings(engine, |settings| Ok(settings.with_variation_count(count)?))?;
            writeln!(out, "Variations: {count}")?;
        }
        "set_custom_instructions" => {
            let text = intent.arg("text").unwrap_or_default().to_string();
            update_settings(engine, |settings| {
                Ok(settings.with_custom_instructions(text.clone()))
            })?;
            if text.is_empty() {
                writeln!(out, "Custom instructions cleared")?;
            } else {
                writeln!(out, "Custom instructions set")?;
            }
        }
        "set_swap_asset" => {
            let path = required_arg(intent, "path", "/asset requires a path")?;
            let asset = read_image(Path::new(path))?;
            update_settings(engine, |settings| Ok(settings.with_swap_asset(asset)))?;
            writeln!(out, "Asset set from {path}")?;
        }
        "clear_swap_asset" => {
            update_settings(engine, |settings| Ok(settings.without_swap_asset()))?;
            writeln!(out, "Asset cleared; choose a preset with /preset")?;
        }
        "generate" => {
            let report = engine.generate()?;
            print_report(engine, &report, out)?;
        }
        "set_mask" => {
            let path = required_arg(intent, "path", "/mask requires a path")?;
            let mask = engine.set_mask(&read_image(Path::new(path))?)?;
            writeln!(
                out,
                "Mask set: {}x{}, {:.0}% marked. Use /replace <object>.",
                mask.width,
                mask.height,
                mask.coverage * 100.0
            )?;
        }
        "clear_mask" => {
            if engine.clear_mask()? {
                writeln!(out, "Mask cleared")?;
            } else {
                writeln!(out, "No mask set")?;
            }
        }
        "replace_object" => {
            let text = required_arg(intent, "text", "/replace requires a description")?;
            let report = engine.replace_object(text)?;
            print_report(engine, &report, out)?;
        }
        "generate_with_instructions" => {
            let text = intent.prompt.clone().unwrap_or_default();
            update_settings(engine, |settings| Ok(settings.with_custom_instructions(text)))?;
            let report = engine.generate()?;
            print_report(engine, &report, out)?;
        }
        "select_preview" => {
            let value = required_arg(intent, "index", "/preview requires an index")?;
            let index: usize = value
                .parse()
                .with_context(|| format!("invalid index '{value}'"))?;
            // 1-based at the prompt.
            let index = index
                .checked_sub(1)
                .ok_or_else(|| anyhow!("preview index starts at 1"))?;
            let index = engine.select_preview(index)?;
            writeln!(
                out,
                "Previewing {} of {}",
                index + 1,
                engine.variations().candidates().len()
            )?;
        }
        "accept" => {
            engine.accept()?;
            writeln!(out, "Accepted")?;
            print_position(engine, out)?;
        }
        "cancel" => {
            engine.cancel()?;
            writeln!(out, "Variations discarded")?;
        }
        "dismiss_error" => {
            engine.dismiss_error()?;
            writeln!(out, "Error dismissed")?;
        }
        "undo" => {
            if engine.undo()? {
                print_position(engine, out)?;
            } else {
                writeln!(out, "Nothing to undo")?;
            }
        }
        "redo" => {
            if engine.redo()? {
                print_position(engine, out)?;
            } else {
                writeln!(out, "Nothing to redo")?;
            }
        }
        "status" => {
            print_status(engine, started, out)?;
        }
        "export" => {
            let path = engine.export_current(intent.arg("path").map(Path::new))?;
            writeln!(out, "Saved {}", path.display())?;
        }
        "unlock_admin" => {
            engine.unlock_admin()?;
            writeln!(out, "Admin mode enabled for this session")?;
        }
        "submit_feedback" => {
            let text = required_arg(intent, "text", "/feedback requires a rating 1-5")?;
            let (rating, comment) = parse_feedback(text)?;
            engine.emit_event(
                EventKind::FeedbackSubmitted,
                json_object(json!({
                    "rating": rating,
                    "comment": comment,
                })),
            )?;
            engine
                .flags_mut()
                .set(FEEDBACK_SUBMITTED_FLAG, FlagScope::Persistent)?;
            writeln!(out, "Thanks for the feedback ({rating}/5)")?;
        }
        "unknown" => {
            let command = intent.arg("command").unwrap_or("?");
            writeln!(out, "Unknown command: /{command}. Type /help.")?;
        }
        other => {
            writeln!(out, "Unhandled action: {other}")?;
        }
    }
    Ok(())
}

fn required_arg<'a>(intent: &'a Intent, key: &str, message: &str) -> Result<&'a str> {
    intent.arg(key).ok_or_else(|| anyhow!("{message}"))
}

fn update_settings(
    engine: &mut StudioEngine,
    apply: impl FnOnce(AdjustmentSettings) -> Result<AdjustmentSettings>,
) -> Result<()> {
    let next = apply(engine.settings().clone())?;
    engine.set_settings(next)
}

fn parse_feedback(text: &str) -> Result<(u8, String)> {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let rating = parts
        .next()
        .and_then(|raw| raw.parse::<u8>().ok())
        .filter(|value| (1..=5).contains(value))
        .ok_or_else(|| anyhow!("rating must be a number from 1 to 5"))?;
    let comment = parts
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("No comment provided.")
        .to_string();
    Ok((rating, comment))
}

fn print_report<W: Write>(
    engine: &StudioEngine,
    report: &GenerationReport,
    out: &mut W,
) -> Result<()> {
    match &report.completion {
        Completion::Committed { .. } => {
            writeln!(out, "Edit applied ({:.1}s)", report.elapsed_s)?;
            print_position(engine, out)?;
        }
        Completion::Ready { count } => {
            writeln!(
                out,
                "{count} variations ready ({:.1}s). Use /preview <n>, /accept or /cancel.",
                report.elapsed_s
            )?;
        }
        Completion::Failed { .. } => {
            writeln!(
                out,
                "{} Use /dismiss to continue.",
                engine.variations().error().unwrap_or("Generation failed.")
            )?;
        }
        Completion::Stale => {
            writeln!(out, "Result discarded (superseded)")?;
        }
    }
    print_report_warnings(out, report)
}

fn print_report_warnings<W: Write>(out: &mut W, report: &GenerationReport) -> Result<()> {
    for warning in &report.warnings {
        writeln!(out, "warning: {warning}")?;
    }
    Ok(())
}

fn print_position<W: Write>(engine: &StudioEngine, out: &mut W) -> Result<()> {
    let history = engine.history();
    match history.cursor() {
        Some(0) => writeln!(out, "Original ({} steps)", history.total_steps())?,
        Some(cursor) => writeln!(
            out,
            "Step {} of {}",
            cursor,
            history.total_steps().saturating_sub(1)
        )?,
        None => writeln!(out, "No image loaded")?,
    }
    Ok(())
}

fn print_status<W: Write>(engine: &StudioEngine, started: Instant, out: &mut W) -> Result<()> {
    let variations = engine.variations();
    writeln!(out, "status: {}", variations.status().as_str())?;
    print_position(engine, out)?;
    if let Some(index) = variations.preview_index() {
        writeln!(
            out,
            "preview: {} of {}",
            index + 1,
            variations.candidates().len()
        )?;
    }
    if let Some(error) = variations.error() {
        writeln!(out, "error: {error}")?;
    }
    writeln!(
        out,
        "settings: {}",
        serde_json::to_string(&engine.settings().snapshot())?
    )?;
    writeln!(out, "editor: {}", engine.editor_name())?;
    let usage = engine.usage();
    writeln!(
        out,
        "usage: {} / {} images today",
        usage.used_today(),
        usage.limit()
    )?;
    if let Some(mask) = engine.mask() {
        writeln!(
            out,
            "mask: {}x{} ({:.0}% marked)",
            mask.width,
            mask.height,
            mask.coverage * 100.0
        )?;
    }
    if engine.is_admin() {
        let seconds = started.elapsed().as_secs();
        writeln!(
            out,
            "admin: session {} ({} steps recorded)",
            format_duration(seconds),
            engine.manifest().steps.len()
        )?;
    }
    Ok(())
}

fn format_duration(seconds: u64) -> String {
    let minutes = seconds / 60;
    let remaining = seconds % 60;
    if minutes > 0 {
        format!("{minutes}m {remaining}s")
    } else {
        format!("{remaining}s")
    }
}

/// Reads an image file. A file holding a `data:` URL is decoded instead of
/// being taken as raw bytes.
fn read_image(path: &Path) -> Result<ImageBuffer> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    if bytes.is_empty() {
        bail!("{} is empty", path.display());
    }
    if bytes.starts_with(b"data:") {
        let url = std::str::from_utf8(&bytes)
            .with_context(|| format!("{} is not a valid data URL", path.display()))?;
        return ImageBuffer::from_data_url(url)
            .with_context(|| format!("failed decoding {}", path.display()));
    }
    let mime = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(mime_for_extension)
        .unwrap_or("image/png");
    Ok(ImageBuffer::new(bytes, mime))
}

fn json_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Arc;

    use anyhow::bail;
    use clap::Parser;
    use image::{ImageFormat, Rgba, RgbaImage};
    use studio_contracts::events::{read_events, EventKind};
    use studio_contracts::flags::{FlagStore, FEEDBACK_SUBMITTED_FLAG, UPDATE_NOTICE_FLAG};
    use studio_contracts::{BackdropStyle, ImageBuffer, SessionStatus};
    use studio_engine::{DryrunEditor, StudioEngine};

    use super::{
        format_duration, parse_feedback, read_image, run_edit, run_session_loop, Cli, Command,
        SettingsArgs,
    };

    fn write_png(path: &Path, width: u32, height: u32) -> anyhow::Result<()> {
        let canvas = RgbaImage::from_pixel(width, height, Rgba([90, 90, 90, 255]));
        let mut out = Cursor::new(Vec::new());
        canvas.write_to(&mut out, ImageFormat::Png)?;
        std::fs::write(path, out.into_inner())?;
        Ok(())
    }

    fn write_mask(path: &Path, width: u32, height: u32) -> anyhow::Result<()> {
        let mut canvas = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]));
        canvas.put_pixel(1, 1, Rgba([220, 20, 20, 255]));
        canvas.put_pixel(2, 1, Rgba([220, 20, 20, 255]));
        let mut out = Cursor::new(Vec::new());
        canvas.write_to(&mut out, ImageFormat::Png)?;
        std::fs::write(path, out.into_inner())?;
        Ok(())
    }

    fn dryrun_engine(session_dir: &Path) -> anyhow::Result<StudioEngine> {
        StudioEngine::new(
            session_dir,
            session_dir.join("events.jsonl"),
            Arc::new(DryrunEditor::new()),
        )
    }

    fn settings_args() -> SettingsArgs {
        SettingsArgs {
            intensity: "standard".to_string(),
            style: "clean".to_string(),
            preset: None,
            asset: None,
            custom: None,
            count: 1,
        }
    }

    #[test]
    fn read_image_uses_extension_for_mime() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let jpg = temp.path().join("shot.JPG");
        std::fs::write(&jpg, [1, 2, 3])?;
        assert_eq!(read_image(&jpg)?.mime_type(), "image/jpeg");

        let unknown = temp.path().join("shot.bin");
        std::fs::write(&unknown, [1])?;
        assert_eq!(read_image(&unknown)?.mime_type(), "image/png");

        let empty = temp.path().join("empty.png");
        std::fs::write(&empty, [])?;
        assert!(read_image(&empty).is_err());
        Ok(())
    }

    #[test]
    fn read_image_decodes_data_url_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let pasted = temp.path().join("pasted.txt");
        let original = ImageBuffer::new(vec![7, 8, 9], "image/webp");
        std::fs::write(&pasted, format!("{}\n", original.to_data_url()))?;
        assert_eq!(read_image(&pasted)?, original);

        let broken = temp.path().join("broken.txt");
        std::fs::write(&broken, "data:image/png;base64,@@@")?;
        let err = read_image(&broken)
            .err()
            .ok_or_else(|| anyhow::anyhow!("bad base64 should fail"))?;
        assert!(format!("{err:#}").contains("failed decoding"));
        Ok(())
    }

    #[test]
    fn settings_args_build_settings() -> anyhow::Result<()> {
        let mut args = settings_args();
        args.style = "object-swap".to_string();
        args.preset = Some("watch".to_string());
        args.count = 3;
        let settings = args.to_settings()?;
        assert_eq!(settings.backdrop_style(), BackdropStyle::ObjectSwap);
        assert_eq!(settings.variation_count(), 3);
        assert!(settings.validate().is_ok());

        let mut bad = settings_args();
        bad.count = 5;
        assert!(bad.to_settings().is_err());
        let mut bad = settings_args();
        bad.intensity = "extreme".to_string();
        assert!(bad.to_settings().is_err());
        Ok(())
    }

    #[test]
    fn feedback_parsing() -> anyhow::Result<()> {
        assert_eq!(parse_feedback("4")?, (4, "No comment provided.".to_string()));
        assert_eq!(
            parse_feedback("5  lovely backdrops")?,
            (5, "lovely backdrops".to_string())
        );
        assert!(parse_feedback("9 wow").is_err());
        assert_eq!(format_duration(75), "1m 15s");
        assert_eq!(format_duration(9), "9s");
        Ok(())
    }

    #[test]
    fn session_loop_runs_slash_commands() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("source.png");
        write_png(&source, 16, 9)?;
        let session_dir = temp.path().join("session");
        let mut engine = dryrun_engine(&session_dir)?;
        let export_path = temp.path().join("final.png");
        let script = format!(
            "/load {}\n/count 2\n/generate\n/preview 2\n/accept\n/undo\n/redo\n/teleport\n/preview 1\n/feedback 5\n/export {}\n",
            source.display(),
            export_path.display()
        );

        let mut out = Vec::new();
        run_session_loop(&mut engine, &mut Cursor::new(script), &mut out)?;
        let transcript = String::from_utf8(out)?;

        assert!(transcript.contains("What's new"));
        assert!(transcript.contains("2 variations ready"));
        assert!(transcript.contains("Previewing 2 of 2"));
        assert!(transcript.contains("Accepted\nStep 1 of 1"));
        assert!(transcript.contains("Original (2 steps)"));
        assert!(transcript.contains("Unknown command: /teleport"));
        assert!(transcript.contains("select_preview failed"));
        assert!(export_path.exists());
        assert_eq!(engine.history().total_steps(), 2);
        assert_eq!(engine.variations().status(), SessionStatus::Idle);

        let flags = FlagStore::new(session_dir.join("flags.json"));
        assert!(flags.is_set(UPDATE_NOTICE_FLAG));
        assert!(flags.is_set(FEEDBACK_SUBMITTED_FLAG));
        Ok(())
    }

    #[test]
    fn session_loop_replaces_masked_object() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("source.png");
        let mask = temp.path().join("mask.png");
        write_png(&source, 16, 9)?;
        write_mask(&mask, 16, 9)?;
        let session_dir = temp.path().join("session");
        let mut engine = dryrun_engine(&session_dir)?;
        let script = format!(
            "/load {}\n/replace a vase\n/mask {}\n/replace Pile of Old Books\n/preview 0\n/preview 4\n/accept\n/status\n/clear_mask\n/clear_mask\n",
            source.display(),
            mask.display()
        );

        let mut out = Vec::new();
        run_session_loop(&mut engine, &mut Cursor::new(script), &mut out)?;
        let transcript = String::from_utf8(out)?;

        assert!(transcript.contains("replace_object failed: no mask set"));
        assert!(transcript.contains("Mask set: 16x9, 1% marked."));
        assert!(transcript.contains("4 variations ready"));
        assert!(transcript.contains("select_preview failed: preview index starts at 1"));
        assert!(transcript.contains("Previewing 4 of 4"));
        assert!(transcript.contains("Accepted\nStep 1 of 1"));
        assert!(transcript.contains("usage: 4 / 50 images today"));
        assert!(transcript.contains("mask: 16x9 (1% marked)"));
        assert!(transcript.contains("Mask cleared\n> No mask set"));

        let kinds: Vec<EventKind> = read_events(&session_dir.join("events.jsonl"))?
            .into_iter()
            .map(|record| record.kind)
            .collect();
        assert!(kinds.contains(&EventKind::MaskSet));
        assert!(kinds.contains(&EventKind::VariationAccepted));
        assert_eq!(kinds.last(), Some(&EventKind::MaskCleared));
        Ok(())
    }

    #[test]
    fn edit_command_replaces_masked_area() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("source.png");
        let mask = temp.path().join("mask.png");
        write_png(&source, 8, 8)?;
        write_mask(&mask, 8, 8)?;
        let out_dir = temp.path().join("run");
        let saved = temp.path().join("replaced.png");
        let path_arg = |path: &Path| path.display().to_string();

        let incomplete = Cli::try_parse_from([
            "studio-rs".to_string(),
            "edit".to_string(),
            "--input".to_string(),
            path_arg(&source),
            "--out".to_string(),
            path_arg(&out_dir),
            "--mask".to_string(),
            path_arg(&mask),
        ]);
        assert!(incomplete.is_err());

        let cli = Cli::try_parse_from([
            "studio-rs".to_string(),
            "edit".to_string(),
            "--input".to_string(),
            path_arg(&source),
            "--out".to_string(),
            path_arg(&out_dir),
            "--editor".to_string(),
            "dryrun".to_string(),
            "--mask".to_string(),
            path_arg(&mask),
            "--replace".to_string(),
            "Vintage Film Camera".to_string(),
            "--pick".to_string(),
            "3".to_string(),
            "--save".to_string(),
            path_arg(&saved),
        ])?;
        let Command::Edit(args) = cli.command else {
            bail!("expected the edit subcommand");
        };
        assert_eq!(run_edit(args)?, 0);
        assert!(saved.exists());

        let records = read_events(&out_dir.join("events.jsonl"))?;
        let started = records
            .iter()
            .find(|record| record.kind == EventKind::GenerationStarted)
            .ok_or_else(|| anyhow::anyhow!("generation_started missing"))?;
        assert_eq!(started.payload["count"], serde_json::Value::from(4));
        assert!(started.payload["prompt"]
            .as_str()
            .unwrap_or_default()
            .contains("\"Vintage Film Camera\""));
        assert!(FlagStore::new(out_dir.join("flags.json")).path().exists());
        Ok(())
    }
}
