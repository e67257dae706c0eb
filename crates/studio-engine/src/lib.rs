pub mod config;
pub mod mask;
pub mod providers;

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde_json::{json, Map, Value};
use studio_contracts::events::{
    count_by_kind, now_utc_iso, read_events, EventKind, EventPayload, EventWriter,
};
use studio_contracts::flags::{
    FlagScope, FlagStore, UsageQuota, ADMIN_MODE_FLAG, DEFAULT_DAILY_LIMIT,
};
use studio_contracts::runs::manifest::{SessionManifest, StepEntry, StepRecord, StepSource};
use studio_contracts::runs::receipts::{
    build_receipt, write_receipt, GenerationOutcome, GenerationRequest,
};
use studio_contracts::runs::summary::{write_summary, SessionSummary};
use studio_contracts::{
    compile, compile_mask_replacement, AdjustmentSettings, AspectRatio, CompiledPrompt,
    Completion, EditHistory, GenerationToken, ImageBuffer, SessionError, VariationSession,
    MASK_VARIATIONS,
};

pub use config::EditorConfig;
pub use mask::{binarize_mask, BinaryMask};
pub use providers::{
    default_editor_registry, DryrunEditor, EditRequest, GeminiEditor, ImageEditor,
    ImageEditorRegistry,
};

use providers::truncate_text;

type GroupResult = std::result::Result<Vec<ImageBuffer>, String>;

/// Runs `count` concurrent edits of the same request and joins them all.
///
/// The group succeeds only when every call does; the first failure (in call
/// order) is reported as a flattened error chain.
pub fn fan_out(editor: &dyn ImageEditor, request: &EditRequest, count: usize) -> GroupResult {
    let outcomes: Vec<Result<ImageBuffer>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..count)
            .map(|_| scope.spawn(move || editor.edit(request)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("image editor worker panicked")))
            })
            .collect()
    });

    let mut images = Vec::with_capacity(count);
    for outcome in outcomes {
        match outcome {
            Ok(image) => images.push(image),
            Err(err) => return Err(error_chain_text(&err, 1024)),
        }
    }
    Ok(images)
}

/// A generation group running on a background thread.
pub struct PendingGeneration {
    token: GenerationToken,
    count: usize,
    request: GenerationRequest,
    prompt: String,
    settings: Value,
    aspect_ratio: AspectRatio,
    warnings: Vec<String>,
    started: Instant,
    receiver: Receiver<GroupResult>,
}

impl PendingGeneration {
    pub fn token(&self) -> GenerationToken {
        self.token
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }
}

#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub token: GenerationToken,
    pub completion: Completion,
    pub aspect_ratio: AspectRatio,
    pub warnings: Vec<String>,
    pub elapsed_s: f64,
}

/// Prompt and settings of the candidates currently under review.
#[derive(Debug, Clone)]
struct ReviewContext {
    prompt: String,
    settings: Value,
}

/// One editing session: history, variation review, settings and the
/// on-disk records (`session.json`, `events.jsonl`, receipts, summary).
pub struct StudioEngine {
    session_dir: PathBuf,
    session_id: String,
    events: EventWriter,
    manifest: SessionManifest,
    flags: FlagStore,
    quota: UsageQuota,
    editor: Arc<dyn ImageEditor>,
    history: EditHistory,
    step_ids: Vec<String>,
    variations: VariationSession,
    settings: AdjustmentSettings,
    review: Option<ReviewContext>,
    mask: Option<BinaryMask>,
    started_at: String,
    generations: u64,
    failures: u64,
}

impl StudioEngine {
    pub fn new(
        session_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        editor: Arc<dyn ImageEditor>,
    ) -> Result<Self> {
        let session_dir = session_dir.into();
        std::fs::create_dir_all(&session_dir)
            .with_context(|| format!("failed to create {}", session_dir.display()))?;
        let manifest_path = session_dir.join("session.json");
        let manifest = if manifest_path.exists() {
            SessionManifest::load(&manifest_path)
        } else {
            SessionManifest::new(&manifest_path)
        };
        let session_id = manifest.session_id.clone();
        let events = EventWriter::new(events_path.into(), session_id.clone());
        let flags = FlagStore::new(session_dir.join("flags.json"));
        let quota = UsageQuota::new(session_dir.join("flags.json"), DEFAULT_DAILY_LIMIT);

        events.emit(
            EventKind::SessionStarted,
            map_object(json!({
                "out_dir": session_dir.to_string_lossy().to_string(),
                "editor": editor.name(),
            })),
        )?;

        Ok(Self {
            session_dir,
            session_id,
            events,
            manifest,
            flags,
            quota,
            editor,
            history: EditHistory::new(),
            step_ids: Vec::new(),
            variations: VariationSession::new(),
            settings: AdjustmentSettings::default(),
            review: None,
            mask: None,
            started_at: now_utc_iso(),
            generations: 0,
            failures: 0,
        })
    }

    /// Replaces the default `flags.json` store, e.g. with one shared across
    /// sessions.
    pub fn with_flag_store(mut self, flags: FlagStore) -> Self {
        self.flags = flags;
        self
    }

    /// Replaces the default quota (50 images a day in `flags.json`).
    pub fn with_usage_quota(mut self, quota: UsageQuota) -> Self {
        self.quota = quota;
        self
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn editor_name(&self) -> &str {
        self.editor.name()
    }

    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    pub fn variations(&self) -> &VariationSession {
        &self.variations
    }

    pub fn manifest(&self) -> &SessionManifest {
        &self.manifest
    }

    pub fn flags(&self) -> &FlagStore {
        &self.flags
    }

    pub fn flags_mut(&mut self) -> &mut FlagStore {
        &mut self.flags
    }

    pub fn settings(&self) -> &AdjustmentSettings {
        &self.settings
    }

    pub fn usage(&self) -> &UsageQuota {
        &self.quota
    }

    pub fn mask(&self) -> Option<&BinaryMask> {
        self.mask.as_ref()
    }

    pub fn emit_event(&self, kind: EventKind, payload: EventPayload) -> Result<Value> {
        self.events.emit(kind, payload)
    }

    pub fn set_settings(&mut self, settings: AdjustmentSettings) -> Result<()> {
        self.settings = settings;
        self.events.emit(
            EventKind::SettingsUpdated,
            map_object(json!({ "settings": self.settings.snapshot() })),
        )?;
        Ok(())
    }

    /// Starts a new history rooted at `image`. Any generation in flight or
    /// under review is superseded.
    pub fn import(&mut self, image: ImageBuffer) -> Result<()> {
        if image.is_empty() {
            bail!("cannot import an empty image");
        }
        self.variations.invalidate();
        self.review = None;
        self.mask = None;
        self.history.reset(image);
        self.step_ids.clear();
        let step = self.record_step(StepSource::Upload, None, self.settings.snapshot())?;
        let current = self.current_image()?;
        self.events.emit(
            EventKind::ImageImported,
            map_object(json!({
                "step_id": step.step_id,
                "mime_type": current.mime_type(),
                "bytes": current.len(),
                "sha256": step.image_sha256,
            })),
        )?;
        Ok(())
    }

    /// Binarizes `painted` and keeps it for object replacement until the
    /// next import or [`StudioEngine::clear_mask`].
    pub fn set_mask(&mut self, painted: &ImageBuffer) -> Result<&BinaryMask> {
        let mask = binarize_mask(painted)?;
        self.events.emit(
            EventKind::MaskSet,
            map_object(json!({
                "width": mask.width,
                "height": mask.height,
                "coverage": mask.coverage,
                "sha256": mask.image.digest(),
            })),
        )?;
        let mask: &BinaryMask = self.mask.insert(mask);
        Ok(mask)
    }

    /// Returns whether a mask was set.
    pub fn clear_mask(&mut self) -> Result<bool> {
        if self.mask.take().is_none() {
            return Ok(false);
        }
        self.events.emit(EventKind::MaskCleared, EventPayload::new())?;
        Ok(true)
    }

    /// Validates settings, compiles the prompt and starts the group on a
    /// background thread. Nothing changes when validation fails.
    pub fn begin_generation(&mut self) -> Result<PendingGeneration> {
        let source = self.current_image()?.clone();
        self.settings.validate()?;
        let compiled = compile(&self.settings);
        let count = self.settings.variation_count();
        let snapshot = self.settings.snapshot();
        self.begin_with(source, compiled, count, snapshot)
    }

    /// Starts [`MASK_VARIATIONS`] edits replacing the masked area of the
    /// current image with `replacement`.
    pub fn begin_replacement(&mut self, replacement: &str) -> Result<PendingGeneration> {
        let source = self.current_image()?.clone();
        let replacement = replacement.trim();
        if replacement.is_empty() {
            bail!("replacement text is empty");
        }
        let mask = self
            .mask
            .as_ref()
            .ok_or_else(|| anyhow!("no mask set for object replacement"))?;
        let compiled = compile_mask_replacement(&mask.image, replacement);
        let snapshot = json!({
            "mode": "mask_replacement",
            "replacement": replacement,
            "mask_coverage": mask.coverage,
        });
        self.begin_with(source, compiled, MASK_VARIATIONS, snapshot)
    }

    fn begin_with(
        &mut self,
        source: ImageBuffer,
        compiled: CompiledPrompt,
        count: usize,
        settings_snapshot: Value,
    ) -> Result<PendingGeneration> {
        if let Err(err) = self.quota.check() {
            if let SessionError::UsageLimitReached { used, limit } = &err {
                self.events.emit(
                    EventKind::UsageLimitReached,
                    map_object(json!({ "used": used, "limit": limit })),
                )?;
            }
            return Err(err.into());
        }

        let mut warnings = Vec::new();
        let aspect_ratio = match image_dimensions(&source) {
            Ok((width, height)) => AspectRatio::from_dimensions(width, height),
            Err(err) => {
                warnings.push(format!(
                    "Could not read source dimensions ({}); using 1:1.",
                    error_chain_text(&err, 200)
                ));
                AspectRatio::Square
            }
        };

        let token = self.variations.start(count)?;
        let started = self.events.emit(
            EventKind::GenerationStarted,
            map_object(json!({
                "token": token.value(),
                "editor": self.editor.name(),
                "count": count,
                "aspect_ratio": aspect_ratio.as_str(),
                "prompt": compiled.text,
                "warnings": warnings,
            })),
        );
        if let Err(err) = started {
            self.variations.invalidate();
            self.review = None;
            return Err(err);
        }
        self.review = None;

        let receipt_request = GenerationRequest {
            token: token.value(),
            editor: self.editor.name().to_string(),
            prompt: compiled.text.clone(),
            aspect_ratio: aspect_ratio.to_string(),
            count,
            source_sha256: source.digest(),
            reference_sha256: compiled.reference_image.as_ref().map(ImageBuffer::digest),
            settings: settings_snapshot.clone(),
        };
        let edit_request = EditRequest {
            source_image: source,
            reference_image: compiled.reference_image,
            prompt: compiled.text.clone(),
            aspect_ratio,
        };
        let editor = Arc::clone(&self.editor);
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let _ = sender.send(fan_out(editor.as_ref(), &edit_request, count));
        });

        Ok(PendingGeneration {
            token,
            count,
            request: receipt_request,
            prompt: compiled.text,
            settings: settings_snapshot,
            aspect_ratio,
            warnings,
            started: Instant::now(),
            receiver,
        })
    }

    /// Waits for the group and applies it. Results whose token has been
    /// superseded are reported as stale and leave the session untouched.
    pub fn resolve_generation(&mut self, pending: PendingGeneration) -> Result<GenerationReport> {
        let results = pending
            .receiver
            .recv()
            .unwrap_or_else(|_| Err("generation worker exited without a result".to_string()));
        let elapsed_s = pending.started.elapsed().as_secs_f64();
        let token = pending.token;
        let completion = self.variations.complete(token, results, &mut self.history);

        let mut extra = Map::new();
        let outcome = match &completion {
            Completion::Committed { cursor } => {
                self.generations += 1;
                let step = self.record_step(
                    StepSource::Generation,
                    Some(pending.prompt.clone()),
                    pending.settings.clone(),
                )?;
                extra.insert("step_id".to_string(), Value::String(step.step_id.clone()));
                self.record_usage(1, &mut extra)?;
                self.events.emit(
                    EventKind::GenerationCommitted,
                    map_object(json!({
                        "token": token.value(),
                        "cursor": cursor,
                        "step_id": step.step_id,
                        "elapsed_s": elapsed_s,
                    })),
                )?;
                GenerationOutcome::Committed { cursor: *cursor }
            }
            Completion::Ready { count } => {
                self.generations += 1;
                self.review = Some(ReviewContext {
                    prompt: pending.prompt.clone(),
                    settings: pending.settings.clone(),
                });
                self.record_usage(pending.count, &mut extra)?;
                self.events.emit(
                    EventKind::VariationsReady,
                    map_object(json!({
                        "token": token.value(),
                        "count": count,
                        "elapsed_s": elapsed_s,
                    })),
                )?;
                GenerationOutcome::Ready { count: *count }
            }
            Completion::Failed { cause } => {
                self.failures += 1;
                self.events.emit(
                    EventKind::GenerationFailed,
                    map_object(json!({
                        "token": token.value(),
                        "error": cause,
                        "message": self.variations.error(),
                        "elapsed_s": elapsed_s,
                    })),
                )?;
                GenerationOutcome::Failed {
                    cause: cause.clone(),
                }
            }
            Completion::Stale => {
                self.events.emit(
                    EventKind::GenerationStale,
                    map_object(json!({
                        "token": token.value(),
                        "current_token": self.variations.current_token().value(),
                    })),
                )?;
                GenerationOutcome::Stale
            }
        };

        let receipt_path = self
            .session_dir
            .join("receipts")
            .join(format!("receipt-{}.json", token.value()));
        let receipt = build_receipt(
            &pending.request,
            &outcome,
            elapsed_s,
            &pending.warnings,
            &extra,
        );
        write_receipt(&receipt_path, &receipt)?;

        Ok(GenerationReport {
            token,
            completion,
            aspect_ratio: pending.aspect_ratio,
            warnings: pending.warnings,
            elapsed_s,
        })
    }

    pub fn generate(&mut self) -> Result<GenerationReport> {
        let pending = self.begin_generation()?;
        self.resolve_generation(pending)
    }

    pub fn replace_object(&mut self, replacement: &str) -> Result<GenerationReport> {
        let pending = self.begin_replacement(replacement)?;
        self.resolve_generation(pending)
    }

    pub fn select_preview(&mut self, index: usize) -> Result<usize> {
        let index = self.variations.select_preview(index)?;
        self.events.emit(
            EventKind::PreviewSelected,
            map_object(json!({ "index": index })),
        )?;
        Ok(index)
    }

    /// Commits the previewed candidate and returns the new cursor.
    pub fn accept(&mut self) -> Result<usize> {
        let index = self.variations.preview_index();
        let cursor = self.variations.accept(&mut self.history)?;
        let review = self.review.take();
        let (prompt, settings) = match review {
            Some(review) => (Some(review.prompt), review.settings),
            None => (None, self.settings.snapshot()),
        };
        let step = self.record_step(StepSource::Variation, prompt, settings)?;
        self.events.emit(
            EventKind::VariationAccepted,
            map_object(json!({
                "index": index,
                "cursor": cursor,
                "step_id": step.step_id,
            })),
        )?;
        Ok(cursor)
    }

    pub fn cancel(&mut self) -> Result<()> {
        let status = self.variations.status();
        self.variations.cancel()?;
        self.review = None;
        self.events.emit(
            EventKind::VariationCancelled,
            map_object(json!({ "from": status.as_str() })),
        )?;
        Ok(())
    }

    pub fn dismiss_error(&mut self) -> Result<()> {
        self.variations.dismiss_error()?;
        Ok(())
    }

    /// Returns whether the cursor moved.
    pub fn undo(&mut self) -> Result<bool> {
        if !self.history.undo() {
            return Ok(false);
        }
        self.events.emit(
            EventKind::HistoryUndo,
            map_object(json!({ "cursor": self.history.cursor() })),
        )?;
        Ok(true)
    }

    pub fn redo(&mut self) -> Result<bool> {
        if !self.history.redo() {
            return Ok(false);
        }
        self.events.emit(
            EventKind::HistoryRedo,
            map_object(json!({ "cursor": self.history.cursor() })),
        )?;
        Ok(true)
    }

    /// Writes the current image to `path`, or to
    /// `<session_dir>/studio-edit-<millis>.<ext>` when none is given.
    pub fn export_current(&self, path: Option<&Path>) -> Result<PathBuf> {
        let image = self.current_image()?;
        let target = match path {
            Some(path) => path.to_path_buf(),
            None => self.session_dir.join(format!(
                "studio-edit-{}.{}",
                Utc::now().timestamp_millis(),
                image.extension()
            )),
        };
        if let Some(parent) = target.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, image.bytes())
            .with_context(|| format!("failed to write {}", target.display()))?;
        self.events.emit(
            EventKind::ImageExported,
            map_object(json!({
                "path": target.to_string_lossy().to_string(),
                "cursor": self.history.cursor(),
                "sha256": image.digest(),
            })),
        )?;
        Ok(target)
    }

    pub fn unlock_admin(&mut self) -> Result<()> {
        self.flags.set(ADMIN_MODE_FLAG, FlagScope::Session)
    }

    pub fn is_admin(&self) -> bool {
        self.flags.is_set(ADMIN_MODE_FLAG)
    }

    pub fn finish(&self) -> Result<SessionSummary> {
        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            total_steps: self.history.total_steps() as u64,
            cursor: self.history.cursor().map(|cursor| cursor as u64),
            generations: self.generations,
            failures: self.failures,
        };
        let event_counts: Map<String, Value> = count_by_kind(&read_events(self.events.path())?)
            .into_iter()
            .map(|(kind, count)| (kind.to_string(), Value::from(count)))
            .collect();
        let extra = map_object(json!({
            "editor": self.editor.name(),
            "manifest_steps": self.manifest.steps.len(),
            "images_today": self.quota.used_today(),
            "event_counts": event_counts,
        }));
        write_summary(&self.session_dir.join("summary.json"), &summary, Some(&extra))?;
        self.events.emit(
            EventKind::SessionFinished,
            map_object(json!({
                "total_steps": summary.total_steps,
                "generations": summary.generations,
                "failures": summary.failures,
            })),
        )?;
        Ok(summary)
    }

    fn record_usage(&self, images: usize, extra: &mut Map<String, Value>) -> Result<()> {
        let images = u32::try_from(images).unwrap_or(u32::MAX);
        let total = self.quota.record(images)?;
        extra.insert("images_today".to_string(), Value::from(total));
        Ok(())
    }

    fn current_image(&self) -> Result<&ImageBuffer> {
        self.history
            .current()
            .ok_or_else(|| anyhow!("no image loaded"))
    }

    /// Persists the image at the cursor as a new manifest step. `step_ids`
    /// mirrors the history, so the redo branch is dropped here too.
    fn record_step(
        &mut self,
        source: StepSource,
        prompt: Option<String>,
        settings: Value,
    ) -> Result<StepEntry> {
        let cursor = self
            .history
            .cursor()
            .ok_or_else(|| anyhow!("no image loaded"))?;
        let image = self.current_image()?.clone();
        let parent_step_id = match cursor {
            0 => None,
            _ => self.step_ids.get(cursor - 1).cloned(),
        };

        let image_file = format!(
            "steps/step-{:02}.{}",
            self.manifest.steps.len() + 1,
            image.extension()
        );
        let image_path = self.session_dir.join(&image_file);
        if let Some(parent) = image_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&image_path, image.bytes())
            .with_context(|| format!("failed to write {}", image_path.display()))?;

        let entry = self.manifest.add_step(
            StepRecord {
                source,
                prompt,
                settings,
                image_file,
                image_sha256: image.digest(),
            },
            parent_step_id,
        );
        self.manifest.save()?;
        self.step_ids.truncate(cursor);
        self.step_ids.push(entry.step_id.clone());
        Ok(entry)
    }
}

fn image_dimensions(image: &ImageBuffer) -> Result<(u32, u32)> {
    let dims = image::ImageReader::new(Cursor::new(image.bytes()))
        .with_guessed_format()
        .context("failed to sniff image format")?
        .into_dimensions()
        .context("failed to read image dimensions")?;
    Ok(dims)
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn map_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
