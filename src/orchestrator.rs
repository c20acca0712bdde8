//! One conversion request, start to finish: resolve → transform → encode → deliver, with the
//! request's artifact scope released on every exit.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;
use uuid::Uuid;

use crate::artifacts::{ArtifactManager, ArtifactScope};
use crate::codec::AudioCodec;
use crate::dsp::{TransformEngine, TransformParameters};
use crate::error::{AppError, ConversionError, ErrorKind};
use crate::source::SourceResolver;

const DELIVERABLE_STEM: &str = "lofi";
const MAX_TITLE_LEN: usize = 80;

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._ -]+").expect("invalid filename regex"));
static SEPARATOR_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_]+").expect("invalid filename regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStage {
    Idle,
    Resolving,
    Transforming,
    Encoding,
    Delivering,
    Done,
    Failed(ErrorKind),
}

impl ConversionStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConversionStage::Done | ConversionStage::Failed(_))
    }

    /// Forward one step, or to `Failed` from any non-terminal stage.
    pub fn can_transition_to(self, next: ConversionStage) -> bool {
        use ConversionStage::*;
        match (self, next) {
            (from, Failed(_)) => !from.is_terminal(),
            (Idle, Resolving)
            | (Resolving, Transforming)
            | (Transforming, Encoding)
            | (Encoding, Delivering)
            | (Delivering, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConversionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConversionStage::Idle => "idle",
            ConversionStage::Resolving => "resolving",
            ConversionStage::Transforming => "transforming",
            ConversionStage::Encoding => "encoding",
            ConversionStage::Delivering => "delivering",
            ConversionStage::Done => "done",
            ConversionStage::Failed(kind) => return write!(f, "failed({kind})"),
        };
        f.write_str(s)
    }
}

/// Shared flag checked between stages. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub payload: Vec<u8>,
    pub filename: String,
}

struct Run<'a> {
    stage: ConversionStage,
    cancel: &'a CancelToken,
    id: String,
}

impl Run<'_> {
    fn advance(&mut self, next: ConversionStage) -> Result<(), AppError> {
        if self.cancel.is_cancelled() {
            log::info!(
                target: "lofi::orchestrator",
                "[{}] cancelled before {}",
                self.id,
                next
            );
            return Err(AppError::Aborted);
        }
        self.move_to(next);
        Ok(())
    }

    fn move_to(&mut self, next: ConversionStage) {
        debug_assert!(
            self.stage.can_transition_to(next),
            "illegal transition {} -> {}",
            self.stage,
            next
        );
        log::debug!(
            target: "lofi::orchestrator",
            "[{}] {} -> {}",
            self.id,
            self.stage,
            next
        );
        self.stage = next;
    }
}

pub struct ConversionOrchestrator {
    resolver: SourceResolver,
    engine: TransformEngine,
    codec: Arc<dyn AudioCodec>,
    artifacts: ArtifactManager,
}

impl ConversionOrchestrator {
    pub fn new(
        resolver: SourceResolver,
        engine: TransformEngine,
        codec: Arc<dyn AudioCodec>,
        artifacts: ArtifactManager,
    ) -> Self {
        Self {
            resolver,
            engine,
            codec,
            artifacts,
        }
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.artifacts
    }

    pub fn convert(
        &self,
        url: &str,
        params: &TransformParameters,
    ) -> Result<ConversionResult, ConversionError> {
        self.convert_with_cancel(url, params, &CancelToken::new())
    }

    /// Single attempt, never retried. The scope is released before this returns.
    pub fn convert_with_cancel(
        &self,
        url: &str,
        params: &TransformParameters,
        cancel: &CancelToken,
    ) -> Result<ConversionResult, ConversionError> {
        let mut scope = self.artifacts.scope();
        let mut run = Run {
            stage: ConversionStage::Idle,
            cancel,
            id: scope.id().chars().take(8).collect(),
        };
        let outcome = self.run(&mut run, url, params, &mut scope);

        if let Err(e) = &outcome {
            run.move_to(ConversionStage::Failed(e.kind()));
            let level = if e.kind().is_client_error() || matches!(e, AppError::Aborted) {
                log::Level::Info
            } else {
                log::Level::Error
            };
            log::log!(
                target: "lofi::orchestrator",
                level,
                "[{}] conversion failed: {}",
                run.id,
                e
            );
        }

        let summary = scope.release_all();
        for (path, err) in &summary.failed {
            log::error!(
                target: "lofi::orchestrator",
                "[{}] could not remove {}: {}",
                run.id,
                path.display(),
                err
            );
        }
        outcome.map_err(ConversionError::from)
    }

    fn run(
        &self,
        run: &mut Run<'_>,
        url: &str,
        params: &TransformParameters,
        scope: &mut ArtifactScope,
    ) -> Result<ConversionResult, AppError> {
        run.advance(ConversionStage::Resolving)?;
        let resolved = self.resolver.resolve(url, scope)?;

        run.advance(ConversionStage::Transforming)?;
        let processed = self.engine.transform(&resolved.asset, params, scope)?;
        release_intermediate(scope, &resolved.asset.path)?;

        run.advance(ConversionStage::Encoding)?;
        let extension = self.codec.deliverable_extension();
        let deliverable = scope
            .allocate(&format!("{DELIVERABLE_STEM}.{extension}"))
            .map_err(|e| AppError::Encode(format!("cannot allocate deliverable: {e}")))?;
        self.codec.encode_deliverable(&processed.path, &deliverable)?;

        run.advance(ConversionStage::Delivering)?;
        let payload = fs::read(&deliverable)
            .map_err(|e| AppError::Encode(format!("deliverable unreadable: {e}")))?;
        if payload.is_empty() {
            return Err(AppError::Encode("deliverable is empty".to_string()));
        }
        let filename = deliverable_filename(&resolved.metadata.title, extension);

        run.move_to(ConversionStage::Done);
        log::info!(
            target: "lofi::orchestrator",
            "[{}] delivered {} ({} bytes, {:.1}s)",
            run.id,
            filename,
            payload.len(),
            processed.duration_seconds
        );
        Ok(ConversionResult { payload, filename })
    }
}

/// Drop the decoded WAV once the processed copy exists. Failing here leaves the encoder
/// without room to work, so it is reported as an encode failure.
fn release_intermediate(scope: &mut ArtifactScope, path: &Path) -> Result<(), AppError> {
    scope.release(path).map_err(|e| {
        AppError::Encode(format!(
            "cannot remove intermediate {}: {e}",
            path.display()
        ))
    })
}

/// `lofi_<title>.<ext>` with the title reduced to filename-safe ASCII, or a random id when
/// nothing survives.
pub fn deliverable_filename(title: &str, extension: &str) -> String {
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(title, " ");
    let cleaned = SEPARATOR_RUNS.replace_all(cleaned.trim(), "_");
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_' || c == '-');
    let stem: String = cleaned.chars().take(MAX_TITLE_LEN).collect();
    if stem.is_empty() {
        format!("{DELIVERABLE_STEM}_{}.{extension}", Uuid::new_v4())
    } else {
        format!("{DELIVERABLE_STEM}_{stem}.{extension}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_machine_moves_forward_only() {
        use ConversionStage::*;
        assert!(Idle.can_transition_to(Resolving));
        assert!(Delivering.can_transition_to(Done));
        assert!(!Resolving.can_transition_to(Encoding));
        assert!(!Transforming.can_transition_to(Resolving));
        let failed = Failed(ErrorKind::Decode);
        for stage in [Idle, Resolving, Transforming, Encoding, Delivering] {
            assert!(stage.can_transition_to(failed), "{stage}");
        }
        assert!(!Done.can_transition_to(failed));
        assert!(!failed.can_transition_to(Failed(ErrorKind::Aborted)));
        assert!(failed.is_terminal());
    }

    #[test]
    fn failed_stage_names_its_reason() {
        assert_eq!(
            ConversionStage::Failed(ErrorKind::ToolNotFound).to_string(),
            "failed(tool_not_found)"
        );
        assert_eq!(ConversionStage::Encoding.to_string(), "encoding");
    }

    #[test]
    fn unremovable_intermediate_is_an_encode_failure() {
        let root = tempfile::tempdir().expect("tempdir");
        let blocker = root.path().join("blocker");
        fs::write(&blocker, b"file").expect("write blocker");
        let mut scope = ArtifactManager::new(root.path()).scope();

        let err = release_intermediate(&mut scope, &blocker.join("decoded.wav"))
            .expect_err("parent is a file");
        assert_eq!(err.kind(), ErrorKind::Encode);
        assert!(err.to_string().contains("decoded.wav"), "{err}");

        release_intermediate(&mut scope, &root.path().join("gone.wav")).expect("missing is fine");
    }

    #[test]
    fn filename_from_title() {
        assert_eq!(
            deliverable_filename("Rick Astley - Never Gonna Give You Up (Official)", "mp3"),
            "lofi_Rick_Astley_-_Never_Gonna_Give_You_Up_Official.mp3"
        );
        assert_eq!(
            deliverable_filename("../../etc/passwd", "mp3"),
            "lofi_etc_passwd.mp3"
        );
    }

    #[test]
    fn untitled_falls_back_to_uuid() {
        let name = deliverable_filename("夜に駆ける", "mp3");
        assert!(name.starts_with("lofi_"));
        assert!(name.ends_with(".mp3"));
        let id = &name["lofi_".len()..name.len() - ".mp3".len()];
        assert!(Uuid::parse_str(id).is_ok(), "{name}");
    }

    #[test]
    fn long_titles_are_capped() {
        let name = deliverable_filename(&"a".repeat(500), "mp3");
        assert_eq!(name.len(), "lofi_".len() + MAX_TITLE_LEN + ".mp3".len());
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
