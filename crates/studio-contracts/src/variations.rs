use crate::error::SessionError;
use crate::history::EditHistory;
use crate::image::ImageBuffer;

/// User-facing message for any failed generation group.
pub const GENERATION_FAILED_MESSAGE: &str = "Processing failed. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Pending,
    Ready,
    Failed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Pending => "pending",
            SessionStatus::Ready => "ready",
            SessionStatus::Failed => "failed",
        }
    }
}

/// Identifies one `start` call. Only the newest token may complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenerationToken(u64);

impl GenerationToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// What a finished generation group did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Single result committed straight to history.
    Committed { cursor: usize },
    /// Several candidates await review.
    Ready { count: usize },
    /// At least one call failed; history is untouched.
    Failed { cause: String },
    /// The token was superseded; the results were dropped.
    Stale,
}

/// Lifecycle of one "generate N candidates" request and its review.
#[derive(Debug, Clone, Default)]
pub struct VariationSession {
    status: SessionStatus,
    candidates: Vec<ImageBuffer>,
    preview_index: usize,
    requested: usize,
    error: Option<String>,
    token: u64,
}

impl VariationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn candidates(&self) -> &[ImageBuffer] {
        &self.candidates
    }

    pub fn preview_index(&self) -> Option<usize> {
        (self.status == SessionStatus::Ready).then_some(self.preview_index)
    }

    pub fn preview(&self) -> Option<&ImageBuffer> {
        self.preview_index()
            .and_then(|index| self.candidates.get(index))
    }

    /// Number of candidates asked for by the last `start`.
    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn current_token(&self) -> GenerationToken {
        GenerationToken(self.token)
    }

    pub fn is_pending(&self) -> bool {
        self.status == SessionStatus::Pending
    }

    /// Enters Pending and hands out the token the results must carry back.
    pub fn start(&mut self, count: usize) -> Result<GenerationToken, SessionError> {
        if self.status == SessionStatus::Pending {
            return Err(SessionError::Busy);
        }
        if count == 0 {
            return Err(SessionError::InvalidCount);
        }
        self.token += 1;
        self.status = SessionStatus::Pending;
        self.candidates.clear();
        self.preview_index = 0;
        self.requested = count;
        self.error = None;
        Ok(GenerationToken(self.token))
    }

    /// Applies the joined outcome of a generation group.
    ///
    /// `results` is the full set for the group or the first failure. A token
    /// other than the current one, or a session no longer Pending, yields
    /// [`Completion::Stale`] and changes nothing.
    pub fn complete(
        &mut self,
        token: GenerationToken,
        results: Result<Vec<ImageBuffer>, String>,
        history: &mut EditHistory,
    ) -> Completion {
        if token.0 != self.token || self.status != SessionStatus::Pending {
            return Completion::Stale;
        }

        let mut images = match results {
            Ok(images) if !images.is_empty() => images,
            Ok(_) => return self.fail("generation returned no images".to_string()),
            Err(cause) => return self.fail(cause),
        };

        if images.len() == 1 {
            let image = images.remove(0);
            return match history.commit(image) {
                Ok(cursor) => {
                    self.status = SessionStatus::Idle;
                    Completion::Committed { cursor }
                }
                Err(err) => self.fail(err.to_string()),
            };
        }

        let count = images.len();
        self.candidates = images;
        self.preview_index = 0;
        self.status = SessionStatus::Ready;
        Completion::Ready { count }
    }

    /// Picks the candidate shown for review. Out-of-range indexes are
    /// rejected and the current preview stays.
    pub fn select_preview(&mut self, index: usize) -> Result<usize, SessionError> {
        if self.status != SessionStatus::Ready {
            return Err(SessionError::NotReady);
        }
        if index >= self.candidates.len() {
            return Err(SessionError::PreviewOutOfRange {
                index,
                len: self.candidates.len(),
            });
        }
        self.preview_index = index;
        Ok(index)
    }

    /// Commits the previewed candidate and returns the new history cursor.
    pub fn accept(&mut self, history: &mut EditHistory) -> Result<usize, SessionError> {
        if self.status != SessionStatus::Ready {
            return Err(SessionError::NotReady);
        }
        let Some(image) = self.candidates.get(self.preview_index).cloned() else {
            return Err(SessionError::NotReady);
        };
        let cursor = history.commit(image)?;
        self.clear();
        Ok(cursor)
    }

    /// Drops candidates or a pending request. In-flight calls keep running;
    /// their completion arrives with a superseded token.
    pub fn cancel(&mut self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Pending | SessionStatus::Ready => {
                self.token += 1;
                self.clear();
                Ok(())
            }
            SessionStatus::Idle | SessionStatus::Failed => Err(SessionError::NothingToCancel),
        }
    }

    pub fn dismiss_error(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Failed {
            return Err(SessionError::NoFailure);
        }
        self.clear();
        Ok(())
    }

    /// Returns to Idle from any state and supersedes outstanding tokens.
    /// Called before the history is reset for a new upload.
    pub fn invalidate(&mut self) {
        self.token += 1;
        self.clear();
    }

    fn fail(&mut self, cause: String) -> Completion {
        self.candidates.clear();
        self.preview_index = 0;
        self.status = SessionStatus::Failed;
        self.error = Some(GENERATION_FAILED_MESSAGE.to_string());
        Completion::Failed { cause }
    }

    fn clear(&mut self) {
        self.status = SessionStatus::Idle;
        self.candidates.clear();
        self.preview_index = 0;
        self.error = None;
    }
}
