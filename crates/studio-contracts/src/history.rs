use crate::error::HistoryError;
use crate::image::ImageBuffer;

/// Linear edit history with a cursor.
///
/// - index 0 is always the original upload while an image is loaded
/// - the cursor is a valid index whenever the sequence is non-empty
/// - committing after an undo drops every step past the cursor
#[derive(Debug, Clone, Default)]
pub struct EditHistory {
    sequence: Vec<ImageBuffer>,
    cursor: usize,
}

impl EditHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole history with a fresh upload.
    pub fn reset(&mut self, image: ImageBuffer) {
        self.sequence.clear();
        self.sequence.push(image);
        self.cursor = 0;
    }

    /// Appends an edit result after the cursor and returns the new cursor.
    pub fn commit(&mut self, image: ImageBuffer) -> Result<usize, HistoryError> {
        if self.sequence.is_empty() {
            return Err(HistoryError::Empty);
        }
        self.sequence.truncate(self.cursor + 1);
        self.sequence.push(image);
        self.cursor = self.sequence.len() - 1;
        Ok(self.cursor)
    }

    /// Moves the cursor back one step. Returns false at the original.
    pub fn undo(&mut self) -> bool {
        if !self.can_undo() {
            return false;
        }
        self.cursor -= 1;
        true
    }

    /// Moves the cursor forward one step. Returns false at the newest step.
    pub fn redo(&mut self) -> bool {
        if !self.can_redo() {
            return false;
        }
        self.cursor += 1;
        true
    }

    pub fn current(&self) -> Option<&ImageBuffer> {
        self.sequence.get(self.cursor)
    }

    pub fn original(&self) -> Option<&ImageBuffer> {
        self.sequence.first()
    }

    pub fn cursor(&self) -> Option<usize> {
        (!self.sequence.is_empty()).then_some(self.cursor)
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn steps(&self) -> &[ImageBuffer] {
        &self.sequence
    }

    pub fn can_undo(&self) -> bool {
        !self.sequence.is_empty() && self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.sequence.len()
    }

    pub fn is_original(&self) -> bool {
        !self.sequence.is_empty() && self.cursor == 0
    }

    /// One-based position of the cursor, 0 when empty.
    pub fn step_count(&self) -> usize {
        if self.sequence.is_empty() {
            0
        } else {
            self.cursor + 1
        }
    }

    pub fn total_steps(&self) -> usize {
        self.sequence.len()
    }
}

#[cfg(test)]
mod tests {
    use super::EditHistory;
    use crate::error::HistoryError;
    use crate::image::ImageBuffer;

    fn img(tag: u8) -> ImageBuffer {
        ImageBuffer::new(vec![tag], "image/png")
    }

    fn history_of(tags: &[u8]) -> Result<EditHistory, HistoryError> {
        let mut history = EditHistory::new();
        history.reset(img(tags[0]));
        for (index, tag) in tags[1..].iter().enumerate() {
            assert_eq!(history.commit(img(*tag))?, index + 1);
        }
        Ok(history)
    }

    #[test]
    fn empty_history_has_no_cursor() {
        let mut history = EditHistory::new();
        assert!(history.current().is_none());
        assert_eq!(history.cursor(), None);
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert!(!history.is_original());
        assert_eq!(history.step_count(), 0);
        assert!(!history.undo());
        assert!(!history.redo());
        assert_eq!(history.commit(img(1)), Err(HistoryError::Empty));
    }

    #[test]
    fn commit_after_undo_drops_redo_branch() -> Result<(), HistoryError> {
        let mut history = history_of(&[b'A', b'B', b'C'])?;
        assert_eq!(history.cursor(), Some(2));

        assert!(history.undo());
        assert_eq!(history.cursor(), Some(1));
        assert_eq!(history.commit(img(b'D'))?, 2);

        assert_eq!(history.steps(), &[img(b'A'), img(b'B'), img(b'D')]);
        assert_eq!(history.current(), Some(&img(b'D')));
        assert!(!history.can_redo());
        Ok(())
    }

    #[test]
    fn undo_redo_stop_silently_at_boundaries() -> Result<(), HistoryError> {
        let mut history = history_of(&[1, 2])?;
        assert!(!history.redo());
        assert!(history.undo());
        assert!(!history.undo());
        assert!(history.is_original());
        assert_eq!(history.total_steps(), 2);
        assert!(history.redo());
        assert_eq!(history.step_count(), 2);
        Ok(())
    }

    #[test]
    fn reset_replaces_prior_state() -> Result<(), HistoryError> {
        let mut history = history_of(&[1, 2, 3, 4])?;
        history.undo();
        history.reset(img(9));
        assert_eq!(history.steps(), &[img(9)]);
        assert_eq!(history.cursor(), Some(0));
        assert_eq!(history.original(), Some(&img(9)));
        Ok(())
    }

    #[test]
    fn cursor_stays_in_bounds_under_mixed_operations() -> Result<(), HistoryError> {
        let mut history = history_of(&[0])?;
        // Deterministic pseudo-random walk over commit/undo/redo.
        let mut state: u32 = 7;
        for step in 0..500u32 {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            match (state >> 16) % 3 {
                0 => {
                    let cursor = history.commit(img((step % 251) as u8))?;
                    assert_eq!(history.cursor(), Some(cursor));
                    assert_eq!(cursor + 1, history.total_steps());
                }
                1 => {
                    history.undo();
                }
                _ => {
                    history.redo();
                }
            }
            let cursor = history.cursor().unwrap_or(usize::MAX);
            assert!(cursor < history.total_steps());
            assert_eq!(history.original(), Some(&img(0)));
        }
        Ok(())
    }
}
