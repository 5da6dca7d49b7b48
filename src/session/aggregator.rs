/// Assembles streamed text fragments into one utterance per turn
#[derive(Debug, Default)]
pub struct ResponseAggregator {
    pending: String,
    fragments: usize,
}

impl ResponseAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment in arrival order
    pub fn push_text(&mut self, fragment: &str) {
        self.pending.push_str(fragment);
        self.fragments += 1;
    }

    /// Close the current turn, returning its text if there was any
    pub fn complete_turn(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.pending);
        self.fragments = 0;

        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Drop the in-flight utterance
    pub fn clear(&mut self) {
        self.pending.clear();
        self.fragments = 0;
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.trim().is_empty()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }
}
