//! Character-level suppression of `<action>` blocks in streamed output.
//!
//! Chunks arrive at arbitrary boundaries, so the filter holds back any
//! suffix that could still become a tag. No lookahead beyond the tag length
//! is ever needed.

use codeloom_core::tags::{ACTION_CLOSE, ACTION_OPEN};

#[derive(Debug, Default)]
pub struct ActionTagFilter {
    inside: bool,
    held: String,
}

impl ActionTagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the part safe to display.
    pub fn feed(&mut self, chunk: &str) -> String {
        let mut visible = String::with_capacity(chunk.len());
        for ch in chunk.chars() {
            self.step(ch, &mut visible);
        }
        visible
    }

    fn step(&mut self, ch: char, visible: &mut String) {
        self.held.push(ch);
        loop {
            let target = if self.inside { ACTION_CLOSE } else { ACTION_OPEN };
            if self.held == target {
                self.inside = !self.inside;
                self.held.clear();
                return;
            }
            if target.starts_with(self.held.as_str()) {
                return; // still a viable tag prefix, keep holding
            }
            // Not a tag: release the first held character and retry the
            // remainder (it may itself start a tag).
            let first = self.held.remove(0);
            if !self.inside {
                visible.push(first);
            }
            if self.held.is_empty() {
                return;
            }
        }
    }

    /// End of stream: release whatever is still held (outside a block).
    pub fn finish(&mut self) -> String {
        if self.inside {
            self.held.clear();
            String::new()
        } else {
            std::mem::take(&mut self.held)
        }
    }

    pub fn is_suppressing(&self) -> bool {
        self.inside
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(chunks: &[&str]) -> String {
        let mut filter = ActionTagFilter::new();
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&filter.feed(chunk));
        }
        out.push_str(&filter.finish());
        out
    }

    #[test]
    fn passes_plain_text_through() {
        assert_eq!(run(&["hello ", "world"]), "hello world");
    }

    #[test]
    fn suppresses_complete_block() {
        assert_eq!(
            run(&["before <action><invoke tool=\"x\"></invoke></action> after"]),
            "before  after"
        );
    }

    #[test]
    fn suppresses_block_split_across_chunks() {
        assert_eq!(
            run(&["before <act", "ion>secret</ac", "tion> after"]),
            "before  after"
        );
    }

    #[test]
    fn tag_split_one_char_per_chunk() {
        let chunks: Vec<String> = "a<action>b</action>c".chars().map(String::from).collect();
        let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        assert_eq!(run(&refs), "ac");
    }

    #[test]
    fn lone_angle_bracket_is_not_swallowed() {
        assert_eq!(run(&["if a < b { }"]), "if a < b { }");
        assert_eq!(run(&["x <actio", "nne> y"]), "x <actionne> y");
    }

    #[test]
    fn double_open_bracket_releases_prefix() {
        assert_eq!(run(&["<<action>hidden</action>"]), "<");
    }

    #[test]
    fn unterminated_block_suppresses_to_end() {
        assert_eq!(run(&["visible <action>never closed"]), "visible ");
    }

    #[test]
    fn partial_tag_at_stream_end_is_flushed() {
        assert_eq!(run(&["tail <acti"]), "tail <acti");
    }

    #[test]
    fn text_between_blocks_stays_visible() {
        assert_eq!(
            run(&["a<action>1</action>b<action>2</action>c"]),
            "abc"
        );
    }
}
