//! Flattening a conversation into a single prompt string

use crate::types::message::Turn;

/// One `Role: content` line per turn, in order.
///
/// Turns whose role has no prefix are left out.
pub fn build_prompt(turns: &[Turn]) -> String {
    let mut prompt = String::new();
    for turn in turns {
        if let Some(prefix) = turn.role.prefix() {
            prompt.push_str(prefix);
            prompt.push_str(": ");
            prompt.push_str(&turn.content);
            prompt.push('\n');
        }
    }
    prompt
}
