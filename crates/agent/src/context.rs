//! Context-window filter.
//!
//! A message with `duration: Some(d)` stays visible to the provider for the
//! `d` rounds after it, counted by position in history: at index `i` of `n`
//! messages it is dropped once `n - 1 - i >= d`. `None` never expires and
//! `Some(0)` is already expired. Filtering never removes anything from
//! stored history.

use agentweave_core::message::AgentMessage;

/// Whether the message at `index` of `len` is still inside the window.
pub fn in_window(index: usize, len: usize, duration: Option<u32>) -> bool {
    match duration {
        None => true,
        Some(d) => {
            let newer = len.saturating_sub(1).saturating_sub(index);
            newer < d as usize
        }
    }
}

/// The messages still inside the window, in history order.
pub fn filter_window(messages: &[AgentMessage]) -> Vec<&AgentMessage> {
    let len = messages.len();
    messages
        .iter()
        .enumerate()
        .filter(|(i, m)| in_window(*i, len, m.duration))
        .map(|(_, m)| m)
        .collect()
}
