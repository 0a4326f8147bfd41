//! The conversation orchestrator for agentweave.
//!
//! An agent instance advances one **turn** at a time:
//!
//! 1. **Receive** a user message and announce `working`
//! 2. **Build the prompt** from the definition's prompt tree and the
//!    history still inside the context window
//! 3. **Stream** the provider response into an assistant message
//! 4. **If a tool yields back**: the tool result joins the history and the
//!    loop returns to step 2
//! 5. **Otherwise**: the turn ends and control returns to the human
//!
//! Tools and persistence plug in through the hook registry built by
//! [`agentweave_tools::ToolRegistry`].

pub mod context;
pub mod orchestrator;
pub mod prompt;

#[cfg(test)]
mod test_helpers;

pub use context::{filter_window, in_window};
pub use orchestrator::{AgentOrchestrator, TurnOutcome};
pub use prompt::{build_prompts, flatten_tree};
