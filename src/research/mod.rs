//! 深度研究子流程：clarify → 勾选子话题 → orchestrate → 并行 explore → synthesize → review（可 redo）

pub mod machine;
pub mod pipeline;
pub mod state;

pub use machine::{transition, ResearchEvent, ResearchNode, ResearchTransition, ReviewOutcome};
pub use pipeline::{apply_edits, initial_state, ResearchPipeline, ResearchSettings};
pub use state::{Depth, ResearchState, ResearchStatus};
