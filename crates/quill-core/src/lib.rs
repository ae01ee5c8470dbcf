//! Chat orchestration for Quill: turn assembly, the tool loop, and the
//! client-side answer to sampling requests.

mod assembler;
mod orchestrator;
mod sampler;

pub use assembler::{ToolCallDirective, TurnAssembler, TurnEvent};
pub use orchestrator::{ChatEvent, MAX_TOOL_LOOPS, Orchestrator};
pub use sampler::ProviderSampler;
