//! Tool registry and built-in tool implementations for the Quill server.

mod echo;
mod records;
mod registry;
pub mod schema;
mod summarize;

pub use echo::EchoTool;
pub use records::{
    CreateRecordTool, DeleteRecordTool, ListRecordsTool, ReadRecordTool, UpdateRecordTool,
    record_tools,
};
pub use registry::ToolRegistry;
pub use summarize::SummarizeRecordsTool;
