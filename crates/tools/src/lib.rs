//! Built-in tool implementations for Oxbow.
//!
//! Tools give the agent the ability to act: run code in a sandboxed
//! container, read and write files, run read-only git commands, search the
//! web, query the knowledge base, and manage sessions.

pub mod git_cmd;
pub mod knowledge_search;
pub mod read_file;
pub mod run_code;
pub mod session_tools;
pub mod web_search;
pub mod write_file;

#[cfg(test)]
pub(crate) mod test_util;

use oxbow_agent::ToolRegistry;
use oxbow_config::AppConfig;
use std::sync::Arc;

pub use git_cmd::GitCmdTool;
pub use knowledge_search::KnowledgeSearchTool;
pub use read_file::ReadFileTool;
pub use run_code::RunCodeTool;
pub use session_tools::{CreateSessionTool, SwitchSessionTool};
pub use web_search::{SearchBackend, SearchResultItem, StubSearchBackend, WebSearchTool};
pub use write_file::WriteFileTool;

/// Create a registry with every built-in tool, configured from `config`.
pub fn default_registry(config: &AppConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(RunCodeTool::new(config.sandbox.clone())));
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(GitCmdTool));
    registry.register(Arc::new(WebSearchTool::new()));
    registry.register(Arc::new(KnowledgeSearchTool));
    registry.register(Arc::new(CreateSessionTool));
    registry.register(Arc::new(SwitchSessionTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_all_builtins() {
        let registry = default_registry(&AppConfig::default());
        for name in [
            "run_code",
            "read_file",
            "write_file",
            "git_cmd",
            "web_search",
            "knowledge_search",
            "create_session",
            "switch_session",
        ] {
            assert!(registry.get(name).is_some(), "missing tool {name}");
        }
    }

    #[test]
    fn only_write_file_is_sensitive() {
        let registry = default_registry(&AppConfig::default());
        for name in registry.names() {
            let tool = registry.get(name).unwrap();
            assert_eq!(tool.is_sensitive(), name == "write_file", "tool {name}");
        }
    }
}
