//! Engine configuration
//!
//! Option structs follow the same pattern throughout the engine: every field has a
//! sensible default, and the structs deserialize from TOML/JSON with missing keys
//! falling back to those defaults.

use serde::{Deserialize, Serialize};

use crate::vm::debugger::ExceptionPauseInfo;

/// Code generator options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Attach a source-position comment before every lowered instruction
    pub emit_comments: bool,
    /// Emit a debug step check at every safe point
    pub emit_debug_checks: bool,
    /// Maximum number of class-id comparisons emitted inline for a type test
    pub max_inline_class_checks: usize,
    /// Maximum number of pc descriptors a single function may record
    pub max_pc_descriptors: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            emit_comments: true,
            emit_debug_checks: true,
            max_inline_class_checks: 4,
            max_pc_descriptors: 1 << 16,
        }
    }
}

/// Debugger options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggerOptions {
    /// Initial exception pause policy
    pub exception_pause: ExceptionPauseInfo,
    /// Check that restored bytes match the bytes saved when a patch was applied
    pub verify_patches: bool,
}

impl Default for DebuggerOptions {
    fn default() -> Self {
        Self {
            exception_pause: ExceptionPauseInfo::NoPauseOnExceptions,
            verify_patches: true,
        }
    }
}

/// Isolate options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolateOptions {
    /// Debug name reported by the isolate mirror and debugger events
    pub name: String,
    /// Code generator options
    pub compiler: CompilerOptions,
    /// Debugger options
    pub debugger: DebuggerOptions,
}

impl Default for IsolateOptions {
    fn default() -> Self {
        Self {
            name: "main".to_string(),
            compiler: CompilerOptions::default(),
            debugger: DebuggerOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = IsolateOptions::default();
        assert_eq!(opts.name, "main");
        assert!(opts.compiler.emit_comments);
        assert_eq!(opts.compiler.max_inline_class_checks, 4);
        assert_eq!(
            opts.debugger.exception_pause,
            ExceptionPauseInfo::NoPauseOnExceptions
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let opts: IsolateOptions =
            serde_json::from_str(r#"{"name":"worker","compiler":{"emit_comments":false}}"#)
                .unwrap();
        assert_eq!(opts.name, "worker");
        assert!(!opts.compiler.emit_comments);
        assert!(opts.compiler.emit_debug_checks);
        assert!(opts.debugger.verify_patches);
    }
}
