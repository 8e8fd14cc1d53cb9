//! Scripts: token positions to lines and columns

use std::sync::Arc;

use super::ids::{ScriptId, TokenPos};

/// A source script
///
/// Token positions are byte offsets into the script's source. The line-start table is
/// all the debugger needs; the source text itself is optional and only used to answer
/// "source of this method" queries.
#[derive(Debug, Clone)]
pub struct Script {
    /// Script id
    pub id: ScriptId,
    /// Script URL
    pub url: String,
    source: Option<Arc<str>>,
    line_starts: Vec<u32>,
    length: u32,
}

impl Script {
    /// Build a script from its source text
    pub fn new(id: ScriptId, url: impl Into<String>, source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self {
            id,
            url: url.into(),
            source: Some(Arc::from(source)),
            line_starts,
            length: source.len() as u32,
        }
    }

    /// Build a script from a line-start table only
    pub fn from_line_starts(
        id: ScriptId,
        url: impl Into<String>,
        mut line_starts: Vec<u32>,
        length: u32,
    ) -> Self {
        if line_starts.first() != Some(&0) {
            line_starts.insert(0, 0);
        }
        Self {
            id,
            url: url.into(),
            source: None,
            line_starts,
            length,
        }
    }

    /// Number of lines
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// 1-based line of a token position
    pub fn line_number(&self, pos: TokenPos) -> usize {
        match self.line_starts.binary_search(&pos.0) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }

    /// 1-based column of a token position
    pub fn column_number(&self, pos: TokenPos) -> usize {
        let line = self.line_number(pos);
        (pos.0 - self.line_starts[line - 1]) as usize + 1
    }

    /// First and last token position of a 1-based line
    pub fn line_range(&self, line: usize) -> Option<(TokenPos, TokenPos)> {
        if line == 0 || line > self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[line - 1];
        let end = match self.line_starts.get(line) {
            Some(next) => next.saturating_sub(1),
            None => self.length,
        };
        Some((TokenPos(start), TokenPos(end.max(start))))
    }

    /// Source text between two token positions
    pub fn source_slice(&self, start: TokenPos, end: TokenPos) -> Option<&str> {
        let src = self.source.as_deref()?;
        let end = (end.0 as usize).min(src.len());
        src.get(start.0 as usize..end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "class A {\n  foo() {\n    return 1;\n  }\n}\n";

    #[test]
    fn test_line_and_column() {
        let s = Script::new(ScriptId(0), "file:///a.vs", SRC);
        assert_eq!(s.line_number(TokenPos(0)), 1);
        assert_eq!(s.line_number(TokenPos(10)), 2);
        assert_eq!(s.column_number(TokenPos(12)), 3);
        assert_eq!(s.line_number(TokenPos(24)), 3);
    }

    #[test]
    fn test_line_range() {
        let s = Script::new(ScriptId(0), "file:///a.vs", SRC);
        assert_eq!(s.line_range(2), Some((TokenPos(10), TokenPos(19))));
        assert_eq!(s.line_range(0), None);
        assert_eq!(s.line_range(99), None);
    }

    #[test]
    fn test_source_slice() {
        let s = Script::new(ScriptId(0), "file:///a.vs", SRC);
        assert_eq!(s.source_slice(TokenPos(12), TokenPos(17)), Some("foo()"));
        let bare = Script::from_line_starts(ScriptId(1), "x", vec![0, 10], 20);
        assert_eq!(bare.source_slice(TokenPos(0), TokenPos(3)), None);
        assert_eq!(bare.line_number(TokenPos(15)), 2);
    }
}
