//! Source units handed to the engine and the line tables used to report
//! locations inside them.

use crate::diagnostics::Location;

/// Virtual file name given to code that did not come from a file.
pub const DEFAULT_VIRTUAL_NAME: &str = "inmem.zy";

/// One evaluation request: the code and the name it is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    code: String,
    virtual_name: String,
}

impl SourceUnit {
    pub fn new(code: impl Into<String>, virtual_name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            virtual_name: virtual_name.into(),
        }
    }

    pub fn inline(code: impl Into<String>) -> Self {
        Self::new(code, DEFAULT_VIRTUAL_NAME)
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn virtual_name(&self) -> &str {
        &self.virtual_name
    }
}

/// Maps byte offsets of one parsed file back to lines and columns.
#[derive(Debug, Clone)]
pub struct SourceMap {
    name: String,
    line_starts: Vec<usize>,
    len: usize,
}

impl SourceMap {
    pub fn new(name: impl Into<String>, code: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            code.char_indices()
                .filter(|(_, ch)| *ch == '\n')
                .map(|(idx, _)| idx + 1),
        );
        Self {
            name: name.into(),
            line_starts,
            len: code.len(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self, offset: usize) -> Location {
        let offset = offset.min(self.len);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        Location {
            file: self.name.clone(),
            line: line + 1,
            column: offset - self.line_starts[line] + 1,
        }
    }
}
