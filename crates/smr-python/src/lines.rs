use rustpython_parser::text_size::TextRange;

/// Maps byte offsets from parser ranges to 1-based line numbers.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<u32>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        for (offset, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                starts.push(offset as u32 + 1);
            }
        }
        Self { starts }
    }

    pub fn line_of(&self, range: TextRange) -> u32 {
        let offset = u32::from(range.start());
        self.starts.partition_point(|&start| start <= offset) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustpython_parser::text_size::TextSize;

    fn at(offset: u32) -> TextRange {
        TextRange::empty(TextSize::from(offset))
    }

    #[test]
    fn offsets_map_to_lines() {
        let index = LineIndex::new("def f():\n    return 1\n\nx = 2\n");
        assert_eq!(index.line_of(at(0)), 1);
        assert_eq!(index.line_of(at(8)), 1);
        assert_eq!(index.line_of(at(9)), 2);
        assert_eq!(index.line_of(at(22)), 3);
        assert_eq!(index.line_of(at(23)), 4);
    }
}
