//! Line-number table in the `lnotab` layout: a flat run of
//! `(address delta: u8, line delta: i8)` pairs starting from
//! `first_line_number` at offset 0.

/// Source line of the instruction starting at `offset`.
pub fn line_for_offset(first_line: u32, table: &[u8], offset: usize) -> u32 {
    let mut line = i64::from(first_line);
    let mut address = 0usize;
    for pair in table.chunks_exact(2) {
        address += pair[0] as usize;
        if address > offset {
            break;
        }
        line += i64::from(pair[1] as i8);
    }
    line.max(0) as u32
}

/// Every `(offset, line)` pair where a new line starts, in table order.
pub fn line_starts(first_line: u32, table: &[u8]) -> Vec<(usize, u32)> {
    let mut starts = vec![(0usize, first_line)];
    let mut line = i64::from(first_line);
    let mut address = 0usize;
    for pair in table.chunks_exact(2) {
        let address_delta = pair[0] as usize;
        let line_delta = pair[1] as i8;
        address += address_delta;
        if line_delta == 0 {
            continue;
        }
        line += i64::from(line_delta);
        let current = line.max(0) as u32;
        match starts.last_mut() {
            Some(last) if last.0 == address => last.1 = current,
            _ => starts.push((address, current)),
        }
    }
    starts
}

#[derive(Debug, Clone)]
pub struct LineTableBuilder {
    table: Vec<u8>,
    last_offset: usize,
    last_line: i64,
}

impl LineTableBuilder {
    pub fn new(first_line: u32) -> Self {
        Self {
            table: Vec::new(),
            last_offset: 0,
            last_line: i64::from(first_line),
        }
    }

    /// Records that the instruction at `offset` belongs to `line`. Offsets
    /// must be marked in non-decreasing order.
    pub fn mark(&mut self, offset: usize, line: u32) {
        let line = i64::from(line);
        if line == self.last_line || offset < self.last_offset {
            return;
        }
        let mut address_delta = offset - self.last_offset;
        let mut line_delta = line - self.last_line;
        while address_delta > 255 {
            self.table.extend_from_slice(&[255, 0]);
            address_delta -= 255;
        }
        while line_delta > 127 {
            self.table.extend_from_slice(&[address_delta as u8, 127]);
            address_delta = 0;
            line_delta -= 127;
        }
        while line_delta < -128 {
            self.table
                .extend_from_slice(&[address_delta as u8, (-128i8) as u8]);
            address_delta = 0;
            line_delta += 128;
        }
        self.table
            .extend_from_slice(&[address_delta as u8, (line_delta as i8) as u8]);
        self.last_offset = offset;
        self.last_line = line;
    }

    pub fn finish(self) -> Vec<u8> {
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_function() {
        let mut builder = LineTableBuilder::new(1);
        builder.mark(0, 2);
        let table = builder.finish();
        assert_eq!(table, vec![0, 1]);
        assert_eq!(line_for_offset(1, &table, 0), 2);
        assert_eq!(line_for_offset(1, &table, 2), 2);
    }

    #[test]
    fn lines_follow_offsets() {
        let mut builder = LineTableBuilder::new(10);
        builder.mark(0, 11);
        builder.mark(6, 12);
        builder.mark(14, 11);
        let table = builder.finish();
        assert_eq!(line_for_offset(10, &table, 4), 11);
        assert_eq!(line_for_offset(10, &table, 6), 12);
        assert_eq!(line_for_offset(10, &table, 12), 12);
        assert_eq!(line_for_offset(10, &table, 14), 11);
    }

    #[test]
    fn large_deltas_are_split() {
        let mut builder = LineTableBuilder::new(1);
        builder.mark(600, 400);
        let table = builder.finish();
        assert_eq!(table.len() % 2, 0);
        assert_eq!(line_for_offset(1, &table, 598), 1);
        assert_eq!(line_for_offset(1, &table, 600), 400);
    }

    #[test]
    fn line_starts_collapse_same_address() {
        let starts = line_starts(3, &[0, 1, 4, 2]);
        assert_eq!(starts, vec![(0, 4), (4, 6)]);
    }
}
