//! Nybble-stream codec for Level One instruction operands.
//!
//! Opcodes occupy exactly one nybble. Operands use a variable-length
//! encoding biased toward the tiny values that dominate real code:
//!
//! * `0..=9`: one nybble, the value itself.
//! * `10..=73`: two nybbles, an escape in `10..=13` supplying the high two
//!   bits, then one nybble of low bits, biased by 10.
//! * escape `14`: four nybbles of big-endian payload (through `u16`).
//! * escape `15`: eight nybbles of big-endian payload (through `u32`).
//!
//! The writer always emits the shortest form, so encodings are canonical
//! and the codec round-trips exactly.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NybbleError {
    #[error("nybble stream ended mid-operand at index {at}")]
    Truncated { at: usize },
}

/// Append-only nybble sink.
#[derive(Debug, Default, Clone)]
pub struct NybbleWriter {
    nybbles: Vec<u8>,
}

impl NybbleWriter {
    pub fn new() -> NybbleWriter {
        NybbleWriter::default()
    }

    pub fn write_nybble(&mut self, nybble: u8) {
        debug_assert!(nybble < 16);
        self.nybbles.push(nybble);
    }

    pub fn write_operand(&mut self, value: u32) {
        match value {
            0..=9 => self.write_nybble(value as u8),
            10..=73 => {
                let biased = value - 10;
                self.write_nybble(10 + (biased >> 4) as u8);
                self.write_nybble((biased & 0xF) as u8);
            }
            74..=0xFFFF => {
                self.write_nybble(14);
                for shift in [12u32, 8, 4, 0] {
                    self.write_nybble(((value >> shift) & 0xF) as u8);
                }
            }
            _ => {
                self.write_nybble(15);
                for shift in [28u32, 24, 20, 16, 12, 8, 4, 0] {
                    self.write_nybble(((value >> shift) & 0xF) as u8);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nybbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nybbles.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.nybbles
    }
}

/// Cursor over a nybble stream. Positions are zero-based here; the
/// continuation's one-based program counter subtracts one on entry.
#[derive(Debug, Clone)]
pub struct NybbleReader<'a> {
    nybbles: &'a [u8],
    position: usize,
}

impl<'a> NybbleReader<'a> {
    pub fn new(nybbles: &'a [u8], position: usize) -> NybbleReader<'a> {
        NybbleReader { nybbles, position }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn at_end(&self) -> bool {
        self.position >= self.nybbles.len()
    }

    pub fn read_nybble(&mut self) -> Result<u8, NybbleError> {
        let nybble = self
            .nybbles
            .get(self.position)
            .copied()
            .ok_or(NybbleError::Truncated { at: self.position })?;
        self.position += 1;
        Ok(nybble)
    }

    pub fn read_operand(&mut self) -> Result<u32, NybbleError> {
        let first = self.read_nybble()?;
        match first {
            0..=9 => Ok(first as u32),
            10..=13 => {
                let low = self.read_nybble()?;
                Ok((((first - 10) as u32) << 4 | low as u32) + 10)
            }
            14 => {
                let mut value = 0u32;
                for _ in 0..4 {
                    value = value << 4 | self.read_nybble()? as u32;
                }
                Ok(value)
            }
            _ => {
                let mut value = 0u32;
                for _ in 0..8 {
                    value = value << 4 | self.read_nybble()? as u32;
                }
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn boundary_values_round_trip() {
        for value in [0u32, 1, 9, 10, 11, 73, 74, 255, 0xFFFF, 0x1_0000, u32::MAX] {
            let mut writer = NybbleWriter::new();
            writer.write_operand(value);
            let nybbles = writer.finish();
            let mut reader = NybbleReader::new(&nybbles, 0);
            assert_eq!(reader.read_operand().unwrap(), value, "value {value}");
            assert!(reader.at_end());
        }
    }

    #[test]
    fn truncated_stream_reports_position() {
        let nybbles = [14u8, 1, 2];
        let mut reader = NybbleReader::new(&nybbles, 0);
        assert_eq!(
            reader.read_operand(),
            Err(NybbleError::Truncated { at: 3 })
        );
    }

    proptest! {
        #[test]
        fn any_operand_sequence_round_trips(values in proptest::collection::vec(any::<u32>(), 0..40)) {
            let mut writer = NybbleWriter::new();
            for value in &values {
                writer.write_operand(*value);
            }
            let nybbles = writer.finish();
            let mut reader = NybbleReader::new(&nybbles, 0);
            for value in &values {
                prop_assert_eq!(reader.read_operand().unwrap(), *value);
            }
            prop_assert!(reader.at_end());
        }
    }
}
