use serde::{Deserialize, Serialize};

use crate::types::{
    error::{DatabaseError, Result},
    value::{DataType, Value},
};

/*
 * Record Layout
 * ┌──────────────────────────────────────────────────────────────────┐
 * │ header_len(4) | column_count(4) | tag[0..n](1 each)              │
 * │ length(4) for every TEXT/BLOB column, in column order            │
 * ├──────────────────────────────────────────────────────────────────┤
 * │ payload: INTEGER/REAL as 8 bytes LE, TEXT/BLOB raw bytes, NULL   │
 * │ contributes nothing                                              │
 * └──────────────────────────────────────────────────────────────────┘
 */

const FIXED_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    pub values: Vec<Value>,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, column_index: usize) -> Result<&Value> {
        self.values
            .get(column_index)
            .ok_or(DatabaseError::ColumnIndexOutOfBounds {
                index: column_index,
            })
    }

    pub fn set(&mut self, column_index: usize, value: Value) -> Result<()> {
        let slot = self
            .values
            .get_mut(column_index)
            .ok_or(DatabaseError::ColumnIndexOutOfBounds {
                index: column_index,
            })?;
        *slot = value;
        Ok(())
    }

    pub fn integer(&self, column_index: usize) -> Result<i64> {
        self.get(column_index)?.as_integer()
    }

    pub fn real(&self, column_index: usize) -> Result<f64> {
        self.get(column_index)?.as_real()
    }

    pub fn text(&self, column_index: usize) -> Result<&str> {
        self.get(column_index)?.as_text()
    }

    pub fn blob(&self, column_index: usize) -> Result<&[u8]> {
        self.get(column_index)?.as_blob()
    }

    pub fn is_null(&self, column_index: usize) -> Result<bool> {
        Ok(self.get(column_index)?.is_null())
    }

    fn header_size(&self) -> usize {
        let variable = self
            .values
            .iter()
            .filter(|v| v.data_type().is_variable_length())
            .count();
        FIXED_HEADER_SIZE + self.values.len() + variable * 4
    }

    pub fn encoded_size(&self) -> usize {
        self.header_size() + self.values.iter().map(Value::size).sum::<usize>()
    }

    pub fn encode(&self) -> Vec<u8> {
        let header_size = self.header_size();
        let mut buffer = Vec::with_capacity(self.encoded_size());

        buffer.extend_from_slice(&(header_size as u32).to_le_bytes());
        buffer.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for value in &self.values {
            buffer.push(value.data_type().tag());
        }
        for value in &self.values {
            if value.data_type().is_variable_length() {
                buffer.extend_from_slice(&(value.size() as u32).to_le_bytes());
            }
        }

        for value in &self.values {
            match value {
                Value::Null => {}
                Value::Integer(i) => buffer.extend_from_slice(&i.to_le_bytes()),
                Value::Real(r) => buffer.extend_from_slice(&r.to_le_bytes()),
                Value::Text(s) => buffer.extend_from_slice(s.as_bytes()),
                Value::Blob(b) => buffer.extend_from_slice(b),
            }
        }

        buffer
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < FIXED_HEADER_SIZE {
            return Err(malformed(format!(
                "record of {} bytes is shorter than the fixed header",
                bytes.len()
            )));
        }

        let header_size = read_u32(bytes, 0) as usize;
        let column_count = read_u32(bytes, 4) as usize;
        if header_size > bytes.len() {
            return Err(malformed(format!(
                "header size {} exceeds record size {}",
                header_size,
                bytes.len()
            )));
        }
        if column_count > header_size - FIXED_HEADER_SIZE.min(header_size) {
            return Err(malformed(format!(
                "column count {} inconsistent with header size {}",
                column_count, header_size
            )));
        }

        let tag_bytes = &bytes[FIXED_HEADER_SIZE..FIXED_HEADER_SIZE + column_count];
        let mut types = Vec::with_capacity(column_count);
        for &tag in tag_bytes {
            let data_type = DataType::from_tag(tag)
                .ok_or_else(|| malformed(format!("unknown type tag {}", tag)))?;
            types.push(data_type);
        }

        let variable = types.iter().filter(|t| t.is_variable_length()).count();
        let expected_header = FIXED_HEADER_SIZE + column_count + variable * 4;
        if expected_header != header_size {
            return Err(malformed(format!(
                "column count {} inconsistent with header size {} (expected {})",
                column_count, header_size, expected_header
            )));
        }

        let mut length_cursor = FIXED_HEADER_SIZE + column_count;
        let mut payload_cursor = header_size;
        let mut values = Vec::with_capacity(column_count);

        for data_type in types {
            let length = match data_type {
                DataType::Null => 0,
                DataType::Integer | DataType::Real => 8,
                DataType::Text | DataType::Blob => {
                    let length = read_u32(bytes, length_cursor) as usize;
                    length_cursor += 4;
                    length
                }
            };

            let end = payload_cursor
                .checked_add(length)
                .filter(|end| *end <= bytes.len())
                .ok_or_else(|| {
                    malformed(format!(
                        "declared length {} at offset {} exceeds record size {}",
                        length,
                        payload_cursor,
                        bytes.len()
                    ))
                })?;
            let payload = &bytes[payload_cursor..end];
            payload_cursor = end;

            let value = match data_type {
                DataType::Null => Value::Null,
                DataType::Integer => Value::Integer(i64::from_le_bytes(fixed8(payload))),
                DataType::Real => Value::Real(f64::from_le_bytes(fixed8(payload))),
                DataType::Text => Value::Text(
                    String::from_utf8(payload.to_vec())
                        .map_err(|_| malformed("invalid UTF-8 in text column".to_string()))?,
                ),
                DataType::Blob => Value::Blob(payload.to_vec()),
            };
            values.push(value);
        }

        if payload_cursor != bytes.len() {
            return Err(malformed(format!(
                "{} trailing bytes after last column",
                bytes.len() - payload_cursor
            )));
        }

        Ok(Record { values })
    }
}

impl From<Vec<Value>> for Record {
    fn from(values: Vec<Value>) -> Self {
        Record::new(values)
    }
}

fn malformed(details: String) -> DatabaseError {
    DatabaseError::MalformedRecord { details }
}

// Callers guarantee `offset + 4 <= bytes.len()` through the header checks.
fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn fixed8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}
