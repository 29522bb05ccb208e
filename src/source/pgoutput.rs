//! Decoder for the `pgoutput` logical replication plugin, protocol v1.
//!
//! Input is the payload of each CopyData frame on a replication connection:
//! `w` (XLogData) frames carry one pgoutput message, `k` frames are primary
//! keepalives and produce nothing.

use bytes::{Buf, Bytes};
use std::collections::HashMap;
use tracing::{debug, trace};

use super::{Field, FieldValue, Message, RowChange, SourceChange};
use crate::checkpoint::{format_lsn, Checkpoint};
use crate::decode::micros_to_datetime;
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct Relation {
    schema: String,
    table: String,
    columns: Vec<Column>,
}

#[derive(Debug, Clone)]
struct Column {
    name: String,
    type_id: u32,
}

/// Bounds-checked view over a message body.
struct Reader {
    buf: Bytes,
}

impl Reader {
    fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    fn need(&self, len: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(Error::invalid_message(format!(
                "truncated {}: need {} bytes, have {}",
                what,
                len,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        self.need(2, what)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        self.need(4, what)?;
        Ok(self.buf.get_u32())
    }

    fn i32(&mut self, what: &str) -> Result<i32> {
        self.need(4, what)?;
        Ok(self.buf.get_i32())
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        self.need(8, what)?;
        Ok(self.buf.get_u64())
    }

    fn i64(&mut self, what: &str) -> Result<i64> {
        self.need(8, what)?;
        Ok(self.buf.get_i64())
    }

    fn bytes(&mut self, len: usize, what: &str) -> Result<Bytes> {
        self.need(len, what)?;
        Ok(self.buf.split_to(len))
    }

    fn cstring(&mut self, what: &str) -> Result<String> {
        let end = self
            .buf
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::invalid_message(format!("unterminated {}", what)))?;
        let raw = self.buf.split_to(end);
        self.buf.advance(1);
        String::from_utf8(raw.to_vec())
            .map_err(|_| Error::invalid_message(format!("{} is not valid UTF-8", what)))
    }

    fn is_empty(&self) -> bool {
        !self.buf.has_remaining()
    }
}

/// Stateful pgoutput decoder. Keeps the relation cache for one replication
/// session.
#[derive(Debug, Default)]
pub struct PgOutputDecoder {
    relations: HashMap<u32, Relation>,
    last: Option<(u64, u32)>,
}

impl PgOutputDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of relations seen so far.
    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Decodes one CopyData payload.
    ///
    /// Returns `Ok(None)` for frames that carry no event: keepalives,
    /// relation and type metadata, origin markers and empty payloads.
    pub fn decode(&mut self, frame: Bytes) -> Result<Option<SourceChange>> {
        let mut reader = Reader::new(frame);
        if reader.is_empty() {
            return Ok(None);
        }

        match reader.u8("frame tag")? {
            b'w' => self.decode_xlog_data(reader),
            b'k' => {
                let wal_end = reader.u64("keepalive wal end")?;
                let _time = reader.i64("keepalive time")?;
                let reply = reader.u8("keepalive reply flag")?;
                trace!(wal_end = %format_lsn(wal_end), reply = reply != 0, "Keepalive");
                Ok(None)
            }
            tag => Err(Error::invalid_message(format!(
                "unknown CopyData tag {:?}",
                tag as char
            ))),
        }
    }

    fn decode_xlog_data(&mut self, mut reader: Reader) -> Result<Option<SourceChange>> {
        let start = reader.u64("XLogData start")?;
        let _end = reader.u64("XLogData end")?;
        let time = reader.i64("XLogData time")?;

        if reader.is_empty() {
            return Ok(None);
        }

        let message = match reader.u8("message type")? {
            b'B' => self.decode_begin(&mut reader)?,
            b'C' => self.decode_commit(&mut reader)?,
            b'R' => {
                self.decode_relation(&mut reader)?;
                return Ok(None);
            }
            b'I' => self.decode_insert(&mut reader)?,
            b'U' => self.decode_update(&mut reader)?,
            b'D' => self.decode_delete(&mut reader)?,
            b'T' => self.decode_truncate(&mut reader)?,
            kind @ (b'O' | b'Y') => {
                trace!(kind = %(kind as char), "Skipping metadata message");
                return Ok(None);
            }
            kind => {
                debug!("Unknown pgoutput message type: {}", kind as char);
                return Ok(None);
            }
        };

        let mut checkpoint = Checkpoint::new(start).with_seq(self.next_seq(start));
        if let Ok(server_time) = micros_to_datetime(time) {
            checkpoint = checkpoint.with_server_time(server_time);
        }

        Ok(Some(SourceChange {
            checkpoint,
            message,
        }))
    }

    fn next_seq(&mut self, lsn: u64) -> u32 {
        let seq = match self.last {
            Some((last, seq)) if last == lsn => seq + 1,
            _ => 0,
        };
        self.last = Some((lsn, seq));
        seq
    }

    fn decode_begin(&mut self, reader: &mut Reader) -> Result<Message> {
        let final_lsn = reader.u64("BEGIN final lsn")?;
        let _time = reader.i64("BEGIN time")?;
        let xid = reader.u32("BEGIN xid")?;

        trace!("BEGIN: lsn={}, xid={}", format_lsn(final_lsn), xid);
        Ok(Message::Begin { xid, final_lsn })
    }

    fn decode_commit(&mut self, reader: &mut Reader) -> Result<Message> {
        let _flags = reader.u8("COMMIT flags")?;
        let commit_lsn = reader.u64("COMMIT lsn")?;
        let end_lsn = reader.u64("COMMIT end lsn")?;
        let _time = reader.i64("COMMIT time")?;

        trace!("COMMIT: lsn={}", format_lsn(end_lsn));
        Ok(Message::Commit {
            commit_lsn,
            end_lsn,
        })
    }

    fn decode_relation(&mut self, reader: &mut Reader) -> Result<()> {
        let id = reader.u32("RELATION id")?;
        let schema = reader.cstring("RELATION namespace")?;
        let table = reader.cstring("RELATION name")?;
        let _replica_identity = reader.u8("RELATION replica identity")?;
        let count = reader.u16("RELATION column count")?;

        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let _flags = reader.u8("column flags")?;
            let name = reader.cstring("column name")?;
            let type_id = reader.u32("column type")?;
            let _type_modifier = reader.i32("column type modifier")?;
            columns.push(Column { name, type_id });
        }

        debug!("RELATION: {}={}.{}", id, schema, table);
        self.relations.insert(
            id,
            Relation {
                schema,
                table,
                columns,
            },
        );
        Ok(())
    }

    fn relation(&self, id: u32) -> Result<&Relation> {
        self.relations
            .get(&id)
            .ok_or_else(|| Error::invalid_message(format!("unknown relation id {}", id)))
    }

    fn decode_insert(&mut self, reader: &mut Reader) -> Result<Message> {
        let relation = self.relation(reader.u32("INSERT relation")?)?;
        match reader.u8("INSERT tuple kind")? {
            b'N' => {}
            kind => {
                return Err(Error::invalid_message(format!(
                    "unexpected tuple kind {:?} in INSERT",
                    kind as char
                )))
            }
        }

        let new = decode_tuple(reader, &relation.columns)?;
        Ok(RowChange::insert(&relation.schema, &relation.table, new).into())
    }

    fn decode_update(&mut self, reader: &mut Reader) -> Result<Message> {
        let relation = self.relation(reader.u32("UPDATE relation")?)?;

        let mut old = Vec::new();
        let mut kind = reader.u8("UPDATE tuple kind")?;
        if kind == b'K' || kind == b'O' {
            old = decode_tuple(reader, &relation.columns)?;
            kind = reader.u8("UPDATE tuple kind")?;
        }
        if kind != b'N' {
            return Err(Error::invalid_message(format!(
                "unexpected tuple kind {:?} in UPDATE",
                kind as char
            )));
        }

        let new = decode_tuple(reader, &relation.columns)?;
        Ok(RowChange::update(&relation.schema, &relation.table, new, old).into())
    }

    fn decode_delete(&mut self, reader: &mut Reader) -> Result<Message> {
        let relation = self.relation(reader.u32("DELETE relation")?)?;
        match reader.u8("DELETE tuple kind")? {
            b'K' | b'O' => {}
            kind => {
                return Err(Error::invalid_message(format!(
                    "unexpected tuple kind {:?} in DELETE",
                    kind as char
                )))
            }
        }

        let old = decode_tuple(reader, &relation.columns)?;
        Ok(RowChange::delete(&relation.schema, &relation.table, old).into())
    }

    fn decode_truncate(&mut self, reader: &mut Reader) -> Result<Message> {
        let count = reader.u32("TRUNCATE relation count")?;
        let _options = reader.u8("TRUNCATE options")?;

        let mut tables = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let relation = self.relation(reader.u32("TRUNCATE relation")?)?;
            tables.push(crate::model::qualified_name(&relation.schema, &relation.table));
        }

        debug!(tables = ?tables, "TRUNCATE");
        Ok(Message::Truncate { tables })
    }
}

/// Reads one `TupleData` block. Unchanged TOAST columns are left out of the
/// image, so the model keeps its zero value for them.
fn decode_tuple(reader: &mut Reader, columns: &[Column]) -> Result<Vec<Field>> {
    let count = reader.u16("tuple column count")? as usize;
    if count != columns.len() {
        return Err(Error::invalid_message(format!(
            "column count mismatch: {} vs {}",
            count,
            columns.len()
        )));
    }

    let mut fields = Vec::with_capacity(count);
    for column in columns {
        let value = match reader.u8("column kind")? {
            b'n' => FieldValue::Null,
            b'u' => continue,
            kind @ (b't' | b'b') => {
                let len = reader.i32("column length")?;
                let len = usize::try_from(len).map_err(|_| {
                    Error::invalid_message(format!("negative length for column {}", column.name))
                })?;
                let payload = reader.bytes(len, "column value")?;
                if kind == b't' {
                    FieldValue::Text(payload)
                } else {
                    FieldValue::Binary(payload)
                }
            }
            kind => {
                return Err(Error::invalid_message(format!(
                    "unknown column kind {:?}",
                    kind as char
                )))
            }
        };

        fields.push(Field {
            name: column.name.clone(),
            oid: column.type_id,
            value,
        });
    }

    Ok(fields)
}
