use bytes::{BufMut, Bytes, BytesMut};

/// Builds CopyData frames the way a walsender emits them for `pgoutput`.
pub struct FrameBuilder {
    lsn: u64,
    timestamp: i64,
}

/// One column of a tuple on the wire.
#[derive(Debug, Clone)]
pub enum Col<'a> {
    Null,
    Unchanged,
    Text(&'a str),
    Binary(Vec<u8>),
}

impl FrameBuilder {
    pub fn new() -> Self {
        Self {
            lsn: 0x16_B374_D848,
            // 2023-10-15 10:30:00 UTC, microseconds since 2000-01-01
            timestamp: 750_681_000_000_000,
        }
    }

    pub fn at(mut self, lsn: u64) -> Self {
        self.lsn = lsn;
        self
    }

    pub fn lsn(&self) -> u64 {
        self.lsn
    }

    fn header(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'w');
        buf.put_u64(self.lsn);
        buf.put_u64(self.lsn + 0x100);
        buf.put_i64(self.timestamp);
        buf
    }

    pub fn begin(&self, xid: u32) -> Bytes {
        let mut buf = self.header();
        buf.put_u8(b'B');
        buf.put_u64(self.lsn + 0x80);
        buf.put_i64(self.timestamp);
        buf.put_u32(xid);
        buf.freeze()
    }

    pub fn commit(&self) -> Bytes {
        let mut buf = self.header();
        buf.put_u8(b'C');
        buf.put_u8(0);
        buf.put_u64(self.lsn);
        buf.put_u64(self.lsn + 0x30);
        buf.put_i64(self.timestamp);
        buf.freeze()
    }

    /// `columns` are `(name, type oid, part of key)`.
    pub fn relation(&self, id: u32, schema: &str, table: &str, columns: &[(&str, u32, bool)]) -> Bytes {
        let mut buf = self.header();
        buf.put_u8(b'R');
        buf.put_u32(id);
        put_cstring(&mut buf, schema);
        put_cstring(&mut buf, table);
        buf.put_u8(b'd');
        buf.put_u16(columns.len() as u16);
        for (name, oid, key) in columns {
            buf.put_u8(u8::from(*key));
            put_cstring(&mut buf, name);
            buf.put_u32(*oid);
            buf.put_i32(-1);
        }
        buf.freeze()
    }

    pub fn insert(&self, id: u32, new: &[Col<'_>]) -> Bytes {
        let mut buf = self.header();
        buf.put_u8(b'I');
        buf.put_u32(id);
        buf.put_u8(b'N');
        put_tuple(&mut buf, new);
        buf.freeze()
    }

    /// `old` is sent as a full `O` image when present.
    pub fn update(&self, id: u32, old: Option<&[Col<'_>]>, new: &[Col<'_>]) -> Bytes {
        let mut buf = self.header();
        buf.put_u8(b'U');
        buf.put_u32(id);
        if let Some(old) = old {
            buf.put_u8(b'O');
            put_tuple(&mut buf, old);
        }
        buf.put_u8(b'N');
        put_tuple(&mut buf, new);
        buf.freeze()
    }

    pub fn delete(&self, id: u32, key: &[Col<'_>]) -> Bytes {
        let mut buf = self.header();
        buf.put_u8(b'D');
        buf.put_u32(id);
        buf.put_u8(b'K');
        put_tuple(&mut buf, key);
        buf.freeze()
    }

    pub fn truncate(&self, ids: &[u32]) -> Bytes {
        let mut buf = self.header();
        buf.put_u8(b'T');
        buf.put_u32(ids.len() as u32);
        buf.put_u8(0);
        for id in ids {
            buf.put_u32(*id);
        }
        buf.freeze()
    }

    pub fn keepalive(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(b'k');
        buf.put_u64(self.lsn);
        buf.put_i64(self.timestamp);
        buf.put_u8(0);
        buf.freeze()
    }
}

fn put_cstring(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn put_tuple(buf: &mut BytesMut, columns: &[Col<'_>]) {
    buf.put_u16(columns.len() as u16);
    for column in columns {
        match column {
            Col::Null => buf.put_u8(b'n'),
            Col::Unchanged => buf.put_u8(b'u'),
            Col::Text(text) => {
                buf.put_u8(b't');
                buf.put_i32(text.len() as i32);
                buf.put_slice(text.as_bytes());
            }
            Col::Binary(payload) => {
                buf.put_u8(b'b');
                buf.put_i32(payload.len() as i32);
                buf.put_slice(payload);
            }
        }
    }
}
