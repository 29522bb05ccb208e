#![allow(dead_code)]

use bytes::{BufMut, Bytes, BytesMut};
use pg_capture_consumer::config::CaptureInit;
use pg_capture_consumer::model::{field, FieldSpec, TableName};
use pg_capture_consumer::source::{MemoryFeed, MemorySource};
use pg_capture_consumer::{Change, Model};
use std::sync::{Arc, Mutex};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("pg_capture_consumer=debug")
        .with_test_writer()
        .try_init()
        .ok();
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: Option<String>,
}

impl Model for User {
    fn table_name() -> TableName {
        TableName::new("public", "users")
    }

    fn fields() -> Vec<FieldSpec<Self>> {
        vec![
            field("id", |u: &mut User| &mut u.id),
            field("name", |u: &mut User| &mut u.name),
            field("email", |u: &mut User| &mut u.email),
        ]
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub total: f64,
    pub tags: Vec<String>,
}

impl Model for Order {
    fn table_name() -> TableName {
        TableName::new("shop", "orders")
    }

    fn fields() -> Vec<FieldSpec<Self>> {
        vec![
            field("id", |o: &mut Order| &mut o.id),
            field("total", |o: &mut Order| &mut o.total),
            field("tags", |o: &mut Order| &mut o.tags),
        ]
    }
}

pub fn memory_source() -> (MemorySource, MemoryFeed) {
    MemorySource::new(CaptureInit::new("memory://test")).unwrap()
}

/// Collects every change a handler sees.
#[derive(Clone)]
pub struct Recorder<M> {
    seen: Arc<Mutex<Vec<Change<M>>>>,
}

impl<M: Clone> Recorder<M> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn record(&self, change: Change<M>) {
        self.seen.lock().unwrap().push(change);
    }

    pub fn changes(&self) -> Vec<Change<M>> {
        self.seen.lock().unwrap().clone()
    }
}

/// Minimal `pgoutput` frame writer for end-to-end tests.
pub struct Frames {
    lsn: u64,
}

impl Frames {
    pub fn at(lsn: u64) -> Self {
        Self { lsn }
    }

    fn header(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(b'w');
        buf.put_u64(self.lsn);
        buf.put_u64(self.lsn);
        buf.put_i64(0);
        buf
    }

    pub fn relation(&self, id: u32, schema: &str, table: &str, columns: &[(&str, u32)]) -> Bytes {
        let mut buf = self.header();
        buf.put_u8(b'R');
        buf.put_u32(id);
        put_cstring(&mut buf, schema);
        put_cstring(&mut buf, table);
        buf.put_u8(b'd');
        buf.put_u16(columns.len() as u16);
        for (name, oid) in columns {
            buf.put_u8(0);
            put_cstring(&mut buf, name);
            buf.put_u32(*oid);
            buf.put_i32(-1);
        }
        buf.freeze()
    }

    pub fn begin(&self, xid: u32) -> Bytes {
        let mut buf = self.header();
        buf.put_u8(b'B');
        buf.put_u64(self.lsn);
        buf.put_i64(0);
        buf.put_u32(xid);
        buf.freeze()
    }

    pub fn commit(&self) -> Bytes {
        let mut buf = self.header();
        buf.put_u8(b'C');
        buf.put_u8(0);
        buf.put_u64(self.lsn);
        buf.put_u64(self.lsn);
        buf.put_i64(0);
        buf.freeze()
    }

    /// Text-format insert; `None` is a NULL column.
    pub fn insert(&self, id: u32, values: &[Option<&str>]) -> Bytes {
        let mut buf = self.header();
        buf.put_u8(b'I');
        buf.put_u32(id);
        buf.put_u8(b'N');
        buf.put_u16(values.len() as u16);
        for value in values {
            match value {
                Some(text) => {
                    buf.put_u8(b't');
                    buf.put_i32(text.len() as i32);
                    buf.put_slice(text.as_bytes());
                }
                None => buf.put_u8(b'n'),
            }
        }
        buf.freeze()
    }
}

fn put_cstring(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}
