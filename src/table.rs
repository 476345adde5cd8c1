use crate::db::Database;
use crate::error::{Error, Result};
use crate::transactions::WriteTransaction;

pub const TYPE_EMPTY: u8 = 0;
pub const TYPE_BYTES: u8 = 1;
pub const TYPE_INT64: u8 = 2;

/// A single column value. `Empty` marks a column named by a partial
/// record but carrying nothing, so presence checks can tell the two
/// apart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Empty,
    Bytes(Vec<u8>),
    Int64(i64),
}

impl Value {
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Empty => TYPE_EMPTY,
            Value::Bytes(_) => TYPE_BYTES,
            Value::Int64(_) => TYPE_INT64,
        }
    }
}

/// A row: column names paired with values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    pub cols: Vec<String>,
    pub vals: Vec<Value>,
}

impl Record {
    pub fn new() -> Record {
        Record::default()
    }

    pub fn add(mut self, col: &str, val: Value) -> Record {
        self.cols.push(col.to_string());
        self.vals.push(val);
        self
    }

    pub fn add_bytes(self, col: &str, val: &[u8]) -> Record {
        self.add(col, Value::Bytes(val.to_vec()))
    }

    pub fn add_int64(self, col: &str, val: i64) -> Record {
        self.add(col, Value::Int64(val))
    }

    pub fn get(&self, col: &str) -> Option<&Value> {
        self.cols
            .iter()
            .position(|name| name == col)
            .map(|i| &self.vals[i])
    }
}

/// Table metadata: column names and types, the indexes (ordered column
/// subsets; index 0 is the primary key) and one namespace byte per
/// index within the shared key space.
#[derive(Clone, Debug)]
pub struct TableDef {
    pub name: String,
    pub types: Vec<u8>,
    pub cols: Vec<String>,
    pub indexes: Vec<Vec<String>>,
    pub prefixes: Vec<u8>,
}

// Internal catalog tables: plain key-value metadata and the stored
// table definitions themselves.
pub fn tdef_meta() -> TableDef {
    TableDef {
        name: "@meta".to_string(),
        types: vec![TYPE_BYTES, TYPE_BYTES],
        cols: vec!["key".to_string(), "value".to_string()],
        indexes: vec![vec!["key".to_string(), "value".to_string()]],
        prefixes: vec![1],
    }
}

pub fn tdef_table() -> TableDef {
    TableDef {
        name: "@table".to_string(),
        types: vec![TYPE_BYTES, TYPE_BYTES],
        cols: vec!["name".to_string(), "def".to_string()],
        indexes: vec![vec!["name".to_string(), "def".to_string()]],
        prefixes: vec![2],
    }
}

// Value list encoding is:
// * (1 byte) count
// * per value: (1 byte) type tag, then either an i64 big endian or
//   (1 byte) length + the bytes
//
// Both one-byte headers bound what they can describe; anything larger
// is rejected before a byte is written, never truncated.
pub(crate) fn encode_vals(vals: &[Value]) -> Result<Vec<u8>> {
    if vals.len() > u8::MAX as usize {
        return Err(Error::InvalidRecord("too many values for the count header"));
    }
    let mut out = vec![vals.len() as u8];
    for val in vals {
        out.push(val.type_tag());
        match val {
            Value::Int64(x) => out.extend_from_slice(&x.to_be_bytes()),
            Value::Bytes(bytes) => {
                if bytes.len() > u8::MAX as usize {
                    return Err(Error::InvalidRecord(
                        "byte value too long for the length header",
                    ));
                }
                out.push(bytes.len() as u8);
                out.extend_from_slice(bytes);
            }
            Value::Empty => {}
        }
    }
    Ok(out)
}

/// A key is the index's namespace byte followed by the value list.
pub(crate) fn encode_key(prefix: u8, vals: &[Value]) -> Result<Vec<u8>> {
    let mut out = vec![prefix];
    out.extend_from_slice(&encode_vals(vals)?);
    Ok(out)
}

/// Inverse of `encode_key`: skips the namespace byte, then parses the
/// value list back out.
pub(crate) fn decode_vals(mem: &[u8]) -> Result<Vec<Value>> {
    if mem.len() < 2 {
        return Err(Error::InvalidRecord("encoded values truncated"));
    }
    let count = mem[1] as usize;
    let mut vals = Vec::with_capacity(count);
    let mut offset = 2;
    for _ in 0..count {
        let tag = *mem
            .get(offset)
            .ok_or(Error::InvalidRecord("encoded values truncated"))?;
        offset += 1;
        match tag {
            TYPE_INT64 => {
                let raw = mem
                    .get(offset..offset + 8)
                    .ok_or(Error::InvalidRecord("encoded values truncated"))?;
                vals.push(Value::Int64(i64::from_be_bytes(raw.try_into().unwrap())));
                offset += 8;
            }
            TYPE_BYTES => {
                let len = *mem
                    .get(offset)
                    .ok_or(Error::InvalidRecord("encoded values truncated"))?
                    as usize;
                offset += 1;
                let raw = mem
                    .get(offset..offset + len)
                    .ok_or(Error::InvalidRecord("encoded values truncated"))?;
                vals.push(Value::Bytes(raw.to_vec()));
                offset += len;
            }
            TYPE_EMPTY => vals.push(Value::Empty),
            _ => return Err(Error::InvalidRecord("unknown value type tag")),
        }
    }
    Ok(vals)
}

/// Every primary-index column must be present with a non-empty value.
pub(crate) fn check_record(def: &TableDef, record: &Record) -> bool {
    def.indexes[0].iter().all(|col| {
        record
            .get(col)
            .map_or(false, |val| val.type_tag() != TYPE_EMPTY)
    })
}

/// Project a record onto one index's columns, in index order.
pub(crate) fn index_values(def: &TableDef, index: usize, record: &Record) -> Result<Vec<Value>> {
    def.indexes[index]
        .iter()
        .map(|col| {
            record
                .get(col)
                .cloned()
                .ok_or(Error::InvalidRecord("record is missing an indexed column"))
        })
        .collect()
}

/// A typed view over the shared key space. Rows live under the primary
/// index's prefix; each secondary index entry maps its projected
/// values back to the primary key.
pub struct Table<'db> {
    db: &'db Database,
    def: TableDef,
}

impl<'db> Table<'db> {
    pub(crate) fn new(db: &'db Database, def: TableDef) -> Result<Table<'db>> {
        if def.indexes.is_empty() {
            return Err(Error::InvalidRecord("table has no primary index"));
        }
        if def.indexes.len() != def.prefixes.len() {
            return Err(Error::InvalidRecord("index and prefix lists differ in length"));
        }
        Ok(Table { db, def })
    }

    pub fn def(&self) -> &TableDef {
        &self.def
    }

    fn primary_key(&self, record: &Record) -> Result<Vec<u8>> {
        if !check_record(&self.def, record) {
            return Err(Error::InvalidRecord("missing primary key columns"));
        }
        encode_key(self.def.prefixes[0], &index_values(&self.def, 0, record)?)
    }

    // Row payload: the non-primary columns in definition order.
    fn row_values(&self, record: &Record) -> Result<Vec<Value>> {
        let pkey_cols = &self.def.indexes[0];
        self.def
            .cols
            .iter()
            .filter(|col| !pkey_cols.contains(col))
            .map(|col| {
                record
                    .get(col)
                    .cloned()
                    .ok_or(Error::InvalidRecord("record is missing a column"))
            })
            .collect()
    }

    // Stitch a full row back from the primary-key values and the
    // stored remainder, in definition order.
    fn assemble_row(&self, pkey_vals: &[Value], rest: Vec<Value>) -> Result<Record> {
        let pkey_cols = &self.def.indexes[0];
        let mut rest_iter = rest.into_iter();
        let mut record = Record::new();
        for col in &self.def.cols {
            let val = match pkey_cols.iter().position(|name| name == col) {
                Some(i) => pkey_vals
                    .get(i)
                    .cloned()
                    .ok_or(Error::InvalidRecord("primary key values truncated"))?,
                None => rest_iter
                    .next()
                    .ok_or(Error::InvalidRecord("row payload truncated"))?,
            };
            record = record.add(col, val);
        }
        Ok(record)
    }

    pub fn insert(&self, record: &Record) -> Result<()> {
        let key = self.primary_key(record)?;
        let value = encode_key(self.def.prefixes[0], &self.row_values(record)?)?;
        let mut txn = self.db.begin_write();
        txn.set(&key, &value)?;
        self.insert_index_entries(&mut txn, record)?;
        txn.commit()
    }

    pub fn get(&self, key: &Record) -> Result<Option<Record>> {
        let pk = self.primary_key(key)?;
        match self.db.read_transaction().get(&pk)? {
            None => Ok(None),
            Some(raw) => {
                let pkey_vals = index_values(&self.def, 0, key)?;
                Ok(Some(self.assemble_row(&pkey_vals, decode_vals(&raw)?)?))
            }
        }
    }

    /// Rewrite an existing row. Secondary entries are maintained by
    /// re-emitting a delete of the old projection and an insert of the
    /// new one. Returns false when the row does not exist.
    pub fn update(&self, record: &Record) -> Result<bool> {
        let key = self.primary_key(record)?;
        let mut txn = self.db.begin_write();
        let old_raw = match txn.get(&key)? {
            Some(raw) => raw,
            None => {
                txn.abort()?;
                return Ok(false);
            }
        };
        let pkey_vals = index_values(&self.def, 0, record)?;
        let old = self.assemble_row(&pkey_vals, decode_vals(&old_raw)?)?;
        self.delete_index_entries(&mut txn, &old)?;
        txn.set(
            &key,
            &encode_key(self.def.prefixes[0], &self.row_values(record)?)?,
        )?;
        self.insert_index_entries(&mut txn, record)?;
        txn.commit()?;
        Ok(true)
    }

    /// Remove a row by its primary key columns. Returns whether it
    /// existed.
    pub fn delete(&self, key: &Record) -> Result<bool> {
        let pk = self.primary_key(key)?;
        let mut txn = self.db.begin_write();
        let old_raw = match txn.get(&pk)? {
            Some(raw) => raw,
            None => {
                txn.abort()?;
                return Ok(false);
            }
        };
        let pkey_vals = index_values(&self.def, 0, key)?;
        let old = self.assemble_row(&pkey_vals, decode_vals(&old_raw)?)?;
        self.delete_index_entries(&mut txn, &old)?;
        txn.remove(&pk)?;
        txn.commit()?;
        Ok(true)
    }

    /// Inclusive scan over one index. `start` and `end` must carry the
    /// index's columns. Secondary hits are chased back to their rows
    /// through the stored primary key.
    pub fn scan(&self, index: usize, start: &Record, end: &Record) -> Result<Vec<Record>> {
        if index >= self.def.indexes.len() {
            return Err(Error::InvalidRecord("index number out of range"));
        }
        let start_key = encode_key(
            self.def.prefixes[index],
            &index_values(&self.def, index, start)?,
        )?;
        let end_key = encode_key(
            self.def.prefixes[index],
            &index_values(&self.def, index, end)?,
        )?;
        let txn = self.db.read_transaction();
        let pairs = txn.get_range(&start_key, &end_key)?;
        let mut rows = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            if index == 0 {
                rows.push(self.assemble_row(&decode_vals(&key)?, decode_vals(&value)?)?);
            } else {
                // The secondary value is the encoded primary key.
                let pkey_vals = decode_vals(&value)?;
                if let Some(raw) = txn.get(&value)? {
                    rows.push(self.assemble_row(&pkey_vals, decode_vals(&raw)?)?);
                }
            }
        }
        Ok(rows)
    }

    fn secondary_key(&self, index: usize, record: &Record) -> Result<Vec<u8>> {
        encode_key(
            self.def.prefixes[index],
            &index_values(&self.def, index, record)?,
        )
    }

    fn insert_index_entries(&self, txn: &mut WriteTransaction, record: &Record) -> Result<()> {
        let primary = encode_key(self.def.prefixes[0], &index_values(&self.def, 0, record)?)?;
        for index in 1..self.def.indexes.len() {
            txn.set(&self.secondary_key(index, record)?, &primary)?;
        }
        Ok(())
    }

    fn delete_index_entries(&self, txn: &mut WriteTransaction, record: &Record) -> Result<()> {
        for index in 1..self.def.indexes.len() {
            txn.remove(&self.secondary_key(index, record)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Database;
    use tempfile::NamedTempFile;

    fn student_table() -> TableDef {
        TableDef {
            name: "student".to_string(),
            types: vec![TYPE_INT64, TYPE_INT64, TYPE_BYTES, TYPE_INT64],
            cols: vec![
                "id".to_string(),
                "age".to_string(),
                "name".to_string(),
                "join_time".to_string(),
            ],
            indexes: vec![
                vec!["id".to_string()],
                vec!["age".to_string(), "name".to_string()],
            ],
            prefixes: vec![11, 12],
        }
    }

    fn open_db(tmpfile: &NamedTempFile) -> Database {
        unsafe { Database::open(tmpfile.path()).unwrap() }
    }

    #[test]
    fn check_record_requires_primary_columns() {
        let def = student_table();
        let with_id = Record::new()
            .add_int64("id", 1)
            .add("age", Value::Empty)
            .add("name", Value::Empty);
        assert!(check_record(&def, &with_id));

        let without_id = Record::new()
            .add("id", Value::Empty)
            .add_int64("age", 32)
            .add("name", Value::Empty);
        assert!(!check_record(&def, &without_id));
    }

    #[test]
    fn encode_decode_roundtrip() {
        let original = vec![Value::Int64(32), Value::Bytes(b"adam".to_vec())];
        let encoded = encode_key(11, &original).unwrap();
        assert_eq!(encoded[0], 11);
        let decoded = decode_vals(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn encode_handles_the_length_header_boundary() {
        // A 255-byte value fills the one-byte length header exactly.
        let largest = vec![Value::Bytes(vec![7u8; 255])];
        let decoded = decode_vals(&encode_key(11, &largest).unwrap()).unwrap();
        assert_eq!(largest, decoded);

        // One byte more must be rejected, not truncated.
        let oversized = vec![Value::Bytes(vec![7u8; 256])];
        assert!(encode_vals(&oversized).is_err());
        assert!(encode_key(11, &oversized).is_err());

        // Same for the count header.
        let too_many = vec![Value::Empty; 256];
        assert!(encode_vals(&too_many).is_err());
    }

    #[test]
    fn encoded_int_keys_sort_numerically() {
        // Big-endian i64 payloads keep byte order aligned with numeric
        // order for non-negative keys.
        let small = encode_key(11, &[Value::Int64(2)]).unwrap();
        let large = encode_key(11, &[Value::Int64(300)]).unwrap();
        assert!(small < large);
    }

    #[test]
    fn index_projection() {
        let def = student_table();
        let record = Record::new()
            .add_int64("id", 1)
            .add_int64("age", 30)
            .add_bytes("name", b"bao")
            .add_int64("join_time", 2025);
        let vals = index_values(&def, 1, &record).unwrap();
        assert_eq!(vals, vec![Value::Int64(30), Value::Bytes(b"bao".to_vec())]);
    }

    #[test]
    fn insert_get_update_delete() {
        let tmpfile = NamedTempFile::new().unwrap();
        let db = open_db(&tmpfile);
        let table = db.open_table(student_table()).unwrap();

        let row = Record::new()
            .add_int64("id", 1)
            .add_int64("age", 30)
            .add_bytes("name", b"bao")
            .add_int64("join_time", 2025);
        table.insert(&row).unwrap();

        let key = Record::new().add_int64("id", 1);
        let fetched = table.get(&key).unwrap().unwrap();
        assert_eq!(fetched.get("age"), Some(&Value::Int64(30)));
        assert_eq!(fetched.get("name"), Some(&Value::Bytes(b"bao".to_vec())));
        assert_eq!(fetched.get("join_time"), Some(&Value::Int64(2025)));

        let updated = Record::new()
            .add_int64("id", 1)
            .add_int64("age", 31)
            .add_bytes("name", b"bao")
            .add_int64("join_time", 2026);
        assert!(table.update(&updated).unwrap());
        let fetched = table.get(&key).unwrap().unwrap();
        assert_eq!(fetched.get("age"), Some(&Value::Int64(31)));

        assert!(table.delete(&key).unwrap());
        assert!(table.get(&key).unwrap().is_none());
        assert!(!table.delete(&key).unwrap());
    }

    #[test]
    fn missing_primary_key_is_rejected() {
        let tmpfile = NamedTempFile::new().unwrap();
        let db = open_db(&tmpfile);
        let table = db.open_table(student_table()).unwrap();
        let row = Record::new().add_int64("age", 30).add_bytes("name", b"bao");
        assert!(table.insert(&row).is_err());
    }

    #[test]
    fn primary_scan_in_key_order() {
        let tmpfile = NamedTempFile::new().unwrap();
        let db = open_db(&tmpfile);
        let table = db.open_table(student_table()).unwrap();
        for id in [5i64, 1, 3, 2, 4] {
            let row = Record::new()
                .add_int64("id", id)
                .add_int64("age", 20 + id)
                .add_bytes("name", format!("s{}", id).as_bytes())
                .add_int64("join_time", 2020);
            table.insert(&row).unwrap();
        }
        let start = Record::new().add_int64("id", 2);
        let end = Record::new().add_int64("id", 4);
        let rows = table.scan(0, &start, &end).unwrap();
        let ids: Vec<&Value> = rows.iter().map(|r| r.get("id").unwrap()).collect();
        assert_eq!(
            ids,
            vec![&Value::Int64(2), &Value::Int64(3), &Value::Int64(4)]
        );
    }

    #[test]
    fn secondary_index_follows_updates() {
        let tmpfile = NamedTempFile::new().unwrap();
        let db = open_db(&tmpfile);
        let table = db.open_table(student_table()).unwrap();
        let row = Record::new()
            .add_int64("id", 7)
            .add_int64("age", 40)
            .add_bytes("name", b"lin")
            .add_int64("join_time", 2019);
        table.insert(&row).unwrap();

        let by_age = |age: i64| {
            let probe = Record::new().add_int64("age", age).add_bytes("name", b"lin");
            table.scan(1, &probe, &probe).unwrap()
        };
        assert_eq!(by_age(40).len(), 1);
        assert_eq!(by_age(40)[0].get("id"), Some(&Value::Int64(7)));

        // The update hook re-emits the secondary entry under the new
        // projection and drops the old one.
        let moved = Record::new()
            .add_int64("id", 7)
            .add_int64("age", 41)
            .add_bytes("name", b"lin")
            .add_int64("join_time", 2019);
        assert!(table.update(&moved).unwrap());
        assert!(by_age(40).is_empty());
        assert_eq!(by_age(41)[0].get("id"), Some(&Value::Int64(7)));

        let key = Record::new().add_int64("id", 7);
        assert!(table.delete(&key).unwrap());
        assert!(by_age(41).is_empty());
    }

    #[test]
    fn catalog_defs_share_the_key_space() {
        let meta = tdef_meta();
        let table = tdef_table();
        assert_eq!(meta.prefixes, vec![1]);
        assert_eq!(table.prefixes, vec![2]);
        // Different prefixes keep identical values apart.
        let key = vec![Value::Bytes(b"x".to_vec())];
        assert_ne!(
            encode_key(meta.prefixes[0], &key).unwrap(),
            encode_key(table.prefixes[0], &key).unwrap()
        );
    }
}
