pub trait BenchTable {
    type W: BenchWriteTransaction;
    type R: for<'a> BenchReadTransaction<'a>;

    fn db_type_name() -> &'static str;

    fn write_transaction(&mut self) -> Self::W;

    fn read_transaction(&self) -> Self::R;
}

pub trait BenchWriteTransaction {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), ()>;

    fn commit(self) -> Result<(), ()>;
}

pub trait BenchReadTransaction<'a> {
    type Output: AsRef<[u8]> + 'a;

    fn get(&'a self, key: &[u8]) -> Option<Self::Output>;
}

pub struct BrambleBenchTable<'a> {
    db: &'a bramble::Database,
}

impl<'a> BrambleBenchTable<'a> {
    pub fn new(db: &'a bramble::Database) -> Self {
        BrambleBenchTable { db }
    }
}

impl<'a> BenchTable for BrambleBenchTable<'a> {
    type W = BrambleBenchWriteTransaction<'a>;
    type R = BrambleBenchReadTransaction<'a>;

    fn db_type_name() -> &'static str {
        "bramble"
    }

    fn write_transaction(&mut self) -> Self::W {
        BrambleBenchWriteTransaction {
            txn: self.db.begin_write(),
        }
    }

    fn read_transaction(&self) -> Self::R {
        BrambleBenchReadTransaction {
            txn: self.db.read_transaction(),
        }
    }
}

pub struct BrambleBenchWriteTransaction<'a> {
    txn: bramble::WriteTransaction<'a>,
}

impl BenchWriteTransaction for BrambleBenchWriteTransaction<'_> {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), ()> {
        self.txn.set(key, value).map_err(|_| ())
    }

    fn commit(self) -> Result<(), ()> {
        self.txn.commit().map_err(|_| ())
    }
}

pub struct BrambleBenchReadTransaction<'a> {
    txn: bramble::ReadOnlyTransaction<'a>,
}

impl<'a, 'b> BenchReadTransaction<'b> for BrambleBenchReadTransaction<'a> {
    type Output = Vec<u8>;

    fn get(&'b self, key: &[u8]) -> Option<Vec<u8>> {
        self.txn.get(key).unwrap()
    }
}

pub struct SledBenchTable<'a> {
    db: &'a sled::Db,
}

impl<'a> SledBenchTable<'a> {
    pub fn new(db: &'a sled::Db) -> Self {
        SledBenchTable { db }
    }
}

impl<'a> BenchTable for SledBenchTable<'a> {
    type W = SledBenchWriteTransaction<'a>;
    type R = SledBenchReadTransaction<'a>;

    fn db_type_name() -> &'static str {
        "sled"
    }

    fn write_transaction(&mut self) -> Self::W {
        SledBenchWriteTransaction { db: self.db }
    }

    fn read_transaction(&self) -> Self::R {
        SledBenchReadTransaction { db: self.db }
    }
}

pub struct SledBenchReadTransaction<'a> {
    db: &'a sled::Db,
}

impl<'a, 'b> BenchReadTransaction<'b> for SledBenchReadTransaction<'a> {
    type Output = sled::IVec;

    fn get(&'b self, key: &[u8]) -> Option<sled::IVec> {
        self.db.get(key).unwrap()
    }
}

pub struct SledBenchWriteTransaction<'a> {
    db: &'a sled::Db,
}

impl BenchWriteTransaction for SledBenchWriteTransaction<'_> {
    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), ()> {
        self.db.insert(key, value).map(|_| ()).map_err(|_| ())
    }

    fn commit(self) -> Result<(), ()> {
        self.db.flush().map(|_| ()).map_err(|_| ())
    }
}
