use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use crate::backup::file::BLOCK_SIZE;
use crate::backup::{BackupId, BackupMeta, BackupMode, WalMode};
use crate::catalog::{BackupSpec, BackupWriter, Catalog, ChangeMap};
use crate::compress::Compression;
use crate::config::{BurrowConfig, MergeConfig, RetentionConfig};
use crate::content;

pub const INSTANCE: &str = "node";
pub const ROW_SIZE: usize = 128;

#[derive(Clone)]
struct SimFile {
    data: Vec<u8>,
    is_datafile: bool,
}

/// A tiny stand-in for a database data directory: a few control files plus
/// tables stored as fixed-size rows in page-structured relation files.
pub struct SimNode {
    files: BTreeMap<String, SimFile>,
    tables: BTreeMap<String, String>,
    next_oid: u32,
    taken: HashMap<BackupId, BTreeMap<String, SimFile>>,
    generation: u64,
}

impl SimNode {
    pub fn new() -> Self {
        let mut node = Self {
            files: BTreeMap::new(),
            tables: BTreeMap::new(),
            next_oid: 16384,
            taken: HashMap::new(),
            generation: 0,
        };
        node.put_control("PG_VERSION", b"16\n".to_vec());
        node.put_control("global/pg_control", vec![0x5A; 8192]);
        node.put_control("postgresql.auto.conf", b"# empty\n".to_vec());
        node
    }

    fn put_control(&mut self, path: &str, data: Vec<u8>) {
        self.files.insert(
            path.to_string(),
            SimFile {
                data,
                is_datafile: false,
            },
        );
    }

    /// Non-data files change on every checkpoint.
    fn checkpoint(&mut self) {
        self.generation += 1;
        let stamp = self.generation.to_le_bytes();
        if let Some(f) = self.files.get_mut("global/pg_control") {
            f.data[..8].copy_from_slice(&stamp);
        }
    }

    fn row(table: &str, n: usize) -> Vec<u8> {
        let mut row = format!("{table}:{n:010}:").into_bytes();
        row.resize(ROW_SIZE, b'.');
        row
    }

    pub fn create_table(&mut self, name: &str, rows: usize) -> String {
        let path = format!("base/1/{}", self.next_oid);
        self.next_oid += 1;
        self.tables.insert(name.to_string(), path.clone());
        self.files.insert(
            path.clone(),
            SimFile {
                data: Vec::new(),
                is_datafile: true,
            },
        );
        self.insert_rows(name, rows);
        path
    }

    pub fn insert_rows(&mut self, table: &str, rows: usize) {
        let path = self.tables[table].clone();
        let file = self.files.get_mut(&path).unwrap();
        let start = file.data.len() / ROW_SIZE;
        for n in start..start + rows {
            file.data.extend_from_slice(&Self::row(table, n));
        }
    }

    /// Overwrite row `n` in place.
    pub fn update_row(&mut self, table: &str, n: usize) {
        let path = self.tables[table].clone();
        let file = self.files.get_mut(&path).unwrap();
        let mut row = Self::row(table, n);
        row[ROW_SIZE - 1] = b'u';
        file.data[n * ROW_SIZE..(n + 1) * ROW_SIZE].copy_from_slice(&row);
    }

    pub fn truncate_table(&mut self, table: &str, rows: usize) {
        let path = self.tables[table].clone();
        self.files.get_mut(&path).unwrap().data.truncate(rows * ROW_SIZE);
    }

    pub fn drop_table(&mut self, table: &str) {
        let path = self.tables.remove(table).unwrap();
        self.files.remove(&path);
    }

    pub fn row_count(files: &BTreeMap<String, Vec<u8>>, path: &str) -> usize {
        files.get(path).map_or(0, |d| d.len() / ROW_SIZE)
    }

    fn changed_blocks(before: Option<&SimFile>, after: &SimFile) -> ChangeMap {
        let Some(before) = before else {
            return ChangeMap::Full;
        };
        let page = BLOCK_SIZE as usize;
        let blocks = after.data.len().div_ceil(page);
        let changed: BTreeSet<u32> = (0..blocks)
            .filter(|b| {
                let lo = b * page;
                let a = &after.data[lo..after.data.len().min(lo + page)];
                let p = before
                    .data
                    .get(lo..before.data.len().min(lo + page))
                    .unwrap_or(&[]);
                a != p
            })
            .map(|b| b as u32)
            .collect();
        ChangeMap::Blocks(changed)
    }

    /// Take a backup through the registration interface.
    pub fn backup(
        &mut self,
        catalog: &Catalog,
        mode: BackupMode,
        parent: Option<BackupId>,
        compression: Compression,
        wal_mode: WalMode,
    ) -> BackupMeta {
        self.checkpoint();
        let spec = BackupSpec {
            mode,
            parent,
            wal_mode,
            compression,
            start_time: None,
        };
        let mut writer = BackupWriter::begin(catalog, spec).unwrap();
        let base = parent.and_then(|p| self.taken.get(&p));
        for (path, file) in &self.files {
            let changes = match (mode, base) {
                (BackupMode::Full, _) | (_, None) => ChangeMap::Full,
                (_, Some(prev)) => Self::changed_blocks(prev.get(path), file),
            };
            writer
                .add_file(path, &file.data, file.is_datafile, changes)
                .unwrap();
        }
        let meta = writer.finish().unwrap();
        self.taken.insert(meta.id, self.files.clone());
        meta
    }

    pub fn full(&mut self, catalog: &Catalog) -> BackupMeta {
        self.backup(catalog, BackupMode::Full, None, Compression::None, WalMode::Stream)
    }

    pub fn page(&mut self, catalog: &Catalog, parent: BackupId) -> BackupMeta {
        self.backup(
            catalog,
            BackupMode::Page,
            Some(parent),
            Compression::None,
            WalMode::Stream,
        )
    }

    /// Logical content of the node when `id` was taken.
    pub fn state_at(&self, id: BackupId) -> BTreeMap<String, Vec<u8>> {
        self.taken[&id]
            .iter()
            .map(|(p, f)| (p.clone(), f.data.clone()))
            .collect()
    }

    /// The backup restores to exactly the state it was taken from.
    pub fn assert_restores(&self, catalog: &Catalog, id: BackupId) {
        let restored = content::read_backup(catalog, id).unwrap();
        assert_eq!(
            restored.keys().collect::<Vec<_>>(),
            self.state_at(id).keys().collect::<Vec<_>>()
        );
        assert!(restored == self.state_at(id), "content of {id} differs");
    }
}

pub fn init_catalog(dir: &Path) -> Catalog {
    Catalog::init(dir, INSTANCE).unwrap()
}

pub fn make_test_config(dir: &Path) -> BurrowConfig {
    BurrowConfig {
        backup_dir: dir.to_path_buf(),
        instance: Some(INSTANCE.to_string()),
        merge: MergeConfig { threads: 1 },
        retention: RetentionConfig::default(),
    }
}

pub fn ids(backups: &[BackupMeta]) -> Vec<BackupId> {
    backups.iter().map(|b| b.id).collect()
}
